use crate::config::GatewaySettings;
use crate::database::models::GatewayConfig;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::GatewayClient;
use crate::payments::types::{
    validate_amount, ChargeRequest, ChargeResponse, GatewayName, SettlementNotice, WebhookParse,
};
use crate::payments::utils::{
    only_digits, optional_str, optional_u64, required_str, sanitize_payer_name, HttpAuth,
    PaymentHttpClient,
};
use async_trait::async_trait;
use bigdecimal::{BigDecimal, ToPrimitive};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

const PRODUCTION_URL: &str = "https://api.openpix.com.br";
const SANDBOX_URL: &str = "https://api.woovi-sandbox.com";
const MAX_PAYER_NAME_LEN: usize = 100;
const COMPLETED_EVENT: &str = "OPENPIX:CHARGE_COMPLETED";

#[derive(Debug, Clone)]
pub struct OpenPixConfig {
    pub app_id: String,
    pub base_url: String,
    pub expiration_secs: u64,
    pub description: Option<String>,
    pub timeout_secs: u64,
}

impl OpenPixConfig {
    pub fn from_gateway_config(
        config: &GatewayConfig,
        settings: &GatewaySettings,
    ) -> PaymentResult<Self> {
        let operational = &config.operational_config;

        Ok(Self {
            app_id: required_str(&config.credentials, "app_id", GatewayName::OpenPix.as_str())?,
            base_url: optional_str(operational, "base_url").unwrap_or_else(|| {
                if config.is_sandbox {
                    SANDBOX_URL.to_string()
                } else {
                    PRODUCTION_URL.to_string()
                }
            }),
            expiration_secs: optional_u64(operational, "expiration_secs").unwrap_or(3600),
            description: optional_str(operational, "description"),
            timeout_secs: settings.timeout_secs,
        })
    }
}

/// OpenPix (Woovi) gateway: `Authorization: <app id>`, amounts in cents.
pub struct OpenPixGateway {
    config: OpenPixConfig,
    http: PaymentHttpClient,
}

impl OpenPixGateway {
    pub fn new(config: OpenPixConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            GatewayName::OpenPix.as_str(),
            Duration::from_secs(config.timeout_secs),
            None,
        )?;
        Ok(Self { config, http })
    }

    pub fn from_gateway_config(
        config: &GatewayConfig,
        settings: &GatewaySettings,
    ) -> PaymentResult<Self> {
        Self::new(OpenPixConfig::from_gateway_config(config, settings)?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// OpenPix accepts either a tax id or an email to identify the payer.
    fn customer(request: &ChargeRequest) -> Option<JsonValue> {
        let name = sanitize_payer_name(&request.payer_name, MAX_PAYER_NAME_LEN);
        let tax_id = request
            .payer_tax_id
            .as_deref()
            .map(only_digits)
            .filter(|value| !value.is_empty());

        match (tax_id, &request.payer_email) {
            (Some(tax_id), email) => {
                let mut customer = serde_json::json!({ "name": name, "taxID": tax_id });
                if let Some(email) = email {
                    customer["email"] = JsonValue::String(email.clone());
                }
                Some(customer)
            }
            (None, Some(email)) => Some(serde_json::json!({ "name": name, "email": email })),
            (None, None) => None,
        }
    }
}

pub fn to_cents(amount: &BigDecimal) -> Option<i64> {
    (amount * BigDecimal::from(100)).with_scale(0).to_i64()
}

pub fn from_cents(cents: i64) -> BigDecimal {
    BigDecimal::from(cents) / BigDecimal::from(100)
}

#[async_trait]
impl GatewayClient for OpenPixGateway {
    async fn create_charge(&self, request: ChargeRequest) -> PaymentResult<ChargeResponse> {
        validate_amount(&request.amount)?;
        let value = to_cents(&request.amount)
            .ok_or_else(|| PaymentError::validation("amount is out of range", "amount"))?;

        let mut payload = serde_json::json!({
            "correlationID": request.correlation_id,
            "value": value,
            "comment": request
                .description
                .clone()
                .or_else(|| self.config.description.clone())
                .unwrap_or_else(|| "Pagamento via PIX".to_string()),
            "expiresIn": self.config.expiration_secs,
        });
        if let Some(customer) = Self::customer(&request) {
            payload["customer"] = customer;
        }

        let raw: OpenPixChargeEnvelope = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/api/v1/charge"),
                HttpAuth::None,
                Some(&payload),
                &[("Authorization", self.config.app_id.as_str())],
            )
            .await?;

        let charge = raw.charge;
        info!(correlation_id = %charge.correlation_id, "openpix charge created");

        Ok(ChargeResponse {
            pix_copy_paste: charge.br_code,
            qr_image: charge.qr_code_image.unwrap_or_default(),
            external_reference: charge.global_id.unwrap_or(charge.correlation_id),
        })
    }

    fn name(&self) -> &str {
        GatewayName::OpenPix.as_str()
    }
}

/// OpenPix sends every charge event to the same URL; only completions settle.
pub fn parse_webhook(body: &JsonValue) -> WebhookParse {
    let event = body.get("event").and_then(|v| v.as_str()).unwrap_or("");
    let Some(charge) = body.get("charge").filter(|c| c.is_object()) else {
        // Test deliveries from the dashboard carry no charge
        return WebhookParse::Ignored {
            status: if event.is_empty() {
                "no charge".to_string()
            } else {
                event.to_string()
            },
        };
    };
    let status = charge.get("status").and_then(|v| v.as_str()).unwrap_or("");
    if event != COMPLETED_EVENT && status != "COMPLETED" {
        let reported = if status.is_empty() { event } else { status };
        return WebhookParse::Ignored {
            status: reported.to_string(),
        };
    }

    let Some(reference) = charge
        .get("correlationID")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
    else {
        return WebhookParse::invalid("charge without correlationID");
    };
    let Some(cents) = charge.get("value").and_then(|v| v.as_i64()) else {
        return WebhookParse::invalid("charge without integer value");
    };

    WebhookParse::Settled(vec![SettlementNotice {
        reference: reference.to_string(),
        amount_paid: from_cents(cents),
        external_id: charge
            .get("globalID")
            .and_then(|v| v.as_str())
            .map(str::to_string),
    }])
}

#[derive(Debug, Deserialize)]
struct OpenPixChargeEnvelope {
    charge: OpenPixCharge,
}

#[derive(Debug, Deserialize)]
struct OpenPixCharge {
    #[serde(rename = "correlationID")]
    correlation_id: String,
    #[serde(rename = "brCode")]
    br_code: String,
    #[serde(default, rename = "qrCodeImage")]
    qr_code_image: Option<String>,
    #[serde(default, rename = "globalID")]
    global_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn config(base_url: &str) -> OpenPixConfig {
        OpenPixConfig {
            app_id: "app_test".to_string(),
            base_url: base_url.to_string(),
            expiration_secs: 900,
            description: None,
            timeout_secs: 5,
        }
    }

    #[test]
    fn cents_conversion() {
        assert_eq!(to_cents(&BigDecimal::from_str("10.50").unwrap()), Some(1050));
        assert_eq!(from_cents(2550), BigDecimal::from_str("25.50").unwrap());
    }

    #[tokio::test]
    async fn email_substitutes_for_tax_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/charge")
            .match_header("authorization", "app_test")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "correlationID": "corr-op",
                "value": 1000,
                "customer": {"name": "Ana", "email": "ana@example.com"}
            })))
            .with_status(200)
            .with_body(
                r#"{"charge":{"correlationID":"corr-op","brCode":"000201op","qrCodeImage":"https://api.openpix.com.br/qr.png","globalID":"Q2hhcmdl"},"brCode":"000201op"}"#,
            )
            .create_async()
            .await;

        let gateway = OpenPixGateway::new(config(&server.url())).unwrap();
        let response = gateway
            .create_charge(ChargeRequest {
                correlation_id: "corr-op".to_string(),
                amount: BigDecimal::from_str("10.00").unwrap(),
                payer_name: "Ana".to_string(),
                payer_tax_id: None,
                payer_email: Some("ana@example.com".to_string()),
                description: None,
            })
            .await
            .unwrap();

        assert_eq!(response.pix_copy_paste, "000201op");
        assert_eq!(response.qr_image, "https://api.openpix.com.br/qr.png");
        assert_eq!(response.external_reference, "Q2hhcmdl");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_error_is_gateway_communication() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/v1/charge")
            .with_status(503)
            .with_body("upstream unavailable")
            .create_async()
            .await;

        let gateway = OpenPixGateway::new(config(&server.url())).unwrap();
        let result = gateway
            .create_charge(ChargeRequest {
                correlation_id: "corr-op".to_string(),
                amount: BigDecimal::from(10),
                payer_name: "Ana".to_string(),
                payer_tax_id: None,
                payer_email: None,
                description: None,
            })
            .await;

        match result {
            Err(err @ PaymentError::GatewayCommunication { .. }) => {
                assert!(err.is_retryable());
                assert!(err.to_string().contains("upstream unavailable"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn completed_charge_settles_in_major_units() {
        let body = serde_json::json!({
            "event": "OPENPIX:CHARGE_COMPLETED",
            "charge": {"correlationID": "corr-op", "value": 10000, "status": "COMPLETED"}
        });

        match parse_webhook(&body) {
            WebhookParse::Settled(notices) => {
                assert_eq!(notices[0].reference, "corr-op");
                assert_eq!(notices[0].amount_paid, BigDecimal::from(100));
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn other_events_are_ignored() {
        let body = serde_json::json!({
            "event": "OPENPIX:CHARGE_CREATED",
            "charge": {"correlationID": "corr-op", "value": 100, "status": "ACTIVE"}
        });
        assert_eq!(
            parse_webhook(&body),
            WebhookParse::Ignored {
                status: "ACTIVE".to_string()
            }
        );
        assert!(matches!(
            parse_webhook(&serde_json::json!({"evento": "teste_webhook"})),
            WebhookParse::Ignored { .. }
        ));
    }
}
