use crate::config::GatewaySettings;
use crate::database::models::GatewayConfig;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::GatewayClient;
use crate::payments::types::{
    amount_from_json, validate_amount, ChargeRequest, ChargeResponse, GatewayName,
    SettlementNotice, WebhookParse,
};
use crate::payments::utils::{
    only_digits, optional_str, optional_u64, required_str, sanitize_payer_name, HttpAuth,
    PaymentHttpClient,
};
use async_trait::async_trait;
use bigdecimal::ToPrimitive;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

const PRODUCTION_URL: &str = "https://ws.suitpay.app";
const SANDBOX_URL: &str = "https://sandbox.ws.suitpay.app";
const MAX_PAYER_NAME_LEN: usize = 100;
const SETTLED_STATUS: &str = "PAID_OUT";

#[derive(Debug, Clone)]
pub struct SuitPayConfig {
    pub client_id: String,
    pub client_secret: String,
    pub default_payer_tax_id: Option<String>,
    pub base_url: String,
    pub due_days: i64,
    pub callback_url: String,
    pub timeout_secs: u64,
}

impl SuitPayConfig {
    pub fn from_gateway_config(
        config: &GatewayConfig,
        settings: &GatewaySettings,
    ) -> PaymentResult<Self> {
        let name = GatewayName::SuitPay.as_str();
        let credentials = &config.credentials;
        let operational = &config.operational_config;

        Ok(Self {
            client_id: required_str(credentials, "client_id", name)?,
            client_secret: required_str(credentials, "client_secret", name)?,
            default_payer_tax_id: optional_str(credentials, "default_payer_tax_id"),
            base_url: optional_str(operational, "base_url").unwrap_or_else(|| {
                if config.is_sandbox {
                    SANDBOX_URL.to_string()
                } else {
                    PRODUCTION_URL.to_string()
                }
            }),
            due_days: optional_u64(operational, "due_days").unwrap_or(1) as i64,
            callback_url: settings.webhook_url(name),
            timeout_secs: settings.timeout_secs,
        })
    }
}

/// SuitPay gateway: static `ci`/`cs` headers, amounts in major units.
pub struct SuitPayGateway {
    config: SuitPayConfig,
    http: PaymentHttpClient,
}

impl SuitPayGateway {
    pub fn new(config: SuitPayConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            GatewayName::SuitPay.as_str(),
            Duration::from_secs(config.timeout_secs),
            None,
        )?;
        Ok(Self { config, http })
    }

    pub fn from_gateway_config(
        config: &GatewayConfig,
        settings: &GatewaySettings,
    ) -> PaymentResult<Self> {
        Self::new(SuitPayConfig::from_gateway_config(config, settings)?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl GatewayClient for SuitPayGateway {
    async fn create_charge(&self, request: ChargeRequest) -> PaymentResult<ChargeResponse> {
        validate_amount(&request.amount)?;
        let amount = request.amount.to_f64().ok_or_else(|| {
            PaymentError::validation("amount is out of range", "amount")
        })?;

        let mut client = serde_json::json!({
            "name": sanitize_payer_name(&request.payer_name, MAX_PAYER_NAME_LEN),
        });
        if let Some(document) = request
            .payer_tax_id
            .clone()
            .or_else(|| self.config.default_payer_tax_id.clone())
            .map(|value| only_digits(&value))
            .filter(|value| !value.is_empty())
        {
            client["document"] = JsonValue::String(document);
        }
        if let Some(email) = &request.payer_email {
            client["email"] = JsonValue::String(email.clone());
        }

        let due_date = (Utc::now() + ChronoDuration::days(self.config.due_days))
            .format("%Y-%m-%d")
            .to_string();
        let payload = serde_json::json!({
            "requestNumber": request.correlation_id,
            "dueDate": due_date,
            "amount": amount,
            "callbackUrl": self.config.callback_url,
            "client": client,
        });

        let raw: JsonValue = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/api/v1/gateway/request-qrcode"),
                HttpAuth::None,
                Some(&payload),
                &[
                    ("ci", self.config.client_id.as_str()),
                    ("cs", self.config.client_secret.as_str()),
                ],
            )
            .await?;

        // SuitPay reports business failures with a 200 and a non-OK `response`
        let reply: SuitPayChargeResponse =
            serde_json::from_value(raw.clone()).map_err(|e| PaymentError::GatewayCommunication {
                gateway: GatewayName::SuitPay.as_str().to_string(),
                message: format!("unexpected response: {}; body: {}", e, raw),
                status: Some(200),
            })?;
        if reply.response.as_deref() != Some("OK") {
            return Err(PaymentError::GatewayCommunication {
                gateway: GatewayName::SuitPay.as_str().to_string(),
                message: format!("charge refused: {}", raw),
                status: Some(200),
            });
        }

        let (Some(id), Some(code)) = (reply.id_transaction, reply.payment_code) else {
            return Err(PaymentError::GatewayCommunication {
                gateway: GatewayName::SuitPay.as_str().to_string(),
                message: format!("charge response without payment code: {}", raw),
                status: Some(200),
            });
        };

        info!(request_number = %request.correlation_id, id_transaction = %id, "suitpay charge created");

        Ok(ChargeResponse {
            pix_copy_paste: code,
            qr_image: reply.payment_code_base64.unwrap_or_default(),
            external_reference: id,
        })
    }

    fn name(&self) -> &str {
        GatewayName::SuitPay.as_str()
    }
}

/// SuitPay callbacks carry the charge state in `statusTransaction`.
pub fn parse_webhook(body: &JsonValue) -> WebhookParse {
    let Some(status) = body.get("statusTransaction").and_then(|v| v.as_str()) else {
        return WebhookParse::invalid("missing statusTransaction");
    };
    if status != SETTLED_STATUS {
        return WebhookParse::Ignored {
            status: status.to_string(),
        };
    }

    let id_transaction = body
        .get("idTransaction")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty());
    let Some(reference) = body
        .get("requestNumber")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .or(id_transaction)
    else {
        return WebhookParse::invalid("missing requestNumber and idTransaction");
    };
    let Some(amount_paid) = body.get("value").and_then(amount_from_json) else {
        return WebhookParse::invalid("missing or invalid value");
    };

    WebhookParse::Settled(vec![SettlementNotice {
        reference: reference.to_string(),
        amount_paid,
        external_id: id_transaction.map(str::to_string),
    }])
}

#[derive(Debug, Deserialize)]
struct SuitPayChargeResponse {
    #[serde(default, rename = "idTransaction")]
    id_transaction: Option<String>,
    #[serde(default, rename = "paymentCode")]
    payment_code: Option<String>,
    #[serde(default, rename = "paymentCodeBase64")]
    payment_code_base64: Option<String>,
    #[serde(default)]
    response: Option<String>,
}
