use crate::config::GatewaySettings;
use crate::database::models::GatewayConfig;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::GatewayClient;
use crate::payments::types::{
    amount_from_json, format_amount, validate_amount, ChargeRequest, ChargeResponse,
    GatewayName, SettlementNotice, WebhookParse,
};
use crate::payments::utils::{
    only_digits, optional_str, optional_u64, required_str, sanitize_payer_name, HttpAuth,
    PaymentHttpClient,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

const PRODUCTION_URL: &str = "https://pix.api.efipay.com.br";
const SANDBOX_URL: &str = "https://pix-h.api.efipay.com.br";
const MAX_PAYER_NAME_LEN: usize = 200;
const MAX_PAYER_REQUEST_LEN: usize = 140;
/// Tokens are refreshed this long before Efí says they expire.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct EfiConfig {
    pub client_id: String,
    pub client_secret: String,
    pub pix_key: String,
    /// PEM file holding the client certificate and its private key
    pub certificate_path: Option<String>,
    pub default_payer_tax_id: Option<String>,
    pub default_payer_name: Option<String>,
    pub base_url: String,
    pub expiration_secs: u64,
    pub description: Option<String>,
    pub timeout_secs: u64,
}

impl EfiConfig {
    pub fn from_gateway_config(
        config: &GatewayConfig,
        settings: &GatewaySettings,
    ) -> PaymentResult<Self> {
        let name = GatewayName::Efi.as_str();
        let credentials = &config.credentials;
        let operational = &config.operational_config;

        Ok(Self {
            client_id: required_str(credentials, "client_id", name)?,
            client_secret: required_str(credentials, "client_secret", name)?,
            pix_key: required_str(credentials, "pix_key", name)?,
            certificate_path: optional_str(credentials, "certificate_path"),
            default_payer_tax_id: optional_str(credentials, "default_payer_tax_id"),
            default_payer_name: optional_str(credentials, "default_payer_name"),
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

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Efí (formerly Gerencianet) PIX API: OAuth client credentials over mutual TLS.
pub struct EfiGateway {
    config: EfiConfig,
    http: PaymentHttpClient,
    token: Mutex<Option<CachedToken>>,
}

impl EfiGateway {
    pub fn new(config: EfiConfig) -> PaymentResult<Self> {
        let identity = match &config.certificate_path {
            Some(path) => {
                let pem = std::fs::read(path).map_err(|e| {
                    PaymentError::configuration(
                        GatewayName::Efi.as_str(),
                        format!("cannot read certificate {}: {}", path, e),
                    )
                })?;
                Some(reqwest::Identity::from_pem(&pem).map_err(|e| {
                    PaymentError::configuration(
                        GatewayName::Efi.as_str(),
                        format!("invalid certificate {}: {}", path, e),
                    )
                })?)
            }
            None => {
                warn!("efi gateway configured without a client certificate");
                None
            }
        };

        let http = PaymentHttpClient::new(
            GatewayName::Efi.as_str(),
            Duration::from_secs(config.timeout_secs),
            identity,
        )?;
        Ok(Self {
            config,
            http,
            token: Mutex::new(None),
        })
    }

    pub fn from_gateway_config(
        config: &GatewayConfig,
        settings: &GatewaySettings,
    ) -> PaymentResult<Self> {
        Self::new(EfiConfig::from_gateway_config(config, settings)?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn access_token(&self) -> PaymentResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.access_token.clone());
            }
        }

        let raw: EfiTokenResponse = self
            .http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/oauth/token"),
                HttpAuth::Basic {
                    username: &self.config.client_id,
                    password: &self.config.client_secret,
                },
                Some(&serde_json::json!({ "grant_type": "client_credentials" })),
                &[],
            )
            .await?;

        let lifetime = Duration::from_secs(raw.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            access_token: raw.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });

        Ok(raw.access_token)
    }

    /// Efí refuses charges without a CPF (11 digits) or CNPJ (14 digits).
    fn debtor(&self, request: &ChargeRequest) -> PaymentResult<JsonValue> {
        let tax_id = request
            .payer_tax_id
            .clone()
            .or_else(|| self.config.default_payer_tax_id.clone())
            .map(|value| only_digits(&value))
            .unwrap_or_default();

        let mut name = sanitize_payer_name(&request.payer_name, MAX_PAYER_NAME_LEN);
        if name.is_empty() {
            name = self
                .config
                .default_payer_name
                .as_deref()
                .map(|n| sanitize_payer_name(n, MAX_PAYER_NAME_LEN))
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "Cliente".to_string());
        }

        match tax_id.len() {
            11 => Ok(serde_json::json!({ "cpf": tax_id, "nome": name })),
            14 => Ok(serde_json::json!({ "cnpj": tax_id, "nome": name })),
            _ => Err(PaymentError::validation(
                "efi requires a payer CPF (11 digits) or CNPJ (14 digits)",
                "payer_tax_id",
            )),
        }
    }
}

#[async_trait]
impl GatewayClient for EfiGateway {
    async fn create_charge(&self, request: ChargeRequest) -> PaymentResult<ChargeResponse> {
        validate_amount(&request.amount)?;
        let devedor = self.debtor(&request)?;
        let token = self.access_token().await?;

        let solicitacao: String = request
            .description
            .clone()
            .or_else(|| self.config.description.clone())
            .unwrap_or_else(|| "Pagamento via PIX".to_string())
            .chars()
            .take(MAX_PAYER_REQUEST_LEN)
            .collect();

        let payload = serde_json::json!({
            "calendario": { "expiracao": self.config.expiration_secs },
            "devedor": devedor,
            "valor": { "original": format_amount(&request.amount) },
            "chave": self.config.pix_key,
            "solicitacaoPagador": solicitacao,
        });

        let charge: EfiChargeResponse = self
            .http
            .request_json(
                reqwest::Method::PUT,
                &self.endpoint(&format!("/v2/cob/{}", request.correlation_id)),
                HttpAuth::Bearer(&token),
                Some(&payload),
                &[],
            )
            .await?;

        let qr: EfiQrCodeResponse = self
            .http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/v2/loc/{}/qrcode", charge.loc.id)),
                HttpAuth::Bearer(&token),
                None,
                &[],
            )
            .await?;

        info!(txid = %charge.txid, loc_id = charge.loc.id, "efi charge created");

        Ok(ChargeResponse {
            pix_copy_paste: charge.pix_copia_e_cola.unwrap_or(qr.qrcode),
            qr_image: qr.imagem_qrcode,
            external_reference: charge.txid,
        })
    }

    async fn register_webhook(&self, url: &str) -> PaymentResult<()> {
        let token = self.access_token().await?;
        let _: JsonValue = self
            .http
            .request_json(
                reqwest::Method::PUT,
                &self.endpoint(&format!("/v2/webhook/{}", self.config.pix_key)),
                HttpAuth::Bearer(&token),
                Some(&serde_json::json!({ "webhookUrl": url })),
                // Lets Efí deliver to endpoints behind proxies that terminate TLS
                &[("x-skip-mtls-checking", "true")],
            )
            .await?;

        info!(webhook_url = %url, "efi webhook registered");
        Ok(())
    }

    fn name(&self) -> &str {
        GatewayName::Efi.as_str()
    }
}

/// Efí posts `{"pix": [...]}`; every entry is a received payment.
///
/// A body without entries is the probe Efí sends when a webhook is registered.
/// Malformed entries are skipped so the rest of the batch still settles.
pub fn parse_webhook(body: &JsonValue) -> WebhookParse {
    let entries = match body.get("pix").and_then(|v| v.as_array()) {
        Some(entries) if !entries.is_empty() => entries,
        _ => {
            return WebhookParse::Ignored {
                status: "no pix entries".to_string(),
            }
        }
    };

    let mut notices = Vec::with_capacity(entries.len());
    let mut rejected = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        match parse_entry(entry) {
            Ok(notice) => notices.push(notice),
            Err(reason) => {
                warn!(entry = index, reason = %reason, "skipping malformed efi pix entry");
                rejected.push(reason);
            }
        }
    }

    match (notices.is_empty(), rejected.is_empty()) {
        (true, _) => WebhookParse::invalid(rejected.join("; ")),
        (false, true) => WebhookParse::Settled(notices),
        (false, false) => WebhookParse::PartlySettled { notices, rejected },
    }
}

fn parse_entry(entry: &JsonValue) -> Result<SettlementNotice, String> {
    let txid = entry
        .get("txid")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| "pix entry without txid".to_string())?;
    let amount_paid = entry
        .get("valor")
        .and_then(amount_from_json)
        .ok_or_else(|| format!("pix entry {} without a valid valor", txid))?;

    Ok(SettlementNotice {
        reference: txid.to_string(),
        amount_paid,
        external_id: entry
            .get("endToEndId")
            .and_then(|v| v.as_str())
            .map(str::to_string),
    })
}

#[derive(Debug, Deserialize)]
struct EfiTokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct EfiLocation {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct EfiChargeResponse {
    txid: String,
    loc: EfiLocation,
    #[serde(default, rename = "pixCopiaECola")]
    pix_copia_e_cola: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EfiQrCodeResponse {
    qrcode: String,
    #[serde(rename = "imagemQrcode")]
    imagem_qrcode: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    fn config(base_url: &str) -> EfiConfig {
        EfiConfig {
            client_id: "Client_Id_test".to_string(),
            client_secret: "Client_Secret_test".to_string(),
            pix_key: "pix@example.com".to_string(),
            certificate_path: None,
            default_payer_tax_id: None,
            default_payer_name: None,
            base_url: base_url.to_string(),
            expiration_secs: 3600,
            description: None,
            timeout_secs: 5,
        }
    }

    fn request(tax_id: Option<&str>) -> ChargeRequest {
        ChargeRequest {
            correlation_id: "a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4".to_string(),
            amount: BigDecimal::from_str("10.00").unwrap(),
            payer_name: "𝐌𝐚𝐫𝐢𝐚 Souza".to_string(),
            payer_tax_id: tax_id.map(str::to_string),
            payer_email: None,
            description: None,
        }
    }

    #[tokio::test]
    async fn creates_charge_with_cached_token() {
        let mut server = mockito::Server::new_async().await;
        let token = server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body(r#"{"access_token":"tok","token_type":"Bearer","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;
        let cob = server
            .mock("PUT", "/v2/cob/a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4")
            .match_header("authorization", "Bearer tok")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "devedor": {"cpf": "12345678909", "nome": "Maria Souza"},
                "valor": {"original": "10.00"},
                "chave": "pix@example.com"
            })))
            .with_status(201)
            .with_body(r#"{"txid":"a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4","loc":{"id":42},"status":"ATIVA"}"#)
            .expect(2)
            .create_async()
            .await;
        let _qr = server
            .mock("GET", "/v2/loc/42/qrcode")
            .with_status(200)
            .with_body(r#"{"qrcode":"00020101021226","imagemQrcode":"data:image/png;base64,AAA"}"#)
            .create_async()
            .await;

        let gateway = EfiGateway::new(config(&server.url())).unwrap();
        let response = gateway
            .create_charge(request(Some("123.456.789-09")))
            .await
            .unwrap();
        gateway
            .create_charge(request(Some("123.456.789-09")))
            .await
            .unwrap();

        assert_eq!(response.pix_copy_paste, "00020101021226");
        assert_eq!(response.qr_image, "data:image/png;base64,AAA");
        assert_eq!(response.external_reference, "a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4");
        token.assert_async().await;
        cob.assert_async().await;
    }

    #[tokio::test]
    async fn missing_tax_id_is_rejected_before_any_call() {
        let gateway = EfiGateway::new(config("http://127.0.0.1:9")).unwrap();
        let result = gateway.create_charge(request(None)).await;

        assert!(matches!(result, Err(PaymentError::Validation { .. })));
    }

    #[tokio::test]
    async fn provider_error_body_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        let _token = server
            .mock("POST", "/oauth/token")
            .with_status(401)
            .with_body(r#"{"error":"invalid_client"}"#)
            .create_async()
            .await;

        let gateway = EfiGateway::new(config(&server.url())).unwrap();
        let result = gateway.create_charge(request(Some("12345678909"))).await;

        match result {
            Err(PaymentError::GatewayCommunication { message, status, .. }) => {
                assert_eq!(status, Some(401));
                assert!(message.contains("invalid_client"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn registers_webhook_for_pix_key() {
        let mut server = mockito::Server::new_async().await;
        let _token = server
            .mock("POST", "/oauth/token")
            .with_status(200)
            .with_body(r#"{"access_token":"tok","expires_in":3600}"#)
            .create_async()
            .await;
        let webhook = server
            .mock("PUT", "/v2/webhook/pix@example.com")
            .match_header("x-skip-mtls-checking", "true")
            .match_body(mockito::Matcher::Json(serde_json::json!({
                "webhookUrl": "https://pay.example.com/webhooks/efi"
            })))
            .with_status(200)
            .with_body(r#"{"webhookUrl":"https://pay.example.com/webhooks/efi"}"#)
            .create_async()
            .await;

        let gateway = EfiGateway::new(config(&server.url())).unwrap();
        gateway
            .register_webhook("https://pay.example.com/webhooks/efi")
            .await
            .unwrap();

        webhook.assert_async().await;
    }

    #[test]
    fn webhook_entries_become_settlements() {
        let body = serde_json::json!({
            "pix": [
                {"endToEndId": "E1", "txid": "abc", "valor": "10.00", "horario": "2024-01-01T10:00:00Z"},
                {"endToEndId": "E2", "txid": "def", "valor": "5.50"}
            ]
        });

        match parse_webhook(&body) {
            WebhookParse::Settled(notices) => {
                assert_eq!(notices.len(), 2);
                assert_eq!(notices[0].reference, "abc");
                assert_eq!(notices[1].amount_paid, BigDecimal::from_str("5.50").unwrap());
                assert_eq!(notices[0].external_id.as_deref(), Some("E1"));
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn registration_probe_is_ignored() {
        assert!(matches!(
            parse_webhook(&serde_json::json!({"evento": "teste_webhook"})),
            WebhookParse::Ignored { .. }
        ));
        assert!(matches!(
            parse_webhook(&serde_json::json!({"pix": [{"valor": "1.00"}]})),
            WebhookParse::Invalid { .. }
        ));
    }

    #[test]
    fn malformed_entry_does_not_hide_its_siblings() {
        let body = serde_json::json!({
            "pix": [
                {"endToEndId": "E1", "txid": "abc", "valor": "10.00"},
                {"valor": "5.00"},
                {"txid": "ghi", "valor": "not money"}
            ]
        });

        match parse_webhook(&body) {
            WebhookParse::PartlySettled { notices, rejected } => {
                assert_eq!(notices.len(), 1);
                assert_eq!(notices[0].reference, "abc");
                assert_eq!(rejected.len(), 2);
                assert!(rejected[1].contains("ghi"));
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }
}
