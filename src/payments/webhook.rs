use crate::payments::providers::{efi, openpix, suitpay};
use crate::payments::types::{GatewayName, WebhookParse};
use serde_json::Value as JsonValue;

/// Parse a raw webhook body with the parser of the gateway that sent it.
///
/// Never fails: unparseable bodies become [`WebhookParse::Invalid`].
pub fn parse_gateway_webhook(gateway: GatewayName, body: &[u8]) -> WebhookParse {
    let json: JsonValue = match serde_json::from_slice(body) {
        Ok(json) => json,
        Err(e) => return WebhookParse::invalid(format!("body is not valid JSON: {}", e)),
    };
    if !json.is_object() {
        return WebhookParse::invalid("body is not a JSON object");
    }

    match gateway {
        GatewayName::Efi => efi::parse_webhook(&json),
        GatewayName::SuitPay => suitpay::parse_webhook(&json),
        GatewayName::OpenPix => openpix::parse_webhook(&json),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_bodies_are_invalid_not_errors() {
        for gateway in GatewayName::ALL {
            assert!(matches!(
                parse_gateway_webhook(gateway, b"not json"),
                WebhookParse::Invalid { .. }
            ));
            assert!(matches!(
                parse_gateway_webhook(gateway, b"[1,2,3]"),
                WebhookParse::Invalid { .. }
            ));
        }
    }

    #[test]
    fn dispatches_to_gateway_parser() {
        let body = br#"{"statusTransaction":"CANCELED","requestNumber":"x"}"#;
        assert_eq!(
            parse_gateway_webhook(GatewayName::SuitPay, body),
            WebhookParse::Ignored {
                status: "CANCELED".to_string()
            }
        );
    }
}
