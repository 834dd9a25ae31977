use crate::payments::error::PaymentError;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Gateways with a built-in adapter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GatewayName {
    Efi,
    SuitPay,
    OpenPix,
}

impl GatewayName {
    pub const ALL: [GatewayName; 3] = [GatewayName::Efi, GatewayName::SuitPay, GatewayName::OpenPix];

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayName::Efi => "efi",
            GatewayName::SuitPay => "suitpay",
            GatewayName::OpenPix => "openpix",
        }
    }
}

impl std::fmt::Display for GatewayName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GatewayName {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "efi" | "efipay" | "gerencianet" => Ok(GatewayName::Efi),
            "suitpay" => Ok(GatewayName::SuitPay),
            "openpix" | "woovi" => Ok(GatewayName::OpenPix),
            _ => Err(PaymentError::UnsupportedGateway {
                name: value.to_string(),
            }),
        }
    }
}

/// Gateway-agnostic charge request. `amount` is always in major units (BRL).
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub correlation_id: String,
    pub amount: BigDecimal,
    pub payer_name: String,
    pub payer_tax_id: Option<String>,
    pub payer_email: Option<String>,
    pub description: Option<String>,
}

/// Normalized reply of a successful remote charge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChargeResponse {
    pub pix_copy_paste: String,
    /// URL or base64 PNG, depending on the gateway
    pub qr_image: String,
    pub external_reference: String,
}

/// One settled payment extracted from a webhook body.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementNotice {
    /// Value to look up among pending transactions' extra data
    pub reference: String,
    /// Paid amount in major units, as reported by the gateway
    pub amount_paid: BigDecimal,
    pub external_id: Option<String>,
}

/// Result of parsing a gateway webhook body.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookParse {
    Settled(Vec<SettlementNotice>),
    /// A batch where some entries were unusable; the rest still settle
    PartlySettled {
        notices: Vec<SettlementNotice>,
        rejected: Vec<String>,
    },
    /// Well-formed but not a final settlement
    Ignored { status: String },
    Invalid { reason: String },
}

impl WebhookParse {
    pub fn invalid(reason: impl Into<String>) -> Self {
        WebhookParse::Invalid {
            reason: reason.into(),
        }
    }
}

/// Validate a charge amount: strictly positive with at most two decimal places.
pub fn validate_amount(amount: &BigDecimal) -> Result<(), PaymentError> {
    if *amount <= BigDecimal::from(0) {
        return Err(PaymentError::validation(
            "amount must be greater than zero",
            "amount",
        ));
    }
    if amount.with_scale(2) != *amount {
        return Err(PaymentError::validation(
            "amount must have at most two decimal places",
            "amount",
        ));
    }
    Ok(())
}

/// Render an amount with exactly two decimals, as PIX gateways expect.
pub fn format_amount(amount: &BigDecimal) -> String {
    amount.with_scale(2).to_string()
}

/// Parse an amount that may arrive as a JSON number or string.
pub fn amount_from_json(value: &serde_json::Value) -> Option<BigDecimal> {
    match value {
        serde_json::Value::Number(n) => BigDecimal::from_str(&n.to_string()).ok(),
        serde_json::Value::String(s) => BigDecimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_aliases_resolve_to_adapters() {
        assert_eq!(GatewayName::from_str("Gerencianet").ok(), Some(GatewayName::Efi));
        assert_eq!(GatewayName::from_str("woovi").ok(), Some(GatewayName::OpenPix));
        assert!(matches!(
            GatewayName::from_str("stripe"),
            Err(PaymentError::UnsupportedGateway { .. })
        ));
    }

    #[test]
    fn amount_validation_rejects_zero_and_sub_cent_values() {
        assert!(validate_amount(&BigDecimal::from_str("10.00").unwrap()).is_ok());
        assert!(validate_amount(&BigDecimal::from(0)).is_err());
        assert!(validate_amount(&BigDecimal::from_str("-1").unwrap()).is_err());
        assert!(validate_amount(&BigDecimal::from_str("1.005").unwrap()).is_err());
    }

    #[test]
    fn amounts_are_formatted_with_two_decimals() {
        assert_eq!(format_amount(&BigDecimal::from(25)), "25.00");
        assert_eq!(format_amount(&BigDecimal::from_str("25.5").unwrap()), "25.50");
    }

    #[test]
    fn json_amounts_accept_numbers_and_strings() {
        assert_eq!(
            amount_from_json(&serde_json::json!(10.5)),
            BigDecimal::from_str("10.5").ok()
        );
        assert_eq!(
            amount_from_json(&serde_json::json!("10.00")),
            BigDecimal::from_str("10.00").ok()
        );
        assert_eq!(amount_from_json(&serde_json::json!(null)), None);
    }
}
