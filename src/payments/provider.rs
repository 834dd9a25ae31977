use crate::payments::error::PaymentResult;
use crate::payments::types::{ChargeRequest, ChargeResponse};
use async_trait::async_trait;

/// A PIX gateway adapter.
///
/// The registry keeps one adapter per stored configuration and replaces it
/// when that configuration changes, so adapters may cache things like tokens.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Create a remote charge. Every failure, including non-2xx replies and
    /// timeouts, is a `PaymentError::GatewayCommunication` carrying the body.
    async fn create_charge(&self, request: ChargeRequest) -> PaymentResult<ChargeResponse>;

    /// Register `url` as the gateway's webhook target, for gateways that need it.
    async fn register_webhook(&self, _url: &str) -> PaymentResult<()> {
        Ok(())
    }

    fn name(&self) -> &str;
}
