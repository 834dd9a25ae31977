//! PIX gateway integrations.
//!
//! Each gateway implements [`provider::GatewayClient`] and a webhook parser;
//! [`factory::GatewayRegistry`] picks the active gateway and builds its client.

pub mod error;
pub mod factory;
pub mod provider;
pub mod providers;
pub mod types;
pub mod utils;
pub mod webhook;

pub use error::{PaymentError, PaymentResult};
pub use factory::GatewayRegistry;
pub use provider::GatewayClient;
pub use types::{ChargeRequest, ChargeResponse, GatewayName, SettlementNotice, WebhookParse};
