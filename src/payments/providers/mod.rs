pub mod efi;
pub mod openpix;
pub mod suitpay;

pub use efi::{EfiConfig, EfiGateway};
pub use openpix::{OpenPixConfig, OpenPixGateway};
pub use suitpay::{SuitPayConfig, SuitPayGateway};
