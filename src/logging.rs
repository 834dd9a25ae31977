//! Tracing initialisation and log-safe formatting helpers.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_lowercase()));

    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_current_span(false);
            let _ = registry.with(layer).try_init();
        }
        LogFormat::Plain => {
            let layer = fmt::layer().with_target(false).with_ansi(true);
            let _ = registry.with(layer).try_init();
        }
    }
}

/// Mask a CPF/CNPJ so only the last two digits are visible.
pub fn mask_tax_id(tax_id: &str) -> String {
    let digits: Vec<char> = tax_id.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() <= 2 {
        return "*".repeat(digits.len());
    }
    let visible: String = digits[digits.len() - 2..].iter().collect();
    format!("{}{}", "*".repeat(digits.len() - 2), visible)
}

/// Mask a credential, keeping a short prefix for identification.
pub fn mask_secret(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 8 {
        return "****".to_string();
    }
    format!("{}****", prefix)
}
