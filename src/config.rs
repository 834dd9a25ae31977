//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: Option<DatabaseConfig>,
    pub logging: LoggingConfig,
    pub telegram: Option<TelegramConfig>,
    pub flows: FlowConfig,
    pub gateways: GatewaySettings,
    pub notifications: NotificationConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Externally reachable base URL, used to build gateway callback URLs
    pub public_base_url: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Telegram bot configuration
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub token: String,
    pub api_url: String,
    pub timeout_secs: u64,
}

/// Conversation flow document locations
#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub primary_path: String,
    pub campaign_path: Option<String>,
}

/// Settings shared by every gateway adapter
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub timeout_secs: u64,
    pub public_base_url: String,
    /// JSON file with gateway configurations, only read when running without a database
    pub seed_path: Option<String>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            public_base_url: "http://localhost:8000".to_string(),
            seed_path: None,
        }
    }
}

impl GatewaySettings {
    /// Callback URL a gateway should post its webhooks to
    pub fn webhook_url(&self, gateway: &str) -> String {
        format!(
            "{}/webhooks/{}",
            self.public_base_url.trim_end_matches('/'),
            gateway
        )
    }
}

/// Notification retry configuration
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub retry_interval_secs: u64,
    pub max_attempts: u32,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            retry_interval_secs: 30,
            max_attempts: 5,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        let server = ServerConfig::from_env()?;
        let skip_externals = env::var("SKIP_EXTERNALS")
            .unwrap_or_else(|_| "false".to_string())
            .eq_ignore_ascii_case("true");

        let database = if skip_externals {
            None
        } else {
            DatabaseConfig::from_env()?
        };

        Ok(AppConfig {
            gateways: GatewaySettings::from_env(&server.public_base_url)?,
            server,
            database,
            logging: LoggingConfig::from_env()?,
            telegram: if skip_externals {
                None
            } else {
                TelegramConfig::from_env()?
            },
            flows: FlowConfig::from_env(),
            notifications: NotificationConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.logging.validate()?;
        if let Some(telegram) = &self.telegram {
            telegram.validate()?;
        }
        self.gateways.validate()?;
        self.notifications.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?;

        Ok(ServerConfig {
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| format!("http://localhost:{}", port)),
            host,
            port,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        if !self.public_base_url.starts_with("http://")
            && !self.public_base_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue(
                "PUBLIC_BASE_URL must be a valid URL".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    /// Returns `None` when `DATABASE_URL` is not set; the service then runs on in-memory stores.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let url = match env::var("DATABASE_URL") {
            Ok(url) if !url.trim().is_empty() => url,
            _ => return Ok(None),
        };

        Ok(Some(DatabaseConfig {
            url,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        }))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl TelegramConfig {
    /// Returns `None` when no bot token is configured.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        let token = match env::var("TELEGRAM_BOT_TOKEN") {
            Ok(token) if !token.trim().is_empty() => token,
            _ => return Ok(None),
        };

        Ok(Some(TelegramConfig {
            token,
            api_url: env::var("TELEGRAM_API_URL")
                .unwrap_or_else(|_| "https://api.telegram.org".to_string()),
            timeout_secs: env::var("TELEGRAM_TIMEOUT_SECS")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("TELEGRAM_TIMEOUT_SECS".to_string()))?,
        }))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.token.contains(':') {
            return Err(ConfigError::InvalidValue(
                "TELEGRAM_BOT_TOKEN must look like <id>:<secret>".to_string(),
            ));
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "TELEGRAM_TIMEOUT_SECS".to_string(),
            ));
        }

        Ok(())
    }
}

impl FlowConfig {
    pub fn from_env() -> Self {
        FlowConfig {
            primary_path: env::var("FLOW_PRIMARY_PATH")
                .unwrap_or_else(|_| "data/flow.json".to_string()),
            campaign_path: Some(
                env::var("FLOW_CAMPAIGN_PATH")
                    .unwrap_or_else(|_| "data/remarketing_flow.json".to_string()),
            )
            .filter(|path| !path.trim().is_empty()),
        }
    }
}

impl GatewaySettings {
    pub fn from_env(public_base_url: &str) -> Result<Self, ConfigError> {
        Ok(GatewaySettings {
            timeout_secs: env::var("GATEWAY_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("GATEWAY_TIMEOUT_SECS".to_string()))?,
            public_base_url: public_base_url.to_string(),
            seed_path: env::var("GATEWAY_SEED_PATH").ok(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl NotificationConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(NotificationConfig {
            retry_interval_secs: env::var("NOTIFICATION_RETRY_INTERVAL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("NOTIFICATION_RETRY_INTERVAL_SECS".to_string())
                })?,
            max_attempts: env::var("NOTIFICATION_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("NOTIFICATION_MAX_ATTEMPTS".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "NOTIFICATION_RETRY_INTERVAL_SECS".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
