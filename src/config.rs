//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use crate::payments::signer::HashSecret;
use chrono::{Duration, FixedOffset};
use std::env;

/// Upper bound for the payment window, one week.
pub const MAX_EXPIRE_MINUTES: i64 = 7 * 24 * 60;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub gateway: GatewayConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Run without Postgres, on the in-memory ledger
    pub skip_externals: bool,
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

/// Payment gateway settings. The hash secret lives only here and in the signer built from it.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub merchant_code: String,
    pub hash_secret: HashSecret,
    pub pay_url: String,
    pub return_url: String,
    pub version: String,
    pub command: String,
    pub currency: String,
    pub locale: String,
    pub order_type: String,
    pub order_id_prefix: String,
    pub expire_minutes: i64,
    pub utc_offset_hours: i32,
    pub min_amount: i64,
    pub max_amount: i64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            merchant_code: String::new(),
            hash_secret: HashSecret::new(""),
            pay_url: "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".to_string(),
            return_url: "http://localhost:8000/api/payments/return".to_string(),
            version: "2.1.0".to_string(),
            command: "pay".to_string(),
            currency: "VND".to_string(),
            locale: "vn".to_string(),
            order_type: "other".to_string(),
            order_id_prefix: "PAY".to_string(),
            expire_minutes: 15,
            utc_offset_hours: 7,
            min_amount: 5_000,
            max_amount: 500_000_000,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        let server = ServerConfig::from_env()?;
        let database = if server.skip_externals {
            DatabaseConfig::from_env().unwrap_or_else(|_| DatabaseConfig::unused())
        } else {
            DatabaseConfig::from_env()?
        };

        Ok(AppConfig {
            server,
            database,
            logging: LoggingConfig::from_env()?,
            gateway: GatewayConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if !self.server.skip_externals {
            self.database.validate()?;
        }
        self.logging.validate()?;
        self.gateway.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
            skip_externals: env::var("SKIP_EXTERNALS")
                .unwrap_or_else(|_| "false".to_string())
                .to_lowercase()
                == "true",
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

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
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
        })
    }

    fn unused() -> Self {
        DatabaseConfig {
            url: String::new(),
            max_connections: 1,
            min_connections: 0,
            connection_timeout: 30,
            idle_timeout: None,
        }
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

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = GatewayConfig::default();

        Ok(GatewayConfig {
            merchant_code: env::var("VNPAY_TMN_CODE")
                .map_err(|_| ConfigError::MissingVariable("VNPAY_TMN_CODE".to_string()))?,
            hash_secret: HashSecret::new(
                env::var("VNPAY_HASH_SECRET")
                    .map_err(|_| ConfigError::MissingVariable("VNPAY_HASH_SECRET".to_string()))?,
            ),
            pay_url: env::var("VNPAY_PAY_URL").unwrap_or(defaults.pay_url),
            return_url: env::var("VNPAY_RETURN_URL").unwrap_or(defaults.return_url),
            version: env::var("VNPAY_VERSION").unwrap_or(defaults.version),
            command: defaults.command,
            currency: env::var("VNPAY_CURRENCY").unwrap_or(defaults.currency),
            locale: env::var("VNPAY_LOCALE").unwrap_or(defaults.locale),
            order_type: env::var("VNPAY_ORDER_TYPE").unwrap_or(defaults.order_type),
            order_id_prefix: env::var("PAYMENT_ORDER_PREFIX").unwrap_or(defaults.order_id_prefix),
            expire_minutes: env::var("PAYMENT_EXPIRE_MINUTES")
                .unwrap_or_else(|_| defaults.expire_minutes.to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PAYMENT_EXPIRE_MINUTES".to_string()))?,
            utc_offset_hours: env::var("VNPAY_UTC_OFFSET_HOURS")
                .unwrap_or_else(|_| defaults.utc_offset_hours.to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("VNPAY_UTC_OFFSET_HOURS".to_string()))?,
            min_amount: defaults.min_amount,
            max_amount: defaults.max_amount,
        })
    }

    /// Timezone the gateway renders `yyyyMMddHHmmss` timestamps in.
    pub fn timezone(&self) -> Result<FixedOffset, ConfigError> {
        self.utc_offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| ConfigError::InvalidValue("VNPAY_UTC_OFFSET_HOURS".to_string()))
    }

    /// How long a new order stays payable.
    pub fn expire_window(&self) -> Result<Duration, ConfigError> {
        if !(1..=MAX_EXPIRE_MINUTES).contains(&self.expire_minutes) {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_EXPIRE_MINUTES".to_string(),
            ));
        }
        Ok(Duration::minutes(self.expire_minutes))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.merchant_code.trim().is_empty() {
            return Err(ConfigError::InvalidValue("VNPAY_TMN_CODE".to_string()));
        }

        if self.hash_secret.is_empty() {
            return Err(ConfigError::InvalidValue("VNPAY_HASH_SECRET".to_string()));
        }

        for (name, url) in [
            ("VNPAY_PAY_URL", &self.pay_url),
            ("VNPAY_RETURN_URL", &self.return_url),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::InvalidValue(format!(
                    "{} must be a valid URL",
                    name
                )));
            }
        }

        self.expire_window()?;

        if self.min_amount <= 0 || self.min_amount > self.max_amount {
            return Err(ConfigError::ValidationFailed(
                "payment amount bounds are inconsistent".to_string(),
            ));
        }

        self.timezone()?;

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
