use std::env;

// ============================================================================
// Configuration - environment-sourced settings
// ============================================================================
//
// Read once at startup. `main` loads a `.env` file (dotenvy) before calling
// `ServiceConfig::from_env`, so both real env vars and `.env` entries work.
//
// ============================================================================

const DEFAULT_BROKERS: &str = "localhost:9092";
const DEFAULT_CLIENT_ID: &str = "enterprise-app";
const DEFAULT_METRICS_PORT: u16 = 9090;
const DEFAULT_SERVICE_NAME: &str = "boomcard-events";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// SASL/PLAIN credentials
#[derive(Clone, PartialEq, Eq)]
pub struct SaslCredentials {
    pub username: String,
    pub password: String,
}

// Keep the password out of logs.
impl std::fmt::Debug for SaslCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaslCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Broker connection settings. No other transport tuning is exposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaConfig {
    pub brokers: Vec<String>,
    pub client_id: String,
    pub ssl: bool,
    pub sasl: Option<SaslCredentials>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: vec![DEFAULT_BROKERS.to_string()],
            client_id: DEFAULT_CLIENT_ID.to_string(),
            ssl: false,
            sasl: None,
        }
    }
}

impl KafkaConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let brokers = parse_brokers(
            &env::var("KAFKA_BROKERS").unwrap_or_else(|_| DEFAULT_BROKERS.to_string()),
        )?;

        let client_id = env::var("KAFKA_CLIENT_ID")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string());

        let ssl = match env::var("KAFKA_SSL") {
            Ok(raw) => parse_bool("KAFKA_SSL", &raw)?,
            Err(_) => false,
        };

        let sasl = env::var("KAFKA_SASL_USERNAME")
            .ok()
            .filter(|u| !u.is_empty())
            .map(|username| SaslCredentials {
                username,
                password: env::var("KAFKA_SASL_PASSWORD").unwrap_or_default(),
            });

        Ok(Self {
            brokers,
            client_id,
            ssl,
            sasl,
        })
    }

    /// librdkafka `security.protocol` for this (ssl, sasl) combination
    pub fn security_protocol(&self) -> &'static str {
        match (self.ssl, self.sasl.is_some()) {
            (false, false) => "plaintext",
            (true, false) => "ssl",
            (false, true) => "sasl_plaintext",
            (true, true) => "sasl_ssl",
        }
    }

    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }
}

/// Process-level settings for the publisher binary
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub service_name: String,
    pub kafka: KafkaConfig,
    pub database_url: Option<String>,
    pub metrics_port: u16,
    /// Insert and announce one `auth` row at boot. Off unless `STARTUP_CHECK` is set,
    /// since the row is committed to the real table.
    pub startup_check: bool,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let kafka = KafkaConfig::from_env()?;

        let service_name = env::var("SERVICE_NAME")
            .unwrap_or_else(|_| DEFAULT_SERVICE_NAME.to_string());

        let database_url = env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());

        let metrics_port = match env::var("METRICS_PORT") {
            Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: "METRICS_PORT",
                reason: format!("'{}' is not a valid port", raw),
            })?,
            Err(_) => DEFAULT_METRICS_PORT,
        };

        let startup_check = match env::var("STARTUP_CHECK") {
            Ok(raw) => parse_bool("STARTUP_CHECK", &raw)?,
            Err(_) => false,
        };

        Ok(Self {
            service_name,
            kafka,
            database_url,
            metrics_port,
            startup_check,
        })
    }
}

fn parse_brokers(raw: &str) -> Result<Vec<String>, ConfigError> {
    let brokers: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string)
        .collect();

    if brokers.is_empty() {
        return Err(ConfigError::Invalid {
            key: "KAFKA_BROKERS",
            reason: "no broker addresses given".to_string(),
        });
    }
    Ok(brokers)
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        other => Err(ConfigError::Invalid {
            key,
            reason: format!("'{}' is not a boolean", other),
        }),
    }
}
