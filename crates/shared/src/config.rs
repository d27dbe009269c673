use crate::error::Error;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub device_store: DeviceStoreConfig,
    pub proximity: ProximityConfig,
    pub binding: BindingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Remote record store; `None` means the in-memory store is used
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceStoreConfig {
    pub path: PathBuf,
    /// Device secret used to derive the at-rest encryption key
    pub key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProximityConfig {
    /// Prefix of the advertised display name (default: "Student-")
    pub display_name_prefix: String,
    /// Prefix of the discovery service id (default: "attendance.")
    pub service_id_prefix: String,
    /// Pause between advertising and discovery start in ms (default: 500)
    pub discovery_delay_ms: u64,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            display_name_prefix: DEFAULT_DISPLAY_NAME_PREFIX.to_string(),
            service_id_prefix: DEFAULT_SERVICE_ID_PREFIX.to_string(),
            discovery_delay_ms: DEFAULT_DISCOVERY_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BindingConfig {
    pub conflict_disclosure: ConflictDisclosure,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

pub const DEFAULT_DISPLAY_NAME_PREFIX: &str = "Student-";
pub const DEFAULT_SERVICE_ID_PREFIX: &str = "attendance.";
pub const DEFAULT_DISCOVERY_DELAY_MS: u64 = 500;

/// How much of another student's identity a conflict message may reveal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictDisclosure {
    /// Name and roll number of the other student
    #[default]
    Full,
    /// Only that the device belongs to someone else
    Redacted,
}

impl FromStr for ConflictDisclosure {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(ConflictDisclosure::Full),
            "redacted" => Ok(ConflictDisclosure::Redacted),
            other => Err(Error::Config(format!(
                "unknown conflict disclosure '{}', expected 'full' or 'redacted'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(Error::Config(format!("unknown log format '{}'", other))),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        Ok(Config {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").ok(),
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()?,
            },
            device_store: DeviceStoreConfig {
                path: env::var("DEVICE_STORE_PATH")
                    .unwrap_or_else(|_| ".rollcall/secure_store.json".to_string())
                    .into(),
                key: env::var("DEVICE_STORE_KEY").ok(),
            },
            proximity: ProximityConfig {
                display_name_prefix: env::var("PROXIMITY_DISPLAY_NAME_PREFIX")
                    .unwrap_or_else(|_| DEFAULT_DISPLAY_NAME_PREFIX.to_string()),
                service_id_prefix: env::var("PROXIMITY_SERVICE_ID_PREFIX")
                    .unwrap_or_else(|_| DEFAULT_SERVICE_ID_PREFIX.to_string()),
                discovery_delay_ms: env::var("PROXIMITY_DISCOVERY_DELAY_MS")
                    .unwrap_or_else(|_| DEFAULT_DISCOVERY_DELAY_MS.to_string())
                    .parse()?,
            },
            binding: BindingConfig {
                conflict_disclosure: env::var("BINDING_CONFLICT_DISCLOSURE")
                    .unwrap_or_else(|_| "full".to_string())
                    .parse()?,
            },
            logging: LoggingConfig {
                format: env::var("LOG_FORMAT")
                    .unwrap_or_else(|_| "json".to_string())
                    .parse()?,
            },
        })
    }
}
