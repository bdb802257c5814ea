//! Backup config
//!

use core::time::Duration;
use std::{fs, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{naming::NameTemplate, scaler::ScaleSettings};

/// Timing of the scale down wait.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleConfig {
    /// Seconds between ready replica polls.
    pub poll_interval_seconds: u64,

    /// Seconds to wait for a workload to scale down.
    pub timeout_seconds: u64,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 2,
            timeout_seconds: 5 * 60,
        }
    }
}

impl From<&ScaleConfig> for ScaleSettings {
    fn from(config: &ScaleConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_seconds),
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }
}

/// Where logs are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// The directory for log files.
    pub directory: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./logs"),
        }
    }
}

/// The tool's config
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The archive name template.
    pub output_format: NameTemplate,

    /// The directory archives are written to.
    pub output_directory: PathBuf,

    /// The number of remote copies to keep per claim, zero keeps all.
    pub keep_last: usize,

    /// The scale down wait.
    pub scale: ScaleConfig,

    /// Logging.
    pub logging: LoggingConfig,
}

impl Config {
    /// Tries to load a config from a toml file.
    pub fn load_toml(file_path: PathBuf) -> Result<Self, LoadConfigError> {
        if !file_path.exists() {
            return Err(LoadConfigError::NoFile);
        }

        let contents = fs::read_to_string(file_path).map_err(LoadConfigError::Read)?;
        let config = toml::from_str(&contents)?;

        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_format: NameTemplate::default(),
            output_directory: PathBuf::from("."),
            keep_last: 0,
            scale: ScaleConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("The file does not exist.")]
    NoFile,

    #[error("Failed to read the file:\n{0}")]
    Read(#[source] std::io::Error),

    #[error("Failed to deserialize the file:\n{0}")]
    Deserialize(#[from] toml::de::Error),
}

/// Credentials for an S3 compatible bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteCredentials {
    /// The account the bucket belongs to, used for the default endpoint.
    #[serde(default)]
    pub account_id: String,

    /// The access key id.
    #[serde(default)]
    pub access_key_id: String,

    /// The secret access key.
    #[serde(default)]
    pub secret_access_key: String,

    /// The bucket name.
    #[serde(default)]
    pub bucket: String,

    /// Overrides the endpoint derived from the account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl RemoteCredentials {
    /// Tries to load credentials from a json file.
    pub fn load_json(file_path: PathBuf) -> Result<Self, LoadCredentialsError> {
        if !file_path.exists() {
            return Err(LoadCredentialsError::NoFile);
        }

        let contents = fs::read_to_string(file_path).map_err(LoadCredentialsError::Read)?;
        let credentials: Self = serde_json::from_str(&contents)?;
        credentials.validate()?;

        Ok(credentials)
    }

    /// Every field except the endpoint override is required.
    pub fn validate(&self) -> Result<(), LoadCredentialsError> {
        let fields = [
            ("account_id", &self.account_id),
            ("access_key_id", &self.access_key_id),
            ("secret_access_key", &self.secret_access_key),
            ("bucket", &self.bucket),
        ];

        match fields.iter().find(|(_, value)| value.is_empty()) {
            Some((field, _)) => Err(LoadCredentialsError::Missing(field)),
            None => Ok(()),
        }
    }

    /// The store endpoint.
    pub fn endpoint(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => format!("https://{}.r2.cloudflarestorage.com", self.account_id),
        }
    }
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum LoadCredentialsError {
    #[error("The file does not exist.")]
    NoFile,

    #[error("Failed to read the file:\n{0}")]
    Read(#[source] std::io::Error),

    #[error("Failed to deserialize the file:\n{0}")]
    Deserialize(#[from] serde_json::Error),

    #[error("Credentials are missing '{0}'")]
    Missing(&'static str),
}
