use std::{fmt, path::PathBuf, time::Duration};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const LISTEN_PORT: u16 = 80;
pub const LISTEN_BACKLOG: i32 = 1;
pub const REQUEST_BUFFER_SIZE: usize = 1024;
pub const SENSOR_LABEL: &str = "dht11";
pub const SITE_LOCATION: &str = "GH_trial";
pub const DHT11_PIN: i32 = 16;

// Site-specific correction for this enclosure, not a unit conversion.
pub const TEMPERATURE_CALIBRATION_OFFSET: f32 = 20.0;

pub const WIFI_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(250);

const PLACEHOLDER_SSID: &str = "CHANGE_ME";

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    #[serde(rename = "ssid")]
    network_name: String,
    #[serde(rename = "password", default)]
    secret: String,
}

impl Credentials {
    pub fn new(
        network_name: impl Into<String>,
        secret: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let credentials = Self {
            network_name: network_name.into(),
            secret: secret.into(),
        };
        credentials.validate()?;
        Ok(credentials)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let credentials: Self = serde_json::from_str(raw)
            .map_err(|err| ConfigError::Invalid(format!("credentials are not valid JSON: {err}")))?;
        credentials.validate()?;
        Ok(credentials)
    }

    pub fn network_name(&self) -> &str {
        &self.network_name
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let ssid = self.network_name.trim();
        if ssid.is_empty() || ssid == PLACEHOLDER_SSID {
            return Err(ConfigError::Missing("wifi ssid"));
        }
        if self.network_name.len() > 32 {
            return Err(ConfigError::Invalid("wifi ssid longer than 32 bytes".to_string()));
        }
        if self.secret.len() > 64 {
            return Err(ConfigError::Invalid(
                "wifi password longer than 64 bytes".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("network_name", &self.network_name)
            .field("secret_set", &!self.secret.is_empty())
            .finish()
    }
}

pub trait CredentialsSource {
    fn load(&self) -> Result<Credentials, ConfigError>;
}

/// `{"ssid": ..., "password": ...}` read from a JSON file, `secrets.json` on the host.
#[derive(Debug, Clone)]
pub struct FileCredentials {
    path: PathBuf,
}

impl FileCredentials {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialsSource for FileCredentials {
    fn load(&self) -> Result<Credentials, ConfigError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|err| {
            warn!("failed to read {}: {err}", self.path.display());
            ConfigError::Missing("wifi credentials file")
        })?;
        Credentials::from_json(&raw)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkPolicy {
    pub poll_interval_ms: u64,
    pub attempt_timeout_ms: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub max_attempts: Option<u32>,
}

impl Default for LinkPolicy {
    fn default() -> Self {
        Self {
            poll_interval_ms: WIFI_POLL_INTERVAL.as_millis() as u64,
            attempt_timeout_ms: 20_000,
            backoff_initial_ms: 1_000,
            backoff_max_ms: 60_000,
            max_attempts: Some(5),
        }
    }
}

impl LinkPolicy {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn polls_per_attempt(&self) -> u64 {
        if self.poll_interval_ms == 0 {
            return self.attempt_timeout_ms.max(1);
        }
        (self.attempt_timeout_ms / self.poll_interval_ms).max(1)
    }

    /// Delay before attempt `failed + 1`, doubling from `backoff_initial_ms`.
    pub fn backoff_after(&self, failed: u32) -> Duration {
        let shift = failed.saturating_sub(1).min(16);
        let delay = self
            .backoff_initial_ms
            .saturating_mul(1_u64 << shift)
            .min(self.backoff_max_ms);
        Duration::from_millis(delay)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExporterConfig {
    pub listen_port: u16,
    pub request_buffer_size: usize,
    pub location: String,
    pub calibration_offset: f32,
    pub io_timeout_ms: Option<u64>,
    /// Pause after a failed `accept`.
    pub accept_retry_delay_ms: u64,
    #[serde(default)]
    pub link: LinkPolicy,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            listen_port: LISTEN_PORT,
            request_buffer_size: REQUEST_BUFFER_SIZE,
            location: SITE_LOCATION.to_string(),
            calibration_offset: TEMPERATURE_CALIBRATION_OFFSET,
            io_timeout_ms: None,
            accept_retry_delay_ms: ACCEPT_RETRY_DELAY.as_millis() as u64,
            link: LinkPolicy::default(),
        }
    }
}

impl ExporterConfig {
    pub fn io_timeout(&self) -> Option<Duration> {
        self.io_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn accept_retry_delay(&self) -> Duration {
        Duration::from_millis(self.accept_retry_delay_ms)
    }
}
