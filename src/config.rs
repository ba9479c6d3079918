use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use crate::error::{Result, MediaError};

pub const ENV_TENANT_DOMAIN: &str = "MEDIASVC_TENANT_DOMAIN";
pub const ENV_REST_API_URL: &str = "MEDIASVC_REST_API_URL";
pub const ENV_CLIENT_ID: &str = "MEDIASVC_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "MEDIASVC_CLIENT_SECRET";

fn default_authority_url() -> String {
    "https://login.microsoftonline.com".to_string()
}

fn default_resource() -> String {
    "https://rest.media.azure.net".to_string()
}

fn default_request_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub encoding: EncodingConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Azure AD tenant domain, e.g. contoso.onmicrosoft.com
    pub tenant_domain: String,
    /// REST endpoint of the media services account
    pub rest_api_url: String,
    /// Application (client) id used for the client-credentials grant
    pub client_id: String,
    /// Application secret
    pub client_secret: String,
    /// Token authority
    #[serde(default = "default_authority_url")]
    pub authority_url: String,
    /// Resource the access token is requested for
    #[serde(default = "default_resource")]
    pub resource: String,
    /// Per-request HTTP timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ServiceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            tenant_domain: String::new(),
            rest_api_url: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            authority_url: default_authority_url(),
            resource: default_resource(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    /// Media processor used for both presets
    pub processor_name: String,
    /// Adaptive bitrate video preset
    pub video_preset: String,
    /// Stereo audio preset
    pub audio_preset: String,
    /// Output asset name used by the `run` workflow for video
    pub video_output_name: String,
    /// Output asset name used by the `run` workflow for audio
    pub audio_output_name: String,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            processor_name: "Media Encoder Standard".to_string(),
            video_preset: "Adaptive Streaming".to_string(),
            audio_preset: "AAC Stereo for Streaming".to_string(),
            video_output_name: "videoAsset".to_string(),
            audio_output_name: "audioAsset".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Seconds between job status checks while waiting for an encode
    pub encode_interval_secs: u64,
    /// Give up waiting for an encode after this many seconds
    pub encode_timeout_secs: Option<u64>,
    /// Seconds to wait while a job is canceling before deleting it
    pub cancel_interval_secs: u64,
    /// Maximum status checks in the job deletion loop
    pub delete_max_attempts: Option<u32>,
    /// Give up deleting a job after this many seconds
    pub delete_timeout_secs: Option<u64>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            encode_interval_secs: 5,
            encode_timeout_secs: None,
            cancel_interval_secs: 5,
            delete_max_attempts: Some(1000),
            delete_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Block size for blob uploads
    pub block_size_bytes: usize,
    /// Lifetime of streaming locators
    pub locator_duration_days: u32,
    /// What to do when a downloaded file already exists locally
    pub overwrite: OverwritePolicy,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            block_size_bytes: 4 * 1024 * 1024,
            locator_duration_days: 30,
            overwrite: OverwritePolicy::Fail,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OverwritePolicy {
    /// Refuse to replace an existing file
    Fail,
    /// Replace existing files
    Overwrite,
    /// Leave existing files alone and continue with the next one
    Skip,
}

/// Bounds for a status polling loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: Option<u32>,
    pub timeout: Option<Duration>,
}

impl PollPolicy {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
            timeout: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl PollingConfig {
    pub fn encode_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(self.encode_interval_secs),
            max_attempts: None,
            timeout: self.encode_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn delete_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(self.cancel_interval_secs),
            max_attempts: self.delete_max_attempts,
            timeout: self.delete_timeout_secs.map(Duration::from_secs),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MediaError::Config(format!("Failed to read config file: {}", e)))?;

        Ok(toml::from_str(&content)?)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| MediaError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| MediaError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Override service credentials from `MEDIASVC_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        let fields: [(&str, &mut String); 4] = [
            (ENV_TENANT_DOMAIN, &mut self.service.tenant_domain),
            (ENV_REST_API_URL, &mut self.service.rest_api_url),
            (ENV_CLIENT_ID, &mut self.service.client_id),
            (ENV_CLIENT_SECRET, &mut self.service.client_secret),
        ];
        for (key, field) in fields {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *field = value;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("service.tenant_domain", &self.service.tenant_domain),
            ("service.rest_api_url", &self.service.rest_api_url),
            ("service.client_id", &self.service.client_id),
            ("service.client_secret", &self.service.client_secret),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(MediaError::Config(format!("{} must be set", name)));
            }
        }

        if !self.service.rest_api_url.starts_with("http://")
            && !self.service.rest_api_url.starts_with("https://")
        {
            return Err(MediaError::Config(format!(
                "service.rest_api_url must be an http(s) URL, got '{}'",
                self.service.rest_api_url
            )));
        }

        if self.transfer.block_size_bytes == 0 {
            return Err(MediaError::Config("transfer.block_size_bytes must be positive".to_string()));
        }

        Ok(())
    }
}
