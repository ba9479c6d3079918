use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Lifecycle state of a remote encode job.
///
/// The service reports states as integer codes. Codes outside the known set
/// are kept as `Unrecognized` so callers can decide how to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Queued,
    Scheduled,
    Processing,
    Finished,
    Error,
    Canceled,
    Canceling,
    Unrecognized(i32),
}

impl JobState {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Queued,
            1 => Self::Scheduled,
            2 => Self::Processing,
            3 => Self::Finished,
            4 => Self::Error,
            5 => Self::Canceled,
            6 => Self::Canceling,
            other => Self::Unrecognized(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Queued => 0,
            Self::Scheduled => 1,
            Self::Processing => 2,
            Self::Finished => 3,
            Self::Error => 4,
            Self::Canceled => 5,
            Self::Canceling => 6,
            Self::Unrecognized(code) => *code,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Error | Self::Canceled)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Scheduled | Self::Processing)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "Queued"),
            Self::Scheduled => write!(f, "Scheduled"),
            Self::Processing => write!(f, "Processing"),
            Self::Finished => write!(f, "Finished"),
            Self::Error => write!(f, "Error"),
            Self::Canceled => write!(f, "Canceled"),
            Self::Canceling => write!(f, "Canceling"),
            Self::Unrecognized(code) => write!(f, "Unrecognized({})", code),
        }
    }
}

impl Serialize for JobState {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

impl<'de> Deserialize<'de> for JobState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Ok(Self::from_code(i32::deserialize(deserializer)?))
    }
}

/// Flags applied when an asset is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "i32", from = "i32")]
pub enum AssetCreationOptions {
    #[default]
    None,
    StorageEncrypted,
    CommonEncryptionProtected,
    EnvelopeEncryptionProtected,
}

impl From<AssetCreationOptions> for i32 {
    fn from(options: AssetCreationOptions) -> Self {
        match options {
            AssetCreationOptions::None => 0,
            AssetCreationOptions::StorageEncrypted => 1,
            AssetCreationOptions::CommonEncryptionProtected => 2,
            AssetCreationOptions::EnvelopeEncryptionProtected => 4,
        }
    }
}

impl From<i32> for AssetCreationOptions {
    fn from(code: i32) -> Self {
        match code {
            1 => Self::StorageEncrypted,
            2 => Self::CommonEncryptionProtected,
            4 => Self::EnvelopeEncryptionProtected,
            _ => Self::None,
        }
    }
}

impl std::str::FromStr for AssetCreationOptions {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "storage-encrypted" => Ok(Self::StorageEncrypted),
            "common-encryption" => Ok(Self::CommonEncryptionProtected),
            "envelope-encryption" => Ok(Self::EnvelopeEncryptionProtected),
            _ => Err(format!(
                "Invalid asset option '{}'. Valid options: none, storage-encrypted, common-encryption, envelope-encryption",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Asset {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: i32,
    #[serde(default)]
    pub options: AssetCreationOptions,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default, with = "service_time")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, with = "service_time")]
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct AssetFile {
    pub id: String,
    pub name: String,
    pub parent_asset_id: String,
    #[serde(with = "int64_string")]
    pub content_file_size: u64,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Job {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub state: JobState,
    #[serde(default, with = "service_time")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, with = "service_time")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, with = "service_time")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub running_duration: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct JobTask {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub state: i32,
    #[serde(default)]
    pub progress: f64,
    #[serde(default, deserialize_with = "inline_collection")]
    pub error_details: Vec<ErrorDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Overall job progress in percent: the mean of its task progresses.
pub fn overall_progress(tasks: &[JobTask]) -> f64 {
    if tasks.is_empty() {
        return 0.0;
    }
    tasks.iter().map(|t| t.progress).sum::<f64>() / tasks.len() as f64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum LocatorType {
    Sas,
    OnDemandOrigin,
}

impl From<LocatorType> for i32 {
    fn from(kind: LocatorType) -> Self {
        match kind {
            LocatorType::Sas => 1,
            LocatorType::OnDemandOrigin => 2,
        }
    }
}

impl TryFrom<i32> for LocatorType {
    type Error = String;

    fn try_from(code: i32) -> std::result::Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::Sas),
            2 => Ok(Self::OnDemandOrigin),
            other => Err(format!("unknown locator type {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Locator {
    pub id: String,
    #[serde(rename = "Type")]
    pub locator_type: LocatorType,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub base_uri: Option<String>,
    #[serde(default)]
    pub content_access_component: Option<String>,
    #[serde(default, with = "service_time")]
    pub expiration_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub access_policy_id: String,
    #[serde(default)]
    pub asset_id: String,
}

/// Access rights granted by an access policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessPermissions(pub i32);

impl AccessPermissions {
    pub const READ: Self = Self(1);
    pub const WRITE: Self = Self(2);
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct AccessPolicy {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub duration_in_minutes: f64,
    pub permissions: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct MediaProcessor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub vendor: String,
}

impl MediaProcessor {
    /// Compare dotted version strings numerically ("1.10" > "1.9").
    pub fn version_key(&self) -> Vec<u64> {
        self.version
            .split('.')
            .map(|part| part.trim().parse::<u64>().unwrap_or(0))
            .collect()
    }
}

/// Result of a completed encode: the first output asset and the final job.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeOutcome {
    pub asset: Asset,
    pub job: Job,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamingUrls {
    pub smooth_streaming: String,
    pub hls: String,
    pub mpeg_dash: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadProgress {
    pub file_name: String,
    pub bytes_sent: u64,
    pub total_bytes: u64,
}

impl UploadProgress {
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            1.0
        } else {
            self.bytes_sent as f64 / self.total_bytes as f64
        }
    }

    pub fn percent(&self) -> f64 {
        self.fraction() * 100.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobProgress {
    pub job_id: String,
    pub state: JobState,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadProgress {
    pub file_name: String,
    pub file_index: usize,
    pub file_count: usize,
    pub bytes_written: u64,
}

/// Collection-valued properties come either as a bare array or wrapped as
/// `{"results": [...]}` in verbose payloads.
fn inline_collection<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Collection<T> {
        Bare(Vec<T>),
        Wrapped { results: Vec<T> },
        Null(Option<()>),
    }

    match Collection::<T>::deserialize(deserializer)? {
        Collection::Bare(items) | Collection::Wrapped { results: items } => Ok(items),
        Collection::Null(_) => Ok(Vec::new()),
    }
}

/// The service reports 64-bit sizes as JSON strings in verbose mode.
mod int64_string {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Int64 {
        Number(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match Int64::deserialize(deserializer)? {
            Int64::Number(n) => Ok(n),
            Int64::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Timestamps arrive either as RFC 3339 or as zone-less UTC
/// (`2017-11-06T10:21:44.263`).
pub(crate) mod service_time {
    use super::*;

    pub fn parse(text: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        match value {
            Some(dt) => serializer.serialize_str(&dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Option<DateTime<Utc>>, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?;
        Ok(text.as_deref().and_then(parse))
    }
}
