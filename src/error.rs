use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Media service error ({status}{}): {message}", .code.as_deref().map(|c| format!(", {}", c)).unwrap_or_default())]
    Service {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("Job {job_id} ended in state {state}{}", .details.as_deref().map(|d| format!(": {}", d)).unwrap_or_default())]
    JobFailed {
        job_id: String,
        state: String,
        details: Option<String>,
    },

    #[error("Job {job_id} reported unrecognized state code {code}")]
    InvalidState { job_id: String, code: i32 },

    #[error("{operation} timed out after {attempts} polls ({elapsed:?})")]
    Timeout {
        operation: String,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("Invalid remote file name: {0:?}")]
    InvalidFileName(String),

    #[error("File already exists: {}", .0.display())]
    FileExists(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0}")]
    FileNotFound(String),
}

pub type Result<T> = std::result::Result<T, MediaError>;

impl MediaError {
    /// Build a service error from a non-success response body.
    pub fn service(status: u16, body: &str) -> Self {
        match parse_error_payload(body) {
            Some((code, message)) => MediaError::Service { status, code, message },
            None => MediaError::Service {
                status,
                code: None,
                message: if body.trim().is_empty() {
                    format!("request failed with HTTP {}", status)
                } else {
                    body.trim().to_string()
                },
            },
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        MediaError::Service {
            status: 404,
            code: Some("ResourceNotFound".to_string()),
            message: format!("{} was not found", what.into()),
        }
    }

    /// Message suitable for the error stream of the CLI.
    ///
    /// Service errors show only the message the service attached, everything
    /// else falls back to the display form.
    pub fn user_message(&self) -> String {
        match self {
            MediaError::Service { message, .. } => message.clone(),
            MediaError::Auth(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

// {"odata.error":{"code":"...","message":{"lang":"en-US","value":"..."}}}
#[derive(Debug, Deserialize)]
struct ODataErrorEnvelope {
    #[serde(rename = "odata.error", alias = "error")]
    error: ODataError,
}

#[derive(Debug, Deserialize)]
struct ODataError {
    code: Option<String>,
    message: ODataMessage,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ODataMessage {
    Localized { value: String },
    Plain(String),
}

// {"error":"invalid_client","error_description":"AADSTS7000215: ..."}
#[derive(Debug, Deserialize)]
struct OAuthError {
    error: String,
    error_description: Option<String>,
}

/// Extract `(code, message)` from the structured error payloads the service
/// and the token endpoint attach to failed responses.
pub(crate) fn parse_error_payload(body: &str) -> Option<(Option<String>, String)> {
    if let Ok(envelope) = serde_json::from_str::<ODataErrorEnvelope>(body) {
        let message = match envelope.error.message {
            ODataMessage::Localized { value } => value,
            ODataMessage::Plain(value) => value,
        };
        let code = envelope.error.code.filter(|c| !c.is_empty());
        return Some((code, message));
    }

    if let Ok(oauth) = serde_json::from_str::<OAuthError>(body) {
        let message = oauth
            .error_description
            .unwrap_or_else(|| oauth.error.clone());
        return Some((Some(oauth.error), message));
    }

    None
}
