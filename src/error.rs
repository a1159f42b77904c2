//! Error types for the Racer bot
//!
//! Remote failures are kept structured so the retry driver and the
//! orchestrator can tell transient API trouble from dead credentials and
//! storage faults.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// A failed call against the Racer game API (or the public price ticker).
#[derive(Debug, Clone)]
pub struct RemoteApiError {
    /// HTTP status when the server answered, `None` for transport or decode failures
    pub status: Option<u16>,
    pub message: String,
}

impl RemoteApiError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Build from a non-success HTTP response body
    pub fn from_response(status: u16, body: &str) -> Self {
        let body = body.trim();
        let message = if body.is_empty() {
            "empty response body".to_string()
        } else if body.chars().count() > 200 {
            format!("{}...", body.chars().take(200).collect::<String>())
        } else {
            body.to_string()
        };
        Self::new(Some(status), message)
    }

    /// Parse a reqwest transport error
    pub fn from_network_error(err: &reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            "Request timed out".to_string()
        } else if err.is_connect() {
            "Connection failed".to_string()
        } else {
            err.to_string()
        };
        Self::new(err.status().map(|s| s.as_u16()), message)
    }

    /// A response arrived but did not carry the fields we need
    pub fn malformed(what: &str, detail: impl std::fmt::Display) -> Self {
        Self::new(None, format!("malformed {} response: {}", what, detail))
    }
}

impl fmt::Display for RemoteApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {}: {}", status, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for RemoteApiError {}

/// The credential file could not be read or written. Fatal to the process.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to read credential store {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write credential store {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A credential could not be decoded into an account identity
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("credential has no `user` parameter")]
    MissingUser,
    #[error("credential `user` parameter is not valid JSON: {0}")]
    InvalidUser(String),
}

/// Minting a fresh credential for a session handle failed
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("session file {0} does not exist")]
    MissingSession(PathBuf),
    #[error("failed to launch session helper: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("session helper exited with {status}: {stderr}")]
    HelperFailed { status: String, stderr: String },
    #[error("session helper timed out after {0}s")]
    Timeout(u64),
    #[error("no web-app data in URL: {0}")]
    NoWebAppData(String),
}

/// Account-fatal failure of one credential's workflow pass
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("remote API error during {step}: {source}")]
    Remote {
        step: &'static str,
        #[source]
        source: RemoteApiError,
    },
}

impl WorkflowError {
    pub fn remote(step: &'static str) -> impl FnOnce(RemoteApiError) -> Self {
        move |source| WorkflowError::Remote { step, source }
    }
}
