// Every way the gate client can fail, grouped by the stage that fails.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse JSON in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("config needs either api_key + secret_key or a handshake block")]
    MissingCredentials,
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Anything that stops the pipeline from being armed.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to derive the signing digest: {0}")]
    Digest(String),
    #[error("invalid cipher parameters: {0}")]
    Cipher(String),
    #[error("handshake with the gate server failed: {0}")]
    Handshake(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },
    #[error("request to {url} timed out")]
    Timeout { url: String },
    #[error("request to {url} failed: {source}")]
    Send {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to read response body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl TransportError {
    // reqwest folds timeouts into its generic error, split them out so
    // callers can tell a hung server from a refused connection.
    pub fn from_send(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            TransportError::Timeout {
                url: url.to_owned(),
            }
        } else {
            TransportError::Send {
                url: url.to_owned(),
                source,
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("failed to open serial port {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: serialport::Error,
    },
    #[error("failed to read from card reader: {0}")]
    Read(#[from] std::io::Error),
}
