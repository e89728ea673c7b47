use thiserror::Error;

use crate::mx::MxError;

#[derive(Debug, Error)]
pub enum SmtpError {
    #[error("connection to {host} failed: {source}")]
    Connect {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no reachable address for {host}")]
    NoAddresses { host: String },
    #[error("I/O error: {source}")]
    Io {
        #[source]
        source: std::io::Error,
    },
    #[error("TLS handshake failed: {source}")]
    Tls {
        #[source]
        source: native_tls::Error,
    },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("operation timed out")]
    Timeout,
    #[error("address resolution failed: {0}")]
    Resolve(#[from] MxError),
}

impl From<tokio::time::error::Elapsed> for SmtpError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}
