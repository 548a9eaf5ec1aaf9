use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type ProbeResult<T> = Result<T, ProbeError>;

/// Why a probe failed. The `Display` text is the failure reason recorded
/// against the node, so several variants render verbatim.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The node answered, but not with what we expect.
    #[error("{0}")]
    Mismatch(String),

    #[error("Timeout")]
    Timeout,

    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("connection failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("SOCKS5 proxy error: {0}")]
    Socks(String),

    #[error("onion node {0} cannot be reached without a SOCKS proxy")]
    NoProxy(String),

    #[error("http request failed: {0}")]
    Http(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("Exit value is {0}")]
    ExitStatus(i32),

    #[error("script terminated by signal")]
    Signal,

    #[error("failed to run {script}: {source}")]
    Spawn {
        script: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<hyper::Error> for ProbeError {
    fn from(e: hyper::Error) -> Self {
        ProbeError::Http(e.to_string())
    }
}
