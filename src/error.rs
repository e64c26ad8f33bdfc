/// Error taxonomy for the client.
///
/// `Configuration` means the operator's environment is wrong (bad URL,
/// unresolvable host, TLS/proxy failure). `Authentication` is retried a
/// bounded number of times by the polling loop; `Service` likewise.
/// `Protocol` is never retried.
#[derive(Debug, thiserror::Error)]
pub enum LoadCtlError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("service returned {status}: {body}")]
    Service { status: u16, body: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl LoadCtlError {
    /// Non-2xx response, with the body truncated for log hygiene.
    pub fn service(status: u16, body: &str) -> Self {
        let body = body.chars().take(512).collect();
        LoadCtlError::Service { status, body }
    }

    /// Map a transport-level failure. Connect failures (DNS, TLS, proxy)
    /// are configuration errors the operator must fix, not transient ones.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_connect() {
            LoadCtlError::Configuration(format!(
                "cannot reach server: {err}, check the URL and proxy settings"
            ))
        } else {
            LoadCtlError::Transport(err)
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, LoadCtlError::Authentication(_))
    }
}

pub type Result<T> = std::result::Result<T, LoadCtlError>;
