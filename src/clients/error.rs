use reqwest::StatusCode;

/// Failure talking to a Resource Manager API.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The request never produced a response (connect, timeout, TLS).
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Http { status: StatusCode, body: String },

    /// The response body did not have the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// No access token could be acquired.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The run was cancelled while the call was outstanding.
    #[error("cancelled")]
    Cancelled,
}

impl ClientError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Request(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            ClientError::Http { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            ClientError::Decode(_) | ClientError::Auth(_) | ClientError::Cancelled => false,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
