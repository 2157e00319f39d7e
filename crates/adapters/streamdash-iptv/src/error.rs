#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    #[error("panel request timed out")]
    Timeout,
    #[error("panel returned HTTP {0}")]
    Status(u16),
    #[error("panel request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("panel rejected credentials")]
    Unauthorized,
    #[error("unexpected panel payload: {0}")]
    Payload(String),
}

impl From<reqwest::Error> for PanelError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Request(e.without_url())
        }
    }
}
