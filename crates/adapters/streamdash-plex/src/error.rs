/// Failure of one outbound call to a Plex server or the directory.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("{url} timed out")]
    Timeout { url: String },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("unexpected payload: {0}")]
    Payload(String),
}

impl FetchError {
    pub(crate) fn from_reqwest(url: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout {
                url: redact(url),
            }
        } else {
            Self::Request {
                url: redact(url),
                source: source.without_url(),
            }
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Drop the query string so tokens never reach logs.
pub(crate) fn redact(url: &str) -> String {
    url.split_once('?').map_or(url, |(path, _)| path).to_string()
}
