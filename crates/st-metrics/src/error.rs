use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("failed to request token: {0}")]
    TokenRequest(#[source] reqwest::Error),
    #[error("token request failed with status: {0}")]
    TokenStatus(u16),
    #[error("failed to decode token response: {0}")]
    TokenDecode(#[source] reqwest::Error),
    #[error("token lifetime out of range: {0}s")]
    TokenExpiry(i64),
    #[error("authentication failed: {0}")]
    Auth(#[source] Box<Error>),
    #[error("request to {url} failed: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to {url} failed with status: {status}")]
    FetchStatus { url: String, status: u16 },
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("device pages link back to {url}")]
    PaginationLoop { url: String },
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error("invalid extraction table: {0}")]
    InvalidTable(String),
}

impl Error {
    /// True for failures raised while obtaining a bearer token.
    pub fn is_auth(&self) -> bool {
        matches!(self, Error::Auth(_))
    }
}
