use reqwest::StatusCode;
use thiserror::Error;

/// Everything that can go wrong talking to RAWG, decoding its payloads or
/// touching local storage.
#[derive(Debug, Error)]
pub enum CatalogueError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(StatusCode),

    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("empty payload")]
    EmptyPayload,

    #[error("invalid url {0:?}")]
    InvalidUrl(String),

    #[error("favorites store: {0}")]
    Store(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl CatalogueError {
    /// Whether trying the same request again later could succeed.
    ///
    /// Nothing retries automatically; this only classifies failures so the
    /// logs say which ones were transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            CatalogueError::Transport(_) => true,
            CatalogueError::Status(status) => {
                status.is_server_error()
                    || *status == StatusCode::TOO_MANY_REQUESTS
                    || *status == StatusCode::REQUEST_TIMEOUT
            }
            CatalogueError::Decode(_)
            | CatalogueError::EmptyPayload
            | CatalogueError::InvalidUrl(_)
            | CatalogueError::Store(_)
            | CatalogueError::Io(_)
            | CatalogueError::Config(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, CatalogueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_and_throttling_are_retryable() {
        assert!(CatalogueError::Status(StatusCode::SERVICE_UNAVAILABLE).is_retryable());
        assert!(CatalogueError::Status(StatusCode::TOO_MANY_REQUESTS).is_retryable());
        assert!(CatalogueError::Status(StatusCode::REQUEST_TIMEOUT).is_retryable());
    }

    #[test]
    fn client_errors_and_bad_payloads_are_not_retryable() {
        assert!(!CatalogueError::Status(StatusCode::NOT_FOUND).is_retryable());
        assert!(!CatalogueError::EmptyPayload.is_retryable());
        assert!(!CatalogueError::InvalidUrl(String::new()).is_retryable());

        let decode = serde_json::from_str::<u32>("not json").unwrap_err();
        assert!(!CatalogueError::from(decode).is_retryable());
    }

    #[test]
    fn status_error_mentions_code() {
        let err = CatalogueError::Status(StatusCode::BAD_GATEWAY);
        assert!(err.to_string().contains("502"));
    }
}
