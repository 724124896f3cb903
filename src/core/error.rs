use crate::core::store::StoreError;
use thiserror::Error;

/// A failure while processing one rate source.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timeout calling rate API '{source_name}': {url}")]
    Timeout { source_name: String, url: String },

    #[error("connection error calling rate API '{source_name}': {url}")]
    Connection { source_name: String, url: String },

    #[error("HTTP error calling rate API '{source_name}': {status} - {body}")]
    Http {
        source_name: String,
        status: u16,
        body: String,
    },

    #[error("request error calling rate API '{source_name}': {message}")]
    Request {
        source_name: String,
        message: String,
    },

    #[error("unexpected error processing '{source_name}': {message}")]
    Unexpected {
        source_name: String,
        message: String,
    },

    #[error("response from rate API '{source_name}' has no sell_price field")]
    MissingSellPrice { source_name: String },
}

impl FetchError {
    pub fn unexpected(source_name: &str, err: impl std::fmt::Display) -> Self {
        FetchError::Unexpected {
            source_name: source_name.to_string(),
            message: err.to_string(),
        }
    }

    /// Classifies a transport error the way the scheduler reports it.
    pub fn from_reqwest(source_name: &str, url: &str, err: reqwest::Error) -> Self {
        let source_name = source_name.to_string();
        if err.is_timeout() {
            FetchError::Timeout {
                source_name,
                url: url.to_string(),
            }
        } else if err.is_connect() {
            FetchError::Connection {
                source_name,
                url: url.to_string(),
            }
        } else {
            FetchError::Request {
                source_name,
                message: err.to_string(),
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum RateSyncError {
    #[error("expected exactly one {kind} record, got {count}")]
    NotExactlyOne { kind: &'static str, count: usize },

    #[error("rate source '{name}' has no base URL configured")]
    MissingBaseUrl { name: String },

    #[error("connection test failed: {0}")]
    ConnectionTest(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_message_includes_status_and_body() {
        let err = FetchError::Http {
            source_name: "sunat".to_string(),
            status: 500,
            body: "boom".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "HTTP error calling rate API 'sunat': 500 - boom"
        );
    }

    #[test]
    fn test_connection_test_wraps_underlying_message() {
        let inner = FetchError::unexpected("sunat", "bad price");
        let err = RateSyncError::ConnectionTest(inner.to_string());
        assert_eq!(
            err.to_string(),
            "connection test failed: unexpected error processing 'sunat': bad price"
        );
    }
}
