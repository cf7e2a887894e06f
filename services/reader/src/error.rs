use axum::http::StatusCode;
use pictor_storage::StorageError;
use thiserror::Error;

/// Request-level failures of the read service.
///
/// The display text is what clients see in the `error` field, so upstream failures
/// never leak store details; those are logged with the failing operation instead.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("missing key")]
    MissingKey,

    #[error("invalid request")]
    InvalidRequest,

    #[error("not found")]
    NotFound,

    #[error("invalid method")]
    MethodNotAllowed,

    #[error("cdn domain not configured")]
    CdnNotConfigured,

    #[error("internal server error")]
    Upstream(#[from] StorageError),

    #[error("internal server error")]
    Encode(#[from] serde_json::Error),
}

impl ReadError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingKey | Self::InvalidRequest => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::CdnNotConfigured | Self::Upstream(_) | Self::Encode(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingKey => "MISSING_KEY",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::NotFound => "NOT_FOUND",
            Self::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            Self::CdnNotConfigured => "CONFIGURATION_ERROR",
            Self::Upstream(_) => "UPSTREAM_UNAVAILABLE",
            Self::Encode(_) => "ENCODE_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ReadError::MissingKey.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ReadError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ReadError::MethodNotAllowed.status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(
            ReadError::CdnNotConfigured.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_upstream_hides_details() {
        let err = ReadError::from(StorageError::object_store(
            "object.presign",
            "credentials expired",
        ));
        assert_eq!(err.to_string(), "internal server error");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "UPSTREAM_UNAVAILABLE");
    }
}
