//! Error types for the New Relic provider.

use thiserror::Error;

use crate::client::ApiError;
use crate::id::IdError;

/// Errors returned by provider operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested remote object was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Configuration failed validation, or expand found an illegal field.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A resource ID could not be decoded.
    #[error("Invalid ID: {0}")]
    Parse(#[from] IdError),

    /// An internal provider error occurred.
    #[error("Provider error: {0}")]
    Sdk(String),

    /// The provider is not configured, or its configuration is invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A gRPC transport error occurred.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// The New Relic API reported a failure.
    #[error("New Relic API error: {0}")]
    Remote(String),

    /// A polling loop ran out of time before its condition held.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// The operation was cancelled by provider shutdown.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Operation not supported by this resource type.
    #[error("Unimplemented: {0}")]
    Unimplemented(String),
}

impl ProviderError {
    /// Get the error message without the variant prefix.
    pub fn message(&self) -> String {
        match self {
            Self::NotFound(msg)
            | Self::Validation(msg)
            | Self::Sdk(msg)
            | Self::Configuration(msg)
            | Self::UnknownResource(msg)
            | Self::Remote(msg)
            | Self::DeadlineExceeded(msg)
            | Self::Cancelled(msg)
            | Self::Unimplemented(msg) => msg.clone(),
            Self::Parse(err) => err.to_string(),
            Self::Serialization(err) => err.to_string(),
            Self::Transport(err) => err.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<ApiError> for ProviderError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::NotFound(msg) => ProviderError::NotFound(msg),
            ApiError::Remote(msg) => ProviderError::Remote(msg),
        }
    }
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(msg) => tonic::Status::not_found(msg),
            ProviderError::Validation(msg) => tonic::Status::invalid_argument(msg),
            ProviderError::Parse(err) => tonic::Status::invalid_argument(err.to_string()),
            ProviderError::Configuration(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::UnknownResource(msg) => tonic::Status::not_found(msg),
            ProviderError::Sdk(msg) => tonic::Status::internal(msg),
            ProviderError::Serialization(err) => {
                tonic::Status::invalid_argument(format!("Serialization error: {}", err))
            }
            ProviderError::Transport(err) => {
                tonic::Status::unavailable(format!("Transport error: {}", err))
            }
            ProviderError::Remote(msg) => tonic::Status::unavailable(msg),
            ProviderError::DeadlineExceeded(msg) => tonic::Status::deadline_exceeded(msg),
            ProviderError::Cancelled(msg) => tonic::Status::cancelled(msg),
            ProviderError::Unimplemented(msg) => tonic::Status::unimplemented(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProviderError::NotFound("policy 123".to_string());
        assert_eq!(format!("{}", err), "Resource not found: policy 123");

        let err = ProviderError::Validation("event is not supported".to_string());
        assert_eq!(format!("{}", err), "Validation error: event is not supported");

        let err = ProviderError::UnknownResource("newrelic_dashboard".to_string());
        assert_eq!(format!("{}", err), "Unknown resource type: newrelic_dashboard");

        let err = ProviderError::Remote("HTTP 500".to_string());
        assert_eq!(format!("{}", err), "New Relic API error: HTTP 500");
    }

    #[test]
    fn test_error_to_status() {
        let cases = [
            (ProviderError::NotFound("t".into()), tonic::Code::NotFound),
            (ProviderError::Validation("t".into()), tonic::Code::InvalidArgument),
            (
                ProviderError::Parse(IdError::ZeroCount),
                tonic::Code::InvalidArgument,
            ),
            (
                ProviderError::Configuration("t".into()),
                tonic::Code::FailedPrecondition,
            ),
            (ProviderError::Sdk("t".into()), tonic::Code::Internal),
            (ProviderError::Remote("t".into()), tonic::Code::Unavailable),
            (
                ProviderError::DeadlineExceeded("t".into()),
                tonic::Code::DeadlineExceeded,
            ),
            (ProviderError::Cancelled("t".into()), tonic::Code::Cancelled),
            (
                ProviderError::Unimplemented("t".into()),
                tonic::Code::Unimplemented,
            ),
        ];

        for (err, code) in cases {
            let status: tonic::Status = err.into();
            assert_eq!(status.code(), code);
        }
    }

    #[test]
    fn test_from_api_error() {
        let err: ProviderError = ApiError::NotFound("condition 7".to_string()).into();
        assert!(err.is_not_found());

        let err: ProviderError = ApiError::Remote("boom".to_string()).into();
        assert!(matches!(err, ProviderError::Remote(ref m) if m == "boom"));
    }

    #[test]
    fn test_from_id_error() {
        let err: ProviderError = crate::id::parse_ids("a:2", 2).unwrap_err().into();
        assert!(matches!(err, ProviderError::Parse(_)));
        assert!(err.message().contains("\"a\""));
    }

    #[test]
    fn test_message_method() {
        let err = ProviderError::NotFound("resource-123".to_string());
        assert_eq!(err.message(), "resource-123");

        let err = ProviderError::Configuration("invalid config".to_string());
        assert_eq!(err.message(), "invalid config");
    }
}
