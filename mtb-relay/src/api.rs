use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Seconds a client should wait before re-sending after a broker failure.
pub const BROKER_RETRY_AFTER_SECS: &str = "30";

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("failed to parse MTB file: {0}")]
    RequestParsingError(#[from] serde_json::Error),
    #[error("MTB file rejected, {0} is missing")]
    MissingRequiredField(&'static str),

    #[error("pseudonymization service unavailable: {0}")]
    PseudonymUnavailable(String),
    #[error("pseudonymization service returned an unusable response: {0}")]
    MalformedProviderResponse(String),

    #[error("MTB file was not acknowledged by Kafka")]
    PublishRejected,
    #[error("interrupted while waiting for the Kafka acknowledgment")]
    PublishInterrupted,
    #[error("failed to produce MTB file to Kafka: {0}")]
    PublishExecutionFailed(String),

    #[error("failed to encode MTB file: {0}")]
    RecordEncodingError(String),
}

impl IngestError {
    /// Label used for the dropped records counter.
    pub fn cause(&self) -> &'static str {
        match self {
            IngestError::RequestParsingError(_) => "invalid_json",
            IngestError::MissingRequiredField(_) => "missing_id",
            IngestError::PseudonymUnavailable(_) => "pseudonym_unavailable",
            IngestError::MalformedProviderResponse(_) => "pseudonym_malformed",
            IngestError::PublishRejected => "kafka_rejected",
            IngestError::PublishInterrupted => "kafka_interrupted",
            IngestError::PublishExecutionFailed(_) => "kafka_write_error",
            IngestError::RecordEncodingError(_) => "encoding_error",
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        match self {
            IngestError::RequestParsingError(_) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, self.to_string()).into_response()
            }

            IngestError::MissingRequiredField(_) => {
                (StatusCode::BAD_REQUEST, self.to_string()).into_response()
            }

            IngestError::PseudonymUnavailable(_)
            | IngestError::MalformedProviderResponse(_)
            | IngestError::PublishRejected => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string()).into_response()
            }

            IngestError::PublishInterrupted | IngestError::PublishExecutionFailed(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                [(header::RETRY_AFTER, BROKER_RETRY_AFTER_SECS)],
                self.to_string(),
            )
                .into_response(),

            IngestError::RecordEncodingError(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
            }
        }
    }
}
