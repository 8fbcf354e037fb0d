//! Error handling.

use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_smithy_types::byte_stream::error::Error as ByteStreamError;
use axum::{
    extract::rejection::{PathRejection, QueryRejection},
    http::header,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ndarray::ShapeError;
use std::error::Error;
use thiserror::Error;
use tokio::sync::AcquireError;
use tracing::{event, Level};

/// SigPlot data service error type
///
/// This type encapsulates the various errors that may occur while serving a request.
/// Each variant may result in a different API error response.
#[derive(Debug, Error)]
pub enum SdsError {
    /// Error deserialising path parameters
    #[error("path parameters are not valid")]
    PathRejection(#[from] PathRejection),

    /// Error deserialising query parameters
    #[error("query parameters are not valid")]
    QueryRejection(#[from] QueryRejection),

    /// Error validating request parameters
    #[error("request parameters are not valid")]
    Validation(#[from] validator::ValidationErrors),

    /// Request is inconsistent with the file it addresses
    #[error("{reason}")]
    InvalidRequest { reason: String },

    /// File name does not carry a BLUEFILE extension
    #[error("invalid file type: {filename}")]
    UnsupportedFileType { filename: String },

    /// Location name not present in the configuration
    #[error("unknown location {location}")]
    UnknownLocation { location: String },

    /// Insufficient memory to process request
    #[error("Insufficient memory to process request ({requested} > {total})")]
    InsufficientMemory { requested: usize, total: usize },

    /// Failure opening, seeking or reading the underlying byte source
    #[error("failed to access data source")]
    Io(#[from] std::io::Error),

    /// The byte source ended before the requested range
    #[error("short read at offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead {
        offset: u64,
        expected: usize,
        actual: usize,
    },

    /// Error while retrieving an object from remote storage
    #[error("error retrieving object from remote storage")]
    RemoteGetObject(#[from] SdkError<GetObjectError>),

    /// Error reading object data from remote storage
    #[error("error receiving object from remote storage")]
    RemoteByteStream(#[from] ByteStreamError),

    /// Locations file could not be parsed
    #[error("failed to parse locations file {path}")]
    LocationsParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// The 512-byte header could not be read in full
    #[error("malformed BLUEFILE header: expected 512 bytes, got {length}")]
    MalformedHeader { length: usize },

    /// Format code outside the supported lookup tables
    #[error("unknown format code {code}")]
    UnknownFormat { code: String },

    /// Error converting from bytes to a type
    #[error("failed to convert from bytes to {type_name}")]
    FromBytes { type_name: &'static str },

    /// Error acquiring a semaphore
    #[error("error acquiring resources")]
    SemaphoreAcquire(#[from] AcquireError),

    /// A blocking render task panicked or was cancelled
    #[error("render task failed")]
    TaskJoin(#[from] tokio::task::JoinError),

    /// Error creating ndarray ArrayView from Shape
    #[error("failed to create array from shape")]
    ShapeInvalid(#[from] ShapeError),

    /// Error converting between integer types
    #[error(transparent)]
    TryFromInt(#[from] std::num::TryFromIntError),
}

impl SdsError {
    /// Shorthand for an [SdsError::InvalidRequest].
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        SdsError::InvalidRequest {
            reason: reason.into(),
        }
    }
}

impl IntoResponse for SdsError {
    /// Convert from an `SdsError` into an [axum::response::Response].
    fn into_response(self) -> Response {
        ErrorResponse::from(self).into_response()
    }
}

/// Body of error response
struct ErrorBody {
    /// Main error message
    message: String,

    /// Optional list of causes
    caused_by: Option<Vec<String>>,
}

impl ErrorBody {
    /// Return a new ErrorBody
    ///
    /// # Arguments
    ///
    /// * `error`: The error that occurred
    fn new<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        let message = error.to_string();
        let mut caused_by = None;
        let mut current = error.source();
        while let Some(source) = current {
            let mut causes: Vec<String> = caused_by.unwrap_or_default();
            causes.push(source.to_string());
            caused_by = Some(causes);
            current = source.source();
        }
        // Remove duplicate entries.
        if let Some(caused_by) = caused_by.as_mut() {
            caused_by.dedup()
        }
        ErrorBody { message, caused_by }
    }

    /// Render as plain text, one cause per line.
    fn to_text(&self) -> String {
        let mut text = self.message.clone();
        for cause in self.caused_by.iter().flatten() {
            text.push_str("\ncaused by: ");
            text.push_str(cause);
        }
        text
    }
}

/// A response to send in error cases
struct ErrorResponse {
    /// HTTP status of the response
    status: StatusCode,

    /// Response body
    error: ErrorBody,
}

impl ErrorResponse {
    fn new<E>(status: StatusCode, error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        ErrorResponse {
            status,
            error: ErrorBody::new(error),
        }
    }

    /// Return a 400 bad request ErrorResponse
    fn bad_request<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    /// Return a 404 not found ErrorResponse
    fn not_found<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::NOT_FOUND, error)
    }

    /// Return a 500 internal server error ErrorResponse
    fn internal_server_error<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }
}

impl From<SdsError> for ErrorResponse {
    /// Convert from an `SdsError` into an `ErrorResponse`.
    fn from(error: SdsError) -> Self {
        let response = match &error {
            // Bad request
            SdsError::PathRejection(_)
            | SdsError::QueryRejection(_)
            | SdsError::Validation(_)
            | SdsError::InvalidRequest { reason: _ }
            | SdsError::UnsupportedFileType { filename: _ }
            | SdsError::UnknownLocation { location: _ }
            | SdsError::InsufficientMemory {
                requested: _,
                total: _,
            }
            | SdsError::MalformedHeader { length: _ }
            | SdsError::UnknownFormat { code: _ }
            | SdsError::ShortRead {
                offset: _,
                expected: _,
                actual: _,
            } => Self::bad_request(&error),

            SdsError::Io(io_error) => match io_error.kind() {
                std::io::ErrorKind::NotFound => Self::not_found(&error),
                _ => Self::internal_server_error(&error),
            },

            SdsError::RemoteGetObject(sdk_error) => match sdk_error {
                SdkError::ServiceError(service_error) => match service_error.err() {
                    GetObjectError::NoSuchKey(_) => Self::not_found(&error),
                    _ => Self::internal_server_error(&error),
                },
                _ => Self::internal_server_error(&error),
            },

            // Internal server error
            SdsError::RemoteByteStream(_)
            | SdsError::LocationsParse { path: _, source: _ }
            | SdsError::FromBytes { type_name: _ }
            | SdsError::SemaphoreAcquire(_)
            | SdsError::TaskJoin(_)
            | SdsError::ShapeInvalid(_)
            | SdsError::TryFromInt(_) => Self::internal_server_error(&error),
        };

        // Log server errors.
        if response.status.is_server_error() {
            event!(Level::ERROR, "{}", error.to_string());
            let mut current = error.source();
            while let Some(source) = current {
                event!(Level::ERROR, "Caused by: {}", source.to_string());
                current = source.source();
            }
        }

        response
    }
}

impl IntoResponse for ErrorResponse {
    /// Convert from an `ErrorResponse` into an `axum::response::Response`.
    ///
    /// Renders the response as plain text.
    fn into_response(self) -> Response {
        (
            self.status,
            [(&header::CONTENT_TYPE, mime::TEXT_PLAIN_UTF_8.to_string())],
            self.error.to_text(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use hyper::HeaderMap;

    // Jump through the hoops to get the body as a string.
    async fn body_string(response: Response) -> String {
        String::from_utf8(
            hyper::body::to_bytes(response.into_body())
                .await
                .unwrap()
                .to_vec(),
        )
        .unwrap()
    }

    async fn test_sds_error(error: SdsError, status: StatusCode, body: &str) {
        let response = error.into_response();
        assert_eq!(status, response.status());
        let mut headers = HeaderMap::new();
        headers.insert(
            &header::CONTENT_TYPE,
            "text/plain; charset=utf-8".parse().unwrap(),
        );
        assert_eq!(headers, *response.headers());
        assert_eq!(body, body_string(response).await);
    }

    #[tokio::test]
    async fn invalid_request() {
        let error = SdsError::invalid_request("xsize must be at least 1");
        test_sds_error(error, StatusCode::BAD_REQUEST, "xsize must be at least 1").await;
    }

    #[tokio::test]
    async fn unsupported_file_type() {
        let error = SdsError::UnsupportedFileType {
            filename: "foo.txt".to_string(),
        };
        test_sds_error(error, StatusCode::BAD_REQUEST, "invalid file type: foo.txt").await;
    }

    #[tokio::test]
    async fn unknown_location() {
        let error = SdsError::UnknownLocation {
            location: "nowhere".to_string(),
        };
        test_sds_error(error, StatusCode::BAD_REQUEST, "unknown location nowhere").await;
    }

    #[tokio::test]
    async fn malformed_header() {
        let error = SdsError::MalformedHeader { length: 100 };
        let body = "malformed BLUEFILE header: expected 512 bytes, got 100";
        test_sds_error(error, StatusCode::BAD_REQUEST, body).await;
    }

    #[tokio::test]
    async fn unknown_format() {
        let error = SdsError::UnknownFormat {
            code: "SQ".to_string(),
        };
        test_sds_error(error, StatusCode::BAD_REQUEST, "unknown format code SQ").await;
    }

    #[tokio::test]
    async fn validation_error() {
        let mut errors = validator::ValidationErrors::new();
        errors.add("outxsize", validator::ValidationError::new("range"));
        let error = SdsError::Validation(errors);
        let response = error.into_response();
        assert_eq!(StatusCode::BAD_REQUEST, response.status());
        let body = body_string(response).await;
        assert!(body.starts_with("request parameters are not valid\ncaused by: "));
    }

    #[tokio::test]
    async fn io_not_found() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let error = SdsError::Io(io_error);
        let body = "failed to access data source\ncaused by: no such file";
        test_sds_error(error, StatusCode::NOT_FOUND, body).await;
    }

    #[tokio::test]
    async fn io_other() {
        let io_error = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let error = SdsError::Io(io_error);
        let body = "failed to access data source\ncaused by: disk on fire";
        test_sds_error(error, StatusCode::INTERNAL_SERVER_ERROR, body).await;
    }

    #[tokio::test]
    async fn from_bytes_error() {
        let error = SdsError::FromBytes { type_name: "foo" };
        let body = "failed to convert from bytes to foo";
        test_sds_error(error, StatusCode::INTERNAL_SERVER_ERROR, body).await;
    }

    #[tokio::test]
    async fn insufficient_memory() {
        let error = SdsError::InsufficientMemory {
            requested: 2,
            total: 1,
        };
        let body = "Insufficient memory to process request (2 > 1)";
        test_sds_error(error, StatusCode::BAD_REQUEST, body).await;
    }

    #[tokio::test]
    async fn semaphore_acquire_error() {
        let sem = tokio::sync::Semaphore::new(1);
        sem.close();
        let error = SdsError::SemaphoreAcquire(sem.acquire().await.unwrap_err());
        let body = "error acquiring resources\ncaused by: semaphore closed";
        test_sds_error(error, StatusCode::INTERNAL_SERVER_ERROR, body).await;
    }

    #[tokio::test]
    async fn try_from_int_error() {
        let error = SdsError::TryFromInt(u8::try_from(-1_i32).unwrap_err());
        let body = "out of range integral type conversion attempted";
        test_sds_error(error, StatusCode::INTERNAL_SERVER_ERROR, body).await;
    }
}
