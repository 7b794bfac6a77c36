use http::StatusCode;
use std::io;
use thiserror::Error;

/// Everything that can stop a request before its response head is written.
#[derive(Error, Debug)]
pub enum ServeError {
    /// Traversal, null byte, smuggled separator or undecodable path.
    #[error("invalid URL path")]
    InvalidPath,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ServeError {
    /// The generic message and status sent to the client. Never carries
    /// internal detail such as the on-disk path.
    pub fn to_http(&self) -> (&'static str, StatusCode) {
        match self {
            ServeError::InvalidPath => ("invalid URL path", StatusCode::BAD_REQUEST),
            ServeError::Io(e) => to_http_error(e),
        }
    }
}

/// Shared mapping for every filesystem and decompression failure.
pub fn to_http_error(err: &io::Error) -> (&'static str, StatusCode) {
    match err.kind() {
        io::ErrorKind::NotFound => ("404 page not found", StatusCode::NOT_FOUND),
        io::ErrorKind::PermissionDenied => ("403 Forbidden", StatusCode::FORBIDDEN),
        _ => (
            "500 Internal Server Error",
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    }
}
