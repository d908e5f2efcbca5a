//! Error taxonomy shared by every component in this crate.
//!
//! Mirrors the wire-visible status codes from the service contract: each
//! variant maps to exactly one gRPC status when it crosses the Flight
//! boundary (see the `From<Error> for tonic::Status` impl below).

use thiserror::Error;

/// Errors that can be raised from this library.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown ticket or action: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("allocator cap exceeded for '{child}' after retry (requested {requested} bytes)")]
    OutOfMemory { child: String, requested: usize },

    #[error("typed accessor on mismatched column: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("incoming batch of size {got} exceeds first-seen batch size {max}")]
    BatchTooLarge { got: usize, max: usize },

    #[error("stream cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Arrow(#[from] arrow::error::ArrowError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound(msg) => tonic::Status::not_found(msg),
            Error::InvalidArgument(msg) => tonic::Status::invalid_argument(msg),
            Error::OutOfMemory { child, requested } => tonic::Status::resource_exhausted(
                format!("out of memory in '{child}' (requested {requested} bytes)"),
            ),
            Error::TypeMismatch { expected, found } => tonic::Status::internal(format!(
                "type mismatch: expected {expected}, found {found}"
            )),
            Error::BatchTooLarge { got, max } => tonic::Status::invalid_argument(format!(
                "batch of {got} rows exceeds established size {max}"
            )),
            Error::Cancelled => tonic::Status::cancelled("stream cancelled"),
            Error::Internal(msg) => tonic::Status::internal(msg),
            Error::Arrow(e) => tonic::Status::internal(e.to_string()),
        }
    }
}
