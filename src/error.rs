use std::io;

use thiserror::Error;

/// Failure reported by a [Storage](crate::storage::Storage) backend.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The path does not resolve to an object.
    #[error("no such object: {0}")]
    NotFound(String),

    /// The path escapes the served root.
    #[error("path is outside of served folder: {0}")]
    OutsideRoot(String),

    /// A folder operation was requested on something that is not a folder.
    #[error("not a folder: {0}")]
    NotAFolder(String),

    /// A folder cannot be moved below itself.
    #[error("cannot move {0} into its own subtree")]
    MoveIntoSelf(String),

    /// Underlying filesystem or transport failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Unrecovered failure inside a request handler.
///
/// Any of these ends up as an empty-bodied `500` on the wire. The detail is
/// only ever logged.
#[derive(Error, Debug)]
pub enum DavError {
    #[error("backend failure: {0}")]
    Backend(#[from] StorageError),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("xml error: {0}")]
    Xml(String),

    /// The request body ended before the declared length was received.
    #[error("request body ended after {received} of {expected} bytes")]
    StreamAborted { expected: u64, received: u64 },
}

impl DavError {
    pub fn xml(e: impl std::fmt::Display) -> DavError {
        DavError::Xml(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DavError>;
