// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Error types for storage batches.

use std::fmt;
use std::io;

use crate::storage::{Key, StorageError};

/// The kind of record a [`Error::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    File,
    Page,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::File => write!(f, "file"),
            Entity::Page => write!(f, "page"),
        }
    }
}

/// Errors raised by batch operations.
///
/// Every variant raised inside a unit of work propagates unchanged through
/// [`TransactionalStorage::batch`](crate::TransactionalStorage::batch).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{entity} not found: {name}")]
    NotFound { entity: Entity, name: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error("batch aborted by a concurrent commit touching key {key:?}")]
    ConflictAborted { key: Key },

    #[error("batch cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl Error {
    pub(crate) fn file_not_found(name: &str) -> Self {
        Error::NotFound {
            entity: Entity::File,
            name: name.to_string(),
        }
    }

    pub(crate) fn page_not_found(key: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: Entity::Page,
            name: key.to_string(),
        }
    }

    /// Returns true for errors a caller may resolve by re-running the batch.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ConflictAborted { .. })
    }

    /// Returns true if this is a not-found condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Storage(StorageError::Codec(err))
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::NotFound { .. } => io::ErrorKind::NotFound,
            Error::InvalidArgument(_) => io::ErrorKind::InvalidInput,
            Error::NotSupported(_) => io::ErrorKind::Unsupported,
            Error::Cancelled => io::ErrorKind::Interrupted,
            Error::ConflictAborted { .. } | Error::Storage(_) => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = Error::file_not_found("Abc.txt");
        assert_eq!(err.to_string(), "file not found: Abc.txt");
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_conflict_is_retryable() {
        let err = Error::ConflictAborted {
            key: Key::from("k"),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn test_io_error_kinds() {
        let not_found: io::Error = Error::page_not_found(7).into();
        assert_eq!(not_found.kind(), io::ErrorKind::NotFound);

        let invalid: io::Error = Error::InvalidArgument("negative".into()).into();
        assert_eq!(invalid.kind(), io::ErrorKind::InvalidInput);

        let unsupported: io::Error = Error::NotSupported("write".into()).into();
        assert_eq!(unsupported.kind(), io::ErrorKind::Unsupported);
    }
}
