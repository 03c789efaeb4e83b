// SPDX-License-Identifier: Apache-2.0, MIT

use thiserror::Error;

/// Top-level error type for the device state store.
///
/// Tagged per component family rather than a single string channel, per
/// the crate's error-taxonomy decision: callers can match on the kind of
/// failure (codec, filesystem, index store, archive tool) instead of
/// parsing messages.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record codec error: {0}")]
    Codec(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("index store error: {0}")]
    Index(String),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("no such {what}: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("{0}")]
    Other(String),
}

/// Archive-tool specific failures (tar/gzip creation or extraction).
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("failed to create archive at {path}: {source}")]
    Create {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to extract archive at {path}: {source}")]
    Extract {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        StoreError::Index(e.to_string())
    }
}

impl From<anyhow::Error> for StoreError {
    fn from(e: anyhow::Error) -> Self {
        StoreError::Other(e.to_string())
    }
}

impl From<StoreError> for String {
    fn from(e: StoreError) -> Self {
        e.to_string()
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
