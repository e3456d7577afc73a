//! Domain error types.
//!
//! A missing document is *not* an error here: by-id lookups return the
//! [`crate::model::NotFound`] sentinel inside [`crate::model::Lookup`]. The
//! variants below cover genuine failures: the storage backend misbehaving, a
//! write rejected by referential validation, or a stored record that no longer
//! parses into its typed model.

use thiserror::Error;

use crate::model::Collection;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("validation failed: {message}")]
    Validation { message: String },

    #[error("malformed {collection} record {id}")]
    Malformed {
        collection: Collection,
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        StoreError::Validation {
            message: message.into(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, StoreError::Validation { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
