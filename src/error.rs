use thiserror::Error;

use crate::storage::StorageError;

/// Why a write conflicted with existing state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictKind {
    #[error("short code '{0}' is already taken")]
    CodeTaken(String),
    #[error("short URL {id} was modified concurrently (expected version {expected})")]
    StaleVersion { id: i64, expected: i64 },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Conflict(#[from] ConflictKind),
    #[error("{entity} '{key}' not found")]
    NotFound { entity: &'static str, key: String },
    #[error("storage failure during {operation} ({target})")]
    Storage {
        operation: &'static str,
        target: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub fn short_url_not_found(key: impl ToString) -> Self {
        Error::NotFound {
            entity: "short url",
            key: key.to_string(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

/// Attaches operation and target context to storage failures.
pub trait StorageContext<T> {
    fn storage_context(self, operation: &'static str, target: impl ToString) -> Result<T>;
}

impl<T> StorageContext<T> for anyhow::Result<T> {
    fn storage_context(self, operation: &'static str, target: impl ToString) -> Result<T> {
        self.map_err(|source| Error::Storage {
            operation,
            target: target.to_string(),
            source,
        })
    }
}

impl<T> StorageContext<T> for std::result::Result<T, StorageError> {
    fn storage_context(self, operation: &'static str, target: impl ToString) -> Result<T> {
        self.map_err(|err| match err {
            StorageError::Conflict(code) => Error::Conflict(ConflictKind::CodeTaken(code)),
            StorageError::Other(source) => Error::Storage {
                operation,
                target: target.to_string(),
                source,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_conflict_maps_to_code_taken() {
        let result: std::result::Result<(), StorageError> =
            Err(StorageError::Conflict("abc".to_string()));
        let err = result.storage_context("update_code", 1).unwrap_err();
        assert!(matches!(
            err,
            Error::Conflict(ConflictKind::CodeTaken(ref code)) if code == "abc"
        ));
    }

    #[test]
    fn test_storage_failure_carries_context() {
        let result: anyhow::Result<()> = Err(anyhow::anyhow!("connection reset"));
        let err = result.storage_context("get_by_code", "xyz").unwrap_err();
        assert_eq!(err.to_string(), "storage failure during get_by_code (xyz)");
    }
}
