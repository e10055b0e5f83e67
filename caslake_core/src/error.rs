//! Error types for caslake_core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using caslake_core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during lake operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error that is not tied to a specific store path.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// A transaction is already open against this lake.
    #[error("A transaction is already in progress on this lake")]
    TransactionInProgress,

    /// The transaction was already committed or rolled back.
    #[error("Transaction is closed ({state})")]
    TransactionClosed { state: String },

    /// The entry has no content hash yet.
    #[error("Entry with extension {extension:?} has not been committed")]
    NotCommitted { extension: String },

    /// Writing an object to the store failed.
    #[error("Failed to write object {path}: {source}")]
    StorageWrite {
        path: String,
        source: std::io::Error,
    },

    /// Moving an object inside the store failed.
    #[error("Failed to move object {from} to {to}: {source}")]
    StorageMove {
        from: String,
        to: String,
        source: std::io::Error,
    },

    /// Deleting an object from the store failed.
    #[error("Failed to delete object {path}: {source}")]
    StorageDelete {
        path: String,
        source: std::io::Error,
    },

    /// Reading an object from the store failed.
    #[error("Failed to read object {path}: {source}")]
    StorageRead {
        path: String,
        source: std::io::Error,
    },

    /// No object exists at the given store path.
    #[error("Object not found: {path}")]
    NotFound { path: String },

    /// The catalog rejected a batch insert.
    #[error("Catalog write failed: {reason}")]
    CatalogWrite { reason: String },

    /// The catalog failed to execute a query.
    #[error("Catalog query failed: {reason}")]
    CatalogQuery { reason: String },

    /// The query cannot be executed as written.
    #[error("Invalid query: {reason}")]
    InvalidQuery { reason: String },

    /// Invalid hash format or encoding.
    #[error("Invalid hash: {reason}")]
    InvalidHash { reason: String },

    /// Lake directory is invalid or not initialized.
    #[error("Invalid lake at {path}: {reason}")]
    InvalidLake { path: PathBuf, reason: String },

    /// Configuration file could not be understood.
    #[error("Invalid config: {reason}")]
    Config { reason: String },

    /// Caller-defined fields could not be (de)serialized.
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl Error {
    /// Create a TransactionClosed error.
    pub fn transaction_closed(state: impl Into<String>) -> Self {
        Error::TransactionClosed {
            state: state.into(),
        }
    }

    /// Create a NotCommitted error.
    pub fn not_committed(extension: impl Into<String>) -> Self {
        Error::NotCommitted {
            extension: extension.into(),
        }
    }

    /// Create a StorageWrite error.
    pub fn storage_write(path: impl Into<String>, source: std::io::Error) -> Self {
        Error::StorageWrite {
            path: path.into(),
            source,
        }
    }

    /// Create a StorageMove error, or NotFound if the source is missing.
    pub fn storage_move(
        from: impl Into<String>,
        to: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        let from = from.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            return Error::NotFound { path: from };
        }
        Error::StorageMove {
            from,
            to: to.into(),
            source,
        }
    }

    /// Create a StorageDelete error, or NotFound if the object is missing.
    pub fn storage_delete(path: impl Into<String>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            return Error::NotFound { path };
        }
        Error::StorageDelete { path, source }
    }

    /// Create a StorageRead error, or NotFound if the object is missing.
    pub fn storage_read(path: impl Into<String>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            return Error::NotFound { path };
        }
        Error::StorageRead { path, source }
    }

    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Error::NotFound { path: path.into() }
    }

    /// Create a CatalogWrite error.
    pub fn catalog_write(reason: impl Into<String>) -> Self {
        Error::CatalogWrite {
            reason: reason.into(),
        }
    }

    /// Create a CatalogQuery error.
    pub fn catalog_query(reason: impl Into<String>) -> Self {
        Error::CatalogQuery {
            reason: reason.into(),
        }
    }

    /// Create an InvalidQuery error.
    pub fn invalid_query(reason: impl Into<String>) -> Self {
        Error::InvalidQuery {
            reason: reason.into(),
        }
    }

    /// Create an InvalidHash error.
    pub fn invalid_hash(reason: impl Into<String>) -> Self {
        Error::InvalidHash {
            reason: reason.into(),
        }
    }

    /// Create an InvalidLake error.
    pub fn invalid_lake(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::InvalidLake {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a Config error.
    pub fn config(reason: impl Into<String>) -> Self {
        Error::Config {
            reason: reason.into(),
        }
    }

    /// Whether this error stems from misuse of the API rather than a backend failure.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Error::TransactionInProgress
                | Error::TransactionClosed { .. }
                | Error::NotCommitted { .. }
        )
    }

    /// Whether this error reports a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Io { source: err.error }
    }
}

impl From<ignore::Error> for Error {
    fn from(err: ignore::Error) -> Self {
        // ignore::Error can wrap an io::Error or be a path error
        match err.io_error() {
            Some(io_err) => Error::Io {
                source: std::io::Error::new(io_err.kind(), io_err.to_string()),
            },
            None => Error::Io {
                source: std::io::Error::other(err.to_string()),
            },
        }
    }
}
