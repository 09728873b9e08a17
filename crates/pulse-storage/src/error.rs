/// Errors produced by the storage layer.
///
/// Handlers translate these into HTTP codes: [`StorageError::KindMismatch`]
/// is a client error, everything else a server-side failure. The retry
/// wrapper consults [`StorageError::is_transient`] to decide whether another
/// attempt can help.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The in-memory engine has no database behind it; `ping` always
    /// reports this.
    #[error("storage: no database connected")]
    NoDatabase,

    /// An update tried to change the kind an id was first ingested with.
    #[error("storage: metric '{id}' already exists with kind {existing}")]
    KindMismatch {
        id: String,
        existing: pulse_common::types::MetricKind,
    },

    /// An underlying SQLite error.
    #[error("storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Snapshot marshalling failure.
    #[error("storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Snapshot file I/O failure.
    #[error("storage: I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Aggregate of per-item failures from a batch operation.
    #[error("storage: batch failed: {}", join_messages(.0))]
    Batch(Vec<StorageError>),
}

impl StorageError {
    pub fn batch(errors: Vec<StorageError>) -> Self {
        StorageError::Batch(errors)
    }

    /// Whether a retry can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Sqlite(_) | StorageError::Io(_))
    }
}

fn join_messages(errors: &[StorageError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
