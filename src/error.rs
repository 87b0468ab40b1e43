use std::path::PathBuf;

use thiserror::Error;

use crate::alloc::IdKind;

/// Failures surfaced by the provisioning workflows and the store layer.
///
/// Every variant carries the identifying key so the caller can decide
/// between retry and abort; nothing is retried internally.
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("no free {kind} id left in range {min}..{max}")]
    AllocationExhausted { kind: IdKind, min: u32, max: u32 },

    #[error("invalid {kind} id range: max ({max}) is below min ({min})")]
    InvalidRangeConfig { kind: IdKind, min: u32, max: u32 },

    #[error("{what} {value} already taken")]
    DuplicateIdentifier { what: &'static str, value: String },

    #[error("no {entity} with {key} {value}")]
    RecordNotFound {
        entity: &'static str,
        key: &'static str,
        value: String,
    },

    #[error("refusing to write a {entity} record with no attributes")]
    EmptyWrite { entity: &'static str },

    #[error("insufficient permissions to {action} {}", .path.display())]
    InsufficientPermissions { action: &'static str, path: PathBuf },

    #[error("directory {} already exists", .0.display())]
    TargetAlreadyExists(PathBuf),

    /// The database write failed after a filesystem step already ran.
    /// The transaction was rolled back; the path named here was not.
    #[error("{context}; database changes rolled back, {} must be reconciled manually", .path.display())]
    PartialFailure { context: String, path: PathBuf },

    #[error("malformed record at {}:{line}", .file.display())]
    MalformedRecord { file: PathBuf, line: usize },

    #[error("database error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
}
