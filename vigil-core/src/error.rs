use thiserror::Error;

#[derive(Error, Debug)]
pub enum VigilError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Other error: {0}")]
    Other(String),
}

/// Failures of the match path.
///
/// `InvalidEncoding` is raised before any cache or scan work. `DimensionMismatch`
/// can only surface if a malformed vector slips past validation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("Invalid face encoding: {0}")]
    InvalidEncoding(String),

    #[error("Embedding dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("Person registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("Detection could not be recorded: {0}")]
    PersistenceFailure(String),
}
