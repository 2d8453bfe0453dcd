pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod ipc;
pub mod matcher;
pub mod models;
pub mod registry;
pub mod similarity;

pub use config::VigilConfig;
pub use embedding::{Embedding, EMBEDDING_DIM};
pub use error::{MatchError, VigilError};
pub use matcher::{MatchCandidate, Matcher, NEAR_CERTAIN_CUTOFF};
pub use registry::{PgRegistryStore, RegistryCache, RegistrySnapshot, RegistryStore};
