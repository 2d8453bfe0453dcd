//! Registry cache: time-bounded, explicitly invalidated snapshot of the
//! match-eligible person registry.
//!
//! - Reads are served from an immutable [`RegistrySnapshot`] behind an `Arc`;
//!   replacing it is a pointer swap, so readers see the old or the new snapshot
//!   in full.
//! - Concurrent misses coalesce on a refresh lock; the second caller re-checks
//!   and reuses the snapshot the first one installed.
//! - `invalidate()` bumps a generation counter, so a fetch that started before
//!   the invalidation is returned to its caller but never installed. The
//!   counter lives under the same lock as the snapshot; the install checks it
//!   while holding the write guard.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use pgvector::Vector;
use sqlx::PgPool;
use uuid::Uuid;

use crate::embedding::EMBEDDING_DIM;
use crate::error::{MatchError, VigilError};
use crate::models::{PersonRecord, StoredEmbedding};

/// Backing store for the registry (owned by person management).
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// All persons that are active, `missing`, and have at least one embedding.
    async fn fetch_eligible(&self) -> Result<Vec<PersonRecord>, VigilError>;
}

/// Immutable point-in-time view of the eligible persons.
#[derive(Debug)]
pub struct RegistrySnapshot {
    persons: Vec<PersonRecord>,
    taken_at: Instant,
    fetched_at: DateTime<Utc>,
}

impl RegistrySnapshot {
    /// Keeps only match-eligible records, and within them only embeddings of
    /// the expected dimension.
    pub fn new(persons: Vec<PersonRecord>) -> Self {
        let persons = persons
            .into_iter()
            .filter_map(|mut p| {
                let before = p.embeddings.len();
                p.embeddings.retain(|e| e.vector.len() == EMBEDDING_DIM);
                if p.embeddings.len() != before {
                    tracing::warn!(
                        person_id = %p.id,
                        dropped = before - p.embeddings.len(),
                        "Dropped stored embeddings with wrong dimension"
                    );
                }
                p.is_match_eligible().then_some(p)
            })
            .collect();

        Self {
            persons,
            taken_at: Instant::now(),
            fetched_at: Utc::now(),
        }
    }

    pub fn persons(&self) -> &[PersonRecord] {
        &self.persons
    }

    pub fn is_empty(&self) -> bool {
        self.persons.is_empty()
    }

    pub fn len(&self) -> usize {
        self.persons.len()
    }

    pub fn embedding_count(&self) -> usize {
        self.persons.iter().map(|p| p.embeddings.len()).sum()
    }

    pub fn age(&self) -> Duration {
        self.taken_at.elapsed()
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}

#[derive(Default)]
struct Slot {
    snapshot: Option<Arc<RegistrySnapshot>>,
    generation: u64,
}

pub struct RegistryCache {
    store: Arc<dyn RegistryStore>,
    ttl: Duration,
    current: RwLock<Slot>,
    refresh: tokio::sync::Mutex<()>,
}

impl RegistryCache {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

    pub fn new(store: Arc<dyn RegistryStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            current: RwLock::new(Slot::default()),
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    fn fresh(&self) -> Option<Arc<RegistrySnapshot>> {
        self.current
            .read()
            .snapshot
            .as_ref()
            .filter(|s| s.age() < self.ttl)
            .cloned()
    }

    /// Current snapshot, refreshed from the store when missing or older than the TTL.
    pub async fn get(&self) -> Result<Arc<RegistrySnapshot>, MatchError> {
        if let Some(snapshot) = self.fresh() {
            return Ok(snapshot);
        }

        let _guard = self.refresh.lock().await;
        if let Some(snapshot) = self.fresh() {
            return Ok(snapshot);
        }

        let generation = self.current.read().generation;
        let persons = self.store.fetch_eligible().await.map_err(|e| {
            tracing::error!(error = %e, "Registry fetch failed");
            MatchError::RegistryUnavailable(e.to_string())
        })?;

        let snapshot = Arc::new(RegistrySnapshot::new(persons));
        {
            let mut slot = self.current.write();
            if slot.generation == generation {
                slot.snapshot = Some(Arc::clone(&snapshot));
            }
        }

        tracing::debug!(
            persons = snapshot.len(),
            embeddings = snapshot.embedding_count(),
            "Registry snapshot refreshed"
        );
        Ok(snapshot)
    }

    /// Discard the current snapshot; the next `get()` refetches.
    pub fn invalidate(&self) {
        {
            let mut slot = self.current.write();
            slot.generation += 1;
            slot.snapshot = None;
        }
        tracing::debug!("Registry cache invalidated");
    }

    /// The installed snapshot, if any, without triggering a refresh.
    pub fn peek(&self) -> Option<Arc<RegistrySnapshot>> {
        self.current.read().snapshot.clone()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

// ============================================================================
// Postgres registry store
// ============================================================================

#[derive(sqlx::FromRow)]
struct EligibleRow {
    person_id: Uuid,
    name: String,
    status: String,
    priority: String,
    encoding: Vector,
    uploaded_at: DateTime<Utc>,
}

pub struct PgRegistryStore {
    pool: PgPool,
}

impl PgRegistryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RegistryStore for PgRegistryStore {
    async fn fetch_eligible(&self) -> Result<Vec<PersonRecord>, VigilError> {
        let rows: Vec<EligibleRow> = sqlx::query_as(
            r#"
            SELECT p.id AS person_id, p.name, p.status, p.priority,
                   e.encoding, e.uploaded_at
            FROM persons p
            JOIN person_embeddings e ON e.person_id = p.id
            WHERE p.is_active AND p.status = 'missing'
            ORDER BY p.created_at, p.id, e.uploaded_at, e.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(group_rows(rows))
    }
}

/// Fold joined person/embedding rows into records, keeping query order.
fn group_rows(rows: Vec<EligibleRow>) -> Vec<PersonRecord> {
    let mut persons: Vec<PersonRecord> = Vec::new();

    for row in rows {
        let embedding = StoredEmbedding {
            vector: row.encoding.to_vec(),
            uploaded_at: row.uploaded_at,
        };

        match persons.last_mut() {
            Some(last) if last.id == row.person_id => last.embeddings.push(embedding),
            _ => {
                let status = match row.status.parse() {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!(person_id = %row.person_id, error = %e, "Skipping person row");
                        continue;
                    }
                };
                persons.push(PersonRecord {
                    id: row.person_id,
                    name: row.name,
                    status,
                    priority: row.priority.parse().unwrap_or(crate::models::Priority::Medium),
                    embeddings: vec![embedding],
                });
            }
        }
    }

    persons
}
