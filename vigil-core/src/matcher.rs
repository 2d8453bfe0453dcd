//! Nearest-neighbour search of a query embedding against the registry snapshot.
//!
//! Selection keeps the single highest-scoring embedding whose similarity meets the
//! threshold (inclusive); on equal scores the first one encountered wins.
//!
//! Scanning stops early as soon as an embedding scores strictly above
//! [`NEAR_CERTAIN_CUTOFF`]. That cutoff is fixed and tuned independently of the
//! deployment threshold. It can return a candidate below the global best when a
//! higher score exists later in iteration order; above 0.95 both are treated as
//! the same identity. An early-exit hit must still meet the threshold, which only
//! matters for thresholds configured above the cutoff: there a score between the
//! cutoff and the threshold neither stops the scan nor becomes the result, where a
//! plain cutoff scan would stop on it and report no match.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::embedding::Embedding;
use crate::error::MatchError;
use crate::models::{PersonStatus, Priority};
use crate::registry::{RegistryCache, RegistrySnapshot};
use crate::similarity;

/// Similarity above which scanning stops immediately.
pub const NEAR_CERTAIN_CUTOFF: f64 = 0.95;

/// Default deployment threshold for a qualifying match.
pub const DEFAULT_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCandidate {
    pub person_id: Uuid,
    pub name: String,
    pub status: PersonStatus,
    pub priority: Priority,
    pub similarity: f64,
}

pub struct Matcher {
    cache: Arc<RegistryCache>,
    threshold: f64,
}

impl Matcher {
    pub fn new(cache: Arc<RegistryCache>, threshold: f64) -> Self {
        Self { cache, threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn cache(&self) -> &Arc<RegistryCache> {
        &self.cache
    }

    /// Match one raw query against the current snapshot.
    pub async fn find(&self, query: Vec<f32>) -> Result<Option<MatchCandidate>, MatchError> {
        let query = Embedding::new(query)?;
        let snapshot = self.cache.get().await?;
        find_best(&snapshot, &query, self.threshold)
    }

    /// Match several raw queries against one snapshot. Output order follows
    /// input order; an invalid item yields its own error without aborting the rest.
    pub async fn find_batch(
        &self,
        queries: Vec<Vec<f32>>,
    ) -> Result<Vec<Result<Option<MatchCandidate>, MatchError>>, MatchError> {
        let snapshot = self.cache.get().await?;
        Ok(queries
            .into_iter()
            .map(|q| {
                let query = Embedding::new(q)?;
                find_best(&snapshot, &query, self.threshold)
            })
            .collect())
    }
}

/// Score `query` against every stored embedding in `snapshot`.
pub fn find_best(
    snapshot: &RegistrySnapshot,
    query: &Embedding,
    threshold: f64,
) -> Result<Option<MatchCandidate>, MatchError> {
    let mut best: Option<MatchCandidate> = None;

    for person in snapshot.persons() {
        for stored in &person.embeddings {
            let similarity = similarity::score(query.as_slice(), &stored.vector)?;
            if similarity < threshold {
                continue;
            }

            let better = best.as_ref().map_or(true, |b| similarity > b.similarity);
            if better {
                best = Some(MatchCandidate {
                    person_id: person.id,
                    name: person.name.clone(),
                    status: person.status,
                    priority: person.priority,
                    similarity,
                });
            }

            if similarity > NEAR_CERTAIN_CUTOFF {
                return Ok(best);
            }
        }
    }

    Ok(best)
}
