//! Match pipeline: validate, match, record, then dispatch in the background.
//!
//! The response reports whether a qualifying match was found and whether it was
//! durably recorded. Alert delivery is never awaited here; callers that care
//! (tests, batch drains) can hold on to the returned `JoinHandle`.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;
use vigil_core::ipc::MatchItem;
use vigil_core::matcher::find_best;
use vigil_core::models::{CaptureMetadata, PersonStatus, Priority};
use vigil_core::{Embedding, MatchError, Matcher, RegistrySnapshot};

use crate::subsystems::dispatcher::{AlertDispatcher, DispatchOutcome};
use crate::subsystems::recorder::DetectionRecorder;

pub const NO_PERSONS_MESSAGE: &str = "No persons in database";
pub const NO_MATCH_MESSAGE: &str = "No matching person found";
pub const UNRECORDED_MESSAGE: &str = "Match found but the detection could not be recorded";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResponse {
    pub match_found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub person_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PersonStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recorded: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MatchResponse {
    pub fn no_match(message: &str) -> Self {
        Self {
            match_found: false,
            message: Some(message.to_string()),
            ..Default::default()
        }
    }

    /// Per-item failure inside a batch.
    pub fn failed(error: &MatchError) -> Self {
        Self {
            match_found: false,
            error: Some(error.to_string()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub results: Vec<MatchResponse>,
    pub total: usize,
    pub match_count: usize,
}

pub struct MatchRun {
    pub response: MatchResponse,
    pub dispatch: Option<JoinHandle<DispatchOutcome>>,
}

pub struct BatchRun {
    pub response: BatchResponse,
    pub dispatches: Vec<JoinHandle<DispatchOutcome>>,
}

pub struct MatchPipeline {
    matcher: Matcher,
    recorder: DetectionRecorder,
    dispatcher: Arc<AlertDispatcher>,
    alerts_enabled: bool,
    batch_concurrency: usize,
}

impl MatchPipeline {
    pub fn new(
        matcher: Matcher,
        recorder: DetectionRecorder,
        dispatcher: Arc<AlertDispatcher>,
        alerts_enabled: bool,
        batch_concurrency: usize,
    ) -> Self {
        Self {
            matcher,
            recorder,
            dispatcher,
            alerts_enabled,
            batch_concurrency: batch_concurrency.max(1),
        }
    }

    pub fn dispatcher(&self) -> &Arc<AlertDispatcher> {
        &self.dispatcher
    }

    pub async fn process(&self, item: MatchItem) -> Result<MatchResponse, MatchError> {
        Ok(self.run(item).await?.response)
    }

    /// Single match. Invalid encodings fail before the registry is consulted.
    pub async fn run(&self, item: MatchItem) -> Result<MatchRun, MatchError> {
        let query = Embedding::from_json(&item.encoding)?;
        let snapshot = self.matcher.cache().get().await?;
        self.run_against(&snapshot, query, metadata_of(&item))
            .await
    }

    pub async fn process_batch(&self, items: Vec<MatchItem>) -> Result<BatchResponse, MatchError> {
        Ok(self.run_batch(items).await?.response)
    }

    /// Batch match against one snapshot. Output order follows input order and a
    /// bad item only fails its own slot.
    pub async fn run_batch(&self, items: Vec<MatchItem>) -> Result<BatchRun, MatchError> {
        let prepared: Vec<(Result<Embedding, MatchError>, CaptureMetadata)> = items
            .into_iter()
            .map(|item| {
                (
                    Embedding::from_json(&item.encoding),
                    metadata_of(&item),
                )
            })
            .collect();
        let snapshot = self.matcher.cache().get().await?;
        let snapshot = &snapshot;

        let runs: Vec<Result<MatchRun, MatchError>> = stream::iter(prepared)
            .map(|(query, metadata)| async move {
                self.run_against(snapshot, query?, metadata).await
            })
            .buffered(self.batch_concurrency)
            .collect()
            .await;

        let total = runs.len();
        let mut results = Vec::with_capacity(total);
        let mut dispatches = Vec::new();
        for run in runs {
            match run {
                Ok(run) => {
                    results.push(run.response);
                    dispatches.extend(run.dispatch);
                }
                Err(e) => results.push(MatchResponse::failed(&e)),
            }
        }
        let match_count = results.iter().filter(|r| r.match_found).count();

        tracing::info!(total, match_count, "Batch match complete");
        Ok(BatchRun {
            response: BatchResponse {
                results,
                total,
                match_count,
            },
            dispatches,
        })
    }

    async fn run_against(
        &self,
        snapshot: &RegistrySnapshot,
        query: Embedding,
        metadata: CaptureMetadata,
    ) -> Result<MatchRun, MatchError> {
        if snapshot.is_empty() {
            return Ok(MatchRun {
                response: MatchResponse::no_match(NO_PERSONS_MESSAGE),
                dispatch: None,
            });
        }

        let Some(candidate) = find_best(snapshot, &query, self.matcher.threshold())? else {
            return Ok(MatchRun {
                response: MatchResponse::no_match(NO_MATCH_MESSAGE),
                dispatch: None,
            });
        };

        tracing::info!(
            person_id = %candidate.person_id,
            similarity = candidate.similarity,
            "Qualifying match"
        );

        let mut response = MatchResponse {
            match_found: true,
            person_id: Some(candidate.person_id),
            name: Some(candidate.name.clone()),
            similarity: Some(candidate.similarity),
            status: Some(candidate.status),
            priority: Some(candidate.priority),
            ..Default::default()
        };

        match self.recorder.record(&candidate, &query, &metadata).await {
            Ok(report) => {
                response.report_id = Some(report.id);
                response.recorded = Some(true);
                let dispatch = self.alerts_enabled.then(|| self.dispatcher.spawn(report));
                Ok(MatchRun { response, dispatch })
            }
            Err(MatchError::PersistenceFailure(reason)) => {
                response.recorded = Some(false);
                response.message = Some(UNRECORDED_MESSAGE.to_string());
                response.error = Some(reason);
                Ok(MatchRun {
                    response,
                    dispatch: None,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Drop the cached registry so the next match refetches.
    pub fn invalidate(&self) {
        self.matcher.cache().invalidate();
    }

    pub async fn registry_status(&self) -> Result<serde_json::Value, MatchError> {
        let snapshot = self.matcher.cache().get().await?;
        Ok(serde_json::json!({
            "persons": snapshot.len(),
            "embeddings": snapshot.embedding_count(),
            "fetchedAt": snapshot.fetched_at(),
            "ageSeconds": snapshot.age().as_secs_f64(),
            "ttlSeconds": self.matcher.cache().ttl().as_secs(),
            "threshold": self.matcher.threshold(),
        }))
    }
}

fn metadata_of(item: &MatchItem) -> CaptureMetadata {
    item.metadata
        .as_ref()
        .map(CaptureMetadata::from_value)
        .unwrap_or_default()
}
