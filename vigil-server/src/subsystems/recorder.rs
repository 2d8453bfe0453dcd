//! Detection recorder: turns a qualifying match into a persisted report.
//!
//! Camera identity is resolved against the camera directory when one is supplied.
//! Resolution failures are logged and fall back to the capture metadata, then to
//! "Unknown Camera" / "Unknown Location"; they never block recording.
//! Each call creates a distinct report. Repeated detections of the same person
//! are not deduplicated here.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use vigil_core::models::report::{UNKNOWN_CAMERA, UNKNOWN_CAMERA_ID, UNKNOWN_LOCATION};
use vigil_core::models::{CameraInfo, CaptureMetadata, DetectionReport, NewReport};
use vigil_core::{Embedding, MatchCandidate, MatchError, VigilError};

use crate::subsystems::reports::ReportStore;

#[async_trait]
pub trait CameraDirectory: Send + Sync {
    /// Resolve an external camera id. `Ok(None)` means not found.
    async fn resolve(&self, camera_id: &str) -> Result<Option<CameraInfo>, VigilError>;
}

pub struct PgCameraDirectory {
    pool: PgPool,
}

impl PgCameraDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CameraDirectory for PgCameraDirectory {
    async fn resolve(&self, camera_id: &str) -> Result<Option<CameraInfo>, VigilError> {
        let camera = sqlx::query_as::<_, CameraInfo>(
            "SELECT id, camera_id, name, location FROM cameras WHERE camera_id = $1",
        )
        .bind(camera_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(camera)
    }
}

pub struct DetectionRecorder {
    cameras: Arc<dyn CameraDirectory>,
    reports: Arc<dyn ReportStore>,
}

impl DetectionRecorder {
    pub fn new(cameras: Arc<dyn CameraDirectory>, reports: Arc<dyn ReportStore>) -> Self {
        Self { cameras, reports }
    }

    pub async fn record(
        &self,
        candidate: &MatchCandidate,
        query: &Embedding,
        metadata: &CaptureMetadata,
    ) -> Result<DetectionReport, MatchError> {
        let camera = self.resolve_camera(metadata).await;
        let new = build_report(candidate, query, metadata, camera.as_ref());

        let report = self.reports.insert(new).await.map_err(|e| {
            tracing::error!(
                person_id = %candidate.person_id,
                error = %e,
                "Failed to persist detection report"
            );
            MatchError::PersistenceFailure(e.to_string())
        })?;

        tracing::info!(
            report_id = %report.id,
            person_id = %report.person_id,
            similarity = report.similarity,
            camera = %report.camera_name,
            "Detection recorded"
        );
        Ok(report)
    }

    async fn resolve_camera(&self, metadata: &CaptureMetadata) -> Option<CameraInfo> {
        let camera_id = metadata.camera_id.as_deref().filter(|c| !c.is_empty())?;
        match self.cameras.resolve(camera_id).await {
            Ok(Some(camera)) => Some(camera),
            Ok(None) => {
                tracing::debug!(camera_id, "Camera not registered, using metadata names");
                None
            }
            Err(e) => {
                tracing::warn!(camera_id, error = %e, "Camera resolution failed, using metadata names");
                None
            }
        }
    }
}

fn build_report(
    candidate: &MatchCandidate,
    query: &Embedding,
    metadata: &CaptureMetadata,
    camera: Option<&CameraInfo>,
) -> NewReport {
    let camera_name = camera
        .map(|c| c.name.clone())
        .or_else(|| metadata.camera_name.clone())
        .unwrap_or_else(|| UNKNOWN_CAMERA.to_string());
    let camera_location = camera
        .map(|c| c.location.clone())
        .or_else(|| metadata.camera_location.clone())
        .unwrap_or_else(|| UNKNOWN_LOCATION.to_string());

    NewReport {
        person_id: candidate.person_id,
        person_name: candidate.name.clone(),
        similarity: candidate.similarity,
        detection_confidence: metadata.detection_confidence,
        face_encoding: query.to_vec(),
        camera_id: metadata
            .camera_id
            .clone()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| UNKNOWN_CAMERA_ID.to_string()),
        camera_ref: camera.map(|c| c.id),
        camera_name,
        camera_location,
        location: metadata.location.clone(),
        captured_at: metadata.captured_at(Utc::now()),
        bbox: metadata.bbox,
    }
}
