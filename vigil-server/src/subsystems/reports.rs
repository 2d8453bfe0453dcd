//! Detection report persistence and verification.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::types::Json;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;
use vigil_core::models::{
    AlertDelivery, AlertMethod, AlertStatus, BoundingBox, DetectionReport, NewReport,
    VerificationStatus,
};
use vigil_core::VigilError;

#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Persist a new report. Returned reports are `pending` with no alert sent.
    async fn insert(&self, report: NewReport) -> Result<DetectionReport, VigilError>;

    async fn record_alert(&self, id: Uuid, delivery: &AlertDelivery) -> Result<(), VigilError>;

    async fn get(&self, id: Uuid) -> Result<Option<DetectionReport>, VigilError>;

    async fn set_verification(
        &self,
        id: Uuid,
        status: VerificationStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<DetectionReport>, VigilError>;
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Invalid verification status: {0}")]
    InvalidStatus(String),

    #[error("Report {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Store(#[from] VigilError),
}

/// Mark a report `confirmed` or `false_positive`. `pending` is not a valid target.
pub async fn verify_report(
    store: &dyn ReportStore,
    id: Uuid,
    status: &str,
) -> Result<DetectionReport, ReportError> {
    let status = match status.parse::<VerificationStatus>() {
        Ok(VerificationStatus::Pending) | Err(_) => {
            return Err(ReportError::InvalidStatus(status.to_string()))
        }
        Ok(s) => s,
    };

    let report = store
        .set_verification(id, status, Utc::now())
        .await?
        .ok_or(ReportError::NotFound(id))?;

    tracing::info!(report_id = %id, status = %status, "Report verification updated");
    Ok(report)
}

// ============================================================================
// Postgres report store
// ============================================================================

const REPORT_COLUMNS: &str = r#"
    id, person_id, person_name, similarity, detection_confidence, face_encoding,
    camera_id, camera_ref, camera_name, camera_location, location, captured_at, bbox,
    verification_status, verified_at, alert_sent, alert_sent_at, alert_method,
    alert_status, alert_delivered, alert_failed, created_at
"#;

#[derive(sqlx::FromRow)]
struct ReportRow {
    id: Uuid,
    person_id: Uuid,
    person_name: String,
    similarity: f64,
    detection_confidence: Option<f64>,
    face_encoding: Vector,
    camera_id: String,
    camera_ref: Option<Uuid>,
    camera_name: String,
    camera_location: String,
    location: Option<String>,
    captured_at: DateTime<Utc>,
    bbox: Option<Json<BoundingBox>>,
    verification_status: String,
    verified_at: Option<DateTime<Utc>>,
    alert_sent: bool,
    alert_sent_at: Option<DateTime<Utc>>,
    alert_method: Option<String>,
    alert_status: Option<String>,
    alert_delivered: i32,
    alert_failed: i32,
    created_at: DateTime<Utc>,
}

impl TryFrom<ReportRow> for DetectionReport {
    type Error = VigilError;

    fn try_from(row: ReportRow) -> Result<Self, Self::Error> {
        let verification_status = row
            .verification_status
            .parse::<VerificationStatus>()
            .map_err(VigilError::Other)?;

        let alert_details = match row.alert_status {
            Some(status) => Some(AlertDelivery {
                sent: row.alert_sent,
                sent_at: row.alert_sent_at,
                method: row
                    .alert_method
                    .map(|m| m.parse::<AlertMethod>())
                    .transpose()
                    .map_err(VigilError::Other)?,
                status: status.parse::<AlertStatus>().map_err(VigilError::Other)?,
                delivered: row.alert_delivered.max(0) as u32,
                failed: row.alert_failed.max(0) as u32,
            }),
            None => None,
        };

        Ok(DetectionReport {
            id: row.id,
            person_id: row.person_id,
            person_name: row.person_name,
            similarity: row.similarity,
            detection_confidence: row.detection_confidence,
            face_encoding: row.face_encoding.to_vec(),
            camera_id: row.camera_id,
            camera_ref: row.camera_ref,
            camera_name: row.camera_name,
            camera_location: row.camera_location,
            location: row.location,
            captured_at: row.captured_at,
            bbox: row.bbox.map(|b| b.0),
            verification_status,
            verified_at: row.verified_at,
            alert_sent: row.alert_sent,
            alert_details,
            created_at: row.created_at,
        })
    }
}

pub struct PgReportStore {
    pool: PgPool,
}

impl PgReportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReportStore for PgReportStore {
    async fn insert(&self, report: NewReport) -> Result<DetectionReport, VigilError> {
        let (id, created_at): (Uuid, DateTime<Utc>) = sqlx::query_as(
            r#"
            INSERT INTO detection_reports (
                person_id, person_name, similarity, detection_confidence, face_encoding,
                camera_id, camera_ref, camera_name, camera_location, location,
                captured_at, bbox
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING id, created_at
            "#,
        )
        .bind(report.person_id)
        .bind(&report.person_name)
        .bind(report.similarity)
        .bind(report.detection_confidence)
        .bind(Vector::from(report.face_encoding.clone()))
        .bind(&report.camera_id)
        .bind(report.camera_ref)
        .bind(&report.camera_name)
        .bind(&report.camera_location)
        .bind(&report.location)
        .bind(report.captured_at)
        .bind(report.bbox.map(Json))
        .fetch_one(&self.pool)
        .await?;

        Ok(DetectionReport::from_new(id, report, created_at))
    }

    async fn record_alert(&self, id: Uuid, delivery: &AlertDelivery) -> Result<(), VigilError> {
        sqlx::query(
            r#"
            UPDATE detection_reports
            SET alert_sent = $2, alert_sent_at = $3, alert_method = $4,
                alert_status = $5, alert_delivered = $6, alert_failed = $7
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(delivery.sent)
        .bind(delivery.sent_at)
        .bind(delivery.method.map(|m| m.as_str()))
        .bind(delivery.status.as_str())
        .bind(delivery.delivered as i32)
        .bind(delivery.failed as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<DetectionReport>, VigilError> {
        let row: Option<ReportRow> = sqlx::query_as(&format!(
            "SELECT {} FROM detection_reports WHERE id = $1",
            REPORT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DetectionReport::try_from).transpose()
    }

    async fn set_verification(
        &self,
        id: Uuid,
        status: VerificationStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<DetectionReport>, VigilError> {
        let row: Option<ReportRow> = sqlx::query_as(&format!(
            "UPDATE detection_reports SET verification_status = $2, verified_at = $3 \
             WHERE id = $1 RETURNING {}",
            REPORT_COLUMNS
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DetectionReport::try_from).transpose()
    }
}
