use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const UNKNOWN_CAMERA: &str = "Unknown Camera";
pub const UNKNOWN_LOCATION: &str = "Unknown Location";
pub const UNKNOWN_CAMERA_ID: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Confirmed,
    FalsePositive,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Confirmed => "confirmed",
            VerificationStatus::FalsePositive => "false_positive",
        }
    }
}

impl FromStr for VerificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(VerificationStatus::Pending),
            "confirmed" => Ok(VerificationStatus::Confirmed),
            "false_positive" => Ok(VerificationStatus::FalsePositive),
            other => Err(format!("unknown verification status '{}'", other)),
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel that carried an alert to at least one observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMethod {
    Fcm,
    Socket,
}

impl AlertMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertMethod::Fcm => "fcm",
            AlertMethod::Socket => "socket",
        }
    }
}

impl FromStr for AlertMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fcm" => Ok(AlertMethod::Fcm),
            "socket" => Ok(AlertMethod::Socket),
            other => Err(format!("unknown alert method '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Delivered,
    Degraded,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Delivered => "delivered",
            AlertStatus::Degraded => "degraded",
        }
    }
}

impl FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delivered" => Ok(AlertStatus::Delivered),
            "degraded" => Ok(AlertStatus::Degraded),
            other => Err(format!("unknown alert status '{}'", other)),
        }
    }
}

/// Alert-delivery bookkeeping written back once dispatch completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertDelivery {
    pub sent: bool,
    pub sent_at: Option<DateTime<Utc>>,
    pub method: Option<AlertMethod>,
    pub status: AlertStatus,
    pub delivered: u32,
    pub failed: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl From<[f64; 4]> for BoundingBox {
    fn from(b: [f64; 4]) -> Self {
        Self {
            x1: b[0],
            y1: b[1],
            x2: b[2],
            y2: b[3],
        }
    }
}

/// Bounding box as camera agents send it: `[x1, y1, x2, y2]` or `{x1, y1, x2, y2}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawBox {
    Corners([f64; 4]),
    Named(BoundingBox),
}

/// Capture time as text (RFC 3339 or naive ISO) or as a Unix epoch number.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Epoch(f64),
    Text(String),
}

/// Epoch values at or above this are milliseconds.
const EPOCH_MILLIS_FLOOR: f64 = 1e11;

impl RawTimestamp {
    fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            RawTimestamp::Epoch(n) if !n.is_finite() || *n < 0.0 => None,
            RawTimestamp::Epoch(n) if *n >= EPOCH_MILLIS_FLOOR => {
                DateTime::from_timestamp_millis(*n as i64)
            }
            RawTimestamp::Epoch(n) => {
                DateTime::from_timestamp(n.trunc() as i64, (n.fract() * 1e9) as u32)
            }
            RawTimestamp::Text(raw) => DateTime::parse_from_rfc3339(raw)
                .map(|t| t.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                        .ok()
                        .map(|t| t.and_utc())
                }),
        }
    }
}

/// Camera ids arrive as strings or bare numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(serde_json::Number),
}

/// Capture details supplied with a match request, parsed field by field.
///
/// Metadata never fails a match: a field of the wrong shape is logged and
/// dropped while the rest are kept. Both camelCase and the snake_case keys sent
/// by camera agents are accepted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureMetadata {
    pub camera_id: Option<String>,
    pub camera_name: Option<String>,
    pub camera_location: Option<String>,
    pub location: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub bbox: Option<BoundingBox>,
    pub detection_confidence: Option<f64>,
}

impl CaptureMetadata {
    pub fn from_value(value: &serde_json::Value) -> Self {
        let Some(fields) = value.as_object() else {
            if !value.is_null() {
                tracing::warn!("Ignoring capture metadata that is not an object");
            }
            return Self::default();
        };

        let timestamp = field::<RawTimestamp>(fields, "timestamp", "timestamp").and_then(|raw| {
            let parsed = raw.to_utc();
            if parsed.is_none() {
                tracing::warn!("Ignoring unparseable capture timestamp");
            }
            parsed
        });

        Self {
            camera_id: field::<RawId>(fields, "cameraId", "camera_id").map(|id| match id {
                RawId::Text(s) => s,
                RawId::Number(n) => n.to_string(),
            }),
            camera_name: field(fields, "cameraName", "camera_name"),
            camera_location: field(fields, "cameraLocation", "camera_location"),
            location: field(fields, "location", "location"),
            timestamp,
            bbox: field::<RawBox>(fields, "bbox", "bbox").map(|b| match b {
                RawBox::Corners(c) => BoundingBox::from(c),
                RawBox::Named(b) => b,
            }),
            detection_confidence: field(fields, "detectionConfidence", "detection_confidence"),
        }
    }

    /// Capture time, or `now` when none was supplied.
    pub fn captured_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.timestamp.unwrap_or(now)
    }
}

/// Look a field up under either key. Missing and null are `None`; a value of
/// the wrong shape is dropped with a warning.
fn field<T: DeserializeOwned>(
    fields: &serde_json::Map<String, serde_json::Value>,
    camel: &str,
    snake: &str,
) -> Option<T> {
    let value = fields
        .get(camel)
        .or_else(|| fields.get(snake))
        .filter(|v| !v.is_null())?;
    match T::deserialize(value) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::warn!(field = camel, error = %e, "Ignoring malformed capture metadata field");
            None
        }
    }
}

/// Fields of a detection report as created by the recorder.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReport {
    pub person_id: Uuid,
    pub person_name: String,
    pub similarity: f64,
    pub detection_confidence: Option<f64>,
    pub face_encoding: Vec<f32>,
    pub camera_id: String,
    pub camera_ref: Option<Uuid>,
    pub camera_name: String,
    pub camera_location: String,
    pub location: Option<String>,
    pub captured_at: DateTime<Utc>,
    pub bbox: Option<BoundingBox>,
}

/// A persisted detection. Created once per qualifying match, afterwards only
/// touched by verification and alert bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionReport {
    pub id: Uuid,
    pub person_id: Uuid,
    pub person_name: String,
    pub similarity: f64,
    pub detection_confidence: Option<f64>,
    #[serde(skip_serializing)]
    pub face_encoding: Vec<f32>,
    pub camera_id: String,
    pub camera_ref: Option<Uuid>,
    pub camera_name: String,
    pub camera_location: String,
    pub location: Option<String>,
    pub captured_at: DateTime<Utc>,
    pub bbox: Option<BoundingBox>,
    pub verification_status: VerificationStatus,
    pub verified_at: Option<DateTime<Utc>>,
    pub alert_sent: bool,
    pub alert_details: Option<AlertDelivery>,
    pub created_at: DateTime<Utc>,
}

impl DetectionReport {
    /// A freshly created report: pending verification, no alert sent yet.
    pub fn from_new(id: Uuid, new: NewReport, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            person_id: new.person_id,
            person_name: new.person_name,
            similarity: new.similarity,
            detection_confidence: new.detection_confidence,
            face_encoding: new.face_encoding,
            camera_id: new.camera_id,
            camera_ref: new.camera_ref,
            camera_name: new.camera_name,
            camera_location: new.camera_location,
            location: new.location,
            captured_at: new.captured_at,
            bbox: new.bbox,
            verification_status: VerificationStatus::Pending,
            verified_at: None,
            alert_sent: false,
            alert_details: None,
            created_at,
        }
    }
}

/// Broadcast projection of a report. Never persisted on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub report_id: Uuid,
    pub person_id: Uuid,
    pub person_name: String,
    pub similarity: f64,
    pub camera_id: String,
    pub camera_name: String,
    pub camera_location: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&DetectionReport> for AlertEvent {
    fn from(r: &DetectionReport) -> Self {
        Self {
            report_id: r.id,
            person_id: r.person_id,
            person_name: r.person_name.clone(),
            similarity: r.similarity,
            camera_id: r.camera_id.clone(),
            camera_name: r.camera_name.clone(),
            camera_location: r.camera_location.clone(),
            timestamp: r.captured_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn metadata_accepts_snake_and_camel_keys() {
        let snake = CaptureMetadata::from_value(&json!({
            "camera_id": "cam-1",
            "camera_name": "Gate",
            "detection_confidence": 0.9,
            "bbox": [1.0, 2.0, 3.0, 4.0]
        }));
        assert_eq!(snake.camera_id.as_deref(), Some("cam-1"));
        assert_eq!(snake.camera_name.as_deref(), Some("Gate"));
        assert_eq!(snake.detection_confidence, Some(0.9));
        assert_eq!(snake.bbox.map(|b| b.x2), Some(3.0));

        let camel = CaptureMetadata::from_value(&json!({
            "cameraId": "cam-2",
            "cameraLocation": "Lobby"
        }));
        assert_eq!(camel.camera_id.as_deref(), Some("cam-2"));
        assert_eq!(camel.camera_location.as_deref(), Some("Lobby"));
    }

    #[test]
    fn bbox_accepts_corner_object() {
        let m = CaptureMetadata::from_value(&json!({
            "bbox": { "x1": 10, "y1": 20, "x2": 110, "y2": 140 }
        }));
        assert_eq!(
            m.bbox,
            Some(BoundingBox {
                x1: 10.0,
                y1: 20.0,
                x2: 110.0,
                y2: 140.0
            })
        );
    }

    #[test]
    fn malformed_fields_are_dropped_individually() {
        let m = CaptureMetadata::from_value(&json!({
            "camera_id": 7,
            "camera_name": ["not", "a", "name"],
            "location": "Platform 2",
            "bbox": [1, 2, 3],
            "detection_confidence": "high",
            "timestamp": { "when": "now" }
        }));
        assert_eq!(m.camera_id.as_deref(), Some("7"));
        assert_eq!(m.camera_name, None);
        assert_eq!(m.location.as_deref(), Some("Platform 2"));
        assert_eq!(m.bbox, None);
        assert_eq!(m.detection_confidence, None);
        assert_eq!(m.timestamp, None);

        assert_eq!(CaptureMetadata::from_value(&json!("cam-1")), CaptureMetadata::default());
        assert_eq!(CaptureMetadata::from_value(&json!(null)), CaptureMetadata::default());
    }

    #[test]
    fn captured_at_parses_text_and_epoch() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let at = |timestamp: serde_json::Value| {
            CaptureMetadata::from_value(&json!({ "timestamp": timestamp })).captured_at(now)
        };

        assert_eq!(
            at(json!("2025-06-01T12:30:00+02:00")),
            Utc.with_ymd_and_hms(2025, 6, 1, 10, 30, 0).unwrap()
        );
        assert_eq!(at(json!("2025-06-01T12:30:00.250")).timestamp(), 1748781000);
        assert_eq!(at(json!(1700000000)).timestamp(), 1700000000);
        assert_eq!(at(json!(1700000000123i64)).timestamp_millis(), 1700000000123);
        assert_eq!(at(json!(1700000000.5)).timestamp_millis(), 1700000000500);
        assert_eq!(at(json!("yesterday")), now);
        assert_eq!(at(json!(-5)), now);
        assert_eq!(CaptureMetadata::default().captured_at(now), now);
    }

    #[test]
    fn new_report_starts_pending_without_alert() {
        let new = NewReport {
            person_id: Uuid::new_v4(),
            person_name: "A".to_string(),
            similarity: 0.8,
            detection_confidence: None,
            face_encoding: vec![0.0; 128],
            camera_id: UNKNOWN_CAMERA_ID.to_string(),
            camera_ref: None,
            camera_name: UNKNOWN_CAMERA.to_string(),
            camera_location: UNKNOWN_LOCATION.to_string(),
            location: None,
            captured_at: Utc::now(),
            bbox: None,
        };
        let report = DetectionReport::from_new(Uuid::new_v4(), new, Utc::now());
        assert_eq!(report.verification_status, VerificationStatus::Pending);
        assert!(!report.alert_sent);
        assert!(report.alert_details.is_none());

        let event = AlertEvent::from(&report);
        assert_eq!(event.report_id, report.id);
        assert_eq!(event.camera_name, UNKNOWN_CAMERA);
    }

    #[test]
    fn verification_status_text() {
        assert_eq!(
            "false_positive".parse::<VerificationStatus>().unwrap(),
            VerificationStatus::FalsePositive
        );
        assert_eq!(VerificationStatus::Confirmed.to_string(), "confirmed");
    }
}
