//! Push notification delivery.
//!
//! Provides a `PushBackend` trait with an FCM HTTP v1 implementation. Each call
//! delivers to a single device token; the dispatcher fans out and bounds latency.
//! Transient failures (transport errors, 429, 5xx) are retried a bounded number
//! of times; `UNREGISTERED` / `INVALID_ARGUMENT` map to `PushError::InvalidToken`
//! so the caller can prune the registration.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use vigil_core::config::AlertsConfig;
use vigil_core::models::DetectionReport;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

impl PushMessage {
    /// Summary of a detection, as shown on operator devices.
    pub fn for_report(report: &DetectionReport) -> Self {
        let mut data = BTreeMap::new();
        data.insert("reportId".to_string(), report.id.to_string());
        data.insert("personId".to_string(), report.person_id.to_string());
        data.insert("personName".to_string(), report.person_name.clone());
        data.insert("similarity".to_string(), report.similarity.to_string());
        data.insert("cameraName".to_string(), report.camera_name.clone());
        data.insert("cameraLocation".to_string(), report.camera_location.clone());
        data.insert("timestamp".to_string(), report.captured_at.to_rfc3339());

        Self {
            title: "Person Identified".to_string(),
            body: format!(
                "{} detected with {:.1}% similarity at {}",
                report.person_name,
                report.similarity * 100.0,
                report.camera_location
            ),
            data,
        }
    }
}

#[derive(Error, Debug)]
pub enum PushError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Device token rejected: {0}")]
    InvalidToken(String),

    #[error("Delivery timed out")]
    Timeout,

    #[error("Push delivery is not configured")]
    NotConfigured,
}

impl PushError {
    pub fn is_transient(&self) -> bool {
        match self {
            PushError::Http(_) | PushError::Timeout => true,
            PushError::Api { code, .. } => *code == 429 || (500..600).contains(code),
            PushError::InvalidToken(_) | PushError::NotConfigured => false,
        }
    }

    pub fn is_invalid_token(&self) -> bool {
        matches!(self, PushError::InvalidToken(_))
    }
}

#[async_trait]
pub trait PushBackend: Send + Sync {
    /// Deliver `message` to one device token.
    async fn send(&self, message: &PushMessage, token: &str) -> Result<(), PushError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// FCM wire structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct FcmRequest<'a> {
    message: FcmMessage<'a>,
}

#[derive(Debug, Serialize)]
struct FcmMessage<'a> {
    token: &'a str,
    notification: FcmNotification<'a>,
    data: &'a BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct FcmNotification<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Debug, Deserialize)]
struct FcmErrorResponse {
    error: Option<FcmErrorBody>,
}

#[derive(Debug, Deserialize)]
struct FcmErrorBody {
    code: u16,
    message: String,
    #[serde(default)]
    details: Vec<FcmErrorDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FcmErrorDetail {
    #[serde(default)]
    error_code: Option<String>,
}

// ============================================================================
// FcmPushClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct FcmConfig {
    pub project_id: String,
    pub access_token: String,
    pub base_url: String,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl FcmConfig {
    /// Build from `[alerts]`; the access token falls back to `FCM_ACCESS_TOKEN`.
    /// Returns `None` when no project or token is available.
    pub fn from_alerts(alerts: &AlertsConfig) -> Option<Self> {
        let project_id = alerts.fcm_project_id.clone().filter(|p| !p.is_empty())?;
        let access_token = alerts
            .fcm_access_token
            .clone()
            .or_else(|| std::env::var("FCM_ACCESS_TOKEN").ok())
            .filter(|t| !t.is_empty())?;

        Some(Self {
            project_id,
            access_token,
            base_url: alerts.fcm_base_url.clone(),
            max_retries: alerts.max_retries,
            retry_delay_ms: 200,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FcmPushClient {
    client: Client,
    config: FcmConfig,
}

impl FcmPushClient {
    pub fn new(config: FcmConfig) -> Result<Self, PushError> {
        if config.access_token.is_empty() || config.project_id.is_empty() {
            return Err(PushError::NotConfigured);
        }

        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self { client, config })
    }

    async fn send_once(&self, message: &PushMessage, token: &str) -> Result<(), PushError> {
        let url = format!(
            "{}/v1/projects/{}/messages:send",
            self.config.base_url, self.config.project_id
        );

        let request = FcmRequest {
            message: FcmMessage {
                token,
                notification: FcmNotification {
                    title: &message.title,
                    body: &message.body,
                },
                data: &message.data,
            },
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.access_token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let error_body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<FcmErrorResponse>(&error_body)
            .ok()
            .and_then(|e| e.error);

        let Some(detail) = detail else {
            return Err(PushError::Api {
                code: status.as_u16(),
                message: error_body,
            });
        };

        let error_code = detail.details.iter().find_map(|d| d.error_code.clone());
        match error_code.as_deref() {
            Some(code @ ("UNREGISTERED" | "INVALID_ARGUMENT")) => {
                Err(PushError::InvalidToken(code.to_string()))
            }
            _ => Err(PushError::Api {
                code: detail.code,
                message: detail.message,
            }),
        }
    }
}

#[async_trait]
impl PushBackend for FcmPushClient {
    async fn send(&self, message: &PushMessage, token: &str) -> Result<(), PushError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(2))
            .map(jitter)
            .take(self.config.max_retries);

        RetryIf::spawn(
            retry_strategy,
            || self.send_once(message, token),
            |e: &PushError| e.is_transient(),
        )
        .await
    }

    fn name(&self) -> &str {
        "fcm"
    }
}

/// Build the push backend from config, or `None` when push is not configured.
pub fn create_push_backend(alerts: &AlertsConfig) -> Option<Arc<dyn PushBackend>> {
    let Some(config) = FcmConfig::from_alerts(alerts) else {
        tracing::warn!("FCM not configured, push notifications disabled");
        return None;
    };

    match FcmPushClient::new(config) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to create FCM client, push notifications disabled");
            None
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;
    use vigil_core::models::NewReport;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String) -> FcmConfig {
        FcmConfig {
            project_id: "vigil-test".to_string(),
            access_token: "test-token".to_string(),
            base_url,
            max_retries: 2,
            retry_delay_ms: 10,
        }
    }

    fn report() -> DetectionReport {
        DetectionReport::from_new(
            Uuid::new_v4(),
            NewReport {
                person_id: Uuid::new_v4(),
                person_name: "Jane Doe".to_string(),
                similarity: 0.8234,
                detection_confidence: None,
                face_encoding: vec![0.0; 128],
                camera_id: "cam-1".to_string(),
                camera_ref: None,
                camera_name: "North Gate".to_string(),
                camera_location: "Station Road".to_string(),
                location: None,
                captured_at: Utc::now(),
                bbox: None,
            },
            Utc::now(),
        )
    }

    fn unregistered() -> serde_json::Value {
        serde_json::json!({
            "error": {
                "code": 404,
                "message": "Requested entity was not found.",
                "status": "NOT_FOUND",
                "details": [{
                    "@type": "type.googleapis.com/google.firebase.fcm.v1.FcmError",
                    "errorCode": "UNREGISTERED"
                }]
            }
        })
    }

    #[test]
    fn message_summarises_the_detection() {
        let r = report();
        let m = PushMessage::for_report(&r);
        assert_eq!(m.title, "Person Identified");
        assert_eq!(m.body, "Jane Doe detected with 82.3% similarity at Station Road");
        assert_eq!(m.data["reportId"], r.id.to_string());
        assert_eq!(m.data["cameraName"], "North Gate");
    }

    #[tokio::test]
    async fn send_posts_v1_message_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/vigil-test/messages:send"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "projects/vigil-test/messages/1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = FcmPushClient::new(test_config(server.uri())).unwrap();
        let result = client.send(&PushMessage::for_report(&report()), "device-1").await;
        assert!(result.is_ok(), "Expected Ok, got {:?}", result.err());
    }

    #[tokio::test]
    async fn unregistered_token_is_invalid_and_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_json(unregistered()))
            .expect(1)
            .mount(&server)
            .await;

        let client = FcmPushClient::new(test_config(server.uri())).unwrap();
        let err = client
            .send(&PushMessage::for_report(&report()), "stale")
            .await
            .unwrap_err();
        assert!(err.is_invalid_token(), "got {:?}", err);
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_json(serde_json::json!({
                "error": { "code": 503, "message": "unavailable" }
            })))
            .expect(3)
            .mount(&server)
            .await;

        let client = FcmPushClient::new(test_config(server.uri())).unwrap();
        let err = client
            .send(&PushMessage::for_report(&report()), "device-1")
            .await
            .unwrap_err();
        assert!(matches!(err, PushError::Api { code: 503, .. }));
    }

    #[tokio::test]
    async fn retries_on_429_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "code": 429, "message": "quota" }
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let client = FcmPushClient::new(test_config(server.uri())).unwrap();
        assert!(client
            .send(&PushMessage::for_report(&report()), "device-1")
            .await
            .is_ok());
    }

    #[test]
    fn missing_credentials_are_not_configured() {
        let mut config = test_config("http://localhost".to_string());
        config.access_token.clear();
        assert!(matches!(
            FcmPushClient::new(config),
            Err(PushError::NotConfigured)
        ));
    }

    #[test]
    fn alerts_without_project_disable_push() {
        let alerts = AlertsConfig::default();
        assert!(FcmConfig::from_alerts(&alerts).is_none());
        assert!(create_push_backend(&alerts).is_none());
    }

    #[test]
    fn transient_classification() {
        assert!(PushError::Timeout.is_transient());
        assert!(PushError::Api { code: 500, message: String::new() }.is_transient());
        assert!(!PushError::Api { code: 400, message: String::new() }.is_transient());
        assert!(!PushError::InvalidToken("UNREGISTERED".to_string()).is_transient());
    }
}
