use serde::{Deserialize, Serialize};

/// One item of a match request. Encoding and metadata stay untyped until
/// validation, so a malformed vector becomes a per-item error and malformed
/// metadata is dropped field by field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchItem {
    #[serde(default)]
    pub encoding: serde_json::Value,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum VigilRequest {
    Ping,
    Health,
    Match {
        encoding: serde_json::Value,
        #[serde(default)]
        metadata: Option<serde_json::Value>,
    },
    MatchBatch {
        items: Vec<MatchItem>,
    },
    Invalidate,
    Verify {
        id: uuid::Uuid,
        verification_status: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VigilResponse {
    pub status: String,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub version: String,
}

impl VigilResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            status: "ok".to_string(),
            data: Some(data),
            error: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(msg.into()),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn pong() -> Self {
        Self::ok(serde_json::json!({"pong": true}))
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_tags_are_snake_case() {
        let req: VigilRequest = serde_json::from_value(serde_json::json!({
            "action": "match_batch",
            "items": [{"encoding": [0.1, 0.2]}]
        }))
        .unwrap();
        match req {
            VigilRequest::MatchBatch { items } => {
                assert_eq!(items.len(), 1);
                assert!(items[0].metadata.is_none());
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn msgpack_round_trip_keeps_untyped_encoding() {
        let req = VigilRequest::Match {
            encoding: serde_json::json!([0.5, 0.25]),
            metadata: None,
        };
        let bytes = rmp_serde::to_vec_named(&req).unwrap();
        let back: VigilRequest = rmp_serde::from_slice(&bytes).unwrap();
        match back {
            VigilRequest::Match { encoding, .. } => {
                assert_eq!(encoding, serde_json::json!([0.5, 0.25]))
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn response_constructors() {
        assert!(VigilResponse::pong().is_ok());
        let e = VigilResponse::err("boom");
        assert!(!e.is_ok());
        assert_eq!(e.error.as_deref(), Some("boom"));
    }
}
