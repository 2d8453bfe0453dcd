use crate::state::AppState;
use crate::subsystems::reports::verify_report;
use vigil_core::ipc::{MatchItem, VigilRequest, VigilResponse};

pub async fn handle_request(request: VigilRequest, state: &AppState) -> VigilResponse {
    match request {
        VigilRequest::Ping => VigilResponse::pong(),
        VigilRequest::Health => {
            let pg_ver = match vigil_core::db::health_check(&state.pool).await {
                Ok(v) => v,
                Err(e) => return VigilResponse::err(format!("DB Health Check failed: {}", e)),
            };
            let vec_ver = match vigil_core::db::check_pgvector(&state.pool).await {
                Ok(v) => v,
                Err(e) => return VigilResponse::err(format!("pgvector Check failed: {}", e)),
            };
            VigilResponse::ok(serde_json::json!({
                "postgresql": pg_ver,
                "pgvector": vec_ver,
                "status": "healthy"
            }))
        }
        VigilRequest::Match { encoding, metadata } => {
            match state.pipeline.process(MatchItem { encoding, metadata }).await {
                Ok(response) => to_ok(&response),
                Err(e) => VigilResponse::err(e.to_string()),
            }
        }
        VigilRequest::MatchBatch { items } => {
            if items.is_empty() {
                return VigilResponse::err("Array of items is required");
            }
            match state.pipeline.process_batch(items).await {
                Ok(response) => to_ok(&response),
                Err(e) => VigilResponse::err(e.to_string()),
            }
        }
        VigilRequest::Invalidate => {
            state.pipeline.invalidate();
            VigilResponse::ok(serde_json::json!({ "invalidated": true }))
        }
        VigilRequest::Verify {
            id,
            verification_status,
        } => match verify_report(state.reports.as_ref(), id, &verification_status).await {
            Ok(report) => to_ok(&report),
            Err(e) => VigilResponse::err(e.to_string()),
        },
    }
}

fn to_ok<T: serde::Serialize>(value: &T) -> VigilResponse {
    match serde_json::to_value(value) {
        Ok(data) => VigilResponse::ok(data),
        Err(e) => VigilResponse::err(format!("Serialization error: {}", e)),
    }
}
