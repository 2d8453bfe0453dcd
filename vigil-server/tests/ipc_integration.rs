//! IPC router and Unix-socket framing tests over in-memory collaborators.

mod common;

use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::UnixStream;
use tokio::sync::broadcast;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use uuid::Uuid;
use vigil_core::ipc::{MatchItem, VigilRequest, VigilResponse};
use vigil_server::{router, server};

use common::{harness, missing_person, vector};

#[tokio::test]
async fn test_ping() {
    let h = harness(vec![]);
    let resp = router::handle_request(VigilRequest::Ping, &h.state).await;
    assert!(resp.is_ok());
}

#[tokio::test]
async fn test_match_action() {
    let jane = missing_person("Jane", 0.0);
    let h = harness(vec![jane.clone()]);

    let resp = router::handle_request(
        VigilRequest::Match {
            encoding: json!(vector(0.0)),
            metadata: None,
        },
        &h.state,
    )
    .await;

    assert!(resp.is_ok());
    let data = resp.data.unwrap();
    assert_eq!(data["matchFound"], true);
    assert_eq!(data["personId"], jane.id.to_string());
    assert_eq!(data["similarity"], 1.0);
}

#[tokio::test]
async fn test_match_action_invalid_encoding() {
    let h = harness(vec![missing_person("Jane", 0.0)]);

    let resp = router::handle_request(
        VigilRequest::Match {
            encoding: json!("not a vector"),
            metadata: None,
        },
        &h.state,
    )
    .await;

    assert!(!resp.is_ok());
    assert!(resp.error.unwrap().contains("Invalid face encoding"));
}

#[tokio::test]
async fn test_match_batch_action() {
    let h = harness(vec![missing_person("Jane", 0.0)]);

    let resp = router::handle_request(
        VigilRequest::MatchBatch {
            items: vec![
                MatchItem {
                    encoding: json!(vector(0.0)),
                    metadata: None,
                },
                MatchItem {
                    encoding: json!(vector(1.0)),
                    metadata: None,
                },
            ],
        },
        &h.state,
    )
    .await;

    let data = resp.data.unwrap();
    assert_eq!(data["total"], 2);
    assert_eq!(data["matchCount"], 1);
}

#[tokio::test]
async fn test_empty_batch_action_is_error() {
    let h = harness(vec![]);
    let resp = router::handle_request(VigilRequest::MatchBatch { items: vec![] }, &h.state).await;
    assert!(!resp.is_ok());
}

#[tokio::test]
async fn test_invalidate_then_verify_actions() {
    let h = harness(vec![missing_person("Jane", 0.0)]);

    let resp = router::handle_request(VigilRequest::Invalidate, &h.state).await;
    assert_eq!(resp.data.unwrap()["invalidated"], true);

    let matched = router::handle_request(
        VigilRequest::Match {
            encoding: json!(vector(0.0)),
            metadata: None,
        },
        &h.state,
    )
    .await;
    let id: Uuid = matched.data.unwrap()["reportId"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    let resp = router::handle_request(
        VigilRequest::Verify {
            id,
            verification_status: "confirmed".to_string(),
        },
        &h.state,
    )
    .await;
    assert_eq!(resp.data.unwrap()["verificationStatus"], "confirmed");

    let resp = router::handle_request(
        VigilRequest::Verify {
            id,
            verification_status: "pending".to_string(),
        },
        &h.state,
    )
    .await;
    assert!(!resp.is_ok());
}

#[tokio::test]
async fn test_unix_socket_roundtrip() {
    let h = harness(vec![]);
    let socket_path = format!("/tmp/vigil-ipc-{}.sock", Uuid::new_v4());
    let (tx, _rx) = broadcast::channel(1);

    let server_state = h.state.clone();
    let server_path = socket_path.clone();
    let shutdown = tx.subscribe();
    let handle = tokio::spawn(async move {
        server::run_unix_server(&server_path, server_state, shutdown).await
    });

    let mut stream = None;
    for _ in 0..50 {
        if let Ok(s) = UnixStream::connect(&socket_path).await {
            stream = Some(s);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let stream = stream.expect("IPC server did not come up");
    let codec = LengthDelimitedCodec::builder().little_endian().new_codec();
    let mut framed = Framed::new(stream, codec);

    let request = rmp_serde::to_vec_named(&VigilRequest::Ping).unwrap();
    framed.send(Bytes::from(request)).await.unwrap();
    let frame = framed.next().await.unwrap().unwrap();
    let response: VigilResponse = rmp_serde::from_slice(&frame).unwrap();
    assert!(response.is_ok());

    framed.send(Bytes::from_static(b"\xc1garbage")).await.unwrap();
    let frame = framed.next().await.unwrap().unwrap();
    let response: VigilResponse = rmp_serde::from_slice(&frame).unwrap();
    assert!(response.error.unwrap().contains("Deserialization error"));

    tx.send(()).unwrap();
    handle.await.unwrap().unwrap();
    assert!(!std::path::Path::new(&socket_path).exists());
}
