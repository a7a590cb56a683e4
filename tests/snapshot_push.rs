//! Snapshot loop resilience: one binding down, the other up.

mod common;

use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn batch_contains_only_reachable_bindings() {
    let cloud = MockServer::start().await;
    let healthy = MockServer::start().await;
    let broken = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/connectors/7/heartbeat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&cloud)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/connectors/7/commands"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&cloud)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/connectors/7/webcam_requests"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&cloud)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/snapshots/batch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"inserted": 1})))
        .expect(1)
        .mount(&cloud)
        .await;

    Mock::given(method("POST"))
        .and(path("/printer/objects/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": {"status": {"print_stats": {"state": "printing"}}}
        })))
        .mount(&healthy)
        .await;
    Mock::given(method("POST"))
        .and(path("/printer/objects/query"))
        .respond_with(ResponseTemplate::new(500).set_body_string("klippy down"))
        .mount(&broken)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = common::paired_config(
        &cloud.uri(),
        &[(42, healthy.uri().as_str()), (43, broken.uri().as_str())],
        dir.path().to_str().unwrap(),
    );
    common::run_once(config, &dir.path().join("config.json"))
        .await
        .unwrap();

    let reqs = cloud.received_requests().await.unwrap();

    // Exactly one batch, carrying exactly the healthy binding's snapshot
    let batch = reqs
        .iter()
        .find(|r| r.url.path() == "/api/v1/snapshots/batch")
        .unwrap();
    let body: Value = serde_json::from_slice(&batch.body).unwrap();
    let snapshots = body["snapshots"].as_array().unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0]["printer_id"], 42);
    assert!(snapshots[0]["captured_at"].as_str().unwrap().ends_with('Z'));

    // The heartbeat saw the same split
    let hb = reqs
        .iter()
        .find(|r| r.url.path().ends_with("/heartbeat"))
        .unwrap();
    let hb_body: Value = serde_json::from_slice(&hb.body).unwrap();
    let printers = hb_body["printers"].as_array().unwrap();
    assert_eq!(printers.len(), 2);
    assert_eq!(printers[0]["printer_id"], 42);
    assert_eq!(printers[0]["reachable"], true);
    assert_eq!(printers[1]["printer_id"], 43);
    assert_eq!(printers[1]["reachable"], false);
}

#[tokio::test]
async fn all_bindings_down_means_no_batch() {
    let cloud = MockServer::start().await;
    let broken = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/connectors/7/heartbeat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&cloud)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/connectors/7/commands"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&cloud)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/connectors/7/webcam_requests"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&cloud)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/snapshots/batch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"inserted": 0})))
        .expect(0)
        .mount(&cloud)
        .await;

    Mock::given(method("POST"))
        .and(path("/printer/objects/query"))
        .respond_with(ResponseTemplate::new(500).set_body_string("klippy down"))
        .mount(&broken)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = common::paired_config(
        &cloud.uri(),
        &[(42, broken.uri().as_str())],
        dir.path().to_str().unwrap(),
    );
    common::run_once(config, &dir.path().join("config.json"))
        .await
        .unwrap();
}
