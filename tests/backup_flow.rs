//! End-to-end create_backup: filtered archive, hashed upload, staged-file
//! cleanup, completion report.

mod common;

use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::io::Read;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn tar_gz_entries(bytes: &[u8]) -> Vec<String> {
    let gz = flate2::read::GzDecoder::new(bytes);
    let mut ar = tar::Archive::new(gz);
    ar.entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
        .collect()
}

#[tokio::test]
async fn create_backup_uploads_filtered_archive_and_cleans_up() {
    let cloud = MockServer::start().await;
    let moon = MockServer::start().await;

    let data_dir = tempfile::tempdir().unwrap();
    let root = data_dir.path().join("printer_data");
    std::fs::create_dir_all(root.join("config/Helper-Script")).unwrap();
    std::fs::write(root.join("config/printer.cfg"), [b'x'; 50]).unwrap();
    std::fs::write(root.join("config/printer-001_alt.cfg"), b"excluded").unwrap();
    std::fs::write(root.join("config/Helper-Script/x.cfg"), b"excluded").unwrap();

    Mock::given(method("POST"))
        .and(path("/api/v1/connectors/7/heartbeat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&cloud)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/connectors/7/webcam_requests"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&cloud)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/connectors/7/commands"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": "B1",
            "printer_id": 42,
            "action": "create_backup",
            "params": {
                "backup_id": "bk_123",
                "presigned_url": format!("{}/upload/bk_123", cloud.uri()),
                "printer_data_root": root.to_str().unwrap(),
                "include": {"config": true}
            }
        }])))
        .mount(&cloud)
        .await;

    Mock::given(method("PUT"))
        .and(path("/upload/bk_123"))
        .and(header("content-type", "application/gzip"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&cloud)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v1/commands/B1/complete"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&cloud)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v1/snapshots/batch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"inserted": 1})))
        .mount(&cloud)
        .await;
    Mock::given(method("POST"))
        .and(path("/printer/objects/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": {}})))
        .mount(&moon)
        .await;

    let state_dir = data_dir.path().join("state");
    let config = common::paired_config(
        &cloud.uri(),
        &[(42, moon.uri().as_str())],
        state_dir.to_str().unwrap(),
    );
    common::run_once(config, &data_dir.path().join("config.json"))
        .await
        .unwrap();

    // The staged archive never outlives the command
    assert!(!state_dir.join("bk_123.tar.gz").exists());

    let reqs = cloud.received_requests().await.unwrap();
    let put = reqs
        .iter()
        .find(|r| r.url.path() == "/upload/bk_123")
        .unwrap();
    assert_eq!(
        put.headers.get("content-length").unwrap().to_str().unwrap(),
        put.body.len().to_string()
    );

    // Exactly the one file the config filter keeps
    assert_eq!(tar_gz_entries(&put.body), vec!["config/printer.cfg"]);

    let complete = reqs
        .iter()
        .find(|r| r.url.path() == "/api/v1/commands/B1/complete")
        .unwrap();
    let body: Value = serde_json::from_slice(&complete.body).unwrap();
    assert_eq!(body["status"], "succeeded");
    let result = &body["result"];
    assert_eq!(result["action"], "create_backup");
    assert_eq!(result["backup_id"], "bk_123");
    assert_eq!(result["size_bytes"], put.body.len() as u64);
    assert_eq!(
        result["sha256"],
        format!("{:x}", Sha256::digest(&put.body)),
        "reported digest must match the uploaded bytes"
    );
    assert!(result["uploaded_at"].as_str().unwrap().ends_with('Z'));
    assert_eq!(result["post_snapshot"], "captured");

    // Sanity: the archived file carries the original contents
    let gz = flate2::read::GzDecoder::new(put.body.as_slice());
    let mut ar = tar::Archive::new(gz);
    let mut entry = ar.entries().unwrap().next().unwrap().unwrap();
    let mut contents = Vec::new();
    entry.read_to_end(&mut contents).unwrap();
    assert_eq!(contents, vec![b'x'; 50]);
}

#[tokio::test]
async fn failed_upload_still_removes_staged_archive_and_reports_failure() {
    let cloud = MockServer::start().await;
    let moon = MockServer::start().await;

    let data_dir = tempfile::tempdir().unwrap();
    let root = data_dir.path().join("printer_data");
    std::fs::create_dir_all(root.join("config")).unwrap();
    std::fs::write(root.join("config/printer.cfg"), b"[printer]\n").unwrap();

    Mock::given(method("POST"))
        .and(path("/api/v1/connectors/7/heartbeat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&cloud)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/connectors/7/webcam_requests"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&cloud)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/connectors/7/commands"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": "B2",
            "printer_id": 42,
            "action": "create_backup",
            "params": {
                "backup_id": "bk_456",
                "presigned_url": format!("{}/upload/bk_456", cloud.uri()),
                "printer_data_root": root.to_str().unwrap(),
                "include": {"config": true}
            }
        }])))
        .mount(&cloud)
        .await;

    Mock::given(method("PUT"))
        .and(path("/upload/bk_456"))
        .respond_with(ResponseTemplate::new(403).set_body_string("expired"))
        .expect(1)
        .mount(&cloud)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v1/commands/B2/complete"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&cloud)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/v1/snapshots/batch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"inserted": 1})))
        .mount(&cloud)
        .await;
    Mock::given(method("POST"))
        .and(path("/printer/objects/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"result": {}})))
        .mount(&moon)
        .await;

    let state_dir = data_dir.path().join("state");
    let config = common::paired_config(
        &cloud.uri(),
        &[(42, moon.uri().as_str())],
        state_dir.to_str().unwrap(),
    );
    common::run_once(config, &data_dir.path().join("config.json"))
        .await
        .unwrap();

    assert!(!state_dir.join("bk_456.tar.gz").exists());

    let reqs = cloud.received_requests().await.unwrap();
    let complete = reqs
        .iter()
        .find(|r| r.url.path() == "/api/v1/commands/B2/complete")
        .unwrap();
    let body: Value = serde_json::from_slice(&complete.body).unwrap();
    assert_eq!(body["status"], "failed");
    assert!(body["error_message"].as_str().unwrap().contains("403"));
}
