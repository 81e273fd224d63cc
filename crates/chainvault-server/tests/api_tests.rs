//! API integration tests for the ChainVault server
//!
//! These drive the full router with `tower::ServiceExt::oneshot`, so every
//! request goes through the same middleware stack as in production.
//!
//! Coverage includes:
//! - Upload → convert status → download → store → retrieve
//! - Response envelopes and error codes (400, 404, 409, 413)
//! - Listing, transactions and network views
//! - Deletion and health

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use axum::http::{header, StatusCode};
use chainvault_server::{chain::Network, models::JobState};
use common::{
    body_bytes, body_json, delete, get, multipart_body, post_json, post_multipart, TestEnv,
    PEOPLE_CSV, PEOPLE_JSON,
};
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

async fn upload_people(app: &axum::Router, fields: &[(&str, &str)]) -> (StatusCode, Value) {
    let response = post_multipart(
        app,
        "/api/v1/files/upload",
        multipart_body(fields, Some(("people.csv", PEOPLE_CSV))),
    )
    .await;
    let status = response.status();
    (status, body_json(response).await)
}

/// Poll the convert endpoint until the job reports `state`
async fn poll_until(app: &axum::Router, job_id: &str, state: &str) -> Value {
    tokio::time::timeout(common::WAIT_TIMEOUT, async {
        loop {
            let response = get(app, &format!("/api/v1/files/convert/{job_id}")).await;
            assert_eq!(response.status(), StatusCode::OK);
            let body = body_json(response).await;
            if body["data"]["state"] == state {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("job {job_id} never reported {state}"))
}

// ============================================================================
// Upload and conversion
// ============================================================================

#[tokio::test]
async fn test_upload_convert_download_retrieve() {
    let env = TestEnv::start().await;
    let app = env.app();

    let (status, body) = upload_people(
        &app,
        &[
            ("conversionType", "csv-to-json"),
            ("blockchainNetwork", "ethereum"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["state"], "queued");
    assert_eq!(body["data"]["conversionType"], "csv-to-json");
    assert_eq!(body["data"]["size"], PEOPLE_CSV.len());
    let job_id = body["data"]["jobId"].as_str().unwrap().to_string();

    let status = poll_until(&app, &job_id, "confirmed").await;
    assert_eq!(status["data"]["progress"], 100);
    let download_url = status["data"]["downloadUrl"].as_str().unwrap().to_string();
    assert_eq!(download_url, format!("/api/v1/files/{job_id}/download"));
    let records = status["data"]["job"]["chainRecords"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    let tx_hash = records[0]["txHash"].as_str().unwrap().to_string();

    let response = get(&app, &download_url).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    assert!(response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains("people.json"));
    assert_eq!(body_bytes(response).await, PEOPLE_JSON.as_bytes());

    let response = get(&app, &format!("/api/v1/blockchain/retrieve/{tx_hash}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-chainvault-network"], "ethereum");
    assert_eq!(body_bytes(response).await, PEOPLE_JSON.as_bytes());
}

#[tokio::test]
async fn test_upload_infers_format_and_applies_defaults() {
    let env = TestEnv::start().await;
    let (status, body) = upload_people(&env.app(), &[]).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["data"]["conversionType"], "csv-to-json");
    assert_eq!(body["data"]["network"], "ethereum");
    assert_eq!(body["data"]["encryptionLevel"], "high");
}

#[tokio::test]
async fn test_upload_validation_errors() {
    let env = TestEnv::start().await;
    let app = env.app();

    // No file part
    let response = post_multipart(
        &app,
        "/api/v1/files/upload",
        multipart_body(&[("conversionType", "csv-to-json")], None),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, body) = upload_people(&app, &[("blockchainNetwork", "solana")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].as_str().unwrap().contains("solana"));

    let (status, _) = upload_people(&app, &[("conversionType", "xml-to-json")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = upload_people(&app, &[("encryptionLevel", "military")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let response = post_multipart(
        &app,
        "/api/v1/files/upload",
        multipart_body(&[], Some(("empty.csv", b""))),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_to_disabled_network_is_rejected() {
    let mut env = TestEnv::start().await;
    env.chains.remove(&Network::Bsc);
    env.restart().await;

    let (status, body) = upload_people(&env.app(), &[("blockchainNetwork", "bsc")]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_oversized_upload_is_rejected() {
    let env = TestEnv::with_config(|config| config.server.max_upload_bytes = 8).await;
    let (status, body) = upload_people(&env.app(), &[]).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"]["code"], "PAYLOAD_TOO_LARGE");
    let body = body_json(get(&env.app(), "/api/v1/files").await).await;
    assert_eq!(body["meta"]["total"], 0);
}

#[tokio::test]
async fn test_failed_conversion_is_reported() {
    let env = TestEnv::start().await;
    let app = env.app();

    let response = post_multipart(
        &app,
        "/api/v1/files/upload",
        multipart_body(
            &[("conversionType", "sql-to-json")],
            Some(("broken.sql", b"INSERT INTO t (a) VALUES (NOW());")),
        ),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let job_id = body_json(response).await["data"]["jobId"]
        .as_str()
        .unwrap()
        .to_string();

    let status = poll_until(&app, &job_id, "failed").await;
    assert_eq!(status["data"]["job"]["failedStage"], "parsing");
    assert!(status["data"]["downloadUrl"].is_null());

    let response = get(&app, &format!("/api/v1/files/{job_id}/download")).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_convert_status_of_unknown_job() {
    let env = TestEnv::start().await;
    let response = get(
        &env.app(),
        &format!("/api/v1/files/convert/{}", Uuid::new_v4()),
    )
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"]["code"], "NOT_FOUND");
}

// ============================================================================
// Listing
// ============================================================================

#[tokio::test]
async fn test_list_files_paginates_and_filters() {
    let env = TestEnv::start().await;
    for i in 0..3 {
        let job = env.submit_csv(&format!("f{i}.csv"), PEOPLE_CSV).await;
        env.wait_for_state(job.id, JobState::Confirmed).await;
    }
    let app = env.app();

    let body = body_json(get(&app, "/api/v1/files?page=1&per_page=2").await).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert_eq!(body["meta"]["total"], 3);
    assert_eq!(body["meta"]["perPage"], 2);

    let body = body_json(get(&app, "/api/v1/files?state=failed").await).await;
    assert!(body["data"].as_array().unwrap().is_empty());

    let response = get(&app, "/api/v1/files?state=Done").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// Blockchain
// ============================================================================

#[tokio::test]
async fn test_store_on_another_network() {
    let env = TestEnv::start().await;
    let job = env.submit_csv("people.csv", PEOPLE_CSV).await;
    env.wait_for_state(job.id, JobState::Confirmed).await;
    let app = env.app();

    let response = post_json(
        &app,
        "/api/v1/blockchain/store",
        json!({"jobId": job.id, "network": "polygon"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["network"], "polygon");
    let tx_hash = body["data"]["txHash"].as_str().unwrap().to_string();

    env.wait_for_record(job.id, Network::Polygon, |r| {
        r.status == chainvault_server::models::ChainRecordStatus::Confirmed
    })
    .await;

    let body = body_json(get(&app, "/api/v1/blockchain/transactions?network=polygon").await).await;
    let transactions = body["data"]["transactions"].as_array().unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0]["txHash"], tx_hash.as_str());

    let response = get(
        &app,
        &format!("/api/v1/blockchain/retrieve/{tx_hash}?network=polygon"),
    )
    .await;
    assert_eq!(body_bytes(response).await, PEOPLE_JSON.as_bytes());
}

#[tokio::test]
async fn test_store_errors() {
    let env = TestEnv::start().await;
    let app = env.app();

    let response = post_json(&app, "/api/v1/blockchain/store", json!({"network": "bsc"})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = post_json(
        &app,
        "/api/v1/blockchain/store",
        json!({"jobId": Uuid::new_v4(), "network": "bsc"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_retrieve_errors() {
    let env = TestEnv::start().await;
    let app = env.app();

    let response = get(&app, "/api/v1/blockchain/retrieve/not-a-hash").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let unknown = format!("0x{}", "cd".repeat(32));
    let response = get(&app, &format!("/api/v1/blockchain/retrieve/{unknown}")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_networks_view() {
    let env = TestEnv::start().await;
    let job = env.submit_csv("people.csv", PEOPLE_CSV).await;
    env.wait_for_state(job.id, JobState::Confirmed).await;

    let body = body_json(get(&env.app(), "/api/v1/blockchain/networks").await).await;
    let networks = body["data"].as_array().unwrap();
    assert_eq!(networks.len(), 4);

    let ethereum = networks
        .iter()
        .find(|n| n["network"] == "ethereum")
        .unwrap();
    assert_eq!(ethereum["enabled"], true);
    assert_eq!(ethereum["chainId"], 1);
    assert_eq!(ethereum["confirmations"], common::TEST_CONFIRMATIONS);
    assert_eq!(ethereum["transactions"], 1);
    assert_eq!(ethereum["confirmed"], 1);
    assert!(ethereum["bytesStored"].as_i64().unwrap() > 0);

    let bsc = networks.iter().find(|n| n["network"] == "bsc").unwrap();
    assert_eq!(bsc["transactions"], 0);
}

// ============================================================================
// Jobs
// ============================================================================

#[tokio::test]
async fn test_job_detail_includes_history() {
    let env = TestEnv::start().await;
    let job = env.submit_csv("people.csv", PEOPLE_CSV).await;
    env.wait_for_state(job.id, JobState::Confirmed).await;

    let body = body_json(get(&env.app(), &format!("/api/v1/jobs/{}", job.id)).await).await;
    assert_eq!(body["data"]["state"], "confirmed");
    let transitions = body["data"]["transitions"].as_array().unwrap();
    assert_eq!(transitions.len(), 6);
    assert_eq!(transitions[5]["toState"], "confirmed");
}

#[tokio::test]
async fn test_cancel_confirmed_job_conflicts() {
    let env = TestEnv::start().await;
    let job = env.submit_csv("people.csv", PEOPLE_CSV).await;
    env.wait_for_state(job.id, JobState::Confirmed).await;

    let response = post_json(
        &env.app(),
        &format!("/api/v1/jobs/{}/cancel", job.id),
        json!({}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error"]["code"], "CONFLICT");
}

// ============================================================================
// Deletion and health
// ============================================================================

#[tokio::test]
async fn test_delete_file() {
    let env = TestEnv::start().await;
    let job = env.submit_csv("people.csv", PEOPLE_CSV).await;
    env.wait_for_state(job.id, JobState::Confirmed).await;
    let app = env.app();

    let response = delete(&app, &format!("/api/v1/files/{}", job.id)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["outcome"], "deleted");

    let response = get(&app, &format!("/api/v1/files/convert/{}", job.id)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = delete(&app, &format!("/api/v1/files/{}", job.id)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_while_anchoring_conflicts() {
    let env = TestEnv::start().await;
    env.chain(Network::Ethereum).set_blocks_per_poll(0);
    let job = env.submit_csv("people.csv", PEOPLE_CSV).await;
    env.wait_for_state(job.id, JobState::Anchoring).await;

    let response = delete(&env.app(), &format!("/api/v1/files/{}?permanent=true", job.id)).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    env.chain(Network::Ethereum).set_blocks_per_poll(4);
    env.wait_for_state(job.id, JobState::Confirmed).await;
}

#[tokio::test]
async fn test_health_and_root() {
    let env = TestEnv::start().await;
    let app = env.app();

    let response = get(&app, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["networks"].as_array().unwrap().len(), 4);

    let body = body_json(get(&app, "/").await).await;
    assert_eq!(body["name"], "ChainVault");
}

#[tokio::test]
async fn test_health_reports_closed_ledger() {
    let env = TestEnv::start().await;
    env.ledger.close().await;

    let response = get(&env.app(), "/health").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
