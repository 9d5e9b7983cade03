//! Audit and persistence tests against the real binary.

use std::io::Write;
use std::net::TcpListener;
use std::path::Path;
use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use tempfile::{NamedTempFile, TempDir};
use tokio::time::sleep;

fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn write_config(port: u16, db_path: &Path) -> NamedTempFile {
    let content = format!(
        r#"
[auth]
method = "none"

[server]
host = "127.0.0.1"
port = {}

[database]
path = "{}"
"#,
        port,
        db_path.display()
    );

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

async fn spawn_server(config_path: &Path) -> tokio::process::Child {
    tokio::process::Command::new(env!("CARGO_BIN_EXE_enrichments"))
        .env("ENRICHMENT_CONFIG", config_path)
        .env("RUST_LOG", "error")
        .kill_on_drop(true)
        .spawn()
        .expect("Failed to spawn server")
}

async fn wait_for_server(port: u16, max_attempts: u32) -> bool {
    let client = Client::new();
    for _ in 0..max_attempts {
        if client
            .get(format!("http://127.0.0.1:{}/api/v1/health", port))
            .send()
            .await
            .is_ok()
        {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

async fn get_json(client: &Client, url: String) -> Value {
    client
        .get(url)
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse JSON")
}

#[tokio::test]
async fn test_server_creates_database_and_audits_start() {
    let port = get_available_port();
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let config = write_config(port, &db_path);

    let mut server = spawn_server(config.path()).await;
    assert!(
        wait_for_server(port, 40).await,
        "Server did not start in time"
    );
    assert!(db_path.exists(), "Database file should be created on startup");

    // Give the audit writer a moment
    sleep(Duration::from_millis(100)).await;

    let client = Client::new();
    let json = get_json(
        &client,
        format!(
            "http://127.0.0.1:{}/api/v1/audit?event_type=service_started&limit=10",
            port
        ),
    )
    .await;

    assert_eq!(json["total"], 1);
    assert_eq!(json["limit"], 10);
    let event = &json["events"][0];
    assert!(event["data"]["version"].is_string());
    assert_eq!(event["data"]["config_hash"].as_str().unwrap().len(), 16);

    server.kill().await.ok();
}

#[tokio::test]
async fn test_enrichments_persist_across_restarts() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let client = Client::new();

    let port1 = get_available_port();
    let config1 = write_config(port1, &db_path);
    let mut server1 = spawn_server(config1.path()).await;
    assert!(
        wait_for_server(port1, 40).await,
        "Server 1 did not start in time"
    );

    let created: Value = client
        .post(format!("http://127.0.0.1:{}/api/v1/enrichments", port1))
        .json(&json!({ "media_type": "transcript" }))
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse JSON");
    let id = created["id"].as_str().unwrap().to_string();

    let moved = client
        .post(format!(
            "http://127.0.0.1:{}/api/v1/enrichments/{}/transition",
            port1, id
        ))
        .json(&json!({ "status": "waiting_ai_enrichment" }))
        .send()
        .await
        .expect("Failed to send request");
    assert!(moved.status().is_success());

    sleep(Duration::from_millis(100)).await;
    server1.kill().await.ok();
    sleep(Duration::from_millis(100)).await;

    let port2 = get_available_port();
    let config2 = write_config(port2, &db_path);
    let mut server2 = spawn_server(config2.path()).await;
    assert!(
        wait_for_server(port2, 40).await,
        "Server 2 did not start in time"
    );
    sleep(Duration::from_millis(100)).await;

    let enrichment = get_json(
        &client,
        format!("http://127.0.0.1:{}/api/v1/enrichments/{}", port2, id),
    )
    .await;
    assert_eq!(enrichment["status"], "waiting_ai_enrichment");
    assert_eq!(enrichment["revision"], 1);

    let history = get_json(
        &client,
        format!(
            "http://127.0.0.1:{}/api/v1/audit?enrichment_id={}",
            port2, id
        ),
    )
    .await;
    assert_eq!(history["total"], 2);

    let starts = get_json(
        &client,
        format!(
            "http://127.0.0.1:{}/api/v1/audit?event_type=service_started",
            port2
        ),
    )
    .await;
    assert_eq!(starts["total"], 2);

    server2.kill().await.ok();
}
