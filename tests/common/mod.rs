//! Shared by several integration test binaries; each uses a subset.
#![allow(dead_code)]

use anyhow::Result;
use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use azure_devops_exporter::{
    collectors::{CollectorConfig, Settings},
    devops::{DevopsClient, Limits, RequestGate},
    discovery::DiscoveryConfig,
    scheduler::AppContext,
};
use prometheus::Registry;
use secrecy::SecretString;
use serde_json::{Value, json};
use std::net::TcpListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

pub const ORGANISATION: &str = "acme";

/// In-process stand-in for the Azure DevOps REST API.
pub struct FakeDevops {
    pub url: String,
    pub requests: Arc<AtomicU64>,
    handle: JoinHandle<()>,
}

impl Drop for FakeDevops {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl FakeDevops {
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }
}

type Hits = State<Arc<AtomicU64>>;

fn list(value: Value) -> Json<Value> {
    let count = value.as_array().map_or(0, Vec::len);
    Json(json!({ "count": count, "value": value }))
}

async fn projects(State(hits): Hits) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    list(json!([
        { "id": "p1", "name": "Alpha", "state": "wellFormed" },
        { "id": "p2", "name": "Beta", "state": "wellFormed" },
    ]))
}

async fn repositories(State(hits): Hits, Path(project): Path<String>) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    list(json!([
        { "id": format!("{project}-repo"), "name": "main", "size": 2048 },
    ]))
}

async fn pools(State(hits): Hits) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    list(json!([{ "id": 4, "name": "Default", "poolType": "automation", "size": 1 }]))
}

async fn pool(State(hits): Hits, Path(id): Path<i64>) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "id": id, "name": "Default", "poolType": "automation", "size": 1 }))
}

async fn agents(State(hits): Hits) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    list(json!([{
        "id": 11,
        "name": "agent-1",
        "version": "3.230.0",
        "enabled": true,
        "status": "online",
        "createdOn": "2024-03-01T10:00:00Z",
    }]))
}

async fn empty(State(hits): Hits) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    list(json!([]))
}

/// Serve the fake API on an ephemeral port.
pub async fn start_fake_devops() -> Result<FakeDevops> {
    let requests = Arc::new(AtomicU64::new(0));

    let router = Router::new()
        .route("/acme/_apis/projects", get(projects))
        .route("/acme/{project}/_apis/git/repositories", get(repositories))
        .route("/acme/_apis/distributedtask/pools", get(pools))
        .route("/acme/_apis/distributedtask/pools/{id}", get(pool))
        .route("/acme/_apis/distributedtask/pools/{id}/agents", get(agents))
        .fallback(empty)
        .with_state(Arc::clone(&requests));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("http://{}", listener.local_addr()?);

    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    Ok(FakeDevops {
        url,
        requests,
        handle,
    })
}

/// Application wired to `fake` with the given collectors enabled.
pub fn app_context(fake: &FakeDevops, collectors: &[&str]) -> Result<AppContext> {
    let gate = Arc::new(RequestGate::new(4, 0));
    let client = DevopsClient::new(
        &fake.url,
        ORGANISATION,
        &SecretString::from("token"),
        gate,
        Limits::default(),
    )?;
    let enabled: Vec<String> = collectors.iter().map(ToString::to_string).collect();

    Ok(AppContext::new(
        Arc::new(client),
        Settings::default(),
        DiscoveryConfig::default(),
        Vec::new(),
        CollectorConfig::new().with_enabled(&enabled),
        Registry::new(),
    ))
}

/// Get an available port for testing
pub fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to ephemeral port")
        .local_addr()
        .expect("Failed to get local address")
        .port()
}

/// Build test URL for HTTP requests
pub fn get_test_url(port: u16) -> String {
    format!("http://127.0.0.1:{port}")
}

/// Wait for server to be ready
pub async fn wait_for_server(port: u16, max_attempts: u32) -> bool {
    for _ in 0..max_attempts {
        if tokio::net::TcpStream::connect(format!("127.0.0.1:{port}"))
            .await
            .is_ok()
        {
            return true;
        }
        sleep(Duration::from_millis(100)).await;
    }
    false
}

/// Poll `/metrics` until every needle shows up.
pub async fn wait_for_metrics(port: u16, needles: &[&str], max_attempts: u32) -> Result<String> {
    let client = reqwest::Client::new();
    let mut body = String::new();

    for _ in 0..max_attempts {
        if let Ok(response) = client
            .get(format!("{}/metrics", get_test_url(port)))
            .send()
            .await
        {
            body = response.text().await?;
            if needles.iter().all(|needle| body.contains(needle)) {
                return Ok(body);
            }
        }
        sleep(Duration::from_millis(100)).await;
    }

    Ok(body)
}
