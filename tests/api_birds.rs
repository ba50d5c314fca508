use anyhow::{anyhow, Result};
use serde_json::Value;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

use birdfeeder::api::{ApiConfig, ApiHandle, ApiServer};
use birdfeeder::{
    FeederToken, InMemorySightingStore, SightingStore, SightingSummary, SpeciesRecord,
    SqliteSightingStore,
};

const TOKEN: &str = "feeder-test-token-0123456789";

struct TestApi {
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn new(store: Box<dyn SightingStore>, write_token: Option<&str>) -> Result<Self> {
        let api_config = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            write_token: write_token.map(FeederToken::from_secret).transpose()?,
        };
        let api_handle = ApiServer::new(api_config, store).spawn()?;
        Ok(Self {
            api_handle: Some(api_handle),
        })
    }

    fn addr(&self) -> SocketAddr {
        self.api_handle
            .as_ref()
            .expect("test API handle should be initialized")
            .addr
    }

    fn send(&self, method: &str, path: &str, token: Option<&str>) -> Result<(String, String)> {
        let mut stream = TcpStream::connect(self.addr())?;
        let auth = token
            .map(|token| format!("Authorization: Bearer {}\r\n", token))
            .unwrap_or_default();
        let request = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n{auth}\r\n");
        stream.write_all(request.as_bytes())?;
        read_response(&mut stream)
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            handle.stop().expect("failed to stop API server");
        }
    }
}

fn read_response(stream: &mut TcpStream) -> Result<(String, String)> {
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    let mut parts = response.splitn(2, "\r\n\r\n");
    let headers = parts.next().unwrap_or("").to_string();
    let body = parts.next().unwrap_or("").to_string();
    Ok((headers, body))
}

fn shared_store() -> Arc<Mutex<InMemorySightingStore>> {
    Arc::new(Mutex::new(InMemorySightingStore::new()))
}

struct UnavailableStore;

impl SightingStore for UnavailableStore {
    fn record_sightings(&mut self, _labels: &[String], _now: i64) -> Result<SightingSummary> {
        Err(anyhow!("database is locked"))
    }

    fn birds(&mut self) -> Result<Vec<SpeciesRecord>> {
        Err(anyhow!("database is locked"))
    }

    fn bird(&mut self, _name: &str) -> Result<Option<SpeciesRecord>> {
        Err(anyhow!("database is locked"))
    }
}

#[test]
fn root_and_health_are_open() -> Result<()> {
    let api = TestApi::new(Box::new(shared_store()), Some(TOKEN))?;

    let (headers, body) = api.send("GET", "/", None)?;
    assert!(headers.contains("200 OK"));
    let json: Value = serde_json::from_str(&body)?;
    assert_eq!(json["message"], "Hello World");

    let (headers, body) = api.send("GET", "/health", None)?;
    assert!(headers.contains("200 OK"));
    assert_eq!(body, r#"{"status":"ok"}"#);
    Ok(())
}

#[test]
fn add_birds_requires_bearer_token() -> Result<()> {
    let store = shared_store();
    let api = TestApi::new(Box::new(store.clone()), Some(TOKEN))?;

    let (headers, body) = api.send("POST", "/api/add_birds?names=cardinal", None)?;
    assert!(headers.contains("401 Unauthorized"));
    assert!(body.contains("missing_token"));

    let (headers, body) = api.send("POST", "/api/add_birds?names=cardinal", Some("guess"))?;
    assert!(headers.contains("401 Unauthorized"));
    assert!(body.contains("invalid_token"));

    let (headers, body) = api.send(
        "POST",
        &format!("/api/add_birds?names=cardinal&token={TOKEN}"),
        Some(TOKEN),
    )?;
    assert!(headers.contains("400 Bad Request"));
    assert!(body.contains("token_query_param_not_allowed"));

    let mut view = store;
    assert!(view.birds()?.is_empty());
    Ok(())
}

#[test]
fn add_birds_records_and_lists() -> Result<()> {
    let store = shared_store();
    let api = TestApi::new(Box::new(store.clone()), Some(TOKEN))?;

    let (headers, body) = api.send(
        "POST",
        "/api/add_birds?names=Northern%20Cardinal,blue+jay",
        Some(TOKEN),
    )?;
    assert!(headers.contains("200 OK"));
    let json: Value = serde_json::from_str(&body)?;
    assert_eq!(json["result"], r#"Added: ["northern cardinal", "blue jay"]"#);
    assert_eq!(json["labels"][0], "northern cardinal");
    assert_eq!(json["labels"][1], "blue jay");

    let (headers, body) = api.send("GET", "/api/birds", None)?;
    assert!(headers.contains("200 OK"));
    let birds: Vec<SpeciesRecord> = serde_json::from_str(&body)?;
    let names: Vec<&str> = birds.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["blue jay", "northern cardinal"]);
    assert!(birds.iter().all(|b| b.currently_observed));
    assert!(birds.iter().all(|b| b.hourly_observations.total() == 1));

    let raw: Value = serde_json::from_str(&body)?;
    let hourly = raw[0]["hourly_observations"]
        .as_object()
        .expect("hourly observations object");
    assert_eq!(hourly.len(), 1);
    assert!(hourly.values().all(|count| count == 1));
    Ok(())
}

#[test]
fn empty_names_only_reset_flags() -> Result<()> {
    let store = shared_store();
    let api = TestApi::new(Box::new(store.clone()), Some(TOKEN))?;

    api.send("POST", "/api/add_birds?names=cardinal", Some(TOKEN))?;
    for path in ["/api/add_birds", "/api/add_birds?names=", "/api/add_birds?names=%20,"] {
        let (headers, body) = api.send("POST", path, Some(TOKEN))?;
        assert!(headers.contains("200 OK"));
        let json: Value = serde_json::from_str(&body)?;
        assert_eq!(json["result"], "No birds observed");
        assert!(json.get("labels").is_none());
    }

    let mut view = store;
    let cardinal = view.bird("cardinal")?.expect("cardinal kept");
    assert!(!cardinal.currently_observed);
    assert_eq!(cardinal.hourly_observations.total(), 1);
    assert_eq!(view.birds()?.len(), 1);
    Ok(())
}

#[test]
fn open_writes_when_no_token_configured() -> Result<()> {
    let api = TestApi::new(Box::new(shared_store()), None)?;
    let (headers, _body) = api.send("POST", "/api/add_birds?names=house%20finch", None)?;
    assert!(headers.contains("200 OK"));
    Ok(())
}

#[test]
fn unknown_routes_and_methods() -> Result<()> {
    let api = TestApi::new(Box::new(shared_store()), Some(TOKEN))?;

    let (headers, _) = api.send("GET", "/api/birdz", None)?;
    assert!(headers.contains("404 Not Found"));

    let (headers, _) = api.send("GET", "/api/add_birds?names=cardinal", Some(TOKEN))?;
    assert!(headers.contains("405 Method Not Allowed"));

    let (headers, _) = api.send("DELETE", "/api/birds", None)?;
    assert!(headers.contains("405 Method Not Allowed"));
    Ok(())
}

#[test]
fn store_failures_are_500() -> Result<()> {
    let api = TestApi::new(Box::new(UnavailableStore), Some(TOKEN))?;

    let (headers, _) = api.send("GET", "/api/birds", None)?;
    assert!(headers.contains("500 Internal Server Error"));

    let (headers, body) = api.send("POST", "/api/add_birds?names=cardinal", Some(TOKEN))?;
    assert!(headers.contains("500 Internal Server Error"));
    assert!(body.contains("internal_server_error"));
    Ok(())
}

#[test]
fn oversize_request_is_rejected() -> Result<()> {
    let api = TestApi::new(Box::new(shared_store()), Some(TOKEN))?;

    let mut stream = TcpStream::connect(api.addr())?;
    let filler = "a".repeat(9000);
    let request = format!("GET /api/birds HTTP/1.1\r\nX-Filler: {filler}\r\n\r\n");
    stream.write_all(request.as_bytes())?;
    // the server may reset the connection with unread bytes pending
    if let Ok((headers, _)) = read_response(&mut stream) {
        assert!(headers.is_empty() || headers.contains("413"));
    }

    let (headers, _) = api.send("GET", "/health", None)?;
    assert!(headers.contains("200 OK"));
    Ok(())
}

#[test]
fn sqlite_backed_api_is_visible_to_other_connections() -> Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("birds.db").to_string_lossy().to_string();
    let api = TestApi::new(Box::new(SqliteSightingStore::open(&db_path)?), Some(TOKEN))?;

    let (headers, _) = api.send("POST", "/api/add_birds?names=Cardinal,cardinal", Some(TOKEN))?;
    assert!(headers.contains("200 OK"));

    let mut reader = SqliteSightingStore::open(&db_path)?;
    let cardinal = reader.bird("cardinal")?.expect("cardinal recorded");
    assert!(cardinal.currently_observed);
    assert_eq!(cardinal.hourly_observations.total(), 2);
    Ok(())
}
