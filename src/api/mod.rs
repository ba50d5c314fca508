use crate::observation::split_names;
use crate::storage::SightingStore;
use crate::token::FeederToken;
use anyhow::{anyhow, Result};
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_REQUEST_BYTES: usize = 8192;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    /// Token required on write requests. `None` leaves writes open.
    pub write_token: Option<FeederToken>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8000".to_string(),
            write_token: None,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    store: Box<dyn SightingStore>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, store: Box<dyn SightingStore>) -> Self {
        Self { cfg, store }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;
        if self.cfg.write_token.is_none() {
            log::warn!("bird api accepts unauthenticated writes");
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let Self { cfg, mut store } = self;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, &cfg, store.as_mut(), shutdown_thread) {
                log::error!("bird api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: &ApiConfig,
    store: &mut dyn SightingStore,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, store, cfg) {
                    log::warn!("bird api request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Route {
    Root,
    Health,
    Birds,
    AddBirds,
}

impl Route {
    fn resolve(path: &str) -> Option<Self> {
        match path {
            "/" => Some(Self::Root),
            "/health" => Some(Self::Health),
            "/api/birds" => Some(Self::Birds),
            "/api/add_birds" => Some(Self::AddBirds),
            _ => None,
        }
    }

    fn method(self) -> &'static str {
        match self {
            Self::AddBirds => "POST",
            _ => "GET",
        }
    }
}

fn handle_connection(
    mut stream: TcpStream,
    store: &mut dyn SightingStore,
    cfg: &ApiConfig,
) -> Result<()> {
    // accepted sockets may inherit the listener's non-blocking mode
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    let request = match read_request(&mut stream)? {
        Some(request) => request,
        None => {
            write_json_response(&mut stream, 413, r#"{"error":"request_too_large"}"#)?;
            return Err(anyhow!("request too large"));
        }
    };

    let route = match Route::resolve(&request.path) {
        Some(route) => route,
        None => {
            write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#)?;
            return Ok(());
        }
    };
    if request.method != route.method() {
        write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)?;
        return Ok(());
    }

    match route {
        Route::Root => write_json_response(&mut stream, 200, r#"{"message":"Hello World"}"#),
        Route::Health => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        Route::Birds => match store.birds() {
            Ok(birds) => {
                let payload = serde_json::to_vec(&birds)?;
                write_response(&mut stream, 200, "application/json", &payload)
            }
            Err(err) => {
                write_json_response(&mut stream, 500, r#"{"error":"store_unavailable"}"#)?;
                Err(err.context("list birds"))
            }
        },
        Route::AddBirds => add_birds(&mut stream, store, cfg, &request),
    }
}

fn add_birds(
    stream: &mut TcpStream,
    store: &mut dyn SightingStore,
    cfg: &ApiConfig,
    request: &HttpRequest,
) -> Result<()> {
    if request.query_param("token").is_some() {
        write_json_response(stream, 400, r#"{"error":"token_query_param_not_allowed"}"#)?;
        return Ok(());
    }
    if let Some(expected) = &cfg.write_token {
        let token = match request.bearer_token() {
            Some(token) => token,
            None => {
                write_json_response(stream, 401, r#"{"error":"missing_token"}"#)?;
                return Ok(());
            }
        };
        if !expected.matches(&token) {
            write_json_response(stream, 401, r#"{"error":"invalid_token"}"#)?;
            return Err(anyhow!("feeder token invalid"));
        }
    }

    let labels = request
        .query_param("names")
        .map(|names| split_names(&names))
        .unwrap_or_default();
    let summary = match crate::now_s().and_then(|now| store.record_sightings(&labels, now)) {
        Ok(summary) => summary,
        Err(err) => {
            write_json_response(stream, 500, r#"{"error":"internal_server_error"}"#)?;
            return Err(err.context("record sightings"));
        }
    };
    log::info!("api write: {}", summary.message());

    let body = if summary.is_empty() {
        json!({ "result": summary.message() })
    } else {
        json!({ "result": summary.message(), "labels": summary.labels() })
    };
    let payload = serde_json::to_vec(&body)?;
    write_response(stream, 200, "application/json", &payload)
}

/// Read the request head. `None` when it exceeds `MAX_REQUEST_BYTES`.
fn read_request(stream: &mut TcpStream) -> Result<Option<HttpRequest>> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Ok(None);
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (raw_path.to_string(), String::new()),
    };
    Ok(Some(HttpRequest {
        method: method.to_string(),
        path,
        query,
        headers,
    }))
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        401 => "HTTP/1.1 401 Unauthorized",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        413 => "HTTP/1.1 413 Payload Too Large",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    query: String,
    headers: HashMap<String, String>,
}

impl HttpRequest {
    fn bearer_token(&self) -> Option<String> {
        if let Some(value) = self.headers.get("authorization") {
            let parts: Vec<&str> = value.split_whitespace().collect();
            if parts.len() == 2 && parts[0].eq_ignore_ascii_case("bearer") {
                return Some(parts[1].to_string());
            }
        }
        None
    }

    /// First value of a percent-decoded query parameter.
    fn query_param(&self, name: &str) -> Option<String> {
        url::form_urlencoded::parse(self.query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}
