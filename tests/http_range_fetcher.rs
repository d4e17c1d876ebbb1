//! HTTP collaborators against a local hyper server

use hyper::header::{CONTENT_LENGTH, CONTENT_RANGE, HOST, RANGE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use kiosk_core::config::{ControlServerConfig, DownloaderConfig, KioskConfig, StorageConfig};
use kiosk_core::download::{DownloadOrchestrator, HttpRangeFetcher, RangeFetcher, WorkflowState};
use kiosk_core::error::KioskError;
use kiosk_core::manifest::{ContentItem, ContentKind};
use kiosk_core::remote::{
    CloudDiskResolver, ControlServer, ExchangeReport, HttpControlServer, ManagementAction, UrlResolver,
};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const TOKEN: &str = "device-123";

struct ServerState {
    content: Vec<u8>,
    /// `(title, path)` of every manifest entry, all served as images
    manifest: Vec<(&'static str, &'static str)>,
    manifest_polls: AtomicUsize,
    exchange_bodies: Mutex<Vec<serde_json::Value>>,
}

fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// `bytes=S-E` → `(S, E)`, clamped to the resource
fn requested_range(req: &Request<Body>, len: usize) -> Option<(usize, usize)> {
    let header = req.headers().get(RANGE)?.to_str().ok()?;
    let (start, end) = header.strip_prefix("bytes=")?.split_once('-')?;
    let start: usize = start.parse().ok()?;
    let end: usize = end.parse().ok()?;
    Some((start, end.min(len - 1)))
}

async fn handle(req: Request<Body>, state: Arc<ServerState>) -> Result<Response<Body>, Infallible> {
    let host = req
        .headers()
        .get(HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let authorized = req
        .headers()
        .get("device_token")
        .map_or(false, |v| v.as_bytes() == TOKEN.as_bytes());

    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (&method, path.as_str()) {
        (&Method::GET, "/content") => match requested_range(&req, state.content.len()) {
            Some((start, end)) => Response::builder()
                .status(StatusCode::PARTIAL_CONTENT)
                .header(CONTENT_RANGE, format!("bytes {}-{}/{}", start, end, state.content.len()))
                .body(Body::from(state.content[start..=end].to_vec()))
                .unwrap(),
            None => Response::new(Body::from(state.content.clone())),
        },
        // Ignores Range headers entirely
        (&Method::GET, "/plain") => Response::builder()
            .header(CONTENT_LENGTH, state.content.len())
            .body(Body::from(state.content.clone()))
            .unwrap(),
        (&Method::GET, "/lookup") => {
            let query = req.uri().query().unwrap_or_default();
            assert!(query.starts_with("public_key=https%3A%2F%2Fdisk.yandex.ru"), "query: {}", query);
            Response::new(Body::from(
                serde_json::json!({ "href": format!("http://{}/content", host) }).to_string(),
            ))
        }
        (&Method::GET, "/api/remote-devices/content-to-upload") if authorized => {
            state.manifest_polls.fetch_add(1, Ordering::SeqCst);
            let manifest: Vec<serde_json::Value> = state
                .manifest
                .iter()
                .enumerate()
                .map(|(i, (title, path))| {
                    serde_json::json!({
                        "id": 7 + i,
                        "title": title,
                        "format": "image",
                        "url": format!("http://{}{}", host, path)
                    })
                })
                .collect();
            Response::new(Body::from(serde_json::Value::Array(manifest).to_string()))
        }
        (&Method::POST, "/api/remote-devices/exchange-info") if authorized => {
            let bytes = hyper::body::to_bytes(req.into_body()).await.unwrap_or_default();
            if let Ok(body) = serde_json::from_slice(&bytes) {
                state.exchange_bodies.lock().unwrap().push(body);
            }
            let info = serde_json::json!({
                "session_title": "",
                "management": { "need_centering": false, "action": "upload" }
            });
            Response::new(Body::from(info.to_string()))
        }
        (_, path) if path.starts_with("/api/") => Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .body(Body::from("missing device token"))
            .unwrap(),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::empty())
            .unwrap(),
    };
    Ok(response)
}

async fn spawn_server(len: usize) -> (SocketAddr, Arc<ServerState>) {
    spawn_server_with_manifest(len, vec![("Ocean", "/content")]).await
}

async fn spawn_server_with_manifest(
    len: usize,
    manifest: Vec<(&'static str, &'static str)>,
) -> (SocketAddr, Arc<ServerState>) {
    let state = Arc::new(ServerState {
        content: content(len),
        manifest,
        manifest_polls: AtomicUsize::new(0),
        exchange_bodies: Mutex::new(Vec::new()),
    });

    let shared = state.clone();
    let make_service = make_service_fn(move |_conn| {
        let state = shared.clone();
        async move { Ok::<_, Infallible>(service_fn(move |req| handle(req, state.clone()))) }
    });

    let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make_service);
    let addr = server.local_addr();
    tokio::spawn(server);
    (addr, state)
}

fn fetcher() -> HttpRangeFetcher {
    let config = DownloaderConfig::builder().probe_range_bytes(64).build();
    HttpRangeFetcher::new(&config).unwrap()
}

fn control_config(addr: SocketAddr, token: &str) -> ControlServerConfig {
    ControlServerConfig {
        dev_base_url: format!("http://{}/api", addr),
        device_token: token.to_string(),
        request_timeout_secs: 5,
        ..ControlServerConfig::default()
    }
}

#[tokio::test]
async fn probe_reads_total_from_content_range() {
    let (addr, _) = spawn_server(5000).await;
    let total = fetcher()
        .probe_total_length(&format!("http://{}/content", addr))
        .await
        .unwrap()
        .total;
    assert_eq!(total, 5000);
}

#[tokio::test]
async fn probe_falls_back_to_content_length() {
    let (addr, _) = spawn_server(700).await;
    let total = fetcher()
        .probe_total_length(&format!("http://{}/plain", addr))
        .await
        .unwrap()
        .total;
    assert_eq!(total, 700);
}

#[tokio::test]
async fn fetch_writes_exact_range() {
    let (addr, state) = spawn_server(3000).await;
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("part1.tmp");

    let written = fetcher()
        .fetch(&format!("http://{}/content", addr), 1000, 1999, &dest)
        .await
        .unwrap();

    assert_eq!(written, 1000);
    assert_eq!(std::fs::read(&dest).unwrap(), &state.content[1000..2000]);
}

#[tokio::test]
async fn fetch_rejects_ignored_range() {
    let (addr, _) = spawn_server(3000).await;
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("part1.tmp");

    let err = fetcher()
        .fetch(&format!("http://{}/plain", addr), 1000, 1999, &dest)
        .await
        .unwrap_err();

    assert!(matches!(err, KioskError::RangeNotHonored { start: 1000, end: 1999 }));
    assert!(!dest.exists());
}

#[tokio::test]
async fn full_response_accepted_when_it_is_the_range() {
    let (addr, state) = spawn_server(500).await;
    let dir = TempDir::new().unwrap();
    let dest = dir.path().join("part0.tmp");

    let written = fetcher()
        .fetch(&format!("http://{}/plain", addr), 0, 499, &dest)
        .await
        .unwrap();

    assert_eq!(written, 500);
    assert_eq!(std::fs::read(&dest).unwrap(), state.content);
}

#[tokio::test]
async fn missing_content_is_status_error() {
    let (addr, _) = spawn_server(10).await;
    let dir = TempDir::new().unwrap();

    let err = fetcher()
        .fetch(&format!("http://{}/gone", addr), 0, 9, &dir.path().join("p.tmp"))
        .await
        .unwrap_err();

    assert!(matches!(err, KioskError::UnexpectedStatusCode { status_code: 404, .. }));
}

#[tokio::test]
async fn cloud_disk_links_resolve_through_lookup_api() {
    let (addr, _) = spawn_server(10).await;
    let resolver = CloudDiskResolver::with_api_url(reqwest::Client::new(), format!("http://{}/lookup", addr));
    let item = ContentItem::new("1", "Alps", ContentKind::Video3D, "https://disk.yandex.ru/d/abc123");

    let url = resolver.resolve(&item).await.unwrap();
    assert_eq!(url, format!("http://{}/content", addr));
}

#[tokio::test]
async fn control_server_requires_device_token() {
    let (addr, _) = spawn_server(10).await;

    let rejected = HttpControlServer::new(&control_config(addr, "wrong")).unwrap();
    let err = rejected.fetch_manifest().await.unwrap_err();
    assert!(matches!(err, KioskError::ControlServerFailed { status_code: Some(401), .. }));

    let accepted = HttpControlServer::new(&control_config(addr, TOKEN)).unwrap();
    let manifest = accepted.fetch_manifest().await.unwrap();
    assert_eq!(manifest.len(), 1);
    assert_eq!(manifest.items()[0].id, "7");
    assert_eq!(manifest.items()[0].kind, ContentKind::Image);
}

#[tokio::test]
async fn exchange_returns_management_action() {
    let (addr, state) = spawn_server(10).await;
    let server = HttpControlServer::new(&control_config(addr, TOKEN)).unwrap();

    let info = server.send_exchange(&ExchangeReport::default()).await.unwrap();
    assert!(!info.has_session());
    assert_eq!(info.action(), Some(ManagementAction::StartDownload));

    let bodies = state.exchange_bodies.lock().unwrap();
    assert_eq!(bodies.len(), 1);
    assert!(bodies[0]["settings"]["free_memory"].is_number());
}

#[tokio::test]
async fn configured_orchestrator_downloads_manifest() {
    let (addr, state) = spawn_server(2500).await;
    let dir = TempDir::new().unwrap();

    let config = KioskConfig {
        downloader: DownloaderConfig::builder()
            .chunk_size(1000)
            .probe_range_bytes(64)
            .restart_delay(Duration::from_millis(10))
            .build(),
        control: control_config(addr, TOKEN),
        storage: StorageConfig {
            primary_path: dir.path().to_path_buf(),
            ..StorageConfig::default()
        },
    };

    let orchestrator = DownloadOrchestrator::from_config(config).unwrap();
    assert_eq!(orchestrator.run().await, Some(WorkflowState::Completed));

    let artifact = dir.path().join("RCMS Gallery").join("Ocean.png");
    assert_eq!(std::fs::read(artifact).unwrap(), state.content);

    let bodies = state.exchange_bodies.lock().unwrap();
    let loading = &bodies.last().unwrap()["loading_info"];
    assert_eq!(loading["loading_content_id"], 7);
    assert_eq!(loading["loaded_bytes_of_total"], 2500);
    assert_eq!(loading["last_content"], true);
}

#[tokio::test]
async fn orchestrator_completes_when_host_ignores_ranges() {
    let (addr, state) = spawn_server_with_manifest(2500, vec![("Plain", "/plain"), ("Ocean", "/content")]).await;
    let dir = TempDir::new().unwrap();

    let config = KioskConfig {
        downloader: DownloaderConfig::builder()
            .chunk_size(1000)
            .probe_range_bytes(64)
            .restart_delay(Duration::from_millis(10))
            .build(),
        control: control_config(addr, TOKEN),
        storage: StorageConfig {
            primary_path: dir.path().to_path_buf(),
            ..StorageConfig::default()
        },
    };

    let orchestrator = DownloadOrchestrator::from_config(config).unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(10), orchestrator.run())
        .await
        .expect("workflow must finish");
    assert_eq!(outcome, Some(WorkflowState::Completed));

    let gallery = dir.path().join("RCMS Gallery");
    assert_eq!(std::fs::read(gallery.join("Plain.png")).unwrap(), state.content);
    assert_eq!(std::fs::read(gallery.join("Ocean.png")).unwrap(), state.content);
    // Pass start, one check for the single whole-body range, three for Ocean
    assert_eq!(state.manifest_polls.load(Ordering::SeqCst), 5);
}
