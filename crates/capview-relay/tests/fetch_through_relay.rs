use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use capview_core::{
    FailureKind, FetchOutcome, FetchRequest, FetchStage, HttpRequest, HttpResponse, RelayEndpoint,
    ReqwestTransport, ResilientFetcher, Transport, TransportConfig, TransportError,
};
use capview_relay::{RelayConfig, build_app};
use serde_json::json;
use tokio::task::JoinHandle;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Refuses direct connections to one origin and sends everything else over
/// the network, the way a browser blocks a server without CORS headers.
struct BlockedOrigin {
    origin: String,
    inner: ReqwestTransport,
}

impl BlockedOrigin {
    fn new(origin: &str) -> Arc<dyn Transport> {
        let inner = ReqwestTransport::new(&TransportConfig {
            timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        })
        .expect("reqwest client");
        Arc::new(Self {
            // Trailing slash keeps `:1` from matching `:1xxxx`.
            origin: format!("{}/", origin.trim_end_matches('/')),
            inner,
        })
    }
}

#[async_trait]
impl Transport for BlockedOrigin {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        if request.url.starts_with(&self.origin) {
            return Err(TransportError::connect("network error: failed to fetch"));
        }
        self.inner.send(request).await
    }
}

async fn start_relay() -> (String, tokio::sync::oneshot::Sender<()>, JoinHandle<()>) {
    let cfg = RelayConfig {
        allow_http: true,
        timeout_secs: 5,
        ..Default::default()
    };
    let app = build_app(&cfg).expect("app");

    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    (format!("http://{}", addr), tx, server)
}

async fn upstream_with_metadata() -> MockServer {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/r4/metadata"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resourceType": "CapabilityStatement",
            "fhirVersion": "4.0.1",
            "software": {"name": "Upstream"}
        })))
        .expect(1)
        .mount(&upstream)
        .await;
    upstream
}

#[tokio::test]
async fn self_hosted_relay_as_first_relay() {
    let upstream = upstream_with_metadata().await;
    let (relay, shutdown_tx, handle) = start_relay().await;

    let fetcher = ResilientFetcher::with_relays(
        BlockedOrigin::new(&upstream.uri()),
        Some(RelayEndpoint::query(format!("{relay}/proxy"))),
        None,
    );
    let request = FetchRequest::parse(&format!("{}/r4/metadata", upstream.uri())).unwrap();

    let FetchOutcome::Success {
        document, source, repaired,
    } = fetcher.fetch(&request).await
    else {
        panic!("expected the relay to deliver the document");
    };
    assert_eq!(source, FetchStage::RelayA);
    assert!(!repaired);
    assert_eq!(document["software"]["name"], "Upstream");

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn self_hosted_relay_as_second_relay() {
    let upstream = upstream_with_metadata().await;
    let (relay, shutdown_tx, handle) = start_relay().await;

    // First relay is down, so the pipeline falls through to the second slot.
    let fetcher = ResilientFetcher::with_relays(
        BlockedOrigin::new(&upstream.uri()),
        Some(RelayEndpoint::envelope("http://127.0.0.1:1/get")),
        Some(RelayEndpoint::query(format!("{relay}/proxy"))),
    );
    let request = FetchRequest::parse(&format!("{}/r4/metadata", upstream.uri())).unwrap();

    let outcome = fetcher.fetch(&request).await;
    let FetchOutcome::Success { source, document, .. } = outcome else {
        panic!("expected the second relay to deliver the document");
    };
    assert_eq!(source, FetchStage::RelayB);
    assert_eq!(document["fhirVersion"], "4.0.1");

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn relay_mirrors_upstream_http_errors() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/r4/metadata"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
        .mount(&upstream)
        .await;
    let (relay, shutdown_tx, handle) = start_relay().await;

    let fetcher = ResilientFetcher::with_relays(
        BlockedOrigin::new(&upstream.uri()),
        Some(RelayEndpoint::query(format!("{relay}/proxy"))),
        None,
    );
    let request = FetchRequest::parse(&format!("{}/r4/metadata", upstream.uri())).unwrap();

    let failure = fetcher.fetch(&request).await.failure().cloned().unwrap();
    assert_eq!(failure.stage, FetchStage::RelayA);
    assert_eq!(failure.kind, FailureKind::Http);
    assert_eq!(failure.http_status, Some(404));

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn unreachable_upstream_escalates_past_the_relay() {
    let (relay, shutdown_tx, handle) = start_relay().await;

    let fetcher = ResilientFetcher::with_relays(
        BlockedOrigin::new("http://127.0.0.1:1"),
        Some(RelayEndpoint::query(format!("{relay}/proxy"))),
        None,
    );
    let request = FetchRequest::parse("http://127.0.0.1:1/r4/metadata").unwrap();

    let failure = fetcher.fetch(&request).await.failure().cloned().unwrap();
    assert_eq!(failure.stage, FetchStage::RelayA);
    assert_eq!(failure.kind, FailureKind::Transport);
    assert!(failure.message.contains("Failed to fetch from FHIR server"));

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}
