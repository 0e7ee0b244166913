use assert_json_diff::assert_json_include;
use capview_relay::{RelayConfig, build_app};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn start_relay(cfg: RelayConfig) -> (String, tokio::sync::oneshot::Sender<()>, JoinHandle<()>) {
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

fn local_config() -> RelayConfig {
    RelayConfig {
        allow_http: true,
        timeout_secs: 5,
        ..Default::default()
    }
}

async fn proxy(base: &str, target: &str) -> reqwest::Response {
    reqwest::Client::new()
        .get(format!("{base}/proxy"))
        .query(&[("url", target)])
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn health_reports_service() {
    let (base, shutdown_tx, handle) = start_relay(RelayConfig::default()).await;

    let resp = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"status": "ok", "service": "FHIR CORS Proxy"}));

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn rejects_bad_targets_with_400() {
    let (base, shutdown_tx, handle) = start_relay(RelayConfig::default()).await;
    let client = reqwest::Client::new();

    let missing = client.get(format!("{base}/proxy")).send().await.unwrap();
    assert_eq!(missing.status(), 400);
    let body: Value = missing.json().await.unwrap();
    assert_eq!(body["error"], "Missing url parameter");

    let invalid = proxy(&base, "not a url").await;
    assert_eq!(invalid.status(), 400);
    let body: Value = invalid.json().await.unwrap();
    assert_eq!(body["error"], "Invalid URL format");

    let plain_http = proxy(&base, "http://hapi.fhir.org/baseR4/metadata").await;
    assert_eq!(plain_http.status(), 400);
    let body: Value = plain_http.json().await.unwrap();
    assert_eq!(body["error"], "Only HTTPS URLs are allowed");

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn mirrors_upstream_document() {
    let upstream = MockServer::start().await;
    let document = json!({"resourceType": "CapabilityStatement", "fhirVersion": "4.0.1"});
    Mock::given(method("GET"))
        .and(path("/r4/metadata"))
        .and(header("user-agent", "FHIR-CapabilityStatement-Viewer/1.0"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(document.to_string(), "application/fhir+json"),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let (base, shutdown_tx, handle) = start_relay(local_config()).await;
    let resp = proxy(&base, &format!("{}/r4/metadata?_format=json", upstream.uri())).await;

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "application/fhir+json");
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, document);

    let received = upstream.received_requests().await.unwrap();
    assert_eq!(received[0].url.query(), Some("_format=json"));
    assert_eq!(
        received[0].headers.get("accept").unwrap(),
        "application/fhir+json, application/json"
    );

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn mirrors_upstream_error_status_and_body() {
    let upstream = MockServer::start().await;
    Mock::given(path("/metadata"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no metadata here"))
        .mount(&upstream)
        .await;

    let (base, shutdown_tx, handle) = start_relay(local_config()).await;
    let resp = proxy(&base, &format!("{}/metadata", upstream.uri())).await;

    assert_eq!(resp.status(), 404);
    assert_eq!(resp.text().await.unwrap(), "no metadata here");

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn defaults_content_type_to_json() {
    let upstream = MockServer::start().await;
    Mock::given(path("/metadata"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"{}".to_vec()))
        .mount(&upstream)
        .await;

    let (base, shutdown_tx, handle) = start_relay(local_config()).await;
    let resp = proxy(&base, &format!("{}/metadata", upstream.uri())).await;

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "application/json");

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn unreachable_upstream_is_502() {
    let (base, shutdown_tx, handle) = start_relay(local_config()).await;
    let resp = proxy(&base, "http://127.0.0.1:1/metadata").await;

    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_json_include!(
        actual: body.clone(),
        expected: json!({"error": "Failed to fetch from FHIR server"})
    );
    assert!(body["details"].as_str().is_some_and(|d| !d.is_empty()));

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}

#[tokio::test]
async fn responses_allow_any_origin() {
    let (base, shutdown_tx, handle) = start_relay(RelayConfig::default()).await;

    let resp = reqwest::Client::new()
        .get(format!("{base}/proxy"))
        .header("origin", "https://viewer.example.org")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(resp.headers()["access-control-allow-origin"], "*");

    let _ = shutdown_tx.send(());
    let _ = handle.await;
}
