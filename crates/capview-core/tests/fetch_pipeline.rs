use std::sync::Arc;
use std::time::Duration;

use capview_core::classify::{ErrorCategory, classify};
use capview_core::{
    FailureKind, FetchOutcome, FetchRequest, FetchStage, RelayEndpoint, ReqwestTransport,
    ResilientFetcher, Transport, TransportConfig, load_capability_statement,
};
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// Nothing listens on port 1, so direct requests fail at transport level.
const UNREACHABLE: &str = "http://127.0.0.1:1/r4/metadata";

fn transport() -> Arc<dyn Transport> {
    Arc::new(
        ReqwestTransport::new(&TransportConfig {
            timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        })
        .expect("reqwest client"),
    )
}

fn fetcher_for(relays: &MockServer) -> ResilientFetcher {
    ResilientFetcher::with_relays(
        transport(),
        Some(RelayEndpoint::envelope(format!("{}/get", relays.uri()))),
        Some(RelayEndpoint::raw(format!("{}/raw/", relays.uri()))),
    )
}

fn capability() -> serde_json::Value {
    json!({
        "resourceType": "CapabilityStatement",
        "status": "active",
        "fhirVersion": "4.0.1",
        "rest": [{"mode": "server", "resource": [{"type": "Patient", "interaction": [{"code": "read"}]}]}]
    })
}

#[tokio::test]
async fn direct_fetch_loads_capability_statement() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/r4/metadata"))
        .and(query_param("_format", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(capability()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path("/get")).respond_with(ResponseTemplate::new(500)).expect(0).mount(&server).await;

    let fetcher = fetcher_for(&server);
    let request = FetchRequest::parse(&format!("{}/r4/metadata", server.uri())).unwrap();
    let doc = load_capability_statement(&fetcher, &request).await.unwrap();

    assert_eq!(doc.fhir_version(), "4.0.1");
    assert_eq!(doc.base_url(), format!("{}/r4", server.uri()));
    assert_eq!(doc.resource("Patient").unwrap().interactions, vec!["read"]);
}

#[tokio::test]
async fn direct_http_error_is_not_relayed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/r4/metadata"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
        .mount(&server)
        .await;
    Mock::given(path("/get")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;
    Mock::given(path("/raw/")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;

    let fetcher = fetcher_for(&server);
    let request = FetchRequest::parse(&format!("{}/r4/metadata", server.uri())).unwrap();
    let failure = fetcher.fetch(&request).await.into_result().unwrap_err();

    assert_eq!(failure.stage, FetchStage::DirectFetch);
    assert_eq!(failure.kind, FailureKind::Http);
    assert_eq!(failure.http_status, Some(404));
    assert_eq!(failure.message, "HTTP 404: Not Found");
}

#[tokio::test]
async fn transport_failure_falls_back_to_envelope_relay() {
    let relays = MockServer::start().await;
    let target = format!("{UNREACHABLE}?_format=json");
    Mock::given(method("GET"))
        .and(path("/get"))
        .and(query_param("url", target.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": {"http_code": 200},
            "contents": capability().to_string()
        })))
        .expect(1)
        .mount(&relays)
        .await;
    Mock::given(path("/raw/")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&relays).await;

    let outcome = fetcher_for(&relays).fetch(&FetchRequest::parse(UNREACHABLE).unwrap()).await;
    match outcome {
        FetchOutcome::Success { document, source, repaired } => {
            assert_eq!(source, FetchStage::RelayA);
            assert!(!repaired);
            assert_eq!(document, capability());
        }
        FetchOutcome::Failure(f) => panic!("expected success, got {f}"),
    }
}

#[tokio::test]
async fn relay_outage_escalates_to_raw_relay_with_repair() {
    let relays = MockServer::start().await;
    Mock::given(path("/get"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&relays)
        .await;
    let malformed = "{\r\n  \"resourceType\": \"CapabilityStatement\",\r\n  \"fhirVersion\": \"4.0.1\",\r\n}";
    Mock::given(method("GET"))
        .and(path("/raw/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(malformed))
        .expect(1)
        .mount(&relays)
        .await;

    let outcome = fetcher_for(&relays).fetch(&FetchRequest::parse(UNREACHABLE).unwrap()).await;
    let FetchOutcome::Success { document, source, repaired } = outcome else {
        panic!("expected success");
    };
    assert_eq!(source, FetchStage::RelayB);
    assert!(repaired);
    assert_eq!(document["fhirVersion"], "4.0.1");
}

#[tokio::test]
async fn exhausted_paths_are_classified_with_both_causes() {
    let relays = MockServer::start().await;
    Mock::given(path("/get")).respond_with(ResponseTemplate::new(502)).mount(&relays).await;
    Mock::given(path("/raw/")).respond_with(ResponseTemplate::new(500)).mount(&relays).await;

    let failure = fetcher_for(&relays)
        .fetch(&FetchRequest::parse(UNREACHABLE).unwrap())
        .await
        .into_result()
        .unwrap_err();
    assert_eq!(failure.stage, FetchStage::RelayB);
    assert!(failure.message.contains("Direct error: network error"));
    assert!(failure.message.contains("Relay error: Alternative relay request failed: HTTP 500"));

    let classified = classify(&failure, UNREACHABLE);
    assert_eq!(classified.category, ErrorCategory::AllPathsFailed);
    assert!(classified.to_string().contains(UNREACHABLE));
}

#[tokio::test]
async fn non_capability_document_is_rejected_at_parse_stage() {
    let server = MockServer::start().await;
    Mock::given(path("/r4/metadata"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"resourceType": "Patient", "id": "1"})))
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server);
    let request = FetchRequest::parse(&format!("{}/r4/metadata", server.uri())).unwrap();
    let failure = load_capability_statement(&fetcher, &request).await.unwrap_err();

    assert_eq!(failure.stage, FetchStage::Parse);
    assert_eq!(failure.kind, FailureKind::Validation);
    assert_eq!(classify(&failure, &request.url).category, ErrorCategory::Unclassified);
}

#[tokio::test]
async fn html_page_gets_distinct_message() {
    let server = MockServer::start().await;
    Mock::given(path("/r4/metadata"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<!DOCTYPE html><html><body>Login</body></html>"),
        )
        .mount(&server)
        .await;

    let fetcher = fetcher_for(&server);
    let request = FetchRequest::parse(&format!("{}/r4/metadata", server.uri())).unwrap();
    let failure = fetcher.fetch(&request).await.into_result().unwrap_err();

    assert_eq!(failure.kind, FailureKind::Html);
    assert!(failure.message.starts_with("The server returned an HTML page instead of JSON"));
}
