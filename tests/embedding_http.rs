//! HTTP embedding client behavior against a mock endpoint.

use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use dataquery::{EmbeddingConfig, EmbeddingProvider, HttpEmbeddingClient, QueryError};

fn client_config(server: &MockServer, dimension: usize) -> EmbeddingConfig {
    EmbeddingConfig {
        endpoint: format!("{}/embed", server.uri()),
        dimension,
        timeout_ms: 2_000,
    }
}

#[tokio::test]
async fn posts_query_payload_and_parses_vector() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embed"))
        .and(body_json(json!({"input": "total revenue", "type": "query"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "vector": [0.1, 0.2, 0.3, 0.4],
            "text": "total revenue"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpEmbeddingClient::new(&client_config(&server, 4)).unwrap();
    let vector = client.embed_query("total revenue").await.unwrap();
    assert_eq!(vector, vec![0.1, 0.2, 0.3, 0.4]);
}

#[tokio::test]
async fn server_error_maps_to_upstream_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embed"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = HttpEmbeddingClient::new(&client_config(&server, 4)).unwrap();
    let err = client.embed_query("anything").await.unwrap_err();
    assert!(matches!(err, QueryError::UpstreamUnavailable { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn wrong_dimension_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embed"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"vector": [0.1, 0.2]})),
        )
        .mount(&server)
        .await;

    let client = HttpEmbeddingClient::new(&client_config(&server, 4)).unwrap();
    let err = client.embed_query("anything").await.unwrap_err();
    assert!(
        matches!(&err, QueryError::UpstreamUnavailable { message } if message.contains("dimension") || message.contains("vector"))
    );
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let client = HttpEmbeddingClient::new(&client_config(&server, 4)).unwrap();
    let err = client.embed_query("anything").await.unwrap_err();
    assert!(matches!(err, QueryError::UpstreamUnavailable { .. }));
}

#[tokio::test]
async fn unreachable_endpoint_is_unavailable() {
    // Port 9 (discard) is never a live embedding endpoint
    let config = EmbeddingConfig {
        endpoint: "http://127.0.0.1:9/embed".to_string(),
        dimension: 4,
        timeout_ms: 500,
    };
    let client = HttpEmbeddingClient::new(&config).unwrap();
    let err = client.embed_query("anything").await.unwrap_err();
    assert!(matches!(
        err,
        QueryError::UpstreamUnavailable { .. } | QueryError::UpstreamTimeout { .. }
    ));
}
