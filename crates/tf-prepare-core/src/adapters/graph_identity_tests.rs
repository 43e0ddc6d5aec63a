//! Tests for the Graph identity resolver.

use super::*;
use crate::credential::StaticTokenCredential;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn resolver(server: &MockServer) -> GraphIdentityResolver {
    GraphIdentityResolver::new(
        Arc::new(StaticTokenCredential::new("graph-token")),
        &ArmClientConfig::default().with_graph_url(format!("{}/", server.uri())),
    )
    .unwrap()
}

#[tokio::test]
async fn test_returns_object_id_of_signed_in_user() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1.0/me"))
        .and(header("Authorization", "Bearer graph-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "@odata.context": "https://graph.microsoft.com/v1.0/$metadata#users/$entity",
            "id": "11111111-2222-3333-4444-555555555555"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let object_id = resolver(&server)
        .current_object_id("tenant-1")
        .await
        .unwrap();
    assert_eq!(object_id, "11111111-2222-3333-4444-555555555555");
}

#[tokio::test]
async fn test_missing_id_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1.0/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "displayName": "x" })))
        .mount(&server)
        .await;

    let err = resolver(&server)
        .current_object_id("tenant-1")
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_service_principal_token_is_rejected_with_graph_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1.0/me"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "code": "BadRequest",
                "message": "/me request is only valid with delegated authentication flow."
            }
        })))
        .mount(&server)
        .await;

    let err = resolver(&server)
        .current_object_id("tenant-1")
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(400));
    assert_eq!(err.code(), Some("BadRequest"));
}

#[test]
fn test_relative_graph_url_is_rejected() {
    let result = GraphIdentityResolver::new(
        Arc::new(StaticTokenCredential::new("graph-token")),
        &ArmClientConfig::default().with_graph_url("/v1.0"),
    );
    assert!(matches!(result, Err(ApiError::Configuration(_))));
}
