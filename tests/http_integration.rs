//! Integration tests for the Cloud Controller client using wiremock
//!
//! A mock server plays both the UAA token endpoint and the Cloud
//! Controller, so login, paging, error classification and the facade are
//! exercised over real HTTP.

use cfkit::cf::auth::{
    AuthEndpoint, Credentials, LoginHintGrant, PasswordGrant, TokenExchangeGrant, TokenManager,
};
use cfkit::cf::client::{discover_auth_url, CfClient, LoginOptions};
use cfkit::cf::http::CfHttpClient;
use cfkit::cf::provider::{ApiVersion, ListQuery, ResourceProvider};
use cfkit::error::CfError;
use cfkit::resource::{drain_all, fetcher::pages, CloudControllerClient};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use wiremock::matchers::{bearer_token, body_string_contains, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const APP_A: &str = "6f5e0a3c-2c43-4f5b-9c6c-0a1b2c3d4e5f";
const APP_B: &str = "7a6b5c4d-3e2f-4a1b-8c9d-0e1f2a3b4c5d";
const APP_C: &str = "11111111-1111-4111-8111-111111111111";
const SPACE: &str = "0c3e9b8a-1d2f-4a5b-8c7d-6e5f4a3b2c1d";
const DOMAIN: &str = "9a8b7c6d-5e4f-4a3b-9c2d-1e0f9a8b7c6d";
const ROUTE: &str = "22222222-3333-4444-8555-666666666666";

fn token_body(access_token: &str, expires_in: i64) -> serde_json::Value {
    json!({
        "access_token": access_token,
        "token_type": "bearer",
        "expires_in": expires_in,
        "scope": "cloud_controller.read cloud_controller.write",
        "refresh_token": format!("{}-refresh", access_token),
        "jti": "abc123"
    })
}

async fn mount_password_grant(server: &MockServer, access_token: &str) {
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(access_token, 3600)))
        .mount(server)
        .await;
}

fn endpoint(server: &MockServer) -> AuthEndpoint {
    AuthEndpoint::new(reqwest::Client::new(), &server.uri())
}

async fn login(server: &MockServer) -> CfClient {
    mount_password_grant(server, "test-token").await;
    let options = LoginOptions {
        auth_url: Some(server.uri()),
        page_size: Some(2),
        ..Default::default()
    };
    CfClient::login(&server.uri(), Credentials::password("admin", "secret"), &options)
        .await
        .expect("login should succeed")
}

/// Token endpoint tests
mod token_tests {
    use super::*;

    #[tokio::test]
    async fn test_password_grant() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=password"))
            .and(body_string_contains("username=admin"))
            .and(body_string_contains("password=secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("user-token", 3600)))
            .expect(1)
            .mount(&server)
            .await;

        let manager = TokenManager::new(Arc::new(PasswordGrant::new(endpoint(&server))));
        let token = manager
            .init(Credentials::password("admin", "secret"))
            .await
            .unwrap();

        assert_eq!(token.value, "user-token");
        assert!(token.scopes.contains("cloud_controller.read"));
        assert_eq!(token.refresh_token(), Some("user-token-refresh"));
        assert_eq!(token.additional_claims.get("jti"), Some(&json!("abc123")));

        // Still valid: no second request.
        assert_eq!(manager.bearer().await.unwrap().as_deref(), Some("user-token"));
    }

    #[tokio::test]
    async fn test_login_hint_grant_sends_origin() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("login_hint=%7B%22origin%22%3A%22ldap%22%7D"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("ldap-token", 3600)))
            .expect(1)
            .mount(&server)
            .await;

        let manager = TokenManager::new(Arc::new(LoginHintGrant::new(endpoint(&server), "ldap")));
        let token = manager
            .init(Credentials::password("admin", "secret"))
            .await
            .unwrap();
        assert_eq!(token.value, "ldap-token");
    }

    #[tokio::test]
    async fn test_expiring_token_uses_refresh_grant() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=password"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("short", 10)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=short-refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("fresh", 3600)))
            .expect(1)
            .mount(&server)
            .await;

        let manager = TokenManager::new(Arc::new(PasswordGrant::new(endpoint(&server))));
        manager
            .init(Credentials::password("admin", "secret"))
            .await
            .unwrap();

        assert_eq!(manager.bearer().await.unwrap().as_deref(), Some("fresh"));
        assert_eq!(manager.bearer().await.unwrap().as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_rejected_refresh_falls_back_to_password() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "invalid_token",
                "error_description": "refresh token expired"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=password"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("short", 10)))
            .expect(2)
            .mount(&server)
            .await;

        let manager = TokenManager::new(Arc::new(PasswordGrant::new(endpoint(&server))));
        manager
            .init(Credentials::password("admin", "secret"))
            .await
            .unwrap();

        assert_eq!(manager.bearer().await.unwrap().as_deref(), Some("short"));
    }

    #[tokio::test]
    async fn test_token_exchange_sets_claim() {
        let server = MockServer::start().await;

        mount_password_grant(&server, "user-token").await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains(
                "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Atoken-exchange",
            ))
            .and(body_string_contains("subject_token=user-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "exchanged-token",
                "token_type": "bearer",
                "expires_in": 600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let inner = Arc::new(PasswordGrant::new(endpoint(&server)));
        let manager = TokenManager::new(Arc::new(TokenExchangeGrant::new(endpoint(&server), inner)));
        let token = manager
            .init(Credentials::password("admin", "secret"))
            .await
            .unwrap();

        assert_eq!(token.value, "user-token");
        assert_eq!(token.effective_value(), "exchanged-token");
        assert_eq!(manager.bearer().await.unwrap().as_deref(), Some("exchanged-token"));
    }

    #[tokio::test]
    async fn test_bad_credentials_fail_authentication() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "unauthorized",
                "error_description": "Bad credentials"
            })))
            .mount(&server)
            .await;

        let manager = TokenManager::new(Arc::new(PasswordGrant::new(endpoint(&server))));
        let err = manager
            .init(Credentials::password("admin", "wrong"))
            .await
            .unwrap_err();

        match err {
            CfError::AuthenticationFailed(message) => assert!(message.contains("Bad credentials")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(manager.bearer().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_discover_auth_url() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/info"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "cf",
                "authorization_endpoint": "https://login.example.com",
                "token_endpoint": "https://uaa.example.com"
            })))
            .mount(&server)
            .await;

        let http = CfHttpClient::new().unwrap();
        let url = discover_auth_url(&http, &server.uri()).await.unwrap();
        assert_eq!(url, "https://uaa.example.com");
    }

    #[tokio::test]
    async fn test_login_discovers_uaa() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v2/info"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "token_endpoint": server.uri() })),
            )
            .expect(1)
            .mount(&server)
            .await;
        mount_password_grant(&server, "discovered").await;

        let client = CfClient::login(
            &server.uri(),
            Credentials::password("admin", "secret"),
            &LoginOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(client.tokens.bearer().await.unwrap().as_deref(), Some("discovered"));
        assert_eq!(client.tokens.strategy_name(), "password");
    }
}

/// Paging and error classification tests
mod provider_tests {
    use super::*;

    fn v3_page(guids: &[&str], total_pages: u32, next: Option<&str>) -> serde_json::Value {
        json!({
            "pagination": {"total_results": 3, "total_pages": total_pages, "next": next.map(|n| json!({"href": n}))},
            "resources": guids.iter().map(|g| json!({"guid": g, "name": format!("app-{}", &g[..4])})).collect::<Vec<_>>()
        })
    }

    #[tokio::test]
    async fn test_v3_paging_drains_every_page() {
        let server = MockServer::start().await;
        let client = login(&server).await;

        Mock::given(method("GET"))
            .and(path("/v3/apps"))
            .and(query_param("page", "1"))
            .and(query_param("per_page", "2"))
            .and(bearer_token("test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(v3_page(
                &[APP_A, APP_B],
                2,
                Some("/v3/apps?page=2"),
            )))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v3/apps"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(v3_page(&[APP_C], 2, None)))
            .expect(1)
            .mount(&server)
            .await;

        let query = ListQuery::v3("/v3/apps");
        let records = drain_all(pages(&client, &query)).await.unwrap();
        let guids: Vec<_> = records.iter().filter_map(|r| r.guid.as_deref()).collect();
        assert_eq!(guids, vec![APP_A, APP_B, APP_C]);
    }

    #[tokio::test]
    async fn test_v2_paging_and_filters() {
        let server = MockServer::start().await;
        let client = login(&server).await;

        Mock::given(method("GET"))
            .and(path("/v2/stacks"))
            .and(query_param("page", "1"))
            .and(query_param("results-per-page", "2"))
            .and(query_param("q", "name:cflinuxfs4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "total_results": 1,
                "total_pages": 1,
                "next_url": null,
                "resources": [{
                    "metadata": {"guid": "77777777-8888-4999-8aaa-bbbbbbbbbbbb", "created_at": "2024-01-01T00:00:00Z"},
                    "entity": {"name": "cflinuxfs4", "description": "Ubuntu 22.04"}
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let facade = CloudControllerClient::new(Arc::new(client));
        let stack = facade
            .get_stack_by_name("cflinuxfs4", true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stack.name, "cflinuxfs4");
        assert_eq!(stack.description.as_deref(), Some("Ubuntu 22.04"));
        assert!(stack.meta.is_some());
    }

    #[tokio::test]
    async fn test_error_classification() {
        let server = MockServer::start().await;
        let client = login(&server).await;

        let cases = [
            (404, "/v3/apps/missing"),
            (422, "/v3/apps/invalid"),
            (503, "/v3/apps/busy"),
            (502, "/v3/apps/broker"),
            (403, "/v3/apps/forbidden"),
        ];
        for (status, route) in cases {
            Mock::given(method("GET"))
                .and(path(route))
                .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                    "errors": [{"code": 10000, "title": "CF-Something", "detail": "went wrong"}]
                })))
                .mount(&server)
                .await;
        }

        let get = |route: &'static str| client.get(ApiVersion::V3, route);

        assert!(get("/v3/apps/missing").await.unwrap_err().is_not_found());
        assert!(matches!(get("/v3/apps/invalid").await.unwrap_err(), CfError::Invalid(_)));
        assert!(get("/v3/apps/busy").await.unwrap_err().is_transient());
        assert!(matches!(
            get("/v3/apps/broker").await.unwrap_err(),
            CfError::Transient { status: 502, .. }
        ));
        assert!(matches!(
            get("/v3/apps/forbidden").await.unwrap_err(),
            CfError::Unauthorized(_)
        ));
    }

    #[tokio::test]
    async fn test_accepted_delete_is_complete() {
        let server = MockServer::start().await;
        let client = login(&server).await;

        Mock::given(method("DELETE"))
            .and(path(format!("/v3/apps/{}", APP_A)))
            .respond_with(
                ResponseTemplate::new(202).insert_header("Location", "/v3/jobs/job-1"),
            )
            .expect(1)
            .mount(&server)
            .await;

        client
            .delete(ApiVersion::V3, &format!("/v3/apps/{}", APP_A))
            .await
            .unwrap();
    }
}

/// End-to-end facade tests
mod facade_tests {
    use super::*;

    async fn facade(server: &MockServer) -> CloudControllerClient<CfClient> {
        let client = login(server).await;
        CloudControllerClient::new(Arc::new(client)).with_space(Uuid::parse_str(SPACE).unwrap())
    }

    #[tokio::test]
    async fn test_get_applications_with_processes() {
        let server = MockServer::start().await;
        let facade = facade(&server).await;

        Mock::given(method("GET"))
            .and(path("/v3/apps"))
            .and(query_param("space_guids", SPACE))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "pagination": {"total_pages": 1, "next": null},
                "resources": [
                    {"guid": APP_B, "name": "worker", "state": "STOPPED"},
                    {"guid": APP_A, "name": "api", "state": "STARTED"}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/v3/apps/{}/processes/web", APP_A)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "guid": "aaaaaaaa-0000-4000-8000-000000000000",
                "type": "web",
                "instances": 3,
                "memory_in_mb": 512
            })))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/v3/apps/[^/]+/processes/web$"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "errors": [{"code": 10010, "title": "CF-ResourceNotFound", "detail": "Process not found"}]
            })))
            .mount(&server)
            .await;

        let apps = facade.get_applications().await.unwrap();
        assert_eq!(apps.len(), 2);
        assert_eq!(apps[0].name, "api");
        assert_eq!(apps[0].instances, Some(3));
        assert_eq!(apps[0].memory_mb, Some(512));
        assert_eq!(apps[1].name, "worker");
        assert!(apps[1].instances.is_none());
    }

    #[tokio::test]
    async fn test_add_route_end_to_end() {
        let server = MockServer::start().await;
        let facade = facade(&server).await;

        Mock::given(method("GET"))
            .and(path("/v3/domains"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "pagination": {"total_pages": 1, "next": null},
                "resources": [{"guid": DOMAIN, "name": "apps.example.com"}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v3/routes"))
            .and(query_param("domain_guids", DOMAIN))
            .and(query_param("hosts", "shop"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "pagination": {"total_pages": 1, "next": null},
                "resources": []
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/routes"))
            .and(body_string_contains("\"host\":\"shop\""))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "guid": ROUTE,
                "host": "shop",
                "path": "/cart",
                "url": "shop.apps.example.com/cart",
                "relationships": {"domain": {"data": {"guid": DOMAIN}}},
                "destinations": []
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/v3/routes/{}/destinations", ROUTE)))
            .and(body_string_contains(APP_A))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "destinations": [{"guid": "d1", "app": {"guid": APP_A}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let app_guid = Uuid::parse_str(APP_A).unwrap();
        let route = facade
            .add_route(app_guid, "https://shop.apps.example.com/cart")
            .await
            .unwrap();

        assert_eq!(route.descriptor.to_string(), "shop.apps.example.com/cart");
        assert_eq!(route.app_guids, vec![app_guid]);
    }

    #[tokio::test]
    async fn test_binding_parameters_for_missing_binding() {
        let server = MockServer::start().await;
        let facade = facade(&server).await;
        let binding = Uuid::new_v4();

        Mock::given(method("GET"))
            .and(path(format!("/v3/service_credential_bindings/{}/parameters", binding)))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "errors": [{
                    "code": 10010,
                    "title": "CF-ResourceNotFound",
                    "detail": "Service credential binding not found"
                }]
            })))
            .mount(&server)
            .await;

        let err = facade.get_service_binding_parameters(binding).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_binding_parameters_from_unsupported_broker() {
        let server = MockServer::start().await;
        let facade = facade(&server).await;
        let binding = Uuid::new_v4();

        Mock::given(method("GET"))
            .and(path(format!("/v3/service_credential_bindings/{}/parameters", binding)))
            .respond_with(ResponseTemplate::new(502).set_body_json(json!({
                "errors": [{
                    "code": 10001,
                    "title": "CF-ServiceFetchBindingParametersNotSupported",
                    "detail": "This service does not support fetching service binding parameters."
                }]
            })))
            .mount(&server)
            .await;

        let params = facade.get_service_binding_parameters(binding).await.unwrap();
        assert!(params.is_empty());
    }
}
