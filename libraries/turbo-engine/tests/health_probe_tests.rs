//! HTTP health probe tests against a mock engine status endpoint.

use std::time::Duration;
use turbo_core::EngineRole;
use turbo_engine::{EngineError, HealthProbe, HttpHealthProbe};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const HEALTH_PATH: &str = "/rest/noauth/health";

fn url(server: &MockServer) -> String {
    format!("{}{}", server.uri(), HEALTH_PATH)
}

async fn check(server: &MockServer) -> turbo_engine::Result<()> {
    HttpHealthProbe::new()
        .unwrap()
        .check(EngineRole::Source, url(server), Duration::from_millis(500))
        .await
}

// =============================================================================
// Healthy responses
// =============================================================================

mod healthy {
    use super::*;

    #[tokio::test]
    async fn test_status_ok_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(HEALTH_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "status": "OK" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        assert!(check(&server).await.is_ok());
    }

    #[tokio::test]
    async fn test_plain_2xx_without_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(HEALTH_PATH))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        assert!(check(&server).await.is_ok());
    }

    #[tokio::test]
    async fn test_json_without_status_field() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(HEALTH_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        assert!(check(&server).await.is_ok());
    }
}

// =============================================================================
// Unhealthy responses
// =============================================================================

mod unhealthy {
    use super::*;

    #[tokio::test]
    async fn test_server_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(HEALTH_PATH))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        match check(&server).await {
            Err(EngineError::HealthCheck { role, message }) => {
                assert_eq!(role, EngineRole::Source);
                assert!(message.contains("503"));
            }
            other => panic!("Expected HealthCheck error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_status_not_ok() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(HEALTH_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "status": "starting" })),
            )
            .mount(&server)
            .await;

        assert!(matches!(
            check(&server).await,
            Err(EngineError::HealthCheck { .. })
        ));
    }

    #[tokio::test]
    async fn test_slow_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(HEALTH_PATH))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        assert!(matches!(
            check(&server).await,
            Err(EngineError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_nothing_listening() {
        // Reserve a free port, then release it so nothing is bound there
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let target = format!("http://{}{}", listener.local_addr().unwrap(), HEALTH_PATH);
        drop(listener);

        let result = HttpHealthProbe::new()
            .unwrap()
            .check(EngineRole::Destination, target, Duration::from_millis(500))
            .await;

        assert!(matches!(
            result,
            Err(EngineError::Unavailable {
                role: EngineRole::Destination,
                ..
            })
        ));
    }
}
