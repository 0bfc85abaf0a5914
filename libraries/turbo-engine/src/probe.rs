//! Engine health probing over the local HTTP status endpoint.

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use turbo_core::EngineRole;

#[cfg(test)]
use mockall::automock;

/// Checks whether an engine instance is healthy.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// `Ok(())` when the instance at `url` reports healthy within `timeout`
    async fn check(&self, role: EngineRole, url: String, timeout: Duration) -> Result<()>;
}

/// Probe that issues `GET <url>` and expects a 2xx answer.
///
/// A JSON body carrying a `status` field must say `"OK"`; a 2xx without a
/// JSON body counts as healthy.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    http: Client,
}

impl HttpHealthProbe {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(2))
            .user_agent(format!("TurboSync/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { http })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn check(&self, role: EngineRole, url: String, timeout: Duration) -> Result<()> {
        debug!(role = %role, url = %url, "Probing engine health");

        let response = self
            .http
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    EngineError::Unavailable {
                        role,
                        message: e.to_string(),
                    }
                } else {
                    EngineError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::HealthCheck {
                role,
                message: format!("status endpoint returned {}", status.as_u16()),
            });
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(json) => match json.get("status").and_then(|s| s.as_str()) {
                Some(reported) if !reported.eq_ignore_ascii_case("ok") => {
                    Err(EngineError::HealthCheck {
                        role,
                        message: format!("engine reports status {}", reported),
                    })
                }
                _ => Ok(()),
            },
            Err(_) => Ok(()),
        }
    }
}
