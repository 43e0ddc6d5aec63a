//! Object id of the signed-in principal via Microsoft Graph.

use crate::config::ArmClientConfig;
use crate::credential::{CredentialProvider, GRAPH_SCOPE};
use crate::error::ApiError;
use crate::provider::IdentityResolver;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::arm_client::{parse_arm_error, validate_base_url};

#[derive(Debug, Deserialize)]
struct SignedInUser {
    #[serde(default)]
    id: Option<String>,
}

/// Resolves the calling principal with `GET /v1.0/me`.
#[derive(Clone)]
pub struct GraphIdentityResolver {
    credential: Arc<dyn CredentialProvider>,
    http_client: reqwest::Client,
    graph_url: String,
}

impl GraphIdentityResolver {
    /// # Errors
    /// Returns `ApiError::Configuration` if the HTTP client cannot be built.
    pub fn new(
        credential: Arc<dyn CredentialProvider>,
        config: &ArmClientConfig,
    ) -> Result<Self, ApiError> {
        validate_base_url("graph", &config.graph_url)?;

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                ApiError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            credential,
            http_client,
            graph_url: config.graph_url.trim_end_matches('/').to_string(),
        })
    }
}

impl std::fmt::Debug for GraphIdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphIdentityResolver")
            .field("graph_url", &self.graph_url)
            .finish()
    }
}

#[async_trait]
impl IdentityResolver for GraphIdentityResolver {
    #[instrument(skip(self))]
    async fn current_object_id(&self, tenant_id: &str) -> Result<String, ApiError> {
        let token = self
            .credential
            .access_token(GRAPH_SCOPE, Some(tenant_id))
            .await?;

        let url = format!("{}/v1.0/me", self.graph_url);
        debug!(url = %url, "Resolving signed-in principal");

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(token)
            .query(&[("$select", "id")])
            .send()
            .await
            .map_err(|e| ApiError::Network(format!("GET {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(parse_arm_error(status.as_u16(), &body));
        }

        let user: SignedInUser = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("{}: {}", url, e)))?;

        user.id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ApiError::InvalidResponse(format!("{}: response has no id", url)))
    }
}

#[cfg(test)]
#[path = "graph_identity_tests.rs"]
mod tests;
