//! # Credentials
//!
//! Bearer tokens for the management and Graph endpoints. Adapters receive a
//! [`CredentialProvider`] at construction time and ask it for a token on
//! every request; nothing is looked up from global state.

use crate::error::ApiError;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// Scope for Azure Resource Manager calls.
pub const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";

/// Scope for Microsoft Graph calls.
pub const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Lifetime assumed when the CLI does not report an expiry.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(300);

/// Source of bearer tokens.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Acquire a token for `scope`, optionally for a specific tenant.
    ///
    /// # Errors
    /// Returns `ApiError::Authentication` when no token can be obtained.
    async fn access_token(&self, scope: &str, tenant_id: Option<&str>)
        -> Result<String, ApiError>;
}

// ============================================================================
// Static Token
// ============================================================================

/// Pre-issued token, returned for every scope.
#[derive(Clone)]
pub struct StaticTokenCredential {
    token: String,
}

impl StaticTokenCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticTokenCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenCredential")
            .field("token", &"<REDACTED>")
            .finish()
    }
}

#[async_trait]
impl CredentialProvider for StaticTokenCredential {
    async fn access_token(
        &self,
        _scope: &str,
        _tenant_id: Option<&str>,
    ) -> Result<String, ApiError> {
        if self.token.is_empty() {
            return Err(ApiError::Authentication(
                "static token is empty".to_string(),
            ));
        }
        Ok(self.token.clone())
    }
}

// ============================================================================
// Azure CLI
// ============================================================================

/// Output of `az account get-access-token --output json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CliToken {
    pub access_token: String,
    /// POSIX timestamp, reported by newer CLI versions.
    #[serde(default, rename = "expires_on")]
    pub expires_on: Option<u64>,
}

impl CliToken {
    /// Time left before the token should be refreshed.
    fn remaining_lifetime(&self, now: SystemTime) -> Duration {
        let Some(expires_on) = self.expires_on else {
            return DEFAULT_TOKEN_LIFETIME;
        };
        let now_secs = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Duration::from_secs(expires_on.saturating_sub(now_secs)).saturating_sub(EXPIRY_MARGIN)
    }
}

pub(crate) fn parse_cli_token(stdout: &[u8]) -> Result<CliToken, ApiError> {
    let token: CliToken = serde_json::from_slice(stdout).map_err(|e| {
        ApiError::Authentication(format!("az CLI output could not be parsed: {}", e))
    })?;
    if token.access_token.is_empty() {
        return Err(ApiError::Authentication(
            "az CLI returned an empty accessToken".to_string(),
        ));
    }
    Ok(token)
}

/// Tokens from the signed-in Azure CLI session (`az login`).
///
/// Tokens are cached per (scope, tenant) until shortly before they expire.
pub struct AzureCliCredential {
    program: String,
    cache: Mutex<HashMap<(String, Option<String>), (String, Instant)>>,
}

impl AzureCliCredential {
    pub fn new() -> Self {
        Self::with_program("az")
    }

    /// Use a different executable, e.g. `az.cmd` or an absolute path.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn fetch(&self, scope: &str, tenant_id: Option<&str>) -> Result<CliToken, ApiError> {
        let mut command = Command::new(&self.program);
        command.args(["account", "get-access-token", "--scope", scope]);
        if let Some(tenant) = tenant_id {
            command.args(["--tenant", tenant]);
        }
        command.args(["--output", "json"]);

        let output = command.output().await.map_err(|e| {
            ApiError::Authentication(format!(
                "could not run '{}': {}. Install the Azure CLI or configure another credential",
                self.program, e
            ))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ApiError::Authentication(format!(
                "az account get-access-token failed: {}. Run 'az login' first",
                stderr.trim()
            )));
        }

        parse_cli_token(&output.stdout)
    }
}

impl Default for AzureCliCredential {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AzureCliCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureCliCredential")
            .field("program", &self.program)
            .finish()
    }
}

#[async_trait]
impl CredentialProvider for AzureCliCredential {
    #[instrument(skip(self))]
    async fn access_token(
        &self,
        scope: &str,
        tenant_id: Option<&str>,
    ) -> Result<String, ApiError> {
        let key = (scope.to_string(), tenant_id.map(str::to_string));

        let mut cache = self.cache.lock().await;
        if let Some((token, expiry)) = cache.get(&key) {
            if Instant::now() < *expiry {
                return Ok(token.clone());
            }
        }

        debug!("Requesting token from Azure CLI");
        let fetched = self.fetch(scope, tenant_id).await?;
        let expiry = Instant::now() + fetched.remaining_lifetime(SystemTime::now());
        cache.insert(key, (fetched.access_token.clone(), expiry));

        Ok(fetched.access_token)
    }
}

// ============================================================================
// Azure SDK credential chain
// ============================================================================

/// `DefaultAzureCredential` from the Azure SDK: environment, managed
/// identity, then the Azure CLI.
///
/// The chain picks its tenant from the environment, so the per-request
/// tenant hint is not forwarded.
#[cfg(feature = "azure")]
pub struct DefaultAzureCredentialProvider {
    inner: std::sync::Arc<dyn azure_core::auth::TokenCredential>,
}

#[cfg(feature = "azure")]
impl DefaultAzureCredentialProvider {
    /// Build the default credential chain.
    ///
    /// # Errors
    /// Returns `ApiError::Configuration` if the chain cannot be assembled.
    pub fn new() -> Result<Self, ApiError> {
        let credential = azure_identity::DefaultAzureCredential::create(
            azure_identity::TokenCredentialOptions::default(),
        )
        .map_err(|e| {
            ApiError::Configuration(format!("failed to create DefaultAzureCredential: {}", e))
        })?;

        Ok(Self {
            inner: std::sync::Arc::new(credential),
        })
    }

    /// Wrap any Azure SDK credential.
    pub fn with_credential(inner: std::sync::Arc<dyn azure_core::auth::TokenCredential>) -> Self {
        Self { inner }
    }
}

#[cfg(feature = "azure")]
#[async_trait]
impl CredentialProvider for DefaultAzureCredentialProvider {
    async fn access_token(
        &self,
        scope: &str,
        tenant_id: Option<&str>,
    ) -> Result<String, ApiError> {
        if let Some(tenant) = tenant_id {
            debug!(tenant_id = %tenant, "Tenant hint ignored by DefaultAzureCredential");
        }
        let token = self
            .inner
            .get_token(&[scope])
            .await
            .map_err(|e| ApiError::Authentication(e.to_string()))?;
        Ok(token.token.secret().to_string())
    }
}

#[cfg(test)]
#[path = "credential_tests.rs"]
mod tests;
