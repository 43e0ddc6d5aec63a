//! # Azure Resource Manager Client
//!
//! [`ManagementApi`] over the ARM REST API. Each trait method is a single
//! request; long-running PUTs hand back a [`PendingOperation`] describing how
//! to poll them.

use crate::config::{ArmClientConfig, KEY_VAULT_RESOURCE_TYPE, STORAGE_ACCOUNT_RESOURCE_TYPE};
use crate::credential::{CredentialProvider, MANAGEMENT_SCOPE};
use crate::error::{ApiError, UNKNOWN_ERROR_CODE};
use crate::provider::{
    AccessPolicyEntry, AccessPolicyUpdateKind, BlobContainer, KeyVault, KeyVaultSpec,
    ManagementApi, ManagementLock, NameAvailability, OperationStatus, PendingOperation,
    PollStyle, ResourceLockTarget, StorageAccount, StorageAccountSpec,
};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, instrument};

/// API version for resource groups.
pub const RESOURCES_API_VERSION: &str = "2020-06-01";

/// API version for storage accounts and blob containers.
pub const STORAGE_API_VERSION: &str = "2019-06-01";

/// API version for key vaults.
pub const KEY_VAULT_API_VERSION: &str = "2019-09-01";

/// API version for management locks.
pub const LOCKS_API_VERSION: &str = "2016-09-01";

const ASYNC_OPERATION_HEADER: &str = "Azure-AsyncOperation";
const LOCATION_HEADER: &str = "Location";

/// Wire shape of a lock: ARM wraps level and notes in `properties`.
#[derive(Debug, Serialize, Deserialize)]
struct LockEnvelope {
    properties: ManagementLock,
}

/// Body of an access-policy update.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AccessPolicyUpdateProperties {
    access_policies: Vec<AccessPolicyEntry>,
}

#[derive(Debug, Serialize)]
struct AccessPolicyUpdate {
    properties: AccessPolicyUpdateProperties,
}

/// ARM management-plane client.
#[derive(Clone)]
pub struct ArmClient {
    credential: Arc<dyn CredentialProvider>,
    http_client: reqwest::Client,
    config: ArmClientConfig,
    tenant_id: Option<String>,
}

impl ArmClient {
    /// Create a client.
    ///
    /// # Errors
    /// Returns `ApiError::Configuration` if the HTTP client cannot be built.
    pub fn new(
        credential: Arc<dyn CredentialProvider>,
        config: ArmClientConfig,
    ) -> Result<Self, ApiError> {
        validate_base_url("management", &config.management_url)?;

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
            config,
            tenant_id: None,
        })
    }

    /// Request tokens for a specific tenant.
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn config(&self) -> &ArmClientConfig {
        &self.config
    }

    // ========================================================================
    // URLs
    // ========================================================================

    fn url(&self, path: &str, api_version: &str) -> String {
        format!(
            "{}{}?api-version={}",
            self.config.management_url.trim_end_matches('/'),
            path,
            api_version
        )
    }

    fn resource_group_url(&self, subscription_id: &str, resource_group: &str) -> String {
        self.url(
            &format!(
                "/subscriptions/{}/resourcegroups/{}",
                subscription_id, resource_group
            ),
            RESOURCES_API_VERSION,
        )
    }

    fn storage_account_path(
        subscription_id: &str,
        resource_group: &str,
        account_name: &str,
    ) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/{}/{}",
            subscription_id, resource_group, STORAGE_ACCOUNT_RESOURCE_TYPE, account_name
        )
    }

    fn key_vault_path(subscription_id: &str, resource_group: &str, vault_name: &str) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/{}/{}",
            subscription_id, resource_group, KEY_VAULT_RESOURCE_TYPE, vault_name
        )
    }

    fn container_url(
        &self,
        subscription_id: &str,
        resource_group: &str,
        account_name: &str,
        container_name: &str,
    ) -> String {
        self.url(
            &format!(
                "{}/blobServices/default/containers/{}",
                Self::storage_account_path(subscription_id, resource_group, account_name),
                container_name
            ),
            STORAGE_API_VERSION,
        )
    }

    fn lock_url(&self, subscription_id: &str, target: &ResourceLockTarget, lock_name: &str) -> String {
        self.url(
            &format!(
                "/subscriptions/{}/resourceGroups/{}/{}/providers/Microsoft.Authorization/locks/{}",
                subscription_id,
                target.resource_group,
                target.resource_path(),
                lock_name
            ),
            LOCKS_API_VERSION,
        )
    }

    // ========================================================================
    // HTTP
    // ========================================================================

    async fn bearer(&self) -> Result<String, ApiError> {
        self.credential
            .access_token(MANAGEMENT_SCOPE, self.tenant_id.as_deref())
            .await
    }

    async fn send(&self, method: Method, url: &str, body: Option<Value>) -> Result<Response, ApiError> {
        let token = self.bearer().await?;
        debug!(method = %method, url, "Azure ARM request");

        let mut request = self
            .http_client
            .request(method.clone(), url)
            .bearer_auth(token);
        if let Some(body) = body {
            request = request.json(&body);
        }

        request
            .send()
            .await
            .map_err(|e| ApiError::Network(format!("{} {}: {}", method, url, e)))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        let response = self.send(Method::GET, url, None).await?;
        read_json(response).await
    }

    async fn put_json<T: DeserializeOwned>(&self, url: &str, body: Value) -> Result<T, ApiError> {
        let response = self.send(Method::PUT, url, Some(body)).await?;
        read_json(response).await
    }

    /// PUT a resource whose creation may complete asynchronously.
    async fn put_long_running(&self, url: &str, body: Value) -> Result<PendingOperation, ApiError> {
        let response = self.send(Method::PUT, url, Some(body)).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(response).await);
        }

        let headers = response.headers().clone();
        let text = response
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("PUT {}: {}", url, e)))?;
        let body: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)
                .map_err(|e| ApiError::InvalidResponse(format!("{}: {}", url, e)))?
        };

        Ok(pending_from_response(status, &headers, &body, url))
    }
}

impl std::fmt::Debug for ArmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmClient")
            .field("config", &self.config)
            .field("tenant_id", &self.tenant_id)
            .finish()
    }
}

/// Reject endpoint settings that are not absolute http(s) URLs.
pub(crate) fn validate_base_url(name: &str, value: &str) -> Result<(), ApiError> {
    let parsed = url::Url::parse(value).map_err(|e| {
        ApiError::Configuration(format!("Invalid {} URL '{}': {}", name, value, e))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ApiError::Configuration(format!(
            "Invalid {} URL '{}': unsupported scheme {}",
            name, value, other
        ))),
    }
}

/// Decode a successful response, or turn a failed one into an `ApiError`.
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }
    let url = response.url().to_string();
    response
        .json::<T>()
        .await
        .map_err(|e| ApiError::InvalidResponse(format!("{}: {}", url, e)))
}

async fn error_from_response(response: Response) -> ApiError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    parse_arm_error(status, &body)
}

/// Build an `ApiError::Http` from an ARM error body.
///
/// Accepts `{"error": {"code", "message"}}`, the capitalised `Error` variant
/// and bare `{"code", "message"}`. A missing code becomes
/// [`UNKNOWN_ERROR_CODE`]; a missing message falls back to the raw body.
pub fn parse_arm_error(status: u16, body: &str) -> ApiError {
    let value: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let error = value
        .get("error")
        .or_else(|| value.get("Error"))
        .unwrap_or(&value);

    let code = error
        .get("code")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .unwrap_or(UNKNOWN_ERROR_CODE);

    let message = match error.get("message").and_then(Value::as_str) {
        Some(message) => message.to_string(),
        None if body.trim().is_empty() => StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("no response body")
            .to_string(),
        None => body.trim().to_string(),
    };

    ApiError::http(status, code, message)
}

/// Work out how to follow a successful PUT.
pub(crate) fn pending_from_response(
    status: StatusCode,
    headers: &HeaderMap,
    body: &Value,
    resource_url: &str,
) -> PendingOperation {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    if let Some(poll_url) = header(ASYNC_OPERATION_HEADER) {
        return PendingOperation {
            poll_url,
            style: PollStyle::AsyncOperation,
        };
    }

    if status == StatusCode::ACCEPTED {
        if let Some(poll_url) = header(LOCATION_HEADER) {
            return PendingOperation {
                poll_url,
                style: PollStyle::Location,
            };
        }
        return PendingOperation {
            poll_url: resource_url.to_string(),
            style: PollStyle::ProvisioningState,
        };
    }

    let provisioning_state = body
        .pointer("/properties/provisioningState")
        .and_then(Value::as_str);
    match provisioning_state {
        Some(state) if !OperationStatus::from_provider_status(state, "").is_terminal() => {
            PendingOperation {
                poll_url: resource_url.to_string(),
                style: PollStyle::ProvisioningState,
            }
        }
        _ => PendingOperation::completed(),
    }
}

#[async_trait]
impl ManagementApi for ArmClient {
    #[instrument(skip(self))]
    async fn resource_group_exists(
        &self,
        subscription_id: &str,
        resource_group: &str,
    ) -> Result<bool, ApiError> {
        let url = self.resource_group_url(subscription_id, resource_group);
        let response = self.send(Method::HEAD, &url, None).await?;
        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(error_from_response(response).await),
        }
    }

    #[instrument(skip(self))]
    async fn create_resource_group(
        &self,
        subscription_id: &str,
        resource_group: &str,
        location: &str,
    ) -> Result<(), ApiError> {
        let url = self.resource_group_url(subscription_id, resource_group);
        let _: Value = self.put_json(&url, json!({ "location": location })).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_storage_account(
        &self,
        subscription_id: &str,
        resource_group: &str,
        account_name: &str,
    ) -> Result<StorageAccount, ApiError> {
        let url = self.url(
            &Self::storage_account_path(subscription_id, resource_group, account_name),
            STORAGE_API_VERSION,
        );
        self.get_json(&url).await
    }

    #[instrument(skip(self))]
    async fn check_storage_account_name(
        &self,
        subscription_id: &str,
        account_name: &str,
    ) -> Result<NameAvailability, ApiError> {
        let url = self.url(
            &format!(
                "/subscriptions/{}/providers/Microsoft.Storage/checkNameAvailability",
                subscription_id
            ),
            STORAGE_API_VERSION,
        );
        let body = json!({ "name": account_name, "type": STORAGE_ACCOUNT_RESOURCE_TYPE });
        let response = self.send(Method::POST, &url, Some(body)).await?;
        read_json(response).await
    }

    #[instrument(skip(self, spec))]
    async fn begin_create_storage_account(
        &self,
        subscription_id: &str,
        resource_group: &str,
        account_name: &str,
        spec: &StorageAccountSpec,
    ) -> Result<PendingOperation, ApiError> {
        let url = self.url(
            &Self::storage_account_path(subscription_id, resource_group, account_name),
            STORAGE_API_VERSION,
        );
        let body = serde_json::to_value(spec)
            .map_err(|e| ApiError::Configuration(format!("storage account body: {}", e)))?;
        self.put_long_running(&url, body).await
    }

    #[instrument(skip(self))]
    async fn get_blob_container(
        &self,
        subscription_id: &str,
        resource_group: &str,
        account_name: &str,
        container_name: &str,
    ) -> Result<BlobContainer, ApiError> {
        let url = self.container_url(subscription_id, resource_group, account_name, container_name);
        self.get_json(&url).await
    }

    #[instrument(skip(self))]
    async fn create_blob_container(
        &self,
        subscription_id: &str,
        resource_group: &str,
        account_name: &str,
        container_name: &str,
    ) -> Result<BlobContainer, ApiError> {
        let url = self.container_url(subscription_id, resource_group, account_name, container_name);
        self.put_json(&url, json!({ "properties": {} })).await
    }

    #[instrument(skip(self))]
    async fn get_key_vault(
        &self,
        subscription_id: &str,
        resource_group: &str,
        vault_name: &str,
    ) -> Result<KeyVault, ApiError> {
        let url = self.url(
            &Self::key_vault_path(subscription_id, resource_group, vault_name),
            KEY_VAULT_API_VERSION,
        );
        self.get_json(&url).await
    }

    #[instrument(skip(self))]
    async fn check_key_vault_name(
        &self,
        subscription_id: &str,
        vault_name: &str,
    ) -> Result<NameAvailability, ApiError> {
        let url = self.url(
            &format!(
                "/subscriptions/{}/providers/Microsoft.KeyVault/checkNameAvailability",
                subscription_id
            ),
            KEY_VAULT_API_VERSION,
        );
        let body = json!({ "name": vault_name, "type": KEY_VAULT_RESOURCE_TYPE });
        let response = self.send(Method::POST, &url, Some(body)).await?;
        read_json(response).await
    }

    #[instrument(skip(self, spec))]
    async fn begin_create_key_vault(
        &self,
        subscription_id: &str,
        resource_group: &str,
        vault_name: &str,
        spec: &KeyVaultSpec,
    ) -> Result<PendingOperation, ApiError> {
        let url = self.url(
            &Self::key_vault_path(subscription_id, resource_group, vault_name),
            KEY_VAULT_API_VERSION,
        );
        let body = serde_json::to_value(spec)
            .map_err(|e| ApiError::Configuration(format!("key vault body: {}", e)))?;
        self.put_long_running(&url, body).await
    }

    #[instrument(skip(self, policies))]
    async fn update_access_policy(
        &self,
        subscription_id: &str,
        resource_group: &str,
        vault_name: &str,
        kind: AccessPolicyUpdateKind,
        policies: Vec<AccessPolicyEntry>,
    ) -> Result<(), ApiError> {
        let url = self.url(
            &format!(
                "{}/accessPolicies/{}",
                Self::key_vault_path(subscription_id, resource_group, vault_name),
                kind
            ),
            KEY_VAULT_API_VERSION,
        );
        let body = serde_json::to_value(AccessPolicyUpdate {
            properties: AccessPolicyUpdateProperties {
                access_policies: policies,
            },
        })
        .map_err(|e| ApiError::Configuration(format!("access policy body: {}", e)))?;

        let _: Value = self.put_json(&url, body).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_management_lock(
        &self,
        subscription_id: &str,
        target: &ResourceLockTarget,
        lock_name: &str,
    ) -> Result<ManagementLock, ApiError> {
        let url = self.lock_url(subscription_id, target, lock_name);
        let envelope: LockEnvelope = self.get_json(&url).await?;
        Ok(envelope.properties)
    }

    #[instrument(skip(self))]
    async fn create_management_lock(
        &self,
        subscription_id: &str,
        target: &ResourceLockTarget,
        lock_name: &str,
        lock: &ManagementLock,
    ) -> Result<ManagementLock, ApiError> {
        let url = self.lock_url(subscription_id, target, lock_name);
        let body = serde_json::to_value(LockEnvelope {
            properties: lock.clone(),
        })
        .map_err(|e| ApiError::Configuration(format!("lock body: {}", e)))?;

        let envelope: LockEnvelope = self.put_json(&url, body).await?;
        Ok(envelope.properties)
    }

    #[instrument(skip(self))]
    async fn poll_operation(
        &self,
        operation: &PendingOperation,
    ) -> Result<OperationStatus, ApiError> {
        match operation.style {
            PollStyle::Completed => Ok(OperationStatus::Succeeded),
            PollStyle::AsyncOperation => {
                let body: Value = self.get_json(&operation.poll_url).await?;
                let status = body
                    .get("status")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        ApiError::InvalidResponse(format!(
                            "{}: operation status missing",
                            operation.poll_url
                        ))
                    })?;
                let message = body
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Ok(OperationStatus::from_provider_status(status, message))
            }
            PollStyle::Location => {
                let response = self.send(Method::GET, &operation.poll_url, None).await?;
                match response.status() {
                    StatusCode::ACCEPTED => Ok(OperationStatus::InProgress),
                    s if s.is_success() => Ok(OperationStatus::Succeeded),
                    _ => Err(error_from_response(response).await),
                }
            }
            PollStyle::ProvisioningState => {
                let body: Value = self.get_json(&operation.poll_url).await?;
                let state = body
                    .pointer("/properties/provisioningState")
                    .and_then(Value::as_str)
                    .unwrap_or("Succeeded");
                Ok(OperationStatus::from_provider_status(
                    state,
                    format!("provisioningState {}", state),
                ))
            }
        }
    }
}

#[cfg(test)]
#[path = "arm_client_tests.rs"]
mod tests;
