//! # Management API Seam
//!
//! Request/response types and the traits the provisioner talks to. Production
//! code plugs in [`crate::adapters::ArmClient`] and
//! [`crate::adapters::GraphIdentityResolver`]; tests use
//! [`crate::adapters::InMemoryManagementApi`] or generated mocks.

use crate::config::{
    desired_key_permissions, KEY_VAULT_SKU_FAMILY, KEY_VAULT_SKU_NAME, LOCK_LEVEL, LOCK_NOTES,
    STORAGE_ACCESS_TIER, STORAGE_KIND, STORAGE_SKU_NAME, STORAGE_SKU_TIER,
};
use crate::error::ApiError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Name Availability
// ============================================================================

/// Result of a name-availability query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameAvailability {
    pub name_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl NameAvailability {
    /// Name is free.
    pub fn available() -> Self {
        Self {
            name_available: true,
            reason: None,
            message: None,
        }
    }

    /// Name is taken or invalid.
    pub fn unavailable(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name_available: false,
            reason: Some(reason.into()),
            message: Some(message.into()),
        }
    }

    /// Human readable explanation for a rejected name.
    pub fn describe(&self) -> String {
        match (&self.reason, &self.message) {
            (Some(reason), Some(message)) => format!("{} ({})", reason, message),
            (Some(reason), None) => reason.clone(),
            (None, Some(message)) => message.clone(),
            (None, None) => "no reason given".to_string(),
        }
    }
}

// ============================================================================
// Storage
// ============================================================================

/// Storage account SKU.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StorageSku {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
}

/// Properties set when creating a storage account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageAccountCreateProperties {
    pub access_tier: String,
}

/// Request body for creating a storage account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageAccountSpec {
    pub sku: StorageSku,
    pub kind: String,
    pub location: String,
    pub properties: StorageAccountCreateProperties,
}

impl StorageAccountSpec {
    /// Fixed configuration for a Terraform state account in `location`.
    pub fn terraform_backend(location: impl Into<String>) -> Self {
        Self {
            sku: StorageSku {
                name: STORAGE_SKU_NAME.to_string(),
                tier: Some(STORAGE_SKU_TIER.to_string()),
            },
            kind: STORAGE_KIND.to_string(),
            location: location.into(),
            properties: StorageAccountCreateProperties {
                access_tier: STORAGE_ACCESS_TIER.to_string(),
            },
        }
    }
}

/// Storage account as returned by the provider (fields this crate reads).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StorageAccount {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub sku: Option<StorageSku>,
}

/// Blob container as returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlobContainer {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

// ============================================================================
// Key Vault
// ============================================================================

/// Key vault SKU.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyVaultSku {
    pub family: String,
    pub name: String,
}

/// Permissions granted by an access policy entry.
///
/// `None` means the provider omitted the list, which is distinct from an
/// empty list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificates: Option<Vec<String>>,
}

/// Binding of a principal to a set of permissions on a key vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessPolicyEntry {
    pub tenant_id: String,
    pub object_id: String,
    #[serde(default)]
    pub permissions: Permissions,
}

impl AccessPolicyEntry {
    /// Entry granting the desired key permissions to `object_id`.
    pub fn terraform_backend(tenant_id: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            object_id: object_id.into(),
            permissions: Permissions {
                keys: Some(desired_key_permissions()),
                secrets: None,
                certificates: None,
            },
        }
    }
}

/// Key vault properties.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyVaultProperties {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub sku: KeyVaultSku,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_policies: Option<Vec<AccessPolicyEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
}

/// Request body for creating a key vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVaultSpec {
    pub location: String,
    pub properties: KeyVaultProperties,
}

impl KeyVaultSpec {
    /// Fixed configuration for the backend vault: standard SKU, no access
    /// policies, bound to `tenant_id`.
    pub fn terraform_backend(location: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            properties: KeyVaultProperties {
                tenant_id: tenant_id.into(),
                sku: KeyVaultSku {
                    family: KEY_VAULT_SKU_FAMILY.to_string(),
                    name: KEY_VAULT_SKU_NAME.to_string(),
                },
                access_policies: Some(Vec::new()),
                provisioning_state: None,
            },
        }
    }
}

/// Key vault as returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyVault {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub properties: KeyVaultProperties,
}

impl KeyVault {
    /// Access policies, treating an omitted list as empty.
    pub fn access_policies(&self) -> &[AccessPolicyEntry] {
        self.properties.access_policies.as_deref().unwrap_or(&[])
    }
}

/// How an access-policy update is applied to the vault's list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPolicyUpdateKind {
    Add,
    Replace,
    Remove,
}

impl AccessPolicyUpdateKind {
    /// Path segment used by the management API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Replace => "replace",
            Self::Remove => "remove",
        }
    }
}

impl fmt::Display for AccessPolicyUpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Resource Locks
// ============================================================================

/// Lock level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockLevel {
    CanNotDelete,
    ReadOnly,
    NotSpecified,
}

impl fmt::Display for LockLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::CanNotDelete => "CanNotDelete",
            Self::ReadOnly => "ReadOnly",
            Self::NotSpecified => "NotSpecified",
        };
        f.write_str(text)
    }
}

/// Management lock properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagementLock {
    pub level: LockLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl ManagementLock {
    /// Delete-protection lock with the fixed notes.
    pub fn can_not_delete() -> Self {
        Self {
            level: LOCK_LEVEL,
            notes: Some(LOCK_NOTES.to_string()),
        }
    }
}

/// Resource a lock is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceLockTarget {
    pub resource_group: String,
    pub provider_namespace: String,
    /// May be empty for top-level resources.
    pub parent_resource_path: String,
    pub resource_type: String,
    pub resource_name: String,
}

impl ResourceLockTarget {
    pub fn new(
        resource_group: impl Into<String>,
        provider_namespace: impl Into<String>,
        parent_resource_path: impl Into<String>,
        resource_type: impl Into<String>,
        resource_name: impl Into<String>,
    ) -> Self {
        Self {
            resource_group: resource_group.into(),
            provider_namespace: provider_namespace.into(),
            parent_resource_path: parent_resource_path.into(),
            resource_type: resource_type.into(),
            resource_name: resource_name.into(),
        }
    }

    /// Lock target for a storage account.
    pub fn storage_account(resource_group: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self::new(
            resource_group,
            "Microsoft.Storage",
            "",
            "storageAccounts",
            account_name,
        )
    }

    /// Lock target for a key vault.
    pub fn key_vault(resource_group: impl Into<String>, vault_name: impl Into<String>) -> Self {
        Self::new(resource_group, "Microsoft.KeyVault", "", "vaults", vault_name)
    }

    /// `providers/{namespace}[/{parent}]/{type}/{name}` relative to the
    /// resource group.
    pub fn resource_path(&self) -> String {
        let segments = [
            self.provider_namespace.as_str(),
            self.parent_resource_path.as_str(),
            self.resource_type.as_str(),
            self.resource_name.as_str(),
        ];
        let joined = segments
            .iter()
            .map(|s| s.trim_matches('/'))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        format!("providers/{}", joined)
    }
}

impl fmt::Display for ResourceLockTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_group, self.resource_path())
    }
}

// ============================================================================
// Asynchronous Operations
// ============================================================================

/// How a pending operation reports progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStyle {
    /// `Azure-AsyncOperation` header: JSON body with a `status` field.
    AsyncOperation,
    /// `Location` header: 202 while pending, 2xx once done.
    Location,
    /// Resource URL: `properties.provisioningState` on the resource itself.
    ProvisioningState,
    /// The provider finished synchronously.
    Completed,
}

/// Handle for an asynchronous provider operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperation {
    pub poll_url: String,
    pub style: PollStyle,
}

impl PendingOperation {
    /// Operation that already finished.
    pub fn completed() -> Self {
        Self {
            poll_url: String::new(),
            style: PollStyle::Completed,
        }
    }
}

/// State of a pending operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    InProgress,
    Succeeded,
    Failed { status: String, message: String },
}

impl OperationStatus {
    /// Map a provider status string onto the three states.
    pub fn from_provider_status(status: &str, message: impl Into<String>) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "succeeded" => Self::Succeeded,
            "failed" | "canceled" | "cancelled" => Self::Failed {
                status: status.to_string(),
                message: message.into(),
            },
            _ => Self::InProgress,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

// ============================================================================
// Interface Traits
// ============================================================================

/// Management-plane calls the provisioner needs.
///
/// Every method maps to a single provider request. Errors are returned as
/// the provider reported them; classification ("not found", etc.) is the
/// caller's job.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ManagementApi: Send + Sync {
    /// Check whether a resource group exists.
    async fn resource_group_exists(
        &self,
        subscription_id: &str,
        resource_group: &str,
    ) -> Result<bool, ApiError>;

    /// Create (or update) a resource group. Synchronous.
    async fn create_resource_group(
        &self,
        subscription_id: &str,
        resource_group: &str,
        location: &str,
    ) -> Result<(), ApiError>;

    /// Fetch storage account properties.
    async fn get_storage_account(
        &self,
        subscription_id: &str,
        resource_group: &str,
        account_name: &str,
    ) -> Result<StorageAccount, ApiError>;

    /// Check whether a storage account name can be used.
    async fn check_storage_account_name(
        &self,
        subscription_id: &str,
        account_name: &str,
    ) -> Result<NameAvailability, ApiError>;

    /// Start creating a storage account.
    async fn begin_create_storage_account(
        &self,
        subscription_id: &str,
        resource_group: &str,
        account_name: &str,
        spec: &StorageAccountSpec,
    ) -> Result<PendingOperation, ApiError>;

    /// Fetch a blob container.
    async fn get_blob_container(
        &self,
        subscription_id: &str,
        resource_group: &str,
        account_name: &str,
        container_name: &str,
    ) -> Result<BlobContainer, ApiError>;

    /// Create a blob container with default properties.
    async fn create_blob_container(
        &self,
        subscription_id: &str,
        resource_group: &str,
        account_name: &str,
        container_name: &str,
    ) -> Result<BlobContainer, ApiError>;

    /// Fetch a key vault.
    async fn get_key_vault(
        &self,
        subscription_id: &str,
        resource_group: &str,
        vault_name: &str,
    ) -> Result<KeyVault, ApiError>;

    /// Check whether a key vault name can be used.
    async fn check_key_vault_name(
        &self,
        subscription_id: &str,
        vault_name: &str,
    ) -> Result<NameAvailability, ApiError>;

    /// Start creating (or updating) a key vault.
    async fn begin_create_key_vault(
        &self,
        subscription_id: &str,
        resource_group: &str,
        vault_name: &str,
        spec: &KeyVaultSpec,
    ) -> Result<PendingOperation, ApiError>;

    /// Apply an access-policy update to a key vault.
    async fn update_access_policy(
        &self,
        subscription_id: &str,
        resource_group: &str,
        vault_name: &str,
        kind: AccessPolicyUpdateKind,
        policies: Vec<AccessPolicyEntry>,
    ) -> Result<(), ApiError>;

    /// Fetch a lock at resource level.
    async fn get_management_lock(
        &self,
        subscription_id: &str,
        target: &ResourceLockTarget,
        lock_name: &str,
    ) -> Result<ManagementLock, ApiError>;

    /// Create (or update) a lock at resource level.
    async fn create_management_lock(
        &self,
        subscription_id: &str,
        target: &ResourceLockTarget,
        lock_name: &str,
        lock: &ManagementLock,
    ) -> Result<ManagementLock, ApiError>;

    /// Query the state of a pending operation once.
    async fn poll_operation(&self, operation: &PendingOperation)
        -> Result<OperationStatus, ApiError>;
}

/// Resolves the identity of the calling principal.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Object id of the principal the credentials belong to, in `tenant_id`.
    async fn current_object_id(&self, tenant_id: &str) -> Result<String, ApiError>;
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
