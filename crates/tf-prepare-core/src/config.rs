//! # Provisioning Configuration
//!
//! Fixed resource configuration applied when a resource has to be created,
//! plus the tunables for the provisioner and the ARM client.

use crate::provider::LockLevel;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Fixed Resource Configuration
// ============================================================================

/// Storage account SKU name (standard geo-redundant).
pub const STORAGE_SKU_NAME: &str = "Standard_GRS";

/// Storage account SKU tier.
pub const STORAGE_SKU_TIER: &str = "Standard";

/// Storage account kind.
pub const STORAGE_KIND: &str = "BlobStorage";

/// Storage account access tier.
pub const STORAGE_ACCESS_TIER: &str = "Cool";

/// Resource type sent with storage account name-availability checks.
pub const STORAGE_ACCOUNT_RESOURCE_TYPE: &str = "Microsoft.Storage/storageAccounts";

/// Key vault SKU family.
pub const KEY_VAULT_SKU_FAMILY: &str = "A";

/// Key vault SKU name.
pub const KEY_VAULT_SKU_NAME: &str = "standard";

/// Resource type sent with key vault name-availability checks.
pub const KEY_VAULT_RESOURCE_TYPE: &str = "Microsoft.KeyVault/vaults";

/// Key permissions granted to the calling principal.
pub const DESIRED_KEY_PERMISSIONS: [&str; 5] = ["update", "get", "list", "encrypt", "decrypt"];

/// Level of created resource locks.
pub const LOCK_LEVEL: LockLevel = LockLevel::CanNotDelete;

/// Notes attached to created resource locks.
pub const LOCK_NOTES: &str = "CanNotDelete";

/// Default poll interval while a storage account is being created.
pub const STORAGE_ACCOUNT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default poll interval while a key vault is being created.
pub const KEY_VAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Desired key permissions as owned tokens.
pub fn desired_key_permissions() -> Vec<String> {
    DESIRED_KEY_PERMISSIONS
        .iter()
        .map(|p| p.to_string())
        .collect()
}

// ============================================================================
// Provisioner Configuration
// ============================================================================

/// Tunables for [`crate::Provisioner`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionerConfig {
    /// Delay between polls of a pending storage account creation
    #[serde(with = "duration_seconds")]
    pub storage_account_poll_interval: Duration,

    /// Delay between polls of a pending key vault creation
    #[serde(with = "duration_seconds")]
    pub key_vault_poll_interval: Duration,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            storage_account_poll_interval: STORAGE_ACCOUNT_POLL_INTERVAL,
            key_vault_poll_interval: KEY_VAULT_POLL_INTERVAL,
        }
    }
}

impl ProvisionerConfig {
    /// Set the storage account poll interval.
    pub fn with_storage_account_poll_interval(mut self, interval: Duration) -> Self {
        self.storage_account_poll_interval = interval;
        self
    }

    /// Set the key vault poll interval.
    pub fn with_key_vault_poll_interval(mut self, interval: Duration) -> Self {
        self.key_vault_poll_interval = interval;
        self
    }
}

// ============================================================================
// ARM Client Configuration
// ============================================================================

/// Public Azure Resource Manager endpoint.
pub const DEFAULT_MANAGEMENT_URL: &str = "https://management.azure.com";

/// Microsoft Graph endpoint used for identity resolution.
pub const DEFAULT_GRAPH_URL: &str = "https://graph.microsoft.com";

/// Configuration for the HTTP adapters.
///
/// # Examples
///
/// ```
/// use tf_prepare_core::config::ArmClientConfig;
/// use std::time::Duration;
///
/// let config = ArmClientConfig::default()
///     .with_timeout(Duration::from_secs(60))
///     .with_management_url("http://127.0.0.1:8080");
/// assert_eq!(config.management_url, "http://127.0.0.1:8080");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmClientConfig {
    /// Base URL of the management API
    pub management_url: String,

    /// Base URL of the Graph API
    pub graph_url: String,

    /// Per-request timeout
    #[serde(with = "duration_seconds")]
    pub timeout: Duration,

    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for ArmClientConfig {
    fn default() -> Self {
        Self {
            management_url: DEFAULT_MANAGEMENT_URL.to_string(),
            graph_url: DEFAULT_GRAPH_URL.to_string(),
            timeout: Duration::from_secs(60),
            user_agent: format!("tf-prepare/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ArmClientConfig {
    /// Set the management API base URL.
    pub fn with_management_url(mut self, url: impl Into<String>) -> Self {
        self.management_url = url.into();
        self
    }

    /// Set the Graph API base URL.
    pub fn with_graph_url(mut self, url: impl Into<String>) -> Self {
        self.graph_url = url.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the user agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Serialise a [`Duration`] as whole seconds.
pub mod duration_seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
