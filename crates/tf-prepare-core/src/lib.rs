//! # tf-prepare Core
//!
//! Idempotent provisioning of the Azure resources that back a Terraform
//! remote state: a resource group, a storage account with a blob container, a
//! key vault with an access policy for the calling principal, and
//! delete-protection locks.
//!
//! ## Architecture
//!
//! - [`Provisioner`] holds the "create if absent" logic and nothing else
//! - Provider access goes through the [`ManagementApi`] and
//!   [`IdentityResolver`] traits
//! - [`adapters`] supplies the ARM, Graph and in-memory implementations
//! - [`credential`] supplies bearer tokens to the HTTP adapters
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use tf_prepare_core::adapters::InMemoryManagementApi;
//! use tf_prepare_core::{EnsureOutcome, Provisioner, ResourceLockTarget};
//! use tokio_util::sync::CancellationToken;
//!
//! # tokio_test::block_on(async {
//! let provider = Arc::new(InMemoryManagementApi::new());
//! let provisioner = Provisioner::new(provider.clone(), provider.clone());
//! let cancel = CancellationToken::new();
//!
//! let target = ResourceLockTarget::storage_account("rg1", "tfstate001");
//! let outcome = provisioner
//!     .ensure_resource_lock(&cancel, &target, "tfstate-lock", "sub1")
//!     .await
//!     .unwrap();
//! assert_eq!(outcome, EnsureOutcome::Created);
//! # });
//! ```

pub mod adapters;
pub mod config;
pub mod credential;
pub mod error;
pub mod permissions;
pub mod provider;
pub mod provisioner;

pub use config::{ArmClientConfig, ProvisionerConfig};
pub use credential::{AzureCliCredential, CredentialProvider, StaticTokenCredential};
pub use error::{ApiError, ProvisionError, ResourceKind};
pub use permissions::key_permissions_equal;
pub use provider::{
    AccessPolicyEntry, IdentityResolver, ManagementApi, ManagementLock, ResourceLockTarget,
};
pub use provisioner::{EnsureOutcome, Provisioner};

#[cfg(feature = "azure")]
pub use credential::DefaultAzureCredentialProvider;
