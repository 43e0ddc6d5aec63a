//! # Provisioner
//!
//! Idempotent "create if absent" operations for the resources behind a
//! Terraform state backend. Each operation checks the provider first, creates
//! the resource only when it is missing, and blocks until asynchronous
//! provider operations reach a terminal state.
//!
//! Operations are independent and stateless. They share nothing but the
//! injected collaborators, so the caller decides the order in which they run.

use crate::config::ProvisionerConfig;
use crate::error::{
    ApiError, ProvisionError, ResourceKind, CONTAINER_NOT_FOUND, LOCK_NOT_FOUND,
    RESOURCE_NOT_FOUND,
};
use crate::permissions::key_permissions_equal;
use crate::provider::{
    AccessPolicyEntry, AccessPolicyUpdateKind, IdentityResolver, KeyVaultSpec, ManagementApi,
    ManagementLock, OperationStatus, PendingOperation, ResourceLockTarget, StorageAccountSpec,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// What an ensure operation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// The resource was already in the desired state; nothing was created.
    AlreadyExists,
    /// The resource was created (or, for access policies, added).
    Created,
}

impl EnsureOutcome {
    pub fn was_created(&self) -> bool {
        matches!(self, Self::Created)
    }
}

/// Ensures the Terraform backend resources exist.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use tf_prepare_core::adapters::InMemoryManagementApi;
/// use tf_prepare_core::{EnsureOutcome, Provisioner};
/// use tokio_util::sync::CancellationToken;
///
/// # tokio_test::block_on(async {
/// let provider = Arc::new(InMemoryManagementApi::new());
/// let provisioner = Provisioner::new(provider.clone(), provider.clone());
/// let cancel = CancellationToken::new();
///
/// let outcome = provisioner
///     .ensure_resource_group(&cancel, "rg1", "eastus", "sub1")
///     .await
///     .unwrap();
/// assert_eq!(outcome, EnsureOutcome::Created);
/// # });
/// ```
#[derive(Clone)]
pub struct Provisioner {
    api: Arc<dyn ManagementApi>,
    identity: Arc<dyn IdentityResolver>,
    config: ProvisionerConfig,
}

impl Provisioner {
    /// Create a provisioner with default poll intervals.
    pub fn new(api: Arc<dyn ManagementApi>, identity: Arc<dyn IdentityResolver>) -> Self {
        Self::with_config(api, identity, ProvisionerConfig::default())
    }

    /// Create a provisioner with explicit configuration.
    pub fn with_config(
        api: Arc<dyn ManagementApi>,
        identity: Arc<dyn IdentityResolver>,
        config: ProvisionerConfig,
    ) -> Self {
        Self {
            api,
            identity,
            config,
        }
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    // ========================================================================
    // Ensure Operations
    // ========================================================================

    /// Ensure a resource group exists at `location`.
    ///
    /// # Errors
    /// Fails with the provider error from either the existence check or the
    /// create call.
    #[instrument(skip(self, cancel))]
    pub async fn ensure_resource_group(
        &self,
        cancel: &CancellationToken,
        name: &str,
        location: &str,
        subscription_id: &str,
    ) -> Result<EnsureOutcome, ProvisionError> {
        let exists = self
            .call(
                cancel,
                "resource_group_exists",
                self.api.resource_group_exists(subscription_id, name),
            )
            .await?;

        if exists {
            info!(resource_group_name = %name, "Azure Resource Group already exists");
            return Ok(EnsureOutcome::AlreadyExists);
        }

        self.call(
            cancel,
            "create_resource_group",
            self.api.create_resource_group(subscription_id, name, location),
        )
        .await?;

        info!(resource_group_name = %name, "Azure Resource Group created");
        Ok(EnsureOutcome::Created)
    }

    /// Ensure a storage account exists.
    ///
    /// A missing account is created with the fixed backend configuration once
    /// the name-availability check passes, then polled until the provider
    /// reports a terminal state.
    ///
    /// # Errors
    /// - `ProvisionError::NameUnavailable` if the name is taken
    /// - `ProvisionError::Api` for any other provider failure
    /// - `ProvisionError::OperationFailed` if creation ends unsuccessfully
    #[instrument(skip(self, cancel))]
    pub async fn ensure_storage_account(
        &self,
        cancel: &CancellationToken,
        resource_group: &str,
        location: &str,
        account_name: &str,
        subscription_id: &str,
    ) -> Result<EnsureOutcome, ProvisionError> {
        let lookup = self
            .guard(
                cancel,
                "get_storage_account",
                self.api
                    .get_storage_account(subscription_id, resource_group, account_name),
            )
            .await?;

        match lookup {
            Ok(_) => {
                info!(storage_account_name = %account_name, "Azure Storage Account already exists");
                return Ok(EnsureOutcome::AlreadyExists);
            }
            Err(e) if e.is_not_found(&RESOURCE_NOT_FOUND) => {
                debug!(storage_account_name = %account_name, "Azure Storage Account not found");
            }
            Err(e) => return Err(api_failure("get_storage_account", e)),
        }

        let availability = self
            .call(
                cancel,
                "check_storage_account_name",
                self.api
                    .check_storage_account_name(subscription_id, account_name),
            )
            .await?;

        if !availability.name_available {
            return Err(name_unavailable(
                ResourceKind::StorageAccount,
                account_name,
                availability.describe(),
            ));
        }

        let spec = StorageAccountSpec::terraform_backend(location);
        let pending = self
            .call(
                cancel,
                "begin_create_storage_account",
                self.api.begin_create_storage_account(
                    subscription_id,
                    resource_group,
                    account_name,
                    &spec,
                ),
            )
            .await?;

        self.wait_for_completion(
            cancel,
            "create_storage_account",
            &pending,
            self.config.storage_account_poll_interval,
        )
        .await?;

        info!(storage_account_name = %account_name, "Azure Storage Account created");
        Ok(EnsureOutcome::Created)
    }

    /// Ensure a blob container exists in a storage account.
    #[instrument(skip(self, cancel))]
    pub async fn ensure_storage_container(
        &self,
        cancel: &CancellationToken,
        resource_group: &str,
        account_name: &str,
        container_name: &str,
        subscription_id: &str,
    ) -> Result<EnsureOutcome, ProvisionError> {
        let lookup = self
            .guard(
                cancel,
                "get_blob_container",
                self.api.get_blob_container(
                    subscription_id,
                    resource_group,
                    account_name,
                    container_name,
                ),
            )
            .await?;

        match lookup {
            Ok(_) => {
                info!(storage_account_container = %container_name, "Azure Storage Account Container already exists");
                return Ok(EnsureOutcome::AlreadyExists);
            }
            Err(e) if e.is_not_found(&CONTAINER_NOT_FOUND) => {}
            Err(e) => return Err(api_failure("get_blob_container", e)),
        }

        self.call(
            cancel,
            "create_blob_container",
            self.api.create_blob_container(
                subscription_id,
                resource_group,
                account_name,
                container_name,
            ),
        )
        .await?;

        info!(storage_account_container = %container_name, "Azure Storage Account Container created");
        Ok(EnsureOutcome::Created)
    }

    /// Ensure a key vault exists.
    ///
    /// # Errors
    /// A lookup failure other than "not found" is returned as
    /// `ProvisionError::KeyVaultLookup`, carrying the vault name as context.
    #[instrument(skip(self, cancel))]
    pub async fn ensure_key_vault(
        &self,
        cancel: &CancellationToken,
        resource_group: &str,
        location: &str,
        vault_name: &str,
        subscription_id: &str,
        tenant_id: &str,
    ) -> Result<EnsureOutcome, ProvisionError> {
        let lookup = self
            .guard(
                cancel,
                "get_key_vault",
                self.api
                    .get_key_vault(subscription_id, resource_group, vault_name),
            )
            .await?;

        match lookup {
            Ok(_) => {
                info!(key_vault_name = %vault_name, "Azure KeyVault already exists");
                return Ok(EnsureOutcome::AlreadyExists);
            }
            Err(e) if e.is_not_found(&RESOURCE_NOT_FOUND) => {}
            Err(e) => {
                error!(operation = "get_key_vault", key_vault_name = %vault_name, error = %e, "Azure KeyVault lookup failed");
                return Err(ProvisionError::KeyVaultLookup {
                    vault_name: vault_name.to_string(),
                    source: e,
                });
            }
        }

        let availability = self
            .call(
                cancel,
                "check_key_vault_name",
                self.api.check_key_vault_name(subscription_id, vault_name),
            )
            .await?;

        if !availability.name_available {
            return Err(name_unavailable(
                ResourceKind::KeyVault,
                vault_name,
                availability.describe(),
            ));
        }

        let spec = KeyVaultSpec::terraform_backend(location, tenant_id);
        let pending = self
            .call(
                cancel,
                "begin_create_key_vault",
                self.api
                    .begin_create_key_vault(subscription_id, resource_group, vault_name, &spec),
            )
            .await?;

        self.wait_for_completion(
            cancel,
            "create_key_vault",
            &pending,
            self.config.key_vault_poll_interval,
        )
        .await?;

        info!(key_vault_name = %vault_name, "Azure KeyVault created");
        Ok(EnsureOutcome::Created)
    }

    /// Ensure the calling principal holds the backend key permissions on a
    /// key vault.
    ///
    /// Only an entry for the calling principal with exactly the desired key
    /// permissions counts as present. Anything else results in a single
    /// `add` update; existing entries are never removed.
    #[instrument(skip(self, cancel))]
    pub async fn ensure_key_vault_access_policy(
        &self,
        cancel: &CancellationToken,
        resource_group: &str,
        location: &str,
        vault_name: &str,
        subscription_id: &str,
        tenant_id: &str,
    ) -> Result<EnsureOutcome, ProvisionError> {
        let object_id = match self
            .guard(
                cancel,
                "current_object_id",
                self.identity.current_object_id(tenant_id),
            )
            .await?
        {
            Ok(object_id) => object_id,
            Err(e) => {
                error!(operation = "current_object_id", error = %e, "Could not resolve the calling principal");
                return Err(ProvisionError::Identity(e));
            }
        };

        let desired = AccessPolicyEntry::terraform_backend(tenant_id, object_id.clone());

        let vault = self
            .call(
                cancel,
                "get_key_vault",
                self.api
                    .get_key_vault(subscription_id, resource_group, vault_name),
            )
            .await?;

        let already_granted = vault.access_policies().iter().any(|policy| {
            policy.object_id.eq_ignore_ascii_case(&object_id)
                && key_permissions_equal(
                    policy.permissions.keys.as_deref(),
                    desired.permissions.keys.as_deref(),
                )
        });

        if already_granted {
            info!(current_user_object_id = %object_id, "Azure KeyVault Access Policy already correct");
            return Ok(EnsureOutcome::AlreadyExists);
        }

        self.call(
            cancel,
            "update_access_policy",
            self.api.update_access_policy(
                subscription_id,
                resource_group,
                vault_name,
                AccessPolicyUpdateKind::Add,
                vec![desired],
            ),
        )
        .await?;

        info!(current_user_object_id = %object_id, "Azure KeyVault Access Policy created or updated");
        Ok(EnsureOutcome::Created)
    }

    /// Ensure a `CanNotDelete` lock named `lock_name` exists on a resource.
    #[instrument(skip(self, cancel))]
    pub async fn ensure_resource_lock(
        &self,
        cancel: &CancellationToken,
        target: &ResourceLockTarget,
        lock_name: &str,
        subscription_id: &str,
    ) -> Result<EnsureOutcome, ProvisionError> {
        let lookup = self
            .guard(
                cancel,
                "get_management_lock",
                self.api
                    .get_management_lock(subscription_id, target, lock_name),
            )
            .await?;

        match lookup {
            Ok(_) => {
                info!(
                    resource_group_name = %target.resource_group,
                    resource_provider_namespace = %target.provider_namespace,
                    resource_type = %target.resource_type,
                    resource_name = %target.resource_name,
                    "Azure Resource Lock already exists"
                );
                return Ok(EnsureOutcome::AlreadyExists);
            }
            Err(e) if e.is_not_found(&LOCK_NOT_FOUND) => {}
            Err(e) => return Err(api_failure("get_management_lock", e)),
        }

        let lock = ManagementLock::can_not_delete();
        self.call(
            cancel,
            "create_management_lock",
            self.api
                .create_management_lock(subscription_id, target, lock_name, &lock),
        )
        .await?;

        info!(
            resource_group_name = %target.resource_group,
            resource_provider_namespace = %target.provider_namespace,
            resource_type = %target.resource_type,
            resource_name = %target.resource_name,
            "Azure Resource Lock created"
        );
        Ok(EnsureOutcome::Created)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Run a provider call unless the token fires first.
    ///
    /// The provider's own result is handed back untouched so the caller can
    /// inspect it for "not found" conditions.
    async fn guard<T, F>(
        &self,
        cancel: &CancellationToken,
        operation: &'static str,
        call: F,
    ) -> Result<Result<T, ApiError>, ProvisionError>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                error!(operation, "Operation cancelled by caller");
                Err(ProvisionError::Cancelled { operation })
            }
            result = call => Ok(result),
        }
    }

    /// Run a provider call where any error is fatal.
    async fn call<T, F>(
        &self,
        cancel: &CancellationToken,
        operation: &'static str,
        call: F,
    ) -> Result<T, ProvisionError>
    where
        F: Future<Output = Result<T, ApiError>>,
    {
        self.guard(cancel, operation, call)
            .await?
            .map_err(|e| api_failure(operation, e))
    }

    /// Poll a pending operation at a fixed interval until it is terminal.
    async fn wait_for_completion(
        &self,
        cancel: &CancellationToken,
        operation: &'static str,
        pending: &PendingOperation,
        interval: Duration,
    ) -> Result<(), ProvisionError> {
        let mut polls: u32 = 0;
        loop {
            let status = self
                .call(cancel, operation, self.api.poll_operation(pending))
                .await?;
            polls += 1;

            match status {
                OperationStatus::Succeeded => {
                    debug!(operation, polls, "Operation reached terminal state");
                    return Ok(());
                }
                OperationStatus::Failed { status, message } => {
                    error!(operation, status = %status, message = %message, "Operation failed");
                    return Err(ProvisionError::OperationFailed {
                        operation,
                        status,
                        message,
                    });
                }
                OperationStatus::InProgress => {
                    debug!(operation, polls, interval_secs = interval.as_secs(), "Operation pending");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            error!(operation, polls, "Polling cancelled by caller");
                            return Err(ProvisionError::Cancelled { operation });
                        }
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("config", &self.config)
            .field("api", &"<ManagementApi>")
            .field("identity", &"<IdentityResolver>")
            .finish()
    }
}

fn api_failure(operation: &'static str, source: ApiError) -> ProvisionError {
    error!(operation, error = %source, "Provider call failed");
    ProvisionError::Api { operation, source }
}

fn name_unavailable(kind: ResourceKind, name: &str, reason: String) -> ProvisionError {
    error!(
        operation = "check_name_availability",
        resource_kind = %kind,
        name = %name,
        reason = %reason,
        "{} name not available",
        kind
    );
    ProvisionError::NameUnavailable {
        kind,
        name: name.to_string(),
        reason,
    }
}

#[cfg(test)]
#[path = "provisioner_tests.rs"]
mod tests;
