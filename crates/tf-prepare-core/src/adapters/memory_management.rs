//! # In-Memory Management API
//!
//! Thread-safe in-memory stand-in for the Azure management plane, used by
//! tests and dry runs. It answers with the same status codes and error codes
//! the real provider uses, keeps a journal of every call, and can be told to
//! fail specific calls or to keep asynchronous operations pending for a
//! number of polls.

use crate::config::{KEY_VAULT_RESOURCE_TYPE, STORAGE_ACCOUNT_RESOURCE_TYPE};
use crate::error::ApiError;
use crate::permissions::merge_permissions;
use crate::provider::{
    AccessPolicyEntry, AccessPolicyUpdateKind, BlobContainer, IdentityResolver, KeyVault,
    KeyVaultSpec, ManagementApi, ManagementLock, NameAvailability, OperationStatus,
    PendingOperation, PollStyle, ResourceLockTarget, StorageAccount, StorageAccountSpec,
    StorageSku,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// Provider calls recorded in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiCallKind {
    ResourceGroupExists,
    CreateResourceGroup,
    GetStorageAccount,
    CheckStorageAccountName,
    BeginCreateStorageAccount,
    GetBlobContainer,
    CreateBlobContainer,
    GetKeyVault,
    CheckKeyVaultName,
    BeginCreateKeyVault,
    UpdateAccessPolicy,
    GetManagementLock,
    CreateManagementLock,
    PollOperation,
    CurrentObjectId,
}

enum PendingCreate {
    StorageAccount {
        key: String,
        name: String,
        spec: StorageAccountSpec,
    },
    KeyVault {
        key: String,
        name: String,
        spec: KeyVaultSpec,
    },
}

struct PendingEntry {
    remaining_polls: u32,
    create: PendingCreate,
}

#[derive(Default)]
struct State {
    resource_groups: HashMap<String, String>,
    storage_accounts: HashMap<String, StorageAccount>,
    storage_account_specs: HashMap<String, StorageAccountSpec>,
    containers: HashSet<String>,
    key_vaults: HashMap<String, KeyVault>,
    locks: HashMap<String, ManagementLock>,
    reserved_names: HashSet<String>,
    pending: HashMap<String, PendingEntry>,
    next_operation: u64,
    pending_polls: u32,
    operation_failure: Option<(String, String)>,
    object_id: Option<String>,
    failures: HashMap<ApiCallKind, VecDeque<ApiError>>,
    calls: Vec<ApiCallKind>,
    access_policy_updates: Vec<(AccessPolicyUpdateKind, Vec<AccessPolicyEntry>)>,
}

/// In-memory management plane.
#[derive(Default)]
pub struct InMemoryManagementApi {
    state: Mutex<State>,
}

fn key(parts: &[&str]) -> String {
    parts.join("/").to_lowercase()
}

fn lock_key(subscription_id: &str, target: &ResourceLockTarget, lock_name: &str) -> String {
    key(&[subscription_id, &target.to_string(), lock_name])
}

fn resource_group_not_found(resource_group: &str) -> ApiError {
    ApiError::http(
        404,
        "ResourceGroupNotFound",
        format!("Resource group '{}' could not be found.", resource_group),
    )
}

fn resource_not_found(resource_type: &str, name: &str, resource_group: &str) -> ApiError {
    ApiError::http(
        404,
        "ResourceNotFound",
        format!(
            "The Resource '{}/{}' under resource group '{}' was not found.",
            resource_type, name, resource_group
        ),
    )
}

impl InMemoryManagementApi {
    /// Create an empty management plane.
    pub fn new() -> Self {
        Self::default()
    }

    /// Principal returned by [`IdentityResolver::current_object_id`].
    pub fn with_object_id(self, object_id: impl Into<String>) -> Self {
        self.state().object_id = Some(object_id.into());
        self
    }

    /// Number of `InProgress` answers before a pending operation completes.
    pub fn with_pending_polls(self, polls: u32) -> Self {
        self.state().pending_polls = polls;
        self
    }

    /// Make every asynchronous operation end in the given failed state.
    pub fn with_operation_failure(
        self,
        status: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        self.state().operation_failure = Some((status.into(), message.into()));
        self
    }

    /// Mark a globally unique name (storage account or key vault) as taken.
    pub fn reserve_name(&self, name: &str) {
        self.state().reserved_names.insert(name.to_lowercase());
    }

    /// Fail the next call of `kind` with `error`. Failures queue up.
    pub fn fail_next(&self, kind: ApiCallKind, error: ApiError) {
        self.state()
            .failures
            .entry(kind)
            .or_default()
            .push_back(error);
    }

    // ------------------------------------------------------------------------
    // Seeding
    // ------------------------------------------------------------------------

    pub fn insert_resource_group(&self, subscription_id: &str, name: &str, location: &str) {
        self.state()
            .resource_groups
            .insert(key(&[subscription_id, name]), location.to_string());
    }

    pub fn insert_storage_account(
        &self,
        subscription_id: &str,
        resource_group: &str,
        name: &str,
        location: &str,
    ) {
        let mut state = self.state();
        state.storage_accounts.insert(
            key(&[subscription_id, resource_group, name]),
            StorageAccount {
                id: None,
                name: Some(name.to_string()),
                location: Some(location.to_string()),
                kind: None,
                sku: None,
            },
        );
        state.reserved_names.insert(name.to_lowercase());
    }

    pub fn insert_blob_container(
        &self,
        subscription_id: &str,
        resource_group: &str,
        account_name: &str,
        container_name: &str,
    ) {
        self.state().containers.insert(key(&[
            subscription_id,
            resource_group,
            account_name,
            container_name,
        ]));
    }

    pub fn insert_key_vault(
        &self,
        subscription_id: &str,
        resource_group: &str,
        name: &str,
        spec: KeyVaultSpec,
    ) {
        let mut state = self.state();
        state.key_vaults.insert(
            key(&[subscription_id, resource_group, name]),
            KeyVault {
                id: None,
                name: Some(name.to_string()),
                location: Some(spec.location),
                properties: spec.properties,
            },
        );
        state.reserved_names.insert(name.to_lowercase());
    }

    pub fn insert_lock(
        &self,
        subscription_id: &str,
        target: &ResourceLockTarget,
        lock_name: &str,
        lock: ManagementLock,
    ) {
        self.state()
            .locks
            .insert(lock_key(subscription_id, target, lock_name), lock);
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<ApiCallKind> {
        self.state().calls.clone()
    }

    /// How many times `kind` was called.
    pub fn call_count(&self, kind: ApiCallKind) -> usize {
        self.state().calls.iter().filter(|c| **c == kind).count()
    }

    /// Location of a resource group, if it exists.
    pub fn resource_group_location(&self, subscription_id: &str, name: &str) -> Option<String> {
        self.state()
            .resource_groups
            .get(&key(&[subscription_id, name]))
            .cloned()
    }

    /// Number of resource groups across all subscriptions.
    pub fn resource_group_count(&self) -> usize {
        self.state().resource_groups.len()
    }

    /// Request body used to create a storage account.
    pub fn storage_account_spec(
        &self,
        subscription_id: &str,
        resource_group: &str,
        name: &str,
    ) -> Option<StorageAccountSpec> {
        self.state()
            .storage_account_specs
            .get(&key(&[subscription_id, resource_group, name]))
            .cloned()
    }

    pub fn has_storage_account(&self, subscription_id: &str, resource_group: &str, name: &str) -> bool {
        self.state()
            .storage_accounts
            .contains_key(&key(&[subscription_id, resource_group, name]))
    }

    pub fn has_blob_container(
        &self,
        subscription_id: &str,
        resource_group: &str,
        account_name: &str,
        container_name: &str,
    ) -> bool {
        self.state().containers.contains(&key(&[
            subscription_id,
            resource_group,
            account_name,
            container_name,
        ]))
    }

    /// Current state of a key vault.
    pub fn key_vault(&self, subscription_id: &str, resource_group: &str, name: &str) -> Option<KeyVault> {
        self.state()
            .key_vaults
            .get(&key(&[subscription_id, resource_group, name]))
            .cloned()
    }

    /// Current state of a lock.
    pub fn lock(
        &self,
        subscription_id: &str,
        target: &ResourceLockTarget,
        lock_name: &str,
    ) -> Option<ManagementLock> {
        self.state()
            .locks
            .get(&lock_key(subscription_id, target, lock_name))
            .cloned()
    }

    /// Access-policy updates received, in order.
    pub fn access_policy_updates(&self) -> Vec<(AccessPolicyUpdateKind, Vec<AccessPolicyEntry>)> {
        self.state().access_policy_updates.clone()
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Journal the call and return the injected failure, if any.
    fn record(&self, kind: ApiCallKind) -> Result<MutexGuard<'_, State>, ApiError> {
        let mut state = self.state();
        state.calls.push(kind);
        if let Some(error) = state.failures.get_mut(&kind).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        Ok(state)
    }

    fn start_operation(state: &mut State, create: PendingCreate) -> PendingOperation {
        state.next_operation += 1;
        let poll_url = format!("memory://operations/{}", state.next_operation);
        state.pending.insert(
            poll_url.clone(),
            PendingEntry {
                remaining_polls: state.pending_polls,
                create,
            },
        );
        PendingOperation {
            poll_url,
            style: PollStyle::AsyncOperation,
        }
    }

    fn check_name(state: &State, name: &str, resource_type: &str) -> NameAvailability {
        if state.reserved_names.contains(&name.to_lowercase()) {
            NameAvailability::unavailable(
                "AlreadyExists",
                format!("The {} name '{}' is already taken.", resource_type, name),
            )
        } else {
            NameAvailability::available()
        }
    }
}

#[async_trait]
impl ManagementApi for InMemoryManagementApi {
    async fn resource_group_exists(
        &self,
        subscription_id: &str,
        resource_group: &str,
    ) -> Result<bool, ApiError> {
        let state = self.record(ApiCallKind::ResourceGroupExists)?;
        Ok(state
            .resource_groups
            .contains_key(&key(&[subscription_id, resource_group])))
    }

    async fn create_resource_group(
        &self,
        subscription_id: &str,
        resource_group: &str,
        location: &str,
    ) -> Result<(), ApiError> {
        let mut state = self.record(ApiCallKind::CreateResourceGroup)?;
        state
            .resource_groups
            .insert(key(&[subscription_id, resource_group]), location.to_string());
        Ok(())
    }

    async fn get_storage_account(
        &self,
        subscription_id: &str,
        resource_group: &str,
        account_name: &str,
    ) -> Result<StorageAccount, ApiError> {
        let state = self.record(ApiCallKind::GetStorageAccount)?;
        if !state
            .resource_groups
            .contains_key(&key(&[subscription_id, resource_group]))
        {
            return Err(resource_group_not_found(resource_group));
        }
        state
            .storage_accounts
            .get(&key(&[subscription_id, resource_group, account_name]))
            .cloned()
            .ok_or_else(|| {
                resource_not_found(STORAGE_ACCOUNT_RESOURCE_TYPE, account_name, resource_group)
            })
    }

    async fn check_storage_account_name(
        &self,
        _subscription_id: &str,
        account_name: &str,
    ) -> Result<NameAvailability, ApiError> {
        let state = self.record(ApiCallKind::CheckStorageAccountName)?;
        Ok(Self::check_name(&state, account_name, "storage account"))
    }

    async fn begin_create_storage_account(
        &self,
        subscription_id: &str,
        resource_group: &str,
        account_name: &str,
        spec: &StorageAccountSpec,
    ) -> Result<PendingOperation, ApiError> {
        let mut state = self.record(ApiCallKind::BeginCreateStorageAccount)?;
        if !state
            .resource_groups
            .contains_key(&key(&[subscription_id, resource_group]))
        {
            return Err(resource_group_not_found(resource_group));
        }

        let account_key = key(&[subscription_id, resource_group, account_name]);
        state
            .storage_account_specs
            .insert(account_key.clone(), spec.clone());
        state.reserved_names.insert(account_name.to_lowercase());

        Ok(Self::start_operation(
            &mut state,
            PendingCreate::StorageAccount {
                key: account_key,
                name: account_name.to_string(),
                spec: spec.clone(),
            },
        ))
    }

    async fn get_blob_container(
        &self,
        subscription_id: &str,
        resource_group: &str,
        account_name: &str,
        container_name: &str,
    ) -> Result<BlobContainer, ApiError> {
        let state = self.record(ApiCallKind::GetBlobContainer)?;
        if !state
            .storage_accounts
            .contains_key(&key(&[subscription_id, resource_group, account_name]))
        {
            return Err(resource_not_found(
                STORAGE_ACCOUNT_RESOURCE_TYPE,
                account_name,
                resource_group,
            ));
        }
        if state.containers.contains(&key(&[
            subscription_id,
            resource_group,
            account_name,
            container_name,
        ])) {
            Ok(BlobContainer {
                id: None,
                name: Some(container_name.to_string()),
            })
        } else {
            Err(ApiError::http(
                404,
                "ContainerNotFound",
                "The specified container does not exist.",
            ))
        }
    }

    async fn create_blob_container(
        &self,
        subscription_id: &str,
        resource_group: &str,
        account_name: &str,
        container_name: &str,
    ) -> Result<BlobContainer, ApiError> {
        let mut state = self.record(ApiCallKind::CreateBlobContainer)?;
        if !state
            .storage_accounts
            .contains_key(&key(&[subscription_id, resource_group, account_name]))
        {
            return Err(resource_not_found(
                STORAGE_ACCOUNT_RESOURCE_TYPE,
                account_name,
                resource_group,
            ));
        }
        state.containers.insert(key(&[
            subscription_id,
            resource_group,
            account_name,
            container_name,
        ]));
        Ok(BlobContainer {
            id: None,
            name: Some(container_name.to_string()),
        })
    }

    async fn get_key_vault(
        &self,
        subscription_id: &str,
        resource_group: &str,
        vault_name: &str,
    ) -> Result<KeyVault, ApiError> {
        let state = self.record(ApiCallKind::GetKeyVault)?;
        if !state
            .resource_groups
            .contains_key(&key(&[subscription_id, resource_group]))
        {
            return Err(resource_group_not_found(resource_group));
        }
        state
            .key_vaults
            .get(&key(&[subscription_id, resource_group, vault_name]))
            .cloned()
            .ok_or_else(|| resource_not_found(KEY_VAULT_RESOURCE_TYPE, vault_name, resource_group))
    }

    async fn check_key_vault_name(
        &self,
        _subscription_id: &str,
        vault_name: &str,
    ) -> Result<NameAvailability, ApiError> {
        let state = self.record(ApiCallKind::CheckKeyVaultName)?;
        Ok(Self::check_name(&state, vault_name, "key vault"))
    }

    async fn begin_create_key_vault(
        &self,
        subscription_id: &str,
        resource_group: &str,
        vault_name: &str,
        spec: &KeyVaultSpec,
    ) -> Result<PendingOperation, ApiError> {
        let mut state = self.record(ApiCallKind::BeginCreateKeyVault)?;
        if !state
            .resource_groups
            .contains_key(&key(&[subscription_id, resource_group]))
        {
            return Err(resource_group_not_found(resource_group));
        }
        state.reserved_names.insert(vault_name.to_lowercase());

        Ok(Self::start_operation(
            &mut state,
            PendingCreate::KeyVault {
                key: key(&[subscription_id, resource_group, vault_name]),
                name: vault_name.to_string(),
                spec: spec.clone(),
            },
        ))
    }

    async fn update_access_policy(
        &self,
        subscription_id: &str,
        resource_group: &str,
        vault_name: &str,
        kind: AccessPolicyUpdateKind,
        policies: Vec<AccessPolicyEntry>,
    ) -> Result<(), ApiError> {
        let mut state = self.record(ApiCallKind::UpdateAccessPolicy)?;
        let vault_key = key(&[subscription_id, resource_group, vault_name]);
        let Some(vault) = state.key_vaults.get_mut(&vault_key) else {
            return Err(resource_not_found(
                KEY_VAULT_RESOURCE_TYPE,
                vault_name,
                resource_group,
            ));
        };

        let entries = vault.properties.access_policies.get_or_insert_with(Vec::new);
        for policy in &policies {
            if kind == AccessPolicyUpdateKind::Remove {
                entries.retain(|e| !e.object_id.eq_ignore_ascii_case(&policy.object_id));
                continue;
            }

            let existing = entries.iter_mut().find(|e| {
                e.object_id.eq_ignore_ascii_case(&policy.object_id)
                    && e.tenant_id.eq_ignore_ascii_case(&policy.tenant_id)
            });

            match existing {
                Some(entry) if kind == AccessPolicyUpdateKind::Add => {
                    let keys = entry.permissions.keys.get_or_insert_with(Vec::new);
                    merge_permissions(keys, policy.permissions.keys.as_deref().unwrap_or(&[]));
                }
                Some(entry) => {
                    entry.permissions = policy.permissions.clone();
                }
                None => entries.push(policy.clone()),
            }
        }

        state.access_policy_updates.push((kind, policies));
        Ok(())
    }

    async fn get_management_lock(
        &self,
        subscription_id: &str,
        target: &ResourceLockTarget,
        lock_name: &str,
    ) -> Result<ManagementLock, ApiError> {
        let state = self.record(ApiCallKind::GetManagementLock)?;
        state
            .locks
            .get(&lock_key(subscription_id, target, lock_name))
            .cloned()
            .ok_or_else(|| {
                ApiError::http(
                    404,
                    "LockNotFound",
                    format!("The lock '{}' could not be found.", lock_name),
                )
            })
    }

    async fn create_management_lock(
        &self,
        subscription_id: &str,
        target: &ResourceLockTarget,
        lock_name: &str,
        lock: &ManagementLock,
    ) -> Result<ManagementLock, ApiError> {
        let mut state = self.record(ApiCallKind::CreateManagementLock)?;
        state
            .locks
            .insert(lock_key(subscription_id, target, lock_name), lock.clone());
        Ok(lock.clone())
    }

    async fn poll_operation(
        &self,
        operation: &PendingOperation,
    ) -> Result<OperationStatus, ApiError> {
        let mut state = self.record(ApiCallKind::PollOperation)?;
        if operation.style == PollStyle::Completed {
            return Ok(OperationStatus::Succeeded);
        }

        let Some(entry) = state.pending.get_mut(&operation.poll_url) else {
            return Err(ApiError::http(
                404,
                "OperationNotFound",
                format!("No pending operation at '{}'", operation.poll_url),
            ));
        };

        if entry.remaining_polls > 0 {
            entry.remaining_polls -= 1;
            return Ok(OperationStatus::InProgress);
        }

        let Some(entry) = state.pending.remove(&operation.poll_url) else {
            return Ok(OperationStatus::Succeeded);
        };

        if let Some((status, message)) = state.operation_failure.clone() {
            return Ok(OperationStatus::Failed { status, message });
        }

        match entry.create {
            PendingCreate::StorageAccount { key, name, spec } => {
                state.storage_accounts.insert(
                    key,
                    StorageAccount {
                        id: None,
                        name: Some(name),
                        location: Some(spec.location),
                        kind: Some(spec.kind),
                        sku: Some(StorageSku {
                            name: spec.sku.name,
                            tier: spec.sku.tier,
                        }),
                    },
                );
            }
            PendingCreate::KeyVault { key, name, spec } => {
                let mut properties = spec.properties;
                properties.provisioning_state = Some("Succeeded".to_string());
                state.key_vaults.insert(
                    key,
                    KeyVault {
                        id: None,
                        name: Some(name),
                        location: Some(spec.location),
                        properties,
                    },
                );
            }
        }

        Ok(OperationStatus::Succeeded)
    }
}

#[async_trait]
impl IdentityResolver for InMemoryManagementApi {
    async fn current_object_id(&self, tenant_id: &str) -> Result<String, ApiError> {
        let state = self.record(ApiCallKind::CurrentObjectId)?;
        state.object_id.clone().ok_or_else(|| {
            ApiError::Authentication(format!("no signed-in principal in tenant '{}'", tenant_id))
        })
    }
}

#[cfg(test)]
#[path = "memory_management_tests.rs"]
mod tests;
