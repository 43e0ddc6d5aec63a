//! Common test utilities for tf-prepare integration tests
//!
//! This module provides:
//! - Provisioners wired to the in-memory provider or to a wiremock ARM server
//! - Request paths for the backend resources
//! - Mount helpers for the ARM responses each step expects

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tf_prepare_cli::BackendSettings;
use tf_prepare_core::adapters::{ArmClient, GraphIdentityResolver, InMemoryManagementApi};
use tf_prepare_core::{ArmClientConfig, Provisioner, ProvisionerConfig, StaticTokenCredential};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const SUB: &str = "sub1";
pub const TENANT: &str = "tenant1";
pub const USER: &str = "00000000-0000-0000-0000-0000000000aa";
pub const RESOURCE_GROUP: &str = "rg-tfstate";
pub const LOCATION: &str = "westeurope";
pub const STORAGE_ACCOUNT: &str = "tfstate001";
pub const CONTAINER: &str = "tfstate";
pub const KEY_VAULT: &str = "kv-tfstate";
pub const LOCK: &str = "tfstate-lock";

// ============================================================================
// Provisioners
// ============================================================================

#[allow(dead_code)]
pub fn backend_settings() -> BackendSettings {
    BackendSettings {
        subscription_id: SUB.to_string(),
        tenant_id: TENANT.to_string(),
        resource_group_name: RESOURCE_GROUP.to_string(),
        resource_group_location: LOCATION.to_string(),
        storage_account_name: STORAGE_ACCOUNT.to_string(),
        storage_account_container: CONTAINER.to_string(),
        keyvault_name: KEY_VAULT.to_string(),
        lock_name: LOCK.to_string(),
    }
}

#[allow(dead_code)]
pub fn memory_provisioner() -> (Arc<InMemoryManagementApi>, Provisioner) {
    let provider = Arc::new(InMemoryManagementApi::new().with_object_id(USER));
    let provisioner = Provisioner::new(provider.clone(), provider.clone());
    (provider, provisioner)
}

/// Provisioner talking ARM and Graph to `server`, polling without delay.
#[allow(dead_code)]
pub fn arm_provisioner(server: &MockServer) -> Provisioner {
    let credential = Arc::new(StaticTokenCredential::new("integration-token"));
    let config = ArmClientConfig::default()
        .with_management_url(server.uri())
        .with_graph_url(server.uri())
        .with_timeout(Duration::from_secs(5));

    let api = ArmClient::new(credential.clone(), config.clone())
        .unwrap()
        .with_tenant(TENANT);
    let identity = GraphIdentityResolver::new(credential, &config).unwrap();

    Provisioner::with_config(
        Arc::new(api),
        Arc::new(identity),
        ProvisionerConfig::default()
            .with_storage_account_poll_interval(Duration::ZERO)
            .with_key_vault_poll_interval(Duration::ZERO),
    )
}

// ============================================================================
// Paths
// ============================================================================

#[allow(dead_code)]
pub fn resource_group_path() -> String {
    format!("/subscriptions/{}/resourcegroups/{}", SUB, RESOURCE_GROUP)
}

#[allow(dead_code)]
pub fn storage_account_path() -> String {
    format!(
        "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Storage/storageAccounts/{}",
        SUB, RESOURCE_GROUP, STORAGE_ACCOUNT
    )
}

#[allow(dead_code)]
pub fn container_path() -> String {
    format!(
        "{}/blobServices/default/containers/{}",
        storage_account_path(),
        CONTAINER
    )
}

#[allow(dead_code)]
pub fn key_vault_path() -> String {
    format!(
        "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.KeyVault/vaults/{}",
        SUB, RESOURCE_GROUP, KEY_VAULT
    )
}

#[allow(dead_code)]
pub fn lock_path(resource_path: &str) -> String {
    format!(
        "{}/providers/Microsoft.Authorization/locks/{}",
        resource_path, LOCK
    )
}

// ============================================================================
// Responses
// ============================================================================

#[allow(dead_code)]
pub fn arm_error(code: &str, message: &str) -> Value {
    json!({ "error": { "code": code, "message": message } })
}

#[allow(dead_code)]
pub fn not_found(code: &str, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(404).set_body_json(arm_error(code, message))
}

#[allow(dead_code)]
pub fn key_vault_body(access_policies: Value) -> Value {
    json!({
        "id": key_vault_path(),
        "name": KEY_VAULT,
        "location": LOCATION,
        "properties": {
            "tenantId": TENANT,
            "sku": { "family": "A", "name": "standard" },
            "accessPolicies": access_policies,
            "provisioningState": "Succeeded"
        }
    })
}

/// Graph `/me` answering with [`USER`].
#[allow(dead_code)]
pub async fn mount_signed_in_user(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1.0/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": USER })))
        .mount(server)
        .await;
}

/// Existing lock on the resource at `resource_path`.
#[allow(dead_code)]
pub async fn mount_existing_lock(server: &MockServer, resource_path: &str) {
    Mock::given(method("GET"))
        .and(path(lock_path(resource_path)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": LOCK,
            "properties": { "level": "CanNotDelete", "notes": "CanNotDelete" }
        })))
        .mount(server)
        .await;
}
