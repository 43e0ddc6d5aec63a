//! Tests for provisioning configuration.

use super::*;

#[test]
fn test_provisioner_config_defaults() {
    let config = ProvisionerConfig::default();
    assert_eq!(config.storage_account_poll_interval, Duration::from_secs(30));
    assert_eq!(config.key_vault_poll_interval, Duration::from_secs(5));
}

#[test]
fn test_provisioner_config_deserializes_seconds() {
    let config: ProvisionerConfig = serde_json::from_value(serde_json::json!({
        "storage_account_poll_interval": 10
    }))
    .unwrap();

    assert_eq!(config.storage_account_poll_interval, Duration::from_secs(10));
    assert_eq!(config.key_vault_poll_interval, KEY_VAULT_POLL_INTERVAL);
}

#[test]
fn test_desired_key_permissions() {
    assert_eq!(
        desired_key_permissions(),
        vec!["update", "get", "list", "encrypt", "decrypt"]
    );
}

#[test]
fn test_arm_client_config_builders() {
    let config = ArmClientConfig::default()
        .with_management_url("http://localhost:1234")
        .with_graph_url("http://localhost:5678")
        .with_timeout(Duration::from_secs(5))
        .with_user_agent("tests");

    assert_eq!(config.management_url, "http://localhost:1234");
    assert_eq!(config.graph_url, "http://localhost:5678");
    assert_eq!(config.timeout, Duration::from_secs(5));
    assert_eq!(config.user_agent, "tests");
}

#[test]
fn test_arm_client_config_defaults_point_at_public_cloud() {
    let config = ArmClientConfig::default();
    assert_eq!(config.management_url, DEFAULT_MANAGEMENT_URL);
    assert_eq!(config.graph_url, DEFAULT_GRAPH_URL);
    assert!(config.user_agent.starts_with("tf-prepare/"));
}
