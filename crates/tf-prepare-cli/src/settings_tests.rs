//! Tests for CLI configuration loading.

use super::*;
use clap::Parser;
use serial_test::serial;
use std::io::Write;

fn complete_azure_settings() -> AzureSettings {
    AzureSettings {
        subscription_id: Some("sub1".to_string()),
        tenant_id: Some("tenant1".to_string()),
        resource_group_name: Some("rg-tfstate".to_string()),
        resource_group_location: Some("westeurope".to_string()),
        storage_account_name: Some("tfstate001".to_string()),
        storage_account_container: Some("tfstate".to_string()),
        keyvault_name: Some("kv-tfstate".to_string()),
        lock_name: Some("tfstate-lock".to_string()),
    }
}

fn write_config(extension: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(extension)
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

struct EnvGuard(Vec<&'static str>);

impl EnvGuard {
    fn set(vars: &[(&'static str, &str)]) -> Self {
        for (name, value) in vars {
            std::env::set_var(name, value);
        }
        Self(vars.iter().map(|(name, _)| *name).collect())
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for name in &self.0 {
            std::env::remove_var(name);
        }
    }
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_defaults_carry_standard_intervals_and_endpoints() {
    let config = TfPrepareConfig::default();
    assert_eq!(
        config.provisioner.storage_account_poll_interval,
        Duration::from_secs(30)
    );
    assert_eq!(
        config.provisioner.key_vault_poll_interval,
        Duration::from_secs(5)
    );
    assert_eq!(config.client.management_url, "https://management.azure.com");
    assert_eq!(config.timeout(), None);
}

#[test]
fn test_validate_returns_backend_settings() {
    let config = TfPrepareConfig {
        azure: complete_azure_settings(),
        ..Default::default()
    };

    let settings = config.validate().unwrap();
    assert_eq!(settings.subscription_id, "sub1");
    assert_eq!(settings.storage_account_container, "tfstate");
    assert_eq!(settings.lock_name, "tfstate-lock");
}

#[test]
fn test_validate_reports_first_missing_key() {
    let mut azure = complete_azure_settings();
    azure.keyvault_name = None;
    let config = TfPrepareConfig {
        azure,
        ..Default::default()
    };

    match config.validate() {
        Err(ConfigError::MissingRequired { key }) => assert_eq!(key, "azure.keyvault_name"),
        other => panic!("Expected MissingRequired, got {:?}", other),
    }
}

#[test]
fn test_validate_treats_blank_as_missing() {
    let mut azure = complete_azure_settings();
    azure.tenant_id = Some("   ".to_string());
    let config = TfPrepareConfig {
        azure,
        ..Default::default()
    };

    assert!(matches!(
        config.validate(),
        Err(ConfigError::MissingRequired { key }) if key == "azure.tenant_id"
    ));
}

#[test]
fn test_validate_rejects_zero_timeout() {
    let config = TfPrepareConfig {
        azure: complete_azure_settings(),
        timeout_seconds: Some(0),
        ..Default::default()
    };

    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidValue { key, .. }) if key == "timeout_seconds"
    ));
}

#[test]
fn test_validate_rejects_zero_poll_intervals() {
    let storage = TfPrepareConfig {
        azure: complete_azure_settings(),
        provisioner: ProvisionerConfig::default()
            .with_storage_account_poll_interval(Duration::ZERO),
        ..Default::default()
    };
    assert!(matches!(
        storage.validate(),
        Err(ConfigError::InvalidValue { key, .. })
            if key == "provisioner.storage_account_poll_interval"
    ));

    let key_vault = TfPrepareConfig {
        azure: complete_azure_settings(),
        provisioner: ProvisionerConfig::default().with_key_vault_poll_interval(Duration::ZERO),
        ..Default::default()
    };
    assert!(matches!(
        key_vault.validate(),
        Err(ConfigError::InvalidValue { key, .. })
            if key == "provisioner.key_vault_poll_interval"
    ));
}

#[test]
#[serial]
fn test_zero_poll_interval_in_file_fails_validation() {
    let file = write_config(
        ".yaml",
        "provisioner:\n  key_vault_poll_interval: 0\n",
    );

    let config = load_configuration(Some(file.path()), &AzureArgs::default()).unwrap();

    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidValue { key, .. })
            if key == "provisioner.key_vault_poll_interval"
    ));
}

#[test]
fn test_flags_override_loaded_values() {
    let mut config = TfPrepareConfig {
        azure: complete_azure_settings(),
        timeout_seconds: Some(300),
        ..Default::default()
    };
    let args = AzureArgs {
        storage_account_name: Some("tfstate002".to_string()),
        timeout_seconds: Some(60),
        ..Default::default()
    };

    config.apply_overrides(&args);

    assert_eq!(config.azure.storage_account_name.as_deref(), Some("tfstate002"));
    assert_eq!(config.azure.keyvault_name.as_deref(), Some("kv-tfstate"));
    assert_eq!(config.timeout(), Some(Duration::from_secs(60)));
}

// ============================================================================
// Loading
// ============================================================================

#[test]
#[serial]
fn test_load_yaml_file() {
    let file = write_config(
        ".yaml",
        r#"
azure:
  subscription_id: sub1
  tenant_id: tenant1
  resource_group_name: rg-tfstate
  resource_group_location: westeurope
  storage_account_name: tfstate001
  storage_account_container: tfstate
  keyvault_name: kv-tfstate
  lock_name: tfstate-lock
provisioner:
  storage_account_poll_interval: 10
timeout_seconds: 900
"#,
    );

    let config = load_configuration(Some(file.path()), &AzureArgs::default()).unwrap();

    assert_eq!(config.azure, complete_azure_settings());
    assert_eq!(
        config.provisioner.storage_account_poll_interval,
        Duration::from_secs(10)
    );
    assert_eq!(
        config.provisioner.key_vault_poll_interval,
        Duration::from_secs(5)
    );
    assert_eq!(config.timeout_seconds, Some(900));
}

#[test]
#[serial]
fn test_load_toml_file_with_client_settings() {
    let file = write_config(
        ".toml",
        r#"
[azure]
resource_group_name = "rg-tfstate"

[client]
management_url = "http://127.0.0.1:8080"
timeout = 15
"#,
    );

    let config = load_configuration(Some(file.path()), &AzureArgs::default()).unwrap();

    assert_eq!(config.azure.resource_group_name.as_deref(), Some("rg-tfstate"));
    assert_eq!(config.client.management_url, "http://127.0.0.1:8080");
    assert_eq!(config.client.timeout, Duration::from_secs(15));
    assert_eq!(config.client.graph_url, "https://graph.microsoft.com");
}

#[test]
#[serial]
fn test_missing_explicit_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.yaml");

    match load_configuration(Some(&path), &AzureArgs::default()) {
        Err(ConfigError::FileNotFound { path: reported }) => assert_eq!(reported, path),
        other => panic!("Expected FileNotFound, got {:?}", other),
    }
}

#[test]
#[serial]
fn test_malformed_file_is_an_error() {
    let file = write_config(".yaml", "azure: [unterminated\n");

    let result = load_configuration(Some(file.path()), &AzureArgs::default());
    assert!(matches!(result, Err(ConfigError::InvalidFormat(_))));
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let file = write_config(
        ".yaml",
        "azure:\n  keyvault_name: kv-from-file\n  lock_name: lock-from-file\n",
    );
    let _env = EnvGuard::set(&[("TFP__AZURE__KEYVAULT_NAME", "kv-from-env")]);

    let config = load_configuration(Some(file.path()), &AzureArgs::default()).unwrap();

    assert_eq!(config.azure.keyvault_name.as_deref(), Some("kv-from-env"));
    assert_eq!(config.azure.lock_name.as_deref(), Some("lock-from-file"));
}

#[test]
#[serial]
fn test_flags_override_environment() {
    let _env = EnvGuard::set(&[
        ("TFP__AZURE__STORAGE_ACCOUNT_NAME", "tfstateenv"),
        ("TFP__AZURE__STORAGE_ACCOUNT_CONTAINER", "state"),
    ]);
    let args = AzureArgs {
        storage_account_name: Some("tfstateflag".to_string()),
        ..Default::default()
    };

    let config = load_configuration(None, &args).unwrap();

    assert_eq!(config.azure.storage_account_name.as_deref(), Some("tfstateflag"));
    assert_eq!(config.azure.storage_account_container.as_deref(), Some("state"));
}

#[test]
#[serial]
fn test_no_sources_yields_defaults() {
    std::env::remove_var("AZURE_SUBSCRIPTION_ID");
    std::env::remove_var("AZURE_TENANT_ID");

    let config = load_configuration(None, &AzureArgs::default()).unwrap();

    assert_eq!(config.azure, AzureSettings::default());
    assert!(matches!(
        config.validate(),
        Err(ConfigError::MissingRequired { key }) if key == "azure.subscription_id"
    ));
}

#[test]
#[serial]
fn test_azure_environment_is_lowest_priority() {
    let file = write_config(
        ".yaml",
        "azure:\n  subscription_id: sub-from-file\n",
    );
    let _env = EnvGuard::set(&[
        ("AZURE_SUBSCRIPTION_ID", "sub-from-azure-env"),
        ("AZURE_TENANT_ID", "tenant-from-azure-env"),
        ("TFP__AZURE__TENANT_ID", "tenant-from-tfp"),
    ]);

    let config = load_configuration(Some(file.path()), &AzureArgs::default()).unwrap();

    assert_eq!(config.azure.subscription_id.as_deref(), Some("sub-from-file"));
    assert_eq!(config.azure.tenant_id.as_deref(), Some("tenant-from-tfp"));
}

#[test]
#[serial]
fn test_azure_environment_fills_absent_subscription_and_tenant() {
    let _env = EnvGuard::set(&[
        ("AZURE_SUBSCRIPTION_ID", "sub-from-azure-env"),
        ("AZURE_TENANT_ID", "tenant-from-azure-env"),
    ]);

    let config = load_configuration(None, &AzureArgs::default()).unwrap();

    assert_eq!(
        config.azure.subscription_id.as_deref(),
        Some("sub-from-azure-env")
    );
    assert_eq!(
        config.azure.tenant_id.as_deref(),
        Some("tenant-from-azure-env")
    );
}

#[test]
#[serial]
fn test_flags_override_azure_environment() {
    let _env = EnvGuard::set(&[("AZURE_SUBSCRIPTION_ID", "sub-from-azure-env")]);
    let cli = crate::Cli::try_parse_from([
        "tf-prepare",
        "azure",
        "--subscription-id",
        "sub-from-flag",
    ])
    .unwrap();
    let crate::Commands::Azure(args) = cli.command else {
        panic!("Expected azure command");
    };

    let config = load_configuration(None, &args).unwrap();

    assert_eq!(config.azure.subscription_id.as_deref(), Some("sub-from-flag"));
}

#[test]
#[serial]
fn test_azure_environment_is_not_read_as_a_flag() {
    let _env = EnvGuard::set(&[
        ("AZURE_SUBSCRIPTION_ID", "sub-from-azure-env"),
        ("AZURE_TENANT_ID", "tenant-from-azure-env"),
    ]);

    let cli = crate::Cli::try_parse_from(["tf-prepare", "azure"]).unwrap();
    let crate::Commands::Azure(args) = cli.command else {
        panic!("Expected azure command");
    };

    assert_eq!(args, AzureArgs::default());
}
