//! # CLI Configuration
//!
//! Layered configuration for `tf-prepare azure`. Sources, later ones winning:
//!
//! 1. `AZURE_SUBSCRIPTION_ID` and `AZURE_TENANT_ID`, for the subscription and
//!    tenant only
//! 2. The file named by `--config` / `TF_PREPARE_CONFIG` (format from the
//!    file extension: `.yaml`, `.toml` or `.json`)
//! 3. Environment variables prefixed `TFP__` with `__` as the nesting
//!    separator, e.g. `TFP__AZURE__KEYVAULT_NAME=kv-tfstate`
//! 4. Command-line flags

use crate::{AzureArgs, ConfigError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tf_prepare_core::{ArmClientConfig, ProvisionerConfig};
use tracing::{debug, info};

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "TFP";

/// Conventional Azure variables read as defaults for configuration keys.
const AZURE_ENV_DEFAULTS: [(&str, &str); 2] = [
    ("AZURE_SUBSCRIPTION_ID", "azure.subscription_id"),
    ("AZURE_TENANT_ID", "azure.tenant_id"),
];

/// Full CLI configuration after all sources are merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TfPrepareConfig {
    /// Names and identifiers of the backend resources
    pub azure: AzureSettings,

    /// Poll intervals for long-running creates
    pub provisioner: ProvisionerConfig,

    /// Endpoints and HTTP settings
    pub client: ArmClientConfig,

    /// Deadline for the whole run; unset means no deadline
    pub timeout_seconds: Option<u64>,
}

/// Resource identifiers as read from configuration; every field is required
/// by [`TfPrepareConfig::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureSettings {
    pub subscription_id: Option<String>,
    pub tenant_id: Option<String>,
    pub resource_group_name: Option<String>,
    pub resource_group_location: Option<String>,
    pub storage_account_name: Option<String>,
    pub storage_account_container: Option<String>,
    pub keyvault_name: Option<String>,
    pub lock_name: Option<String>,
}

/// Validated resource identifiers for one bootstrap run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSettings {
    pub subscription_id: String,
    pub tenant_id: String,
    pub resource_group_name: String,
    pub resource_group_location: String,
    pub storage_account_name: String,
    pub storage_account_container: String,
    pub keyvault_name: String,
    pub lock_name: String,
}

impl TfPrepareConfig {
    /// Apply command-line flags on top of the loaded sources.
    pub fn apply_overrides(&mut self, args: &AzureArgs) {
        let azure = &mut self.azure;
        let overrides = [
            (&mut azure.subscription_id, &args.subscription_id),
            (&mut azure.tenant_id, &args.tenant_id),
            (&mut azure.resource_group_name, &args.resource_group_name),
            (&mut azure.resource_group_location, &args.resource_group_location),
            (&mut azure.storage_account_name, &args.storage_account_name),
            (&mut azure.storage_account_container, &args.storage_account_container),
            (&mut azure.keyvault_name, &args.keyvault_name),
            (&mut azure.lock_name, &args.lock_name),
        ];
        for (field, value) in overrides {
            if let Some(value) = value {
                *field = Some(value.clone());
            }
        }

        if args.timeout_seconds.is_some() {
            self.timeout_seconds = args.timeout_seconds;
        }
    }

    /// Check that every required identifier is present and non-blank.
    ///
    /// # Errors
    /// - `ConfigError::MissingRequired` naming the first absent key
    /// - `ConfigError::InvalidValue` for a zero timeout or poll interval
    pub fn validate(&self) -> Result<BackendSettings, ConfigError> {
        let zero_values = [
            ("timeout_seconds", self.timeout_seconds == Some(0)),
            (
                "provisioner.storage_account_poll_interval",
                self.provisioner.storage_account_poll_interval.is_zero(),
            ),
            (
                "provisioner.key_vault_poll_interval",
                self.provisioner.key_vault_poll_interval.is_zero(),
            ),
        ];
        if let Some((key, _)) = zero_values.iter().find(|(_, is_zero)| *is_zero) {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        let azure = &self.azure;
        Ok(BackendSettings {
            subscription_id: required("azure.subscription_id", &azure.subscription_id)?,
            tenant_id: required("azure.tenant_id", &azure.tenant_id)?,
            resource_group_name: required("azure.resource_group_name", &azure.resource_group_name)?,
            resource_group_location: required(
                "azure.resource_group_location",
                &azure.resource_group_location,
            )?,
            storage_account_name: required(
                "azure.storage_account_name",
                &azure.storage_account_name,
            )?,
            storage_account_container: required(
                "azure.storage_account_container",
                &azure.storage_account_container,
            )?,
            keyvault_name: required("azure.keyvault_name", &azure.keyvault_name)?,
            lock_name: required("azure.lock_name", &azure.lock_name)?,
        })
    }

    /// The run deadline, if one is configured.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }
}

fn required(key: &str, value: &Option<String>) -> Result<String, ConfigError> {
    match value.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(ConfigError::MissingRequired {
            key: key.to_string(),
        }),
    }
}

/// Load configuration from the Azure environment defaults, the optional file,
/// the `TFP__` environment and the flags.
///
/// # Errors
/// - `ConfigError::FileNotFound` if an explicit file does not exist
/// - `ConfigError::InvalidFormat` if a source cannot be parsed or coerced
pub fn load_configuration(
    config_path: Option<&Path>,
    args: &AzureArgs,
) -> Result<TfPrepareConfig, ConfigError> {
    let mut builder = config::Config::builder();

    for (variable, key) in AZURE_ENV_DEFAULTS {
        if let Ok(value) = std::env::var(variable) {
            debug!(variable, key, "Using environment default");
            builder = builder.set_default(key, value)?;
        }
    }

    if let Some(path) = config_path {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        info!(path = %path.display(), "Loading configuration file");
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let mut loaded: TfPrepareConfig = builder
        .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?
        .try_deserialize()?;

    loaded.apply_overrides(args);
    debug!(config = ?loaded, "Resolved configuration");
    Ok(loaded)
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
