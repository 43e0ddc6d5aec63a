//! # tf-prepare CLI
//!
//! Command-line interface that prepares the Azure resources behind a
//! Terraform `azurerm` state backend.
//!
//! This module provides CLI commands for:
//! - Creating the resource group, storage account, blob container, key vault,
//!   key vault access policy and delete locks (`tf-prepare azure`)
//! - Generating shell completions (`tf-prepare completions <shell>`)

use clap::{Args, CommandFactory, Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tf_prepare_core::adapters::{ArmClient, GraphIdentityResolver};
use tf_prepare_core::{
    ApiError, CredentialProvider, EnsureOutcome, ProvisionError, Provisioner, ResourceLockTarget,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod settings;

pub use settings::{load_configuration, AzureSettings, BackendSettings, TfPrepareConfig};

// ============================================================================
// CLI Structure
// ============================================================================

/// tf-prepare - Terraform state backend bootstrap
#[derive(Parser)]
#[command(name = "tf-prepare")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Prepare the cloud resources behind a Terraform state backend")]
#[command(
    long_about = "tf-prepare creates the resource group, storage account, blob container and key vault \
                  that back a Terraform remote state, grants the caller key permissions on the vault \
                  and protects the storage account and vault with CanNotDelete locks. \
                  Every step is skipped when the resource already exists."
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "TF_PREPARE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level (overridden by RUST_LOG)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Ensure the Azure backend resources exist
    Azure(AzureArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Flags of the `azure` command. Each one overrides the matching
/// configuration key.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct AzureArgs {
    /// Subscription that holds the backend resources
    #[arg(long)]
    pub subscription_id: Option<String>,

    /// Tenant of the subscription and the calling principal
    #[arg(long)]
    pub tenant_id: Option<String>,

    /// Resource group name
    #[arg(long)]
    pub resource_group_name: Option<String>,

    /// Location used for the resource group, storage account and key vault
    #[arg(long)]
    pub resource_group_location: Option<String>,

    /// Storage account name
    #[arg(long)]
    pub storage_account_name: Option<String>,

    /// Blob container that will hold the state files
    #[arg(long)]
    pub storage_account_container: Option<String>,

    /// Key vault name
    #[arg(long)]
    pub keyvault_name: Option<String>,

    /// Name of the delete locks on the storage account and key vault
    #[arg(long)]
    pub lock_name: Option<String>,

    /// Abort the run after this many seconds
    #[arg(long)]
    pub timeout_seconds: Option<u64>,
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    #[error("Client setup failed: {0}")]
    Client(#[from] ApiError),

    #[error("Timed out after {seconds}s during {operation}")]
    TimedOut {
        seconds: u64,
        operation: &'static str,
    },

    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Provision(_) => 2,
            Self::Client(_) => 3,
            Self::TimedOut { .. } => 4,
            Self::CommandFailed { .. } => 5,
            Self::InvalidArgument { .. } => 6,
            Self::Io(_) => 7,
        }
    }
}

/// Configuration-related errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Invalid configuration format: {0}")]
    InvalidFormat(#[from] config::ConfigError),

    #[error("Missing required configuration: {key}")]
    MissingRequired { key: String },

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

// ============================================================================
// Bootstrap
// ============================================================================

/// Outcome of one step of a bootstrap run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub step: &'static str,
    pub outcome: EnsureOutcome,
}

/// Outcomes of a bootstrap run, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub steps: Vec<StepOutcome>,
}

impl BootstrapReport {
    fn record(&mut self, step: &'static str, outcome: EnsureOutcome) {
        self.steps.push(StepOutcome { step, outcome });
    }

    /// Number of steps that created something.
    pub fn created(&self) -> usize {
        self.steps.iter().filter(|s| s.outcome.was_created()).count()
    }
}

/// Run every ensure operation for the backend in dependency order. Stops at
/// the first failure.
pub async fn bootstrap(
    provisioner: &Provisioner,
    settings: &BackendSettings,
    cancel: &CancellationToken,
) -> Result<BootstrapReport, ProvisionError> {
    let s = settings;
    let mut report = BootstrapReport::default();

    let outcome = provisioner
        .ensure_resource_group(
            cancel,
            &s.resource_group_name,
            &s.resource_group_location,
            &s.subscription_id,
        )
        .await?;
    report.record("resource_group", outcome);

    let outcome = provisioner
        .ensure_storage_account(
            cancel,
            &s.resource_group_name,
            &s.resource_group_location,
            &s.storage_account_name,
            &s.subscription_id,
        )
        .await?;
    report.record("storage_account", outcome);

    let outcome = provisioner
        .ensure_storage_container(
            cancel,
            &s.resource_group_name,
            &s.storage_account_name,
            &s.storage_account_container,
            &s.subscription_id,
        )
        .await?;
    report.record("storage_container", outcome);

    let outcome = provisioner
        .ensure_key_vault(
            cancel,
            &s.resource_group_name,
            &s.resource_group_location,
            &s.keyvault_name,
            &s.subscription_id,
            &s.tenant_id,
        )
        .await?;
    report.record("key_vault", outcome);

    let outcome = provisioner
        .ensure_key_vault_access_policy(
            cancel,
            &s.resource_group_name,
            &s.resource_group_location,
            &s.keyvault_name,
            &s.subscription_id,
            &s.tenant_id,
        )
        .await?;
    report.record("key_vault_access_policy", outcome);

    let target = ResourceLockTarget::storage_account(&s.resource_group_name, &s.storage_account_name);
    let outcome = provisioner
        .ensure_resource_lock(cancel, &target, &s.lock_name, &s.subscription_id)
        .await?;
    report.record("storage_account_lock", outcome);

    let target = ResourceLockTarget::key_vault(&s.resource_group_name, &s.keyvault_name);
    let outcome = provisioner
        .ensure_resource_lock(cancel, &target, &s.lock_name, &s.subscription_id)
        .await?;
    report.record("key_vault_lock", outcome);

    Ok(report)
}

/// Why a run was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Timeout(Duration),
    Interrupted,
}

/// Cancel `cancel` when the deadline passes or Ctrl-C is pressed.
pub async fn watch_for_cancellation(
    cancel: CancellationToken,
    deadline: Option<Duration>,
) -> CancelReason {
    let timeout = async {
        match deadline {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };

    let reason = tokio::select! {
        _ = timeout => CancelReason::Timeout(deadline.unwrap_or_default()),
        _ = wait_for_interrupt() => CancelReason::Interrupted,
    };

    warn!(reason = ?reason, "Cancelling provisioning");
    cancel.cancel();
    reason
}

async fn wait_for_interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Unable to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Run [`bootstrap`] under the configured deadline and Ctrl-C handling.
pub async fn run_bootstrap(
    provisioner: &Provisioner,
    settings: &BackendSettings,
    deadline: Option<Duration>,
) -> Result<BootstrapReport, CliError> {
    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(watch_for_cancellation(cancel.clone(), deadline));

    let result = bootstrap(provisioner, settings, &cancel).await;

    // Only the watcher cancels this token, so a cancelled run means it has fired.
    let reason = match &result {
        Err(ProvisionError::Cancelled { .. }) => watcher.await.ok(),
        _ => {
            watcher.abort();
            None
        }
    };

    match (result, reason) {
        (Ok(report), _) => Ok(report),
        (Err(ProvisionError::Cancelled { operation }), Some(CancelReason::Timeout(limit))) => {
            Err(CliError::TimedOut {
                seconds: limit.as_secs(),
                operation,
            })
        }
        (Err(e), _) => Err(e.into()),
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli)?;

    match cli.command {
        Commands::Azure(args) => execute_azure_command(cli.config.as_deref(), &args).await,
        Commands::Completions { shell } => {
            execute_completions_command(shell, &mut std::io::stdout())
        }
    }
}

/// Initialize logging based on CLI arguments. Logs go to stderr so that
/// completion scripts on stdout stay clean.
fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&cli.log_level).map_err(|e| CliError::InvalidArgument {
            arg: "--log-level".to_string(),
            message: e.to_string(),
        })?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = if cli.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::CommandFailed {
        message: format!("Failed to initialize logging: {}", e),
    })
}

#[cfg(feature = "azure")]
fn build_credential() -> Result<Arc<dyn CredentialProvider>, CliError> {
    Ok(Arc::new(
        tf_prepare_core::DefaultAzureCredentialProvider::new()?,
    ))
}

#[cfg(not(feature = "azure"))]
fn build_credential() -> Result<Arc<dyn CredentialProvider>, CliError> {
    Ok(Arc::new(tf_prepare_core::AzureCliCredential::new()))
}

/// Execute the azure command
async fn execute_azure_command(
    config_path: Option<&std::path::Path>,
    args: &AzureArgs,
) -> Result<(), CliError> {
    let config = load_configuration(config_path, args)?;
    let settings = config.validate()?;

    info!(
        subscription_id = %settings.subscription_id,
        resource_group = %settings.resource_group_name,
        storage_account = %settings.storage_account_name,
        key_vault = %settings.keyvault_name,
        "Preparing Terraform backend"
    );

    let credential = build_credential()?;
    let api = ArmClient::new(credential.clone(), config.client.clone())?
        .with_tenant(&settings.tenant_id);
    let identity = GraphIdentityResolver::new(credential, &config.client)?;
    let provisioner =
        Provisioner::with_config(Arc::new(api), Arc::new(identity), config.provisioner.clone());

    match run_bootstrap(&provisioner, &settings, config.timeout()).await {
        Ok(report) => {
            info!(
                steps = report.steps.len(),
                created = report.created(),
                "Terraform backend is ready"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Terraform backend preparation failed");
            Err(e)
        }
    }
}

/// Execute completions command
fn execute_completions_command(
    shell: clap_complete::Shell,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    let mut command = Cli::command();
    let name = command.get_name().to_string();
    clap_complete::generate(shell, &mut command, name, out);
    out.flush()?;
    Ok(())
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
