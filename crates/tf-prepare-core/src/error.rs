//! Error types for provisioning operations.
//!
//! Provider failures are captured as [`ApiError`] with the structured ARM
//! status and error code preserved, so that "not found" conditions can be
//! recognised without relying on message text. [`ProvisionError`] is what the
//! ensure operations return to their caller.

use std::fmt;
use thiserror::Error;

/// Errors returned by a management-plane or identity call.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The provider answered with a non-success HTTP status.
    #[error("HTTP {status} {code}: {message}")]
    Http {
        status: u16,
        code: String,
        message: String,
    },

    /// The request never produced a response (DNS, TLS, timeout, ...).
    #[error("Network error: {0}")]
    Network(String),

    /// A bearer credential could not be acquired.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The provider answered successfully but the body could not be understood.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The client itself is misconfigured.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Placeholder code used when the provider did not include one.
pub const UNKNOWN_ERROR_CODE: &str = "Unknown";

impl ApiError {
    /// Build an HTTP error from a status and the provider's error code/message.
    pub fn http(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    /// HTTP status of the failed call, if the provider answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Provider error code, if one was supplied.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Http { code, .. } if !code.is_empty() && code != UNKNOWN_ERROR_CODE => {
                Some(code.as_str())
            }
            _ => None,
        }
    }

    /// Check whether this error is the "resource does not exist" signal
    /// described by `marker`.
    ///
    /// Only a 404 response qualifies. When the provider supplied an error code
    /// it must equal the marker code (ASCII case-insensitive). The message
    /// fragment is consulted only when no code is present, as a compatibility
    /// shim for endpoints that return bare text.
    pub fn is_not_found(&self, marker: &NotFoundMarker) -> bool {
        let Self::Http {
            status, message, ..
        } = self
        else {
            return false;
        };

        if *status != 404 {
            return false;
        }

        match self.code() {
            Some(code) => code.eq_ignore_ascii_case(marker.code),
            None => message.contains(marker.message_fragment),
        }
    }
}

/// Describes how a provider reports that a specific kind of resource is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotFoundMarker {
    /// Structured ARM error code.
    pub code: &'static str,
    /// Message text used when the response carries no code.
    pub message_fragment: &'static str,
}

/// Storage accounts and key vaults.
pub const RESOURCE_NOT_FOUND: NotFoundMarker = NotFoundMarker {
    code: "ResourceNotFound",
    message_fragment: "ResourceNotFound",
};

/// Blob containers.
pub const CONTAINER_NOT_FOUND: NotFoundMarker = NotFoundMarker {
    code: "ContainerNotFound",
    message_fragment: "The specified container does not exist",
};

/// Management locks.
pub const LOCK_NOT_FOUND: NotFoundMarker = NotFoundMarker {
    code: "LockNotFound",
    message_fragment: "LockNotFound",
};

/// The six resource kinds this crate provisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    ResourceGroup,
    StorageAccount,
    StorageContainer,
    KeyVault,
    KeyVaultAccessPolicy,
    ResourceLock,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ResourceGroup => "Azure Resource Group",
            Self::StorageAccount => "Azure Storage Account",
            Self::StorageContainer => "Azure Storage Account Container",
            Self::KeyVault => "Azure KeyVault",
            Self::KeyVaultAccessPolicy => "Azure KeyVault Access Policy",
            Self::ResourceLock => "Azure Resource Lock",
        };
        f.write_str(name)
    }
}

/// Failure of an ensure operation.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A provider call failed with an error that is not a "not found" signal.
    #[error("{operation}: {source}")]
    Api {
        operation: &'static str,
        #[source]
        source: ApiError,
    },

    /// The name-availability check rejected the requested name.
    #[error("{kind} name '{name}' is not available: {reason}")]
    NameUnavailable {
        kind: ResourceKind,
        name: String,
        reason: String,
    },

    /// An asynchronous provider operation reached a non-success terminal state.
    #[error("{operation} finished with status {status}: {message}")]
    OperationFailed {
        operation: &'static str,
        status: String,
        message: String,
    },

    /// Looking up an existing key vault failed for a reason other than absence.
    #[error("Failed Azure/EnsureKeyVault/get '{vault_name}': {source}")]
    KeyVaultLookup {
        vault_name: String,
        #[source]
        source: ApiError,
    },

    /// The calling principal's object id could not be resolved.
    #[error("identity resolution failed: {0}")]
    Identity(#[source] ApiError),

    /// The caller's cancellation token fired before the operation finished.
    #[error("{operation} cancelled")]
    Cancelled { operation: &'static str },
}

impl ProvisionError {
    /// Tag of the provider call that failed, as used in log events.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Api { operation, .. } => *operation,
            Self::NameUnavailable { .. } => "check_name_availability",
            Self::OperationFailed { operation, .. } => *operation,
            Self::KeyVaultLookup { .. } => "get_key_vault",
            Self::Identity(_) => "current_object_id",
            Self::Cancelled { operation } => *operation,
        }
    }

    /// The underlying provider error, when there is one.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api { source, .. } => Some(source),
            Self::KeyVaultLookup { source, .. } => Some(source),
            Self::Identity(source) => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
