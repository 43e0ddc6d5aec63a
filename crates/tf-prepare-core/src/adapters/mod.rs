//! # Adapters
//!
//! Implementations of the management and identity seams:
//!
//! - [`ArmClient`]: Azure Resource Manager REST API
//! - [`GraphIdentityResolver`]: Microsoft Graph `/me`
//! - [`InMemoryManagementApi`]: in-process stand-in for tests and dry runs

pub mod arm_client;
pub mod graph_identity;
pub mod memory_management;

pub use arm_client::{parse_arm_error, ArmClient};
pub use graph_identity::GraphIdentityResolver;
pub use memory_management::{ApiCallKind, InMemoryManagementApi};
