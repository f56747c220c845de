//! Tenant database provisioning on a shared cluster.
//!
//! - `names`: generated database/role names, passwords and username rules
//! - `admin`: the [`ClusterAdmin`] seam and its PostgreSQL implementation
//! - `provisioner`: quota-checked provisioning with compensating cleanup
//! - `credentials`: username/password rotation for the active connection

pub mod admin;
pub mod credentials;
pub mod names;
pub mod provisioner;

pub use admin::{ClusterAdmin, PgClusterAdmin, QuotaUsage, RoleLimits, verify_connectivity};
pub use credentials::rotate_credentials;
pub use names::{TenantNames, generate_password, validate_username};
pub use provisioner::{ProvisionSettings, ProvisionStage, ProvisionedTenant, TenantProvisioner};
