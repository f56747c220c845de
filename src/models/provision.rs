//! Tenant metadata records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status stored in the `provisioned_dbs` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionStatus {
    Active,
    /// Database exists but failed post-creation setup.
    Error,
    /// Logically deleted; the row is kept.
    Deleted,
}

impl ProvisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Error => "error",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ProvisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProvisionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "error" => Ok(Self::Error),
            "deleted" => Ok(Self::Deleted),
            other => Err(format!("unknown provision status '{}'", other)),
        }
    }
}

/// How the tenant database is hosted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionMode {
    /// Database and role live on the shared admin cluster.
    #[default]
    Managed,
}

impl ProvisionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Managed => "managed",
        }
    }
}

impl fmt::Display for ProvisionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the external tenant metadata table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionedDatabase {
    pub id: i64,
    pub session_id: Option<String>,
    pub db_name: String,
    pub db_role: String,
    pub mode: String,
    pub status: ProvisionStatus,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
}

/// Data written when a tenant database has just been created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProvisionRecord {
    pub session_id: Option<String>,
    pub db_name: String,
    pub db_role: String,
    pub mode: ProvisionMode,
}

/// How a deprovision request names its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordLookup {
    DbName(String),
    Id(i64),
}

impl fmt::Display for RecordLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DbName(name) => write!(f, "db_name={}", name),
            Self::Id(id) => write!(f, "id={}", id),
        }
    }
}
