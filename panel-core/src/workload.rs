//! Managed workloads (containers) as seen by the backup subsystem.
//!
//! The runtime control plane lives outside this crate; the orchestrator only
//! needs to resolve a workload to its runtime identifier and enumerate the
//! ones worth backing up.

use crate::utils::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkloadStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Dead,
    Error,
}

impl WorkloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Restarting => "RESTARTING",
            Self::Exited => "EXITED",
            Self::Dead => "DEAD",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREATED" => Ok(Self::Created),
            "RUNNING" => Ok(Self::Running),
            "PAUSED" => Ok(Self::Paused),
            "RESTARTING" => Ok(Self::Restarting),
            "EXITED" | "STOPPED" => Ok(Self::Exited),
            "DEAD" => Ok(Self::Dead),
            "ERROR" => Ok(Self::Error),
            other => Err(format!("unknown workload status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub id: String,
    pub name: String,
    /// Identifier understood by the container runtime (e.g. a docker id)
    pub runtime_id: String,
    pub status: WorkloadStatus,
}

impl Workload {
    /// Workloads in an active, created or paused state are included in full backups.
    pub fn is_backupable(&self) -> bool {
        matches!(
            self.status,
            WorkloadStatus::Running | WorkloadStatus::Created | WorkloadStatus::Paused
        )
    }
}

#[async_trait]
pub trait WorkloadInventory: Send + Sync {
    async fn get(&self, workload_id: &str) -> Result<Option<Workload>>;

    async fn list(&self) -> Result<Vec<Workload>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workload(status: WorkloadStatus) -> Workload {
        Workload {
            id: "w1".into(),
            name: "web".into(),
            runtime_id: "abc123".into(),
            status,
        }
    }

    #[test]
    fn test_backupable_states() {
        assert!(workload(WorkloadStatus::Running).is_backupable());
        assert!(workload(WorkloadStatus::Created).is_backupable());
        assert!(workload(WorkloadStatus::Paused).is_backupable());
        assert!(!workload(WorkloadStatus::Exited).is_backupable());
        assert!(!workload(WorkloadStatus::Restarting).is_backupable());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("running".parse::<WorkloadStatus>(), Ok(WorkloadStatus::Running));
        assert_eq!("STOPPED".parse::<WorkloadStatus>(), Ok(WorkloadStatus::Exited));
        assert!("bogus".parse::<WorkloadStatus>().is_err());
    }
}
