use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Database,
    Workload,
    Configuration,
    Full,
}

impl BackupKind {
    pub const ALL: [BackupKind; 4] = [
        BackupKind::Database,
        BackupKind::Workload,
        BackupKind::Configuration,
        BackupKind::Full,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Workload => "workload",
            Self::Configuration => "configuration",
            Self::Full => "full",
        }
    }

    /// Subdirectory of the backup root holding this kind.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Workload => "workloads",
            Self::Configuration => "config",
            Self::Full => "full",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Database => ".sql.gz",
            Self::Workload | Self::Configuration => ".tar.gz",
            Self::Full => ".json",
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "database" => Ok(Self::Database),
            "workload" | "container" => Ok(Self::Workload),
            "configuration" | "config" => Ok(Self::Configuration),
            "full" => Ok(Self::Full),
            other => Err(format!("unknown backup kind '{other}'")),
        }
    }
}

/// A backup artifact on disk. Records are rebuilt from the filesystem on
/// every listing; nothing else tracks them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    /// File name without its kind extension
    pub id: String,
    pub kind: BackupKind,
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupStats {
    pub total: usize,
    pub by_kind: BTreeMap<BackupKind, usize>,
    pub total_size_bytes: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

impl BackupStats {
    pub fn from_backups(backups: &[Backup]) -> Self {
        let mut stats = Self {
            total: backups.len(),
            ..Default::default()
        };
        for backup in backups {
            *stats.by_kind.entry(backup.kind).or_default() += 1;
            stats.total_size_bytes += backup.size_bytes;
        }
        stats.oldest = backups.iter().map(|b| b.created_at).min();
        stats.newest = backups.iter().map(|b| b.created_at).max();
        stats
    }
}

/// Outcome of a retention sweep. Failed deletions do not stop the sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionSweep {
    pub deleted: usize,
    pub failed: usize,
}
