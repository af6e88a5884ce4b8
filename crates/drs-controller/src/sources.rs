//! Inputs read by the tick: snapshots, rules, and settings.
//!
//! Each input sits behind an async trait so the daemon can read from
//! disk while tests and embedders feed values from memory.
//!
//! File layout used by [`FileSource`]:
//!
//! ```text
//! <data_dir>/<cluster>/snapshot.json   ClusterSnapshot (required)
//! <data_dir>/<cluster>/rules.json      [AffinityRule]  (optional, default none)
//! <data_dir>/<cluster>/settings.toml   DrsSettings     (optional, default values)
//! ```

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use drs_core::{AffinityRule, ClusterId, ClusterSnapshot, CoreError, DrsSettings, validate_rules};

/// Errors raised while reading an input.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("no data for cluster {0}")]
    Unavailable(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("snapshot is for cluster {found}, expected {expected}")]
    ClusterMismatch { expected: String, found: String },

    #[error(transparent)]
    Invalid(#[from] CoreError),
}

pub type SourceResult<T> = Result<T, SourceError>;

/// Periodic resource snapshot feed.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self, cluster_id: &str) -> SourceResult<ClusterSnapshot>;
}

/// Affinity / anti-affinity rule set.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn rules(&self, cluster_id: &str) -> SourceResult<Vec<AffinityRule>>;
}

/// Per-cluster scheduler settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn settings(&self, cluster_id: &str) -> SourceResult<DrsSettings>;
}

// ── File-backed ──────────────────────────────────────────────────

/// Reads every input from a per-cluster directory.
#[derive(Debug, Clone)]
pub struct FileSource {
    data_dir: PathBuf,
}

const SETTINGS_TEMPLATE: &str = r#"# DRS settings for this cluster. Re-read on every tick.

# manual | partial | automatic
mode = "manual"
imbalance_threshold = 70.0
max_concurrent_migrations = 2
min_improvement_pct = 5.0
tick_interval_secs = 300
max_recommendations = 16
drain_maintenance = true
should_penalty = 5.0

[scoring]
cpu_weight = 1.0
mem_weight = 1.0
max_deviation_pct = 25.0
"#;

impl FileSource {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn cluster_dir(&self, cluster_id: &str) -> PathBuf {
        self.data_dir.join(cluster_id)
    }

    /// Create the cluster directory with a default settings file and an
    /// empty rule set. Existing files are left alone.
    pub fn scaffold_cluster(&self, cluster_id: &str) -> std::io::Result<PathBuf> {
        let dir = self.cluster_dir(cluster_id);
        std::fs::create_dir_all(&dir)?;
        for (name, contents) in [("settings.toml", SETTINGS_TEMPLATE), ("rules.json", "[]\n")] {
            let path = dir.join(name);
            if !path.exists() {
                std::fs::write(&path, contents)?;
            }
        }
        Ok(dir)
    }

    /// Read a file, mapping "not found" to `None`.
    async fn read_optional(path: &Path) -> SourceResult<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SourceError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

#[async_trait]
impl SnapshotSource for FileSource {
    async fn fetch(&self, cluster_id: &str) -> SourceResult<ClusterSnapshot> {
        let path = self.cluster_dir(cluster_id).join("snapshot.json");
        let Some(raw) = Self::read_optional(&path).await? else {
            return Err(SourceError::Unavailable(cluster_id.to_string()));
        };
        let parsed: ClusterSnapshot = serde_json::from_str(&raw).map_err(|e| SourceError::Parse {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        if parsed.cluster_id != cluster_id {
            return Err(SourceError::ClusterMismatch {
                expected: cluster_id.to_string(),
                found: parsed.cluster_id,
            });
        }
        debug!(cluster = %cluster_id, path = ?path, nodes = parsed.nodes.len(), "snapshot read");
        // The summary on disk is never trusted.
        Ok(ClusterSnapshot::new(
            parsed.cluster_id,
            parsed.captured_at,
            parsed.nodes,
            parsed.workloads,
        ))
    }
}

#[async_trait]
impl RuleStore for FileSource {
    async fn rules(&self, cluster_id: &str) -> SourceResult<Vec<AffinityRule>> {
        let path = self.cluster_dir(cluster_id).join("rules.json");
        let Some(raw) = Self::read_optional(&path).await? else {
            return Ok(Vec::new());
        };
        let rules: Vec<AffinityRule> = serde_json::from_str(&raw).map_err(|e| SourceError::Parse {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        validate_rules(&rules)?;
        Ok(rules)
    }
}

#[async_trait]
impl SettingsStore for FileSource {
    async fn settings(&self, cluster_id: &str) -> SourceResult<DrsSettings> {
        let path = self.cluster_dir(cluster_id).join("settings.toml");
        let Some(raw) = Self::read_optional(&path).await? else {
            return Ok(DrsSettings::default());
        };
        let settings: DrsSettings = toml::from_str(&raw).map_err(|e| SourceError::Parse {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        settings.validate()?;
        Ok(settings)
    }
}

// ── In-memory ────────────────────────────────────────────────────

/// All three inputs held in memory, for tests and embedding.
///
/// A cluster without a snapshot fails to fetch; missing rules and
/// settings fall back to none and defaults.
#[derive(Default)]
pub struct MemorySource {
    snapshots: RwLock<HashMap<ClusterId, ClusterSnapshot>>,
    rules: RwLock<HashMap<ClusterId, Vec<AffinityRule>>>,
    settings: RwLock<HashMap<ClusterId, DrsSettings>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_snapshot(&self, snapshot: ClusterSnapshot) {
        self.snapshots
            .write()
            .await
            .insert(snapshot.cluster_id.clone(), snapshot);
    }

    /// Make the next fetches fail until a snapshot is set again.
    pub async fn remove_snapshot(&self, cluster_id: &str) {
        self.snapshots.write().await.remove(cluster_id);
    }

    pub async fn set_rules(&self, cluster_id: &str, rules: Vec<AffinityRule>) {
        self.rules.write().await.insert(cluster_id.to_string(), rules);
    }

    pub async fn set_settings(&self, cluster_id: &str, settings: DrsSettings) {
        self.settings
            .write()
            .await
            .insert(cluster_id.to_string(), settings);
    }
}

#[async_trait]
impl SnapshotSource for MemorySource {
    async fn fetch(&self, cluster_id: &str) -> SourceResult<ClusterSnapshot> {
        self.snapshots
            .read()
            .await
            .get(cluster_id)
            .cloned()
            .ok_or_else(|| SourceError::Unavailable(cluster_id.to_string()))
    }
}

#[async_trait]
impl RuleStore for MemorySource {
    async fn rules(&self, cluster_id: &str) -> SourceResult<Vec<AffinityRule>> {
        let rules = self.rules.read().await.get(cluster_id).cloned().unwrap_or_default();
        validate_rules(&rules)?;
        Ok(rules)
    }
}

#[async_trait]
impl SettingsStore for MemorySource {
    async fn settings(&self, cluster_id: &str) -> SourceResult<DrsSettings> {
        let settings = self
            .settings
            .read()
            .await
            .get(cluster_id)
            .cloned()
            .unwrap_or_default();
        settings.validate()?;
        Ok(settings)
    }
}
