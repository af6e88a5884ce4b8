//! drsd.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub daemon: DaemonSection,
    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSection {
    pub port: Option<u16>,
    /// Directory holding `<cluster>/snapshot.json`, `rules.json`, `settings.toml`.
    pub data_dir: PathBuf,
    pub poll_interval_ms: Option<u64>,
    pub job_timeout_secs: Option<u64>,
    pub max_attempts: Option<u32>,
    /// Polls before a dry-run migration reports success.
    pub dry_run_polls: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub id: String,
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a minimal drsd.toml for the given clusters.
    pub fn scaffold(data_dir: &Path, clusters: &[String]) -> Self {
        DaemonConfig {
            daemon: DaemonSection {
                port: Some(8450),
                data_dir: data_dir.to_path_buf(),
                poll_interval_ms: Some(2_000),
                job_timeout_secs: Some(600),
                max_attempts: Some(2),
                dry_run_polls: Some(3),
            },
            clusters: clusters
                .iter()
                .map(|id| ClusterConfig { id: id.clone() })
                .collect(),
        }
    }
}
