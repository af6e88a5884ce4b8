//! Multi-cluster scheduler.
//!
//! Owns one `ClusterController` per configured cluster and runs each on
//! its own tokio task, so a cluster whose feed stalls or errors never
//! delays the others.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use drs_core::ClusterId;

use crate::cluster::{ClusterController, ClusterHandle, ClusterStatus};

/// The scheduler across all managed clusters. Cheap to clone.
#[derive(Clone, Default)]
pub struct Drs {
    controllers: BTreeMap<ClusterId, Arc<ClusterController>>,
}

impl Drs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a cluster. A controller with the same id is replaced.
    pub fn add_cluster(&mut self, controller: ClusterController) {
        let id = controller.cluster_id().to_string();
        info!(cluster = %id, "cluster registered");
        self.controllers.insert(id, Arc::new(controller));
    }

    /// Managed cluster ids, sorted.
    pub fn clusters(&self) -> Vec<ClusterId> {
        self.controllers.keys().cloned().collect()
    }

    pub fn cluster(&self, cluster_id: &str) -> Option<ClusterHandle> {
        self.controllers.get(cluster_id).map(|c| c.handle())
    }

    /// Status of every cluster, sorted by id.
    pub async fn statuses(&self) -> Vec<ClusterStatus> {
        let mut out = Vec::with_capacity(self.controllers.len());
        for controller in self.controllers.values() {
            out.push(controller.handle().status().await);
        }
        out
    }

    /// Start one control loop per cluster. Each loop exits when
    /// `shutdown` flips to `true`.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.controllers
            .values()
            .map(|controller| {
                let controller = Arc::clone(controller);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    controller.run(shutdown).await;
                })
            })
            .collect()
    }
}
