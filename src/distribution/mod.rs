//! Distribution Provisioner (C5): a uniform create/delete/start/stop/list/exists
//! interface over heterogeneous cluster back-ends, plus the per-distribution
//! native-config patches applied before `create` (§4.5).

pub mod cli;
mod eks_anywhere;
mod kind;
mod k3s;
mod talos;
mod vcluster;

pub use eks_anywhere::EksAnywhereProvisioner;
pub use kind::KindProvisioner;
pub use k3s::K3dProvisioner;
pub use talos::TalosProvisioner;
pub use vcluster::VClusterProvisioner;

use crate::context::{CreationContext, DistributionConfig};
use crate::error::{Error, Result};
use crate::spec::{ClusterSpec, Distribution};
use async_trait::async_trait;

#[async_trait]
pub trait DistributionProvisioner: Send + Sync {
    fn distribution(&self) -> Distribution;

    async fn create(&self, ctx: &CreationContext) -> Result<()>;
    async fn delete(&self, cluster_name: &str) -> Result<()>;
    async fn start(&self, cluster_name: &str) -> Result<()>;
    async fn stop(&self, cluster_name: &str) -> Result<()>;
    async fn list(&self) -> Result<Vec<String>>;
    async fn exists(&self, cluster_name: &str) -> Result<bool>;

    /// Applies a `RebootRequired` change after every in-place change has
    /// succeeded (§4.7). The default of stop-then-start is correct for every
    /// distribution currently in the compatibility matrix; override only if
    /// a distribution ever needs a different reboot primitive.
    async fn reboot(&self, cluster_name: &str) -> Result<()> {
        self.stop(cluster_name).await?;
        self.start(cluster_name).await
    }

    /// Path on disk the provisioner writes a kubeconfig to once `create`
    /// succeeds; distribution-specific (e.g. `kind get kubeconfig`, k3d's own
    /// merge-into-`~/.kube/config` behavior, `talosctl kubeconfig`).
    fn kubeconfig_path(&self, cluster_name: &str) -> std::path::PathBuf;
}

/// Builds the one `DistributionProvisioner` matching `spec.distribution`.
pub fn provisioner_for(spec: &ClusterSpec) -> Box<dyn DistributionProvisioner> {
    match spec.distribution {
        Distribution::Vanilla => Box::new(KindProvisioner),
        Distribution::K3s => Box::new(K3dProvisioner),
        Distribution::Talos => Box::new(TalosProvisioner),
        Distribution::VCluster => Box::new(VClusterProvisioner),
        Distribution::EksAnywhere => Box::new(EksAnywhereProvisioner),
    }
}

/// Delegates to every candidate provisioner in a fixed order, routing to
/// whichever one's `exists` returns true. Used when the caller only has a
/// cluster name and no spec (e.g. `ksail delete <name>` looking up leftover
/// state after a config file changed distribution).
pub struct MultiProvisioner {
    candidates: Vec<Box<dyn DistributionProvisioner>>,
}

impl MultiProvisioner {
    pub fn new() -> Self {
        Self {
            candidates: vec![
                Box::new(KindProvisioner),
                Box::new(K3dProvisioner),
                Box::new(TalosProvisioner),
                Box::new(VClusterProvisioner),
                Box::new(EksAnywhereProvisioner),
            ],
        }
    }

    pub async fn find(&self, cluster_name: &str) -> Result<&dyn DistributionProvisioner> {
        for candidate in &self.candidates {
            if candidate.exists(cluster_name).await? {
                return Ok(candidate.as_ref());
            }
        }
        Err(Error::ClusterNotFound(cluster_name.to_string()))
    }
}

impl Default for MultiProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

/// Stage 2 (§4.8): computes distribution-specific config patches before
/// `create` is called, from the frozen spec alone.
pub fn prepare_distribution_config(spec: &ClusterSpec) -> DistributionConfig {
    match spec.distribution {
        Distribution::K3s => k3s::prepare(spec),
        Distribution::Vanilla => kind::prepare(spec),
        Distribution::Talos => talos::prepare(spec),
        Distribution::VCluster | Distribution::EksAnywhere => DistributionConfig::default(),
    }
}

/// Every distribution writes its kubeconfig to the same per-cluster path,
/// mirroring the state store's `~/.ksail/state` layout (C1).
pub fn default_kubeconfig_path(cluster_name: &str) -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".ksail")
        .join("kubeconfig")
        .join(format!("{cluster_name}.yaml"))
}
