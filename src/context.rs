//! `CreationContext`: the stage-to-stage carrier threaded through the
//! Creation Orchestrator (C8) and handed to every installer and provisioner.

use crate::docker::DockerManager;
use crate::helm::HelmClient;
use crate::k8s::K8sClient;
use crate::progress::Progress;
use crate::spec::ClusterSpec;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Per-distribution native config, built by stage 2 (`Apply distribution-level
/// patches`) before cluster create. Only one variant is populated, matching
/// the spec's frozen `ClusterSpec.distribution`.
#[derive(Debug, Clone, Default)]
pub struct DistributionConfig {
    /// K3d CLI arguments appended for `--disable=...` flags.
    pub k3d_extra_args: Vec<String>,
    /// `registries.yaml` content for `k3d cluster create --registry-config`,
    /// mapping each mirror host to its `<host>-mirror` container endpoint.
    pub k3d_registries_yaml: Option<String>,
    /// Talos machine-config patch documents, partitioned by scope.
    pub talos_patches: TalosPatches,
    /// Kind containerd registry-mirror config files to bake into node images.
    pub kind_mirror_files: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct TalosPatches {
    pub cluster: Vec<String>,
    pub control_planes: Vec<String>,
    pub workers: Vec<String>,
}

/// References and lazily-constructed clients shared by every stage of one
/// creation/update run. Cheap to clone: clients are behind `Arc`/interior
/// mutability where they need to be reused across concurrent installer tasks.
#[derive(Clone)]
pub struct CreationContext {
    pub spec: Arc<ClusterSpec>,
    pub cluster_name: String,
    pub distribution_config: DistributionConfig,
    pub progress: Progress,
    pub cancellation: CancellationToken,
    pub docker: Arc<DockerManager>,
    pub kubeconfig_path: std::path::PathBuf,
}

impl CreationContext {
    /// A fresh `K8sClient` per call: each stage acquires and releases its own,
    /// per the "scoped acquisition" design note, rather than sharing one
    /// mutable client across concurrent installer tasks.
    pub fn k8s_client(&self) -> K8sClient {
        K8sClient::new(Some(self.kubeconfig_path.clone()), self.spec_context())
    }

    pub fn helm_client(&self) -> HelmClient {
        HelmClient::new(self.kubeconfig_path.clone(), self.spec_context())
    }

    fn spec_context(&self) -> Option<String> {
        self.spec.connection.context.clone()
    }

    pub fn helm_timeout(&self, distribution_default: Duration) -> Duration {
        let user = Duration::from_secs(self.spec.connection.timeout_secs);
        user.max(distribution_default)
    }

    /// Derives a child context carrying the same cancellation parentage, so
    /// cancelling the outer context cancels every stage-9 installer task.
    pub fn child_cancellation(&self) -> CancellationToken {
        self.cancellation.child_token()
    }
}
