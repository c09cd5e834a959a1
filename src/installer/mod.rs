//! Installer Contract & Registry (C4): a polymorphic install/uninstall/images
//! interface per add-on, backed by the Helm-chart abstraction in [`crate::helm`].
//!
//! Modeled as "a record of function values" (§9 design note) rather than an
//! inheritance hierarchy: [`InstallerFactories`] holds named constructors, and
//! tests inject alternate factories instead of subclassing.

mod cert_manager;
mod cni;
mod csi;
mod gitops;
mod load_balancer;
mod metrics_server;
mod policy_engine;

pub use cert_manager::CertManagerInstaller;
pub use cni::CiliumInstaller;
pub use csi::{HetznerCsiInstaller, LocalPathProvisionerInstaller};
pub use gitops::{ensure_gitops_resources, ArgoCdInstaller, FluxInstaller};
pub use load_balancer::MetalLbInstaller;
pub use metrics_server::MetricsServerInstaller;
pub use policy_engine::{GatekeeperInstaller, KyvernoInstaller};

use crate::context::CreationContext;
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Installer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Install-or-upgrade; never install-only. Errors propagate.
    async fn install(&self, ctx: &CreationContext) -> Result<()>;

    /// Best-effort: must not fail if the release is already absent.
    async fn uninstall(&self, ctx: &CreationContext) -> Result<()>;

    /// Distinct container images the chart references, for pre-pull/cache usage.
    async fn images(&self, ctx: &CreationContext) -> Result<Vec<String>>;
}

/// Named constructors for every installable add-on, resolved from a frozen
/// `ClusterSpec`. Using function values instead of a trait hierarchy means
/// tests can swap in a fake factory without a parallel mock type per installer.
pub struct InstallerFactories {
    pub cni: fn(&CreationContext) -> Option<Box<dyn Installer>>,
    pub metrics_server: fn(&CreationContext) -> Option<Box<dyn Installer>>,
    pub csi: fn(&CreationContext) -> Option<Box<dyn Installer>>,
    pub cert_manager: fn(&CreationContext) -> Option<Box<dyn Installer>>,
    pub load_balancer: fn(&CreationContext) -> Option<Box<dyn Installer>>,
    pub policy_engine: fn(&CreationContext) -> Option<Box<dyn Installer>>,
    pub git_ops_engine: fn(&CreationContext) -> Option<Box<dyn Installer>>,
}

impl InstallerFactories {
    pub fn production() -> Self {
        Self {
            cni: default_cni,
            metrics_server: default_metrics_server,
            csi: default_csi,
            cert_manager: default_cert_manager,
            load_balancer: default_load_balancer,
            policy_engine: default_policy_engine,
            git_ops_engine: default_git_ops_engine,
        }
    }

    /// Every non-`None` installer this spec needs *other than CNI*, in an
    /// unspecified order — the orchestrator's stage 9 runs them concurrently.
    /// CNI is installed separately and blocking, in stage 8, before this is
    /// ever called; it must never appear here too.
    pub fn resolve_post_cni(&self, ctx: &CreationContext) -> Vec<Box<dyn Installer>> {
        [
            (self.metrics_server)(ctx),
            (self.csi)(ctx),
            (self.cert_manager)(ctx),
            (self.load_balancer)(ctx),
            (self.policy_engine)(ctx),
            (self.git_ops_engine)(ctx),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

impl Default for InstallerFactories {
    fn default() -> Self {
        Self::production()
    }
}

fn default_cni(ctx: &CreationContext) -> Option<Box<dyn Installer>> {
    use crate::spec::CniResolved;
    match ctx.spec.cni.effective() {
        CniResolved::Cilium => Some(Box::new(CiliumInstaller)),
        CniResolved::Bundled | CniResolved::None => None,
    }
}

fn default_metrics_server(ctx: &CreationContext) -> Option<Box<dyn Installer>> {
    if ctx.spec.metrics_server.effective(true) {
        Some(Box::new(MetricsServerInstaller))
    } else {
        None
    }
}

fn default_csi(ctx: &CreationContext) -> Option<Box<dyn Installer>> {
    use crate::spec::CsiResolved;
    match ctx.spec.csi.effective(ctx.spec.distribution, ctx.spec.provider) {
        CsiResolved::LocalPathStorage => Some(Box::new(LocalPathProvisionerInstaller)),
        CsiResolved::HetznerCSI => Some(Box::new(HetznerCsiInstaller)),
        CsiResolved::Disabled => None,
    }
}

fn default_cert_manager(ctx: &CreationContext) -> Option<Box<dyn Installer>> {
    if ctx.spec.cert_manager.effective(false) {
        Some(Box::new(CertManagerInstaller))
    } else {
        None
    }
}

fn default_load_balancer(ctx: &CreationContext) -> Option<Box<dyn Installer>> {
    use crate::spec::Distribution;
    if matches!(ctx.spec.distribution, Distribution::VCluster) {
        // Delegated to the host cluster; see diff engine's VCluster special case.
        return None;
    }
    if ctx.spec.load_balancer.effective(true) {
        Some(Box::new(MetalLbInstaller))
    } else {
        None
    }
}

fn default_policy_engine(ctx: &CreationContext) -> Option<Box<dyn Installer>> {
    use crate::spec::PolicyEngine;
    match ctx.spec.policy_engine {
        PolicyEngine::None => None,
        PolicyEngine::Kyverno => Some(Box::new(KyvernoInstaller)),
        PolicyEngine::Gatekeeper => Some(Box::new(GatekeeperInstaller)),
    }
}

fn default_git_ops_engine(ctx: &CreationContext) -> Option<Box<dyn Installer>> {
    use crate::spec::GitOpsEngine;
    match ctx.spec.git_ops_engine {
        GitOpsEngine::None => None,
        GitOpsEngine::Flux => Some(Box::new(FluxInstaller)),
        GitOpsEngine::ArgoCD => Some(Box::new(ArgoCdInstaller)),
    }
}
