//! Creation Orchestrator (C8): the ten-stage pipeline that turns a
//! `ClusterSpec` into a running, add-on-equipped cluster (§4.8). Every other
//! module in this crate exists to be called from here in the right order.

use crate::context::CreationContext;
use crate::diff::{Change, UpdateResult};
use crate::distribution::{self, DistributionProvisioner};
use crate::docker::DockerManager;
use crate::error::{Error, Result};
use crate::installer::InstallerFactories;
use crate::progress::Progress;
use crate::readiness::{Check, ReadinessWaiter};
use crate::registry::RegistryProvisioner;
use crate::spec::ClusterSpec;
use crate::state::StateStore;
use crate::update::{prepare_update, UpdateOptions};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const CNI_READY_DEADLINE: Duration = Duration::from_secs(180);
const LOCAL_REGISTRY_READY_DEADLINE: Duration = Duration::from_secs(60);

pub struct Orchestrator {
    state: StateStore,
    installer_factories: InstallerFactories,
}

impl Orchestrator {
    pub fn new(state: StateStore) -> Self {
        Self {
            state,
            installer_factories: InstallerFactories::production(),
        }
    }

    /// Overrides the production installer factories; used by tests that need
    /// to substitute a fake installer for one add-on without touching the rest.
    pub fn with_installer_factories(mut self, factories: InstallerFactories) -> Self {
        self.installer_factories = factories;
        self
    }

    /// Runs every stage of §4.8 against `spec`, aborting on the first failure
    /// with a [`Error::StageFailed`] wrapping the stage name and cause.
    /// Partial state left behind by an aborted run is intentional: re-running
    /// `create` against the same spec must be idempotent.
    pub async fn create(&self, spec: ClusterSpec, cancellation: CancellationToken) -> Result<()> {
        let (progress, _rx) = Progress::channel();
        self.create_with_progress(spec, cancellation, progress).await
    }

    pub async fn create_with_progress(
        &self,
        spec: ClusterSpec,
        cancellation: CancellationToken,
        progress: Progress,
    ) -> Result<()> {
        // Stage 1: load & freeze config.
        spec.validate().map_err(|e| Error::stage("load-config", e))?;
        let spec = Arc::new(spec);
        let cluster_name = spec.name.clone();

        // Stage 2: apply distribution-level patches.
        let distribution_config = distribution::prepare_distribution_config(&spec);

        let docker = Arc::new(
            DockerManager::new(crate::docker::default_socket_path())
                .map_err(|e| Error::stage("connect-docker", e))?,
        );
        let provisioner = distribution::provisioner_for(&spec);
        let kubeconfig_path = provisioner.kubeconfig_path(&cluster_name);

        let ctx = CreationContext {
            spec: spec.clone(),
            cluster_name: cluster_name.clone(),
            distribution_config,
            progress: progress.clone(),
            cancellation,
            docker,
            kubeconfig_path,
        };

        let registry = RegistryProvisioner::new(&ctx.docker, progress.clone());

        // Stage 3: registry pre-cluster (provision local, verify access, set
        // up mirrors, create network, connect registries) — all before the
        // cluster exists.
        registry
            .provision_local(&cluster_name, &ctx.spec)
            .await
            .map_err(|e| Error::stage("provision-local-registry", e))?;
        registry
            .verify_access(&ctx.spec)
            .await
            .map_err(|e| Error::stage("verify-registry-access", e))?;
        registry
            .setup_mirrors(&cluster_name, &ctx.spec)
            .await
            .map_err(|e| Error::stage("setup-mirrors", e))?;
        registry
            .create_network(&cluster_name)
            .await
            .map_err(|e| Error::stage("create-network", e))?;
        registry
            .connect_registries(&cluster_name, &ctx.spec)
            .await
            .map_err(|e| Error::stage("connect-registries", e))?;

        // Stage 4: create the cluster itself.
        progress.info("orchestrator", format!("creating cluster {cluster_name}"));
        provisioner
            .create(&ctx)
            .await
            .map_err(|e| Error::stage("create-cluster", e))?;

        // Stage 5: configure in-cluster mirrors (Kind only — containerd patch
        // baked in at stage 2/4 already; warn-only if a distribution needs a
        // post-create step and it fails).
        if let Err(e) = self.configure_incluster_mirrors(&ctx).await {
            progress.warn("configure-mirrors", format!("non-fatal: {e}"));
        }

        // Stage 6: wait for the local registry to be ready.
        registry
            .wait_for_local_registry_ready(&cluster_name, &ctx.spec, LOCAL_REGISTRY_READY_DEADLINE)
            .await
            .map_err(|e| Error::stage("wait-for-local-registry", e))?;

        // Stage 7: optional cached image import — unsupported combinations
        // warn and continue rather than failing the whole pipeline.
        if let Some(import_spec) = &ctx.spec.workload.import_images {
            if let Err(e) = self.import_cached_images(&ctx, import_spec).await {
                progress.warn("import-images", format!("skipping: {e}"));
            }
        }

        // Stage 8: install CNI, blocking — the post-condition is at least one
        // Ready node, so installers and readiness-waiting happen in order.
        self.install_cni(&ctx).await?;
        let mut k8s = ctx.k8s_client();
        ReadinessWaiter::new(&mut k8s)
            .wait_for(&Check::Node, CNI_READY_DEADLINE)
            .await
            .map_err(|e| Error::stage("wait-for-node-ready", e))?;

        // Stage 9: install every other add-on in parallel, fail-fast; then
        // sequentially reconcile GitOps CRs once every chart is installed.
        self.install_post_cni(&ctx).await?;
        crate::installer::ensure_gitops_resources(&ctx)
            .await
            .map_err(|e| Error::stage("reconcile-gitops", e))?;

        // Stage 10: persist the snapshot that later update/delete calls diff against.
        self.state
            .save(&cluster_name, &ctx.spec)
            .await
            .map_err(|e| Error::stage("persist-state", e))?;

        progress.info("orchestrator", format!("cluster {cluster_name} ready"));
        Ok(())
    }

    /// Diffs `new_spec` against the persisted snapshot and, when the plan
    /// allows proceeding, applies every in-place change (§4.7). Returns the
    /// diff annotated with `applied_changes`/`failed_changes`; a non-empty
    /// `failed_changes` does not fail the call — the caller inspects it.
    pub async fn update(&self, new_spec: ClusterSpec, opts: UpdateOptions) -> Result<UpdateResult> {
        let old = self.state.load(&new_spec.name).await?;
        let prior_error = new_spec.validate().err().map(|e| Error::stage("load-config", e));
        let computed = crate::diff::compute(&old, &new_spec);
        let (result, should_continue, err) = prepare_update(computed, prior_error, opts);

        let result = match result {
            Some(r) => r,
            None => return Err(err.expect("prepare_update returns Some(err) whenever the diff is None")),
        };
        if !should_continue {
            return match err {
                Some(e) => Err(e),
                None => Ok(result),
            };
        }
        let mut result = result;

        let distribution_config = distribution::prepare_distribution_config(&new_spec);
        let docker = Arc::new(
            DockerManager::new(crate::docker::default_socket_path())
                .map_err(|e| Error::stage("connect-docker", e))?,
        );
        let provisioner = distribution::provisioner_for(&new_spec);
        let kubeconfig_path = provisioner.kubeconfig_path(&new_spec.name);
        let spec = Arc::new(new_spec);
        let ctx = CreationContext {
            spec: spec.clone(),
            cluster_name: spec.name.clone(),
            distribution_config,
            progress: Progress::noop(),
            cancellation: CancellationToken::new(),
            docker,
            kubeconfig_path,
        };

        let in_place: Vec<Change> = result.in_place_changes().into_iter().cloned().collect();
        for change in in_place {
            match self.apply_in_place_change(&ctx, &change).await {
                Ok(()) => result.applied_changes.push(change),
                Err(e) => result.failed_changes.push((change, e.to_string())),
            }
        }

        if result.failed_changes.is_empty() && !result.reboot_required_changes().is_empty() {
            provisioner.reboot(&ctx.cluster_name).await?;
        }

        if result.failed_changes.is_empty() {
            self.state.save(&ctx.cluster_name, &ctx.spec).await?;
        }

        Ok(result)
    }

    /// Applies one `InPlace` change by re-resolving the matching installer
    /// factory against the new spec and installing (or, when the field
    /// toggles the add-on off, uninstalling) it. Fields with no single
    /// concrete installer to target when disabled (CSI, policy engine,
    /// GitOps engine each have more than one backend) are left running
    /// rather than guessed at; fields with no apply mechanism at all return
    /// an error instead of silently doing nothing.
    async fn apply_in_place_change(&self, ctx: &CreationContext, change: &Change) -> Result<()> {
        use crate::installer::{CertManagerInstaller, Installer as _, MetalLbInstaller};
        match change.field.as_str() {
            "cni" => self.install_cni(ctx).await,
            "metricsServer" => match (self.installer_factories.metrics_server)(ctx) {
                Some(installer) => installer.install(ctx).await,
                None => crate::installer::MetricsServerInstaller.uninstall(ctx).await,
            },
            "csi" => match (self.installer_factories.csi)(ctx) {
                Some(installer) => installer.install(ctx).await,
                None => Ok(()),
            },
            "certManager" => match (self.installer_factories.cert_manager)(ctx) {
                Some(installer) => installer.install(ctx).await,
                None => CertManagerInstaller.uninstall(ctx).await,
            },
            "loadBalancer" => match (self.installer_factories.load_balancer)(ctx) {
                Some(installer) => installer.install(ctx).await,
                None => MetalLbInstaller.uninstall(ctx).await,
            },
            "policyEngine" => match (self.installer_factories.policy_engine)(ctx) {
                Some(installer) => installer.install(ctx).await,
                None => Ok(()),
            },
            "gitOpsEngine" => match (self.installer_factories.git_ops_engine)(ctx) {
                Some(installer) => installer.install(ctx).await,
                None => Ok(()),
            },
            "localRegistry.registry" => {
                let registry = RegistryProvisioner::new(&ctx.docker, ctx.progress.clone());
                registry.reconfigure_local_registry(&ctx.cluster_name, &ctx.spec).await
            }
            other => Err(Error::ConfigInvalid(format!(
                "no in-place apply mechanism for field '{other}'"
            ))),
        }
    }

    async fn configure_incluster_mirrors(&self, ctx: &CreationContext) -> Result<()> {
        // Kind bakes mirror config into the node image at create time (stage
        // 2); other distributions have nothing left to do here.
        let _ = ctx;
        Ok(())
    }

    async fn import_cached_images(&self, ctx: &CreationContext, source: &str) -> Result<()> {
        use crate::spec::Distribution;
        let deadline = Duration::from_secs(180);
        match ctx.spec.distribution {
            Distribution::Vanilla => {
                crate::distribution::cli::run(
                    "kind",
                    &[
                        "load".to_string(),
                        "image-archive".to_string(),
                        source.to_string(),
                        "--name".to_string(),
                        ctx.cluster_name.clone(),
                    ],
                    deadline,
                )
                .await
                .map(|_| ())
            }
            Distribution::K3s => {
                crate::distribution::cli::run(
                    "k3d",
                    &[
                        "image".to_string(),
                        "import".to_string(),
                        source.to_string(),
                        "--cluster".to_string(),
                        ctx.cluster_name.clone(),
                    ],
                    deadline,
                )
                .await
                .map(|_| ())
            }
            // See DESIGN.md: none of these have a node-local image cache to
            // import into the way Kind/K3d's containerd does.
            Distribution::Talos | Distribution::VCluster | Distribution::EksAnywhere => {
                Err(Error::ConfigInvalid(format!(
                    "image import is not supported on {}",
                    ctx.spec.distribution.as_str()
                )))
            }
        }
    }

    async fn install_cni(&self, ctx: &CreationContext) -> Result<()> {
        use crate::installer::Installer as _;
        use crate::spec::CniResolved;
        if let CniResolved::Cilium = ctx.spec.cni.effective() {
            let installer = crate::installer::CiliumInstaller;
            installer
                .install(ctx)
                .await
                .map_err(|e| Error::stage("install-cni", e))?;
        }
        Ok(())
    }

    /// Stage 9: runs every remaining installer concurrently, cancelling the
    /// rest and returning the first error the moment one fails.
    async fn install_post_cni(&self, ctx: &CreationContext) -> Result<()> {
        let installers = self.installer_factories.resolve_post_cni(ctx);
        if installers.is_empty() {
            return Ok(());
        }

        let mut tasks = JoinSet::new();
        for installer in installers {
            let ctx = ctx.clone();
            let token = ctx.child_cancellation();
            tasks.spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => Err(Error::ConfigInvalid("installer cancelled".to_string())),
                    result = installer.install(&ctx) => result,
                }
            });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(|e| Error::ConfigInvalid(format!("installer task panicked: {e}")));
            if let Err(e) | Ok(Err(e)) = result {
                if first_error.is_none() {
                    first_error = Some(e);
                    ctx.cancellation.cancel();
                }
            }
        }

        match first_error {
            Some(e) => Err(Error::stage("install-post-cni", e)),
            None => Ok(()),
        }
    }

    /// Deletes a cluster by name: tears down the distribution's nodes, the
    /// registry/mirror containers and network, and the persisted snapshot.
    pub async fn delete(&self, cluster_name: &str) -> Result<()> {
        let spec = self.state.load(cluster_name).await?;
        let provisioner = distribution::provisioner_for(&spec);
        provisioner
            .delete(cluster_name)
            .await
            .map_err(|e| Error::stage("delete-cluster", e))?;

        let docker = DockerManager::new(crate::docker::default_socket_path())
            .map_err(|e| Error::stage("connect-docker", e))?;
        let registry = RegistryProvisioner::new(&docker, Progress::noop());
        registry
            .deprovision(cluster_name, &spec)
            .await
            .map_err(|e| Error::stage("deprovision-registry", e))?;

        self.state.delete(cluster_name).await
    }
}
