//! Talos provisioner, via `talosctl`. Machine-config patches are partitioned
//! into cluster-wide, control-plane-only and worker-only documents (§4.5);
//! enabling metrics-server adds kubelet cert-rotation and a CSR-approver
//! patch, since Talos's kubelet otherwise refuses the metrics API's TLS.

use super::{cli, default_kubeconfig_path, DistributionProvisioner};
use crate::context::{CreationContext, DistributionConfig};
use crate::error::Result;
use crate::spec::{ClusterSpec, Provider};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

const BIN: &str = "talosctl";
const CREATE_DEADLINE: Duration = Duration::from_secs(600);
const DELETE_DEADLINE: Duration = Duration::from_secs(180);

pub struct TalosProvisioner;

#[async_trait]
impl DistributionProvisioner for TalosProvisioner {
    fn distribution(&self) -> crate::spec::Distribution {
        crate::spec::Distribution::Talos
    }

    async fn create(&self, ctx: &CreationContext) -> Result<()> {
        let kubeconfig = self.kubeconfig_path(&ctx.cluster_name);
        if let Some(parent) = kubeconfig.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }

        let mut args = vec![
            "cluster".to_string(),
            "create".to_string(),
            "--name".to_string(),
            ctx.cluster_name.clone(),
            "--controlplanes".to_string(),
            ctx.spec.talos.control_planes.to_string(),
            "--workers".to_string(),
            ctx.spec.talos.workers.to_string(),
        ];

        if let Some(iso) = &ctx.spec.talos.iso {
            args.push("--iso-path".to_string());
            args.push(iso.clone());
        }

        for patch in &ctx.distribution_config.talos_patches.cluster {
            args.push("--config-patch".to_string());
            args.push(patch.clone());
        }
        for patch in &ctx.distribution_config.talos_patches.control_planes {
            args.push("--config-patch-control-plane".to_string());
            args.push(patch.clone());
        }
        for patch in &ctx.distribution_config.talos_patches.workers {
            args.push("--config-patch-worker".to_string());
            args.push(patch.clone());
        }

        ctx.progress
            .info("distribution", format!("creating talos cluster {}", ctx.cluster_name));
        cli::run(BIN, &args, CREATE_DEADLINE).await?;

        let out = cli::run(
            BIN,
            &[
                "kubeconfig".to_string(),
                "--cluster".to_string(),
                ctx.cluster_name.clone(),
                "-".to_string(),
            ],
            Duration::from_secs(30),
        )
        .await?;
        tokio::fs::write(&kubeconfig, out)
            .await
            .map_err(|e| crate::error::Error::Io(format!("writing {}", kubeconfig.display()), e))
    }

    async fn delete(&self, cluster_name: &str) -> Result<()> {
        cli::run(
            BIN,
            &[
                "cluster".to_string(),
                "destroy".to_string(),
                "--name".to_string(),
                cluster_name.to_string(),
            ],
            DELETE_DEADLINE,
        )
        .await
        .map(|_| ())
    }

    async fn start(&self, cluster_name: &str) -> Result<()> {
        cli::run(
            BIN,
            &[
                "cluster".to_string(),
                "start".to_string(),
                "--name".to_string(),
                cluster_name.to_string(),
            ],
            Duration::from_secs(120),
        )
        .await
        .map(|_| ())
    }

    async fn stop(&self, cluster_name: &str) -> Result<()> {
        cli::run(
            BIN,
            &[
                "cluster".to_string(),
                "stop".to_string(),
                "--name".to_string(),
                cluster_name.to_string(),
            ],
            Duration::from_secs(60),
        )
        .await
        .map(|_| ())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let out = cli::run(BIN, &["cluster".to_string(), "show".to_string()], Duration::from_secs(30))
            .await
            .unwrap_or_default();
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with("NAME"))
            .map(str::to_string)
            .collect())
    }

    async fn exists(&self, cluster_name: &str) -> Result<bool> {
        cli::run(
            BIN,
            &[
                "cluster".to_string(),
                "show".to_string(),
                "--name".to_string(),
                cluster_name.to_string(),
            ],
            Duration::from_secs(30),
        )
        .await
        .map(|_| true)
        .or(Ok(false))
    }

    fn kubeconfig_path(&self, cluster_name: &str) -> PathBuf {
        default_kubeconfig_path(cluster_name)
    }
}

/// Stage 2 (§4.8): partitions machine-config patches by scope. Hetzner's
/// control-plane/worker server types only matter once nodes are actually
/// being provisioned there; the Docker provider ignores them.
pub fn prepare(spec: &ClusterSpec) -> DistributionConfig {
    let mut cluster = Vec::new();
    let control_planes = Vec::new();
    let mut workers = Vec::new();

    if spec.metrics_server.effective(true) {
        cluster.push(kubelet_cert_rotation_patch());
        cluster.push(csr_approver_patch());
    }

    for mirror in &spec.mirror_registries {
        if let Ok(parsed) = crate::spec::parse_registry_ref(&mirror.spec) {
            if parsed.upstream.is_some() {
                cluster.push(registry_mirror_patch(&parsed.host));
            }
        }
    }

    if matches!(spec.provider, Provider::Hetzner) {
        if let Some(worker_type) = &spec.hetzner.worker_server_type {
            workers.push(format!(
                "machine:\n  nodeLabels:\n    node.kubernetes.io/instance-type: {worker_type}\n"
            ));
        }
    }

    DistributionConfig {
        talos_patches: crate::context::TalosPatches {
            cluster,
            control_planes,
            workers,
        },
        ..Default::default()
    }
}

fn kubelet_cert_rotation_patch() -> String {
    "machine:\n  kubelet:\n    extraArgs:\n      rotate-server-certificates: \"true\"\n".to_string()
}

fn csr_approver_patch() -> String {
    "cluster:\n  extraManifests:\n    - https://raw.githubusercontent.com/alex1989hu/kubelet-serving-cert-approver/main/deploy/standalone-install.yaml\n".to_string()
}

/// Points `host` at the `<host>-mirror` container
/// [`crate::registry::RegistryProvisioner::setup_mirrors`] creates and
/// attaches to the cluster network before cluster creation, not at the
/// upstream directly (§9 "machine.registries.mirrors.<host>.endpoints").
fn registry_mirror_patch(host: &str) -> String {
    let endpoint = format!("http://{}-mirror:5000", crate::registry::sanitize(host));
    format!("machine:\n  registries:\n    mirrors:\n      {host}:\n        endpoints:\n          - {endpoint}\n")
}
