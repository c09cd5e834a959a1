//! Vanilla/Kind provisioner: shells out to the `kind` CLI. Registry mirror
//! support comes from containerd config patches baked into the Kind cluster
//! config (§4.5 "inject containerd registry-mirror config into node images");
//! changing that config is why `localRegistry.registry` is `RecreateRequired`
//! for this distribution (§4.6).

use super::{cli, default_kubeconfig_path, DistributionProvisioner};
use crate::context::{CreationContext, DistributionConfig};
use crate::error::Result;
use crate::spec::ClusterSpec;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

const BIN: &str = "kind";
const CREATE_DEADLINE: Duration = Duration::from_secs(300);
const DELETE_DEADLINE: Duration = Duration::from_secs(120);

pub struct KindProvisioner;

#[async_trait]
impl DistributionProvisioner for KindProvisioner {
    fn distribution(&self) -> crate::spec::Distribution {
        crate::spec::Distribution::Vanilla
    }

    async fn create(&self, ctx: &CreationContext) -> Result<()> {
        let config_path = write_kind_config(ctx).await?;
        let kubeconfig = self.kubeconfig_path(&ctx.cluster_name);
        if let Some(parent) = kubeconfig.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }

        ctx.progress
            .info("distribution", format!("creating kind cluster {}", ctx.cluster_name));

        cli::run(
            BIN,
            &[
                "create".to_string(),
                "cluster".to_string(),
                "--name".to_string(),
                ctx.cluster_name.clone(),
                "--config".to_string(),
                config_path.to_string_lossy().to_string(),
                "--kubeconfig".to_string(),
                kubeconfig.to_string_lossy().to_string(),
            ],
            CREATE_DEADLINE,
        )
        .await
        .map(|_| ())
    }

    async fn delete(&self, cluster_name: &str) -> Result<()> {
        cli::run(
            BIN,
            &[
                "delete".to_string(),
                "cluster".to_string(),
                "--name".to_string(),
                cluster_name.to_string(),
            ],
            DELETE_DEADLINE,
        )
        .await
        .map(|_| ())
    }

    async fn start(&self, cluster_name: &str) -> Result<()> {
        // Kind has no native start/stop; its nodes are plain containers.
        docker_nodes(cluster_name, "start").await
    }

    async fn stop(&self, cluster_name: &str) -> Result<()> {
        docker_nodes(cluster_name, "stop").await
    }

    async fn list(&self) -> Result<Vec<String>> {
        let out = cli::run(BIN, &["get".to_string(), "clusters".to_string()], Duration::from_secs(30)).await?;
        Ok(out.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
    }

    async fn exists(&self, cluster_name: &str) -> Result<bool> {
        Ok(self.list().await?.iter().any(|c| c == cluster_name))
    }

    fn kubeconfig_path(&self, cluster_name: &str) -> PathBuf {
        default_kubeconfig_path(cluster_name)
    }
}

async fn docker_nodes(cluster_name: &str, action: &str) -> Result<()> {
    let out = cli::run(
        "docker",
        &[
            "ps".to_string(),
            "-a".to_string(),
            "--filter".to_string(),
            format!("name={cluster_name}-"),
            "--format".to_string(),
            "{{.Names}}".to_string(),
        ],
        Duration::from_secs(30),
    )
    .await?;
    for name in out.lines().filter(|l| !l.is_empty()) {
        cli::run("docker", &[action.to_string(), name.to_string()], Duration::from_secs(60)).await?;
    }
    Ok(())
}

async fn write_kind_config(ctx: &CreationContext) -> Result<PathBuf> {
    let mut patches = String::new();
    for (host, mirror_endpoint) in &ctx.distribution_config.kind_mirror_files {
        patches.push_str(&format!(
            "\n    [plugins.\"io.containerd.grpc.v1.cri\".registry.mirrors.\"{host}\"]\n      endpoint = [\"{mirror_endpoint}\"]"
        ));
    }

    let containerd_patch = if patches.is_empty() {
        String::new()
    } else {
        format!(
            "containerdConfigPatches:\n  - |-{patches}\n"
        )
    };

    let yaml = format!(
        "kind: Cluster\napiVersion: kind.x-k8s.io/v1alpha4\nname: {name}\n{patch}",
        name = ctx.cluster_name,
        patch = containerd_patch
    );

    let path = std::env::temp_dir().join(format!("ksail-{}-kind.yaml", ctx.cluster_name));
    tokio::fs::write(&path, yaml)
        .await
        .map_err(|e| crate::error::Error::Io(format!("writing {}", path.display()), e))?;
    Ok(path)
}

/// Stage 2 (§4.8): a Vanilla/Kind cluster bakes registry mirrors into
/// containerd config at node start, never reconfigured after create.
///
/// The endpoint here must be the `<host>-mirror` container address that
/// [`crate::registry::RegistryProvisioner::setup_mirrors`] creates and
/// attaches to the cluster network at stage 3/5, not the upstream URL —
/// containerd resolves it by container name over the shared network, it
/// never talks to the real upstream directly.
pub fn prepare(spec: &ClusterSpec) -> DistributionConfig {
    let mut config = DistributionConfig::default();
    for mirror in &spec.mirror_registries {
        if let Ok(parsed) = crate::spec::parse_registry_ref(&mirror.spec) {
            if parsed.upstream.is_some() {
                let mirror_endpoint = format!("http://{}-mirror:5000", crate::registry::sanitize(&parsed.host));
                config.kind_mirror_files.push((parsed.host, mirror_endpoint));
            }
        }
    }
    config
}
