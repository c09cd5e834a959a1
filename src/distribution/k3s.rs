//! K3s provisioner, via the `k3d` CLI. `--disable=` flags computed here are
//! how K3s's built-in metrics-server/local-path/servicelb add-ons are turned
//! off when the spec wants the installer-managed equivalents instead (§4.5).

use super::{cli, default_kubeconfig_path, DistributionProvisioner};
use crate::context::{CreationContext, DistributionConfig};
use crate::error::Result;
use crate::spec::{ClusterSpec, Csi, CsiResolved};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

const BIN: &str = "k3d";
const CREATE_DEADLINE: Duration = Duration::from_secs(300);
const DELETE_DEADLINE: Duration = Duration::from_secs(120);

pub struct K3dProvisioner;

#[async_trait]
impl DistributionProvisioner for K3dProvisioner {
    fn distribution(&self) -> crate::spec::Distribution {
        crate::spec::Distribution::K3s
    }

    async fn create(&self, ctx: &CreationContext) -> Result<()> {
        let kubeconfig = self.kubeconfig_path(&ctx.cluster_name);
        if let Some(parent) = kubeconfig.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }

        let mut args = vec![
            "cluster".to_string(),
            "create".to_string(),
            ctx.cluster_name.clone(),
            "--kubeconfig-update-default=false".to_string(),
        ];
        args.extend(ctx.distribution_config.k3d_extra_args.clone());

        if let Some(yaml) = &ctx.distribution_config.k3d_registries_yaml {
            let path = std::env::temp_dir().join(format!("ksail-{}-registries.yaml", ctx.cluster_name));
            tokio::fs::write(&path, yaml)
                .await
                .map_err(|e| crate::error::Error::Io(format!("writing {}", path.display()), e))?;
            args.push("--registry-config".to_string());
            args.push(path.to_string_lossy().to_string());
        }

        ctx.progress
            .info("distribution", format!("creating k3d cluster {}", ctx.cluster_name));
        cli::run(BIN, &args, CREATE_DEADLINE).await?;

        // k3d writes its own kubeconfig on request rather than to a path we choose.
        let out = cli::run(
            BIN,
            &[
                "kubeconfig".to_string(),
                "get".to_string(),
                ctx.cluster_name.clone(),
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
            &["cluster".to_string(), "delete".to_string(), cluster_name.to_string()],
            DELETE_DEADLINE,
        )
        .await
        .map(|_| ())
    }

    async fn start(&self, cluster_name: &str) -> Result<()> {
        cli::run(
            BIN,
            &["cluster".to_string(), "start".to_string(), cluster_name.to_string()],
            Duration::from_secs(120),
        )
        .await
        .map(|_| ())
    }

    async fn stop(&self, cluster_name: &str) -> Result<()> {
        cli::run(
            BIN,
            &["cluster".to_string(), "stop".to_string(), cluster_name.to_string()],
            Duration::from_secs(60),
        )
        .await
        .map(|_| ())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let out = cli::run(
            BIN,
            &[
                "cluster".to_string(),
                "list".to_string(),
                "--no-headers".to_string(),
                "-o".to_string(),
                "json".to_string(),
            ],
            Duration::from_secs(30),
        )
        .await?;
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&out).unwrap_or_default();
        Ok(parsed
            .into_iter()
            .filter_map(|v| v.get("name").and_then(|n| n.as_str()).map(str::to_string))
            .collect())
    }

    async fn exists(&self, cluster_name: &str) -> Result<bool> {
        Ok(self.list().await?.iter().any(|c| c == cluster_name))
    }

    fn kubeconfig_path(&self, cluster_name: &str) -> PathBuf {
        default_kubeconfig_path(cluster_name)
    }
}

/// Stage 2 (§4.8): disables K3s's bundled add-ons when the spec's effective
/// value routes that concern through the installer registry instead, and
/// builds the `registries.yaml` mirror config (§9 "mirrors.<host>.endpoint").
pub fn prepare(spec: &ClusterSpec) -> DistributionConfig {
    let mut args = Vec::new();

    if !spec.metrics_server.effective(true) {
        args.push("--k3s-arg".to_string());
        args.push("--disable=metrics-server@server:*".to_string());
    }

    let csi_disabled = matches!(spec.csi, Csi::Disabled)
        || matches!(spec.csi.effective(spec.distribution, spec.provider), CsiResolved::Disabled);
    if csi_disabled {
        args.push("--k3s-arg".to_string());
        args.push("--disable=local-storage@server:*".to_string());
    }

    if !spec.load_balancer.effective(true) {
        args.push("--k3s-arg".to_string());
        args.push("--disable=servicelb@server:*".to_string());
    }

    DistributionConfig {
        k3d_extra_args: args,
        k3d_registries_yaml: build_registries_yaml(spec),
        ..Default::default()
    }
}

/// Points each mirror host at the `<host>-mirror` container
/// [`crate::registry::RegistryProvisioner::setup_mirrors`] creates and
/// attaches to the cluster network before cluster creation, not at the
/// upstream directly.
fn build_registries_yaml(spec: &ClusterSpec) -> Option<String> {
    if spec.mirror_registries.is_empty() {
        return None;
    }
    let mut yaml = String::from("mirrors:\n");
    for mirror in &spec.mirror_registries {
        if let Ok(parsed) = crate::spec::parse_registry_ref(&mirror.spec) {
            if parsed.upstream.is_some() {
                let endpoint = format!("http://{}-mirror:5000", crate::registry::sanitize(&parsed.host));
                yaml.push_str(&format!(
                    "  \"{}\":\n    endpoint:\n      - \"{}\"\n",
                    parsed.host, endpoint
                ));
            }
        }
    }
    Some(yaml)
}
