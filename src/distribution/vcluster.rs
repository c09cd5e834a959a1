//! VCluster provisioner, via the `vcluster` CLI. A vcluster runs inside a
//! namespace of an already-reachable host cluster rather than owning its own
//! nodes, so `loadBalancer` is delegated to the host (§4.6, §4.8 installer
//! factory's `default_load_balancer`).

use super::{cli, default_kubeconfig_path, DistributionProvisioner};
use crate::context::CreationContext;
use crate::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

const BIN: &str = "vcluster";
const CREATE_DEADLINE: Duration = Duration::from_secs(180);

pub struct VClusterProvisioner;

#[async_trait]
impl DistributionProvisioner for VClusterProvisioner {
    fn distribution(&self) -> crate::spec::Distribution {
        crate::spec::Distribution::VCluster
    }

    async fn create(&self, ctx: &CreationContext) -> Result<()> {
        let kubeconfig = self.kubeconfig_path(&ctx.cluster_name);
        if let Some(parent) = kubeconfig.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }

        ctx.progress
            .info("distribution", format!("creating vcluster {}", ctx.cluster_name));
        cli::run(
            BIN,
            &[
                "create".to_string(),
                ctx.cluster_name.clone(),
                "--namespace".to_string(),
                format!("vcluster-{}", ctx.cluster_name),
            ],
            CREATE_DEADLINE,
        )
        .await?;

        let out = cli::run(
            BIN,
            &[
                "connect".to_string(),
                ctx.cluster_name.clone(),
                "--print".to_string(),
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
                "delete".to_string(),
                cluster_name.to_string(),
                "--namespace".to_string(),
                format!("vcluster-{cluster_name}"),
            ],
            Duration::from_secs(120),
        )
        .await
        .map(|_| ())
    }

    async fn start(&self, cluster_name: &str) -> Result<()> {
        cli::run(BIN, &["resume".to_string(), cluster_name.to_string()], Duration::from_secs(60))
            .await
            .map(|_| ())
    }

    async fn stop(&self, cluster_name: &str) -> Result<()> {
        cli::run(BIN, &["pause".to_string(), cluster_name.to_string()], Duration::from_secs(60))
            .await
            .map(|_| ())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let out = cli::run(
            BIN,
            &["list".to_string(), "--output".to_string(), "json".to_string()],
            Duration::from_secs(30),
        )
        .await?;
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&out).unwrap_or_default();
        Ok(parsed
            .into_iter()
            .filter_map(|v| v.get("Name").and_then(|n| n.as_str()).map(str::to_string))
            .collect())
    }

    async fn exists(&self, cluster_name: &str) -> Result<bool> {
        Ok(self.list().await?.iter().any(|c| c == cluster_name))
    }

    fn kubeconfig_path(&self, cluster_name: &str) -> PathBuf {
        default_kubeconfig_path(cluster_name)
    }
}
