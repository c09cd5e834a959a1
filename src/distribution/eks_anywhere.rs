//! EKS-Anywhere provisioner, via `eksctl anywhere`. Only ever reached for the
//! Hetzner provider (§3 matrix) — cluster spec generation references the
//! Hetzner server types/location/network fields the operator filled in.

use super::{cli, default_kubeconfig_path, DistributionProvisioner};
use crate::context::CreationContext;
use crate::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

const BIN: &str = "eksctl";
const CREATE_DEADLINE: Duration = Duration::from_secs(900);

pub struct EksAnywhereProvisioner;

#[async_trait]
impl DistributionProvisioner for EksAnywhereProvisioner {
    fn distribution(&self) -> crate::spec::Distribution {
        crate::spec::Distribution::EksAnywhere
    }

    async fn create(&self, ctx: &CreationContext) -> Result<()> {
        let config_path = write_cluster_spec(ctx).await?;
        ctx.progress
            .info("distribution", format!("creating eks-anywhere cluster {}", ctx.cluster_name));
        cli::run(
            BIN,
            &[
                "anywhere".to_string(),
                "create".to_string(),
                "cluster".to_string(),
                "-f".to_string(),
                config_path.to_string_lossy().to_string(),
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
                "anywhere".to_string(),
                "delete".to_string(),
                "cluster".to_string(),
                cluster_name.to_string(),
            ],
            Duration::from_secs(300),
        )
        .await
        .map(|_| ())
    }

    async fn start(&self, _cluster_name: &str) -> Result<()> {
        // EKS-Anywhere clusters run on provisioned VMs with no notion of
        // "stopped"; nothing to do beyond the underlying Hetzner servers.
        Ok(())
    }

    async fn stop(&self, _cluster_name: &str) -> Result<()> {
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let out = cli::run(
            BIN,
            &[
                "anywhere".to_string(),
                "get".to_string(),
                "clusters".to_string(),
            ],
            Duration::from_secs(30),
        )
        .await?;
        Ok(out.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect())
    }

    async fn exists(&self, cluster_name: &str) -> Result<bool> {
        Ok(self.list().await?.iter().any(|c| c == cluster_name))
    }

    fn kubeconfig_path(&self, cluster_name: &str) -> PathBuf {
        default_kubeconfig_path(cluster_name)
    }
}

async fn write_cluster_spec(ctx: &CreationContext) -> Result<PathBuf> {
    let hetzner = &ctx.spec.hetzner;
    let yaml = format!(
        "apiVersion: anywhere.eks.amazonaws.com/v1alpha1\nkind: Cluster\nmetadata:\n  name: {name}\nspec:\n  controlPlaneConfiguration:\n    count: 1\n    machineGroupRef:\n      name: {name}-cp\n  workerNodeGroupConfigurations:\n    - count: 1\n      machineGroupRef:\n        name: {name}-md\n  datacenterRef:\n    kind: HetznerDatacenterConfig\n    name: {name}-datacenter\n---\napiVersion: anywhere.eks.amazonaws.com/v1alpha1\nkind: HetznerDatacenterConfig\nmetadata:\n  name: {name}-datacenter\nspec:\n  location: {location}\n  network: {network}\n",
        name = ctx.cluster_name,
        location = hetzner.location.clone().unwrap_or_default(),
        network = hetzner.network_name.clone().unwrap_or_default(),
    );

    let path = std::env::temp_dir().join(format!("ksail-{}-eksa.yaml", ctx.cluster_name));
    tokio::fs::write(&path, yaml)
        .await
        .map_err(|e| crate::error::Error::Io(format!("writing {}", path.display()), e))?;
    Ok(path)
}
