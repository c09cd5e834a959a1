use super::Installer;
use crate::context::CreationContext;
use crate::error::Result;
use crate::helm::HelmChart;
use async_trait::async_trait;
use std::time::Duration;

/// `rancher.io/local-path` — the CSI bundled with K3s/Kind clusters.
pub struct LocalPathProvisionerInstaller;

#[async_trait]
impl Installer for LocalPathProvisionerInstaller {
    fn name(&self) -> &'static str {
        "local-path-provisioner"
    }

    async fn install(&self, ctx: &CreationContext) -> Result<()> {
        let mut chart = HelmChart::new(
            "local-path-provisioner",
            "local-path-provisioner/local-path-provisioner",
            "local-path-storage",
        );
        chart.repo_url =
            Some("https://charts.containeroo.ch".to_string());
        chart.timeout = ctx.helm_timeout(Duration::from_secs(120));
        ctx.helm_client().upgrade_install(&chart).await
    }

    async fn uninstall(&self, ctx: &CreationContext) -> Result<()> {
        ctx.helm_client()
            .uninstall("local-path-provisioner", "local-path-storage")
            .await
    }

    async fn images(&self, ctx: &CreationContext) -> Result<Vec<String>> {
        let chart = HelmChart::new(
            "local-path-provisioner",
            "local-path-provisioner/local-path-provisioner",
            "local-path-storage",
        );
        ctx.helm_client().template_images(&chart).await
    }
}

pub struct HetznerCsiInstaller;

#[async_trait]
impl Installer for HetznerCsiInstaller {
    fn name(&self) -> &'static str {
        "hcloud-csi"
    }

    async fn install(&self, ctx: &CreationContext) -> Result<()> {
        self.ensure_token_secret(ctx).await?;
        let mut chart = HelmChart::new("hcloud-csi", "hcloud/hcloud-csi", "kube-system");
        chart.repo_url = Some("https://charts.hetzner.cloud".to_string());
        chart.timeout = ctx.helm_timeout(Duration::from_secs(180));
        ctx.helm_client().upgrade_install(&chart).await
    }

    async fn uninstall(&self, ctx: &CreationContext) -> Result<()> {
        ctx.helm_client().uninstall("hcloud-csi", "kube-system").await
    }

    async fn images(&self, ctx: &CreationContext) -> Result<Vec<String>> {
        let chart = HelmChart::new("hcloud-csi", "hcloud/hcloud-csi", "kube-system");
        ctx.helm_client().template_images(&chart).await
    }
}

impl HetznerCsiInstaller {
    async fn ensure_token_secret(&self, ctx: &CreationContext) -> Result<()> {
        let token = std::env::var("HCLOUD_TOKEN").map_err(|_| {
            crate::error::Error::MissingPlatformCredential("HCLOUD_TOKEN".to_string())
        })?;
        let mut client = ctx.k8s_client();
        client
            .ensure_opaque_secret(
                "hcloud-csi",
                "kube-system",
                std::collections::BTreeMap::from([("token".to_string(), token.into_bytes())]),
            )
            .await
    }
}
