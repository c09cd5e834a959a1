use super::Installer;
use crate::context::CreationContext;
use crate::error::Result;
use crate::helm::HelmChart;
use async_trait::async_trait;
use std::time::Duration;

pub struct CiliumInstaller;

#[async_trait]
impl Installer for CiliumInstaller {
    fn name(&self) -> &'static str {
        "cilium"
    }

    async fn install(&self, ctx: &CreationContext) -> Result<()> {
        let mut chart = HelmChart::new("cilium", "cilium/cilium", "kube-system");
        chart.repo_url = Some("https://helm.cilium.io/".to_string());
        chart.timeout = ctx.helm_timeout(Duration::from_secs(300));
        ctx.helm_client().upgrade_install(&chart).await
    }

    async fn uninstall(&self, ctx: &CreationContext) -> Result<()> {
        ctx.helm_client().uninstall("cilium", "kube-system").await
    }

    async fn images(&self, ctx: &CreationContext) -> Result<Vec<String>> {
        let mut chart = HelmChart::new("cilium", "cilium/cilium", "kube-system");
        chart.repo_url = Some("https://helm.cilium.io/".to_string());
        ctx.helm_client().template_images(&chart).await
    }
}
