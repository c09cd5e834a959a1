use super::Installer;
use crate::context::CreationContext;
use crate::error::Result;
use crate::helm::HelmChart;
use async_trait::async_trait;
use std::time::Duration;

pub struct KyvernoInstaller;

#[async_trait]
impl Installer for KyvernoInstaller {
    fn name(&self) -> &'static str {
        "kyverno"
    }

    async fn install(&self, ctx: &CreationContext) -> Result<()> {
        let mut chart = HelmChart::new("kyverno", "kyverno/kyverno", "kyverno");
        chart.repo_url = Some("https://kyverno.github.io/kyverno/".to_string());
        chart.timeout = ctx.helm_timeout(Duration::from_secs(180));
        ctx.helm_client().upgrade_install(&chart).await
    }

    async fn uninstall(&self, ctx: &CreationContext) -> Result<()> {
        ctx.helm_client().uninstall("kyverno", "kyverno").await
    }

    async fn images(&self, ctx: &CreationContext) -> Result<Vec<String>> {
        let mut chart = HelmChart::new("kyverno", "kyverno/kyverno", "kyverno");
        chart.repo_url = Some("https://kyverno.github.io/kyverno/".to_string());
        ctx.helm_client().template_images(&chart).await
    }
}

pub struct GatekeeperInstaller;

#[async_trait]
impl Installer for GatekeeperInstaller {
    fn name(&self) -> &'static str {
        "gatekeeper"
    }

    async fn install(&self, ctx: &CreationContext) -> Result<()> {
        let mut chart = HelmChart::new("gatekeeper", "gatekeeper/gatekeeper", "gatekeeper-system");
        chart.repo_url = Some("https://open-policy-agent.github.io/gatekeeper/charts".to_string());
        chart.timeout = ctx.helm_timeout(Duration::from_secs(180));
        ctx.helm_client().upgrade_install(&chart).await
    }

    async fn uninstall(&self, ctx: &CreationContext) -> Result<()> {
        ctx.helm_client()
            .uninstall("gatekeeper", "gatekeeper-system")
            .await
    }

    async fn images(&self, ctx: &CreationContext) -> Result<Vec<String>> {
        let mut chart = HelmChart::new("gatekeeper", "gatekeeper/gatekeeper", "gatekeeper-system");
        chart.repo_url = Some("https://open-policy-agent.github.io/gatekeeper/charts".to_string());
        ctx.helm_client().template_images(&chart).await
    }
}
