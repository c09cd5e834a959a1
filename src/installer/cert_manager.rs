use super::Installer;
use crate::context::CreationContext;
use crate::error::Result;
use crate::helm::HelmChart;
use async_trait::async_trait;
use std::time::Duration;

pub struct CertManagerInstaller;

fn chart() -> HelmChart {
    let mut chart = HelmChart::new("cert-manager", "jetstack/cert-manager", "cert-manager");
    chart.repo_url = Some("https://charts.jetstack.io".to_string());
    chart
        .values
        .insert("crds".to_string(), serde_json::json!({"enabled": true}));
    chart
}

#[async_trait]
impl Installer for CertManagerInstaller {
    fn name(&self) -> &'static str {
        "cert-manager"
    }

    async fn install(&self, ctx: &CreationContext) -> Result<()> {
        let mut c = chart();
        c.timeout = ctx.helm_timeout(Duration::from_secs(180));
        ctx.helm_client().upgrade_install(&c).await
    }

    async fn uninstall(&self, ctx: &CreationContext) -> Result<()> {
        ctx.helm_client().uninstall("cert-manager", "cert-manager").await
    }

    async fn images(&self, ctx: &CreationContext) -> Result<Vec<String>> {
        ctx.helm_client().template_images(&chart()).await
    }
}
