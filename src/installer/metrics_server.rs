use super::Installer;
use crate::context::CreationContext;
use crate::error::Result;
use crate::helm::HelmChart;
use async_trait::async_trait;
use std::time::Duration;

pub struct MetricsServerInstaller;

fn chart() -> HelmChart {
    let mut chart = HelmChart::new("metrics-server", "metrics-server/metrics-server", "kube-system");
    chart.repo_url = Some("https://kubernetes-sigs.github.io/metrics-server/".to_string());
    chart.values.insert(
        "args".to_string(),
        serde_json::json!(["--kubelet-insecure-tls"]),
    );
    chart
}

#[async_trait]
impl Installer for MetricsServerInstaller {
    fn name(&self) -> &'static str {
        "metrics-server"
    }

    async fn install(&self, ctx: &CreationContext) -> Result<()> {
        let mut c = chart();
        c.timeout = ctx.helm_timeout(Duration::from_secs(120));
        ctx.helm_client().upgrade_install(&c).await
    }

    async fn uninstall(&self, ctx: &CreationContext) -> Result<()> {
        ctx.helm_client()
            .uninstall("metrics-server", "kube-system")
            .await
    }

    async fn images(&self, ctx: &CreationContext) -> Result<Vec<String>> {
        ctx.helm_client().template_images(&chart()).await
    }
}
