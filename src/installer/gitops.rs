use super::Installer;
use crate::context::CreationContext;
use crate::error::Result;
use crate::helm::HelmChart;
use crate::spec::GitOpsEngine;
use async_trait::async_trait;
use std::time::Duration;

pub struct FluxInstaller;

fn flux_chart() -> HelmChart {
    let mut chart = HelmChart::new("flux-operator", "flux-operator/flux-operator", "flux-system");
    chart.repo_url = Some("https://fluxcd-community.github.io/helm-charts".to_string());
    chart
}

#[async_trait]
impl Installer for FluxInstaller {
    fn name(&self) -> &'static str {
        "flux"
    }

    async fn install(&self, ctx: &CreationContext) -> Result<()> {
        let mut chart = flux_chart();
        chart.timeout = ctx.helm_timeout(Duration::from_secs(180));
        ctx.helm_client().upgrade_install(&chart).await
    }

    async fn uninstall(&self, ctx: &CreationContext) -> Result<()> {
        ctx.helm_client().uninstall("flux-operator", "flux-system").await
    }

    async fn images(&self, ctx: &CreationContext) -> Result<Vec<String>> {
        ctx.helm_client().template_images(&flux_chart()).await
    }
}

pub struct ArgoCdInstaller;

fn argocd_chart() -> HelmChart {
    let mut chart = HelmChart::new("argo-cd", "argo/argo-cd", "argocd");
    chart.repo_url = Some("https://argoproj.github.io/argo-helm".to_string());
    chart
}

#[async_trait]
impl Installer for ArgoCdInstaller {
    fn name(&self) -> &'static str {
        "argocd"
    }

    async fn install(&self, ctx: &CreationContext) -> Result<()> {
        let mut chart = argocd_chart();
        chart.timeout = ctx.helm_timeout(Duration::from_secs(300));
        ctx.helm_client().upgrade_install(&chart).await
    }

    async fn uninstall(&self, ctx: &CreationContext) -> Result<()> {
        ctx.helm_client().uninstall("argo-cd", "argocd").await
    }

    async fn images(&self, ctx: &CreationContext) -> Result<Vec<String>> {
        ctx.helm_client().template_images(&argocd_chart()).await
    }
}

/// Stage 9b (§4.8): applies the Flux `Instance` or ArgoCD `Application` CR
/// after every stage-9 installer has succeeded. Run sequentially, outside the
/// fan-out/fan-in group, because it needs the GitOps chart's own CRDs to have
/// registered before the apiserver will accept the CR.
pub async fn ensure_gitops_resources(ctx: &CreationContext) -> Result<()> {
    match ctx.spec.git_ops_engine {
        GitOpsEngine::None => Ok(()),
        GitOpsEngine::Flux => ensure_flux_instance(ctx).await,
        GitOpsEngine::ArgoCD => ensure_argocd_application(ctx).await,
    }
}

async fn ensure_flux_instance(ctx: &CreationContext) -> Result<()> {
    let source_dir = ctx
        .spec
        .workload
        .source_directory
        .clone()
        .unwrap_or_else(|| "clusters/production".to_string());
    let yaml = format!(
        "apiVersion: fluxcd.controlplane.io/v1\nkind: FluxInstance\nmetadata:\n  name: flux\n  namespace: flux-system\nspec:\n  distribution:\n    version: \"2.x\"\n  sync:\n    kind: GitRepository\n    path: {source_dir}\n"
    );
    ctx.k8s_client().apply_yaml(&yaml).await
}

async fn ensure_argocd_application(ctx: &CreationContext) -> Result<()> {
    let source_dir = ctx
        .spec
        .workload
        .source_directory
        .clone()
        .unwrap_or_else(|| ".".to_string());
    let yaml = format!(
        "apiVersion: argoproj.io/v1alpha1\nkind: Application\nmetadata:\n  name: {name}\n  namespace: argocd\nspec:\n  project: default\n  source:\n    path: {source_dir}\n  destination:\n    server: https://kubernetes.default.svc\n  syncPolicy:\n    automated: {{}}\n",
        name = ctx.cluster_name
    );
    ctx.k8s_client().apply_yaml(&yaml).await
}
