use super::Installer;
use crate::context::CreationContext;
use crate::error::Result;
use crate::helm::HelmChart;
use crate::spec::Distribution;
use async_trait::async_trait;
use std::time::Duration;

pub struct MetalLbInstaller;

const NAMESPACE: &str = "metallb-system";

fn chart() -> HelmChart {
    HelmChart::new("metallb", "metallb/metallb", NAMESPACE)
}

#[async_trait]
impl Installer for MetalLbInstaller {
    fn name(&self) -> &'static str {
        "metallb"
    }

    async fn install(&self, ctx: &CreationContext) -> Result<()> {
        // Talos runs namespaces under the `restricted` Pod Security default;
        // MetalLB's speaker needs NET_ADMIN/host networking.
        if matches!(ctx.spec.distribution, Distribution::Talos) {
            ctx.k8s_client().label_namespace_privileged(NAMESPACE).await?;
        }

        let mut c = chart();
        c.repo_url = Some("https://metallb.github.io/metallb".to_string());
        c.timeout = ctx.helm_timeout(Duration::from_secs(120));
        ctx.helm_client().upgrade_install(&c).await?;

        self.apply_address_pool(ctx).await
    }

    async fn uninstall(&self, ctx: &CreationContext) -> Result<()> {
        let mut client = ctx.k8s_client();
        client
            .delete_custom_resource(
                "metallb.io/v1beta1",
                "L2Advertisement",
                &format!("{}-l2", ctx.cluster_name),
                NAMESPACE,
            )
            .await?;
        client
            .delete_custom_resource(
                "metallb.io/v1beta1",
                "IPAddressPool",
                &format!("{}-pool", ctx.cluster_name),
                NAMESPACE,
            )
            .await?;
        ctx.helm_client().uninstall("metallb", NAMESPACE).await
    }

    async fn images(&self, ctx: &CreationContext) -> Result<Vec<String>> {
        let mut c = chart();
        c.repo_url = Some("https://metallb.github.io/metallb".to_string());
        ctx.helm_client().template_images(&c).await
    }
}

impl MetalLbInstaller {
    /// Applies a minimal address-pool/advertisement pair, field-managed by
    /// `ksail` (§6 "Server-Side Apply ... used for add-on-owned CRs").
    async fn apply_address_pool(&self, ctx: &CreationContext) -> Result<()> {
        let pool_name = format!("{}-pool", ctx.cluster_name);
        let pool_yaml = format!(
            "apiVersion: metallb.io/v1beta1\nkind: IPAddressPool\nmetadata:\n  name: {pool_name}\n  namespace: {NAMESPACE}\nspec:\n  addresses:\n    - 172.18.255.200-172.18.255.250\n"
        );
        let l2_name = format!("{}-l2", ctx.cluster_name);
        let l2_yaml = format!(
            "apiVersion: metallb.io/v1beta1\nkind: L2Advertisement\nmetadata:\n  name: {l2_name}\n  namespace: {NAMESPACE}\nspec:\n  ipAddressPools:\n    - {pool_name}\n"
        );

        let mut client = ctx.k8s_client();
        client.apply_yaml(&pool_yaml).await?;
        client.apply_yaml(&l2_yaml).await?;
        Ok(())
    }
}
