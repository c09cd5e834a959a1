//! Registry Provisioner (C3): owns the cluster-scoped registry topology — a
//! local push-target container, named pull-through mirror containers, and
//! the Docker network that lets in-cluster containerd resolve them by name.

use crate::docker::{ContainerRunConfig, DockerManager};
use crate::error::Result;
use crate::progress::Progress;
use crate::readiness::wait_for_http_ready;
use crate::spec::{parse_registry_ref, ClusterSpec};
use std::time::Duration;

const REGISTRY_IMAGE: &str = "registry:2";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Absent,
    Created,
    Running,
    Connected,
}

pub fn network_name(cluster: &str) -> String {
    format!("ksail-{cluster}")
}

pub struct RegistryProvisioner<'a> {
    docker: &'a DockerManager,
    progress: Progress,
}

impl<'a> RegistryProvisioner<'a> {
    pub fn new(docker: &'a DockerManager, progress: Progress) -> Self {
        Self { docker, progress }
    }

    async fn container_state(&self, name: &str, network: &str) -> ContainerState {
        if !self.docker.container_exists(name).await {
            return ContainerState::Absent;
        }
        if !self.docker.container_running(name).await {
            return ContainerState::Created;
        }
        if self.docker.network_exists(network).await {
            ContainerState::Connected
        } else {
            ContainerState::Running
        }
    }

    /// Drives one container from its current state to `Running`, idempotent
    /// at every transition (`Absent→Created` via pull+create, `Created→Running`
    /// via start, no-op if already running).
    async fn ensure_running(
        &self,
        name: &str,
        network: &str,
        port: Option<(u16, u16)>,
        env: Vec<(String, String)>,
    ) -> Result<()> {
        match self.container_state(name, network).await {
            ContainerState::Absent => {
                if !self.docker.image_exists(REGISTRY_IMAGE).await {
                    self.docker.pull_image(REGISTRY_IMAGE).await?;
                }
                self.docker
                    .run_container(&ContainerRunConfig {
                        name: name.to_string(),
                        image: REGISTRY_IMAGE.to_string(),
                        detach: true,
                        ports: port.into_iter().collect(),
                        env,
                        ..Default::default()
                    })
                    .await?;
            }
            ContainerState::Created => {
                self.docker.start_container(name).await?;
            }
            ContainerState::Running | ContainerState::Connected => {}
        }
        Ok(())
    }

    /// Stage 1: create/start `<cluster>-registry` if `localRegistry` is set.
    pub async fn provision_local(&self, cluster: &str, spec: &ClusterSpec) -> Result<()> {
        if spec.local_registry.is_empty() {
            return Ok(());
        }
        let parsed = parse_registry_ref(&spec.local_registry.registry)?;
        let name = format!("{cluster}-registry");
        let port = parsed
            .host
            .rsplit_once(':')
            .and_then(|(_, p)| p.parse::<u16>().ok())
            .unwrap_or(5000);

        self.progress.info("registry", format!("provisioning local registry {name}"));
        self.ensure_running(&name, &network_name(cluster), Some((port, 5000)), Vec::new())
            .await
    }

    /// Stage 2: for any configured registry with credentials, fail fast on an
    /// auth error rather than letting it surface deep inside cluster creation.
    pub async fn verify_access(&self, spec: &ClusterSpec) -> Result<()> {
        if !spec.local_registry.is_empty() {
            let parsed = parse_registry_ref(&spec.local_registry.registry)?;
            if let (Some(user), Some(pass)) = (&parsed.user, &parsed.pass) {
                self.probe_auth(&parsed.host, user, pass).await?;
            }
        }
        for mirror in &spec.mirror_registries {
            let parsed = parse_registry_ref(&mirror.spec)?;
            if let (Some(user), Some(pass)) = (&parsed.user, &parsed.pass) {
                self.probe_auth(&parsed.host, user, pass).await?;
            }
        }
        Ok(())
    }

    /// Probes the authenticated API root; a 401/403 means the configured
    /// credentials are wrong, surfaced immediately rather than deep inside a
    /// half-created cluster.
    async fn probe_auth(&self, host: &str, user: &str, pass: &str) -> Result<()> {
        let url = format!("http://{host}/v2/");
        let resp = reqwest::Client::new()
            .get(&url)
            .basic_auth(user, Some(pass))
            .send()
            .await;

        match resp {
            Ok(resp) => {
                let status = resp.status();
                if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
                    return Err(crate::error::Error::MissingPlatformCredential(format!(
                        "credentials rejected by registry {host}"
                    )));
                }
                Ok(())
            }
            // Registry not reachable yet (not created) is not an auth failure.
            Err(_) => Ok(()),
        }
    }

    /// Stage 3: create/reuse `<host>-mirror` containers, restarting on upstream change.
    pub async fn setup_mirrors(&self, cluster: &str, spec: &ClusterSpec) -> Result<()> {
        for mirror in &spec.mirror_registries {
            let parsed = parse_registry_ref(&mirror.spec)?;
            let upstream = parsed.upstream.clone().unwrap_or_default();
            let name = format!("{}-mirror", sanitize(&parsed.host));

            self.progress
                .info("registry", format!("provisioning mirror {name} -> {upstream}"));

            self.ensure_running(
                &name,
                &network_name(cluster),
                None,
                vec![
                    ("REGISTRY_PROXY_REMOTEURL".to_string(), upstream.clone()),
                    ("OTEL_TRACES_EXPORTER".to_string(), "none".to_string()),
                ],
            )
            .await?;

            if let Some(recorded) = self.docker.container_status(&name).await {
                tracing::debug!(mirror = %name, status = %recorded, "mirror container status");
            }
        }
        Ok(())
    }

    /// Re-provisions the local registry container after `localRegistry.registry`
    /// changes host or port — used by the Update Planner's in-place apply
    /// step (§4.7), since `ensure_running` only handles absent/stopped
    /// transitions, not a port change on an already-running container.
    pub async fn reconfigure_local_registry(&self, cluster: &str, spec: &ClusterSpec) -> Result<()> {
        let name = format!("{cluster}-registry");
        let _ = self.docker.stop_container(&name).await;
        let _ = self.docker.remove_container(&name, true).await;
        self.provision_local(cluster, spec).await?;
        self.connect_registries(cluster, spec).await
    }

    /// Stage 4: ensure the per-cluster Docker network exists. Idempotent.
    pub async fn create_network(&self, cluster: &str) -> Result<()> {
        self.docker.create_network(&network_name(cluster)).await
    }

    /// Stage 5: attach every registry/mirror container to the cluster network
    /// before cluster creation, so containerd can resolve them by name at
    /// kubelet start.
    pub async fn connect_registries(&self, cluster: &str, spec: &ClusterSpec) -> Result<()> {
        let network = network_name(cluster);
        if !spec.local_registry.is_empty() {
            let name = format!("{cluster}-registry");
            self.docker.connect_network(&network, &name).await?;
        }
        for mirror in &spec.mirror_registries {
            let parsed = parse_registry_ref(&mirror.spec)?;
            let name = format!("{}-mirror", sanitize(&parsed.host));
            self.docker.connect_network(&network, &name).await?;
        }
        Ok(())
    }

    /// Stage 7: poll the local registry's `/v2/` endpoint until ready.
    pub async fn wait_for_local_registry_ready(
        &self,
        cluster: &str,
        spec: &ClusterSpec,
        deadline: Duration,
    ) -> Result<()> {
        if spec.local_registry.is_empty() {
            return Ok(());
        }
        let parsed = parse_registry_ref(&spec.local_registry.registry)?;
        let _ = cluster;
        let url = format!("http://{}/v2/", parsed.host);
        wait_for_http_ready(&url, deadline).await
    }

    /// Tears down every registry/mirror container and the cluster network.
    pub async fn deprovision(&self, cluster: &str, spec: &ClusterSpec) -> Result<()> {
        if !spec.local_registry.is_empty() {
            let name = format!("{cluster}-registry");
            let _ = self.docker.stop_container(&name).await;
            let _ = self.docker.remove_container(&name, true).await;
        }
        for mirror in &spec.mirror_registries {
            let host = parse_registry_ref(&mirror.spec)
                .map(|p| p.host)
                .unwrap_or_else(|_| mirror.spec.clone());
            let name = format!("{}-mirror", sanitize(&host));
            let _ = self.docker.stop_container(&name).await;
            let _ = self.docker.remove_container(&name, true).await;
        }
        self.docker.remove_network(&network_name(cluster)).await
    }
}

/// Shared with every distribution provisioner's mirror config: the mirror
/// container for `host` is always named `sanitize(host)-mirror`.
pub fn sanitize(host: &str) -> String {
    host.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}
