//! Thin async wrapper around the Docker Engine API, used by the Registry
//! Provisioner (C3) for registry/mirror container lifecycle and by the
//! orchestrator's cached-image import stage.

#![allow(deprecated)]

use crate::error::{Error, Result};
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{
    HostConfig, HostConfigCgroupnsModeEnum, Mount, MountBindOptions,
    MountBindOptionsPropagationEnum, MountTypeEnum, PortBinding,
};
use bollard::network::{
    ConnectNetworkOptions, CreateNetworkOptions, InspectNetworkOptions,
};
use bollard::Docker;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::path::PathBuf;

pub struct DockerManager {
    #[allow(dead_code)]
    socket_path: PathBuf,
    pub(crate) client: Docker,
}

fn wrap(context: impl Into<String>) -> impl FnOnce(bollard::errors::Error) -> Error {
    let context = context.into();
    move |e| Error::Docker(context, e)
}

impl DockerManager {
    pub fn new(socket_path: PathBuf) -> Result<Self> {
        let client = Docker::connect_with_unix(
            &socket_path.to_string_lossy(),
            120,
            bollard::API_DEFAULT_VERSION,
        )
        .map_err(wrap(format!("connecting to docker at {:?}", socket_path)))?;

        Ok(Self {
            socket_path,
            client,
        })
    }

    pub async fn is_accessible(&self) -> bool {
        self.client.ping().await.is_ok()
    }

    // === Container Operations ===

    pub async fn container_exists(&self, name: &str) -> bool {
        self.client
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .is_ok()
    }

    pub async fn container_running(&self, name: &str) -> bool {
        match self
            .client
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => info.state.and_then(|s| s.running).unwrap_or(false),
            Err(_) => false,
        }
    }

    pub async fn container_status(&self, name: &str) -> Option<String> {
        self.client
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .ok()
            .and_then(|info| info.state)
            .and_then(|state| state.status)
            .map(|s| s.to_string())
    }

    pub async fn start_container(&self, name: &str) -> Result<()> {
        self.client
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(wrap(format!("starting container {name}")))
    }

    pub async fn stop_container(&self, name: &str) -> Result<()> {
        self.client
            .stop_container(name, Some(StopContainerOptions { t: 10 }))
            .await
            .map_err(wrap(format!("stopping container {name}")))
    }

    pub async fn remove_container(&self, name: &str, force: bool) -> Result<()> {
        self.client
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await
            .map_err(wrap(format!("removing container {name}")))
    }

    // === Network Operations ===

    /// Idempotent: a no-op if the network already exists.
    pub async fn create_network(&self, name: &str) -> Result<()> {
        if self
            .client
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
            .is_ok()
        {
            return Ok(());
        }

        self.client
            .create_network(CreateNetworkOptions {
                name: name.to_string(),
                ..Default::default()
            })
            .await
            .map_err(wrap(format!("creating network {name}")))?;

        Ok(())
    }

    pub async fn remove_network(&self, name: &str) -> Result<()> {
        let _ = self.client.remove_network(name).await;
        Ok(())
    }

    /// Idempotent per (container, network) pair.
    pub async fn connect_network(&self, network: &str, container: &str) -> Result<()> {
        match self
            .client
            .connect_network(
                network,
                ConnectNetworkOptions {
                    container,
                    ..Default::default()
                },
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("already exists in network") => Ok(()),
            Err(e) => Err(Error::Docker(
                format!("connecting {container} to network {network}"),
                e,
            )),
        }
    }

    pub async fn network_exists(&self, name: &str) -> bool {
        self.client
            .inspect_network(name, None::<InspectNetworkOptions<String>>)
            .await
            .is_ok()
    }

    // === Image Operations ===

    pub async fn pull_image(&self, image: &str) -> Result<()> {
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.client.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.map_err(wrap(format!("pulling image {image}")))?;
        }
        Ok(())
    }

    pub async fn image_exists(&self, image: &str) -> bool {
        self.client.inspect_image(image).await.is_ok()
    }

    // === Container Run Operations ===

    pub async fn run_container(&self, config: &ContainerRunConfig) -> Result<()> {
        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();

        for (host, container) in &config.ports {
            let container_port = format!("{container}/tcp");
            exposed_ports.insert(container_port.clone(), HashMap::new());
            port_bindings.insert(
                container_port,
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(host.to_string()),
                }]),
            );
        }

        let env: Vec<String> = config
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        let mut binds = Vec::new();
        let mut mounts = Vec::new();

        for (src, dst, options) in &config.volumes {
            if options.is_empty() || options == "volume" {
                binds.push(format!("{src}:{dst}"));
            } else if let Some(propagation_str) = options.strip_prefix("bind-propagation=") {
                let propagation = match propagation_str {
                    "private" => MountBindOptionsPropagationEnum::PRIVATE,
                    "shared" => MountBindOptionsPropagationEnum::SHARED,
                    "rshared" => MountBindOptionsPropagationEnum::RSHARED,
                    "slave" => MountBindOptionsPropagationEnum::SLAVE,
                    "rslave" => MountBindOptionsPropagationEnum::RSLAVE,
                    _ => MountBindOptionsPropagationEnum::RPRIVATE,
                };
                mounts.push(Mount {
                    target: Some(dst.clone()),
                    source: Some(src.clone()),
                    typ: Some(MountTypeEnum::BIND),
                    bind_options: Some(MountBindOptions {
                        propagation: Some(propagation),
                        ..Default::default()
                    }),
                    ..Default::default()
                });
            } else {
                mounts.push(Mount {
                    target: Some(dst.clone()),
                    source: Some(src.clone()),
                    typ: Some(MountTypeEnum::BIND),
                    ..Default::default()
                });
            }
        }

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            binds: if binds.is_empty() { None } else { Some(binds) },
            mounts: if mounts.is_empty() { None } else { Some(mounts) },
            privileged: Some(config.privileged),
            network_mode: config.network.clone(),
            cgroupns_mode: if config.cgroupns_host {
                Some(HostConfigCgroupnsModeEnum::HOST)
            } else {
                None
            },
            pid_mode: if config.pid_host {
                Some("host".to_string())
            } else {
                None
            },
            ..Default::default()
        };

        let container_config = Config {
            image: Some(config.image.clone()),
            hostname: config.hostname.clone(),
            env: if env.is_empty() { None } else { Some(env) },
            exposed_ports: if exposed_ports.is_empty() {
                None
            } else {
                Some(exposed_ports)
            },
            host_config: Some(host_config),
            entrypoint: config.entrypoint.as_ref().map(|e| {
                if e.is_empty() {
                    vec![]
                } else {
                    vec![e.clone()]
                }
            }),
            cmd: config.command.clone(),
            labels: Some(HashMap::from([(
                "ksail.owned".to_string(),
                "true".to_string(),
            )])),
            ..Default::default()
        };

        self.client
            .create_container(
                Some(CreateContainerOptions {
                    name: config.name.clone(),
                    platform: None,
                }),
                container_config,
            )
            .await
            .map_err(wrap(format!("creating container {}", config.name)))?;

        if config.detach {
            self.client
                .start_container(&config.name, None::<StartContainerOptions<String>>)
                .await
                .map_err(wrap(format!("starting container {}", config.name)))?;
        }

        Ok(())
    }
}

/// Configuration for running a Docker container.
#[derive(Debug, Clone, Default)]
pub struct ContainerRunConfig {
    pub name: String,
    pub hostname: Option<String>,
    pub image: String,
    pub detach: bool,
    pub privileged: bool,
    pub ports: Vec<(u16, u16)>,
    pub volumes: Vec<(String, String, String)>,
    pub env: Vec<(String, String)>,
    pub network: Option<String>,
    pub cgroupns_host: bool,
    pub pid_host: bool,
    pub entrypoint: Option<String>,
    pub command: Option<Vec<String>>,
}

/// Default Docker socket path on Linux; matches the teacher's platform detection.
pub fn default_socket_path() -> PathBuf {
    PathBuf::from("/var/run/docker.sock")
}
