//! Kubernetes API plumbing shared by the Readiness Waiter (C2) and the
//! Installer Contract (C4): client construction, deployment/daemonset/node
//! status reads, ConfigMap/Secret/Namespace mutation, and Server-Side Apply
//! for add-on-owned custom resources.

use crate::error::{Error, Result};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Namespace, Node, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, DynamicObject, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Server-Side Apply field manager used for every add-on-owned resource this
/// crate creates directly (MetalLB pools, Flux/ArgoCD CRs, TLS secrets).
pub const FIELD_MANAGER: &str = "ksail";

/// Lazily-constructed, resettable Kubernetes client. Lazy because the cluster
/// frequently doesn't exist yet when a `K8sClient` is first wired into a
/// `CreationContext`; resettable because a kubeconfig written mid-pipeline
/// (right after cluster create) must be picked up without reconstructing the
/// whole context.
pub struct K8sClient {
    kubeconfig: Option<PathBuf>,
    context: Option<String>,
    client: Option<Client>,
}

impl K8sClient {
    pub fn new(kubeconfig: Option<PathBuf>, context: Option<String>) -> Self {
        Self {
            kubeconfig,
            context,
            client: None,
        }
    }

    pub async fn client(&mut self) -> Result<&Client> {
        if self.client.is_none() {
            let config = match &self.kubeconfig {
                Some(path) => {
                    let kubeconfig = Kubeconfig::read_from(path)
                        .map_err(|e| Error::ConfigInvalid(format!("reading kubeconfig: {e}")))?;
                    Config::from_custom_kubeconfig(
                        kubeconfig,
                        &KubeConfigOptions {
                            context: self.context.clone(),
                            ..Default::default()
                        },
                    )
                    .await
                    .map_err(|e| Error::ConfigInvalid(format!("building kube config: {e}")))?
                }
                None => Config::infer()
                    .await
                    .map_err(|e| Error::ConfigInvalid(format!("inferring kube config: {e}")))?,
            };
            let client = Client::try_from(config)
                .map_err(|e| Error::Kube("constructing client".to_string(), e))?;
            self.client = Some(client);
        }
        Ok(self.client.as_ref().expect("client initialized above"))
    }

    pub fn reset(&mut self) {
        self.client = None;
    }

    // ==================== Readiness reads ====================

    pub async fn deployment_status(&mut self, name: &str, namespace: &str) -> Result<DeploymentStatus> {
        let client = self.client().await?;
        let api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
        let deploy = api
            .get(name)
            .await
            .map_err(|e| Error::Kube(format!("getting deployment {namespace}/{name}"), e))?;

        let desired = deploy.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        let status = deploy.status.unwrap_or_default();
        Ok(DeploymentStatus {
            desired,
            available: status.available_replicas.unwrap_or(0),
            updated: status.updated_replicas.unwrap_or(0),
        })
    }

    pub async fn daemonset_status(&mut self, name: &str, namespace: &str) -> Result<DaemonSetStatus> {
        let client = self.client().await?;
        let api: Api<DaemonSet> = Api::namespaced(client.clone(), namespace);
        let ds = api
            .get(name)
            .await
            .map_err(|e| Error::Kube(format!("getting daemonset {namespace}/{name}"), e))?;

        let status = ds.status.ok_or_else(|| {
            Error::ConfigInvalid(format!("daemonset {namespace}/{name} has no status yet"))
        })?;
        Ok(DaemonSetStatus {
            desired_scheduled: status.desired_number_scheduled,
            unavailable: status.number_unavailable.unwrap_or(0),
            updated_scheduled: status.updated_number_scheduled.unwrap_or(0),
        })
    }

    pub async fn any_node_ready(&mut self) -> Result<bool> {
        let client = self.client().await?;
        let api: Api<Node> = Api::all(client.clone());
        let list = api
            .list(&Default::default())
            .await
            .map_err(|e| Error::Kube("listing nodes".to_string(), e))?;

        Ok(list.items.iter().any(|node| {
            node.status
                .as_ref()
                .and_then(|s| s.conditions.as_ref())
                .and_then(|conds| conds.iter().find(|c| c.type_ == "Ready"))
                .map(|c| c.status == "True")
                .unwrap_or(false)
        }))
    }

    pub async fn apiserver_version(&mut self) -> Result<String> {
        let client = self.client().await?;
        let version = client
            .apiserver_version()
            .await
            .map_err(|e| Error::Kube("fetching apiserver version".to_string(), e))?;
        Ok(format!("v{}.{}", version.major, version.minor))
    }

    // ==================== Mutations ====================

    /// Labels a namespace with the Pod Security Admission level, creating the
    /// namespace first if absent (Talos + MetalLB needs `privileged`).
    pub async fn label_namespace_privileged(&mut self, name: &str) -> Result<()> {
        let client = self.client().await?;
        let api: Api<Namespace> = Api::all(client.clone());

        let patch = serde_json::json!({
            "metadata": {
                "labels": {
                    "pod-security.kubernetes.io/enforce": "privileged",
                    "pod-security.kubernetes.io/audit": "privileged",
                    "pod-security.kubernetes.io/warn": "privileged",
                }
            }
        });

        match api
            .patch(name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                let ns = Namespace {
                    metadata: ObjectMeta {
                        name: Some(name.to_string()),
                        labels: Some(BTreeMap::from([
                            (
                                "pod-security.kubernetes.io/enforce".to_string(),
                                "privileged".to_string(),
                            ),
                            (
                                "pod-security.kubernetes.io/audit".to_string(),
                                "privileged".to_string(),
                            ),
                            (
                                "pod-security.kubernetes.io/warn".to_string(),
                                "privileged".to_string(),
                            ),
                        ])),
                        ..Default::default()
                    },
                    ..Default::default()
                };
                api.create(&PostParams::default(), &ns)
                    .await
                    .map_err(|e| Error::Kube(format!("creating namespace {name}"), e))?;
                Ok(())
            }
            Err(e) => Err(Error::Kube(format!("labeling namespace {name}"), e)),
        }
    }

    /// Creates the secret if absent, updates it otherwise; retries once on an
    /// `AlreadyExists` race against a concurrent creator.
    pub async fn ensure_opaque_secret(
        &mut self,
        name: &str,
        namespace: &str,
        data: BTreeMap<String, Vec<u8>>,
    ) -> Result<()> {
        let client = self.client().await?;
        let api: Api<Secret> = Api::namespaced(client.clone(), namespace);

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(
                data.into_iter()
                    .map(|(k, v)| (k, ByteString(v)))
                    .collect(),
            ),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        };

        match api.create(&PostParams::default(), &secret).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                // AlreadyExists: either a prior run or a concurrent creator won the race.
                let patch = serde_json::json!({ "data": secret.data });
                api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
                    .await
                    .map_err(|e| Error::Kube(format!("updating secret {namespace}/{name}"), e))?;
                Ok(())
            }
            Err(e) => Err(Error::Kube(format!("creating secret {namespace}/{name}"), e)),
        }
    }

    /// Server-Side Apply of an arbitrary manifest, field-managed by `ksail`.
    /// Falls back to `create` on a 404 from the dry patch path (new CRD instance).
    pub async fn apply_yaml(&mut self, yaml_content: &str) -> Result<()> {
        let client = self.client().await?;

        let value: serde_yml::Value = serde_yml::from_str(yaml_content)
            .map_err(|e| Error::ConfigInvalid(format!("parsing manifest yaml: {e}")))?;
        let api_version = value
            .get("apiVersion")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::ConfigInvalid("manifest missing apiVersion".to_string()))?;
        let kind = value
            .get("kind")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::ConfigInvalid("manifest missing kind".to_string()))?;
        let metadata = value
            .get("metadata")
            .ok_or_else(|| Error::ConfigInvalid("manifest missing metadata".to_string()))?;
        let name = metadata
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::ConfigInvalid("manifest missing metadata.name".to_string()))?;
        let namespace = metadata.get("namespace").and_then(|v| v.as_str());

        let (group, version) = match api_version.split_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), api_version.to_string()),
        };

        let ar = ApiResource {
            group,
            version,
            kind: kind.to_string(),
            api_version: api_version.to_string(),
            plural: format!("{}s", kind.to_lowercase()),
        };

        let obj: DynamicObject = serde_yml::from_str(yaml_content)
            .map_err(|e| Error::ConfigInvalid(format!("parsing manifest as object: {e}")))?;

        let api: Api<DynamicObject> = match namespace {
            Some(ns) => Api::namespaced_with(client.clone(), ns, &ar),
            None => Api::all_with(client.clone(), &ar),
        };

        match api
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&obj))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                api.create(&PostParams::default(), &obj)
                    .await
                    .map_err(|e| Error::Kube(format!("creating {kind}/{name}"), e))?;
                Ok(())
            }
            Err(e) => Err(Error::Kube(format!("applying {kind}/{name}"), e)),
        }
    }

    pub async fn delete_custom_resource(
        &mut self,
        api_version: &str,
        kind: &str,
        name: &str,
        namespace: &str,
    ) -> Result<()> {
        let client = self.client().await?;
        let (group, version) = match api_version.split_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), api_version.to_string()),
        };
        let ar = ApiResource {
            group,
            version,
            kind: kind.to_string(),
            api_version: api_version.to_string(),
            plural: format!("{}s", kind.to_lowercase()),
        };
        let api: Api<DynamicObject> = Api::namespaced_with(client.clone(), namespace, &ar);
        let _ = api.delete(name, &Default::default()).await;
        Ok(())
    }

    /// Removes cluster/context/user entries from a kubeconfig on disk,
    /// mirroring `kubectl config delete-cluster/context/user`.
    pub async fn remove_kubeconfig_entries(
        kubeconfig_path: &PathBuf,
        cluster_name: &str,
        context_name: &str,
        user_name: &str,
    ) -> Result<()> {
        if !kubeconfig_path.exists() {
            return Ok(());
        }

        let mut kubeconfig = Kubeconfig::read_from(kubeconfig_path)
            .map_err(|e| Error::ConfigInvalid(format!("reading kubeconfig: {e}")))?;

        kubeconfig.clusters.retain(|c| c.name != cluster_name);
        kubeconfig.contexts.retain(|c| c.name != context_name);
        kubeconfig.auth_infos.retain(|a| a.name != user_name);
        if kubeconfig.current_context.as_deref() == Some(context_name) {
            kubeconfig.current_context = kubeconfig.contexts.first().map(|c| c.name.clone());
        }

        let yaml = serde_yml::to_string(&kubeconfig)
            .map_err(|e| Error::ConfigInvalid(format!("serializing kubeconfig: {e}")))?;
        tokio::fs::write(kubeconfig_path, yaml)
            .await
            .map_err(|e| Error::Io(format!("writing {}", kubeconfig_path.display()), e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(kubeconfig_path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| Error::Io("setting kubeconfig mode".to_string(), e))?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DeploymentStatus {
    pub desired: i32,
    pub available: i32,
    pub updated: i32,
}

impl DeploymentStatus {
    pub fn is_ready(&self) -> bool {
        self.available == self.desired && self.updated == self.desired
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DaemonSetStatus {
    pub desired_scheduled: i32,
    pub unavailable: i32,
    pub updated_scheduled: i32,
}

impl DaemonSetStatus {
    pub fn is_ready(&self) -> bool {
        self.desired_scheduled > 0
            && self.unavailable == 0
            && self.updated_scheduled == self.desired_scheduled
    }
}
