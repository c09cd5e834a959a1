//! The `ClusterSpec` data model: the unit of intent the rest of the crate
//! operates on. Everything downstream — diffing, planning, provisioning,
//! installing — reads a frozen `ClusterSpec` and nothing else.

mod matrix;

pub use matrix::{compatible, CompatibilityError};

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

static DNS_1123: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("valid DNS-1123 regex"));

static ENV_SUBST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}").expect("valid env regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Distribution {
    Vanilla,
    K3s,
    Talos,
    VCluster,
    EksAnywhere,
}

impl Distribution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Distribution::Vanilla => "Vanilla",
            Distribution::K3s => "K3s",
            Distribution::Talos => "Talos",
            Distribution::VCluster => "VCluster",
            Distribution::EksAnywhere => "EksAnywhere",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Provider {
    Docker,
    Hetzner,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Docker => "Docker",
            Provider::Hetzner => "Hetzner",
        }
    }
}

/// A generic three-way toggle: `Default` resolves via [`Toggle::effective`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub enum Toggle {
    #[default]
    Default,
    Enabled,
    Disabled,
}

impl Toggle {
    /// Resolves `Default` to a concrete enabled/disabled value for the given
    /// distribution. Non-default values resolve to themselves.
    pub fn effective(&self, default_enabled: bool) -> bool {
        match self {
            Toggle::Default => default_enabled,
            Toggle::Enabled => true,
            Toggle::Disabled => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub enum Cni {
    #[default]
    Default,
    None,
    Cilium,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CniResolved {
    Bundled,
    None,
    Cilium,
}

impl Cni {
    pub fn effective(&self) -> CniResolved {
        match self {
            Cni::Default => CniResolved::Bundled,
            Cni::None => CniResolved::None,
            Cni::Cilium => CniResolved::Cilium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub enum Csi {
    #[default]
    Default,
    Enabled,
    Disabled,
    LocalPathStorage,
    HetznerCSI,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CsiResolved {
    Disabled,
    LocalPathStorage,
    HetznerCSI,
}

impl Csi {
    /// Default/Enabled resolve to a concrete CSI driver based on distribution and
    /// provider; Hetzner's managed CSI wins when the provider is Hetzner, local-path
    /// storage otherwise, and Talos/VCluster default to disabled (no bundled CSI).
    pub fn effective(&self, distribution: Distribution, provider: Provider) -> CsiResolved {
        let implied = match (distribution, provider) {
            (_, Provider::Hetzner) => CsiResolved::HetznerCSI,
            (Distribution::Vanilla | Distribution::K3s, Provider::Docker) => {
                CsiResolved::LocalPathStorage
            }
            _ => CsiResolved::Disabled,
        };
        match self {
            Csi::Default | Csi::Enabled => implied,
            Csi::Disabled => CsiResolved::Disabled,
            Csi::LocalPathStorage => CsiResolved::LocalPathStorage,
            Csi::HetznerCSI => CsiResolved::HetznerCSI,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub enum PolicyEngine {
    #[default]
    None,
    Kyverno,
    Gatekeeper,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub enum GitOpsEngine {
    #[default]
    None,
    Flux,
    ArgoCD,
}

/// `[user:pass@]host[:port][/path]`; an empty string means "no local registry".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LocalRegistry {
    pub registry: String,
}

impl LocalRegistry {
    pub fn is_empty(&self) -> bool {
        self.registry.trim().is_empty()
    }

    pub fn host(&self) -> Result<String> {
        parse_registry_ref(&self.registry).map(|r| r.host)
    }
}

/// `[user:pass@]host[=upstream]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorRegistry {
    pub spec: String,
}

pub struct ParsedRegistryRef {
    pub user: Option<String>,
    pub pass: Option<String>,
    pub host: String,
    pub upstream: Option<String>,
}

/// Parses `[user:pass@]host[=upstream]`, resolving `${VAR}`/`${VAR:-default}`
/// substitutions against the process environment.
pub fn parse_registry_ref(raw: &str) -> Result<ParsedRegistryRef> {
    let resolved = resolve_env_placeholders(raw)?;
    let (creds, rest) = match resolved.split_once('@') {
        Some((c, r)) => (Some(c.to_string()), r.to_string()),
        None => (None, resolved),
    };
    let (host, upstream) = match rest.split_once('=') {
        Some((h, u)) => (h.to_string(), Some(u.to_string())),
        None => (rest, None),
    };
    let (user, pass) = match creds {
        Some(c) => match c.split_once(':') {
            Some((u, p)) => (Some(u.to_string()), Some(p.to_string())),
            None => (Some(c), None),
        },
        None => (None, None),
    };
    Ok(ParsedRegistryRef {
        user,
        pass,
        host,
        upstream,
    })
}

fn resolve_env_placeholders(raw: &str) -> Result<String> {
    let mut out = String::new();
    let mut last = 0;
    for caps in ENV_SUBST.captures_iter(raw) {
        let whole = caps.get(0).expect("capture group 0 is always present");
        out.push_str(&raw[last..whole.start()]);
        let var = &caps[1];
        let default = caps.get(3).map(|m| m.as_str());
        match (std::env::var(var).ok(), default) {
            (Some(v), _) => out.push_str(&v),
            (None, Some(d)) => out.push_str(d),
            (None, None) => {
                return Err(Error::UnresolvedSubstitution(raw.to_string()));
            }
        }
        last = whole.end();
    }
    out.push_str(&raw[last..]);
    Ok(out)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TalosSpec {
    #[serde(default = "default_control_planes")]
    pub control_planes: u32,
    #[serde(default = "default_workers")]
    pub workers: u32,
    #[serde(default)]
    pub iso: Option<String>,
}

fn default_control_planes() -> u32 {
    1
}
fn default_workers() -> u32 {
    1
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HetznerSpec {
    pub control_plane_server_type: Option<String>,
    pub worker_server_type: Option<String>,
    pub location: Option<String>,
    pub network_name: Option<String>,
    pub network_cidr: Option<String>,
    pub ssh_key_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VanillaSpec {
    pub mirrors_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionSpec {
    pub context: Option<String>,
    pub kubeconfig: Option<String>,
    #[serde(default = "default_connection_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_connection_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub source_directory: Option<String>,
    pub import_images: Option<String>,
}

/// The unit of intent: a complete, declarative description of one cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSpec {
    pub name: String,
    pub distribution: Distribution,
    pub provider: Provider,
    #[serde(default)]
    pub cni: Cni,
    #[serde(default)]
    pub csi: Csi,
    #[serde(default)]
    pub metrics_server: Toggle,
    #[serde(default)]
    pub cert_manager: Toggle,
    #[serde(default)]
    pub load_balancer: Toggle,
    #[serde(default)]
    pub policy_engine: PolicyEngine,
    #[serde(default)]
    pub git_ops_engine: GitOpsEngine,
    #[serde(default)]
    pub local_registry: LocalRegistry,
    #[serde(default)]
    pub mirror_registries: Vec<MirrorRegistry>,
    #[serde(default)]
    pub talos: TalosSpec,
    #[serde(default)]
    pub hetzner: HetznerSpec,
    #[serde(default)]
    pub vanilla: VanillaSpec,
    #[serde(default)]
    pub connection: ConnectionSpec,
    #[serde(default)]
    pub workload: WorkloadSpec,
}

impl ClusterSpec {
    /// Validates name syntax, the distribution×provider matrix, and registry
    /// host uniqueness. Must run before any side-effect is attempted (§8).
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.len() > 63 || !DNS_1123.is_match(&self.name) {
            return Err(Error::ConfigInvalid(format!(
                "cluster name '{}' is not a valid DNS-1123 label",
                self.name
            )));
        }

        if let Err(reason) = compatible(self.distribution, self.provider) {
            tracing::debug!(reason = %reason, "incompatible combination rejected");
            return Err(Error::IncompatibleCombination {
                distribution: self.distribution.as_str().to_string(),
                provider: self.provider.as_str().to_string(),
            });
        }

        let mut hosts: HashSet<String> = HashSet::new();
        if !self.local_registry.is_empty() {
            let host = self.local_registry.host()?;
            hosts.insert(host);
        }
        for mirror in &self.mirror_registries {
            let parsed = parse_registry_ref(&mirror.spec)?;
            if !hosts.insert(parsed.host.clone()) {
                return Err(Error::ConfigInvalid(format!(
                    "duplicate registry host '{}'",
                    parsed.host
                )));
            }
        }

        Ok(())
    }

    /// Two specs are semantically equal iff every tri-state field resolves to
    /// the same effective value (§3 invariants).
    pub fn effective_eq(&self, other: &ClusterSpec) -> bool {
        crate::diff::compute(self, other).total_changes() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_spec() -> ClusterSpec {
        ClusterSpec {
            name: "dev".to_string(),
            distribution: Distribution::Vanilla,
            provider: Provider::Docker,
            cni: Cni::Default,
            csi: Csi::Default,
            metrics_server: Toggle::Default,
            cert_manager: Toggle::Default,
            load_balancer: Toggle::Default,
            policy_engine: PolicyEngine::None,
            git_ops_engine: GitOpsEngine::None,
            local_registry: LocalRegistry::default(),
            mirror_registries: Vec::new(),
            talos: TalosSpec::default(),
            hetzner: HetznerSpec::default(),
            vanilla: VanillaSpec::default(),
            connection: ConnectionSpec::default(),
            workload: WorkloadSpec::default(),
        }
    }

    #[test]
    fn rejects_invalid_name() {
        let mut spec = base_spec();
        spec.name = "Not_Valid".to_string();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn rejects_incompatible_combination() {
        let mut spec = base_spec();
        spec.distribution = Distribution::Talos;
        spec.provider = Provider::Hetzner;
        // Talos+Hetzner is a supported combination; VCluster+Hetzner is not.
        spec.distribution = Distribution::VCluster;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_registry_hosts() {
        let mut spec = base_spec();
        spec.local_registry = LocalRegistry {
            registry: "localhost:5050".to_string(),
        };
        spec.mirror_registries = vec![MirrorRegistry {
            spec: "localhost:5050=https://registry-1.docker.io".to_string(),
        }];
        assert!(spec.validate().is_err());
    }

    #[test]
    fn resolves_env_placeholder_with_default() {
        let parsed = parse_registry_ref("${MISSING_VAR:-anonymous}:@host").unwrap();
        assert_eq!(parsed.user.as_deref(), Some("anonymous"));
        assert_eq!(parsed.host, "host");
    }

    #[test]
    fn fails_on_unresolved_placeholder() {
        let err = parse_registry_ref("${DEFINITELY_UNSET_KSAIL_VAR}@host");
        assert!(err.is_err());
    }
}
