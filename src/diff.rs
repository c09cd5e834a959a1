//! Diff Engine (C6): compares two frozen `ClusterSpec`s field-by-field on
//! their *effective* values and classifies every difference by how it can be
//! applied (§4.6).

use crate::spec::{ClusterSpec, Distribution};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeCategory {
    InPlace,
    RebootRequired,
    RecreateRequired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub field: String,
    pub old: String,
    pub new: String,
    pub category: ChangeCategory,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateResult {
    pub changes: Vec<Change>,
    pub applied_changes: Vec<Change>,
    pub failed_changes: Vec<(Change, String)>,
}

impl UpdateResult {
    pub fn total_changes(&self) -> usize {
        self.changes.len()
    }

    pub fn has_recreate_required(&self) -> bool {
        self.changes.iter().any(|c| c.category == ChangeCategory::RecreateRequired)
    }

    pub fn in_place_changes(&self) -> Vec<&Change> {
        self.changes.iter().filter(|c| c.category == ChangeCategory::InPlace).collect()
    }

    pub fn reboot_required_changes(&self) -> Vec<&Change> {
        self.changes
            .iter()
            .filter(|c| c.category == ChangeCategory::RebootRequired)
            .collect()
    }
}

struct FieldRule {
    field: &'static str,
    category: fn(&ClusterSpec) -> ChangeCategory,
    extract: fn(&ClusterSpec) -> String,
}

/// Every field the diff engine knows about, in the order §4.6's mandatory
/// rules table lists them. `localRegistry.registry` is the one field whose
/// category depends on the (old) spec's distribution, so its `category` is a
/// function rather than a constant.
fn rules() -> Vec<FieldRule> {
    vec![
        FieldRule { field: "distribution", category: |_| ChangeCategory::RecreateRequired, extract: |s| s.distribution.as_str().to_string() },
        FieldRule { field: "provider", category: |_| ChangeCategory::RecreateRequired, extract: |s| s.provider.as_str().to_string() },
        FieldRule { field: "cni", category: |_| ChangeCategory::InPlace, extract: |s| format!("{:?}", s.cni.effective()) },
        FieldRule { field: "csi", category: |_| ChangeCategory::InPlace, extract: |s| format!("{:?}", s.csi.effective(s.distribution, s.provider)) },
        FieldRule { field: "metricsServer", category: |_| ChangeCategory::InPlace, extract: |s| s.metrics_server.effective(true).to_string() },
        FieldRule { field: "loadBalancer", category: |_| ChangeCategory::InPlace, extract: load_balancer_extract },
        FieldRule { field: "certManager", category: |_| ChangeCategory::InPlace, extract: |s| s.cert_manager.effective(false).to_string() },
        FieldRule { field: "policyEngine", category: |_| ChangeCategory::InPlace, extract: |s| format!("{:?}", s.policy_engine) },
        FieldRule { field: "gitOpsEngine", category: |_| ChangeCategory::InPlace, extract: |s| format!("{:?}", s.git_ops_engine) },
        FieldRule { field: "localRegistry.registry", category: local_registry_category, extract: |s| s.local_registry.registry.clone() },
        FieldRule { field: "talos.controlPlanes", category: |_| ChangeCategory::InPlace, extract: |s| s.talos.control_planes.to_string() },
        FieldRule { field: "talos.workers", category: |_| ChangeCategory::InPlace, extract: |s| s.talos.workers.to_string() },
        FieldRule { field: "talos.iso", category: |_| ChangeCategory::InPlace, extract: |s| s.talos.iso.clone().unwrap_or_default() },
        FieldRule { field: "hetzner.controlPlaneServerType", category: |_| ChangeCategory::RecreateRequired, extract: |s| s.hetzner.control_plane_server_type.clone().unwrap_or_default() },
        FieldRule { field: "hetzner.workerServerType", category: |_| ChangeCategory::InPlace, extract: |s| s.hetzner.worker_server_type.clone().unwrap_or_default() },
        FieldRule { field: "hetzner.location", category: |_| ChangeCategory::RecreateRequired, extract: |s| s.hetzner.location.clone().unwrap_or_default() },
        FieldRule { field: "hetzner.networkName", category: |_| ChangeCategory::RecreateRequired, extract: |s| s.hetzner.network_name.clone().unwrap_or_default() },
        FieldRule { field: "hetzner.networkCidr", category: |_| ChangeCategory::RecreateRequired, extract: |s| s.hetzner.network_cidr.clone().unwrap_or_default() },
        FieldRule { field: "hetzner.sshKeyName", category: |_| ChangeCategory::InPlace, extract: |s| s.hetzner.ssh_key_name.clone().unwrap_or_default() },
        FieldRule { field: "vanilla.mirrorsDir", category: |_| ChangeCategory::RecreateRequired, extract: |s| s.vanilla.mirrors_dir.clone().unwrap_or_default() },
    ]
}

fn load_balancer_extract(s: &ClusterSpec) -> String {
    // VCluster delegates load-balancing to the host cluster: force both sides
    // of the comparison to read the same regardless of the spec's own value.
    if matches!(s.distribution, Distribution::VCluster) {
        return "delegated-to-host".to_string();
    }
    s.load_balancer.effective(true).to_string()
}

fn local_registry_category(old: &ClusterSpec) -> ChangeCategory {
    match old.distribution {
        Distribution::Vanilla => ChangeCategory::RecreateRequired,
        _ => ChangeCategory::InPlace,
    }
}

fn reason_for(field: &str, category: ChangeCategory) -> String {
    match category {
        ChangeCategory::RecreateRequired => format!("changing {field} requires recreating the cluster"),
        ChangeCategory::RebootRequired => format!("changing {field} requires a node reboot"),
        ChangeCategory::InPlace => format!("{field} can be applied to the running cluster"),
    }
}

/// Computes every field difference between `old` and `new`'s effective
/// values. `ComputeDiff(s, s)` is guaranteed empty since every `extract` fn is
/// pure over its own spec.
pub fn compute(old: &ClusterSpec, new: &ClusterSpec) -> UpdateResult {
    let mut changes = Vec::new();
    for rule in rules() {
        let old_value = (rule.extract)(old);
        let new_value = (rule.extract)(new);
        if old_value != new_value {
            let category = (rule.category)(old);
            changes.push(Change {
                field: rule.field.to_string(),
                old: old_value,
                new: new_value,
                reason: reason_for(rule.field, category),
                category,
            });
        }
    }
    UpdateResult { changes, ..Default::default() }
}

/// Merges a provisioner-local diff (e.g. a Hetzner-specific field the core
/// rules table doesn't know about) into the main diff, deduplicating by field
/// name with any leading `cluster.` prefix stripped (§4.6; §9 Open Question
/// notes this stripping could collide with a literal top-level field named
/// the same as a stripped nested one — no such collision exists in the
/// current field set, so it's accepted as-is).
pub fn merge_provisioner_diff(main: &mut UpdateResult, extra: &[Change]) {
    let mut seen: std::collections::HashSet<String> =
        main.changes.iter().map(|c| normalize_field(&c.field)).collect();
    for change in extra {
        let key = normalize_field(&change.field);
        if seen.insert(key) {
            main.changes.push(change.clone());
        }
    }
}

fn normalize_field(field: &str) -> String {
    field.strip_prefix("cluster.").unwrap_or(field).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::*;

    fn base_spec() -> ClusterSpec {
        ClusterSpec {
            name: "dev".to_string(),
            distribution: Distribution::K3s,
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
    fn identical_specs_have_no_changes() {
        let spec = base_spec();
        assert_eq!(compute(&spec, &spec).total_changes(), 0);
    }

    #[test]
    fn cni_change_is_in_place() {
        let old = base_spec();
        let mut new = base_spec();
        new.cni = Cni::Cilium;
        let result = compute(&old, &new);
        assert_eq!(result.total_changes(), 1);
        assert_eq!(result.changes[0].category, ChangeCategory::InPlace);
    }

    #[test]
    fn distribution_change_is_recreate_required() {
        let old = base_spec();
        let mut new = base_spec();
        new.distribution = Distribution::Vanilla;
        let result = compute(&old, &new);
        assert!(result.has_recreate_required());
    }

    #[test]
    fn local_registry_change_is_recreate_required_for_vanilla_but_in_place_for_k3s() {
        let mut old = base_spec();
        old.distribution = Distribution::Vanilla;
        let mut new = old.clone();
        new.local_registry = LocalRegistry { registry: "localhost:5050".to_string() };
        let result = compute(&old, &new);
        assert_eq!(result.changes[0].category, ChangeCategory::RecreateRequired);

        let old_k3s = base_spec();
        let mut new_k3s = old_k3s.clone();
        new_k3s.local_registry = LocalRegistry { registry: "localhost:5050".to_string() };
        let result_k3s = compute(&old_k3s, &new_k3s);
        assert_eq!(result_k3s.changes[0].category, ChangeCategory::InPlace);
    }

    #[test]
    fn vcluster_forces_load_balancer_equal_on_both_sides() {
        let mut old = base_spec();
        old.distribution = Distribution::VCluster;
        old.load_balancer = Toggle::Enabled;
        let mut new = old.clone();
        new.load_balancer = Toggle::Disabled;
        let result = compute(&old, &new);
        assert!(!result.changes.iter().any(|c| c.field == "loadBalancer"));
    }

    #[test]
    fn merge_provisioner_diff_is_idempotent_under_duplicate_calls() {
        let mut main = UpdateResult::default();
        let extra = vec![Change {
            field: "cluster.hetzner.extra".to_string(),
            old: "a".to_string(),
            new: "b".to_string(),
            category: ChangeCategory::InPlace,
            reason: "test".to_string(),
        }];
        merge_provisioner_diff(&mut main, &extra);
        merge_provisioner_diff(&mut main, &extra);
        assert_eq!(main.changes.len(), 1);
        assert_eq!(main.changes[0].field, "hetzner.extra");
    }
}
