//! The distribution×provider compatibility matrix (§3 invariants, §8
//! "creation aborts before any Docker or Kubernetes call is made").

use super::{Distribution, Provider};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompatibilityError {
    pub distribution: Distribution,
    pub provider: Provider,
}

impl fmt::Display for CompatibilityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} has no provisioner for provider {}",
            self.distribution.as_str(),
            self.provider.as_str()
        )
    }
}

/// Container-native distributions (Vanilla/Kind, K3s, Talos, VCluster) only
/// make sense on the local Docker engine; EKS-Anywhere and bare Talos also run
/// on Hetzner-provisioned VMs. VCluster never runs directly on Hetzner — it
/// nests inside an already-running host cluster.
pub fn compatible(distribution: Distribution, provider: Provider) -> Result<(), CompatibilityError> {
    let ok = match (distribution, provider) {
        (Distribution::Vanilla, Provider::Docker) => true,
        (Distribution::K3s, Provider::Docker) => true,
        (Distribution::K3s, Provider::Hetzner) => true,
        (Distribution::Talos, Provider::Docker) => true,
        (Distribution::Talos, Provider::Hetzner) => true,
        (Distribution::VCluster, Provider::Docker) => true,
        (Distribution::VCluster, Provider::Hetzner) => false,
        (Distribution::EksAnywhere, Provider::Hetzner) => true,
        (Distribution::EksAnywhere, Provider::Docker) => false,
        (Distribution::Vanilla, Provider::Hetzner) => false,
    };
    if ok {
        Ok(())
    } else {
        Err(CompatibilityError {
            distribution,
            provider,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vanilla_only_runs_on_docker() {
        assert!(compatible(Distribution::Vanilla, Provider::Docker).is_ok());
        assert!(compatible(Distribution::Vanilla, Provider::Hetzner).is_err());
    }

    #[test]
    fn eks_anywhere_requires_hetzner() {
        assert!(compatible(Distribution::EksAnywhere, Provider::Hetzner).is_ok());
        assert!(compatible(Distribution::EksAnywhere, Provider::Docker).is_err());
    }

    #[test]
    fn vcluster_never_runs_on_hetzner_directly() {
        assert!(compatible(Distribution::VCluster, Provider::Hetzner).is_err());
    }
}
