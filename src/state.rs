//! Cluster State Store (C1): persists the at-creation `ClusterSpec` keyed by
//! cluster name, so later commands (update, delete, status) can diff against
//! what was actually created rather than trusting the user's current config
//! file to still match reality.

use crate::error::{Error, Result};
use crate::spec::ClusterSpec;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// JSON-on-disk persistence for `ClusterSpec`, one file per cluster under a
/// user-scoped directory. Reads are idempotent; writes are atomic
/// (temp file + rename) so a crash mid-write never leaves a truncated file.
#[derive(Clone)]
pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// `~/.ksail/state`, mirroring the teacher's own `~/.k3dev` convention.
    pub fn default_root() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::ConfigInvalid("cannot resolve home directory".to_string()))?;
        Ok(Self::new(home.join(".ksail").join("state")))
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name).join("spec.json")
    }

    /// Persists `spec` under `name`, creating parent directories with owner-only
    /// permissions. Idempotent: overwrites any prior snapshot for the same name.
    pub async fn save(&self, name: &str, spec: &ClusterSpec) -> Result<()> {
        let path = self.path_for(name);
        let dir = path.parent().expect("state path always has a parent");
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| Error::Io(format!("creating state dir {}", dir.display()), e))?;
        set_dir_mode(dir, 0o700)?;

        let json = serde_json::to_vec_pretty(spec)
            .map_err(|e| Error::Serialization("encoding cluster spec".to_string(), e))?;

        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json)
            .await
            .map_err(|e| Error::Io(format!("writing {}", tmp_path.display()), e))?;
        set_file_mode(&tmp_path, 0o600)?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| Error::Io(format!("renaming into {}", path.display()), e))?;

        Ok(())
    }

    /// Loads the persisted spec for `name`, or `Error::StateNotFound` if absent.
    pub async fn load(&self, name: &str) -> Result<ClusterSpec> {
        let path = self.path_for(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| Error::Serialization(format!("decoding {}", path.display()), e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::StateNotFound(name.to_string()))
            }
            Err(e) => Err(Error::Io(format!("reading {}", path.display()), e)),
        }
    }

    /// Removes the per-cluster directory. A no-op if the cluster has no persisted state.
    pub async fn delete(&self, name: &str) -> Result<()> {
        let dir = self.root.join(name);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Io(format!("removing {}", dir.display()), e)),
        }
    }

    pub async fn exists(&self, name: &str) -> bool {
        tokio::fs::metadata(self.path_for(name)).await.is_ok()
    }
}

#[cfg(unix)]
fn set_dir_mode(dir: &Path, mode: u32) -> Result<()> {
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(mode))
        .map_err(|e| Error::Io(format!("setting mode on {}", dir.display()), e))
}

#[cfg(not(unix))]
fn set_dir_mode(_dir: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn set_file_mode(path: &Path, mode: u32) -> Result<()> {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| Error::Io(format!("setting mode on {}", path.display()), e))
}

#[cfg(not(unix))]
fn set_file_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{ClusterSpec, Distribution, Provider};

    fn sample_spec(name: &str) -> ClusterSpec {
        ClusterSpec {
            name: name.to_string(),
            distribution: Distribution::Vanilla,
            provider: Provider::Docker,
            cni: Default::default(),
            csi: Default::default(),
            metrics_server: Default::default(),
            cert_manager: Default::default(),
            load_balancer: Default::default(),
            policy_engine: Default::default(),
            git_ops_engine: Default::default(),
            local_registry: Default::default(),
            mirror_registries: Vec::new(),
            talos: Default::default(),
            hetzner: Default::default(),
            vanilla: Default::default(),
            connection: Default::default(),
            workload: Default::default(),
        }
    }

    #[tokio::test]
    async fn save_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().to_path_buf());
        let spec = sample_spec("dev");

        store.save("dev", &spec).await.unwrap();
        let loaded = store.load("dev").await.unwrap();
        assert_eq!(loaded.name, spec.name);
        assert!(spec.effective_eq(&loaded));
    }

    #[tokio::test]
    async fn delete_then_load_is_state_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().to_path_buf());
        let spec = sample_spec("dev");

        store.save("dev", &spec).await.unwrap();
        store.delete("dev").await.unwrap();

        match store.load("dev").await {
            Err(Error::StateNotFound(name)) => assert_eq!(name, "dev"),
            other => panic!("expected StateNotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn delete_on_missing_cluster_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().to_path_buf());
        store.delete("never-existed").await.unwrap();
    }
}
