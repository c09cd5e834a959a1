//! Configuration loading (SPEC_FULL §A.3): resolves a `ClusterSpec` plus the
//! ambient `LoggingConfig` from a YAML file on disk, searched the way the
//! teacher's `ConfigLoader` walks a fixed list of candidate paths.

use crate::error::{Error, Result};
use crate::spec::ClusterSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_log_file")]
    pub file: String,
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            file: default_log_file(),
            level: default_log_level(),
        }
    }
}

fn default_enabled() -> bool {
    true
}
fn default_log_file() -> String {
    "~/.ksail/logs/{cluster_name}.log".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

/// The on-disk shape of `ksail.yaml`: the cluster intent plus ambient config
/// that doesn't belong on `ClusterSpec` itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub cluster: ClusterSpec,
    #[serde(default)]
    pub logging: LoggingConfig,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `explicit_path` if given, otherwise searches `./ksail.yaml`, the
    /// user config directory, then `/etc/ksail/`, in that order.
    pub fn load(explicit_path: Option<&Path>) -> Result<FileConfig> {
        let path = match explicit_path {
            Some(p) => p.to_path_buf(),
            None => Self::discover()
                .ok_or_else(|| Error::ConfigInvalid("no ksail.yaml found in any search path".to_string()))?,
        };

        let raw = std::fs::read_to_string(&path)
            .map_err(|e| Error::Io(format!("reading {}", path.display()), e))?;
        let expanded = expand_home(&raw);

        serde_yml::from_str(&expanded)
            .map_err(|e| Error::ConfigInvalid(format!("parsing {}: {e}", path.display())))
    }

    fn discover() -> Option<PathBuf> {
        let mut candidates = vec![PathBuf::from("./ksail.yaml")];
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("ksail").join("ksail.yaml"));
        }
        candidates.push(PathBuf::from("/etc/ksail/ksail.yaml"));

        candidates.into_iter().find(|p| p.exists())
    }
}

/// Expands a leading `~` to the user's home directory in any string value;
/// applied to the whole file before parsing so it works uniformly across
/// every path-shaped field (`vanilla.mirrorsDir`, `logging.file`, etc.).
fn expand_home(content: &str) -> String {
    let Some(home) = dirs::home_dir() else {
        return content.to_string();
    };
    let home = home.to_string_lossy();
    content.replace("~/", &format!("{home}/"))
}

/// CLI override surface is out of scope (§1 Non-goal a), but callers that do
/// parse flags need a pure function to apply `--name`/`--context` overrides
/// onto a loaded config without re-implementing merge logic.
pub fn apply_overrides(mut config: FileConfig, name: Option<String>, context: Option<String>) -> FileConfig {
    if let Some(name) = name {
        config.cluster.name = name;
    }
    if let Some(context) = context {
        config.cluster.connection.context = Some(context);
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_home_replaces_leading_tilde() {
        let expanded = expand_home("file: ~/.ksail/logs/x.log");
        assert!(!expanded.contains('~'));
    }

    #[test]
    fn load_missing_path_errors() {
        let err = ConfigLoader::load(Some(Path::new("/nonexistent/ksail.yaml")));
        assert!(err.is_err());
    }
}
