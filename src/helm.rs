//! A thin async wrapper around the `helm` binary. Every installer (C4) talks
//! to Helm exclusively through this module; nothing else shells out to it.
//!
//! Grounded in the same `tokio::process::Command` + stdout/stderr capture
//! pattern the teacher uses for its hook executor, generalized from
//! one-shot shell commands to a small typed Helm client.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;

/// Declarative description of one Helm release.
#[derive(Debug, Clone)]
pub struct HelmChart {
    pub release_name: String,
    pub chart_name: String,
    pub namespace: String,
    pub repo_url: Option<String>,
    pub version: Option<String>,
    pub values: BTreeMap<String, serde_json::Value>,
    pub create_namespace: bool,
    pub atomic: bool,
    pub wait: bool,
    pub wait_for_jobs: bool,
    pub timeout: Duration,
}

impl HelmChart {
    pub fn new(release_name: impl Into<String>, chart_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            release_name: release_name.into(),
            chart_name: chart_name.into(),
            namespace: namespace.into(),
            repo_url: None,
            version: None,
            values: BTreeMap::new(),
            create_namespace: true,
            atomic: true,
            wait: true,
            wait_for_jobs: false,
            timeout: Duration::from_secs(300),
        }
    }
}

pub struct HelmClient {
    kubeconfig: PathBuf,
    context: Option<String>,
}

impl HelmClient {
    pub fn new(kubeconfig: PathBuf, context: Option<String>) -> Self {
        Self { kubeconfig, context }
    }

    /// Install-or-upgrade, never install-only: every installer must be
    /// re-runnable against an already-installed release.
    pub async fn upgrade_install(&self, chart: &HelmChart) -> Result<()> {
        let mut args = vec![
            "upgrade".to_string(),
            chart.release_name.clone(),
            chart.chart_name.clone(),
            "--install".to_string(),
            "--namespace".to_string(),
            chart.namespace.clone(),
        ];

        if chart.create_namespace {
            args.push("--create-namespace".to_string());
        }
        if chart.atomic {
            args.push("--atomic".to_string());
        }
        if chart.wait {
            args.push("--wait".to_string());
        }
        if chart.wait_for_jobs {
            args.push("--wait-for-jobs".to_string());
        }
        args.push("--timeout".to_string());
        args.push(format!("{}s", chart.timeout.as_secs()));

        if let Some(repo) = &chart.repo_url {
            args.push("--repo".to_string());
            args.push(repo.clone());
        }
        if let Some(version) = &chart.version {
            args.push("--version".to_string());
            args.push(version.clone());
        }

        let values_file = self.write_values_file(chart).await?;
        if let Some(path) = &values_file {
            args.push("--values".to_string());
            args.push(path.to_string_lossy().to_string());
        }

        // Context deadline is kept slightly above the declared Helm timeout so
        // cancellation, not our own process kill, is what interrupts a hung wait.
        let process_deadline = chart.timeout + Duration::from_secs(15);
        self.run(&args, process_deadline).await.map(|_| ())
    }

    /// Best-effort: must not fail if the release is already absent.
    pub async fn uninstall(&self, release_name: &str, namespace: &str) -> Result<()> {
        let args = [
            "uninstall".to_string(),
            release_name.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "--ignore-not-found".to_string(),
        ];
        let _ = self.run(&args, Duration::from_secs(120)).await;
        Ok(())
    }

    /// Renders the chart without installing and returns every distinct
    /// container image referenced, for pre-pull/cache usage.
    pub async fn template_images(&self, chart: &HelmChart) -> Result<Vec<String>> {
        let mut args = vec![
            "template".to_string(),
            chart.release_name.clone(),
            chart.chart_name.clone(),
            "--namespace".to_string(),
            chart.namespace.clone(),
        ];
        if let Some(repo) = &chart.repo_url {
            args.push("--repo".to_string());
            args.push(repo.clone());
        }
        if let Some(version) = &chart.version {
            args.push("--version".to_string());
            args.push(version.clone());
        }
        let values_file = self.write_values_file(chart).await?;
        if let Some(path) = &values_file {
            args.push("--values".to_string());
            args.push(path.to_string_lossy().to_string());
        }

        let rendered = self.run(&args, Duration::from_secs(60)).await?;
        Ok(extract_images(&rendered))
    }

    async fn write_values_file(&self, chart: &HelmChart) -> Result<Option<PathBuf>> {
        if chart.values.is_empty() {
            return Ok(None);
        }
        let path = std::env::temp_dir().join(format!("ksail-{}-values.json", chart.release_name));
        let json = serde_json::to_vec(&chart.values)
            .map_err(|e| Error::Serialization("encoding helm values".to_string(), e))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| Error::Io(format!("writing {}", path.display()), e))?;
        Ok(Some(path))
    }

    async fn run(&self, args: &[String], deadline: Duration) -> Result<String> {
        if which::which("helm").is_err() {
            return Err(Error::ConfigInvalid("required binary 'helm' not found on PATH".to_string()));
        }

        let mut command = Command::new("helm");
        command
            .args(args)
            .env("KUBECONFIG", &self.kubeconfig)
            .kill_on_drop(true);
        if let Some(context) = &self.context {
            command.arg("--kube-context").arg(context);
        }

        let run = async {
            let output = command
                .output()
                .await
                .map_err(|e| Error::Process("spawning helm".to_string(), e.into()))?;
            if !output.status.success() {
                return Err(Error::Process(
                    "helm exited non-zero".to_string(),
                    anyhow::anyhow!(String::from_utf8_lossy(&output.stderr).into_owned()),
                ));
            }
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        };

        match tokio::time::timeout(deadline, run).await {
            Ok(result) => result,
            Err(_) => Err(Error::TimeoutExceeded(deadline)),
        }
    }
}

fn extract_images(rendered_yaml: &str) -> Vec<String> {
    let mut images = Vec::new();
    for doc in rendered_yaml.split("\n---") {
        if let Ok(value) = serde_yml::from_str::<serde_yml::Value>(doc) {
            collect_images(&value, &mut images);
        }
    }
    images.sort();
    images.dedup();
    images
}

fn collect_images(value: &serde_yml::Value, out: &mut Vec<String>) {
    match value {
        serde_yml::Value::Mapping(map) => {
            for (k, v) in map {
                if k.as_str() == Some("image") {
                    if let Some(image) = v.as_str() {
                        out.push(image.to_string());
                    }
                } else {
                    collect_images(v, out);
                }
            }
        }
        serde_yml::Value::Sequence(seq) => {
            for v in seq {
                collect_images(v, out);
            }
        }
        _ => {}
    }
}
