//! Shared process-spawn helper for distribution CLIs (`kind`, `k3d`,
//! `talosctl`, `vcluster`). Mirrors [`crate::helm::HelmClient::run`], which in
//! turn is grounded in the teacher's hook-executor shell-out pattern.

use crate::error::{Error, Result};
use std::time::Duration;
use tokio::process::Command;

pub async fn run(bin: &str, args: &[String], deadline: Duration) -> Result<String> {
    if which::which(bin).is_err() {
        return Err(Error::ConfigInvalid(format!(
            "required binary '{bin}' not found on PATH"
        )));
    }

    let mut command = Command::new(bin);
    command.args(args).kill_on_drop(true);

    let run = async {
        let output = command
            .output()
            .await
            .map_err(|e| Error::Process(format!("spawning {bin}"), e.into()))?;
        if !output.status.success() {
            return Err(Error::Process(
                format!("{bin} exited non-zero"),
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
