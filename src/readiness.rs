//! Readiness Waiter (C2): polls Kubernetes objects (and the API server
//! itself) until healthy or a deadline elapses.

use crate::error::{Error, Result};
use crate::k8s::K8sClient;
use std::time::{Duration, Instant};
use tokio::time::sleep;

const POLL_PERIOD: Duration = Duration::from_secs(2);
const API_SERVER_STABLE_CONSECUTIVE: u32 = 3;

#[derive(Debug, Clone)]
pub enum Check {
    Deployment { name: String, namespace: String },
    DaemonSet { name: String, namespace: String },
    Node,
    ApiServerStable,
}

pub struct ReadinessWaiter<'a> {
    client: &'a mut K8sClient,
}

impl<'a> ReadinessWaiter<'a> {
    pub fn new(client: &'a mut K8sClient) -> Self {
        Self { client }
    }

    /// Polls a single check at `POLL_PERIOD` until its predicate holds or
    /// `deadline` elapses. List/get errors are treated as transient and
    /// retried; only deadline expiry is fatal.
    pub async fn wait_for(&mut self, check: &Check, deadline: Duration) -> Result<()> {
        let start = Instant::now();
        let mut consecutive_ok = 0u32;

        loop {
            if start.elapsed() >= deadline {
                return Err(Error::TimeoutExceeded(deadline));
            }

            let ready = match self.probe(check).await {
                Ok(ready) => ready,
                Err(e) if e.is_transient() => false,
                Err(e) => return Err(e),
            };

            if ready {
                consecutive_ok += 1;
                let needs = match check {
                    Check::ApiServerStable => API_SERVER_STABLE_CONSECUTIVE,
                    _ => 1,
                };
                if consecutive_ok >= needs {
                    return Ok(());
                }
            } else {
                consecutive_ok = 0;
            }

            let remaining = deadline.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Err(Error::TimeoutExceeded(deadline));
            }
            sleep(POLL_PERIOD.min(remaining)).await;
        }
    }

    /// Waits for every check, honoring a single total deadline rather than a
    /// per-check one: the first timeout aborts the whole call.
    pub async fn wait_for_many(&mut self, checks: &[Check], deadline: Duration) -> Result<()> {
        let start = Instant::now();
        for check in checks {
            let remaining = deadline.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Err(Error::TimeoutExceeded(deadline));
            }
            self.wait_for(check, remaining).await?;
        }
        Ok(())
    }

    async fn probe(&mut self, check: &Check) -> Result<bool> {
        match check {
            Check::Deployment { name, namespace } => {
                let status = self.client.deployment_status(name, namespace).await?;
                Ok(status.is_ready())
            }
            Check::DaemonSet { name, namespace } => {
                let status = self.client.daemonset_status(name, namespace).await?;
                Ok(status.is_ready())
            }
            Check::Node => self.client.any_node_ready().await,
            Check::ApiServerStable => match self.client.apiserver_version().await {
                Ok(_) => Ok(true),
                Err(e) => Err(e),
            },
        }
    }
}

/// Polls `GET <base_url>/v2/` until it returns 200 or 401 (both indicate the
/// registry is serving), used by the Registry Provisioner's
/// `WaitForLocalRegistryReady` stage.
pub async fn wait_for_http_ready(url: &str, deadline: Duration) -> Result<()> {
    let start = Instant::now();
    let client = reqwest::Client::new();
    loop {
        if start.elapsed() >= deadline {
            return Err(Error::TimeoutExceeded(deadline));
        }
        if let Ok(resp) = client.get(url).send().await {
            let status = resp.status();
            if status == reqwest::StatusCode::OK || status == reqwest::StatusCode::UNAUTHORIZED {
                return Ok(());
            }
        }
        let remaining = deadline.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            return Err(Error::TimeoutExceeded(deadline));
        }
        sleep(POLL_PERIOD.min(remaining)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn zero_deadline_times_out_fast() {
        let mut client = K8sClient::new(None, None);
        let mut waiter = ReadinessWaiter::new(&mut client);
        let start = Instant::now();
        let result = waiter.wait_for(&Check::Node, Duration::from_secs(0)).await;
        assert!(matches!(result, Err(Error::TimeoutExceeded(_))));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
