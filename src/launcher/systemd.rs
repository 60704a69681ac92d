use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{JqsError, Result};
use crate::launcher::Launcher;
use crate::store::JobRecord;

/// Runs jobs as transient systemd user units with `CPUQuota` and
/// `MemoryMax` as the hard resource limits.
#[derive(Debug, Clone)]
pub struct SystemdLauncher {
    kill_grace: Duration,
}

impl SystemdLauncher {
    pub fn new(kill_grace: Duration) -> Self {
        Self { kill_grace }
    }

    /// `systemctl show` the unit and parse the properties we care about.
    async fn probe(&self, handle: &str) -> Result<UnitStatus> {
        let output = Command::new("systemctl")
            .args([
                "--user",
                "show",
                "--property=LoadState,ActiveState,SubState,ExecMainStatus",
                handle,
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Ok(UnitStatus::Gone);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let props: HashMap<&str, &str> = stdout
            .lines()
            .filter_map(|line| line.split_once('='))
            .collect();

        if props.get("LoadState").copied() == Some("not-found") {
            return Ok(UnitStatus::Gone);
        }

        let active = props.get("ActiveState").copied().unwrap_or("");
        let sub = props.get("SubState").copied().unwrap_or("");
        if matches!(active, "inactive" | "failed") && matches!(sub, "exited" | "dead" | "failed") {
            let mut code: i32 = props
                .get("ExecMainStatus")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            // A failed unit with status 0 died to a signal; surface it as
            // a failure rather than a clean exit.
            if active == "failed" && code == 0 {
                code = 1;
            }
            return Ok(UnitStatus::Exited(code));
        }

        Ok(UnitStatus::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitStatus {
    Active,
    Exited(i32),
    Gone,
}

#[async_trait]
impl Launcher for SystemdLauncher {
    fn handle(&self, jobid: u64) -> String {
        format!("jqs-job-{jobid}")
    }

    async fn launch(&self, record: &JobRecord) -> Result<String> {
        // The workdir must exist by launch time; submission does not check.
        if !record.workdir.is_dir() {
            return Err(JqsError::Launch(format!(
                "workdir {} does not exist",
                record.workdir.display()
            )));
        }

        let handle = self.handle(record.jobid);
        let output = Command::new("systemd-run")
            .args(["--user", "--unit", handle.as_str(), "--collect"])
            .arg(format!("--property=CPUQuota={}%", record.cores as u64 * 100))
            .arg(format!("--property=MemoryMax={}M", record.mem_mb))
            .arg(format!(
                "--property=WorkingDirectory={}",
                record.workdir.display()
            ))
            .arg(format!(
                "--property=StandardOutput=append:{}",
                record.stdout_path.display()
            ))
            .arg(format!(
                "--property=StandardError=append:{}",
                record.stderr_path.display()
            ))
            .arg("--property=KillMode=mixed")
            .arg(format!(
                "--property=TimeoutStopSec={}s",
                self.kill_grace.as_secs()
            ))
            .arg("/bin/bash")
            .arg(&record.script_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(JqsError::Launch(format!(
                "systemd-run failed for {handle}: {}",
                stderr.trim()
            )));
        }

        tracing::debug!(jobid = record.jobid, unit = %handle, "transient unit started");
        Ok(handle)
    }

    async fn alive(&self, handle: &str) -> Result<bool> {
        Ok(self.probe(handle).await? == UnitStatus::Active)
    }

    async fn exit_code(&self, handle: &str) -> Result<Option<i32>> {
        match self.probe(handle).await? {
            UnitStatus::Active => Ok(None),
            UnitStatus::Exited(code) => Ok(Some(code)),
            // Collected before we sampled it; exit status is lost.
            UnitStatus::Gone => Ok(Some(-1)),
        }
    }

    async fn terminate(&self, handle: &str, _grace: Duration) -> Result<()> {
        // The grace window is baked into the unit as TimeoutStopSec at
        // launch; stop delivers SIGTERM now and SIGKILL when it expires.
        let output = Command::new("systemctl")
            .args(["--user", "stop", "--no-block", handle])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;
        if !output.status.success() {
            // Unit already gone is the common case here; reap handles it.
            tracing::debug!(unit = %handle, "systemctl stop reported failure");
        }
        Ok(())
    }
}
