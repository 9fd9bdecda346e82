// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! [`RemoteExecutor`] backed by the `ansible` command line tools.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, warn};

use super::inventory::Inventory;
use super::{RemoteExecutor, RemoteTarget, RemoteTask};
use crate::config::ExecutorConfig;
use crate::constants::INVENTORY_HOST_ALIAS;
use crate::errors::{ProvisionError, Result};
use crate::metrics;

/// Runs tasks through `ansible` (ad-hoc shell) and `ansible-playbook`.
#[derive(Debug, Clone)]
pub struct AnsibleExecutor {
    config: ExecutorConfig,
}

impl AnsibleExecutor {
    #[must_use]
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Program and arguments for `task` against the inventory at `inventory`.
    fn command_line(
        &self,
        inventory: &Inventory,
        task: &RemoteTask,
        elevate: bool,
    ) -> (&Path, Vec<OsString>) {
        let mut args = vec![OsString::from("-i"), inventory.path().into()];

        let program = match task {
            RemoteTask::Shell(command) => {
                args.push(INVENTORY_HOST_ALIAS.into());
                args.push("-m".into());
                args.push("shell".into());
                args.push("-a".into());
                args.push(command.into());
                self.config.ansible_bin.as_path()
            }
            RemoteTask::Playbook { path, .. } => {
                args.push(path.into());
                self.config.ansible_playbook_bin.as_path()
            }
        };

        args.push("-T".into());
        args.push(self.config.connect_timeout.as_secs().to_string().into());
        if elevate {
            args.push("-b".into());
        }
        (program, args)
    }
}

#[async_trait]
impl RemoteExecutor for AnsibleExecutor {
    async fn run(&self, target: &RemoteTarget, task: &RemoteTask, elevate: bool) -> Result<String> {
        let inventory = Inventory::write(target, &self.config, task.vars())?;
        let (program, args) = self.command_line(&inventory, task, elevate);

        debug!(
            host = %target.host,
            user = %target.user,
            password_auth = target.uses_password(),
            elevate,
            %task,
            "Running remote task"
        );

        let mut command = Command::new(program);
        command
            .args(&args)
            .env("ANSIBLE_NOCOLOR", "1")
            .env("ANSIBLE_RETRY_FILES_ENABLED", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !self.config.strict_host_key_checking {
            command.env("ANSIBLE_HOST_KEY_CHECKING", "False");
        }

        let child = command.spawn().map_err(|source| ProvisionError::Spawn {
            program: program.display().to_string(),
            source,
        })?;

        let start = Instant::now();
        let waited = tokio::time::timeout(self.config.command_timeout, child.wait_with_output()).await;
        let output = match waited {
            Ok(result) => result.map_err(|source| ProvisionError::Spawn {
                program: program.display().to_string(),
                source,
            })?,
            Err(_) => {
                warn!(host = %target.host, %task, "Remote task timed out");
                metrics::record_remote_execution("timeout");
                return Err(ProvisionError::CommandTimedOut {
                    host: target.host.clone(),
                    timeout_secs: self.config.command_timeout.as_secs(),
                });
            }
        };
        // The inventory may hold a password; remove it as soon as the run is over
        drop(inventory);

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            debug!(host = %target.host, elapsed = ?start.elapsed(), "Remote task succeeded");
            metrics::record_remote_execution("success");
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = if stderr.trim().is_empty() {
            stdout
        } else {
            format!("{}\n{}", stderr.trim(), stdout.trim())
        };
        let error = ProvisionError::from_remote_output(&target.host, &detail);
        let class = if error.is_auth_or_reachability() {
            "auth_or_reachability"
        } else {
            "other"
        };
        warn!(
            host = %target.host,
            status = ?output.status.code(),
            class,
            "Remote task failed"
        );
        metrics::record_remote_execution(class);
        Err(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    fn executor() -> AnsibleExecutor {
        AnsibleExecutor::new(ExecutorConfig {
            connect_timeout: Duration::from_secs(8),
            ..ExecutorConfig::default()
        })
    }

    fn target() -> RemoteTarget {
        RemoteTarget::with_key("203.0.113.10", 22, "ubuntu", "/state/id".into())
    }

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    /// Executable `/bin/sh` script standing in for an ansible binary
    #[cfg(unix)]
    fn stub(dir: &TempDir, name: &str, body: &str) -> Option<PathBuf> {
        use std::os::unix::fs::PermissionsExt;

        if !Path::new("/bin/sh").exists() {
            eprintln!("⊘ Skipping test: /bin/sh not available");
            return None;
        }
        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        Some(path)
    }

    #[cfg(unix)]
    fn stub_executor(ansible: PathBuf, command_timeout: Duration) -> AnsibleExecutor {
        AnsibleExecutor::new(ExecutorConfig {
            ansible_bin: ansible.clone(),
            ansible_playbook_bin: ansible,
            command_timeout,
            ..ExecutorConfig::default()
        })
    }

    #[test]
    fn test_shell_command_line() {
        let exec = executor();
        let inventory = Inventory::write(&target(), &exec.config, None).unwrap();
        let (program, args) = exec.command_line(&inventory, &RemoteTask::shell("wg show"), true);
        let args = strings(&args);

        assert_eq!(program, Path::new("ansible"));
        assert_eq!(args[0], "-i");
        assert_eq!(args[1], inventory.path().display().to_string());
        assert_eq!(&args[2..], ["srv", "-m", "shell", "-a", "wg show", "-T", "8", "-b"]);
    }

    #[test]
    fn test_playbook_command_line_without_elevation() {
        let exec = executor();
        let inventory = Inventory::write(&target(), &exec.config, None).unwrap();
        let task = RemoteTask::playbook("/app/ansible/site.yml");
        let (program, args) = exec.command_line(&inventory, &task, false);
        let args = strings(&args);

        assert_eq!(program, Path::new("ansible-playbook"));
        assert_eq!(&args[2..], ["/app/ansible/site.yml", "-T", "8"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_returns_stdout_and_removes_inventory() {
        let dir = TempDir::new().unwrap();
        // $2 is the inventory path
        let Some(ansible) = stub(&dir, "ansible", r#"printf '%s\n' "$2"; printf '%s\n' "$*""#) else {
            return;
        };
        let exec = stub_executor(ansible, Duration::from_secs(30));

        let output = exec
            .run(&target(), &RemoteTask::shell("wg show"), true)
            .await
            .unwrap();
        let mut lines = output.lines();
        let inventory = PathBuf::from(lines.next().unwrap());
        let args = lines.next().unwrap();

        assert!(args.contains("srv -m shell -a wg show"));
        assert!(args.ends_with("-b"));
        assert!(!inventory.exists(), "inventory is deleted after the run");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_classifies_permission_denied() {
        let dir = TempDir::new().unwrap();
        let Some(ansible) = stub(
            &dir,
            "ansible",
            "echo 'srv | UNREACHABLE! => Permission denied (publickey,password).'; exit 4",
        ) else {
            return;
        };
        let exec = stub_executor(ansible, Duration::from_secs(30));

        let err = exec
            .run(&target(), &RemoteTask::shell("true"), false)
            .await
            .unwrap_err();

        assert!(err.is_auth_or_reachability(), "got {err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_reports_stderr_first_on_other_failure() {
        let dir = TempDir::new().unwrap();
        let Some(ansible) = stub(
            &dir,
            "ansible",
            "echo 'srv | FAILED | rc=1 >>'; echo 'wg: command not found' >&2; exit 2",
        ) else {
            return;
        };
        let exec = stub_executor(ansible, Duration::from_secs(30));

        let err = exec
            .run(&target(), &RemoteTask::shell("wg show"), true)
            .await
            .unwrap_err();

        match err {
            ProvisionError::OtherExecutionFailure { detail, .. } => {
                assert!(detail.starts_with("wg: command not found"), "detail: {detail}");
                assert!(detail.contains("FAILED"));
            }
            other => panic!("expected OtherExecutionFailure, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_kills_command_after_timeout() {
        let dir = TempDir::new().unwrap();
        let Some(ansible) = stub(&dir, "ansible", "sleep 30") else {
            return;
        };
        let exec = stub_executor(ansible, Duration::from_secs(1));

        let start = Instant::now();
        let err = exec
            .run(&target(), &RemoteTask::shell("true"), false)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ProvisionError::CommandTimedOut { timeout_secs: 1, .. }
        ));
        assert!(!err.is_auth_or_reachability(), "a timeout never bootstraps");
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_playbook_vars_reach_the_inventory() {
        let dir = TempDir::new().unwrap();
        let Some(playbook_bin) = stub(&dir, "ansible-playbook", r#"cat "$2""#) else {
            return;
        };
        let exec = stub_executor(playbook_bin, Duration::from_secs(30));
        let mut vars = Map::new();
        vars.insert("wg_public_host".into(), json!("vpn.example.com"));
        let task = RemoteTask::Playbook {
            path: "/app/ansible/site-deploy.yml".into(),
            vars,
        };

        let output = exec.run(&target(), &task, true).await.unwrap();
        let inventory: Value = serde_json::from_str(&output).unwrap();

        assert_eq!(inventory["all"]["vars"]["wg_public_host"], "vpn.example.com");
        assert_eq!(inventory["all"]["hosts"]["srv"]["ansible_user"], "ubuntu");
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let exec = AnsibleExecutor::new(ExecutorConfig {
            ansible_bin: PathBuf::from("/nonexistent/ansible"),
            ..ExecutorConfig::default()
        });

        let err = exec
            .run(&target(), &RemoteTask::shell("true"), false)
            .await
            .unwrap_err();

        assert_eq!(err.reason(), "SpawnFailed");
    }
}
