// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Remote command execution against a single target host.
//!
//! The [`RemoteExecutor`] trait is the seam between the orchestration logic and
//! the actual transport. The production implementation,
//! [`ansible::AnsibleExecutor`], writes an ephemeral single-host inventory and
//! runs `ansible` / `ansible-playbook` against it.
//!
//! Executors classify their own failures: an authorization or reachability
//! problem comes back as [`ProvisionError::AuthOrReachabilityFailure`],
//! everything else as [`ProvisionError::OtherExecutionFailure`] (or
//! [`ProvisionError::CommandTimedOut`]).
//!
//! [`ProvisionError::AuthOrReachabilityFailure`]: crate::errors::ProvisionError::AuthOrReachabilityFailure
//! [`ProvisionError::OtherExecutionFailure`]: crate::errors::ProvisionError::OtherExecutionFailure
//! [`ProvisionError::CommandTimedOut`]: crate::errors::ProvisionError::CommandTimedOut

pub mod ansible;
pub mod inventory;
#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;

use crate::errors::Result;

/// How the controller authenticates to a target.
#[derive(Clone, PartialEq, Eq)]
pub enum RemoteAuth {
    /// Key-based login with the given private key
    PrivateKey(PathBuf),
    /// One-time password login
    Password(String),
}

impl fmt::Debug for RemoteAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrivateKey(path) => f.debug_tuple("PrivateKey").field(path).finish(),
            Self::Password(_) => f.write_str("Password(<redacted>)"),
        }
    }
}

/// One host to run commands on. Built per call and discarded afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    /// Host name or address
    pub host: String,
    /// SSH port
    pub port: u16,
    /// SSH user
    pub user: String,
    /// Credentials
    pub auth: RemoteAuth,
}

impl RemoteTarget {
    /// Target authenticated with the controller private key.
    #[must_use]
    pub fn with_key(host: &str, port: u16, user: &str, private_key: PathBuf) -> Self {
        Self {
            host: host.to_string(),
            port,
            user: user.to_string(),
            auth: RemoteAuth::PrivateKey(private_key),
        }
    }

    /// Target authenticated with a password.
    #[must_use]
    pub fn with_password(host: &str, port: u16, user: &str, password: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            user: user.to_string(),
            auth: RemoteAuth::Password(password.to_string()),
        }
    }

    /// Whether this target logs in with a password.
    #[must_use]
    pub fn uses_password(&self) -> bool {
        matches!(self.auth, RemoteAuth::Password(_))
    }
}

/// What to run on the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteTask {
    /// A shell snippet executed through the remote shell
    Shell(String),
    /// A playbook file on the controller, with variables for every host
    Playbook {
        path: PathBuf,
        vars: Map<String, Value>,
    },
}

impl RemoteTask {
    /// Convenience constructor for shell tasks.
    pub fn shell(command: impl Into<String>) -> Self {
        Self::Shell(command.into())
    }

    /// Playbook task with no extra variables.
    pub fn playbook(path: impl Into<PathBuf>) -> Self {
        Self::Playbook {
            path: path.into(),
            vars: Map::new(),
        }
    }

    /// Inventory-level variables the task carries.
    #[must_use]
    pub fn vars(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Shell(_) => None,
            Self::Playbook { vars, .. } => Some(vars).filter(|vars| !vars.is_empty()),
        }
    }
}

impl fmt::Display for RemoteTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell(command) => write!(f, "shell: {command}"),
            Self::Playbook { path, .. } => write!(f, "playbook: {}", path.display()),
        }
    }
}

/// Runs tasks on one target host.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `task` on `target` and return its captured standard output.
    ///
    /// `elevate` requests privilege elevation on the remote side.
    ///
    /// # Errors
    ///
    /// A non-zero exit is reported as a classified [`crate::errors::ProvisionError`].
    async fn run(&self, target: &RemoteTarget, task: &RemoteTask, elevate: bool) -> Result<String>;

    /// Run a one-line shell command and return only the last non-blank output line.
    ///
    /// Used to read scalar values such as a public key.
    ///
    /// # Errors
    ///
    /// Same as [`RemoteExecutor::run`].
    async fn run_last_line(&self, target: &RemoteTarget, command: &str, elevate: bool) -> Result<String> {
        let output = self.run(target, &RemoteTask::shell(command), elevate).await?;
        Ok(last_non_blank_line(&output).to_string())
    }
}

/// Last line of `output` with content, trimmed; empty if there is none.
#[must_use]
pub fn last_non_blank_line(output: &str) -> &str {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .unwrap_or("")
}
