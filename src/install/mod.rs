// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Server installation.
//!
//! The [`Installer`] turns a bare host into a VPN server by running the
//! configured playbooks in order (by default `site-deploy.yml`, then
//! `site-stack.yml`) with privilege elevation. Stack variables travel in the
//! per-call inventory, so nothing is written to the controller's playbook
//! directory and concurrent installs against different hosts do not collide.

use serde::Serialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::errors::{ProvisionError, Result};
use crate::metrics;
use crate::remote::{RemoteExecutor, RemoteTarget, RemoteTask};

/// Output of one playbook run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageOutput {
    /// Playbook path as configured
    pub playbook: String,
    /// Captured standard output
    pub output: String,
}

/// Outcome of a completed installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub host: String,
    /// One entry per playbook, in run order
    pub stages: Vec<StageOutput>,
    /// Where the installed stack answers
    pub url: String,
}

/// Runs the installation playbooks against one host.
#[derive(Clone)]
pub struct Installer {
    executor: Arc<dyn RemoteExecutor>,
    playbooks: Vec<PathBuf>,
}

impl Installer {
    #[must_use]
    pub fn new(executor: Arc<dyn RemoteExecutor>, playbooks: Vec<PathBuf>) -> Self {
        Self {
            executor,
            playbooks,
        }
    }

    #[must_use]
    pub fn playbooks(&self) -> &[PathBuf] {
        &self.playbooks
    }

    /// Run every playbook against `target`, stopping at the first failure.
    ///
    /// `vars` are handed to each playbook as inventory-wide variables.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidRequest`] for unusable variable names
    /// and the executor's classified error for a failed playbook.
    pub async fn run(
        &self,
        target: &RemoteTarget,
        vars: &Map<String, Value>,
    ) -> Result<InstallReport> {
        validate_vars(vars)?;
        let start = Instant::now();
        info!(
            host = %target.host,
            user = %target.user,
            stages = self.playbooks.len(),
            "Starting server installation"
        );

        let mut stages = Vec::with_capacity(self.playbooks.len());
        for path in &self.playbooks {
            let task = RemoteTask::Playbook {
                path: path.clone(),
                vars: vars.clone(),
            };
            info!(host = %target.host, playbook = %path.display(), "Running install stage");

            match self.executor.run(target, &task, true).await {
                Ok(output) => stages.push(StageOutput {
                    playbook: path.display().to_string(),
                    output,
                }),
                Err(e) => {
                    warn!(
                        host = %target.host,
                        playbook = %path.display(),
                        completed = stages.len(),
                        error = %e,
                        "Install stage failed"
                    );
                    metrics::record_install(e.reason(), start.elapsed());
                    return Err(e);
                }
            }
        }

        metrics::record_install("success", start.elapsed());
        info!(host = %target.host, elapsed = ?start.elapsed(), "Server installation finished");
        Ok(InstallReport {
            host: target.host.clone(),
            stages,
            url: format!("https://{}/", target.host),
        })
    }
}

/// Variable names must be plain identifiers and must leave the connection
/// settings (`ansible_*`) to the inventory.
///
/// # Errors
///
/// Returns [`ProvisionError::InvalidRequest`] naming the first bad key.
pub fn validate_vars(vars: &Map<String, Value>) -> Result<()> {
    for name in vars.keys() {
        let mut chars = name.chars();
        let identifier = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !identifier {
            return Err(ProvisionError::InvalidRequest {
                reason: format!("variable name '{name}' is not a valid identifier"),
            });
        }
        if name.starts_with("ansible_") {
            return Err(ProvisionError::InvalidRequest {
                reason: format!("variable '{name}' is reserved for the connection settings"),
            });
        }
    }
    Ok(())
}
