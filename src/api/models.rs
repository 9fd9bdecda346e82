// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Request and response bodies of the HTTP API.

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::constants::DEFAULT_BOOTSTRAP_USER;
use crate::errors::{ProvisionError, Result};
use crate::install::{InstallReport, StageOutput};
use crate::orchestrator::{PeerRequest, ProvisioningResult};

/// Body of `POST /wg/server_params`.
#[derive(Clone, Deserialize)]
pub struct ServerParamsRequest {
    pub peer_name: String,
    pub peer_public_key: String,
    /// Host running the WireGuard server
    #[serde(alias = "host")]
    pub server_hint: String,
    #[serde(default)]
    pub ssh_user: Option<String>,
    /// One-time password, only used to bootstrap key access
    #[serde(default)]
    pub ssh_password: Option<String>,
}

impl From<ServerParamsRequest> for PeerRequest {
    fn from(req: ServerParamsRequest) -> Self {
        Self {
            peer_name: req.peer_name,
            peer_public_key: req.peer_public_key,
            host: req.server_hint,
            ssh_user: req.ssh_user,
            ssh_password: req.ssh_password.filter(|p| !p.is_empty()),
        }
    }
}

/// Response of `POST /wg/server_params`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerParamsResponse {
    pub endpoint: String,
    pub server_public_key: String,
    pub dns: String,
    pub allowed_ips: String,
    pub client_address: Ipv4Net,
}

impl From<ProvisioningResult> for ServerParamsResponse {
    fn from(result: ProvisioningResult) -> Self {
        Self {
            endpoint: result.endpoint,
            server_public_key: result.server_public_key,
            dns: result.dns,
            allowed_ips: result.allowed_ips,
            client_address: result.client_address,
        }
    }
}

/// Query string of `GET /bootstrap/script`.
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapScriptQuery {
    #[serde(default = "default_bootstrap_user")]
    pub user: String,
    /// `1` grants passwordless sudo, `0` leaves sudoers alone
    #[serde(default = "default_nopasswd")]
    pub nopasswd: u8,
}

fn default_bootstrap_user() -> String {
    DEFAULT_BOOTSTRAP_USER.to_string()
}

fn default_nopasswd() -> u8 {
    1
}

/// Body of `POST /install/check-ssh`.
#[derive(Clone, Deserialize)]
pub struct CheckSshRequest {
    #[serde(alias = "elastic_ip")]
    pub host: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub ssh_port: Option<u16>,
    /// Private key in PEM/OpenSSH text form
    #[serde(default)]
    pub pem: Option<String>,
    #[serde(default)]
    pub ssh_password: Option<String>,
}

/// Validated credentials of a connectivity check.
#[derive(Clone, PartialEq, Eq)]
pub enum SshCredential {
    Pem(String),
    Password(String),
}

impl CheckSshRequest {
    /// Exactly one of `pem` and `ssh_password` must be given.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidRequest`] otherwise.
    pub fn credential(&self) -> Result<SshCredential> {
        let pem = self.pem.as_deref().filter(|p| !p.trim().is_empty());
        let password = self.ssh_password.as_deref().filter(|p| !p.is_empty());
        match (pem, password) {
            (Some(pem), None) => Ok(SshCredential::Pem(pem.to_string())),
            (None, Some(password)) => Ok(SshCredential::Password(password.to_string())),
            (Some(_), Some(_)) => Err(ProvisionError::InvalidRequest {
                reason: "send either 'pem' or 'ssh_password', not both".to_string(),
            }),
            (None, None) => Err(ProvisionError::InvalidRequest {
                reason: "either 'pem' or 'ssh_password' is required".to_string(),
            }),
        }
    }
}

/// Response of `POST /install/check-ssh`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSshResponse {
    pub ok: bool,
    pub stdout: String,
}

/// Body of `POST /install/run`.
#[derive(Clone, Deserialize)]
pub struct InstallRunRequest {
    /// Connection to the host being installed
    pub ssh: CheckSshRequest,
    /// Stack variables handed to every playbook
    #[serde(default)]
    pub vars: Map<String, Value>,
    /// Accepted at the top level when missing from `vars`
    #[serde(default)]
    pub admin_email: Option<String>,
    #[serde(default)]
    pub admin_password: Option<String>,
}

impl InstallRunRequest {
    /// `vars` with the top-level admin credentials filled in where absent.
    #[must_use]
    pub fn stack_vars(&self) -> Map<String, Value> {
        let mut vars = self.vars.clone();
        for (name, value) in [
            ("admin_email", &self.admin_email),
            ("admin_password", &self.admin_password),
        ] {
            if let Some(value) = value {
                vars.entry(name)
                    .or_insert_with(|| Value::String(value.clone()));
            }
        }
        vars
    }
}

/// One playbook in `InstallRunResponse`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallStageResponse {
    pub playbook: String,
    pub output: String,
}

/// Response of `POST /install/run`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRunResponse {
    pub ok: bool,
    pub url: String,
    pub stages: Vec<InstallStageResponse>,
}

impl From<InstallReport> for InstallRunResponse {
    fn from(report: InstallReport) -> Self {
        Self {
            ok: true,
            url: report.url,
            stages: report
                .stages
                .into_iter()
                .map(|StageOutput { playbook, output }| InstallStageResponse { playbook, output })
                .collect(),
        }
    }
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Error body returned with every non-2xx response, including malformed
/// JSON bodies and query strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable description
    pub detail: String,
    /// Stable machine-readable reason
    pub code: String,
}
