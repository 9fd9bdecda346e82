// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Service configuration.
//!
//! All settings are parsed once at start-up into [`Config`] (flags with
//! environment fallbacks). Each component receives its own slice of it
//! ([`PoolConfig`], [`KeyConfig`], [`ExecutorConfig`], [`WireGuardConfig`])
//! through its constructor.

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use ipnet::Ipv4Net;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    ANSIBLE_BIN, ANSIBLE_PLAYBOOK_BIN, DEFAULT_ALLOWED_IPS, DEFAULT_COMMAND_TIMEOUT_SECS,
    DEFAULT_INSTALL_DEPLOY_PLAYBOOK, DEFAULT_INSTALL_STACK_PLAYBOOK, DEFAULT_INSTALL_TIMEOUT_SECS,
    DEFAULT_KEY_NAME, DEFAULT_LISTEN_ADDR, DEFAULT_PYTHON_INTERPRETER,
    DEFAULT_SSH_CONNECT_TIMEOUT_SECS, DEFAULT_SSH_PORT, DEFAULT_SSH_USER, DEFAULT_STATE_DIR,
    DEFAULT_WG_CONTAINER_NAME, DEFAULT_WG_INTERFACE, DEFAULT_WG_PORT, DEFAULT_WG_SERVER_ADDRESS,
    DEFAULT_WG_SUBNET, POOL_STATE_FILE,
};

/// How the WireGuard daemon runs on the target server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WgMode {
    /// `wg` is invoked directly on the host (with privilege elevation)
    Host,
    /// `wg` is invoked through `docker exec <container>`
    Container,
}

/// Algorithm selection for the controller keypair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KeyAlgorithm {
    /// ed25519, or RSA when the host runs in FIPS mode
    Auto,
    /// Always ed25519
    Ed25519,
    /// Always RSA-4096
    Rsa,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Compact human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

/// Command line / environment configuration of the provisioner.
#[derive(Debug, Clone, Parser)]
#[command(name = "wg-provisioner", version, about)]
pub struct Config {
    /// Address the HTTP API listens on
    #[arg(long, env = "LISTEN_ADDR", default_value = DEFAULT_LISTEN_ADDR)]
    pub listen: SocketAddr,

    /// Directory holding the pool mapping and the controller keypair
    #[arg(long, env = "STATE_DIR", default_value = DEFAULT_STATE_DIR)]
    pub state_dir: PathBuf,

    /// File name of the controller private key inside the state directory
    #[arg(long, env = "KEY_NAME", default_value = DEFAULT_KEY_NAME)]
    pub key_name: String,

    /// Controller key algorithm
    #[arg(long, env = "KEY_ALGORITHM", value_enum, default_value = "auto")]
    pub key_algorithm: KeyAlgorithm,

    /// VPN subnet peers are allocated from
    #[arg(long, env = "WG_SUBNET", default_value = DEFAULT_WG_SUBNET)]
    pub wg_subnet: Ipv4Net,

    /// Address reserved for the VPN server
    #[arg(long, env = "WG_SERVER_ADDRESS", default_value = DEFAULT_WG_SERVER_ADDRESS)]
    pub wg_server_address: Ipv4Addr,

    /// WireGuard listen port advertised to clients
    #[arg(long, env = "WG_PORT", default_value_t = DEFAULT_WG_PORT)]
    pub wg_port: u16,

    /// Whether the WireGuard daemon runs natively or in a container
    #[arg(long, env = "WG_MODE", value_enum, default_value = "container")]
    pub wg_mode: WgMode,

    /// Container name when running containerized
    #[arg(long, env = "WG_CONTAINER_NAME", default_value = DEFAULT_WG_CONTAINER_NAME)]
    pub wg_container_name: String,

    /// WireGuard interface on the server
    #[arg(long, env = "WG_INTERFACE", default_value = DEFAULT_WG_INTERFACE)]
    pub wg_interface: String,

    /// DNS server handed to clients (defaults to the server address)
    #[arg(long, env = "WG_DNS")]
    pub wg_dns: Option<String>,

    /// Allowed-IPs policy handed to clients
    #[arg(long, env = "WG_ALLOWED_IPS", default_value = DEFAULT_ALLOWED_IPS)]
    pub wg_allowed_ips: String,

    /// SSH user when a request does not name one
    #[arg(long, env = "DEFAULT_SSH_USER", default_value = DEFAULT_SSH_USER)]
    pub default_ssh_user: String,

    /// SSH port of target hosts
    #[arg(long, env = "SSH_PORT", default_value_t = DEFAULT_SSH_PORT)]
    pub ssh_port: u16,

    /// SSH connect timeout in seconds
    #[arg(long, env = "SSH_CONNECT_TIMEOUT", default_value_t = DEFAULT_SSH_CONNECT_TIMEOUT_SECS)]
    pub ssh_connect_timeout: u64,

    /// Upper bound for one remote command in seconds
    #[arg(long, env = "COMMAND_TIMEOUT", default_value_t = DEFAULT_COMMAND_TIMEOUT_SECS)]
    pub command_timeout: u64,

    /// Python interpreter on target hosts
    #[arg(long, env = "ANSIBLE_PYTHON_INTERPRETER", default_value = DEFAULT_PYTHON_INTERPRETER)]
    pub python_interpreter: String,

    /// Verify remote host keys instead of trusting on first use
    #[arg(long, env = "STRICT_HOST_KEY_CHECKING", default_value_t = false)]
    pub strict_host_key_checking: bool,

    /// Ad-hoc command runner
    #[arg(long, env = "ANSIBLE_BIN", default_value = ANSIBLE_BIN)]
    pub ansible_bin: PathBuf,

    /// Playbook runner
    #[arg(long, env = "ANSIBLE_PLAYBOOK_BIN", default_value = ANSIBLE_PLAYBOOK_BIN)]
    pub ansible_playbook_bin: PathBuf,

    /// Playbooks run in order by `POST /install/run` (comma separated)
    #[arg(
        long,
        env = "INSTALL_PLAYBOOKS",
        value_delimiter = ',',
        default_values = [DEFAULT_INSTALL_DEPLOY_PLAYBOOK, DEFAULT_INSTALL_STACK_PLAYBOOK]
    )]
    pub install_playbooks: Vec<PathBuf>,

    /// Upper bound for one install playbook in seconds
    #[arg(long, env = "INSTALL_TIMEOUT", default_value_t = DEFAULT_INSTALL_TIMEOUT_SECS)]
    pub install_timeout: u64,

    /// Log output format
    #[arg(long, env = "RUST_LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

/// Settings of the address pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Subnet addresses are drawn from
    pub subnet: Ipv4Net,
    /// Address never handed to a peer
    pub reserved: Ipv4Addr,
    /// JSON file holding the allocations
    pub state_file: PathBuf,
}

/// Settings of the controller keypair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyConfig {
    /// Directory holding the keypair
    pub state_dir: PathBuf,
    /// File name of the private key
    pub key_name: String,
    /// Algorithm selection
    pub algorithm: KeyAlgorithm,
}

/// Settings of the remote command executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Program used for shell tasks
    pub ansible_bin: PathBuf,
    /// Program used for playbook tasks
    pub ansible_playbook_bin: PathBuf,
    /// Bound on establishing a connection
    pub connect_timeout: Duration,
    /// Bound on a whole remote command
    pub command_timeout: Duration,
    /// Python interpreter on target hosts
    pub python_interpreter: String,
    /// Verify remote host keys
    pub strict_host_key_checking: bool,
}

/// Settings describing the WireGuard server and the client profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireGuardConfig {
    /// Native or containerized daemon
    pub mode: WgMode,
    /// Container name (containerized mode only)
    pub container_name: String,
    /// Interface name
    pub interface: String,
    /// Listen port advertised in the endpoint
    pub port: u16,
    /// DNS server handed to clients
    pub dns: String,
    /// Allowed-IPs policy handed to clients
    pub allowed_ips: String,
    /// SSH user when a request does not name one
    pub default_ssh_user: String,
}

impl Config {
    /// Reject settings that cannot work together.
    ///
    /// # Errors
    ///
    /// Returns an error if the server address lies outside the subnet, if a
    /// port or timeout is zero, or if no install playbook is configured.
    pub fn validate(&self) -> Result<()> {
        if !self.wg_subnet.contains(&self.wg_server_address) {
            bail!(
                "WG server address {} is outside subnet {}",
                self.wg_server_address,
                self.wg_subnet
            );
        }
        if self.wg_port == 0 || self.ssh_port == 0 {
            bail!("Ports must be non-zero");
        }
        if self.ssh_connect_timeout == 0 || self.command_timeout == 0 || self.install_timeout == 0 {
            bail!("Timeouts must be non-zero");
        }
        if self.key_name.is_empty() || self.key_name.contains('/') {
            bail!("Key name '{}' must be a plain file name", self.key_name);
        }
        if self.install_playbooks.is_empty() {
            bail!("At least one install playbook is required");
        }
        Ok(())
    }

    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            subnet: self.wg_subnet,
            reserved: self.wg_server_address,
            state_file: self.state_dir.join(POOL_STATE_FILE),
        }
    }

    #[must_use]
    pub fn key_config(&self) -> KeyConfig {
        KeyConfig {
            state_dir: self.state_dir.clone(),
            key_name: self.key_name.clone(),
            algorithm: self.key_algorithm,
        }
    }

    #[must_use]
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            ansible_bin: self.ansible_bin.clone(),
            ansible_playbook_bin: self.ansible_playbook_bin.clone(),
            connect_timeout: Duration::from_secs(self.ssh_connect_timeout),
            command_timeout: Duration::from_secs(self.command_timeout),
            python_interpreter: self.python_interpreter.clone(),
            strict_host_key_checking: self.strict_host_key_checking,
        }
    }

    /// Executor settings for install playbooks, which outlast ordinary commands.
    #[must_use]
    pub fn install_executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            command_timeout: Duration::from_secs(self.install_timeout),
            ..self.executor_config()
        }
    }

    #[must_use]
    pub fn wireguard_config(&self) -> WireGuardConfig {
        WireGuardConfig {
            mode: self.wg_mode,
            container_name: self.wg_container_name.clone(),
            interface: self.wg_interface.clone(),
            port: self.wg_port,
            dns: self
                .wg_dns
                .clone()
                .unwrap_or_else(|| self.wg_server_address.to_string()),
            allowed_ips: self.wg_allowed_ips.clone(),
            default_ssh_user: self.default_ssh_user.clone(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            ansible_bin: PathBuf::from(ANSIBLE_BIN),
            ansible_playbook_bin: PathBuf::from(ANSIBLE_PLAYBOOK_BIN),
            connect_timeout: Duration::from_secs(DEFAULT_SSH_CONNECT_TIMEOUT_SECS),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            python_interpreter: DEFAULT_PYTHON_INTERPRETER.to_string(),
            strict_host_key_checking: false,
        }
    }
}

impl Default for WireGuardConfig {
    fn default() -> Self {
        Self {
            mode: WgMode::Container,
            container_name: DEFAULT_WG_CONTAINER_NAME.to_string(),
            interface: DEFAULT_WG_INTERFACE.to_string(),
            port: DEFAULT_WG_PORT,
            dns: DEFAULT_WG_SERVER_ADDRESS.to_string(),
            allowed_ips: DEFAULT_ALLOWED_IPS.to_string(),
            default_ssh_user: DEFAULT_SSH_USER.to_string(),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
