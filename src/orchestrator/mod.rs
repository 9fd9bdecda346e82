// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Peer provisioning orchestrator.
//!
//! Adding a peer to a remote WireGuard server follows a small state machine:
//!
//! ```text
//! KEY_ATTEMPT ──ok──────────────────────────────────────────▶ DONE
//!      │
//!      ├─ auth/reachability failure + password ─▶ BOOTSTRAPPING ─▶ KEY_RETRY ─▶ DONE
//!      ├─ auth/reachability failure, no password ─▶ FAILED
//!      └─ any other failure ─────────────────────▶ FAILED
//! ```
//!
//! The retry happens exactly once; a failing retry is returned as-is. After
//! the peer is registered the server public key is read back, first from the
//! running interface and then from the key files on disk.

pub mod commands;

use ipnet::Ipv4Net;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::bootstrap::Bootstrapper;
use crate::config::WireGuardConfig;
use crate::errors::{ProvisionError, Result};
use crate::keys::KeyMaterialManager;
use crate::metrics;
use crate::pool::AddressPool;
use crate::remote::{RemoteExecutor, RemoteTarget, RemoteTask};
use crate::validation::{is_wg_public_key, validate_peer_name, validate_wg_public_key};
use commands::{add_peer_command, public_key_command, public_key_fallback_command};

/// Everything needed to provision one peer on one server.
#[derive(Clone, PartialEq, Eq)]
pub struct PeerRequest {
    /// Unique peer name, key of the address pool
    pub peer_name: String,
    /// Client WireGuard public key
    pub peer_public_key: String,
    /// Host running the WireGuard server
    pub host: String,
    /// SSH user; the configured default when absent
    pub ssh_user: Option<String>,
    /// One-time password used to bootstrap key access
    pub ssh_password: Option<String>,
}

impl std::fmt::Debug for PeerRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerRequest")
            .field("peer_name", &self.peer_name)
            .field("peer_public_key", &self.peer_public_key)
            .field("host", &self.host)
            .field("ssh_user", &self.ssh_user)
            .field("ssh_password", &self.ssh_password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Connection profile handed back to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisioningResult {
    /// `host:port` of the WireGuard server
    pub endpoint: String,
    /// Server public key
    pub server_public_key: String,
    /// DNS server for the client
    pub dns: String,
    /// Allowed-IPs policy for the client
    pub allowed_ips: String,
    /// Address assigned to the client
    pub client_address: Ipv4Net,
}

/// Drives address allocation, remote peer registration and key recovery.
pub struct PeerOrchestrator {
    executor: Arc<dyn RemoteExecutor>,
    keys: Arc<KeyMaterialManager>,
    pool: Arc<AddressPool>,
    bootstrapper: Bootstrapper,
    wg: WireGuardConfig,
    ssh_port: u16,
}

impl PeerOrchestrator {
    #[must_use]
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        keys: Arc<KeyMaterialManager>,
        pool: Arc<AddressPool>,
        wg: WireGuardConfig,
        ssh_port: u16,
    ) -> Self {
        let bootstrapper = Bootstrapper::new(Arc::clone(&executor), ssh_port);
        Self {
            executor,
            keys,
            pool,
            bootstrapper,
            wg,
            ssh_port,
        }
    }

    #[must_use]
    pub fn keys(&self) -> &KeyMaterialManager {
        &self.keys
    }

    #[must_use]
    pub fn pool(&self) -> &AddressPool {
        &self.pool
    }

    #[must_use]
    pub fn executor(&self) -> &Arc<dyn RemoteExecutor> {
        &self.executor
    }

    /// Allocate an address for the peer, register it on the server and build
    /// the client's connection profile.
    ///
    /// # Errors
    ///
    /// Input errors ([`ProvisionError::InvalidPeerName`],
    /// [`ProvisionError::InvalidPublicKey`], [`ProvisionError::InvalidRequest`])
    /// are returned before anything is allocated or executed. Otherwise any
    /// error from [`AddressPool::get_or_allocate`] or [`Self::add_peer`].
    pub async fn provision(&self, request: &PeerRequest) -> Result<ProvisioningResult> {
        let started = Instant::now();
        let result = self.provision_peer(request).await;

        match &result {
            Ok(profile) => {
                info!(
                    peer = %request.peer_name,
                    host = %request.host,
                    address = %profile.client_address,
                    "Peer provisioned"
                );
                metrics::record_provisioning_success(started.elapsed());
            }
            Err(e) => {
                warn!(
                    peer = %request.peer_name,
                    host = %request.host,
                    reason = e.reason(),
                    error = %e,
                    "Peer provisioning failed"
                );
                metrics::record_provisioning_error(e.reason(), started.elapsed());
            }
        }
        result
    }

    async fn provision_peer(&self, request: &PeerRequest) -> Result<ProvisioningResult> {
        validate_peer_name(&request.peer_name)?;
        validate_wg_public_key(&request.peer_public_key)?;
        let host = request.host.trim();
        if host.is_empty() {
            return Err(ProvisionError::InvalidRequest {
                reason: "host must not be empty".to_string(),
            });
        }
        let ssh_user = request
            .ssh_user
            .as_deref()
            .map(str::trim)
            .filter(|user| !user.is_empty())
            .unwrap_or(self.wg.default_ssh_user.as_str());

        let client_address = self.allocate(&request.peer_name).await?;
        let server_public_key = self
            .add_peer(
                host,
                ssh_user,
                &request.peer_public_key,
                client_address,
                request.ssh_password.as_deref(),
            )
            .await?;

        Ok(ProvisioningResult {
            endpoint: format!("{host}:{}", self.wg.port),
            server_public_key,
            dns: self.wg.dns.clone(),
            allowed_ips: self.wg.allowed_ips.clone(),
            client_address,
        })
    }

    /// Pool access does blocking file I/O; keep it off the async workers.
    async fn allocate(&self, peer_name: &str) -> Result<Ipv4Net> {
        let pool = Arc::clone(&self.pool);
        let name = peer_name.to_string();
        tokio::task::spawn_blocking(move || pool.get_or_allocate(&name))
            .await
            .map_err(|e| {
                ProvisionError::state_io(self.pool.state_file(), std::io::Error::other(e))
            })?
    }

    /// Register `peer_public_key` with `client_address` on `host` and return
    /// the server public key.
    ///
    /// Key-based login is tried first. If it fails with an authorization or
    /// reachability error and `password` is given, the controller key is
    /// installed with the password and the registration is retried once.
    ///
    /// # Errors
    ///
    /// - the original error when it is not an auth/reachability failure, or no password was given
    /// - [`ProvisionError::BootstrapFailed`] when the key cannot be installed
    /// - the retry's error when the second attempt fails
    /// - [`ProvisionError::PublicKeyUnavailable`] when the server key cannot be recovered
    pub async fn add_peer(
        &self,
        host: &str,
        ssh_user: &str,
        peer_public_key: &str,
        client_address: Ipv4Net,
        password: Option<&str>,
    ) -> Result<String> {
        validate_wg_public_key(peer_public_key)?;
        let private_key = self.keys.ensure_keypair().await?;
        let target = RemoteTarget::with_key(host, self.ssh_port, ssh_user, private_key);
        let task = RemoteTask::shell(add_peer_command(&self.wg, peer_public_key, client_address));

        match self.executor.run(&target, &task, true).await {
            Ok(_) => {}
            Err(e) if e.is_auth_or_reachability() => {
                let Some(password) = password else {
                    return Err(e);
                };
                info!(
                    host = %host,
                    user = %ssh_user,
                    error = %e,
                    "Key login failed, bootstrapping controller key"
                );

                let controller_key = self.keys.public_key().await?;
                self.bootstrapper
                    .bootstrap_key_access(host, ssh_user, password, &controller_key)
                    .await?;
                self.executor.run(&target, &task, true).await?;
            }
            Err(e) => return Err(e),
        }
        debug!(host = %host, address = %client_address, "Peer registered on interface");

        self.recover_server_public_key(&target).await
    }

    async fn recover_server_public_key(&self, target: &RemoteTarget) -> Result<String> {
        match self
            .executor
            .run_last_line(target, &public_key_command(&self.wg), true)
            .await
        {
            Ok(key) if is_usable_key(&key) => return Ok(key),
            Ok(key) => {
                debug!(host = %target.host, output = %key, "Interface query gave no usable key");
            }
            Err(e) => warn!(host = %target.host, error = %e, "Interface public key query failed"),
        }

        match self
            .executor
            .run_last_line(target, &public_key_fallback_command(&self.wg), true)
            .await
        {
            Ok(key) if is_usable_key(&key) => Ok(key),
            Ok(_) => Err(ProvisionError::PublicKeyUnavailable {
                host: target.host.clone(),
            }),
            Err(e) => {
                warn!(host = %target.host, error = %e, "Key file fallback failed");
                Err(ProvisionError::PublicKeyUnavailable {
                    host: target.host.clone(),
                })
            }
        }
    }
}

/// Rejects empty output, `wg:` error banners and anything that is not a key.
fn is_usable_key(value: &str) -> bool {
    !value.is_empty() && !value.to_ascii_lowercase().starts_with("wg:") && is_wg_public_key(value)
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
