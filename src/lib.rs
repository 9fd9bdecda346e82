// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! # wg-provisioner - WireGuard peer provisioning over SSH
//!
//! wg-provisioner adds client peers to WireGuard servers running on remote
//! hosts. It allocates each peer a stable address from one subnet, drives the
//! server with Ansible over SSH, and hands the client back a connection
//! profile.
//!
//! ## Overview
//!
//! A freshly installed server usually accepts only password logins. The
//! controller therefore tries its own SSH key first and, when that is refused
//! and the caller supplied a one-time password, installs the key with the
//! password and retries once. After that every call is key-based.
//!
//! ## Modules
//!
//! - [`pool`] - Address pool allocator with durable peer-to-address mapping
//! - [`keys`] - Controller SSH keypair management
//! - [`remote`] - Remote command execution ([`remote::RemoteExecutor`] and the Ansible backend)
//! - [`bootstrap`] - Password bootstrap of key access and the self-enrollment script
//! - [`orchestrator`] - The provisioning state machine
//! - [`install`] - Server installation through the deploy and stack playbooks
//! - [`api`] - HTTP routes
//! - [`config`] - Command line / environment configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wg_provisioner::config::{ExecutorConfig, KeyAlgorithm, KeyConfig, PoolConfig, WireGuardConfig};
//! use wg_provisioner::keys::KeyMaterialManager;
//! use wg_provisioner::orchestrator::{PeerOrchestrator, PeerRequest};
//! use wg_provisioner::pool::AddressPool;
//! use wg_provisioner::remote::ansible::AnsibleExecutor;
//!
//! # async fn run() -> wg_provisioner::errors::Result<()> {
//! let pool = AddressPool::open(PoolConfig {
//!     subnet: "10.13.13.0/24".parse().unwrap(),
//!     reserved: "10.13.13.1".parse().unwrap(),
//!     state_file: "/app/state/peers.json".into(),
//! })?;
//! let keys = KeyMaterialManager::new(KeyConfig {
//!     state_dir: "/app/state".into(),
//!     key_name: "wg_controller_id".to_string(),
//!     algorithm: KeyAlgorithm::Auto,
//! });
//! let orchestrator = PeerOrchestrator::new(
//!     Arc::new(AnsibleExecutor::new(ExecutorConfig::default())),
//!     Arc::new(keys),
//!     Arc::new(pool),
//!     WireGuardConfig::default(),
//!     22,
//! );
//!
//! let profile = orchestrator
//!     .provision(&PeerRequest {
//!         peer_name: "alice".to_string(),
//!         peer_public_key: "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=".to_string(),
//!         host: "203.0.113.10".to_string(),
//!         ssh_user: None,
//!         ssh_password: Some("one-time".to_string()),
//!     })
//!     .await?;
//! println!("{} via {}", profile.client_address, profile.endpoint);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod constants;
pub mod errors;
pub mod install;
pub mod keys;
pub mod metrics;
pub mod orchestrator;
pub mod pool;
pub mod remote;
pub mod validation;
