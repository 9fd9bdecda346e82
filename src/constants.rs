// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the WireGuard provisioner.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// WireGuard Constants
// ============================================================================

/// Default VPN subnet handed out to peers
pub const DEFAULT_WG_SUBNET: &str = "10.13.13.0/24";

/// Default address of the VPN server inside the subnet (never allocated to a peer)
pub const DEFAULT_WG_SERVER_ADDRESS: &str = "10.13.13.1";

/// Default WireGuard listen port
pub const DEFAULT_WG_PORT: u16 = 51820;

/// Default WireGuard interface name on the server
pub const DEFAULT_WG_INTERFACE: &str = "wg0";

/// Default container name when the WireGuard daemon runs under docker
pub const DEFAULT_WG_CONTAINER_NAME: &str = "wireguard";

/// Default allowed-IPs policy handed to clients (full tunnel)
pub const DEFAULT_ALLOWED_IPS: &str = "0.0.0.0/0, ::/0";

/// Length in bytes of a decoded WireGuard (Curve25519) key
pub const WG_KEY_LEN: usize = 32;

/// Key file locations used by the native install
pub const WG_HOST_KEY_DIR: &str = "/etc/wireguard";

/// Key file locations inside the WireGuard container volume
pub const WG_CONTAINER_KEY_DIR: &str = "/config";

// ============================================================================
// Address Pool Constants
// ============================================================================

/// File name of the address-pool mapping inside the state directory
pub const POOL_STATE_FILE: &str = "peers.json";

/// Maximum accepted length of a peer name
pub const MAX_PEER_NAME_LEN: usize = 64;

// ============================================================================
// Controller Key Constants
// ============================================================================

/// Default state directory holding the pool mapping and the controller keypair
pub const DEFAULT_STATE_DIR: &str = "/app/state";

/// Default file name of the controller private key
pub const DEFAULT_KEY_NAME: &str = "wg_controller_id";

/// Comment embedded in generated controller keys
pub const KEY_COMMENT: &str = "wg-provisioner";

/// KDF rounds for ed25519 private keys
pub const ED25519_KDF_ROUNDS: u32 = 100;

/// RSA modulus length used when only certified algorithms are allowed
pub const RSA_KEY_BITS: u32 = 4096;

/// Kernel flag indicating FIPS mode
pub const FIPS_ENABLED_PATH: &str = "/proc/sys/crypto/fips_enabled";

/// Number of attempts to acquire the keypair lock file
pub const KEY_LOCK_RETRIES: u32 = 50;

/// Delay between lock file attempts (100ms)
pub const KEY_LOCK_DELAY_MILLIS: u64 = 100;

/// Permissions of the state directory
pub const STATE_DIR_MODE: u32 = 0o700;

/// Permissions of the controller private key
pub const PRIVATE_KEY_MODE: u32 = 0o600;

/// Permissions of the controller public key
pub const PUBLIC_KEY_MODE: u32 = 0o644;

// ============================================================================
// Remote Execution Constants
// ============================================================================

/// Default SSH user when the request does not name one
pub const DEFAULT_SSH_USER: &str = "ubuntu";

/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default SSH connect timeout (8 seconds)
pub const DEFAULT_SSH_CONNECT_TIMEOUT_SECS: u64 = 8;

/// Default upper bound for a whole remote command (2 minutes)
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 120;

/// Python interpreter used by the remote automation layer
pub const DEFAULT_PYTHON_INTERPRETER: &str = "/usr/bin/python3";

/// Inventory alias of the single target host
pub const INVENTORY_HOST_ALIAS: &str = "srv";

/// Ad-hoc command binary
pub const ANSIBLE_BIN: &str = "ansible";

/// Playbook runner binary
pub const ANSIBLE_PLAYBOOK_BIN: &str = "ansible-playbook";

/// SSH options disabling host-key verification (trust-on-first-use)
pub const SSH_TOFU_ARGS: &str = "-o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null";

/// Lower-cased markers in remote output that signal an authorization or reachability failure
pub const AUTH_OR_REACHABILITY_MARKERS: &[&str] =
    &["permission denied", "unreachable", "authentication failed"];

// ============================================================================
// Bootstrap Constants
// ============================================================================

/// Marker echoed by the remote key-install script on success
pub const BOOTSTRAP_OK_MARKER: &str = "BOOTSTRAP_OK";

/// Default service account created by the self-enrollment script
pub const DEFAULT_BOOTSTRAP_USER: &str = "wgprov";

/// Sudoers drop-in written by the self-enrollment script
pub const BOOTSTRAP_SUDOERS_FILE: &str = "/etc/sudoers.d/90-wg-provisioner";

/// Status marker written by the self-enrollment script
pub const BOOTSTRAP_STATUS_DIR: &str = "/var/lib/wg-provisioner";

// ============================================================================
// Installer Constants
// ============================================================================

/// Playbook that prepares a fresh server (packages, firewall, docker)
pub const DEFAULT_INSTALL_DEPLOY_PLAYBOOK: &str = "/app/ansible/site-deploy.yml";

/// Playbook that brings up the VPN stack once the server is prepared
pub const DEFAULT_INSTALL_STACK_PLAYBOOK: &str = "/app/ansible/site-stack.yml";

/// Default upper bound for one install playbook (30 minutes)
pub const DEFAULT_INSTALL_TIMEOUT_SECS: u64 = 1800;

// ============================================================================
// HTTP Constants
// ============================================================================

/// Default listen address of the HTTP API
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8000";

/// Content type of the self-enrollment script
pub const SHELL_SCRIPT_CONTENT_TYPE: &str = "text/x-shellscript";
