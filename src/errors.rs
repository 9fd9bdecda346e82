// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for peer provisioning.
//!
//! Remote failures are classified where they happen: the executor turns raw
//! `ansible` output into either [`ProvisionError::AuthOrReachabilityFailure`]
//! or [`ProvisionError::OtherExecutionFailure`], and the orchestrator decides
//! whether to bootstrap by matching on the variant.

use std::path::PathBuf;
use thiserror::Error;

use crate::constants::AUTH_OR_REACHABILITY_MARKERS;

/// Convenience alias used across the crate.
pub type Result<T, E = ProvisionError> = std::result::Result<T, E>;

/// Errors that can occur while allocating addresses, managing controller keys
/// or driving remote hosts.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// The subnet has no free host address left.
    #[error("No free addresses left in pool {subnet}")]
    PoolExhausted {
        /// Subnet in CIDR notation
        subnet: String,
    },

    /// Peer name is empty, too long or contains unsupported characters.
    #[error("Invalid peer name '{name}': {reason}")]
    InvalidPeerName {
        /// The rejected name
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// A WireGuard public key did not decode to a 32-byte key.
    #[error("Invalid WireGuard public key '{key}'")]
    InvalidPublicKey {
        /// The rejected key text
        key: String,
    },

    /// Any other malformed caller input (service user names, credentials).
    #[error("Invalid request: {reason}")]
    InvalidRequest {
        /// What is wrong with the request
        reason: String,
    },

    /// Controller keypair could not be generated or derived.
    #[error("Controller key generation failed: {reason}")]
    KeyGenFailed {
        /// Underlying failure
        reason: String,
    },

    /// Password-based key installation did not confirm success.
    #[error("Bootstrap of controller key on {host} failed: {reason}")]
    BootstrapFailed {
        /// Target host
        host: String,
        /// Underlying failure
        reason: String,
    },

    /// Remote host refused authorization or could not be reached.
    ///
    /// This is the only class that triggers the bootstrap-and-retry path.
    #[error("Authorization or reachability failure on {host}: {detail}")]
    AuthOrReachabilityFailure {
        /// Target host
        host: String,
        /// Captured error text
        detail: String,
    },

    /// Any other remote command failure.
    #[error("Remote execution on {host} failed: {detail}")]
    OtherExecutionFailure {
        /// Target host
        host: String,
        /// Captured error text
        detail: String,
    },

    /// Remote command exceeded the configured time budget.
    #[error("Remote execution on {host} timed out after {timeout_secs}s")]
    CommandTimedOut {
        /// Target host
        host: String,
        /// Budget in seconds
        timeout_secs: u64,
    },

    /// A local helper binary (`ansible`, `ssh-keygen`) could not be started.
    #[error("Failed to run '{program}': {source}")]
    Spawn {
        /// Program name
        program: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Neither the primary nor the fallback query yielded the server public key.
    #[error("Could not obtain the WireGuard public key of {host}")]
    PublicKeyUnavailable {
        /// Target host
        host: String,
    },

    /// Reading or writing durable state failed.
    #[error("State I/O on {}: {source}", path.display())]
    StateIo {
        /// File or directory involved
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Durable state could not be serialized.
    #[error("State encoding failed: {0}")]
    StateFormat(#[from] serde_json::Error),
}

impl ProvisionError {
    /// Build a remote failure from captured output, classifying it by its text.
    ///
    /// Matching is case-insensitive against
    /// [`AUTH_OR_REACHABILITY_MARKERS`].
    #[must_use]
    pub fn from_remote_output(host: &str, detail: &str) -> Self {
        let lowered = detail.to_lowercase();
        let detail = detail.trim().to_string();
        if AUTH_OR_REACHABILITY_MARKERS
            .iter()
            .any(|marker| lowered.contains(marker))
        {
            Self::AuthOrReachabilityFailure {
                host: host.to_string(),
                detail,
            }
        } else {
            Self::OtherExecutionFailure {
                host: host.to_string(),
                detail,
            }
        }
    }

    /// Shorthand for wrapping an I/O error with the path it concerns.
    pub fn state_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StateIo {
            path: path.into(),
            source,
        }
    }

    /// Whether this failure may be cured by installing the controller key.
    #[must_use]
    pub fn is_auth_or_reachability(&self) -> bool {
        matches!(self, Self::AuthOrReachabilityFailure { .. })
    }

    /// Whether the failure stems from caller input rather than the system.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidPeerName { .. }
                | Self::InvalidPublicKey { .. }
                | Self::InvalidRequest { .. }
        )
    }

    /// Stable machine-readable reason, used in API error bodies and metrics labels.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::PoolExhausted { .. } => "PoolExhausted",
            Self::InvalidPeerName { .. } => "InvalidPeerName",
            Self::InvalidPublicKey { .. } => "InvalidPublicKey",
            Self::InvalidRequest { .. } => "InvalidRequest",
            Self::KeyGenFailed { .. } => "KeyGenFailed",
            Self::BootstrapFailed { .. } => "BootstrapFailed",
            Self::AuthOrReachabilityFailure { .. } => "AuthOrReachabilityFailure",
            Self::OtherExecutionFailure { .. } => "OtherExecutionFailure",
            Self::CommandTimedOut { .. } => "CommandTimedOut",
            Self::Spawn { .. } => "SpawnFailed",
            Self::PublicKeyUnavailable { .. } => "PublicKeyUnavailable",
            Self::StateIo { .. } => "StateIo",
            Self::StateFormat(_) => "StateFormat",
        }
    }
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
