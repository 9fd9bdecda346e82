// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Input validation for peer names and WireGuard keys.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::constants::{MAX_PEER_NAME_LEN, WG_KEY_LEN};
use crate::errors::{ProvisionError, Result};

/// Check that a peer name is usable as a pool key.
///
/// Accepts 1 to 64 characters from `[A-Za-z0-9._-]`.
///
/// # Errors
///
/// Returns [`ProvisionError::InvalidPeerName`] otherwise.
pub fn validate_peer_name(name: &str) -> Result<()> {
    let reject = |reason: &str| {
        Err(ProvisionError::InvalidPeerName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };

    if name.is_empty() {
        return reject("must not be empty");
    }
    if name.len() > MAX_PEER_NAME_LEN {
        return reject("must be at most 64 characters");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return reject("only letters, digits, '.', '_' and '-' are allowed");
    }
    Ok(())
}

/// Whether `key` is a base64-encoded 32-byte WireGuard key.
#[must_use]
pub fn is_wg_public_key(key: &str) -> bool {
    BASE64
        .decode(key.trim())
        .is_ok_and(|bytes| bytes.len() == WG_KEY_LEN)
}

/// Validate a WireGuard public key supplied by a caller.
///
/// # Errors
///
/// Returns [`ProvisionError::InvalidPublicKey`] if the key does not decode to 32 bytes.
pub fn validate_wg_public_key(key: &str) -> Result<()> {
    if is_wg_public_key(key) {
        Ok(())
    } else {
        Err(ProvisionError::InvalidPublicKey {
            key: key.to_string(),
        })
    }
}
