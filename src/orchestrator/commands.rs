// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Remote command templates for the WireGuard server.
//!
//! The execution mode only changes the text of the commands: natively they run
//! as-is, in container mode they are wrapped in `docker exec <container>` and
//! key files are read from the container's config volume.

use ipnet::Ipv4Net;

use crate::config::{WgMode, WireGuardConfig};
use crate::constants::{WG_CONTAINER_KEY_DIR, WG_HOST_KEY_DIR};

fn wrap(wg: &WireGuardConfig, command: &str) -> String {
    match wg.mode {
        WgMode::Host => command.to_string(),
        WgMode::Container => format!("docker exec {} {command}", wg.container_name),
    }
}

/// Register `peer_public_key` on the interface with `client_address` as its
/// only allowed range. Re-running it for the same peer is harmless.
#[must_use]
pub fn add_peer_command(
    wg: &WireGuardConfig,
    peer_public_key: &str,
    client_address: Ipv4Net,
) -> String {
    wrap(
        wg,
        &format!(
            "wg set {} peer {} allowed-ips {client_address}",
            wg.interface,
            peer_public_key.trim()
        ),
    )
}

/// Ask the running interface for its public key.
#[must_use]
pub fn public_key_command(wg: &WireGuardConfig) -> String {
    wrap(wg, &format!("wg show {} public-key", wg.interface))
}

/// Read the server public key from disk, deriving it from the private key
/// when only that one is present.
#[must_use]
pub fn public_key_fallback_command(wg: &WireGuardConfig) -> String {
    let dir = match wg.mode {
        WgMode::Host => WG_HOST_KEY_DIR,
        WgMode::Container => WG_CONTAINER_KEY_DIR,
    };
    let read = format!("cat {dir}/server.pub 2>/dev/null || wg pubkey < {dir}/server.key");
    match wg.mode {
        WgMode::Host => read,
        WgMode::Container => wrap(wg, &format!("sh -c '{read}'")),
    }
}
