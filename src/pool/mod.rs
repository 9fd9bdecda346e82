// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Address pool allocator.
//!
//! Hands out single host addresses (`/32`) from one IPv4 subnet to named peers.
//! The mapping is the only durable state of the service and lives in one JSON
//! file that is rewritten atomically on every new allocation:
//!
//! ```json
//! {
//!   "allocated": {
//!     "alice": { "address": "10.13.13.2/32", "allocated_at": "2025-01-01T00:00:00Z" }
//!   }
//! }
//! ```
//!
//! An unreadable file is renamed aside with a `.corrupt-<timestamp>` suffix
//! and the pool starts empty.
//!
//! Allocation is a critical section guarded by an in-process mutex, so two
//! concurrent first-time lookups for different peers never receive the same
//! address. Lookups of existing peers never touch the file.

use chrono::{DateTime, Utc};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::errors::{ProvisionError, Result};
use crate::metrics;
use crate::validation::validate_peer_name;

/// One recorded allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Assigned address in CIDR notation (always `/32`)
    pub address: Ipv4Net,
    /// When the address was first assigned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocated_at: Option<DateTime<Utc>>,
}

/// On-disk layout of the pool file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PoolState {
    #[serde(default)]
    allocated: BTreeMap<String, Allocation>,
}

/// Address pool bound to one subnet with one reserved server address.
#[derive(Debug)]
pub struct AddressPool {
    subnet: Ipv4Net,
    reserved: Ipv4Addr,
    state_file: PathBuf,
    state: Mutex<PoolState>,
}

impl AddressPool {
    /// Open the pool, loading any existing mapping from disk.
    ///
    /// A missing file is an empty pool. A file that cannot be parsed is also
    /// treated as empty (with a warning); the next allocation overwrites it.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::StateIo`] if the file exists but cannot be read.
    pub fn open(config: PoolConfig) -> Result<Self> {
        let state = load_state(&config.state_file)?;
        info!(
            subnet = %config.subnet,
            reserved = %config.reserved,
            allocated = state.allocated.len(),
            "Address pool loaded"
        );
        metrics::set_pool_allocated(state.allocated.len());

        Ok(Self {
            subnet: config.subnet.trunc(),
            reserved: config.reserved,
            state_file: config.state_file,
            state: Mutex::new(state),
        })
    }

    /// Subnet this pool draws from.
    #[must_use]
    pub fn subnet(&self) -> Ipv4Net {
        self.subnet
    }

    /// Address reserved for the VPN server.
    #[must_use]
    pub fn reserved(&self) -> Ipv4Addr {
        self.reserved
    }

    #[must_use]
    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    /// Return the address of `peer_name`, allocating the lowest free one on first use.
    ///
    /// Idempotent: a peer with a recorded address always gets the same address
    /// back, and the file is only rewritten when a new allocation is made.
    ///
    /// # Errors
    ///
    /// - [`ProvisionError::InvalidPeerName`] if the name is not acceptable
    /// - [`ProvisionError::PoolExhausted`] if no free address remains
    /// - [`ProvisionError::StateIo`] / [`ProvisionError::StateFormat`] if persisting fails;
    ///   the in-memory mapping is left unchanged in that case
    pub fn get_or_allocate(&self, peer_name: &str) -> Result<Ipv4Net> {
        validate_peer_name(peer_name)?;
        let mut state = self.lock();

        if let Some(existing) = state.allocated.get(peer_name) {
            debug!(peer = %peer_name, address = %existing.address, "Reusing existing allocation");
            return Ok(existing.address);
        }

        let address = self.first_free(&state)?;
        let mut updated = state.clone();
        updated.allocated.insert(
            peer_name.to_string(),
            Allocation {
                address,
                allocated_at: Some(Utc::now()),
            },
        );
        persist_state(&self.state_file, &updated)?;
        *state = updated;

        info!(peer = %peer_name, address = %address, "Allocated new address");
        metrics::record_pool_allocation(state.allocated.len());
        Ok(address)
    }

    /// Address recorded for `peer_name`, if any. Never allocates.
    #[must_use]
    pub fn lookup(&self, peer_name: &str) -> Option<Ipv4Net> {
        self.lock().allocated.get(peer_name).map(|a| a.address)
    }

    /// Snapshot of every recorded allocation, ordered by peer name.
    #[must_use]
    pub fn allocations(&self) -> BTreeMap<String, Allocation> {
        self.lock().allocated.clone()
    }

    /// Number of addresses still free for new peers.
    #[must_use]
    pub fn available(&self) -> usize {
        let state = self.lock();
        let used = used_addresses(&state);
        self.subnet
            .hosts()
            .filter(|host| *host != self.reserved && !used.contains(host))
            .count()
    }

    fn first_free(&self, state: &PoolState) -> Result<Ipv4Net> {
        let used = used_addresses(state);
        let host = self
            .subnet
            .hosts()
            .find(|host| *host != self.reserved && !used.contains(host))
            .ok_or_else(|| ProvisionError::PoolExhausted {
                subnet: self.subnet.to_string(),
            })?;
        Ok(Ipv4Net::from(host))
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn used_addresses(state: &PoolState) -> HashSet<Ipv4Addr> {
    state.allocated.values().map(|a| a.address.addr()).collect()
}

fn load_state(path: &Path) -> Result<PoolState> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(PoolState::default()),
        Err(e) => return Err(ProvisionError::state_io(path, e)),
    };

    if raw.trim().is_empty() {
        return Ok(PoolState::default());
    }

    match serde_json::from_str::<PoolState>(&raw) {
        Ok(state) => Ok(state),
        Err(e) => {
            let moved_to = set_aside(path)?;
            warn!(
                path = %path.display(),
                moved_to = %moved_to.display(),
                error = %e,
                "Pool state file is unreadable, starting with an empty pool"
            );
            Ok(PoolState::default())
        }
    }
}

/// Rename an unreadable state file to `<name>.corrupt-<timestamp>` so the next
/// write does not destroy it.
fn set_aside(path: &Path) -> Result<PathBuf> {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S%.3fZ")));
    let moved_to = path.with_file_name(name);
    std::fs::rename(path, &moved_to).map_err(|e| ProvisionError::state_io(path, e))?;
    Ok(moved_to)
}

/// Write the state next to its final location and rename it into place.
fn persist_state(path: &Path, state: &PoolState) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| ProvisionError::state_io(dir, e))?;

    let json = serde_json::to_vec_pretty(state)?;
    let mut tmp =
        tempfile::NamedTempFile::new_in(dir).map_err(|e| ProvisionError::state_io(dir, e))?;
    tmp.write_all(&json)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| ProvisionError::state_io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| ProvisionError::state_io(path, e.error))?;
    Ok(())
}
