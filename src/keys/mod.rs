// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Controller key material.
//!
//! The controller authenticates to target hosts with one SSH keypair stored in
//! the state directory. The pair is created lazily with `ssh-keygen` the first
//! time it is needed and never rotated automatically.
//!
//! Creation is serialized twice: an in-process mutex covers concurrent requests
//! of this service, and an exclusive lock file next to the key covers other
//! processes sharing the state directory. The lock file is best-effort; if it
//! cannot be taken the existence checks still prevent overwriting a key.

pub mod lock;

use base64::{
    engine::general_purpose::{STANDARD as BASE64, STANDARD_NO_PAD as BASE64_NO_PAD},
    Engine,
};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{KeyAlgorithm, KeyConfig};
use crate::constants::{
    ED25519_KDF_ROUNDS, FIPS_ENABLED_PATH, KEY_COMMENT, KEY_LOCK_DELAY_MILLIS, KEY_LOCK_RETRIES,
    PRIVATE_KEY_MODE, PUBLIC_KEY_MODE, RSA_KEY_BITS, STATE_DIR_MODE,
};
use crate::errors::{ProvisionError, Result};
use lock::LockFile;

const SSH_KEYGEN: &str = "ssh-keygen";

/// Paths of the controller keypair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerKeypair {
    /// Private key (owner read/write only)
    pub private_key: PathBuf,
    /// Public key (world readable)
    pub public_key: PathBuf,
}

/// Creates and serves the controller keypair.
#[derive(Debug)]
pub struct KeyMaterialManager {
    config: KeyConfig,
    guard: Mutex<()>,
}

impl KeyMaterialManager {
    #[must_use]
    pub fn new(config: KeyConfig) -> Self {
        Self {
            config,
            guard: Mutex::new(()),
        }
    }

    /// Paths of the keypair. Does not create anything.
    #[must_use]
    pub fn keypair(&self) -> ControllerKeypair {
        let private_key = self.config.state_dir.join(&self.config.key_name);
        let public_key = self
            .config
            .state_dir
            .join(format!("{}.pub", self.config.key_name));
        ControllerKeypair {
            private_key,
            public_key,
        }
    }

    fn lock_path(&self) -> PathBuf {
        self.config
            .state_dir
            .join(format!(".{}.lock", self.config.key_name))
    }

    /// Make sure both key files exist and return the private key path.
    ///
    /// - both files present: returned unchanged
    /// - only the private key present: the public key is derived from it
    /// - neither present: a new passphrase-less pair is generated
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::KeyGenFailed`] if `ssh-keygen` cannot be run or
    /// fails, and [`ProvisionError::StateIo`] for filesystem errors.
    pub async fn ensure_keypair(&self) -> Result<PathBuf> {
        let _guard = self.guard.lock().await;
        let pair = self.keypair();

        if pair.private_key.exists() && pair.public_key.exists() {
            return Ok(pair.private_key);
        }

        let state_dir = &self.config.state_dir;
        tokio::fs::create_dir_all(state_dir)
            .await
            .map_err(|e| ProvisionError::state_io(state_dir, e))?;

        let _lock = LockFile::acquire(
            &self.lock_path(),
            KEY_LOCK_RETRIES,
            Duration::from_millis(KEY_LOCK_DELAY_MILLIS),
        )
        .await;

        // Another process may have finished while we waited for the lock
        if !pair.private_key.exists() {
            let algorithm = resolve_algorithm(self.config.algorithm, Path::new(FIPS_ENABLED_PATH));
            generate_keypair(&pair.private_key, algorithm).await?;
        }
        if !pair.public_key.exists() {
            derive_public_key(&pair.private_key, &pair.public_key).await?;
        }

        apply_permissions(state_dir, &pair);

        if let Ok(text) = tokio::fs::read_to_string(&pair.public_key).await {
            if let Some(fp) = fingerprint_of(&text) {
                info!(path = %pair.private_key.display(), fingerprint = %fp, "Controller key ready");
            }
        }
        Ok(pair.private_key)
    }

    /// Public key text (one `authorized_keys` line, without trailing newline).
    ///
    /// # Errors
    ///
    /// Propagates [`Self::ensure_keypair`] failures and read errors.
    pub async fn public_key(&self) -> Result<String> {
        self.ensure_keypair().await?;
        let path = self.keypair().public_key;
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ProvisionError::state_io(&path, e))?;
        Ok(text.trim().to_string())
    }

    /// OpenSSH-style `SHA256:` fingerprint of the controller key.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::KeyGenFailed`] if the public key cannot be parsed.
    pub async fn fingerprint(&self) -> Result<String> {
        let public_key = self.public_key().await?;
        fingerprint_of(&public_key).ok_or_else(|| ProvisionError::KeyGenFailed {
            reason: "public key is not in OpenSSH format".to_string(),
        })
    }
}

/// Pick the concrete algorithm; `Auto` falls back to RSA under FIPS.
fn resolve_algorithm(requested: KeyAlgorithm, fips_flag: &Path) -> KeyAlgorithm {
    match requested {
        KeyAlgorithm::Auto if fips_enabled(fips_flag) => KeyAlgorithm::Rsa,
        KeyAlgorithm::Auto => KeyAlgorithm::Ed25519,
        other => other,
    }
}

fn fips_enabled(flag: &Path) -> bool {
    std::fs::read_to_string(flag).is_ok_and(|v| v.trim() == "1")
}

fn keygen_args(algorithm: KeyAlgorithm) -> Vec<String> {
    match algorithm {
        KeyAlgorithm::Rsa => vec!["-t".into(), "rsa".into(), "-b".into(), RSA_KEY_BITS.to_string()],
        KeyAlgorithm::Ed25519 | KeyAlgorithm::Auto => vec![
            "-t".into(),
            "ed25519".into(),
            "-a".into(),
            ED25519_KDF_ROUNDS.to_string(),
        ],
    }
}

async fn generate_keypair(private_key: &Path, algorithm: KeyAlgorithm) -> Result<()> {
    info!(path = %private_key.display(), ?algorithm, "Generating controller SSH key");

    let output = Command::new(SSH_KEYGEN)
        .args(keygen_args(algorithm))
        .arg("-f")
        .arg(private_key)
        .args(["-N", "", "-C", KEY_COMMENT, "-q"])
        .output()
        .await
        .map_err(|e| ProvisionError::KeyGenFailed {
            reason: format!("cannot run {SSH_KEYGEN}: {e}"),
        })?;

    if !output.status.success() {
        return Err(ProvisionError::KeyGenFailed {
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

async fn derive_public_key(private_key: &Path, public_key: &Path) -> Result<()> {
    debug!(path = %public_key.display(), "Deriving missing public key");

    let output = Command::new(SSH_KEYGEN)
        .arg("-y")
        .arg("-f")
        .arg(private_key)
        .output()
        .await
        .map_err(|e| ProvisionError::KeyGenFailed {
            reason: format!("cannot run {SSH_KEYGEN}: {e}"),
        })?;

    if !output.status.success() {
        return Err(ProvisionError::KeyGenFailed {
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    if !text.ends_with('\n') {
        text.push('\n');
    }
    tokio::fs::write(public_key, text)
        .await
        .map_err(|e| ProvisionError::state_io(public_key, e))
}

#[cfg(unix)]
fn apply_permissions(state_dir: &Path, pair: &ControllerKeypair) {
    use std::os::unix::fs::PermissionsExt;

    for (path, mode) in [
        (state_dir, STATE_DIR_MODE),
        (pair.private_key.as_path(), PRIVATE_KEY_MODE),
        (pair.public_key.as_path(), PUBLIC_KEY_MODE),
    ] {
        if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)) {
            warn!(path = %path.display(), error = %e, "Failed to set permissions");
        }
    }
}

#[cfg(not(unix))]
fn apply_permissions(_state_dir: &Path, _pair: &ControllerKeypair) {}

/// Fingerprint of an OpenSSH public key line, as printed by `ssh-keygen -l`.
#[must_use]
pub fn fingerprint_of(public_key: &str) -> Option<String> {
    let blob = public_key.split_whitespace().nth(1)?;
    let raw = BASE64.decode(blob).ok()?;
    let digest = Sha256::digest(&raw);
    Some(format!("SHA256:{}", BASE64_NO_PAD.encode(digest)))
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
