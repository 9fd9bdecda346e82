// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Self-enrollment script served at `GET /bootstrap/script`.
//!
//! Hosts that refuse inbound password SSH can run this script locally
//! (`curl -fsSL <base>/bootstrap/script | bash`). It creates a service
//! account, authorizes the controller key fetched from `<base>/bootstrap/pubkey`
//! and prepares the host for Ansible. Every step is safe to repeat.

use axum::http::HeaderMap;
use url::Url;

use super::shell_quote;
use crate::constants::{BOOTSTRAP_STATUS_DIR, BOOTSTRAP_SUDOERS_FILE};
use crate::errors::{ProvisionError, Result};

const MAX_USER_LEN: usize = 32;

/// Check a service account name against `[a-z_][a-z0-9_-]{0,31}`.
///
/// # Errors
///
/// Returns [`ProvisionError::InvalidRequest`] for any other name.
pub fn validate_service_user(user: &str) -> Result<()> {
    let mut chars = user.chars();
    let valid_first = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let valid_rest =
        chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-'));

    if valid_first && valid_rest && user.len() <= MAX_USER_LEN {
        Ok(())
    } else {
        Err(ProvisionError::InvalidRequest {
            reason: format!("invalid service user name '{user}'"),
        })
    }
}

/// External base URL of this service as seen by the caller.
///
/// `X-Forwarded-Proto` plus `X-Forwarded-Host` win when both are present; a
/// non-default `X-Forwarded-Port` is appended. Otherwise the `Host` header is
/// used with plain HTTP.
///
/// # Errors
///
/// Returns [`ProvisionError::InvalidRequest`] if no usable host is available.
pub fn base_url_from_headers(headers: &HeaderMap) -> Result<Url> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let forwarded = match (header("x-forwarded-proto"), header("x-forwarded-host")) {
        (Some(proto @ ("http" | "https")), Some(host)) => {
            let default_port = if proto == "https" { "443" } else { "80" };
            match header("x-forwarded-port") {
                Some(port) if port != default_port && !host.contains(':') => {
                    Some(format!("{proto}://{host}:{port}/"))
                }
                _ => Some(format!("{proto}://{host}/")),
            }
        }
        _ => None,
    };

    let base = match forwarded {
        Some(base) => base,
        None => {
            let host = header("host").ok_or_else(|| ProvisionError::InvalidRequest {
                reason: "missing Host header".to_string(),
            })?;
            format!("http://{host}/")
        }
    };

    Url::parse(&base).map_err(|e| ProvisionError::InvalidRequest {
        reason: format!("cannot derive base URL from '{base}': {e}"),
    })
}

/// Render the self-enrollment script for `user`.
///
/// # Errors
///
/// Returns [`ProvisionError::InvalidRequest`] if `user` is not an acceptable
/// account name.
pub fn render_enrollment_script(base_url: &Url, user: &str, allow_nopasswd: bool) -> Result<String> {
    validate_service_user(user)?;
    let pubkey_url = base_url
        .join("bootstrap/pubkey")
        .map_err(|e| ProvisionError::InvalidRequest {
            reason: format!("cannot build public key URL: {e}"),
        })?;
    let pubkey_url = shell_quote(pubkey_url.as_str());
    let nopasswd = if allow_nopasswd { "1" } else { "0" };

    Ok(format!(
        r#"#!/usr/bin/env bash
set -euo pipefail

SVC_USER="{user}"
PUBKEY_URL={pubkey_url}
ALLOW_NOPASSWD="{nopasswd}"
SUDOERS_FILE="{BOOTSTRAP_SUDOERS_FILE}"
STATUS_DIR="{BOOTSTRAP_STATUS_DIR}"

if ! command -v curl >/dev/null 2>&1; then
  echo "curl is required; install it and run this script again." >&2
  exit 1
fi

# Service account
if ! id "$SVC_USER" >/dev/null 2>&1; then
  sudo useradd -m -s /bin/bash "$SVC_USER"
fi

home="$(getent passwd "$SVC_USER" | cut -d: -f6)"
sudo mkdir -p "$home/.ssh"
sudo chmod 700 "$home/.ssh"
sudo chown "$SVC_USER:$SVC_USER" "$home/.ssh"

# Controller key, appended once
tmp_pub="$(mktemp)"
trap 'rm -f "$tmp_pub"' EXIT
curl -fsSL "$PUBKEY_URL" -o "$tmp_pub"
if [ ! -s "$tmp_pub" ]; then
  echo "Could not download the controller public key from $PUBKEY_URL" >&2
  exit 1
fi
key="$(head -n 1 "$tmp_pub")"
sudo touch "$home/.ssh/authorized_keys"
sudo chmod 600 "$home/.ssh/authorized_keys"
if ! sudo grep -qxF "$key" "$home/.ssh/authorized_keys"; then
  printf '%s\n' "$key" | sudo tee -a "$home/.ssh/authorized_keys" >/dev/null
fi
sudo chown "$SVC_USER:$SVC_USER" "$home/.ssh/authorized_keys"

# Passwordless sudo for automation
if [ "$ALLOW_NOPASSWD" = "1" ]; then
  echo "$SVC_USER ALL=(ALL) NOPASSWD:ALL" | sudo tee "$SUDOERS_FILE" >/dev/null
  sudo chmod 440 "$SUDOERS_FILE"
  if ! sudo visudo -cf "$SUDOERS_FILE" >/dev/null; then
    echo "Generated sudoers entry is invalid; removing it." >&2
    sudo rm -f "$SUDOERS_FILE"
    exit 1
  fi
fi

# Python for Ansible
if ! command -v python3 >/dev/null 2>&1; then
  if command -v apt-get >/dev/null 2>&1; then
    sudo apt-get update -y && sudo apt-get install -y python3
  elif command -v dnf >/dev/null 2>&1; then
    sudo dnf install -y python3
  elif command -v yum >/dev/null 2>&1; then
    sudo yum install -y python3
  else
    echo "Unknown package manager; install python3 manually." >&2
    exit 1
  fi
fi

# Status marker
sudo mkdir -p "$STATUS_DIR"
printf '{{"done":true,"user":"%s","ts":"%s"}}\n' "$SVC_USER" "$(date -u +%Y-%m-%dT%H:%M:%SZ)" \
  | sudo tee "$STATUS_DIR/bootstrap.json" >/dev/null
sudo chmod 644 "$STATUS_DIR/bootstrap.json"

echo "Bootstrap completed for user '$SVC_USER'."
"#
    ))
}
