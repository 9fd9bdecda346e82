// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Remote access bootstrapping.
//!
//! A freshly installed host usually accepts only password logins. The
//! [`Bootstrapper`] logs in once with the one-time password and appends the
//! controller public key to the user's `authorized_keys`, after which the
//! controller switches to key-based access.
//!
//! The [`script`] submodule renders the self-enrollment alternative: a script
//! the host operator runs locally when inbound password SSH is disabled.

pub mod script;

use std::sync::Arc;
use tracing::{info, warn};

use crate::constants::BOOTSTRAP_OK_MARKER;
use crate::errors::{ProvisionError, Result};
use crate::metrics;
use crate::remote::{RemoteExecutor, RemoteTarget, RemoteTask};

/// Installs the controller public key on target hosts over password SSH.
#[derive(Clone)]
pub struct Bootstrapper {
    executor: Arc<dyn RemoteExecutor>,
    ssh_port: u16,
}

impl Bootstrapper {
    #[must_use]
    pub fn new(executor: Arc<dyn RemoteExecutor>, ssh_port: u16) -> Self {
        Self { executor, ssh_port }
    }

    /// Append `controller_public_key` to `user`'s authorized keys on `host`.
    ///
    /// Runs without privilege elevation since the file belongs to `user`.
    /// Repeated calls leave exactly one copy of the key in place.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::BootstrapFailed`] if the remote run fails or
    /// its output lacks the confirmation marker.
    pub async fn bootstrap_key_access(
        &self,
        host: &str,
        user: &str,
        password: &str,
        controller_public_key: &str,
    ) -> Result<()> {
        info!(host = %host, user = %user, "Bootstrapping controller key over password SSH");

        let target = RemoteTarget::with_password(host, self.ssh_port, user, password);
        let task = RemoteTask::shell(authorized_key_script(controller_public_key));

        let outcome = match self.executor.run(&target, &task, false).await {
            Ok(output) if output.contains(BOOTSTRAP_OK_MARKER) => Ok(()),
            Ok(output) => Err(ProvisionError::BootstrapFailed {
                host: host.to_string(),
                reason: format!(
                    "confirmation marker missing from output: {}",
                    output.trim()
                ),
            }),
            Err(e) => Err(ProvisionError::BootstrapFailed {
                host: host.to_string(),
                reason: e.to_string(),
            }),
        };

        metrics::record_bootstrap(outcome.is_ok());
        match &outcome {
            Ok(()) => info!(host = %host, user = %user, "Controller key installed"),
            Err(e) => warn!(host = %host, user = %user, error = %e, "Bootstrap failed"),
        }
        outcome
    }
}

/// Quote `value` for a POSIX shell single-quoted string.
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// POSIX shell snippet that appends `public_key` to `~/.ssh/authorized_keys`
/// unless an identical line is already present, then prints the marker.
#[must_use]
pub fn authorized_key_script(public_key: &str) -> String {
    let key = shell_quote(public_key.trim());
    format!(
        r#"set -e
umask 077
d="$HOME/.ssh"
f="$d/authorized_keys"
mkdir -p "$d"
chmod 700 "$d"
touch "$f"
chmod 600 "$f"
if [ -s "$f" ] && [ -n "$(tail -c 1 "$f")" ]; then echo >> "$f"; fi
KEY={key}
grep -qxF "$KEY" "$f" || printf '%s\n' "$KEY" >> "$f"
echo {BOOTSTRAP_OK_MARKER}"#
    )
}
