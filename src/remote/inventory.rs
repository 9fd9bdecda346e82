// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Ephemeral single-host inventories.
//!
//! The inventory is rendered as JSON, which Ansible's YAML inventory plugin
//! reads as-is, so passwords and paths never need INI quoting. It lives in a
//! private temporary file that is deleted when the [`Inventory`] is dropped,
//! including on error paths. Playbook variables ride along as `all.vars`, so
//! secrets among them never appear on a command line.

use serde_json::{json, Map, Value};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

use super::{RemoteAuth, RemoteTarget};
use crate::config::ExecutorConfig;
use crate::constants::{INVENTORY_HOST_ALIAS, SSH_TOFU_ARGS};
use crate::errors::{ProvisionError, Result};

/// Temporary inventory file, removed on drop.
#[derive(Debug)]
pub struct Inventory {
    file: NamedTempFile,
}

impl Inventory {
    /// Render the inventory for `target` and write it to a private temp file.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::StateIo`] if the file cannot be written.
    pub fn write(
        target: &RemoteTarget,
        config: &ExecutorConfig,
        vars: Option<&Map<String, Value>>,
    ) -> Result<Self> {
        let document = render(target, config, vars);
        let mut file = tempfile::Builder::new()
            .prefix("inv_")
            .suffix(".json")
            .tempfile()
            .map_err(|e| ProvisionError::state_io(std::env::temp_dir(), e))?;

        serde_json::to_writer(&mut file, &document)?;
        file.flush()
            .map_err(|e| ProvisionError::state_io(file.path(), e))?;
        Ok(Self { file })
    }

    /// Location of the inventory file.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Host variables for `target`, wrapped in an `all.hosts` inventory document.
#[must_use]
pub fn render(
    target: &RemoteTarget,
    config: &ExecutorConfig,
    vars: Option<&Map<String, Value>>,
) -> Value {
    let mut host_vars = Map::new();
    host_vars.insert("ansible_host".into(), json!(target.host));
    host_vars.insert("ansible_port".into(), json!(target.port));
    host_vars.insert("ansible_user".into(), json!(target.user));
    host_vars.insert(
        "ansible_python_interpreter".into(),
        json!(config.python_interpreter),
    );
    host_vars.insert(
        "ansible_timeout".into(),
        json!(config.connect_timeout.as_secs()),
    );

    let mut ssh_args = format!("-o ConnectTimeout={}", config.connect_timeout.as_secs());
    if !config.strict_host_key_checking {
        ssh_args = format!("{SSH_TOFU_ARGS} {ssh_args}");
        host_vars.insert("ansible_host_key_checking".into(), json!(false));
    }

    match &target.auth {
        RemoteAuth::PrivateKey(path) => {
            host_vars.insert(
                "ansible_ssh_private_key_file".into(),
                json!(path.display().to_string()),
            );
            host_vars.insert("ansible_ssh_common_args".into(), json!(ssh_args));
        }
        RemoteAuth::Password(password) => {
            host_vars.insert("ansible_connection".into(), json!("paramiko"));
            host_vars.insert("ansible_password".into(), json!(password));
            if !config.strict_host_key_checking {
                host_vars.insert("ansible_paramiko_host_key_checking".into(), json!(false));
            }
        }
    }

    let mut hosts = Map::new();
    hosts.insert(INVENTORY_HOST_ALIAS.to_string(), Value::Object(host_vars));
    match vars {
        Some(vars) => json!({ "all": { "hosts": hosts, "vars": vars } }),
        None => json!({ "all": { "hosts": hosts } }),
    }
}
