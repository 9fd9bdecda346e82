// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{debug, info, warn};
use wg_provisioner::{
    api::{self, AppState},
    config::{Config, LogFormat},
    install::Installer,
    keys::KeyMaterialManager,
    orchestrator::PeerOrchestrator,
    pool::AddressPool,
    remote::ansible::AnsibleExecutor,
};

fn main() -> Result<()> {
    let config = Config::parse();

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("wg-provisioner")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(config))
}

fn init_tracing(format: LogFormat) {
    // Respects RUST_LOG if set, otherwise defaults to INFO level
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

async fn async_main(config: Config) -> Result<()> {
    init_tracing(config.log_format);
    config.validate()?;

    info!(
        listen = %config.listen,
        state_dir = %config.state_dir.display(),
        subnet = %config.wg_subnet,
        mode = ?config.wg_mode,
        "Starting WireGuard provisioner"
    );

    // The key is needed for every provisioning call; fail at start-up rather than on first use
    let keys = Arc::new(KeyMaterialManager::new(config.key_config()));
    keys.ensure_keypair()
        .await
        .context("Failed to prepare the controller SSH key")?;
    debug!(fingerprint = %keys.fingerprint().await?, "Controller key loaded");

    let pool = Arc::new(
        AddressPool::open(config.pool_config()).context("Failed to open the address pool")?,
    );
    info!(available = pool.available(), "Address pool ready");

    let executor = Arc::new(AnsibleExecutor::new(config.executor_config()));
    let installer = Arc::new(Installer::new(
        Arc::new(AnsibleExecutor::new(config.install_executor_config())),
        config.install_playbooks.clone(),
    ));
    debug!(playbooks = ?installer.playbooks(), "Installer ready");
    let orchestrator = Arc::new(PeerOrchestrator::new(
        executor,
        keys,
        pool,
        config.wireguard_config(),
        config.ssh_port,
    ));

    let state = Arc::new(AppState {
        orchestrator,
        installer,
        ssh_port: config.ssh_port,
        default_ssh_user: config.default_ssh_user.clone(),
    });

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    info!(address = %config.listen, "HTTP API listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("WireGuard provisioner stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received");
}
