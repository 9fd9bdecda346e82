// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! HTTP API.
//!
//! | Method | Path                 | Purpose                                  |
//! |--------|----------------------|------------------------------------------|
//! | POST   | `/wg/server_params`  | Provision a peer and return its profile  |
//! | GET    | `/bootstrap/pubkey`  | Controller public key (plain text)       |
//! | GET    | `/bootstrap/script`  | Self-enrollment shell script             |
//! | POST   | `/install/check-ssh` | Verify SSH credentials for a host        |
//! | POST   | `/install/run`       | Run the install playbooks against a host |
//! | GET    | `/health`            | Liveness                                 |
//! | GET    | `/metrics`           | Prometheus metrics                       |

pub mod handlers;
pub mod models;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::install::Installer;
use crate::orchestrator::PeerOrchestrator;

/// State shared by all handlers.
pub struct AppState {
    pub orchestrator: Arc<PeerOrchestrator>,
    pub installer: Arc<Installer>,
    /// Port used when a connectivity check does not name one
    pub ssh_port: u16,
    /// User used when a request does not name one
    pub default_ssh_user: String,
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/wg/server_params", post(handlers::server_params))
        .route("/bootstrap/pubkey", get(handlers::bootstrap_pubkey))
        .route("/bootstrap/script", get(handlers::bootstrap_script))
        .route("/install/check-ssh", post(handlers::check_ssh))
        .route("/install/run", post(handlers::install_run))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::prometheus_metrics))
        .with_state(state)
}
