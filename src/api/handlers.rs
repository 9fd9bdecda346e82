// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Route handlers.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use super::models::{
    BootstrapScriptQuery, CheckSshRequest, CheckSshResponse, ErrorResponse, HealthResponse,
    InstallRunRequest, InstallRunResponse, ServerParamsRequest, ServerParamsResponse,
    SshCredential,
};
use super::AppState;
use crate::bootstrap::script::{base_url_from_headers, render_enrollment_script};
use crate::constants::SHELL_SCRIPT_CONTENT_TYPE;
use crate::errors::ProvisionError;
use crate::metrics;
use crate::orchestrator::PeerRequest;
use crate::remote::{last_non_blank_line, RemoteTarget, RemoteTask};

/// Status code plus JSON error body.
pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, detail: String, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            detail,
            code: code.to_string(),
        }),
    )
}

/// 400 for caller mistakes, 500 with a `Provisioning error:` prefix otherwise.
fn provisioning_error(e: &ProvisionError) -> ApiError {
    if e.is_client_error() {
        api_error(StatusCode::BAD_REQUEST, e.to_string(), e.reason())
    } else {
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Provisioning error: {e}"),
            e.reason(),
        )
    }
}

fn json_rejection(rejection: &JsonRejection) -> ApiError {
    api_error(rejection.status(), rejection.body_text(), "InvalidRequest")
}

fn query_rejection(rejection: &QueryRejection) -> ApiError {
    api_error(rejection.status(), rejection.body_text(), "InvalidRequest")
}

/// `POST /wg/server_params`: allocate an address, register the peer on the
/// server and return the client's connection profile.
pub async fn server_params(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ServerParamsRequest>, JsonRejection>,
) -> Result<Json<ServerParamsResponse>, ApiError> {
    let Json(req) = payload.map_err(|e| json_rejection(&e))?;
    let request = PeerRequest::from(req);
    debug!(peer = %request.peer_name, host = %request.host, "Server params requested");

    state
        .orchestrator
        .provision(&request)
        .await
        .map(|result| Json(result.into()))
        .map_err(|e| provisioning_error(&e))
}

/// `GET /bootstrap/pubkey`: the controller public key as plain text.
pub async fn bootstrap_pubkey(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let public_key = state.orchestrator.keys().public_key().await.map_err(|e| {
        error!(error = %e, "Controller public key unavailable");
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Public key not available: {e}"),
            e.reason(),
        )
    })?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        format!("{public_key}\n"),
    ))
}

/// `GET /bootstrap/script`: self-enrollment script for hosts without password SSH.
pub async fn bootstrap_script(
    headers: HeaderMap,
    query: Result<Query<BootstrapScriptQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query.map_err(|e| query_rejection(&e))?;
    let allow_nopasswd = match query.nopasswd {
        0 => false,
        1 => true,
        other => {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                format!("nopasswd must be 0 or 1, got {other}"),
                "InvalidRequest",
            ))
        }
    };

    let script = base_url_from_headers(&headers)
        .and_then(|base| render_enrollment_script(&base, &query.user, allow_nopasswd))
        .map_err(|e| provisioning_error(&e))?;
    debug!(user = %query.user, allow_nopasswd, "Rendered bootstrap script");

    Ok((
        [
            (header::CONTENT_TYPE, SHELL_SCRIPT_CONTENT_TYPE),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"bootstrap.sh\"",
            ),
        ],
        script,
    ))
}

/// Target described by a connectivity block, plus the temp file holding its
/// private key when one was sent. The file must outlive every run.
fn ssh_target(
    state: &AppState,
    req: &CheckSshRequest,
) -> Result<(RemoteTarget, Option<NamedTempFile>), ApiError> {
    let credential = req.credential().map_err(|e| provisioning_error(&e))?;
    let host = req.host.trim();
    if host.is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "host must not be empty".to_string(),
            "InvalidRequest",
        ));
    }
    let port = req.ssh_port.unwrap_or(state.ssh_port);
    let user = req
        .user
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .unwrap_or(state.default_ssh_user.as_str());

    Ok(match credential {
        SshCredential::Pem(pem) => {
            let file = write_private_key(&pem).map_err(|e| provisioning_error(&e))?;
            let target = RemoteTarget::with_key(host, port, user, file.path().to_path_buf());
            (target, Some(file))
        }
        SshCredential::Password(password) => {
            (RemoteTarget::with_password(host, port, user, &password), None)
        }
    })
}

/// `POST /install/check-ssh`: prove the given credentials open a shell on the host.
pub async fn check_ssh(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CheckSshRequest>, JsonRejection>,
) -> Result<Json<CheckSshResponse>, ApiError> {
    let Json(req) = payload.map_err(|e| json_rejection(&e))?;
    // The key file is removed when `_pem_file` drops, after the check
    let (target, _pem_file) = ssh_target(&state, &req)?;

    info!(
        host = %target.host,
        user = %target.user,
        port = target.port,
        "Checking SSH connectivity"
    );
    match state
        .orchestrator
        .executor()
        .run(&target, &RemoteTask::shell("echo ok"), false)
        .await
    {
        Ok(output) => Ok(Json(CheckSshResponse {
            ok: true,
            stdout: last_non_blank_line(&output).to_string(),
        })),
        Err(e) => {
            warn!(host = %target.host, error = %e, "SSH check failed");
            Err(api_error(
                StatusCode::BAD_REQUEST,
                format!("SSH failed: {e}"),
                e.reason(),
            ))
        }
    }
}

/// `POST /install/run`: run the install playbooks against the host and return
/// their output once the last one finishes.
pub async fn install_run(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<InstallRunRequest>, JsonRejection>,
) -> Result<Json<InstallRunResponse>, ApiError> {
    let Json(req) = payload.map_err(|e| json_rejection(&e))?;
    let (target, _pem_file) = ssh_target(&state, &req.ssh)?;

    match state.installer.run(&target, &req.stack_vars()).await {
        Ok(report) => Ok(Json(report.into())),
        Err(e) if e.is_client_error() => {
            Err(api_error(StatusCode::BAD_REQUEST, e.to_string(), e.reason()))
        }
        Err(e) => Err(api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Install failed: {e}"),
            e.reason(),
        )),
    }
}

/// Owner-only temp file holding a caller-supplied private key.
fn write_private_key(pem: &str) -> crate::errors::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("pem_")
        .tempfile()
        .map_err(|e| ProvisionError::state_io(std::env::temp_dir(), e))?;
    let mut contents = pem.trim().to_string();
    contents.push('\n');
    file.write_all(contents.as_bytes())
        .and_then(|()| file.flush())
        .map_err(|e| ProvisionError::state_io(file.path(), e))?;
    Ok(file)
}

/// `GET /health`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// `GET /metrics`: Prometheus text exposition.
pub async fn prometheus_metrics() -> Result<impl IntoResponse, ApiError> {
    let body = metrics::gather_metrics().map_err(|e| {
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {e}"),
            "MetricsEncoding",
        )
    })?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}
