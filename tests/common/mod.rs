// Common test utilities for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use wg_provisioner::{
    api::{self, AppState},
    config::{KeyAlgorithm, KeyConfig, PoolConfig, WireGuardConfig},
    errors::Result,
    install::Installer,
    keys::KeyMaterialManager,
    orchestrator::PeerOrchestrator,
    pool::AddressPool,
    remote::{RemoteExecutor, RemoteTarget, RemoteTask},
};

pub const PEER_KEY: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";
pub const SERVER_KEY: &str = "ZGVmZ2hpamtsbW5vcHFyc3R1dnd4eXp7fH1+f4CBgoM=";
pub const CONTROLLER_KEY: &str =
    "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAABAgMEBQYHCAkKCwwNDg8QERITFBUWFxgZGhscHR4f wg-provisioner";

/// Executor that replays canned outputs and records what it was asked to run
#[derive(Default)]
pub struct CannedExecutor {
    responses: Mutex<VecDeque<Result<String>>>,
    pub calls: Mutex<Vec<(RemoteTarget, RemoteTask, bool)>>,
}

impl CannedExecutor {
    pub fn with(responses: Vec<Result<String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl RemoteExecutor for CannedExecutor {
    async fn run(&self, target: &RemoteTarget, task: &RemoteTask, elevate: bool) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((target.clone(), task.clone(), elevate));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }
}

/// Router over a temporary state directory with a pre-seeded controller key
pub struct TestApp {
    pub dir: TempDir,
    pub executor: Arc<CannedExecutor>,
    pub router: axum::Router,
}

pub fn test_app(executor: CannedExecutor) -> TestApp {
    let dir = TempDir::new().unwrap();
    let state_dir = dir.path().join("state");
    std::fs::create_dir_all(&state_dir).unwrap();
    std::fs::write(state_dir.join("controller_id"), "PRIVATE").unwrap();
    std::fs::write(
        state_dir.join("controller_id.pub"),
        format!("{CONTROLLER_KEY}\n"),
    )
    .unwrap();

    let keys = KeyMaterialManager::new(KeyConfig {
        state_dir: state_dir.clone(),
        key_name: "controller_id".to_string(),
        algorithm: KeyAlgorithm::Ed25519,
    });
    let pool = AddressPool::open(PoolConfig {
        subnet: "10.13.13.0/24".parse().unwrap(),
        reserved: "10.13.13.1".parse().unwrap(),
        state_file: state_dir.join("peers.json"),
    })
    .unwrap();

    let executor = Arc::new(executor);
    let installer = Installer::new(
        executor.clone(),
        vec![
            PathBuf::from("/app/ansible/site-deploy.yml"),
            PathBuf::from("/app/ansible/site-stack.yml"),
        ],
    );
    let orchestrator = PeerOrchestrator::new(
        executor.clone(),
        Arc::new(keys),
        Arc::new(pool),
        WireGuardConfig::default(),
        22,
    );
    let router = api::router(Arc::new(AppState {
        orchestrator: Arc::new(orchestrator),
        installer: Arc::new(installer),
        ssh_port: 22,
        default_ssh_user: "ubuntu".to_string(),
    }));

    TestApp {
        dir,
        executor,
        router,
    }
}
