// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the provisioning state machine.

#[cfg(test)]
mod tests {
    use super::super::{PeerOrchestrator, PeerRequest};
    use crate::config::{KeyAlgorithm, KeyConfig, PoolConfig, WgMode, WireGuardConfig};
    use crate::errors::{ProvisionError, Result};
    use crate::keys::KeyMaterialManager;
    use crate::pool::AddressPool;
    use crate::remote::mock::MockExecutor;
    use crate::remote::RemoteAuth;
    use ipnet::Ipv4Net;
    use std::sync::Arc;
    use tempfile::TempDir;

    const HOST: &str = "203.0.113.10";
    const PEER_KEY: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";
    const SERVER_KEY: &str = "ZGVmZ2hpamtsbW5vcHFyc3R1dnd4eXp7fH1+f4CBgoM=";
    const CONTROLLER_KEY: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAABAgMEBQYHCAkKCwwNDg8QERITFBUWFxgZGhscHR4f wg-provisioner";

    struct Fixture {
        dir: TempDir,
        executor: Arc<MockExecutor>,
        orchestrator: PeerOrchestrator,
    }

    /// Orchestrator with a pre-seeded controller key and an empty /24 pool
    fn fixture(executor: MockExecutor, mode: WgMode) -> Fixture {
        let dir = TempDir::new().unwrap();
        let state_dir = dir.path().join("state");
        std::fs::create_dir_all(&state_dir).unwrap();
        std::fs::write(state_dir.join("controller_id"), "PRIVATE").unwrap();
        std::fs::write(state_dir.join("controller_id.pub"), format!("{CONTROLLER_KEY}\n")).unwrap();

        let keys = Arc::new(KeyMaterialManager::new(KeyConfig {
            state_dir: state_dir.clone(),
            key_name: "controller_id".to_string(),
            algorithm: KeyAlgorithm::Ed25519,
        }));
        let pool = Arc::new(
            AddressPool::open(PoolConfig {
                subnet: "10.13.13.0/24".parse().unwrap(),
                reserved: "10.13.13.1".parse().unwrap(),
                state_file: state_dir.join("peers.json"),
            })
            .unwrap(),
        );
        let executor = Arc::new(executor);
        let orchestrator = PeerOrchestrator::new(
            executor.clone(),
            keys,
            pool,
            WireGuardConfig {
                mode,
                ..WireGuardConfig::default()
            },
            22,
        );

        Fixture {
            dir,
            executor,
            orchestrator,
        }
    }

    fn ansible_output(line: &str) -> Result<String> {
        Ok(format!("srv | CHANGED | rc=0 >>\n{line}\n"))
    }

    fn auth_failure() -> Result<String> {
        Err(ProvisionError::from_remote_output(
            HOST,
            "srv | UNREACHABLE! => Failed to connect: Permission denied (publickey,password).",
        ))
    }

    fn other_failure() -> Result<String> {
        Err(ProvisionError::from_remote_output(
            HOST,
            "srv | FAILED | rc=1 >>\nUnable to access interface: No such device",
        ))
    }

    fn address() -> Ipv4Net {
        "10.13.13.2/32".parse().unwrap()
    }

    fn request(password: Option<&str>) -> PeerRequest {
        PeerRequest {
            peer_name: "alice".to_string(),
            peer_public_key: PEER_KEY.to_string(),
            host: HOST.to_string(),
            ssh_user: Some("admin".to_string()),
            ssh_password: password.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_key_attempt_succeeds() {
        let fx = fixture(
            MockExecutor::new()
                .respond(ansible_output(""))
                .respond(ansible_output(SERVER_KEY)),
            WgMode::Host,
        );

        let key = fx
            .orchestrator
            .add_peer(HOST, "admin", PEER_KEY, address(), Some("unused"))
            .await
            .unwrap();

        assert_eq!(key, SERVER_KEY);
        let calls = fx.executor.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|c| c.elevate));
        assert!(calls.iter().all(|c| !c.target.uses_password()));
        assert_eq!(
            calls[0].target.auth,
            RemoteAuth::PrivateKey(fx.dir.path().join("state/controller_id"))
        );
        assert_eq!(
            calls[0].command(),
            format!("wg set wg0 peer {PEER_KEY} allowed-ips 10.13.13.2/32")
        );
        assert_eq!(calls[1].command(), "wg show wg0 public-key");
    }

    #[tokio::test]
    async fn test_auth_failure_with_password_bootstraps_once_and_retries() {
        let fx = fixture(
            MockExecutor::new()
                .respond(auth_failure())
                .respond(ansible_output("BOOTSTRAP_OK"))
                .respond(ansible_output(""))
                .respond(ansible_output(SERVER_KEY)),
            WgMode::Container,
        );

        let key = fx
            .orchestrator
            .add_peer(HOST, "admin", PEER_KEY, address(), Some("one-time"))
            .await
            .unwrap();

        assert_eq!(key, SERVER_KEY);
        let calls = fx.executor.calls();
        assert_eq!(calls.len(), 4);

        let password_calls: Vec<_> = calls.iter().filter(|c| c.target.uses_password()).collect();
        assert_eq!(password_calls.len(), 1, "bootstrap runs exactly once");
        assert!(!password_calls[0].elevate);
        assert!(password_calls[0].command().contains(CONTROLLER_KEY));

        assert_eq!(calls[0].command(), calls[2].command(), "same registration retried");
        assert!(calls[2].command().starts_with("docker exec wireguard wg set wg0 peer"));
        assert!(!calls[2].target.uses_password());
    }

    #[tokio::test]
    async fn test_auth_failure_without_password_fails_immediately() {
        let fx = fixture(MockExecutor::new().respond(auth_failure()), WgMode::Host);

        let error = fx
            .orchestrator
            .add_peer(HOST, "admin", PEER_KEY, address(), None)
            .await
            .unwrap_err();

        assert!(error.is_auth_or_reachability());
        assert_eq!(fx.executor.calls().len(), 1, "no bootstrap without a password");
    }

    #[tokio::test]
    async fn test_failed_retry_is_propagated_without_looping() {
        let fx = fixture(
            MockExecutor::new()
                .respond(auth_failure())
                .respond(ansible_output("BOOTSTRAP_OK"))
                .respond(auth_failure()),
            WgMode::Host,
        );

        let error = fx
            .orchestrator
            .add_peer(HOST, "admin", PEER_KEY, address(), Some("one-time"))
            .await
            .unwrap_err();

        assert!(error.is_auth_or_reachability());
        assert_eq!(fx.executor.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_bootstrap_stops_before_retry() {
        let fx = fixture(
            MockExecutor::new()
                .respond(auth_failure())
                .respond(ansible_output("")),
            WgMode::Host,
        );

        let error = fx
            .orchestrator
            .add_peer(HOST, "admin", PEER_KEY, address(), Some("one-time"))
            .await
            .unwrap_err();

        assert!(matches!(error, ProvisionError::BootstrapFailed { .. }));
        assert_eq!(fx.executor.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_other_failure_never_bootstraps() {
        let fx = fixture(MockExecutor::new().respond(other_failure()), WgMode::Host);

        let error = fx
            .orchestrator
            .add_peer(HOST, "admin", PEER_KEY, address(), Some("one-time"))
            .await
            .unwrap_err();

        assert!(matches!(error, ProvisionError::OtherExecutionFailure { .. }));
        assert_eq!(fx.executor.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_error_banner_falls_back_to_key_file() {
        let fx = fixture(
            MockExecutor::new()
                .respond(ansible_output(""))
                .respond(ansible_output("wg: Unable to access interface: No such device"))
                .respond(ansible_output(SERVER_KEY)),
            WgMode::Host,
        );

        let key = fx
            .orchestrator
            .add_peer(HOST, "admin", PEER_KEY, address(), None)
            .await
            .unwrap();

        assert_eq!(key, SERVER_KEY);
        let calls = fx.executor.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[2].command().contains("/etc/wireguard/server.pub"));
    }

    #[tokio::test]
    async fn test_failed_primary_query_falls_back() {
        let fx = fixture(
            MockExecutor::new()
                .respond(ansible_output(""))
                .respond(other_failure())
                .respond(ansible_output(SERVER_KEY)),
            WgMode::Container,
        );

        let key = fx
            .orchestrator
            .add_peer(HOST, "admin", PEER_KEY, address(), None)
            .await
            .unwrap();

        assert_eq!(key, SERVER_KEY);
        assert!(fx.executor.calls()[2].command().contains("/config/server.pub"));
    }

    #[tokio::test]
    async fn test_no_key_anywhere_is_unavailable() {
        let fx = fixture(
            MockExecutor::new()
                .respond(ansible_output(""))
                .respond(ansible_output(""))
                .respond(ansible_output("not-a-key")),
            WgMode::Host,
        );

        let error = fx
            .orchestrator
            .add_peer(HOST, "admin", PEER_KEY, address(), None)
            .await
            .unwrap_err();

        assert!(matches!(error, ProvisionError::PublicKeyUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_provision_builds_profile() {
        let fx = fixture(
            MockExecutor::new()
                .respond(ansible_output(""))
                .respond(ansible_output(SERVER_KEY)),
            WgMode::Container,
        );

        let profile = fx.orchestrator.provision(&request(None)).await.unwrap();

        assert_eq!(profile.endpoint, "203.0.113.10:51820");
        assert_eq!(profile.server_public_key, SERVER_KEY);
        assert_eq!(profile.dns, "10.13.13.1");
        assert_eq!(profile.allowed_ips, "0.0.0.0/0, ::/0");
        assert_eq!(profile.client_address, address());
        assert_eq!(fx.orchestrator.pool().lookup("alice"), Some(address()));
        assert_eq!(fx.executor.calls()[0].target.user, "admin");
    }

    #[tokio::test]
    async fn test_provision_is_idempotent_per_peer() {
        let fx = fixture(MockExecutor::new(), WgMode::Host);
        // The default mock answers with empty output, so recovery fails but
        // the allocation must still be stable.
        let _ = fx.orchestrator.provision(&request(None)).await;
        let _ = fx.orchestrator.provision(&request(None)).await;

        assert_eq!(fx.orchestrator.pool().allocations().len(), 1);
        assert_eq!(fx.orchestrator.pool().lookup("alice"), Some(address()));
    }

    #[tokio::test]
    async fn test_provision_uses_default_ssh_user() {
        let fx = fixture(
            MockExecutor::new()
                .respond(ansible_output(""))
                .respond(ansible_output(SERVER_KEY)),
            WgMode::Host,
        );
        let mut req = request(None);
        req.ssh_user = Some("  ".to_string());

        fx.orchestrator.provision(&req).await.unwrap();

        assert_eq!(fx.executor.calls()[0].target.user, "ubuntu");
    }

    #[tokio::test]
    async fn test_provision_rejects_bad_input_before_any_work() {
        let fx = fixture(MockExecutor::new(), WgMode::Host);

        let mut bad_key = request(None);
        bad_key.peer_public_key = "not-a-key".to_string();
        let error = fx.orchestrator.provision(&bad_key).await.unwrap_err();
        assert!(matches!(error, ProvisionError::InvalidPublicKey { .. }));

        let mut bad_name = request(None);
        bad_name.peer_name = "../etc".to_string();
        let error = fx.orchestrator.provision(&bad_name).await.unwrap_err();
        assert!(matches!(error, ProvisionError::InvalidPeerName { .. }));

        let mut no_host = request(None);
        no_host.host = " ".to_string();
        let error = fx.orchestrator.provision(&no_host).await.unwrap_err();
        assert!(error.is_client_error());

        assert!(fx.executor.calls().is_empty());
        assert!(fx.orchestrator.pool().allocations().is_empty());
    }

    #[test]
    fn test_password_is_redacted_in_debug() {
        let rendered = format!("{:?}", request(Some("hunter2")));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
