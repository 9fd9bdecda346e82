// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for controller key material.

#[cfg(test)]
mod tests {
    use super::super::{fingerprint_of, keygen_args, resolve_algorithm, KeyMaterialManager};
    use crate::config::{KeyAlgorithm, KeyConfig};
    use tempfile::TempDir;

    const SAMPLE_PUBLIC_KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAABAgMEBQYHCAkKCwwNDg8QERITFBUWFxgZGhscHR4f wg-provisioner";

    fn manager(dir: &TempDir) -> KeyMaterialManager {
        KeyMaterialManager::new(KeyConfig {
            state_dir: dir.path().join("state"),
            key_name: "controller_id".to_string(),
            algorithm: KeyAlgorithm::Ed25519,
        })
    }

    /// `ssh-keygen` is needed for the generation tests; skip when absent
    fn ssh_keygen_available() -> bool {
        let available = std::process::Command::new("ssh-keygen")
            .arg("-?")
            .output()
            .is_ok();
        if !available {
            eprintln!("⊘ Skipping test: ssh-keygen not installed");
        }
        available
    }

    #[test]
    fn test_keypair_paths() {
        let dir = TempDir::new().unwrap();
        let pair = manager(&dir).keypair();

        assert_eq!(pair.private_key, dir.path().join("state/controller_id"));
        assert_eq!(pair.public_key, dir.path().join("state/controller_id.pub"));
    }

    #[tokio::test]
    async fn test_existing_keypair_is_returned_unchanged() {
        let dir = TempDir::new().unwrap();
        let keys = manager(&dir);
        let pair = keys.keypair();
        std::fs::create_dir_all(dir.path().join("state")).unwrap();
        std::fs::write(&pair.private_key, "PRIVATE").unwrap();
        std::fs::write(&pair.public_key, format!("{SAMPLE_PUBLIC_KEY}\n")).unwrap();

        let first = keys.ensure_keypair().await.unwrap();
        let second = keys.ensure_keypair().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first, pair.private_key);
        assert_eq!(std::fs::read_to_string(&pair.private_key).unwrap(), "PRIVATE");
        assert_eq!(keys.public_key().await.unwrap(), SAMPLE_PUBLIC_KEY);
    }

    #[tokio::test]
    async fn test_generate_then_reuse() {
        if !ssh_keygen_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let keys = manager(&dir);

        let first = keys.ensure_keypair().await.unwrap();
        let private_before = std::fs::read(&first).unwrap();
        let public_before = keys.public_key().await.unwrap();

        let second = keys.ensure_keypair().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read(&second).unwrap(), private_before, "no regeneration");
        assert_eq!(keys.public_key().await.unwrap(), public_before);
        assert!(public_before.starts_with("ssh-ed25519 "));
        assert!(public_before.ends_with("wg-provisioner"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let pair = keys.keypair();
            let private_mode = std::fs::metadata(&pair.private_key).unwrap().permissions().mode();
            let public_mode = std::fs::metadata(&pair.public_key).unwrap().permissions().mode();
            let dir_mode = std::fs::metadata(dir.path().join("state"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(private_mode & 0o777, 0o600);
            assert_eq!(public_mode & 0o777, 0o644);
            assert_eq!(dir_mode & 0o777, 0o700);
        }

        assert!(
            !dir.path().join("state/.controller_id.lock").exists(),
            "lock file released"
        );
    }

    #[tokio::test]
    async fn test_missing_public_key_is_derived() {
        if !ssh_keygen_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let keys = manager(&dir);
        keys.ensure_keypair().await.unwrap();
        let original = keys.public_key().await.unwrap();

        std::fs::remove_file(keys.keypair().public_key).unwrap();
        keys.ensure_keypair().await.unwrap();

        let derived = keys.public_key().await.unwrap();
        // ssh-keygen -y keeps the key material; the comment may differ
        assert_eq!(
            derived.split_whitespace().take(2).collect::<Vec<_>>(),
            original.split_whitespace().take(2).collect::<Vec<_>>()
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_callers_share_one_generation() {
        if !ssh_keygen_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let shared = manager(&dir);

        let (first, second) = tokio::join!(shared.ensure_keypair(), shared.ensure_keypair());
        let first = first.unwrap();
        let second = second.unwrap();

        assert_eq!(first, second);
        let public_key = shared.public_key().await.unwrap();
        let reread = std::fs::read_to_string(shared.keypair().public_key).unwrap();
        assert_eq!(reread.trim(), public_key);
        assert!(!dir.path().join("state/.controller_id.lock").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_managers_sharing_a_state_dir_agree_on_the_key() {
        if !ssh_keygen_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let a = manager(&dir);
        let b = manager(&dir);

        let (path_a, path_b) = tokio::join!(a.ensure_keypair(), b.ensure_keypair());
        let path_a = path_a.unwrap();
        let path_b = path_b.unwrap();

        assert_eq!(path_a, path_b);
        assert_eq!(a.public_key().await.unwrap(), b.public_key().await.unwrap());
        assert_eq!(a.fingerprint().await.unwrap(), b.fingerprint().await.unwrap());

        // The public key on disk still belongs to the private key on disk
        let derived = std::process::Command::new("ssh-keygen")
            .arg("-y")
            .arg("-f")
            .arg(&path_a)
            .output()
            .unwrap();
        let derived = String::from_utf8_lossy(&derived.stdout);
        let stored = a.public_key().await.unwrap();
        assert_eq!(
            derived.split_whitespace().take(2).collect::<Vec<_>>(),
            stored.split_whitespace().take(2).collect::<Vec<_>>()
        );
        assert!(!dir.path().join("state/.controller_id.lock").exists());
    }

    #[tokio::test]
    async fn test_stale_lock_file_does_not_block_generation() {
        if !ssh_keygen_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let keys = manager(&dir);
        let lock = dir.path().join("state/.controller_id.lock");
        std::fs::create_dir_all(dir.path().join("state")).unwrap();
        std::fs::write(&lock, "").unwrap();

        let private_key = keys.ensure_keypair().await.unwrap();

        assert!(private_key.exists());
        assert!(keys.keypair().public_key.exists());
        assert!(lock.exists(), "a lock we never took is left alone");
    }

    #[test]
    fn test_fingerprint_matches_openssh_format() {
        assert_eq!(
            fingerprint_of(SAMPLE_PUBLIC_KEY).as_deref(),
            Some("SHA256:ZkAslGjFiUHdGf/WUL8rQvkib4PTvQatUV0OUQSncCA")
        );
        assert_eq!(fingerprint_of("garbage"), None);
    }

    #[test]
    fn test_auto_algorithm_follows_fips_flag() {
        let dir = TempDir::new().unwrap();
        let flag = dir.path().join("fips_enabled");

        assert_eq!(resolve_algorithm(KeyAlgorithm::Auto, &flag), KeyAlgorithm::Ed25519);

        std::fs::write(&flag, "1\n").unwrap();
        assert_eq!(resolve_algorithm(KeyAlgorithm::Auto, &flag), KeyAlgorithm::Rsa);
        assert_eq!(
            resolve_algorithm(KeyAlgorithm::Ed25519, &flag),
            KeyAlgorithm::Ed25519,
            "explicit choice wins"
        );

        std::fs::write(&flag, "0\n").unwrap();
        assert_eq!(resolve_algorithm(KeyAlgorithm::Auto, &flag), KeyAlgorithm::Ed25519);
    }

    #[test]
    fn test_keygen_args() {
        assert_eq!(keygen_args(KeyAlgorithm::Rsa), ["-t", "rsa", "-b", "4096"]);
        assert_eq!(keygen_args(KeyAlgorithm::Ed25519), ["-t", "ed25519", "-a", "100"]);
    }
}
