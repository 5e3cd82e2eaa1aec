//! Tests for proxy_paths module.

use super::*;
use serial_test::serial;
use tempfile::tempdir;

#[test]
#[serial]
fn test_home_dir_honours_env_override() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("nested-root");
    std::env::set_var(HOME_ENV, &root);

    let home = proxy_home_dir().unwrap();

    std::env::remove_var(HOME_ENV);
    assert_eq!(home, root);
    assert!(root.is_dir(), "home dir should be created on demand");
}

#[test]
#[serial]
fn test_per_port_paths_are_distinct() {
    let dir = tempdir().unwrap();
    std::env::set_var(HOME_ENV, dir.path());

    let pid_a = pid_path(3000).unwrap();
    let pid_b = pid_path(3001).unwrap();
    let lock = lock_path(3000).unwrap();
    let log = log_path(3000).unwrap();

    std::env::remove_var(HOME_ENV);
    assert_ne!(pid_a, pid_b);
    assert!(pid_a.ends_with("proxy-3000.pid"));
    assert!(lock.ends_with("proxy-3000.lock"));
    assert!(log.ends_with("logs/proxy-3000.log"));
    assert!(dir.path().join("logs").is_dir());
}

#[test]
#[serial]
fn test_empty_env_override_falls_back() {
    std::env::set_var(HOME_ENV, "");

    let home = proxy_home_dir();

    std::env::remove_var(HOME_ENV);
    if let Ok(path) = home {
        assert!(path.ends_with(PROXY_DIR) || path.ends_with(FALLBACK_DIR));
    }
}
