//! End-to-end CLI tests for the politodown binary.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn politodown(config_home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("politodown").expect("binary should build");
    cmd.env("XDG_CONFIG_HOME", config_home.path())
        .env_remove("POLITO_USERNAME")
        .env_remove("POLITO_PASSWORD")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_binary_help_displays_usage() {
    let config_home = TempDir::new().expect("temp dir");
    politodown(&config_home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Polito teaching portal"))
        .stdout(predicate::str::contains("download-material"))
        .stdout(predicate::str::contains("download-videos"));
}

#[test]
fn test_binary_version_displays_version() {
    let config_home = TempDir::new().expect("temp dir");
    politodown(&config_home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_binary_without_subcommand_fails() {
    let config_home = TempDir::new().expect("temp dir");
    politodown(&config_home)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_binary_invalid_concurrency_rejected() {
    let config_home = TempDir::new().expect("temp dir");
    politodown(&config_home)
        .args(["download-material", "--year", "2023", "-c", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("concurrency"));
}

#[test]
fn test_binary_invalid_config_names_the_key() {
    let config_home = TempDir::new().expect("temp dir");
    let config = config_home.path().join("config.toml");
    std::fs::write(&config, "concurrency = 500\n").expect("write config");

    politodown(&config_home)
        .args(["materials", "--year", "2023", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("concurrency"));
}

#[test]
fn test_binary_unknown_config_key_rejected() {
    let config_home = TempDir::new().expect("temp dir");
    let dir = config_home.path().join("politodown");
    std::fs::create_dir_all(&dir).expect("create config dir");
    std::fs::write(dir.join("config.toml"), "rate_limit = 10\n").expect("write config");

    politodown(&config_home)
        .args(["materials", "--year", "2023"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}

#[test]
fn test_binary_missing_password_fails_before_network() {
    let config_home = TempDir::new().expect("temp dir");
    politodown(&config_home)
        .args(["materials", "--year", "2023", "--username", "s123456"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("POLITO_PASSWORD"));
}

#[test]
fn test_binary_missing_username_fails() {
    let config_home = TempDir::new().expect("temp dir");
    politodown(&config_home)
        .env("POLITO_PASSWORD", "secret")
        .args(["videostores", "--year", "2023"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no username"));
}

#[test]
fn test_manifest_license_matches_license_file() {
    assert_eq!(env!("CARGO_PKG_LICENSE"), "LGPL-3.0-only");
    let text = std::fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/LICENSE"))
        .expect("LICENSE file should be present");
    assert!(text.contains("GNU LESSER GENERAL PUBLIC LICENSE"));
    assert!(text.contains("Version 3"));
}
