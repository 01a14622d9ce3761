// SPDX-License-Identifier: AGPL-3.0-or-later
//! Integration tests for openidc-sp

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::{tempdir, TempDir};

/// Settings for a manually configured provider, rooted in `dir`
fn write_settings(dir: &Path, extra_options: &str) -> PathBuf {
    let config_path = dir.join("openidc-sp.toml");
    let content = format!(
        r#"name = "keystone-openidc"
config_dir = "{config_dir}"
state_file = "{state_file}"

[options]
oidc-provider-issuer = "https://idp.example.com"
oidc-client-id = "keystone"
oidc-provider-auth-endpoint = "https://idp.example.com/auth"
oidc-provider-token-endpoint = "https://idp.example.com/token"
oidc-provider-token-endpoint-auth = "client_secret_basic"
oidc-provider-user-info-endpoint = "https://idp.example.com/userinfo"
oidc-provider-jwks-uri = "https://idp.example.com/jwks"
{extra_options}
"#,
        config_dir = dir.join("openidc").display(),
        state_file = dir.join("state").join("state.json").display(),
        extra_options = extra_options,
    );
    std::fs::write(&config_path, content).unwrap();
    config_path
}

fn openidc(config_path: &Path) -> Command {
    let mut cmd = Command::cargo_bin("openidc-sp").unwrap();
    cmd.arg("--config").arg(config_path);
    cmd
}

/// Peer group formed with a passphrase and the principal fully related
fn related(extra_options: &str) -> (TempDir, PathBuf) {
    let temp_dir = tempdir().unwrap();
    let config_path = write_settings(temp_dir.path(), extra_options);

    openidc(&config_path).args(["relation", "join-peer"]).assert().success();
    openidc(&config_path)
        .args(["event", "cluster-relation-created", "--leader"])
        .assert()
        .success();
    openidc(&config_path)
        .args([
            "relation",
            "set-principal",
            "keystone/0",
            "port=5000",
            "tls-enabled=true",
            "hostname=\"10.5.250.250\"",
        ])
        .assert()
        .success();

    (temp_dir, config_path)
}

/// Test the version command
#[test]
fn test_version_command() {
    let mut cmd = Command::cargo_bin("openidc-sp").unwrap();
    cmd.arg("version");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("openidc-sp v"))
        .stdout(predicate::str::contains("mod_auth_openidc"));
}

/// Test the help output
#[test]
fn test_help_command() {
    let mut cmd = Command::cargo_bin("openidc-sp").unwrap();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("OpenID Connect"))
        .stdout(predicate::str::contains("event"))
        .stdout(predicate::str::contains("missing-keys"));
}

/// Test init command creates a settings file
#[test]
fn test_init_creates_config() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("openidc-sp.toml");

    openidc(&config_path)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created configuration file"));

    let content = std::fs::read_to_string(&config_path).unwrap();
    assert!(content.contains("SPDX-License-Identifier"));
    assert!(content.contains("oidc-provider-metadata-url"));

    // the generated file must load
    openidc(&config_path)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("auth_openidc"));
}

/// Test init refuses to overwrite without --force
#[test]
fn test_init_force() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("openidc-sp.toml");
    std::fs::write(&config_path, "old content").unwrap();

    openidc(&config_path)
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    openidc(&config_path).args(["init", "--force"]).assert().success();
    let content = std::fs::read_to_string(&config_path).unwrap();
    assert!(!content.contains("old content"));
    assert!(content.contains("name = \"keystone-openidc\""));
}

/// Test config command shows defaults when no file exists
#[test]
fn test_config_defaults() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("nonexistent.toml");

    openidc(&config_path)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("Using defaults"))
        .stdout(predicate::str::contains("/etc/apache2/openidc"));
}

/// Without the peer relation every pass is deferred
#[test]
fn test_event_deferred_without_peer_relation() {
    let temp_dir = tempdir().unwrap();
    let config_path = write_settings(temp_dir.path(), "");

    openidc(&config_path)
        .args(["event", "config-changed"])
        .assert()
        .code(75)
        .stdout(predicate::str::contains("peer relation not formed"));

    assert!(!temp_dir.path().join("openidc").exists());
    openidc(&config_path)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("blocked"));
}

/// Missing principal data is reported by name
#[test]
fn test_event_deferred_until_principal_data() {
    let temp_dir = tempdir().unwrap();
    let config_path = write_settings(temp_dir.path(), "");

    openidc(&config_path).args(["relation", "join-peer"]).assert().success();
    openidc(&config_path)
        .args(["event", "cluster-relation-created", "--leader"])
        .assert()
        .success()
        .stdout(predicate::str::contains("skipped"));

    openidc(&config_path)
        .args(["event", "config-changed"])
        .assert()
        .code(75)
        .stdout(predicate::str::contains("hostname"))
        .stdout(predicate::str::contains("oidc_crypto_passphrase").not());

    openidc(&config_path)
        .arg("missing-keys")
        .assert()
        .success()
        .stdout(predicate::str::contains("hostname"))
        .stdout(predicate::str::contains("port"))
        .stdout(predicate::str::contains("scheme"));
}

/// A complete manual configuration renders and requests a single restart
#[test]
fn test_full_reconciliation() {
    let (temp_dir, config_path) = related("");

    openidc(&config_path)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("active"));

    openidc(&config_path)
        .args(["event", "keystone-fid-service-provider-relation-changed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("rendered"))
        .stdout(predicate::str::contains("restart requested"));

    let rendered = temp_dir
        .path()
        .join("openidc")
        .join("openidc-location.openid.conf");
    let content = std::fs::read_to_string(&rendered).unwrap();
    assert!(content.contains("OIDCProviderIssuer https://idp.example.com"));
    assert!(content.contains("OIDCClientID keystone"));
    assert!(content.contains("OIDCCryptoPassphrase "));
    assert!(content.contains("OIDCRedirectURI https://10.5.250.250:5000/"));

    // same inputs: rendered again but no second restart
    openidc(&config_path)
        .args(["event", "config-changed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("rendered"))
        .stdout(predicate::str::contains("restart requested").not());
    assert_eq!(std::fs::read_to_string(&rendered).unwrap(), content);

    openidc(&config_path)
        .args(["relation", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("restart-nonce"))
        .stdout(predicate::str::contains("protocol-name"))
        .stdout(predicate::str::contains("remote-id-attribute"))
        .stdout(predicate::str::contains("oidc-crypto-passphrase"));

    openidc(&config_path)
        .arg("missing-keys")
        .assert()
        .success()
        .stdout(predicate::str::contains("No missing keys"));
}

/// An insecure verification endpoint is a configuration error, not missing data
#[test]
fn test_misconfiguration_reported() {
    let (temp_dir, config_path) =
        related("oidc-oauth-verify-jwks-uri = \"http://idp.example.com/jwks\"");

    openidc(&config_path)
        .args(["event", "config-changed"])
        .assert()
        .code(78)
        .stdout(predicate::str::starts_with("misconfigured:"))
        .stdout(predicate::str::contains("must use https"));
    assert!(!temp_dir.path().join("openidc").exists());

    openidc(&config_path)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("blocked"));

    openidc(&config_path)
        .arg("missing-keys")
        .assert()
        .failure()
        .stderr(predicate::str::contains("must use https"));
}

/// Unknown events are rejected
#[test]
fn test_unknown_event() {
    let temp_dir = tempdir().unwrap();
    let config_path = write_settings(temp_dir.path(), "");

    openidc(&config_path)
        .args(["event", "upgrade-service"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid event"));
}

/// Malformed key=value pairs are rejected
#[test]
fn test_set_principal_rejects_bad_pair() {
    let temp_dir = tempdir().unwrap();
    let config_path = write_settings(temp_dir.path(), "");

    openidc(&config_path)
        .args(["relation", "set-principal", "keystone/0", "port"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Expected key=value"));
}

/// Module helpers are only logged in dry-run mode
#[test]
fn test_install_dry_run() {
    let temp_dir = tempdir().unwrap();
    let config_path = write_settings(temp_dir.path(), "");

    openidc(&config_path)
        .args(["--dry-run", "install"])
        .assert()
        .success()
        .stdout(predicate::str::contains("DRY RUN"))
        .stdout(predicate::str::contains("a2enmod auth_openidc"));
}
