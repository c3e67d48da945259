use predicates::prelude::*;

mod common;

#[test]
fn test_validate_valid_yaml() {
    let ctx = common::TestContext::new();
    let config = ctx.write_config("build.yaml", common::ISO_YAML);

    ctx.new_cmd()
        .args(["validate", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("The configuration is valid."));
}

#[test]
fn test_validate_prints_warnings() {
    let ctx = common::TestContext::new();
    let config = ctx.write_config(
        "build.json",
        r#"{"type": "utm", "source_path": "/vms/base.utm", "ssh_username": "admin"}"#,
    );

    ctx.new_cmd()
        .args(["validate", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stderr(predicate::str::contains("Warning: A shutdown_command was not specified"));
}

#[test]
fn test_validate_reports_every_problem() {
    let ctx = common::TestContext::new();
    let config = ctx.write_config(
        "build.yaml",
        "type: iso\nvm_backend: hyperv\nformat: ova\n",
    );

    ctx.new_cmd()
        .args(["validate", "--config"])
        .arg(&config)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("vm_backend must be either 'apple' or 'qemu'"))
        .stderr(predicate::str::contains("invalid format, only 'utm' is allowed"))
        .stderr(predicate::str::contains("ssh_username must be specified"));
}

#[test]
fn test_validate_missing_file() {
    let ctx = common::TestContext::new();

    ctx.new_cmd()
        .args(["validate", "--config", "missing.yaml"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Failed to read config file"));
}
