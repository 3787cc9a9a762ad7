//! Integration tests for core CLI contract behavior.

use {predicates::prelude::*, std::fs, tempfile::tempdir};

fn cli_cmd() -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("mandiag");
    cmd.env_remove("MANDIAG_PORT")
        .env_remove("MANDIAG_BAUD")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("mandiag"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn short_help_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("-h")
        .assert()
        .success()
        .stdout(predicate::str::contains("mandiag"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero_and_writes_stdout_only() {
    let mut cmd = cli_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mandiag"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn subcommand_help_lists_options() {
    let mut cmd = cli_cmd();
    cmd.args(["check", "--help"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("--status")
                .and(predicate::str::contains("--expect"))
                .and(predicate::str::contains("--repeat")),
        );
}

#[test]
fn list_ports_json_returns_valid_json() {
    let mut cmd = cli_cmd();
    let output = cmd
        .args(["list-ports", "--json"])
        .output()
        .expect("command should execute");

    // Port enumeration may be unavailable in sandboxes; only check JSON when it succeeded.
    if output
        .status
        .success()
    {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: serde_json::Value =
            serde_json::from_str(&stdout).expect("stdout should be JSON");
        assert_eq!(parsed["ok"], serde_json::Value::Bool(true));
        assert!(parsed["data"]["ports"].is_array());
    }
}

#[test]
fn config_show_prints_merged_values() {
    let dir = tempdir().expect("tempdir should be created");
    let config = dir
        .path()
        .join("bench.toml");
    fs::write(
        &config,
        "[serial]\nport = \"/dev/ttyBENCH\"\nbaud = 921600\n\n[retry]\nattempts = 3\n",
    )
    .expect("write config");

    let mut cmd = cli_cmd();
    cmd.arg("--config")
        .arg(&config)
        .args(["config", "--show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("/dev/ttyBENCH")
                .and(predicate::str::contains("921600"))
                .and(predicate::str::contains("attempts = 3")),
        );
}

#[test]
fn local_config_file_is_picked_up() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(
        dir.path()
            .join("mandiag.toml"),
        "[can]\ninterface = \"vcan7\"\n",
    )
    .expect("write local config");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["config", "--show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("vcan7"));
}

#[test]
fn invalid_config_file_warns_and_continues() {
    let dir = tempdir().expect("tempdir should be created");
    fs::write(
        dir.path()
            .join("mandiag.toml"),
        "invalid toml [[[",
    )
    .expect("write invalid config");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["config", "--show"])
        .assert()
        .success()
        .stderr(predicate::str::contains("TOML"));
}

#[test]
fn send_without_port_fails_with_hint() {
    let dir = tempdir().expect("tempdir should be created");

    let mut cmd = cli_cmd();
    cmd.current_dir(dir.path())
        .args(["send", "6E", "03", "00", "00", "00"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("No serial port specified"));
}

#[test]
fn send_to_missing_port_fails() {
    let mut cmd = cli_cmd();
    cmd.args(["-p", "/dev/mandiag-does-not-exist", "send", "6E 03 00 00 00"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn check_rejects_non_hex_command() {
    let mut cmd = cli_cmd();
    cmd.args(["-p", "/dev/mandiag-does-not-exist", "check", "6E", "QQ"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid command"));
}

#[test]
fn exit_code_two_for_usage_error_unknown_command() {
    let mut cmd = cli_cmd();
    cmd.arg("unknown-command-xyz")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("unrecognized").or(predicate::str::contains("unknown")));
}

#[test]
fn exit_code_two_for_usage_error_invalid_flag() {
    let mut cmd = cli_cmd();
    cmd.arg("--invalid-flag-xyz")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_missing_command_tokens() {
    let mut cmd = cli_cmd();
    cmd.arg("send")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_out_of_range_can_id() {
    let mut cmd = cli_cmd();
    cmd.args([
        "can-check",
        "--interface",
        "vcan0",
        "--request-id",
        "0x20000000",
        "--response-id",
        "0x1",
        "--payload",
        "00",
    ])
    .assert()
    .failure()
    .code(2)
    .stderr(predicate::str::contains("29-bit"));
}

#[test]
fn typo_suggests_subcommand() {
    let mut cmd = cli_cmd();
    cmd.arg("chek")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("check"));
}
