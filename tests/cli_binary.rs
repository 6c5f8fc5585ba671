//! Exit status and output of the `snaprelay` binary for runs that end before
//! any storage command is executed.

use assert_cmd::Command;
use predicates::prelude::*;

fn snaprelay() -> Command {
    let mut command = Command::cargo_bin("snaprelay").expect("snaprelay binary must be built");
    command.env_clear();
    command
}

#[test]
fn version_banner() {
    snaprelay()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with(format!(
            "snaprelay {}",
            env!("CARGO_PKG_VERSION")
        )));
}

#[test]
fn help_names_flags_and_variables() {
    snaprelay()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--dest-pool"))
        .stdout(predicate::str::contains("zfsRepConfig_destDataset_pool"))
        .stdout(predicate::str::contains("SNAPRELAY_DRY_RUN"));
}

#[test]
fn missing_task_name_exits_with_failure() {
    snaprelay()
        .args(["--source-pool=tank", "--dest-pool=backup"])
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("taskName"));
}

#[test]
fn configuration_is_read_from_the_environment() {
    snaprelay()
        .env("taskName", "nightly")
        .env("zfsRepConfig_sourceDataset_pool", "tank")
        .env("zfsRepConfig_destDataset_pool", "backup")
        .env("zfsRepConfig_destDataset_host", "nas02")
        .env("zfsRepConfig_sendOptions_transferMethod", "local")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("local transfer method"));
}

#[test]
fn flags_override_the_environment() {
    snaprelay()
        .env("taskName", "nightly")
        .env("zfsRepConfig_sourceDataset_pool", "tank")
        .env("zfsRepConfig_destDataset_pool", "backup")
        .env("zfsRepConfig_sendOptions_raw_flag", "true")
        .env("zfsRepConfig_sendOptions_compressed_flag", "false")
        .arg("--compressed=yes")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("mutually exclusive"));
}

#[test]
fn malformed_values_exit_with_failure() {
    snaprelay()
        .args([
            "--task-name=nightly",
            "--source-pool=tank",
            "--dest-pool=backup",
            "--dest-host=nas02",
            "--dest-port=twenty-two",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("zfsRepConfig_destDataset_port"));
}

#[test]
fn unknown_flag_exits_with_failure() {
    snaprelay()
        .arg("--no-such-flag")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--no-such-flag"));
}
