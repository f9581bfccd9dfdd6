//! CLI-surface smoke tests: argument parsing only, no live server (§6,
//! "Invocation").

use assert_cmd::prelude::*;
use std::process::Command;

#[test]
fn help_exits_successfully() {
  let mut cmd = Command::cargo_bin("rembash-client").expect("compile bin");
  let assert = cmd.arg("--help").assert();
  assert.success();
}

#[test]
fn missing_server_argument_is_a_usage_error() {
  let mut cmd = Command::cargo_bin("rembash-client").expect("compile bin");
  let assert = cmd.assert();
  assert.failure();
}

#[test]
fn non_ipv4_server_argument_is_a_usage_error() {
  let mut cmd = Command::cargo_bin("rembash-client").expect("compile bin");
  let assert = cmd.arg("not-an-ip").assert();
  assert.failure();
}
