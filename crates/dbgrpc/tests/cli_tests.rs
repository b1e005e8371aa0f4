// DbgRPC - Remote Debugger Protocol Engine
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use assert_cmd::Command;
use predicates::prelude::*;
use tracing::info;

#[test]
fn test_help_command() {
    dbgrpc_common::logging::ensure_test_logging(None);
    info!("Testing CLI help command");

    let mut cmd = Command::cargo_bin("dbgrpc").unwrap();
    cmd.arg("--help").assert().success().stdout(predicate::str::contains("Remote Debugger Protocol"));
}

#[test]
fn test_version_command() {
    dbgrpc_common::logging::ensure_test_logging(None);
    let mut cmd = Command::cargo_bin("dbgrpc").unwrap();
    cmd.arg("--version").assert().success().stdout(predicate::str::contains("dbgrpc"));
}

#[test]
fn test_read_memory_subcommand_help() {
    dbgrpc_common::logging::ensure_test_logging(None);
    let mut cmd = Command::cargo_bin("dbgrpc").unwrap();
    cmd.arg("read-memory")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("hex dump"));
}

#[test]
fn test_invalid_address() {
    dbgrpc_common::logging::ensure_test_logging(None);
    let mut cmd = Command::cargo_bin("dbgrpc").unwrap();
    cmd.arg("read-memory")
        .arg("not-an-address")
        .arg("16")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid address"));
}

#[test]
fn test_missing_subcommand() {
    dbgrpc_common::logging::ensure_test_logging(None);
    let mut cmd = Command::cargo_bin("dbgrpc").unwrap();
    cmd.assert().failure().stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_unreachable_server() {
    dbgrpc_common::logging::ensure_test_logging(None);
    let config = tempfile::NamedTempFile::new().unwrap();
    // Port 1 on loopback is closed on any sane machine.
    let mut cmd = Command::cargo_bin("dbgrpc").unwrap();
    cmd.arg("--config")
        .arg(config.path())
        .arg("--host")
        .arg("127.0.0.1:1")
        .arg("processes")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to open a session"));
}
