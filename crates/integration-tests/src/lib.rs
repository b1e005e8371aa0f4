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

//! Shared fixtures for dbgrpc integration tests
//!
//! - [`mock_server`]: a scripted debugger server listening on loopback
//! - [`recording_host`]: a debugger host that records what it was asked to do

pub mod mock_server;
pub mod recording_host;

/// Initialization utilities for tests
pub mod init {
    /// Initialize logging for a test. Safe to call from every test.
    pub fn init_test_environment() {
        dbgrpc_common::logging::ensure_test_logging(None);
    }
}
