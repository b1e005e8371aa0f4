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

//! Console implementation of the debugger host services.

use dbgrpc_common::types::{DebugEvent, DebugName};
use dbgrpc_engine::DebuggerHost;
use tracing::{debug, error, info, warn};

/// Host that prints everything the server sends through `tracing`.
///
/// There is no symbol database behind it, so names and DLL imports are only
/// counted and acknowledged.
#[derive(Debug, Default)]
pub struct ConsoleHost {
    names_seen: usize,
}

impl DebuggerHost for ConsoleHost {
    fn publish_debug_names(&mut self, names: &[DebugName]) -> i32 {
        self.names_seen += names.len();
        debug!(batch = names.len(), total = self.names_seen, "received debug names");
        1
    }

    fn import_dll(&mut self, base: u64, path: &str, _identity: &[u8]) -> i32 {
        info!("server found module {path} at {base:#x}");
        0
    }

    fn handle_debug_event(&mut self, event: &DebugEvent, flags: u32) -> i32 {
        info!(pid = event.pid, tid = event.tid, flags, "debug event {} at {:#x}", event.eid, event.ea);
        0
    }

    fn message(&mut self, text: &str) {
        info!(target: "dbgrpc::remote", "{}", text.trim_end());
    }

    fn warning(&mut self, text: &str) {
        warn!(target: "dbgrpc::remote", "{}", text.trim_end());
    }

    fn error(&mut self, text: &str) {
        error!(target: "dbgrpc::remote", "{}", text.trim_end());
    }

    fn show_wait_box(&mut self, text: &str) {
        info!("{text}...");
    }

    fn replace_wait_box(&mut self, text: &str) {
        info!("{text}...");
    }
}
