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

//! A debugger host that records every call it receives.

use std::sync::Arc;

use dbgrpc_common::types::{DebugEvent, DebugName};
use dbgrpc_engine::DebuggerHost;
use parking_lot::Mutex;

/// Shared view of what a [`RecordingHost`] was asked to do, in order.
#[derive(Debug, Clone, Default)]
pub struct HostLog(Arc<Mutex<Vec<String>>>);

impl HostLog {
    /// Every recorded line so far.
    pub fn lines(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Whether some recorded line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.0.lock().iter().any(|line| line.contains(needle))
    }

    fn push(&self, line: String) {
        self.0.lock().push(line);
    }
}

/// Debugger host for tests.
#[derive(Debug, Default)]
pub struct RecordingHost {
    log: HostLog,
    cancel: bool,
}

impl RecordingHost {
    /// A host and the log it writes to.
    pub fn new() -> (Self, HostLog) {
        let host = Self::default();
        let log = host.log.clone();
        (host, log)
    }

    /// Make the host answer "cancelled" whenever a wait box is shown.
    pub fn cancelling(mut self) -> Self {
        self.cancel = true;
        self
    }
}

impl DebuggerHost for RecordingHost {
    fn publish_debug_names(&mut self, names: &[DebugName]) -> i32 {
        for name in names {
            self.log.push(format!("name: {:#x} {}", name.ea, name.name));
        }
        1
    }

    fn import_dll(&mut self, base: u64, path: &str, _identity: &[u8]) -> i32 {
        self.log.push(format!("dll: {path} @ {base:#x}"));
        1
    }

    fn handle_debug_event(&mut self, event: &DebugEvent, _flags: u32) -> i32 {
        self.log.push(format!("event: {}", event.eid));
        0
    }

    fn message(&mut self, text: &str) {
        self.log.push(format!("msg: {text}"));
    }

    fn warning(&mut self, text: &str) {
        self.log.push(format!("warn: {text}"));
    }

    fn error(&mut self, text: &str) {
        self.log.push(format!("error: {text}"));
    }

    fn show_wait_box(&mut self, text: &str) {
        self.log.push(format!("wait: {text}"));
    }

    fn hide_wait_box(&mut self) {
        self.log.push("hide wait".to_string());
    }

    fn user_cancelled(&mut self) -> bool {
        self.cancel
    }
}
