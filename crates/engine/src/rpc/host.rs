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

//! Bridge between the protocol task and the debugger host.
//!
//! Host-side state (the symbol database, the output window, the wait dialog)
//! has a single owner. Protocol code never touches it directly: it sends a job
//! over a channel to the worker that owns the [`DebuggerHost`] value and, when
//! it needs a result, awaits it on a oneshot channel.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use dbgrpc_common::types::{DebugEvent, DebugName};

use crate::error::RpcError;

/// Value attached to an IDC error report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdcErrorValue {
    /// A message
    Text(String),
    /// A numeric value, usually an address
    Number(u64),
}

/// An error raised by a script on the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdcErrorReport {
    /// Address the error refers to
    pub ea: u64,
    /// Error code
    pub code: i32,
    /// Attached value
    pub value: IdcErrorValue,
}

/// Debugger host services the protocol needs.
///
/// Everything runs on the host worker, one call at a time.
pub trait DebuggerHost: Send + 'static {
    /// Publish a batch of symbol names. Returns the host's result code.
    fn publish_debug_names(&mut self, names: &[DebugName]) -> i32;

    /// Import symbols of a module the server found on its side.
    fn import_dll(&mut self, base: u64, path: &str, identity: &[u8]) -> i32;

    /// Deliver a debug event the server wants processed synchronously.
    fn handle_debug_event(&mut self, event: &DebugEvent, flags: u32) -> i32;

    /// Informational output.
    fn message(&mut self, text: &str);

    /// Warning output.
    fn warning(&mut self, text: &str);

    /// Error output.
    fn error(&mut self, text: &str);

    /// A script error reported by the server.
    fn report_idc_error(&mut self, report: &IdcErrorReport) {
        let text = match &report.value {
            IdcErrorValue::Text(s) => s.clone(),
            IdcErrorValue::Number(n) => format!("{n:#x}"),
        };
        self.error(&format!("{:#x}: script error {}: {text}", report.ea, report.code));
    }

    /// Show the wait dialog.
    fn show_wait_box(&mut self, _text: &str) {}

    /// Change the text of the displayed wait dialog.
    fn replace_wait_box(&mut self, _text: &str) {}

    /// Hide the wait dialog.
    fn hide_wait_box(&mut self) {}

    /// Whether the user pressed cancel in the wait dialog.
    fn user_cancelled(&mut self) -> bool {
        false
    }

    /// Handle an ioctl pushed by the server.
    ///
    /// `None` means no handler is installed and the server is told the
    /// request is unknown.
    fn ioctl(&mut self, _fn_id: i32, _data: &[u8]) -> Option<(i32, Vec<u8>)> {
        None
    }
}

type Job = Box<dyn FnOnce(&mut dyn DebuggerHost) + Send>;

/// Cloneable handle used to run work on the host worker.
#[derive(Debug, Clone)]
pub struct HostHandle {
    tx: mpsc::UnboundedSender<Job>,
}

/// Receiving side of a [`HostHandle`]. Owns nothing until [`run`](Self::run).
#[derive(Debug)]
pub struct HostWorker {
    rx: mpsc::UnboundedReceiver<Job>,
}

impl HostHandle {
    /// Create a handle and the worker that will serve it.
    pub fn channel() -> (Self, HostWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, HostWorker { rx })
    }

    /// Move `host` onto a new task and return a handle to it.
    pub fn spawn<H: DebuggerHost>(host: H) -> Self {
        let (handle, worker) = Self::channel();
        tokio::spawn(worker.run(host));
        handle
    }

    /// Run `f` on the host and wait for its result.
    pub async fn call<R, F>(&self, f: F) -> Result<R, RpcError>
    where
        R: Send + 'static,
        F: FnOnce(&mut dyn DebuggerHost) -> R + Send + 'static,
    {
        let (rsp_tx, rsp_rx) = oneshot::channel();
        let job: Job = Box::new(move |host| {
            if rsp_tx.send(f(host)).is_err() {
                debug!("host call dropped before completion");
            }
        });
        self.tx.send(job).map_err(|_| RpcError::HostGone)?;
        rsp_rx.await.map_err(|_| RpcError::HostGone)
    }

    /// Queue `f` on the host without waiting for it.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce(&mut dyn DebuggerHost) + Send + 'static,
    {
        if self.tx.send(Box::new(f)).is_err() {
            warn!("host worker is gone, dropping notification");
        }
    }

    /// Whether the worker is still accepting jobs.
    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }
}

impl HostWorker {
    /// Serve jobs until every handle is dropped, then return the host.
    pub async fn run<H: DebuggerHost>(mut self, mut host: H) -> H {
        debug!("host worker started");
        while let Some(job) = self.rx.recv().await {
            job(&mut host);
        }
        debug!("host worker shutting down");
        host
    }
}
