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

//! Client side of the protocol: the interrupt handler and request helpers.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use flate2::Crc;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

use dbgrpc_common::{
    types::{unpack_debug_names, DebugEvent, Drc},
    Unpacker,
};

use super::{
    engine::{InterruptHandler, RpcEngine},
    host::{HostHandle, IdcErrorReport, IdcErrorValue},
    packet::{Packet, PacketWriter, RpcCode},
};
use crate::error::{DebmodError, DebmodResult, ProtocolViolation, RpcError};

const WAIT_DOWNLOADING_SYMBOLS: &str = "Downloading Symbols";
const WAIT_IMPORTING_DLLS: &str = "Importing DLLs";
const DEFAULT_STUB_NAME: &str = "debugger server stub";

/// Answer of the server to a client ioctl.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IoctlReply {
    /// Result code of the ioctl
    pub code: i32,
    /// Output buffer
    pub output: Vec<u8>,
}

/// Handles requests the server sends while the client waits for a reply.
#[derive(Debug)]
pub struct ClientInterrupts {
    host: HostHandle,
    stub_path: Option<PathBuf>,
    pending_event: Option<DebugEvent>,
    wait_box: Option<&'static str>,
}

impl ClientInterrupts {
    /// Create a handler forwarding host work to `host`.
    pub fn new(host: HostHandle) -> Self {
        Self { host, stub_path: None, pending_event: None, wait_box: None }
    }

    /// Local copy of the server stub offered when the server asks to sync it.
    pub fn with_stub_path(mut self, path: Option<PathBuf>) -> Self {
        self.stub_path = path;
        self
    }

    /// The host bridge.
    pub fn host(&self) -> &HostHandle {
        &self.host
    }

    /// Whether an event pushed by the server is waiting to be collected.
    pub fn has_pending_event(&self) -> bool {
        self.pending_event.is_some()
    }

    /// Collect the pushed event, if any.
    pub fn take_pending_event(&mut self) -> Option<DebugEvent> {
        self.pending_event.take()
    }

    fn show_wait_box(&mut self, text: &'static str) {
        match self.wait_box {
            None => self.host.post(move |h| h.show_wait_box(text)),
            Some(shown) if shown != text => self.host.post(move |h| h.replace_wait_box(text)),
            Some(_) => {}
        }
        self.wait_box = Some(text);
    }

    async fn set_debug_names(&mut self, u: &mut Unpacker<'_>) -> Result<PacketWriter, RpcError> {
        self.show_wait_box(WAIT_DOWNLOADING_SYMBOLS);
        let names = unpack_debug_names(u)?;
        debug!(count = names.len(), "received debug names");
        let rc = self.host.call(move |h| h.publish_debug_names(&names)).await?;
        Ok(ok_with_result(rc))
    }

    async fn import_dll(&mut self, u: &mut Unpacker<'_>) -> Result<PacketWriter, RpcError> {
        self.show_wait_box(WAIT_IMPORTING_DLLS);
        let base = u.unpack_ea64()?;
        let path = u.unpack_str()?;
        let n = u.unpack_count("dll identity size")?;
        let identity = u.unpack_bytes(n)?.to_vec();
        debug!(base = format_args!("{base:#x}"), %path, "importing dll");
        let rc = self.host.call(move |h| h.import_dll(base, &path, &identity)).await?;
        Ok(ok_with_result(rc))
    }

    async fn handle_debug_event(&mut self, u: &mut Unpacker<'_>) -> Result<PacketWriter, RpcError> {
        let event: DebugEvent = u.unpack()?;
        let flags = u.unpack_dd()?;
        let rc = self.host.call(move |h| h.handle_debug_event(&event, flags)).await?;
        Ok(ok_with_result(rc))
    }

    async fn sync_stub(&mut self, u: &mut Unpacker<'_>) -> Result<PacketWriter, RpcError> {
        let remote_name = u.unpack_str()?;
        let remote_crc = u.unpack_dd()?;

        let mut reply = PacketWriter::new(RpcCode::OK);
        let contents = match &self.stub_path {
            Some(path) => tokio::fs::read(path).await,
            None => Err(std::io::ErrorKind::NotFound.into()),
        };
        let contents = match contents {
            Ok(contents) => contents,
            Err(err) => {
                let name = self.local_stub_name();
                warn!(
                    file = %name,
                    remote = ?remote_name,
                    error = %err,
                    "cannot read the local debugger stub"
                );
                let text = format!("Could not find/read debugger stub {name}");
                self.host.post(move |h| h.warning(&text));
                reply.pack_dd(0);
                return Ok(reply);
            }
        };

        let mut crc = Crc::new();
        crc.update(&contents);
        if crc.sum() == remote_crc {
            debug!(file = %remote_name, "debugger stub is up to date");
            reply.pack_dd(1);
        } else {
            info!(file = %remote_name, size = contents.len(), "sending updated debugger stub");
            reply.pack_dd(contents.len() as u32).append(&contents);
        }
        Ok(reply)
    }

    /// Name of the stub as the user configured it; the server's name is not shown.
    fn local_stub_name(&self) -> String {
        self.stub_path
            .as_deref()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_STUB_NAME.to_string())
    }

    fn text_sink(&self, code: RpcCode, u: &mut Unpacker<'_>) -> Result<PacketWriter, RpcError> {
        let text = u.unpack_str()?;
        if text.is_empty() {
            return Ok(PacketWriter::new(RpcCode::OK));
        }
        match code {
            RpcCode::ERROR => {
                error!(target: "dbgrpc::server", "{}", text.trim_end());
                self.host.post(move |h| h.error(&text));
            }
            RpcCode::WARNING => {
                warn!(target: "dbgrpc::server", "{}", text.trim_end());
                self.host.post(move |h| h.warning(&text));
            }
            _ => {
                info!(target: "dbgrpc::server", "{}", text.trim_end());
                self.host.post(move |h| h.message(&text));
            }
        }
        Ok(PacketWriter::new(RpcCode::OK))
    }

    fn buffer_event(&mut self, u: &mut Unpacker<'_>) -> Result<PacketWriter, RpcError> {
        let event: DebugEvent = u.unpack()?;
        if self.pending_event.is_some() {
            return Err(ProtocolViolation::EventOverflow.into());
        }
        debug!(eid = %event.eid, pid = event.pid, tid = event.tid, "buffered pushed event");
        self.pending_event = Some(event);
        Ok(PacketWriter::new(RpcCode::EVOK))
    }

    async fn ioctl(&mut self, u: &mut Unpacker<'_>) -> Result<PacketWriter, RpcError> {
        let fn_id = u.unpack_dd_signed()?;
        let size = u.unpack_count("ioctl input size")?;
        let input = u.unpack_bytes(size)?.to_vec();
        let Some((code, output)) = self.host.call(move |h| h.ioctl(fn_id, &input)).await? else {
            debug!(fn_id, "no ioctl handler installed");
            return Ok(PacketWriter::new(RpcCode::UNK));
        };
        let mut reply = PacketWriter::new(RpcCode::OK);
        reply.pack_dd_signed(code).pack_dd(output.len() as u32).append(&output);
        Ok(reply)
    }

    async fn report_idc_error(&mut self, u: &mut Unpacker<'_>) -> Result<PacketWriter, RpcError> {
        let ea = u.unpack_ea64()?;
        let code = u.unpack_dd_signed()?;
        let value = if u.unpack_db()? != 0 {
            IdcErrorValue::Text(u.unpack_str()?)
        } else {
            IdcErrorValue::Number(u.unpack_ea64()?)
        };
        let report = IdcErrorReport { ea, code, value };
        self.host.call(move |h| h.report_idc_error(&report)).await?;
        Ok(PacketWriter::new(RpcCode::OK))
    }
}

fn ok_with_result(rc: i32) -> PacketWriter {
    let mut reply = PacketWriter::new(RpcCode::OK);
    reply.pack_dd_signed(rc);
    reply
}

impl InterruptHandler for ClientInterrupts {
    async fn handle_interrupt(&mut self, request: Packet) -> Result<PacketWriter, RpcError> {
        let mut u = request.reader();
        match request.code {
            RpcCode::SET_DEBUG_NAMES => self.set_debug_names(&mut u).await,
            RpcCode::IMPORT_DLL => self.import_dll(&mut u).await,
            RpcCode::HANDLE_DEBUG_EVENT => self.handle_debug_event(&mut u).await,
            RpcCode::SYNC_STUB => self.sync_stub(&mut u).await,
            RpcCode::ERROR | RpcCode::MSG | RpcCode::WARNING => self.text_sink(request.code, &mut u),
            RpcCode::EVENT => self.buffer_event(&mut u),
            RpcCode::IOCTL => self.ioctl(&mut u).await,
            RpcCode::REPORT_IDC_ERROR => self.report_idc_error(&mut u).await,
            other => {
                warn!(code = %other, "unsupported server request");
                Ok(PacketWriter::new(RpcCode::UNK))
            }
        }
    }

    async fn cancel_requested(&mut self) -> bool {
        if self.wait_box.is_none() {
            return false;
        }
        self.host.call(|h| h.user_cancelled()).await.unwrap_or(false)
    }

    fn on_request_end(&mut self) {
        if self.wait_box.take().is_some() {
            self.host.post(|h| h.hide_wait_box());
        }
    }
}

/// A logged-in protocol client: the engine plus its interrupt handler.
#[derive(Debug)]
pub struct DbgRpcClient<S> {
    engine: RpcEngine<S>,
    interrupts: ClientInterrupts,
}

impl<S> DbgRpcClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Pair an engine with its interrupt handler.
    pub fn new(engine: RpcEngine<S>, interrupts: ClientInterrupts) -> Self {
        Self { engine, interrupts }
    }

    /// The protocol engine.
    pub fn engine(&self) -> &RpcEngine<S> {
        &self.engine
    }

    /// The protocol engine, mutably.
    pub fn engine_mut(&mut self) -> &mut RpcEngine<S> {
        &mut self.engine
    }

    /// The interrupt handler.
    pub fn interrupts_mut(&mut self) -> &mut ClientInterrupts {
        &mut self.interrupts
    }

    /// Consume the client, returning the engine.
    pub fn into_engine(self) -> RpcEngine<S> {
        self.engine
    }

    /// Send a request and return its reply.
    pub async fn send_request(&mut self, request: PacketWriter) -> Result<Packet, RpcError> {
        self.engine.send_request_and_receive_reply(request, &mut self.interrupts).await
    }

    /// Send a request whose reply is a single integer.
    pub async fn send_request_get_long_result(
        &mut self,
        request: PacketWriter,
    ) -> Result<i32, RpcError> {
        let reply = self.send_request(request).await?;
        reply.reader().unpack_dd_signed().map_err(|e| self.malformed(e))
    }

    /// Send a request whose reply is a status followed, on failure, by text.
    pub async fn send_request_get_drc_result(&mut self, request: PacketWriter) -> DebmodResult<Drc> {
        let reply = self.send_request(request).await?;
        let mut u = reply.reader();
        let drc = read_drc(&mut u).map_err(|e| self.malformed(e))?;
        if drc.is_failure() {
            let message = u.unpack_trailing_str().map_err(|e| self.malformed(e))?;
            return Err(DebmodError::remote(drc, message));
        }
        Ok(drc)
    }

    /// Wait up to `wait` for the server to push something.
    pub async fn poll_ready(&mut self, wait: Duration) -> Result<bool, RpcError> {
        self.engine.poll_ready(wait).await
    }

    /// Receive and service exactly one server request.
    pub async fn service_one_interrupt(&mut self) -> Result<(), RpcError> {
        self.engine.service_one_interrupt(&mut self.interrupts).await
    }

    /// Run a server-side ioctl.
    pub async fn send_ioctl(&mut self, fn_id: i32, input: &[u8]) -> Result<IoctlReply, RpcError> {
        let mut request = PacketWriter::new(RpcCode::IOCTL);
        request.pack_dd_signed(fn_id).pack_dd(input.len() as u32).append(input);
        let reply = self.send_request(request).await?;
        let mut u = reply.reader();
        let code = u.unpack_dd_signed().map_err(|e| self.malformed(e))?;
        let size = u.unpack_count("ioctl output size").map_err(|e| self.malformed(e))?;
        let output = u.unpack_bytes(size).map_err(|e| self.malformed(e))?.to_vec();
        Ok(IoctlReply { code, output })
    }

    /// A reply that does not decode leaves the stream in an unknown state.
    fn malformed(&mut self, err: impl Into<RpcError>) -> RpcError {
        self.engine.record_error(err.into())
    }
}

/// Read a status code from a reply.
pub fn read_drc(u: &mut Unpacker<'_>) -> Result<Drc, RpcError> {
    Ok(Drc::from_raw(u.unpack_dd_signed()?)?)
}
