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

//! Debugger module backed by a remote debugger server.
//!
//! [`RpcDebmod`] exposes one async method per debugger operation. Each method
//! encodes its arguments, runs the request through the protocol client and
//! decodes the reply. Soft outcomes (nothing to do, not found) are `Ok`;
//! failures carry the status and the error text sent by the server.
//!
//! The operations are grouped by concern:
//!
//! - [`process`] - process lifecycle, threads and debug events
//! - [`memory`] - memory map, memory access, remote files and searches
//! - [`registers`] - register access
//! - [`breakpoint`] - breakpoints, low-level conditions and exception setup
//! - [`appcall`] - calls into the debuggee, call stacks and misc requests

pub mod appcall;
pub mod breakpoint;
pub mod memory;
pub mod process;
pub mod registers;

pub use appcall::*;
pub use memory::*;
pub use process::*;

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};
use tracing::{debug, info, warn};

use dbgrpc_common::types::{DebappAttrs, Drc, DynamicRegisterSet};

use crate::{
    config::SessionConfig,
    error::{DebmodError, DebmodResult, HandshakeError, ProtocolViolation, RpcError},
    rpc::{
        client::{read_drc, ClientInterrupts, DbgRpcClient},
        engine::RpcEngine,
        host::HostHandle,
        packet::{PacketWriter, RpcCode},
        transport::{self, Transport},
    },
};

/// Remote debugger module.
#[derive(Debug)]
pub struct RpcDebmod<S> {
    config: SessionConfig,
    client: Option<DbgRpcClient<S>>,
    host: HostHandle,
    debapp_attrs: DebappAttrs,
    idaregs: Option<DynamicRegisterSet>,
    poll_debug_events: bool,
    debug_debugger: bool,
    initialized: bool,
}

impl RpcDebmod<TcpStream> {
    /// Connect to `host:port` and log in with `password`.
    pub async fn open_remote(&mut self, host: &str, port: u16, password: &str) -> DebmodResult<()> {
        if host.is_empty() {
            return Err(DebmodError::remote(
                Drc::Failed,
                "Please specify the hostname of the debugger server",
            ));
        }
        let connect_timeout = self.config.recv_timeout().unwrap_or(transport::CONNECT_TIMEOUT);
        let stream = transport::connect(host, port, connect_timeout).await?;
        info!(host, port, "connected to debugger server");
        self.open_with_stream(stream, password).await
    }
}

impl<S> RpcDebmod<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Create a disconnected module.
    pub fn new(config: SessionConfig, host: HostHandle) -> Self {
        Self {
            config,
            client: None,
            host,
            debapp_attrs: DebappAttrs::default(),
            idaregs: None,
            poll_debug_events: false,
            debug_debugger: false,
            initialized: false,
        }
    }

    /// Session settings.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether a logged-in session exists.
    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Attributes of the debugged application.
    pub fn debapp_attrs(&self) -> &DebappAttrs {
        &self.debapp_attrs
    }

    /// Register layout announced when the process was started or attached.
    pub fn register_set(&self) -> Option<&DynamicRegisterSet> {
        self.idaregs.as_ref()
    }

    /// Whether debug events are collected by waiting for server pushes.
    pub fn is_polling_events(&self) -> bool {
        self.poll_debug_events
    }

    /// The protocol client, when connected.
    pub fn client_mut(&mut self) -> Option<&mut DbgRpcClient<S>> {
        self.client.as_mut()
    }

    /// Log in over an already connected stream.
    ///
    /// On failure the stream is dropped and the module stays disconnected.
    pub async fn open_with_stream(&mut self, stream: S, password: &str) -> DebmodResult<()> {
        if self.client.is_some() {
            self.close_remote().await?;
        }

        let transport = Transport::new(stream)
            .with_recv_timeout(self.config.recv_timeout())
            .with_max_packet_size(self.config.max_packet_size);
        let mut engine =
            RpcEngine::new(transport).with_max_interrupts(self.config.max_interrupts_per_request);

        self.handshake(&mut engine, password).await?;

        let interrupts =
            ClientInterrupts::new(self.host.clone()).with_stub_path(self.config.stub_path.clone());
        self.client = Some(DbgRpcClient::new(engine, interrupts));
        self.initialized = false;
        self.poll_debug_events = false;
        info!("logged in to debugger server");
        Ok(())
    }

    async fn handshake(&mut self, engine: &mut RpcEngine<S>, password: &str) -> DebmodResult<()> {
        let open = engine.recv_packet().await?;
        if open.code != RpcCode::OPEN {
            warn!(code = %open.code, "bogus or irresponsive remote server");
            self.host.post(|h| h.warning("Bogus or irresponsive remote server"));
            return Err(HandshakeError::NotAServer(open.code).into());
        }

        let mut u = open.reader();
        let version = u.unpack_dd().map_err(|e| engine.record_error(e.into()))?;
        let debugger_id = u.unpack_dd().map_err(|e| engine.record_error(e.into()))?;
        let address_size = u.unpack_dd().map_err(|e| engine.record_error(e.into()))?;
        debug!(version, debugger_id, address_size, "server announced itself");

        let mismatch = if version != self.config.protocol_version {
            Some(HandshakeError::VersionMismatch {
                expected: self.config.protocol_version,
                actual: version,
            })
        } else if debugger_id != self.config.debugger_id {
            Some(HandshakeError::DebuggerIdMismatch {
                expected: self.config.debugger_id,
                actual: debugger_id,
            })
        } else if address_size < self.config.expected_address_size {
            Some(HandshakeError::AddressSizeMismatch {
                expected: self.config.expected_address_size,
                actual: address_size,
            })
        } else {
            None
        };

        if let Some(err) = mismatch {
            let mut refuse = PacketWriter::new(RpcCode::OK);
            refuse.pack_dd(0);
            engine.send_packet(refuse).await?;
            warn!(error = %err, "refusing debugger server");
            let text = err.to_string();
            self.host.post(move |h| h.warning(&text));
            return Err(err.into());
        }

        let mut login = PacketWriter::new(RpcCode::OK);
        login.pack_dd(1).pack_str(password);
        engine.send_packet(login).await?;

        let answer = engine.recv_packet().await?;
        if answer.code != RpcCode::OK {
            let err = ProtocolViolation::UnexpectedPacket { code: answer.code, state: "logging in" };
            return Err(engine.record_error(err.into()).into());
        }
        if answer.reader().unpack_dd().map_err(|e| engine.record_error(e.into()))? == 0 {
            self.host.post(|h| h.warning("Bad password"));
            return Err(HandshakeError::BadPassword.into());
        }

        engine.set_logged_in(true);
        self.debapp_attrs.addrsize = address_size;
        Ok(())
    }

    /// End the session. The server is told goodbye on a best-effort basis.
    pub async fn close_remote(&mut self) -> DebmodResult<()> {
        if let Some(client) = self.client.take() {
            let mut engine = client.into_engine();
            if let Err(err) = engine.send_packet(PacketWriter::new(RpcCode::OK)).await {
                debug!(error = %err, "goodbye packet not delivered");
            }
            if let Err(err) = engine.transport_mut().shutdown().await {
                debug!(error = %err, "shutdown failed");
            }
            info!("closed debugger session");
        }
        self.initialized = false;
        self.poll_debug_events = false;
        self.idaregs = None;
        self.debapp_attrs = DebappAttrs::default();
        Ok(())
    }

    /// Whether the debugger debugs itself; sent along with `init`.
    pub fn set_debugging(&mut self, debug_debugger: bool) {
        self.debug_debugger = debug_debugger;
    }

    /// Initialize the remote debugger module. Returns the server's flags.
    pub async fn init(&mut self) -> DebmodResult<u32> {
        if self.initialized {
            return Err(DebmodError::AlreadyInitialized);
        }
        let flags = self.config.debugger_flags;
        let debug_debugger = self.debug_debugger;
        let client = self.client.as_mut().ok_or(DebmodError::NotConnected)?;
        client.interrupts_mut().take_pending_event();
        self.poll_debug_events = false;

        let mut req = PacketWriter::new(RpcCode::INIT);
        req.pack_dd(flags).pack_dd(debug_debugger as u32);
        let reply = client.send_request(req).await?;
        let mut u = reply.reader();
        let drc = read_drc(&mut u).map_err(|e| self.violation(e))?;
        let flags2 = u.unpack_dd().map_err(|e| self.violation(e))?;
        if drc != Drc::Ok {
            let message = u.unpack_trailing_str().map_err(|e| self.violation(e))?;
            return Err(DebmodError::remote(drc, message));
        }
        self.initialized = true;
        debug!(flags2 = format_args!("{flags2:#x}"), "debugger module initialized");
        Ok(flags2)
    }

    /// Terminate the remote debugger module.
    pub async fn term(&mut self) -> DebmodResult<()> {
        let client = self.session()?;
        let reply = client.send_request(PacketWriter::new(RpcCode::TERM)).await?;
        self.initialized = false;
        let mut u = reply.reader();
        if !u.is_empty() {
            let drc = read_drc(&mut u).map_err(|e| self.violation(e))?;
            if drc.is_failure() {
                let message = u.unpack_trailing_str().map_err(|e| self.violation(e))?;
                return Err(DebmodError::remote(drc, message));
            }
        }
        Ok(())
    }

    /// The client of an initialized session.
    fn session(&mut self) -> DebmodResult<&mut DbgRpcClient<S>> {
        let client = self.client.as_mut().ok_or(DebmodError::NotConnected)?;
        if !self.initialized {
            return Err(DebmodError::NotInitialized);
        }
        Ok(client)
    }

    /// Report a reply that breaks the protocol and poison the session.
    ///
    /// Every decoding failure of a reply goes through here: once a payload
    /// does not parse, the position of the stream is unknown.
    fn violation(&mut self, err: impl Into<RpcError>) -> DebmodError {
        let err = err.into();
        match self.client.as_mut() {
            Some(client) => client.engine_mut().record_error(err).into(),
            None => err.into(),
        }
    }
}
