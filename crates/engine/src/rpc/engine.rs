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

//! Request/reply state machine shared by both ends of a connection.
//!
//! Only one request is outstanding at a time. While the engine waits for its
//! reply the peer may send requests of its own (interrupts: log messages,
//! pushed events, symbol batches). Those are handed to an
//! [`InterruptHandler`], its response is sent back, and the wait resumes.
//! Interrupts are serviced in a loop with a fixed upper bound per request, so
//! a misbehaving peer cannot grow the stack or keep a request alive forever.
//!
//! ```text
//!        send request
//!  Idle ─────────────▶ AwaitingReply ──reply──▶ Idle
//!                        │      ▲
//!            interrupt   │      │ response sent
//!                        ▼      │
//!                DispatchingInterrupt
//! ```

use std::{future::Future, time::Duration};

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, warn};

use super::{
    packet::{Packet, PacketWriter, RpcCode},
    transport::Transport,
};
use crate::error::{ProtocolViolation, RpcError};

/// Default bound on interrupts serviced while waiting for one reply.
pub const DEFAULT_MAX_INTERRUPTS: usize = 4096;

/// Where the engine is in a request/reply exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No request outstanding
    Idle,
    /// A request with this code was sent and its reply is awaited
    AwaitingReply(RpcCode),
    /// An interrupt with this code is being handled
    DispatchingInterrupt(RpcCode),
}

/// Local handling of requests initiated by the peer.
pub trait InterruptHandler: Send {
    /// Handle one peer request and build the response to send back.
    ///
    /// Errors abort the outstanding request.
    fn handle_interrupt(
        &mut self,
        request: Packet,
    ) -> impl Future<Output = Result<PacketWriter, RpcError>> + Send;

    /// Whether the user asked to cancel the current request. When true, the
    /// pending response is replaced by [`RpcCode::CANCELLED`].
    fn cancel_requested(&mut self) -> impl Future<Output = bool> + Send {
        async { false }
    }

    /// Called exactly once when a request or polled interrupt completes,
    /// whatever the outcome.
    fn on_request_end(&mut self) {}
}

/// Shared request/reply machinery over a framed transport.
#[derive(Debug)]
pub struct RpcEngine<S> {
    transport: Transport<S>,
    state: EngineState,
    logged_in: bool,
    network_error: bool,
    max_interrupts: usize,
}

impl<S> RpcEngine<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Create an engine over a connected transport.
    pub fn new(transport: Transport<S>) -> Self {
        Self {
            transport,
            state: EngineState::Idle,
            logged_in: false,
            network_error: false,
            max_interrupts: DEFAULT_MAX_INTERRUPTS,
        }
    }

    /// Set the interrupt bound per request.
    pub fn with_max_interrupts(mut self, max_interrupts: usize) -> Self {
        self.max_interrupts = max_interrupts;
        self
    }

    /// Current state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Whether the handshake completed.
    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    /// Record the outcome of the handshake.
    pub fn set_logged_in(&mut self, logged_in: bool) {
        self.logged_in = logged_in;
    }

    /// Whether a fatal error invalidated the session.
    pub fn has_network_error(&self) -> bool {
        self.network_error
    }

    /// The underlying transport.
    pub fn transport_mut(&mut self) -> &mut Transport<S> {
        &mut self.transport
    }

    /// Consume the engine, returning the transport.
    pub fn into_transport(self) -> Transport<S> {
        self.transport
    }

    fn ensure_usable(&self) -> Result<(), RpcError> {
        if self.network_error {
            Err(RpcError::SessionBroken)
        } else {
            Ok(())
        }
    }

    /// Record `err` against the session. Fatal errors make every later
    /// operation fail with [`RpcError::SessionBroken`].
    pub fn record_error(&mut self, err: RpcError) -> RpcError {
        if err.is_fatal() && !self.network_error {
            error!(error = %err, "session is no longer usable");
            self.network_error = true;
        }
        err
    }

    /// Send one packet outside of a request exchange.
    pub async fn send_packet(&mut self, packet: PacketWriter) -> Result<(), RpcError> {
        self.ensure_usable()?;
        let result = self.transport.send_packet(packet).await;
        result.map_err(|e| self.record_error(e))
    }

    /// Receive one packet outside of a request exchange.
    pub async fn recv_packet(&mut self) -> Result<Packet, RpcError> {
        self.ensure_usable()?;
        let result = self.transport.recv_packet().await;
        result.map_err(|e| self.record_error(e))
    }

    /// Wait up to `wait` for the peer to send something.
    pub async fn poll_ready(&mut self, wait: Duration) -> Result<bool, RpcError> {
        self.ensure_usable()?;
        let result = self.transport.poll_ready(wait).await;
        result.map_err(|e| self.record_error(e))
    }

    /// Send a request and wait for its reply, servicing interrupts meanwhile.
    ///
    /// A reply is a packet coded [`RpcCode::OK`], or coded like the request
    /// when that code is not one the peer uses for its own requests.
    pub async fn send_request_and_receive_reply<H: InterruptHandler>(
        &mut self,
        request: PacketWriter,
        handler: &mut H,
    ) -> Result<Packet, RpcError> {
        let result = self.exchange(request, handler).await;
        self.state = EngineState::Idle;
        handler.on_request_end();
        result
    }

    async fn exchange<H: InterruptHandler>(
        &mut self,
        request: PacketWriter,
        handler: &mut H,
    ) -> Result<Packet, RpcError> {
        let code = request.code();
        self.send_packet(request).await?;
        self.state = EngineState::AwaitingReply(code);

        let mut interrupts = 0usize;
        loop {
            let packet = self.recv_packet().await?;
            match packet.code {
                RpcCode::UNK => return Err(RpcError::Unknown),
                RpcCode::MEM => return Err(RpcError::RemoteOutOfMemory),
                RpcCode::CANCELLED => return Err(RpcError::Cancelled),
                c if c == RpcCode::OK || (c == code && !c.is_server_request()) => {
                    return Ok(packet)
                }
                c if !self.logged_in => {
                    warn!(code = %c, "unsolicited packet before login, dropping the request");
                    return Err(self.record_error(ProtocolViolation::NotLoggedIn(c).into()));
                }
                _ => {}
            }

            interrupts += 1;
            if interrupts > self.max_interrupts {
                let err = ProtocolViolation::TooManyInterrupts(self.max_interrupts);
                return Err(self.record_error(err.into()));
            }
            self.dispatch(packet, handler).await?;
            self.state = EngineState::AwaitingReply(code);
        }
    }

    /// Receive exactly one peer request, handle it and send the response.
    ///
    /// Used while idle to pick up unsolicited pushes. Receiving a reply here
    /// means the two ends disagree about who is waiting, which is fatal.
    pub async fn service_one_interrupt<H: InterruptHandler>(
        &mut self,
        handler: &mut H,
    ) -> Result<(), RpcError> {
        let result = self.receive_interrupt(handler).await;
        self.state = EngineState::Idle;
        handler.on_request_end();
        result
    }

    async fn receive_interrupt<H: InterruptHandler>(
        &mut self,
        handler: &mut H,
    ) -> Result<(), RpcError> {
        let packet = self.recv_packet().await?;
        let is_reply = matches!(
            packet.code,
            RpcCode::OK | RpcCode::UNK | RpcCode::MEM | RpcCode::CANCELLED | RpcCode::EVOK
        );
        if is_reply || !self.logged_in {
            let err = ProtocolViolation::UnexpectedPacket {
                code: packet.code,
                state: "polling for server requests",
            };
            return Err(self.record_error(err.into()));
        }
        self.dispatch(packet, handler).await
    }

    async fn dispatch<H: InterruptHandler>(
        &mut self,
        packet: Packet,
        handler: &mut H,
    ) -> Result<(), RpcError> {
        let code = packet.code;
        self.state = EngineState::DispatchingInterrupt(code);
        debug!(code = %code, "servicing server request");

        // The peer blocks until its request is answered, so a local failure
        // that leaves the stream intact still gets a response.
        let response = match handler.handle_interrupt(packet).await {
            Ok(response) => response,
            Err(err) if err.is_fatal() => return Err(self.record_error(err)),
            Err(err) => {
                warn!(code = %code, error = %err, "server request failed locally");
                PacketWriter::new(RpcCode::UNK)
            }
        };
        let response = if handler.cancel_requested().await {
            debug!(code = %code, "user cancelled, answering with a cancellation");
            PacketWriter::new(RpcCode::CANCELLED)
        } else {
            response
        };
        self.send_packet(response).await
    }
}
