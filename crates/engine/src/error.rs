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

//! Error types of the protocol engine and the debugger-module adapter.
//!
//! - [`RpcError`]: the conversation with the server failed (transport,
//!   framing, protocol). Fatal variants break the session.
//! - [`HandshakeError`]: the server is incompatible or rejected us.
//! - [`DebmodError`]: what every debugger operation returns; classifies into
//!   a [`Drc`] status through [`DebmodError::drc`].

use std::time::Duration;

use dbgrpc_common::{types::DebugEvent, types::Drc, CodecError};
use thiserror::Error;

use crate::rpc::packet::RpcCode;

/// The peer broke the protocol. The stream can no longer be trusted.
#[derive(Debug, Error)]
pub enum ProtocolViolation {
    /// A payload did not decode
    #[error("malformed payload: {0}")]
    Malformed(#[from] CodecError),
    /// A frame header announced an unreasonable payload size
    #[error("packet of {declared} bytes exceeds the {limit} byte limit")]
    PacketTooLarge {
        /// Declared payload length
        declared: usize,
        /// Configured maximum
        limit: usize,
    },
    /// The server kept interrupting a single request
    #[error("more than {0} interrupt requests while waiting for one reply")]
    TooManyInterrupts(usize),
    /// A second event arrived while the previous one was still pending
    #[error("server pushed a second event while one is still pending")]
    EventOverflow,
    /// The server sent a request before the session was established
    #[error("unsolicited {0} packet before login")]
    NotLoggedIn(RpcCode),
    /// A packet that is not valid in the current state
    #[error("unexpected {code} packet while {state}")]
    UnexpectedPacket {
        /// Packet code received
        code: RpcCode,
        /// What the client was doing
        state: &'static str,
    },
    /// A reply claims more data than was requested
    #[error("server returned {returned} bytes for a {requested} byte request")]
    OversizedReply {
        /// Amount announced by the server
        returned: usize,
        /// Amount requested
        requested: usize,
    },
}

/// Failure of the conversation with the remote server.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Transport level I/O failure
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),
    /// No complete packet arrived in time
    #[error("timed out after {0:?} waiting for the remote server")]
    Timeout(Duration),
    /// The server closed the connection
    #[error("connection closed by the remote server")]
    Disconnected,
    /// The server broke the protocol
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),
    /// The server does not implement the request
    #[error("remote did not understand our request")]
    Unknown,
    /// The server ran out of memory handling the request
    #[error("no remote memory")]
    RemoteOutOfMemory,
    /// The request was cancelled by the user
    #[error("operation cancelled by user")]
    Cancelled,
    /// A previous network error invalidated the session
    #[error("session is unusable after a previous network error")]
    SessionBroken,
    /// The host context stopped servicing requests
    #[error("host context is no longer running")]
    HostGone,
}

impl RpcError {
    /// Whether the error leaves the stream in an unknown state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Timeout(_) | Self::Disconnected | Self::Protocol(_))
    }
}

impl From<CodecError> for RpcError {
    fn from(err: CodecError) -> Self {
        Self::Protocol(ProtocolViolation::Malformed(err))
    }
}

/// Reasons the session handshake failed.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The first packet was not a session announcement
    #[error("the remote end is not a debugger server (got {0} instead of the session announcement)")]
    NotAServer(RpcCode),
    /// Protocol versions differ
    #[error("incompatible debugging server: protocol version is {actual}, expected {expected}")]
    VersionMismatch {
        /// Version this client speaks
        expected: u32,
        /// Version announced by the server
        actual: u32,
    },
    /// The server drives a different kind of debugger
    #[error("incompatible debugging server: debugger id is {actual}, expected {expected}")]
    DebuggerIdMismatch {
        /// Debugger id this client drives
        expected: u32,
        /// Debugger id announced by the server
        actual: u32,
    },
    /// The server cannot handle the client's address size
    #[error("incompatible debugging server: address size is {actual}, expected {expected} or more")]
    AddressSizeMismatch {
        /// Minimum address size the client needs
        expected: u32,
        /// Address size announced by the server
        actual: u32,
    },
    /// The server refused the password
    #[error("bad password")]
    BadPassword,
}

/// Failure of a debugger operation.
#[derive(Debug, Error)]
pub enum DebmodError {
    /// The conversation with the server failed
    #[error(transparent)]
    Rpc(#[from] RpcError),
    /// The session could not be established
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    /// The server reported that the operation failed
    #[error("{}", describe_remote(.drc, .message))]
    Remote {
        /// Status returned by the server
        drc: Drc,
        /// Error text sent along, possibly empty
        message: String,
    },
    /// A call into the debuggee failed
    #[error("appcall failed: {message}")]
    Appcall {
        /// Error text sent by the server
        message: String,
        /// Event that interrupted the call, when requested
        event: Option<Box<DebugEvent>>,
    },
    /// A remote file operation failed
    #[error("remote file operation failed (errno {errno})")]
    RemoteIo {
        /// Remote `errno`
        errno: i32,
    },
    /// No session is open
    #[error("not connected to a debugger server")]
    NotConnected,
    /// An operation was attempted before `init`
    #[error("the debugger module is not initialized")]
    NotInitialized,
    /// `init` was called twice in one session
    #[error("the debugger module is already initialized")]
    AlreadyInitialized,
    /// Register access before a register layout is known
    #[error("no register layout is known for this session")]
    NoRegisterSet,
    /// A breakpoint batch holds fewer entries than announced
    #[error("breakpoint batch of {len} entries cannot hold {nadd} additions and {ndel} deletions")]
    InvalidBatch {
        /// Entries in the batch
        len: usize,
        /// Announced additions
        nadd: usize,
        /// Announced deletions
        ndel: usize,
    },
}

fn describe_remote(drc: &Drc, message: &str) -> String {
    if message.is_empty() {
        format!("remote operation failed ({drc})")
    } else {
        format!("remote operation failed ({drc}): {message}")
    }
}

impl DebmodError {
    /// Build a remote failure from a status and its trailing text.
    pub fn remote(drc: Drc, message: impl Into<String>) -> Self {
        Self::Remote { drc, message: message.into() }
    }

    /// Status code equivalent of the error.
    pub fn drc(&self) -> Drc {
        match self {
            Self::Rpc(_) | Self::NotConnected => Drc::NetErr,
            Self::Remote { drc, .. } => *drc,
            Self::Handshake(_)
            | Self::Appcall { .. }
            | Self::RemoteIo { .. }
            | Self::NotInitialized
            | Self::AlreadyInitialized
            | Self::NoRegisterSet
            | Self::InvalidBatch { .. } => Drc::Failed,
        }
    }
}

/// Result alias for debugger operations.
pub type DebmodResult<T> = Result<T, DebmodError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drc_classification() {
        assert_eq!(DebmodError::from(RpcError::Disconnected).drc(), Drc::NetErr);
        assert_eq!(DebmodError::remote(Drc::NoProc, "gone").drc(), Drc::NoProc);
        assert_eq!(DebmodError::from(HandshakeError::BadPassword).drc(), Drc::Failed);
    }

    #[test]
    fn test_messages_name_the_mismatch() {
        let err = HandshakeError::VersionMismatch { expected: 29, actual: 28 };
        assert_eq!(
            err.to_string(),
            "incompatible debugging server: protocol version is 28, expected 29"
        );
        assert_eq!(
            DebmodError::remote(Drc::Failed, "").to_string(),
            "remote operation failed (failed)"
        );
        assert_eq!(
            DebmodError::remote(Drc::Failed, "bad address").to_string(),
            "remote operation failed (failed): bad address"
        );
    }

    #[test]
    fn test_fatality() {
        assert!(RpcError::Timeout(Duration::from_secs(1)).is_fatal());
        assert!(RpcError::from(CodecError::UnterminatedString { offset: 0 }).is_fatal());
        assert!(!RpcError::Unknown.is_fatal());
        assert!(!RpcError::Cancelled.is_fatal());
    }
}
