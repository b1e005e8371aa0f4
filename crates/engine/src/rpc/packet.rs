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

//! Packet codes and frame layout.
//!
//! Every frame on the wire is a 5 byte header followed by the payload:
//!
//! ```text
//! +----------------------+--------+------------------+
//! | length (u32, BE)     | code   | payload          |
//! +----------------------+--------+------------------+
//!   4 bytes                1 byte   `length` bytes
//! ```
//!
//! The length counts the payload only, so a zero-length payload (a bare
//! acknowledgement) is a valid 5 byte frame.

use std::{fmt, ops::Deref, ops::DerefMut};

use dbgrpc_common::{Packer, Unpacker};

/// Size of the frame header.
pub const PACKET_HEADER_SIZE: usize = 5;

/// Packet code, the first discriminator of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RpcCode(pub u8);

macro_rules! rpc_codes {
    ($($(#[$doc:meta])* $name:ident = $value:literal,)*) => {
        impl RpcCode {
            $(
                $(#[$doc])*
                pub const $name: Self = Self($value);
            )*

            /// Symbolic name of a known code.
            pub fn name(self) -> Option<&'static str> {
                match self.0 {
                    $($value => Some(stringify!($name)),)*
                    _ => None,
                }
            }
        }
    };
}

rpc_codes! {
    /// Generic success reply
    OK = 0,
    /// The request is not understood
    UNK = 1,
    /// The peer ran out of memory
    MEM = 2,
    /// Session announcement sent by the server on connect
    OPEN = 3,
    /// The server pushes a debug event
    EVENT = 4,
    /// The pushed event was accepted
    EVOK = 5,
    /// The user cancelled the current request
    CANCELLED = 6,

    /// Initialize the debugger module
    INIT = 10,
    /// Terminate the debugger module
    TERM = 11,
    /// List processes
    GET_PROCESSES = 12,
    /// Launch a process
    START_PROCESS = 13,
    /// Kill the process
    EXIT_PROCESS = 14,
    /// Attach to a running process
    ATTACH_PROCESS = 15,
    /// Detach from the process
    DETACH_PROCESS = 16,
    /// Fetch the next debug event
    GET_DEBUG_EVENT = 17,
    /// Ask the process to suspend
    PREPARE_TO_PAUSE_PROCESS = 18,
    /// The client finished processing an event
    STOPPED_AT_DEBUG_EVENT = 19,
    /// Resume after an event
    CONTINUE_AFTER_EVENT = 20,
    /// Suspend a thread
    TH_SUSPEND = 21,
    /// Resume a thread
    TH_CONTINUE = 22,
    /// Select how a thread resumes
    SET_RESUME_MODE = 23,
    /// Fetch the memory map
    GET_MEMORY_INFO = 24,
    /// Read debuggee memory
    READ_MEMORY = 25,
    /// Write debuggee memory
    WRITE_MEMORY = 26,
    /// Add and remove breakpoints
    UPDATE_BPTS = 27,
    /// Install low-level breakpoint conditions
    UPDATE_LOWCNDS = 28,
    /// Evaluate a low-level condition
    EVAL_LOWCND = 29,
    /// Check whether a breakpoint can be set
    ISOK_BPT = 30,
    /// Read registers
    READ_REGS = 31,
    /// Write one register
    WRITE_REG = 32,
    /// Fetch a segment register base
    GET_SREG_BASE = 33,
    /// Configure exception handling
    SET_EXCEPTION_INFO = 34,
    /// Open a remote file
    OPEN_FILE = 35,
    /// Close a remote file
    CLOSE_FILE = 36,
    /// Read a remote file
    READ_FILE = 37,
    /// Write a remote file
    WRITE_FILE = 38,
    /// Generic extension request, valid in both directions
    IOCTL = 39,
    /// Compute a call stack
    UPDATE_CALL_STACK = 40,
    /// Call a function in the debuggee
    APPCALL = 41,
    /// Undo a manual appcall frame
    CLEANUP_APPCALL = 42,
    /// Run a command on the server host
    REXEC = 43,
    /// Fetch the segments of a non-contiguous image
    GET_SCATTERED_IMAGE = 44,
    /// Fetch the UUID of an image
    GET_IMAGE_UUID = 45,
    /// Find the start of a named segment
    GET_SEGM_START = 46,
    /// Search debuggee memory
    BIN_SEARCH = 47,

    /// Publish symbol names
    SET_DEBUG_NAMES = 50,
    /// Synchronize the debugger stub
    SYNC_STUB = 51,
    /// Error message for the user
    ERROR = 52,
    /// Informational message for the user
    MSG = 53,
    /// Warning for the user
    WARNING = 54,
    /// Forward a debug event to the client's event handler
    HANDLE_DEBUG_EVENT = 55,
    /// Report a script error
    REPORT_IDC_ERROR = 56,
    /// Import the symbols of a module
    IMPORT_DLL = 57,
}

impl RpcCode {
    /// Whether the server sends this code as a request of its own. Such
    /// packets are interrupts when they arrive while a reply is awaited.
    pub fn is_server_request(self) -> bool {
        matches!(self.0, 50..=57) || matches!(self, Self::EVENT | Self::IOCTL)
    }
}

impl From<RpcCode> for u8 {
    fn from(code: RpcCode) -> Self {
        code.0
    }
}

impl fmt::Display for RpcCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "RPC_{name}"),
            None => write!(f, "RPC_{}", self.0),
        }
    }
}

/// A frame being built.
///
/// Dereferences to a [`Packer`] positioned after the header, so payload
/// fields are appended with the usual `pack_*` calls.
#[derive(Debug, Clone)]
pub struct PacketWriter {
    code: RpcCode,
    buf: Packer,
}

impl PacketWriter {
    /// Start a frame with the given code and a placeholder length.
    pub fn new(code: RpcCode) -> Self {
        let mut buf = Packer::new();
        buf.append(&[0, 0, 0, 0, code.0]);
        Self { code, buf }
    }

    /// Code of the frame.
    pub fn code(&self) -> RpcCode {
        self.code
    }

    /// Payload bytes appended so far.
    pub fn payload(&self) -> &[u8] {
        &self.buf.as_bytes()[PACKET_HEADER_SIZE..]
    }

    /// Finalize the length field and return the complete frame.
    pub fn into_frame(self) -> Vec<u8> {
        let mut frame = self.buf.into_vec();
        let len = (frame.len() - PACKET_HEADER_SIZE) as u32;
        frame[..4].copy_from_slice(&len.to_be_bytes());
        frame
    }

    /// Convert into a received-packet view, as the peer would see it.
    pub fn into_packet(self) -> Packet {
        Packet { code: self.code, payload: self.payload().to_vec() }
    }
}

impl Deref for PacketWriter {
    type Target = Packer;

    fn deref(&self) -> &Packer {
        &self.buf
    }
}

impl DerefMut for PacketWriter {
    fn deref_mut(&mut self) -> &mut Packer {
        &mut self.buf
    }
}

/// A complete frame read from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Frame code
    pub code: RpcCode,
    /// Frame payload
    pub payload: Vec<u8>,
}

impl Packet {
    /// Decoder over the payload.
    pub fn reader(&self) -> Unpacker<'_> {
        Unpacker::new(&self.payload)
    }
}

/// Split a frame header into payload length and code.
pub fn parse_header(header: &[u8; PACKET_HEADER_SIZE]) -> (usize, RpcCode) {
    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    (len as usize, RpcCode(header[4]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let mut w = PacketWriter::new(RpcCode::READ_MEMORY);
        w.pack_ea64(0x401000).pack_dd(16);
        let payload = w.payload().to_vec();
        let frame = w.into_frame();

        assert_eq!(frame.len(), PACKET_HEADER_SIZE + payload.len());
        let header: [u8; PACKET_HEADER_SIZE] = frame[..PACKET_HEADER_SIZE].try_into().unwrap();
        assert_eq!(parse_header(&header), (payload.len(), RpcCode::READ_MEMORY));
        assert_eq!(&frame[PACKET_HEADER_SIZE..], payload.as_slice());
    }

    #[test]
    fn test_empty_payload_frame() {
        let frame = PacketWriter::new(RpcCode::OK).into_frame();
        assert_eq!(frame, vec![0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_code_names_and_roles() {
        assert_eq!(RpcCode::SET_DEBUG_NAMES.to_string(), "RPC_SET_DEBUG_NAMES");
        assert_eq!(RpcCode(200).to_string(), "RPC_200");
        assert!(RpcCode::MSG.is_server_request());
        assert!(RpcCode::EVENT.is_server_request());
        assert!(RpcCode::IOCTL.is_server_request());
        assert!(!RpcCode::READ_MEMORY.is_server_request());
        assert!(!RpcCode::OK.is_server_request());
    }
}
