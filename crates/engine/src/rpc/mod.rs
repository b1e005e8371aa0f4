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

//! Remote debugger wire protocol.
//!
//! The protocol is a strict request/reply conversation over one byte stream,
//! with the twist that the server may interrupt a pending request with
//! requests of its own.
//!
//! # Layers
//!
//! - **Packet** ([`packet`]) - opcodes, frame header and packet builders
//! - **Transport** ([`transport`]) - framed reads and writes with timeouts
//! - **Engine** ([`engine`]) - the request/reply state machine and interrupt loop
//! - **Host** ([`host`]) - marshalling of host-side work onto a single worker
//! - **Client** ([`client`]) - client interrupt handlers and request helpers
//! - **Utils** ([`utils`]) - endpoint parsing
//!
//! # Frame format
//!
//! ```text
//! +----------------+------+-----------------+
//! | length (u32be) | code | payload[length] |
//! +----------------+------+-----------------+
//! ```

pub mod client;
pub mod engine;
pub mod host;
pub mod packet;
pub mod transport;
pub mod utils;

pub use client::*;
pub use engine::*;
pub use host::*;
pub use packet::*;
pub use transport::*;
