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

// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
// SPDX-License-Identifier: AGPL-3.0
//! DbgRPC Common - Shared functionality for dbgrpc components
//!
//! This crate provides the pieces used by both the protocol engine and the
//! command line client: the compact wire codec, the protocol records built on
//! top of it, and logging setup.

/// Compact integer, string and buffer encoding used on the wire
pub mod codec;
/// Logging setup and utilities for consistent logging across dbgrpc components
pub mod logging;
/// Protocol records: debug events, memory maps, registers, breakpoints
pub mod types;

pub use codec::*;
pub use logging::*;
