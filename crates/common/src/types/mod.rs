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

//! Protocol records shared by every component that speaks the debugger wire
//! protocol.

/// Appcall argument and return blobs
pub mod appcall;
/// Breakpoint batches and low-level conditions
pub mod breakpoint;
/// Debug events and exception tables
pub mod event;
/// Memory maps, scattered images and search patterns
pub mod memory;
/// Symbol name batches
pub mod names;
/// Processes, threads and call stacks
pub mod process;
/// Register values and layouts
pub mod registers;
/// Operation status codes
pub mod status;

pub use appcall::*;
pub use breakpoint::*;
pub use event::*;
pub use memory::*;
pub use names::*;
pub use process::*;
pub use registers::*;
pub use status::*;
