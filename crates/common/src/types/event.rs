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

//! Debug events and exception descriptions.
//!
//! A [`DebugEvent`] is the architecture independent notification exchanged
//! between a debug server and its client: process and thread lifecycle,
//! breakpoints, exceptions and module loads. The payload that follows the
//! common header on the wire depends on the event id, which is why
//! [`EventInfo`] is decoded by looking at [`DebugEvent::eid`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::{CodecResult, Decode, Encode, Packer, Unpacker, BADADDR};

/// Event identifier. Every event carries exactly one of these bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EventId(pub u32);

impl EventId {
    /// Placeholder for "no event"
    pub const NO_EVENT: Self = Self(0x0000_0000);
    /// New process started
    pub const PROCESS_STARTED: Self = Self(0x0000_0001);
    /// Process stopped
    pub const PROCESS_EXITED: Self = Self(0x0000_0002);
    /// New thread started
    pub const THREAD_STARTED: Self = Self(0x0000_0004);
    /// Thread stopped
    pub const THREAD_EXITED: Self = Self(0x0000_0008);
    /// Breakpoint reached
    pub const BREAKPOINT: Self = Self(0x0000_0010);
    /// Single step completed
    pub const STEP: Self = Self(0x0000_0020);
    /// Exception raised
    pub const EXCEPTION: Self = Self(0x0000_0040);
    /// New library loaded
    pub const LIB_LOADED: Self = Self(0x0000_0080);
    /// Library unloaded
    pub const LIB_UNLOADED: Self = Self(0x0000_0100);
    /// Informational message for the user
    pub const INFORMATION: Self = Self(0x0000_0200);
    /// Attached to a running process
    pub const PROCESS_ATTACHED: Self = Self(0x0000_0400);
    /// Detached from a process
    pub const PROCESS_DETACHED: Self = Self(0x0000_0800);
    /// Process suspended
    pub const PROCESS_SUSPENDED: Self = Self(0x0000_1000);
    /// Trace buffer is full
    pub const TRACE_FULL: Self = Self(0x0000_2000);

    fn payload_kind(self) -> PayloadKind {
        match self {
            Self::PROCESS_STARTED | Self::PROCESS_ATTACHED | Self::LIB_LOADED => PayloadKind::Module,
            Self::PROCESS_EXITED | Self::THREAD_EXITED => PayloadKind::ExitCode,
            Self::BREAKPOINT => PayloadKind::Breakpoint,
            Self::EXCEPTION => PayloadKind::Exception,
            Self::THREAD_STARTED | Self::LIB_UNLOADED | Self::INFORMATION => PayloadKind::Message,
            _ => PayloadKind::None,
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Self::NO_EVENT => "NO_EVENT",
            Self::PROCESS_STARTED => "PROCESS_STARTED",
            Self::PROCESS_EXITED => "PROCESS_EXITED",
            Self::THREAD_STARTED => "THREAD_STARTED",
            Self::THREAD_EXITED => "THREAD_EXITED",
            Self::BREAKPOINT => "BREAKPOINT",
            Self::STEP => "STEP",
            Self::EXCEPTION => "EXCEPTION",
            Self::LIB_LOADED => "LIB_LOADED",
            Self::LIB_UNLOADED => "LIB_UNLOADED",
            Self::INFORMATION => "INFORMATION",
            Self::PROCESS_ATTACHED => "PROCESS_ATTACHED",
            Self::PROCESS_DETACHED => "PROCESS_DETACHED",
            Self::PROCESS_SUSPENDED => "PROCESS_SUSPENDED",
            Self::TRACE_FULL => "TRACE_FULL",
            Self(other) => return write!(f, "EVENT_{other:#x}"),
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadKind {
    None,
    Module,
    ExitCode,
    Breakpoint,
    Exception,
    Message,
}

/// A module (executable or library) mapped into the debuggee.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModInfo {
    /// Full path of the module
    pub name: String,
    /// Load address
    pub base: u64,
    /// Size of the mapped image
    pub size: u64,
    /// Address the database should be rebased to, or [`BADADDR`]
    pub rebase_to: u64,
}

impl Encode for ModInfo {
    fn encode(&self, p: &mut Packer) {
        p.pack_str(&self.name).pack_ea64(self.base).pack_ea64(self.size).pack_ea64(self.rebase_to);
    }
}

impl Decode for ModInfo {
    fn decode(u: &mut Unpacker<'_>) -> CodecResult<Self> {
        Ok(Self {
            name: u.unpack_str()?,
            base: u.unpack_ea64()?,
            size: u.unpack_ea64()?,
            rebase_to: u.unpack_ea64()?,
        })
    }
}

/// Addresses reported with a breakpoint event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BptHit {
    /// Address of a hardware breakpoint, or [`BADADDR`]
    pub hea: u64,
    /// Kernel address of the breakpoint, or [`BADADDR`]
    pub kea: u64,
}

/// Exception details attached to an exception event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionEvent {
    /// Platform exception code
    pub code: u32,
    /// Whether execution may continue after the exception
    pub can_cont: bool,
    /// Faulting address, or [`BADADDR`]
    pub ea: u64,
    /// Human readable description
    pub info: String,
}

/// Event specific payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventInfo {
    /// No payload
    #[default]
    None,
    /// Process started or attached, library loaded
    Module(ModInfo),
    /// Process or thread exit code
    ExitCode(i32),
    /// Breakpoint details
    Breakpoint(BptHit),
    /// Exception details
    Exception(ExceptionEvent),
    /// Thread name, unloaded library name or an informational message
    Message(String),
}

/// A debug event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugEvent {
    /// Event code, selects the layout of [`Self::info`]
    pub eid: EventId,
    /// Process where the event occurred
    pub pid: i32,
    /// Thread where the event occurred
    pub tid: i32,
    /// Address where the event occurred
    pub ea: u64,
    /// Whether the event has been handled by the debugger
    pub handled: bool,
    /// Event specific data
    pub info: EventInfo,
}

impl Default for DebugEvent {
    fn default() -> Self {
        Self {
            eid: EventId::NO_EVENT,
            pid: 0,
            tid: 0,
            ea: BADADDR,
            handled: false,
            info: EventInfo::None,
        }
    }
}

impl DebugEvent {
    /// Build an event with an empty payload.
    pub fn new(eid: EventId, pid: i32, tid: i32, ea: u64) -> Self {
        Self { eid, pid, tid, ea, ..Default::default() }
    }

    /// Attach a payload.
    pub fn with_info(mut self, info: EventInfo) -> Self {
        self.info = info;
        self
    }
}

impl Encode for DebugEvent {
    fn encode(&self, p: &mut Packer) {
        p.pack_dd(self.eid.0)
            .pack_dd_signed(self.pid)
            .pack_dd_signed(self.tid)
            .pack_ea64(self.ea)
            .pack_dd(self.handled as u32);

        // The payload layout is selected by the event id; a mismatched info
        // variant is written as the zero value of the expected layout.
        match (self.eid.payload_kind(), &self.info) {
            (PayloadKind::None, _) => {}
            (PayloadKind::Module, EventInfo::Module(m)) => m.encode(p),
            (PayloadKind::Module, _) => ModInfo::default().encode(p),
            (PayloadKind::ExitCode, EventInfo::ExitCode(code)) => {
                p.pack_dd_signed(*code);
            }
            (PayloadKind::ExitCode, _) => {
                p.pack_dd(0);
            }
            (PayloadKind::Breakpoint, EventInfo::Breakpoint(b)) => {
                p.pack_ea64(b.hea).pack_ea64(b.kea);
            }
            (PayloadKind::Breakpoint, _) => {
                p.pack_ea64(BADADDR).pack_ea64(BADADDR);
            }
            (PayloadKind::Exception, info) => {
                let default = ExceptionEvent::default();
                let exc = match info {
                    EventInfo::Exception(exc) => exc,
                    _ => &default,
                };
                p.pack_dd(exc.code).pack_dd(exc.can_cont as u32).pack_ea64(exc.ea).pack_str(&exc.info);
            }
            (PayloadKind::Message, EventInfo::Message(text)) => {
                p.pack_str(text);
            }
            (PayloadKind::Message, _) => {
                p.pack_str("");
            }
        }
    }
}

impl Decode for DebugEvent {
    fn decode(u: &mut Unpacker<'_>) -> CodecResult<Self> {
        let eid = EventId(u.unpack_dd()?);
        let pid = u.unpack_dd_signed()?;
        let tid = u.unpack_dd_signed()?;
        let ea = u.unpack_ea64()?;
        let handled = u.unpack_dd()? != 0;
        let info = match eid.payload_kind() {
            PayloadKind::None => EventInfo::None,
            PayloadKind::Module => EventInfo::Module(u.unpack()?),
            PayloadKind::ExitCode => EventInfo::ExitCode(u.unpack_dd_signed()?),
            PayloadKind::Breakpoint => {
                EventInfo::Breakpoint(BptHit { hea: u.unpack_ea64()?, kea: u.unpack_ea64()? })
            }
            PayloadKind::Exception => EventInfo::Exception(ExceptionEvent {
                code: u.unpack_dd()?,
                can_cont: u.unpack_dd()? != 0,
                ea: u.unpack_ea64()?,
                info: u.unpack_str()?,
            }),
            PayloadKind::Message => EventInfo::Message(u.unpack_str()?),
        };
        Ok(Self { eid, pid, tid, ea, handled, info })
    }
}

/// How the debugger treats one kind of exception.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
    /// Platform exception code
    pub code: u32,
    /// Combination of the `EXC_*` flags
    pub flags: u32,
    /// Short name
    pub name: String,
    /// Description
    pub desc: String,
}

impl ExceptionInfo {
    /// Suspend the process when the exception occurs
    pub const EXC_BREAK: u32 = 0x0001;
    /// Pass the exception to the application
    pub const EXC_HANDLE: u32 = 0x0002;
    /// Show a message when the exception occurs
    pub const EXC_MSG: u32 = 0x0004;
    /// Do not report the exception at all
    pub const EXC_SILENT: u32 = 0x0008;
}

impl Encode for ExceptionInfo {
    fn encode(&self, p: &mut Packer) {
        p.pack_dd(self.code).pack_dd(self.flags).pack_str(&self.name).pack_str(&self.desc);
    }
}

impl Decode for ExceptionInfo {
    fn decode(u: &mut Unpacker<'_>) -> CodecResult<Self> {
        Ok(Self {
            code: u.unpack_dd()?,
            flags: u.unpack_dd()?,
            name: u.unpack_str()?,
            desc: u.unpack_str()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(ev: &DebugEvent) -> DebugEvent {
        let mut p = Packer::new();
        p.pack(ev);
        let mut u = Unpacker::new(p.as_bytes());
        let back = u.unpack::<DebugEvent>().unwrap();
        assert!(u.is_empty(), "trailing bytes after {}", ev.eid);
        back
    }

    #[test]
    fn test_every_payload_layout_round_trips() {
        let events = vec![
            DebugEvent::new(EventId::PROCESS_STARTED, 1234, 1, 0x400000).with_info(
                EventInfo::Module(ModInfo {
                    name: "/usr/bin/target".into(),
                    base: 0x400000,
                    size: 0x2000,
                    rebase_to: BADADDR,
                }),
            ),
            DebugEvent::new(EventId::THREAD_EXITED, 1234, 7, BADADDR)
                .with_info(EventInfo::ExitCode(-1)),
            DebugEvent::new(EventId::BREAKPOINT, 1234, 7, 0x401000).with_info(
                EventInfo::Breakpoint(BptHit { hea: BADADDR, kea: 0xFFFF_8000_0000_0000 }),
            ),
            DebugEvent::new(EventId::EXCEPTION, 1234, 7, 0x401234).with_info(
                EventInfo::Exception(ExceptionEvent {
                    code: 0xC000_0005,
                    can_cont: true,
                    ea: 0,
                    info: "access violation".into(),
                }),
            ),
            DebugEvent::new(EventId::INFORMATION, 1, 1, 0)
                .with_info(EventInfo::Message("hello".into())),
            DebugEvent::new(EventId::STEP, 1, 1, 0x401001),
            DebugEvent::default(),
        ];

        for ev in &events {
            assert_eq!(&round_trip(ev), ev);
        }
    }

    #[test]
    fn test_mismatched_info_follows_event_id() {
        let ev = DebugEvent::new(EventId::LIB_UNLOADED, 1, 1, 0);
        let back = round_trip(&ev);
        assert_eq!(back.info, EventInfo::Message(String::new()));
    }

    #[test]
    fn test_unknown_event_id_has_no_payload() {
        let ev = DebugEvent::new(EventId(0x8000), 3, 4, 5);
        assert_eq!(round_trip(&ev), ev);
        assert_eq!(EventId(0x8000).to_string(), "EVENT_0x8000");
    }

    #[test]
    fn test_exception_table() {
        let table = vec![
            ExceptionInfo {
                code: 0x8000_0003,
                flags: ExceptionInfo::EXC_BREAK | ExceptionInfo::EXC_MSG,
                name: "EXCEPTION_BREAKPOINT".into(),
                desc: "Software breakpoint".into(),
            },
            ExceptionInfo::default(),
        ];
        let mut p = Packer::new();
        p.pack(&table);
        let back: Vec<ExceptionInfo> = Unpacker::new(p.as_bytes()).unpack().unwrap();
        assert_eq!(back, table);
    }
}
