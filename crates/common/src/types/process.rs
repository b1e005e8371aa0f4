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

//! Processes, threads and call stacks.

use serde::{Deserialize, Serialize};

use crate::codec::{CodecResult, Decode, Encode, Packer, Unpacker};

/// A process the server can attach to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    /// Process id
    pub pid: i32,
    /// Process name or command line
    pub name: String,
}

impl Encode for ProcessInfo {
    fn encode(&self, p: &mut Packer) {
        p.pack_dd_signed(self.pid).pack_str(&self.name);
    }
}

impl Decode for ProcessInfo {
    fn decode(u: &mut Unpacker<'_>) -> CodecResult<Self> {
        Ok(Self { pid: u.unpack_dd_signed()?, name: u.unpack_str()? })
    }
}

/// The name of a thread, reported when the debuggee stops.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadName {
    /// Thread id
    pub tid: i32,
    /// Thread name
    pub name: String,
}

impl Encode for ThreadName {
    fn encode(&self, p: &mut Packer) {
        p.pack_dd_signed(self.tid).pack_str(&self.name);
    }
}

impl Decode for ThreadName {
    fn decode(u: &mut Unpacker<'_>) -> CodecResult<Self> {
        Ok(Self { tid: u.unpack_dd_signed()?, name: u.unpack_str()? })
    }
}

/// One frame of a call stack computed by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStackEntry {
    /// Address of the call instruction
    pub callea: u64,
    /// Start of the called function
    pub funcea: u64,
    /// Frame pointer of the called function
    pub fp: u64,
    /// Whether `funcea` is reliable
    pub funcok: bool,
}

impl Encode for CallStackEntry {
    fn encode(&self, p: &mut Packer) {
        p.pack_ea64(self.callea)
            .pack_ea64(self.funcea)
            .pack_ea64(self.fp)
            .pack_dd(self.funcok as u32);
    }
}

impl Decode for CallStackEntry {
    fn decode(u: &mut Unpacker<'_>) -> CodecResult<Self> {
        Ok(Self {
            callea: u.unpack_ea64()?,
            funcea: u.unpack_ea64()?,
            fp: u.unpack_ea64()?,
            funcok: u.unpack_dd()? != 0,
        })
    }
}

/// Attributes of the debugged application, known once a process runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebappAttrs {
    /// Address size of the application in bytes
    pub addrsize: u32,
    /// Platform name ("win32", "linux", ...)
    pub platform: String,
}

impl Encode for DebappAttrs {
    fn encode(&self, p: &mut Packer) {
        p.pack_dd(self.addrsize).pack_str(&self.platform);
    }
}

impl Decode for DebappAttrs {
    fn decode(u: &mut Unpacker<'_>) -> CodecResult<Self> {
        Ok(Self { addrsize: u.unpack_dd()?, platform: u.unpack_str()? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BADADDR;

    #[test]
    fn test_call_stack_round_trip() {
        let frames = vec![
            CallStackEntry { callea: 0x401005, funcea: 0x402000, fp: 0x7FFE_0000, funcok: true },
            CallStackEntry { callea: BADADDR, funcea: BADADDR, fp: 0, funcok: false },
        ];
        let mut p = Packer::new();
        p.pack(&frames);
        let back: Vec<CallStackEntry> = Unpacker::new(p.as_bytes()).unpack().unwrap();
        assert_eq!(back, frames);
    }

    #[test]
    fn test_process_list_wire_layout() {
        let procs = vec![ProcessInfo { pid: 42, name: "a".into() }];
        let mut p = Packer::new();
        p.pack(&procs);
        assert_eq!(p.as_bytes(), &[1, 42, b'a', 0]);
    }
}
