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

//! Argument and return value blobs of a call into the debuggee.

use serde::{Deserialize, Serialize};

use crate::codec::{CodecError, CodecResult, Packer, Unpacker};

/// Caller will prepare and clean up the call frame manually
pub const APPCALL_MANUAL: u32 = 0x0001;
/// Return the debug event that interrupted a failed call
pub const APPCALL_DEBEV: u32 = 0x0002;
/// Abort the call after a timeout
pub const APPCALL_TIMEOUT: u32 = 0x0004;

/// Largest register object accepted without inline contents.
const MAX_REGOBJ_SIZE: usize = 1024;

/// A register argument or return value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegObj {
    /// Register number in the session's register set
    pub regidx: u32,
    /// Raw register contents
    pub value: Vec<u8>,
    /// Relocation flags of the value
    pub relocate: u32,
}

/// Append register objects. Without values only the layout (index and size)
/// is sent, which is how the expected return registers are described.
pub fn pack_regobjs(p: &mut Packer, objs: &[RegObj], with_values: bool) {
    p.pack_dd(objs.len() as u32);
    for obj in objs {
        p.pack_dd(obj.regidx).pack_dd(obj.value.len() as u32);
        if with_values {
            p.pack_dd(obj.relocate).append(&obj.value);
        }
    }
}

/// Read register objects written by [`pack_regobjs`]. Without values the
/// objects come back zero filled with the declared size.
pub fn unpack_regobjs(u: &mut Unpacker<'_>, with_values: bool) -> CodecResult<Vec<RegObj>> {
    let n = u.unpack_count("register object count")?;
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        let regidx = u.unpack_dd()?;
        let size = u.unpack_dd()? as usize;
        let obj = if with_values {
            let relocate = u.unpack_dd()?;
            RegObj { regidx, value: u.unpack_bytes(size)?.to_vec(), relocate }
        } else {
            if size > MAX_REGOBJ_SIZE {
                return Err(CodecError::InvalidValue {
                    what: "register object size",
                    value: size as i64,
                });
            }
            RegObj { regidx, value: vec![0; size], relocate: 0 }
        };
        out.push(obj);
    }
    Ok(out)
}

/// A relocatable memory blob, used for stack arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelObj {
    /// Blob contents
    pub bytes: Vec<u8>,
    /// Address the contents were prepared for
    pub base: u64,
    /// Relocation information
    pub ri: Vec<u8>,
}

/// Append a relocatable object.
pub fn pack_relobj(p: &mut Packer, obj: &RelObj) {
    p.pack_buf(&obj.bytes).pack_ea64(obj.base).pack_buf(&obj.ri);
}

/// Read a relocatable object.
pub fn unpack_relobj(u: &mut Unpacker<'_>) -> CodecResult<RelObj> {
    Ok(RelObj {
        bytes: u.unpack_buf()?.to_vec(),
        base: u.unpack_ea64()?,
        ri: u.unpack_buf()?.to_vec(),
    })
}

/// Parameters of a call into the debuggee.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppcallRequest {
    /// Address of the function to call
    pub func_ea: u64,
    /// Thread that performs the call
    pub tid: i32,
    /// Size of the stack arguments in bytes
    pub stkarg_nbytes: u32,
    /// Combination of the `APPCALL_*` flags
    pub flags: u32,
    /// Register arguments
    pub regargs: Vec<RegObj>,
    /// Stack arguments
    pub stkargs: RelObj,
    /// Registers expected to carry the return value
    pub retregs: Vec<RegObj>,
}

impl AppcallRequest {
    /// Whether the caller cleans up the call itself.
    pub fn is_manual(&self) -> bool {
        self.flags & APPCALL_MANUAL != 0
    }
}

/// Append an appcall request body.
pub fn pack_appcall(p: &mut Packer, req: &AppcallRequest) {
    p.pack_ea64(req.func_ea)
        .pack_dd_signed(req.tid)
        .pack_dd(req.stkarg_nbytes)
        .pack_dd(req.flags);
    pack_regobjs(p, &req.regargs, true);
    pack_relobj(p, &req.stkargs);
    if !req.is_manual() {
        pack_regobjs(p, &req.retregs, false);
    }
}

/// Read an appcall request body written by [`pack_appcall`].
pub fn unpack_appcall(u: &mut Unpacker<'_>) -> CodecResult<AppcallRequest> {
    let mut req = AppcallRequest {
        func_ea: u.unpack_ea64()?,
        tid: u.unpack_dd_signed()?,
        stkarg_nbytes: u.unpack_dd()?,
        flags: u.unpack_dd()?,
        ..Default::default()
    };
    req.regargs = unpack_regobjs(u, true)?;
    req.stkargs = unpack_relobj(u)?;
    if !req.is_manual() {
        req.retregs = unpack_regobjs(u, false)?;
    }
    Ok(req)
}
