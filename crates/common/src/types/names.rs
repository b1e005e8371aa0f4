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

//! Symbol names pushed by the server.
//!
//! Name batches can be large (a whole export table), so addresses are sent as
//! signed deltas and every name only carries the suffix that differs from the
//! previous one.

use serde::{Deserialize, Serialize};

use crate::codec::{CodecError, CodecResult, Packer, Unpacker};

/// A named address in the debuggee.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugName {
    /// Address of the symbol
    pub ea: u64,
    /// Symbol name
    pub name: String,
}

/// Append a batch of names, compressing addresses and shared prefixes.
pub fn pack_debug_names(p: &mut Packer, names: &[DebugName]) {
    p.pack_dd(names.len() as u32);
    let mut prev_ea = 0u64;
    let mut prev_name: &[u8] = &[];
    for n in names {
        let diff = n.ea.wrapping_sub(prev_ea) as i64;
        p.pack_ea64(diff.unsigned_abs()).pack_dd((diff < 0) as u32);
        prev_ea = n.ea;

        let name = n.name.as_bytes();
        let shared = prev_name.iter().zip(name).take_while(|(a, b)| a == b).count();
        p.pack_dd(shared as u32).pack_cstr(&name[shared..]);
        prev_name = name;
    }
}

/// Read a batch written by [`pack_debug_names`].
pub fn unpack_debug_names(u: &mut Unpacker<'_>) -> CodecResult<Vec<DebugName>> {
    let qty = u.unpack_count("name count")?;
    let mut out = Vec::with_capacity(qty);
    let mut ea = 0u64;
    let mut name: Vec<u8> = Vec::new();
    for _ in 0..qty {
        let magnitude = u.unpack_ea64()?;
        let negative = u.unpack_dd()? != 0;
        ea = if negative { ea.wrapping_sub(magnitude) } else { ea.wrapping_add(magnitude) };

        let shared = u.unpack_dd()? as usize;
        if shared > name.len() {
            return Err(CodecError::InvalidValue { what: "name prefix length", value: shared as i64 });
        }
        name.truncate(shared);
        name.extend_from_slice(u.unpack_cstr()?);
        out.push(DebugName { ea, name: String::from_utf8_lossy(&name).into_owned() });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[(u64, &str)]) -> Vec<DebugName> {
        list.iter().map(|&(ea, name)| DebugName { ea, name: name.into() }).collect()
    }

    #[test]
    fn test_names_round_trip_both_directions() {
        let batch = names(&[
            (0x7FF8_1000, "kernel32_CreateFileA"),
            (0x7FF8_1010, "kernel32_CreateFileW"),
            (0x7FF8_0800, "kernel32_CloseHandle"),
            (0x1000, "start"),
            (0x1000, "start"),
            (0xFFFF_FFFF_FFFF_0000, ""),
            (0, "z"),
        ]);
        let mut p = Packer::new();
        pack_debug_names(&mut p, &batch);
        let mut u = Unpacker::new(p.as_bytes());
        assert_eq!(unpack_debug_names(&mut u).unwrap(), batch);
        assert!(u.is_empty());
    }

    #[test]
    fn test_prefix_longer_than_previous_name_is_rejected() {
        let mut p = Packer::new();
        p.pack_dd(1).pack_ea64(0x10).pack_dd(0).pack_dd(3).pack_str("abc");
        let err = unpack_debug_names(&mut Unpacker::new(p.as_bytes())).unwrap_err();
        assert!(matches!(err, CodecError::InvalidValue { what: "name prefix length", .. }));
    }
}
