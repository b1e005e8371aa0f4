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

//! Memory layout records and binary search patterns.

use serde::{Deserialize, Serialize};

use crate::codec::{CodecResult, Decode, Encode, Packer, Unpacker};

/// Segment is executable
pub const SEGPERM_EXEC: u8 = 1;
/// Segment is writable
pub const SEGPERM_WRITE: u8 = 2;
/// Segment is readable
pub const SEGPERM_READ: u8 = 4;

/// One mapped memory area of the debuggee.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryInfo {
    /// First address of the area
    pub start: u64,
    /// One past the last address of the area
    pub end: u64,
    /// Area name, usually the mapped file
    pub name: String,
    /// Segment class ("CODE", "DATA", ...)
    pub sclass: String,
    /// Segment base (paragraph), zero for flat memory
    pub sbase: u64,
    /// 0 = 16-bit, 1 = 32-bit, 2 = 64-bit
    pub bitness: u8,
    /// Combination of `SEGPERM_*` bits
    pub perm: u8,
}

impl MemoryInfo {
    /// Size of the area in bytes.
    pub fn size(&self) -> u64 {
        self.end.wrapping_sub(self.start)
    }

    /// Whether `ea` lies within the area.
    pub fn contains(&self, ea: u64) -> bool {
        ea >= self.start && ea < self.end
    }
}

impl Encode for MemoryInfo {
    fn encode(&self, p: &mut Packer) {
        let para = self.sbase.wrapping_shl(4);
        p.pack_ea64(self.sbase)
            .pack_ea64(self.start.wrapping_sub(para))
            .pack_ea64(self.size())
            .pack_dd((self.perm & 7) as u32 | ((self.bitness as u32) << 4))
            .pack_str(&self.name)
            .pack_str(&self.sclass);
    }
}

impl Decode for MemoryInfo {
    fn decode(u: &mut Unpacker<'_>) -> CodecResult<Self> {
        let sbase = u.unpack_ea64()?;
        let start = sbase.wrapping_shl(4).wrapping_add(u.unpack_ea64()?);
        let end = start.wrapping_add(u.unpack_ea64()?);
        let flags = u.unpack_dd()?;
        Ok(Self {
            start,
            end,
            name: u.unpack_str()?,
            sclass: u.unpack_str()?,
            sbase,
            bitness: (flags >> 4) as u8,
            perm: (flags & 7) as u8,
        })
    }
}

/// One segment of an image that is not mapped contiguously.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScatteredSegment {
    /// First address
    pub start: u64,
    /// One past the last address
    pub end: u64,
    /// Segment name
    pub name: String,
}

impl Encode for ScatteredSegment {
    fn encode(&self, p: &mut Packer) {
        p.pack_ea64(self.start).pack_ea64(self.end).pack_str(&self.name);
    }
}

impl Decode for ScatteredSegment {
    fn decode(u: &mut Unpacker<'_>) -> CodecResult<Self> {
        Ok(Self { start: u.unpack_ea64()?, end: u.unpack_ea64()?, name: u.unpack_str()? })
    }
}

/// A compiled binary search pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledBinPattern {
    /// Bytes to look for
    pub bytes: Vec<u8>,
    /// Per byte mask, empty when every byte must match exactly
    pub mask: Vec<u8>,
    /// Ranges of `bytes` that hold string literals
    pub strlits: Vec<(u64, u64)>,
    /// Encoding index of the string literals
    pub encidx: u32,
}

impl Encode for CompiledBinPattern {
    fn encode(&self, p: &mut Packer) {
        p.pack_buf(&self.bytes).pack_buf(&self.mask).pack_dd(self.strlits.len() as u32);
        for &(start, end) in &self.strlits {
            p.pack_ea64(start).pack_ea64(end);
        }
        p.pack_dd(self.encidx);
    }
}

impl Decode for CompiledBinPattern {
    fn decode(u: &mut Unpacker<'_>) -> CodecResult<Self> {
        let bytes = u.unpack_buf()?.to_vec();
        let mask = u.unpack_buf()?.to_vec();
        let n = u.unpack_count("string literal count")?;
        let strlits = (0..n)
            .map(|_| Ok((u.unpack_ea64()?, u.unpack_ea64()?)))
            .collect::<CodecResult<Vec<_>>>()?;
        Ok(Self { bytes, mask, strlits, encidx: u.unpack_dd()? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BADADDR;

    #[test]
    fn test_memory_map_round_trip() {
        let areas = vec![
            MemoryInfo {
                start: 0x400000,
                end: 0x401000,
                name: "/bin/target".into(),
                sclass: "CODE".into(),
                sbase: 0,
                bitness: 2,
                perm: SEGPERM_READ | SEGPERM_EXEC,
            },
            MemoryInfo {
                start: 0x1_0000,
                end: 0x2_0000,
                name: String::new(),
                sclass: "DATA".into(),
                sbase: 0x1000,
                bitness: 0,
                perm: SEGPERM_READ | SEGPERM_WRITE,
            },
            MemoryInfo {
                start: 0xFFFF_F000_0000_0000,
                end: BADADDR,
                name: "[kernel]".into(),
                sclass: String::new(),
                sbase: 0,
                bitness: 2,
                perm: 0,
            },
        ];

        let mut p = Packer::new();
        p.pack(&areas);
        let back: Vec<MemoryInfo> = Unpacker::new(p.as_bytes()).unpack().unwrap();
        assert_eq!(back, areas);
        assert!(back[0].contains(0x400800));
        assert!(!back[0].contains(0x401000));
    }

    #[test]
    fn test_empty_memory_map() {
        let mut p = Packer::new();
        p.pack(&Vec::<MemoryInfo>::new());
        assert_eq!(p.as_bytes(), &[0]);
        let back: Vec<MemoryInfo> = Unpacker::new(p.as_bytes()).unpack().unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn test_bin_pattern_round_trip() {
        let pattern = CompiledBinPattern {
            bytes: b"\x55\x48\x89\xE5".to_vec(),
            mask: vec![0xFF, 0xFF, 0x00, 0xFF],
            strlits: vec![(0, 2)],
            encidx: 1,
        };
        let mut p = Packer::new();
        p.pack(&pattern);
        let back: CompiledBinPattern = Unpacker::new(p.as_bytes()).unpack().unwrap();
        assert_eq!(back, pattern);
    }
}
