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

//! Breakpoint descriptions exchanged with the debug server.
//!
//! Breakpoints are never added or removed one by one. The client sends one
//! batch with all additions followed by all deletions and the server answers
//! with one [`BptCode`] per item. Addresses in a batch are delta-encoded
//! against the previous entry to keep large batches small.

use std::{fmt::Display, str::FromStr};

use eyre::{bail, Error, Result};
use serde::{Deserialize, Serialize};

use crate::codec::{CodecError, CodecResult, Packer, Unpacker, BADADDR};

/// Kind of breakpoint, a bit mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BptType(pub u32);

impl BptType {
    /// Hardware write watchpoint
    pub const WRITE: Self = Self(1);
    /// Hardware read watchpoint
    pub const READ: Self = Self(2);
    /// Hardware read/write watchpoint
    pub const RDWR: Self = Self(3);
    /// Software breakpoint
    pub const SOFT: Self = Self(4);
    /// Hardware execution breakpoint
    pub const EXEC: Self = Self(8);
    /// Software breakpoint when possible, hardware execution otherwise
    pub const DEFAULT: Self = Self(Self::SOFT.0 | Self::EXEC.0);

    /// Whether this is a software breakpoint.
    pub fn is_soft(self) -> bool {
        self.0 & Self::SOFT.0 != 0
    }
}

impl Default for BptType {
    fn default() -> Self {
        Self::SOFT
    }
}

impl Display for BptType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::WRITE => write!(f, "write"),
            Self::READ => write!(f, "read"),
            Self::RDWR => write!(f, "rdwr"),
            Self::SOFT => write!(f, "soft"),
            Self::EXEC => write!(f, "exec"),
            Self::DEFAULT => write!(f, "default"),
            Self(other) => write!(f, "{other:#x}"),
        }
    }
}

impl FromStr for BptType {
    type Err = Error;

    /// Accepts the names printed by [`Display`] or a numeric mask.
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "write" => Self::WRITE,
            "read" => Self::READ,
            "rdwr" => Self::RDWR,
            "soft" => Self::SOFT,
            "exec" => Self::EXEC,
            "default" => Self::DEFAULT,
            other => {
                let mask = match other.strip_prefix("0x") {
                    Some(hex) => u32::from_str_radix(hex, 16),
                    None => other.parse::<u32>(),
                };
                match mask {
                    Ok(mask) if mask != 0 => Self(mask),
                    _ => bail!("Invalid breakpoint type: {s}"),
                }
            }
        })
    }
}

/// Per breakpoint outcome reported by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BptCode {
    /// Breakpoint can be set
    #[default]
    Ok = 0,
    /// Internal error
    InternalErr = 1,
    /// Unsupported breakpoint type
    BadType = 2,
    /// Address is not aligned properly
    BadAlign = 3,
    /// Address is invalid
    BadAddr = 4,
    /// Breakpoint length is invalid
    BadLen = 5,
    /// No more hardware breakpoint slots
    TooMany = 6,
    /// Original bytes could not be read
    ReadError = 7,
    /// Breakpoint instruction could not be written
    WriteError = 8,
    /// Breakpoint was skipped
    Skip = 9,
    /// Page breakpoint set
    PageOk = 10,
}

impl BptCode {
    /// Map a raw code received from the peer.
    pub fn from_raw(raw: i64) -> CodecResult<Self> {
        Ok(match raw {
            0 => Self::Ok,
            1 => Self::InternalErr,
            2 => Self::BadType,
            3 => Self::BadAlign,
            4 => Self::BadAddr,
            5 => Self::BadLen,
            6 => Self::TooMany,
            7 => Self::ReadError,
            8 => Self::WriteError,
            9 => Self::Skip,
            10 => Self::PageOk,
            value => return Err(CodecError::InvalidValue { what: "breakpoint code", value }),
        })
    }
}

/// One entry of a breakpoint update batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateBptInfo {
    /// Breakpoint address
    pub ea: u64,
    /// Bytes overwritten by a software breakpoint, needed to remove it
    pub orgbytes: Vec<u8>,
    /// Breakpoint kind
    pub bpt_type: BptType,
    /// Length of a hardware breakpoint
    pub size: u32,
    /// Outcome; additions with a code other than `Ok` are not sent
    pub code: BptCode,
    /// Process the breakpoint belongs to
    pub pid: i32,
    /// Thread the breakpoint belongs to, -1 for all threads
    pub tid: i32,
}

impl UpdateBptInfo {
    /// A software breakpoint to add at `ea` for all threads.
    pub fn soft(ea: u64, pid: i32) -> Self {
        Self { ea, bpt_type: BptType::SOFT, pid, tid: -1, ..Default::default() }
    }
}

/// Append the request body of a breakpoint update batch.
///
/// `adds` must already exclude entries that are invalid locally.
pub fn pack_bpt_update(p: &mut Packer, adds: &[&UpdateBptInfo], dels: &[UpdateBptInfo]) {
    p.pack_dd(adds.len() as u32).pack_dd(dels.len() as u32);

    let mut base = 0;
    for b in adds {
        p.pack_ea64_delta(b.ea, &mut base)
            .pack_dd(b.size)
            .pack_dd(b.bpt_type.0)
            .pack_dd_signed(b.pid)
            .pack_dd_signed(b.tid);
    }

    base = 0;
    for b in dels {
        p.pack_ea64_delta(b.ea, &mut base)
            .pack_db(b.orgbytes.len() as u8)
            .append(&b.orgbytes)
            .pack_dd(b.bpt_type.0)
            .pack_dd_signed(b.pid)
            .pack_dd_signed(b.tid);
    }
}

/// Read a batch written by [`pack_bpt_update`], returning additions and deletions.
pub fn unpack_bpt_update(
    u: &mut Unpacker<'_>,
) -> CodecResult<(Vec<UpdateBptInfo>, Vec<UpdateBptInfo>)> {
    let nadd = u.unpack_count("breakpoint additions")?;
    let ndel = u.unpack_count("breakpoint deletions")?;

    let mut base = 0;
    let mut adds = Vec::with_capacity(nadd);
    for _ in 0..nadd {
        adds.push(UpdateBptInfo {
            ea: u.unpack_ea64_delta(&mut base)?,
            size: u.unpack_dd()?,
            bpt_type: BptType(u.unpack_dd()?),
            pid: u.unpack_dd_signed()?,
            tid: u.unpack_dd_signed()?,
            ..Default::default()
        });
    }

    base = 0;
    let mut dels = Vec::with_capacity(ndel);
    for _ in 0..ndel {
        let ea = u.unpack_ea64_delta(&mut base)?;
        let len = u.unpack_db()? as usize;
        let orgbytes = u.unpack_bytes(len)?.to_vec();
        dels.push(UpdateBptInfo {
            ea,
            orgbytes,
            bpt_type: BptType(u.unpack_dd()?),
            pid: u.unpack_dd_signed()?,
            tid: u.unpack_dd_signed()?,
            ..Default::default()
        });
    }
    Ok((adds, dels))
}

/// A breakpoint guarded by a condition the server evaluates on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowCondition {
    /// Breakpoint address
    pub ea: u64,
    /// Compiled condition; empty to remove the condition
    pub cndbody: String,
    /// Breakpoint kind
    pub bpt_type: BptType,
    /// Length of a hardware breakpoint
    pub size: u32,
    /// Bytes under a software breakpoint
    pub orgbytes: Vec<u8>,
    /// Address of the decoded instruction at `ea`, or [`BADADDR`]
    pub insn_ea: u64,
    /// Opaque decoded instruction, sent when `insn_ea` is valid
    pub insn: Vec<u8>,
}

/// Append a list of low-level conditions.
pub fn pack_lowcnds(p: &mut Packer, conditions: &[LowCondition]) {
    p.pack_dd(conditions.len() as u32);
    let mut base = 0;
    for lc in conditions {
        p.pack_ea64_delta(lc.ea, &mut base).pack_str(&lc.cndbody);
        if lc.cndbody.is_empty() {
            continue;
        }
        p.pack_dd(lc.bpt_type.0);
        if !lc.bpt_type.is_soft() {
            p.pack_dd(lc.size);
        }
        p.pack_db(lc.orgbytes.len() as u8).append(&lc.orgbytes).pack_ea64(lc.insn_ea);
        if lc.insn_ea != BADADDR {
            p.pack_buf(&lc.insn);
        }
    }
}

/// Read a list written by [`pack_lowcnds`].
pub fn unpack_lowcnds(u: &mut Unpacker<'_>) -> CodecResult<Vec<LowCondition>> {
    let n = u.unpack_count("condition count")?;
    let mut base = 0;
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        let mut lc = LowCondition {
            ea: u.unpack_ea64_delta(&mut base)?,
            cndbody: u.unpack_str()?,
            insn_ea: BADADDR,
            ..Default::default()
        };
        if !lc.cndbody.is_empty() {
            lc.bpt_type = BptType(u.unpack_dd()?);
            if !lc.bpt_type.is_soft() {
                lc.size = u.unpack_dd()?;
            }
            let len = u.unpack_db()? as usize;
            lc.orgbytes = u.unpack_bytes(len)?.to_vec();
            lc.insn_ea = u.unpack_ea64()?;
            if lc.insn_ea != BADADDR {
                lc.insn = u.unpack_buf()?.to_vec();
            }
        }
        out.push(lc);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bpt_type_parsing() {
        assert_eq!("soft".parse::<BptType>().unwrap(), BptType::SOFT);
        assert_eq!("RDWR".parse::<BptType>().unwrap(), BptType::RDWR);
        assert_eq!("0xc".parse::<BptType>().unwrap(), BptType::DEFAULT);
        assert!("nonsense".parse::<BptType>().is_err());
        assert!("0".parse::<BptType>().is_err());
        assert_eq!(BptType(0x40).to_string(), "0x40");
    }

    #[test]
    fn test_batch_round_trip_with_descending_addresses() {
        let a1 = UpdateBptInfo::soft(0x401000, 100);
        let a2 = UpdateBptInfo {
            ea: 0x400010,
            bpt_type: BptType::WRITE,
            size: 4,
            pid: 100,
            tid: 7,
            ..Default::default()
        };
        let d1 = UpdateBptInfo {
            ea: 0x7FFF_0000_0000,
            orgbytes: vec![0x55],
            bpt_type: BptType::SOFT,
            pid: 100,
            tid: -1,
            ..Default::default()
        };
        let d2 = UpdateBptInfo { ea: 0x10, orgbytes: vec![], ..UpdateBptInfo::soft(0x10, 100) };

        let mut p = Packer::new();
        pack_bpt_update(&mut p, &[&a1, &a2], &[d1.clone(), d2.clone()]);

        let mut u = Unpacker::new(p.as_bytes());
        let (adds, dels) = unpack_bpt_update(&mut u).unwrap();
        assert!(u.is_empty());
        assert_eq!(adds, vec![a1, a2]);
        assert_eq!(dels, vec![d1, d2]);
    }

    #[test]
    fn test_empty_batch() {
        let mut p = Packer::new();
        pack_bpt_update(&mut p, &[], &[]);
        assert_eq!(p.as_bytes(), &[0, 0]);
    }

    #[test]
    fn test_lowcnds_round_trip() {
        let conditions = vec![
            LowCondition {
                ea: 0x401000,
                cndbody: "eax == 1".into(),
                bpt_type: BptType::SOFT,
                orgbytes: vec![0x90],
                insn_ea: 0x401000,
                insn: vec![1, 2, 3],
                ..Default::default()
            },
            LowCondition { ea: 0x400000, insn_ea: BADADDR, ..Default::default() },
            LowCondition {
                ea: 0x400100,
                cndbody: "1".into(),
                bpt_type: BptType::EXEC,
                size: 1,
                insn_ea: BADADDR,
                ..Default::default()
            },
        ];
        let mut p = Packer::new();
        pack_lowcnds(&mut p, &conditions);
        let back = unpack_lowcnds(&mut Unpacker::new(p.as_bytes())).unwrap();
        assert_eq!(back, conditions);
    }

    #[test]
    fn test_bpt_code_range() {
        assert_eq!(BptCode::from_raw(10).unwrap(), BptCode::PageOk);
        assert!(BptCode::from_raw(11).is_err());
        assert!(BptCode::from_raw(-1).is_err());
    }
}
