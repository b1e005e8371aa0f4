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

//! Register values and the register layout negotiated with the server.

use serde::{Deserialize, Serialize};

use crate::codec::{CodecError, CodecResult, Decode, Encode, Packer, Unpacker};

/// The value of one register.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegValue {
    /// The register could not be read
    #[default]
    Unavailable,
    /// Integer register
    Int(u64),
    /// Floating point register, raw bytes in target order
    Float(Vec<u8>),
    /// Register of a custom data type, such as a vector register
    Custom {
        /// Index of the custom data type
        dtype: u32,
        /// Raw register contents
        data: Vec<u8>,
    },
}

impl RegValue {
    const TAG_UNAVAILABLE: u32 = 0;
    const TAG_INT: u32 = 1;
    const TAG_FLOAT: u32 = 2;
    const TAG_CUSTOM: u32 = 3;

    /// The integer value, if this is an integer register.
    pub fn as_int(&self) -> Option<u64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl Encode for RegValue {
    fn encode(&self, p: &mut Packer) {
        match self {
            Self::Unavailable => {
                p.pack_dd(Self::TAG_UNAVAILABLE);
            }
            Self::Int(v) => {
                p.pack_dd(Self::TAG_INT).pack_dq(*v);
            }
            Self::Float(bytes) => {
                p.pack_dd(Self::TAG_FLOAT).pack_buf(bytes);
            }
            Self::Custom { dtype, data } => {
                p.pack_dd(Self::TAG_CUSTOM.saturating_add(*dtype)).pack_buf(data);
            }
        }
    }
}

impl Decode for RegValue {
    fn decode(u: &mut Unpacker<'_>) -> CodecResult<Self> {
        Ok(match u.unpack_dd()? {
            Self::TAG_UNAVAILABLE => Self::Unavailable,
            Self::TAG_INT => Self::Int(u.unpack_dq()?),
            Self::TAG_FLOAT => Self::Float(u.unpack_buf()?.to_vec()),
            tag => Self::Custom { dtype: tag - Self::TAG_CUSTOM, data: u.unpack_buf()?.to_vec() },
        })
    }
}

/// Register flag: cannot be modified
pub const REGISTER_READONLY: u32 = 0x0001;
/// Register flag: instruction pointer
pub const REGISTER_IP: u32 = 0x0002;
/// Register flag: stack pointer
pub const REGISTER_SP: u32 = 0x0004;
/// Register flag: frame pointer
pub const REGISTER_FP: u32 = 0x0008;
/// Register flag: may contain an address
pub const REGISTER_ADDRESS: u32 = 0x0010;
/// Register flag: code segment
pub const REGISTER_CS: u32 = 0x0020;
/// Register flag: stack segment
pub const REGISTER_SS: u32 = 0x0040;
/// Register flag: displayed without a line feed
pub const REGISTER_NOLF: u32 = 0x0080;
/// Register flag: value is formatted by a custom format
pub const REGISTER_CUSTFMT: u32 = 0x0100;

/// Description of one register.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterInfo {
    /// Register name
    pub name: String,
    /// Combination of the `REGISTER_*` flags
    pub flags: u32,
    /// Class bit mask; a register belongs to exactly one class
    pub register_class: u32,
    /// Data type of the register value
    pub dtype: u32,
    /// Names of individual bits, for flag registers
    pub bit_strings: Vec<String>,
    /// Bits that are displayed by default
    pub default_bit_strings_mask: u32,
}

impl Encode for RegisterInfo {
    fn encode(&self, p: &mut Packer) {
        p.pack_str(&self.name)
            .pack_dd(self.flags)
            .pack_dd(self.register_class)
            .pack_dd(self.dtype)
            .pack_dd(self.bit_strings.len() as u32);
        for bit in &self.bit_strings {
            p.pack_str(bit);
        }
        p.pack_dd(self.default_bit_strings_mask);
    }
}

impl Decode for RegisterInfo {
    fn decode(u: &mut Unpacker<'_>) -> CodecResult<Self> {
        let name = u.unpack_str()?;
        let flags = u.unpack_dd()?;
        let register_class = u.unpack_dd()?;
        let dtype = u.unpack_dd()?;
        let nbits = u.unpack_count("bit string count")?;
        let bit_strings = (0..nbits).map(|_| u.unpack_str()).collect::<CodecResult<_>>()?;
        Ok(Self {
            name,
            flags,
            register_class,
            dtype,
            bit_strings,
            default_bit_strings_mask: u.unpack_dd()?,
        })
    }
}

/// Register layout of the debugged application.
///
/// The layout is not fixed per debugger: the server sends it when a process
/// is started or attached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicRegisterSet {
    /// Registers, indexed by register number
    pub registers: Vec<RegisterInfo>,
    /// Class names; class `i` has mask `1 << i`
    pub classes: Vec<String>,
}

impl DynamicRegisterSet {
    /// Number of registers.
    pub fn len(&self) -> usize {
        self.registers.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Bitmap with bit `i` set when register `i` belongs to one of the
    /// classes in `clsmask`. Bits are numbered from the least significant bit
    /// of the first byte.
    pub fn regmap(&self, clsmask: u32) -> Vec<u8> {
        let mut map = vec![0u8; self.registers.len().div_ceil(8)];
        for (i, reg) in self.registers.iter().enumerate() {
            if reg.register_class & clsmask != 0 {
                map[i / 8] |= 1 << (i % 8);
            }
        }
        map
    }

    /// Index of the first register carrying `flag`.
    pub fn find_flag(&self, flag: u32) -> Option<usize> {
        self.registers.iter().position(|r| r.flags & flag != 0)
    }

    /// Index of a register by case-insensitive name.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.registers.iter().position(|r| r.name.eq_ignore_ascii_case(name))
    }
}

/// Indexes of the set bits of a register bitmap.
pub fn regmap_indexes(map: &[u8], nregs: usize) -> impl Iterator<Item = usize> + '_ {
    (0..nregs).filter(move |&i| map.get(i / 8).is_some_and(|b| b & (1 << (i % 8)) != 0))
}

impl Encode for DynamicRegisterSet {
    fn encode(&self, p: &mut Packer) {
        p.pack(&self.registers).pack_dd(self.classes.len() as u32);
        for class in &self.classes {
            p.pack_str(class);
        }
    }
}

impl Decode for DynamicRegisterSet {
    fn decode(u: &mut Unpacker<'_>) -> CodecResult<Self> {
        let registers: Vec<RegisterInfo> = u.unpack()?;
        let nclasses = u.unpack_count("register class count")?;
        if nclasses > 32 {
            return Err(CodecError::InvalidValue {
                what: "register class count",
                value: nclasses as i64,
            });
        }
        let classes = (0..nclasses).map(|_| u.unpack_str()).collect::<CodecResult<_>>()?;
        Ok(Self { registers, classes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x86_like() -> DynamicRegisterSet {
        let reg = |name: &str, flags, class| RegisterInfo {
            name: name.into(),
            flags,
            register_class: class,
            ..Default::default()
        };
        let mut registers: Vec<RegisterInfo> = (0..8).map(|i| reg(&format!("r{i}"), 0, 1)).collect();
        registers.push(reg("rip", REGISTER_IP | REGISTER_ADDRESS, 1));
        registers.push(reg("rsp", REGISTER_SP | REGISTER_ADDRESS, 1));
        registers.push(reg("st0", 0, 2));
        registers.push(RegisterInfo {
            bit_strings: vec!["CF".into(), String::new(), "PF".into()],
            default_bit_strings_mask: 0b101,
            ..reg("efl", 0, 1)
        });
        DynamicRegisterSet { registers, classes: vec!["General".into(), "FPU".into()] }
    }

    #[test]
    fn test_regmap_selects_by_class() {
        let set = x86_like();
        let map = set.regmap(1);
        assert_eq!(map, vec![0xFF, 0b0000_1011]);
        let selected: Vec<usize> = regmap_indexes(&map, set.len()).collect();
        assert_eq!(selected, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 11]);

        let fpu: Vec<usize> = regmap_indexes(&set.regmap(2), set.len()).collect();
        assert_eq!(fpu, vec![10]);
        assert_eq!(set.find_flag(REGISTER_SP), Some(9));
        assert_eq!(set.find("RIP"), Some(8));
    }

    #[test]
    fn test_register_set_round_trip() {
        let set = x86_like();
        let mut p = Packer::new();
        p.pack(&set);
        let back: DynamicRegisterSet = Unpacker::new(p.as_bytes()).unpack().unwrap();
        assert_eq!(back, set);

        let empty = DynamicRegisterSet::default();
        let mut p = Packer::new();
        p.pack(&empty);
        assert_eq!(p.as_bytes(), &[0, 0]);
    }

    #[test]
    fn test_regvals_round_trip() {
        let values = vec![
            RegValue::Unavailable,
            RegValue::Int(0),
            RegValue::Int(u64::MAX),
            RegValue::Float(vec![0; 10]),
            RegValue::Custom { dtype: 0, data: vec![0xAA; 16] },
            RegValue::Custom { dtype: 7, data: vec![] },
        ];
        let mut p = Packer::new();
        for v in &values {
            p.pack(v);
        }
        let mut u = Unpacker::new(p.as_bytes());
        let back: Vec<RegValue> = values.iter().map(|_| u.unpack().unwrap()).collect();
        assert_eq!(back, values);
        assert!(u.is_empty());
    }
}
