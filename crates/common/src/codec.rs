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

//! Compact binary codec used by the debugger wire protocol.
//!
//! Integers are written as variable-length big-endian quantities whose first
//! byte carries the length tag, so that small values (the common case for
//! counts, thread ids and address deltas) cost a single byte on the wire.
//!
//! - [`Packer`] appends values to a growable buffer.
//! - [`Unpacker`] reads them back from a borrowed payload, validating every
//!   length against the bytes that remain.
//! - [`Encode`] / [`Decode`] describe compound protocol records built from the
//!   primitive encoders in a fixed field order.

use thiserror::Error;

/// The "no address" sentinel used throughout the protocol.
pub const BADADDR: u64 = u64::MAX;

/// Errors raised while decoding a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The payload ended before a value could be read completely.
    #[error("payload truncated: needed {needed} more byte(s) at offset {offset}, {remaining} left")]
    Truncated {
        /// Offset of the value that could not be read
        offset: usize,
        /// Number of bytes the value needs
        needed: usize,
        /// Number of bytes left in the payload
        remaining: usize,
    },
    /// A C string was not terminated before the end of the payload.
    #[error("unterminated string at offset {offset}")]
    UnterminatedString {
        /// Offset where the string starts
        offset: usize,
    },
    /// A count or length field is larger than what the payload could hold.
    #[error("declared {what} of {declared} exceeds the {remaining} remaining byte(s)")]
    LengthOverflow {
        /// Which field was inconsistent
        what: &'static str,
        /// Declared value
        declared: u64,
        /// Bytes left in the payload
        remaining: usize,
    },
    /// A field carries a value outside its closed enumeration.
    #[error("invalid {what}: {value}")]
    InvalidValue {
        /// Which field was invalid
        what: &'static str,
        /// Raw value found on the wire
        value: i64,
    },
}

/// Result alias for decoding.
pub type CodecResult<T> = Result<T, CodecError>;

/// Growable output buffer with the protocol's primitive encoders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packer {
    buf: Vec<u8>,
}

impl Packer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing buffer, appending after its current content.
    pub fn from_vec(buf: Vec<u8>) -> Self {
        Self { buf }
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Mutable access to the encoded bytes, used to patch headers in place.
    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Consume the packer and return the encoded bytes.
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    /// Append raw bytes without any length prefix.
    pub fn append(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    /// Append a single raw byte.
    pub fn pack_db(&mut self, x: u8) -> &mut Self {
        self.buf.push(x);
        self
    }

    /// Append a 16-bit value in compact form.
    pub fn pack_dw(&mut self, x: u16) -> &mut Self {
        if x <= 0x7F {
            self.buf.push(x as u8);
        } else if x <= 0x3FFF {
            self.buf.push(((x >> 8) as u8) | 0x80);
            self.buf.push(x as u8);
        } else {
            self.buf.push(0xFF);
            self.buf.extend_from_slice(&x.to_be_bytes());
        }
        self
    }

    /// Append a 32-bit value in compact form.
    pub fn pack_dd(&mut self, x: u32) -> &mut Self {
        if x <= 0x7F {
            self.buf.push(x as u8);
        } else if x <= 0x3FFF {
            self.buf.push(((x >> 8) as u8) | 0x80);
            self.buf.push(x as u8);
        } else if x <= 0x1FFF_FFFF {
            self.buf.push(((x >> 24) as u8) | 0xC0);
            self.buf.extend_from_slice(&x.to_be_bytes()[1..]);
        } else {
            self.buf.push(0xFF);
            self.buf.extend_from_slice(&x.to_be_bytes());
        }
        self
    }

    /// Append a signed 32-bit value using its two's complement bit pattern.
    pub fn pack_dd_signed(&mut self, x: i32) -> &mut Self {
        self.pack_dd(x as u32)
    }

    /// Append a 64-bit value as two compact 32-bit halves, low half first.
    pub fn pack_dq(&mut self, x: u64) -> &mut Self {
        self.pack_dd(x as u32);
        self.pack_dd((x >> 32) as u32)
    }

    /// Append an address. The value is biased by one so that [`BADADDR`]
    /// takes a single byte.
    pub fn pack_ea64(&mut self, ea: u64) -> &mut Self {
        self.pack_dq(ea.wrapping_add(1))
    }

    /// Append `ea` as a delta against `base`, then advance `base` to `ea`.
    pub fn pack_ea64_delta(&mut self, ea: u64, base: &mut u64) -> &mut Self {
        self.pack_ea64(ea.wrapping_sub(*base));
        *base = ea;
        self
    }

    /// Append a NUL-terminated string.
    pub fn pack_str(&mut self, s: &str) -> &mut Self {
        self.pack_cstr(s.as_bytes())
    }

    /// Append raw bytes followed by a NUL terminator.
    pub fn pack_cstr(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self.buf.push(0);
        self
    }

    /// Append a length-prefixed byte buffer.
    pub fn pack_buf(&mut self, bytes: &[u8]) -> &mut Self {
        self.pack_dd(bytes.len() as u32);
        self.append(bytes)
    }

    /// Append a compound value.
    pub fn pack<T: Encode + ?Sized>(&mut self, value: &T) -> &mut Self {
        value.encode(self);
        self
    }
}

/// Bounds-checked reader over a received payload.
#[derive(Debug, Clone)]
pub struct Unpacker<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Unpacker<'a> {
    /// Start reading `data` from its first byte.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not consumed yet.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Whether the whole payload has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Current read offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        if n > self.remaining() {
            return Err(CodecError::Truncated {
                offset: self.pos,
                needed: n,
                remaining: self.remaining(),
            });
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    /// Read a single raw byte.
    pub fn unpack_db(&mut self) -> CodecResult<u8> {
        Ok(self.take(1)?[0])
    }

    /// Read a compact 16-bit value.
    pub fn unpack_dw(&mut self) -> CodecResult<u16> {
        let first = self.unpack_db()?;
        if first & 0x80 == 0 {
            Ok(first as u16)
        } else if first & 0xC0 == 0x80 {
            let low = self.unpack_db()?;
            Ok((((first & 0x3F) as u16) << 8) | low as u16)
        } else {
            let b = self.take(2)?;
            Ok(u16::from_be_bytes([b[0], b[1]]))
        }
    }

    /// Read a compact 32-bit value.
    pub fn unpack_dd(&mut self) -> CodecResult<u32> {
        let first = self.unpack_db()?;
        if first & 0x80 == 0 {
            Ok(first as u32)
        } else if first & 0xC0 == 0x80 {
            let low = self.unpack_db()?;
            Ok((((first & 0x3F) as u32) << 8) | low as u32)
        } else if first & 0xE0 == 0xC0 {
            let b = self.take(3)?;
            Ok(u32::from_be_bytes([first & 0x1F, b[0], b[1], b[2]]))
        } else {
            let b = self.take(4)?;
            Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        }
    }

    /// Read a compact 32-bit value as a signed integer.
    pub fn unpack_dd_signed(&mut self) -> CodecResult<i32> {
        Ok(self.unpack_dd()? as i32)
    }

    /// Read a 64-bit value written by [`Packer::pack_dq`].
    pub fn unpack_dq(&mut self) -> CodecResult<u64> {
        let low = self.unpack_dd()? as u64;
        let high = self.unpack_dd()? as u64;
        Ok((high << 32) | low)
    }

    /// Read an address written by [`Packer::pack_ea64`].
    pub fn unpack_ea64(&mut self) -> CodecResult<u64> {
        Ok(self.unpack_dq()?.wrapping_sub(1))
    }

    /// Read a delta-encoded address and advance `base`.
    pub fn unpack_ea64_delta(&mut self, base: &mut u64) -> CodecResult<u64> {
        let ea = base.wrapping_add(self.unpack_ea64()?);
        *base = ea;
        Ok(ea)
    }

    /// Read a NUL-terminated string as raw bytes, without the terminator.
    pub fn unpack_cstr(&mut self) -> CodecResult<&'a [u8]> {
        let rest = &self.data[self.pos..];
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(CodecError::UnterminatedString { offset: self.pos })?;
        let bytes = &rest[..len];
        self.pos += len + 1;
        Ok(bytes)
    }

    /// Read a NUL-terminated string. Invalid UTF-8 is replaced, not rejected.
    pub fn unpack_str(&mut self) -> CodecResult<String> {
        Ok(String::from_utf8_lossy(self.unpack_cstr()?).into_owned())
    }

    /// Read the optional error text that trails a failure reply.
    ///
    /// Servers omit it when they have nothing to say, so an exhausted payload
    /// yields an empty string.
    pub fn unpack_trailing_str(&mut self) -> CodecResult<String> {
        if self.is_empty() {
            return Ok(String::new());
        }
        self.unpack_str()
    }

    /// Read exactly `n` raw bytes.
    pub fn unpack_bytes(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        self.take(n)
    }

    /// Read a length-prefixed byte buffer.
    pub fn unpack_buf(&mut self) -> CodecResult<&'a [u8]> {
        let len = self.unpack_dd()? as usize;
        self.take(len)
    }

    /// Read an element count, rejecting counts that could not possibly fit in
    /// the rest of the payload (each element takes at least one byte).
    pub fn unpack_count(&mut self, what: &'static str) -> CodecResult<usize> {
        let n = self.unpack_dd()?;
        if n as usize > self.remaining() {
            return Err(CodecError::LengthOverflow {
                what,
                declared: n as u64,
                remaining: self.remaining(),
            });
        }
        Ok(n as usize)
    }

    /// Read a compound value.
    pub fn unpack<T: Decode>(&mut self) -> CodecResult<T> {
        T::decode(self)
    }

    /// The bytes not consumed yet.
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}

/// A protocol record with a fixed wire layout.
pub trait Encode {
    /// Append the record to `p`.
    fn encode(&self, p: &mut Packer);
}

/// A protocol record that can be read back from a payload.
pub trait Decode: Sized {
    /// Read one record from `u`.
    fn decode(u: &mut Unpacker<'_>) -> CodecResult<Self>;
}

impl<T: Encode> Encode for [T] {
    fn encode(&self, p: &mut Packer) {
        p.pack_dd(self.len() as u32);
        for item in self {
            item.encode(p);
        }
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(&self, p: &mut Packer) {
        self.as_slice().encode(p);
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(u: &mut Unpacker<'_>) -> CodecResult<Self> {
        let n = u.unpack_count("element count")?;
        (0..n).map(|_| T::decode(u)).collect()
    }
}
