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

//! Memory map, memory access, remote files and searches.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace};

use dbgrpc_common::{
    types::{CompiledBinPattern, Drc, MemoryInfo, ScatteredSegment},
    BADADDR,
};

use super::RpcDebmod;
use crate::{
    error::{DebmodError, DebmodResult, ProtocolViolation},
    rpc::{
        client::read_drc,
        packet::{PacketWriter, RpcCode},
    },
};

/// What the server knows about the debuggee's address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryLayout {
    /// The server enumerated the memory areas
    Areas(Vec<MemoryInfo>),
    /// The server cannot enumerate memory; the database segmentation applies
    UseDatabaseSegments,
    /// No memory information is available right now
    Unavailable,
}

/// A file opened on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteFile {
    /// Server-side handle
    pub fd: i32,
    /// File size at open time
    pub size: u64,
}

impl<S> RpcDebmod<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Fetch the memory map of the debuggee.
    pub async fn get_memory_info(&mut self) -> DebmodResult<MemoryLayout> {
        let client = self.session()?;
        let reply = client.send_request(PacketWriter::new(RpcCode::GET_MEMORY_INFO)).await?;
        let mut u = reply.reader();
        // The status travels biased by IDBSEG so that it fits an unsigned value.
        let biased = u.unpack_dd().map_err(|e| self.violation(e))? as i32;
        let raw = biased.wrapping_add(Drc::IdbSeg.raw());
        let drc = Drc::from_raw(raw).map_err(|e| self.violation(e))?;
        if drc.raw() > Drc::None.raw() {
            let areas: Vec<MemoryInfo> = u.unpack().map_err(|e| self.violation(e))?;
            trace!(count = areas.len(), "memory map received");
            return Ok(MemoryLayout::Areas(areas));
        }
        match drc {
            Drc::IdbSeg => Ok(MemoryLayout::UseDatabaseSegments),
            Drc::None => Ok(MemoryLayout::Unavailable),
            drc => {
                let message = u.unpack_trailing_str().map_err(|e| self.violation(e))?;
                Err(DebmodError::remote(drc, message))
            }
        }
    }

    /// Read debuggee memory at `ea` into `buf`. Returns the number of bytes
    /// read, which may be less than requested.
    pub async fn read_memory(&mut self, ea: u64, buf: &mut [u8]) -> DebmodResult<usize> {
        let client = self.session()?;
        let mut req = PacketWriter::new(RpcCode::READ_MEMORY);
        req.pack_ea64(ea).pack_dd(buf.len() as u32);
        let reply = client.send_request(req).await?;
        let mut u = reply.reader();
        let result = u.unpack_dd_signed().map_err(|e| self.violation(e))?;
        if result <= 0 {
            let message = u.unpack_trailing_str().map_err(|e| self.violation(e))?;
            debug!(ea = format_args!("{ea:#x}"), %message, "memory read failed");
            return Err(DebmodError::remote(Drc::Failed, message));
        }

        let n = result as usize;
        if n > buf.len() {
            let violation = ProtocolViolation::OversizedReply { returned: n, requested: buf.len() };
            return Err(self.violation(violation));
        }
        buf[..n].copy_from_slice(u.unpack_bytes(n).map_err(|e| self.violation(e))?);
        Ok(n)
    }

    /// Write `bytes` at `ea`. Returns the number of bytes written.
    pub async fn write_memory(&mut self, ea: u64, bytes: &[u8]) -> DebmodResult<usize> {
        let client = self.session()?;
        let mut req = PacketWriter::new(RpcCode::WRITE_MEMORY);
        req.pack_ea64(ea).pack_buf(bytes);
        let reply = client.send_request(req).await?;
        let mut u = reply.reader();
        let result = u.unpack_dd_signed().map_err(|e| self.violation(e))?;
        if result <= 0 {
            let message = u.unpack_trailing_str().map_err(|e| self.violation(e))?;
            return Err(DebmodError::remote(Drc::Failed, message));
        }
        Ok(result as usize)
    }

    /// Segments of an image that is not mapped contiguously, `None` when the
    /// image at `base` is contiguous.
    pub async fn get_scattered_image(
        &mut self,
        base: u64,
    ) -> DebmodResult<Option<Vec<ScatteredSegment>>> {
        let client = self.session()?;
        let mut req = PacketWriter::new(RpcCode::GET_SCATTERED_IMAGE);
        req.pack_ea64(base);
        let reply = client.send_request(req).await?;
        let mut u = reply.reader();
        let result = (u.unpack_dd().map_err(|e| self.violation(e))? as i32).wrapping_sub(2);
        match result {
            r if r > 0 => Ok(Some(u.unpack().map_err(|e| self.violation(e))?)),
            0 => Ok(None),
            _ => Err(DebmodError::remote(Drc::Failed, "cannot inspect the image")),
        }
    }

    /// UUID of the image loaded at `base`.
    pub async fn get_image_uuid(&mut self, base: u64) -> DebmodResult<Option<Vec<u8>>> {
        let client = self.session()?;
        let mut req = PacketWriter::new(RpcCode::GET_IMAGE_UUID);
        req.pack_ea64(base);
        let reply = client.send_request(req).await?;
        let mut u = reply.reader();
        if u.unpack_dd().map_err(|e| self.violation(e))? == 0 {
            return Ok(None);
        }
        Ok(Some(u.unpack_buf().map_err(|e| self.violation(e))?.to_vec()))
    }

    /// Start of the segment named `name` in the image at `base`.
    pub async fn get_segm_start(&mut self, base: u64, name: &str) -> DebmodResult<Option<u64>> {
        let client = self.session()?;
        let mut req = PacketWriter::new(RpcCode::GET_SEGM_START);
        req.pack_ea64(base).pack_str(name);
        let reply = client.send_request(req).await?;
        let ea = reply.reader().unpack_ea64().map_err(|e| self.violation(e))?;
        Ok((ea != BADADDR).then_some(ea))
    }

    /// Search `[start, end)` for any of `patterns`. Returns the first match.
    pub async fn bin_search(
        &mut self,
        start: u64,
        end: u64,
        patterns: &[CompiledBinPattern],
        flags: u32,
    ) -> DebmodResult<Option<u64>> {
        let client = self.session()?;
        let mut req = PacketWriter::new(RpcCode::BIN_SEARCH);
        req.pack_ea64(start).pack_ea64(end).pack(patterns).pack_dd(flags);
        let reply = client.send_request(req).await?;
        let mut u = reply.reader();
        match read_drc(&mut u).map_err(|e| self.violation(e))? {
            Drc::Ok => Ok(Some(u.unpack_ea64().map_err(|e| self.violation(e))?)),
            Drc::Failed => Ok(None),
            drc => {
                let message = u.unpack_trailing_str().map_err(|e| self.violation(e))?;
                if drc.is_failure() {
                    Err(DebmodError::remote(drc, message))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Open a file on the server.
    pub async fn open_file(&mut self, path: &str, readonly: bool) -> DebmodResult<RemoteFile> {
        let client = self.session()?;
        let mut req = PacketWriter::new(RpcCode::OPEN_FILE);
        req.pack_str(path).pack_dd(readonly as u32);
        let reply = client.send_request(req).await?;
        let mut u = reply.reader();
        let fd = u.unpack_dd_signed().map_err(|e| self.violation(e))?;
        if fd == -1 {
            let errno = u.unpack_dd_signed().map_err(|e| self.violation(e))?;
            return Err(DebmodError::RemoteIo { errno });
        }
        let size = u.unpack_dq().map_err(|e| self.violation(e))?;
        debug!(path, fd, size, "opened remote file");
        Ok(RemoteFile { fd, size })
    }

    /// Close a file opened with [`open_file`](Self::open_file).
    pub async fn close_file(&mut self, fd: i32) -> DebmodResult<()> {
        let client = self.session()?;
        let mut req = PacketWriter::new(RpcCode::CLOSE_FILE);
        req.pack_dd_signed(fd);
        client.send_request(req).await?;
        Ok(())
    }

    /// Read from a remote file at `offset`. Returns the number of bytes read.
    pub async fn read_file(&mut self, fd: i32, offset: u64, buf: &mut [u8]) -> DebmodResult<usize> {
        let client = self.session()?;
        let mut req = PacketWriter::new(RpcCode::READ_FILE);
        req.pack_dd_signed(fd).pack_dq(offset).pack_dd(buf.len() as u32);
        let reply = client.send_request(req).await?;
        let mut u = reply.reader();
        let rsize = u.unpack_dd_signed().map_err(|e| self.violation(e))?;
        let errno = if rsize as usize != buf.len() {
            u.unpack_dd_signed().map_err(|e| self.violation(e))?
        } else {
            0
        };
        if rsize < 0 {
            return Err(DebmodError::RemoteIo { errno });
        }

        let n = rsize as usize;
        if n > buf.len() {
            let violation = ProtocolViolation::OversizedReply { returned: n, requested: buf.len() };
            return Err(self.violation(violation));
        }
        buf[..n].copy_from_slice(u.unpack_bytes(n).map_err(|e| self.violation(e))?);
        Ok(n)
    }

    /// Write to a remote file at `offset`. Returns the number of bytes written.
    pub async fn write_file(&mut self, fd: i32, offset: u64, bytes: &[u8]) -> DebmodResult<usize> {
        let client = self.session()?;
        let mut req = PacketWriter::new(RpcCode::WRITE_FILE);
        req.pack_dd_signed(fd).pack_dq(offset).pack_buf(bytes);
        let reply = client.send_request(req).await?;
        let mut u = reply.reader();
        let size = u.unpack_dd_signed().map_err(|e| self.violation(e))?;
        if size as usize == bytes.len() {
            return Ok(size as usize);
        }
        let errno = u.unpack_dd_signed().map_err(|e| self.violation(e))?;
        if size < 0 {
            return Err(DebmodError::RemoteIo { errno });
        }
        Ok(size as usize)
    }
}
