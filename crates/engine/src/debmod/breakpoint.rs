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

//! Breakpoints, low-level conditions and exception setup.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use dbgrpc_common::types::{
    pack_bpt_update, pack_lowcnds, BptCode, BptType, Drc, ExceptionInfo, LowCondition,
    UpdateBptInfo,
};

use super::RpcDebmod;
use crate::{
    error::{DebmodError, DebmodResult},
    rpc::{
        client::read_drc,
        packet::{PacketWriter, RpcCode},
    },
};

impl<S> RpcDebmod<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Ask whether a breakpoint of `bpt_type` and `len` bytes can be set at `ea`.
    pub async fn is_ok_bpt(&mut self, bpt_type: BptType, ea: u64, len: i32) -> DebmodResult<BptCode> {
        let client = self.session()?;
        let mut req = PacketWriter::new(RpcCode::ISOK_BPT);
        req.pack_dd(bpt_type.0).pack_ea64(ea).pack_dd_signed(len + 1);
        let code = client.send_request_get_long_result(req).await?;
        BptCode::from_raw(code.into()).map_err(|e| self.violation(e))
    }

    /// Add and remove breakpoints in one round trip.
    ///
    /// The first `nadd` entries of `bpts` are additions and the next `ndel`
    /// deletions. Additions whose code is not [`BptCode::Ok`] are skipped.
    /// The codes reported by the server, and the original bytes of new
    /// software breakpoints, are written back into `bpts`. Returns the number
    /// of breakpoints the server updated.
    pub async fn update_bpts(
        &mut self,
        bpts: &mut [UpdateBptInfo],
        nadd: usize,
        ndel: usize,
    ) -> DebmodResult<usize> {
        if bpts.len() < nadd + ndel {
            return Err(DebmodError::InvalidBatch { len: bpts.len(), nadd, ndel });
        }
        let (adds, rest) = bpts.split_at_mut(nadd);
        let dels = &mut rest[..ndel];

        let sent: Vec<&UpdateBptInfo> = adds.iter().filter(|b| b.code == BptCode::Ok).collect();
        if sent.is_empty() && dels.is_empty() {
            return Ok(0);
        }
        debug!(adds = sent.len(), dels = dels.len(), "updating breakpoints");

        let mut req = PacketWriter::new(RpcCode::UPDATE_BPTS);
        pack_bpt_update(&mut req, &sent, dels);
        drop(sent);

        let client = self.session()?;
        let reply = client.send_request(req).await?;
        let mut u = reply.reader();
        let drc = read_drc(&mut u).map_err(|e| self.violation(e))?;
        let nbpts = u.unpack_dd().map_err(|e| self.violation(e))? as usize;

        for b in adds.iter_mut().filter(|b| b.code == BptCode::Ok) {
            let raw = u.unpack_db().map_err(|e| self.violation(e))?;
            b.code = BptCode::from_raw(raw.into()).map_err(|e| self.violation(e))?;
            if b.code == BptCode::Ok && b.bpt_type.is_soft() {
                let len = u.unpack_db().map_err(|e| self.violation(e))? as usize;
                b.orgbytes = u.unpack_bytes(len).map_err(|e| self.violation(e))?.to_vec();
            }
        }
        for b in dels.iter_mut() {
            let raw = u.unpack_db().map_err(|e| self.violation(e))?;
            b.code = BptCode::from_raw(raw.into()).map_err(|e| self.violation(e))?;
        }

        if drc != Drc::Ok {
            let message = u.unpack_trailing_str().map_err(|e| self.violation(e))?;
            if drc.is_failure() {
                return Err(DebmodError::remote(drc, message));
            }
        }
        Ok(nbpts)
    }

    /// Install or remove conditions evaluated by the server. Returns the
    /// number of conditions updated.
    pub async fn update_lowcnds(&mut self, conditions: &[LowCondition]) -> DebmodResult<usize> {
        let client = self.session()?;
        let mut req = PacketWriter::new(RpcCode::UPDATE_LOWCNDS);
        pack_lowcnds(&mut req, conditions);
        let reply = client.send_request(req).await?;
        let mut u = reply.reader();
        let drc = read_drc(&mut u).map_err(|e| self.violation(e))?;
        let nupdated = u.unpack_dd().map_err(|e| self.violation(e))? as usize;
        if drc.is_failure() {
            let message = u.unpack_trailing_str().map_err(|e| self.violation(e))?;
            return Err(DebmodError::remote(drc, message));
        }
        Ok(nupdated)
    }

    /// Evaluate the condition attached to the breakpoint at `ea`.
    pub async fn eval_lowcnd(&mut self, tid: i32, ea: u64) -> DebmodResult<Drc> {
        let mut req = PacketWriter::new(RpcCode::EVAL_LOWCND);
        req.pack_dd_signed(tid).pack_ea64(ea);
        self.get_drc(req).await
    }

    /// Replace the server's exception handling table.
    pub async fn set_exception_info(&mut self, table: &[ExceptionInfo]) -> DebmodResult<()> {
        let client = self.session()?;
        let mut req = PacketWriter::new(RpcCode::SET_EXCEPTION_INFO);
        req.pack(table);
        client.send_request(req).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use dbgrpc_common::types::unpack_bpt_update;

    use super::*;
    use crate::debmod::tests::session;

    #[tokio::test]
    async fn test_nothing_to_update_sends_nothing() {
        let (mut debmod, _server) = session().await;
        let mut bpts = vec![UpdateBptInfo { code: BptCode::BadAddr, ..UpdateBptInfo::soft(0x10, 1) }];
        assert_eq!(debmod.update_bpts(&mut bpts, 1, 0).await.unwrap(), 0);
        assert_eq!(bpts[0].code, BptCode::BadAddr);
    }

    #[tokio::test]
    async fn test_codes_and_orgbytes_are_written_back() {
        let (mut debmod, mut server) = session().await;
        let task = tokio::spawn(async move {
            let req = server.recv_packet().await.unwrap();
            let (adds, dels) = unpack_bpt_update(&mut req.reader()).unwrap();
            assert_eq!(adds.iter().map(|b| b.ea).collect::<Vec<_>>(), vec![0x401000, 0x401020]);
            assert_eq!(dels.len(), 1);
            assert_eq!(dels[0].orgbytes, vec![0x55]);

            let mut reply = PacketWriter::new(RpcCode::OK);
            reply.pack_dd(1).pack_dd(3);
            reply.pack_db(BptCode::Ok as u8).pack_db(1).append(&[0x48]);
            reply.pack_db(BptCode::TooMany as u8);
            reply.pack_db(BptCode::Ok as u8);
            server.send_packet(reply).await.unwrap();
            server
        });

        let hw = UpdateBptInfo {
            ea: 0x401020,
            bpt_type: BptType::WRITE,
            size: 4,
            pid: 1,
            ..Default::default()
        };
        let mut bpts = vec![
            UpdateBptInfo::soft(0x401000, 1),
            UpdateBptInfo { code: BptCode::BadAlign, ..UpdateBptInfo::soft(0x401003, 1) },
            hw,
            UpdateBptInfo { orgbytes: vec![0x55], ..UpdateBptInfo::soft(0x400000, 1) },
        ];
        assert_eq!(debmod.update_bpts(&mut bpts, 3, 1).await.unwrap(), 3);
        let _server = task.await.unwrap();

        assert_eq!(bpts[0].code, BptCode::Ok);
        assert_eq!(bpts[0].orgbytes, vec![0x48]);
        assert_eq!(bpts[1].code, BptCode::BadAlign);
        assert_eq!(bpts[2].code, BptCode::TooMany);
        assert_eq!(bpts[3].code, BptCode::Ok);
    }

    #[tokio::test]
    async fn test_short_batch_is_rejected() {
        let (mut debmod, _server) = session().await;
        let mut bpts = vec![UpdateBptInfo::soft(0x10, 1)];
        let err = debmod.update_bpts(&mut bpts, 1, 1).await.unwrap_err();
        assert!(matches!(err, DebmodError::InvalidBatch { len: 1, nadd: 1, ndel: 1 }));
    }

    #[tokio::test]
    async fn test_is_ok_bpt_sends_len_plus_one() {
        let (mut debmod, mut server) = session().await;
        let task = tokio::spawn(async move {
            let req = server.recv_packet().await.unwrap();
            let mut u = req.reader();
            assert_eq!(u.unpack_dd().unwrap(), BptType::EXEC.0);
            assert_eq!(u.unpack_ea64().unwrap(), 0x1000);
            assert_eq!(u.unpack_dd().unwrap(), 2);
            let mut reply = PacketWriter::new(RpcCode::OK);
            reply.pack_dd(BptCode::BadLen as u32);
            server.send_packet(reply).await.unwrap();
            server
        });
        assert_eq!(debmod.is_ok_bpt(BptType::EXEC, 0x1000, 1).await.unwrap(), BptCode::BadLen);
        let _server = task.await.unwrap();
    }
}
