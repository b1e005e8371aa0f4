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

//! Calls into the debuggee, call stacks and miscellaneous requests.

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use dbgrpc_common::{
    types::{pack_appcall, unpack_regobjs, AppcallRequest, CallStackEntry, Drc, RegObj, APPCALL_DEBEV},
    BADADDR,
};

use super::RpcDebmod;
use crate::{
    error::{DebmodError, DebmodResult},
    rpc::{
        client::{read_drc, IoctlReply},
        packet::{PacketWriter, RpcCode},
    },
};

/// Result of a successful appcall.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppcallOutcome {
    /// Stack pointer after the call
    pub sp: u64,
    /// Return registers with their values; empty for manual calls
    pub retregs: Vec<RegObj>,
}

impl<S> RpcDebmod<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Call stack of `tid` as computed by the server, `None` when the server
    /// leaves stack tracing to the client.
    pub async fn update_call_stack(&mut self, tid: i32) -> DebmodResult<Option<Vec<CallStackEntry>>> {
        let client = self.session()?;
        let mut req = PacketWriter::new(RpcCode::UPDATE_CALL_STACK);
        req.pack_dd_signed(tid);
        let reply = client.send_request(req).await?;
        let mut u = reply.reader();
        match read_drc(&mut u).map_err(|e| self.violation(e))? {
            Drc::Ok => Ok(Some(u.unpack().map_err(|e| self.violation(e))?)),
            drc if drc.is_failure() => Err(DebmodError::remote(drc, String::new())),
            _ => Ok(None),
        }
    }

    /// Call a function in the debuggee.
    pub async fn appcall(&mut self, request: &AppcallRequest) -> DebmodResult<AppcallOutcome> {
        let client = self.session()?;
        let mut req = PacketWriter::new(RpcCode::APPCALL);
        pack_appcall(&mut req, request);
        debug!(func = format_args!("{:#x}", request.func_ea), tid = request.tid, "appcall");
        let reply = client.send_request(req).await?;

        let mut u = reply.reader();
        let sp = u.unpack_ea64().map_err(|e| self.violation(e))?;
        if sp == BADADDR {
            let event = if request.flags & APPCALL_DEBEV != 0 {
                Some(Box::new(u.unpack().map_err(|e| self.violation(e))?))
            } else {
                None
            };
            let message = u.unpack_trailing_str().map_err(|e| self.violation(e))?;
            return Err(DebmodError::Appcall { message, event });
        }

        let retregs = if request.is_manual() {
            Vec::new()
        } else {
            unpack_regobjs(&mut u, true).map_err(|e| self.violation(e))?
        };
        Ok(AppcallOutcome { sp, retregs })
    }

    /// Clean up after a manual appcall on `tid`.
    pub async fn cleanup_appcall(&mut self, tid: i32) -> DebmodResult<Drc> {
        let mut req = PacketWriter::new(RpcCode::CLEANUP_APPCALL);
        req.pack_dd_signed(tid);
        self.get_drc(req).await
    }

    /// Run a command on the server host. Returns its exit code.
    pub async fn rexec(&mut self, cmdline: &str) -> DebmodResult<i32> {
        let client = self.session()?;
        let mut req = PacketWriter::new(RpcCode::REXEC);
        req.pack_str(cmdline);
        Ok(client.send_request_get_long_result(req).await?)
    }

    /// Run a server-specific ioctl.
    pub async fn send_ioctl(&mut self, fn_id: i32, input: &[u8]) -> DebmodResult<IoctlReply> {
        Ok(self.session()?.send_ioctl(fn_id, input).await?)
    }
}

#[cfg(test)]
mod tests {
    use dbgrpc_common::types::{pack_regobjs, DebugEvent, EventId, RelObj, APPCALL_MANUAL};

    use super::*;
    use crate::debmod::tests::session;

    fn request(flags: u32) -> AppcallRequest {
        AppcallRequest {
            func_ea: 0x401000,
            tid: 2,
            flags,
            regargs: vec![RegObj { regidx: 0, value: vec![1, 0, 0, 0], relocate: 0 }],
            stkargs: RelObj::default(),
            retregs: vec![RegObj { regidx: 0, value: vec![0; 8], relocate: 0 }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_appcall_returns_registers() {
        let (mut debmod, mut server) = session().await;
        let task = tokio::spawn(async move {
            server.recv_packet().await.unwrap();
            let mut reply = PacketWriter::new(RpcCode::OK);
            reply.pack_ea64(0x7ffe_0000);
            pack_regobjs(&mut reply, &[RegObj { regidx: 0, value: vec![9; 8], relocate: 0 }], true);
            server.send_packet(reply).await.unwrap();
            server
        });
        let outcome = debmod.appcall(&request(0)).await.unwrap();
        let _server = task.await.unwrap();
        assert_eq!(outcome.sp, 0x7ffe_0000);
        assert_eq!(outcome.retregs[0].value, vec![9; 8]);
    }

    #[tokio::test]
    async fn test_appcall_failure_carries_event() {
        let (mut debmod, mut server) = session().await;
        let event = DebugEvent::new(EventId::EXCEPTION, 1, 2, 0x401005);
        let pushed = event.clone();
        let task = tokio::spawn(async move {
            server.recv_packet().await.unwrap();
            let mut reply = PacketWriter::new(RpcCode::OK);
            reply.pack_ea64(BADADDR).pack(&pushed).pack_str("access violation");
            server.send_packet(reply).await.unwrap();
            server
        });
        let err = debmod.appcall(&request(APPCALL_DEBEV | APPCALL_MANUAL)).await.unwrap_err();
        let _server = task.await.unwrap();
        match err {
            DebmodError::Appcall { message, event: Some(got) } => {
                assert_eq!(message, "access violation");
                assert_eq!(got.eid, event.eid);
                assert_eq!(got.ea, 0x401005);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_rexec_result() {
        let (mut debmod, mut server) = session().await;
        let task = tokio::spawn(async move {
            let req = server.recv_packet().await.unwrap();
            assert_eq!(req.reader().unpack_str().unwrap(), "uname -a");
            let mut reply = PacketWriter::new(RpcCode::OK);
            reply.pack_dd(0);
            server.send_packet(reply).await.unwrap();
            server
        });
        assert_eq!(debmod.rexec("uname -a").await.unwrap(), 0);
        let _server = task.await.unwrap();
    }
}
