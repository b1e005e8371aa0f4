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

//! Register access.

use tokio::io::{AsyncRead, AsyncWrite};

use dbgrpc_common::types::{regmap_indexes, Drc, RegValue};

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
    /// Read the registers of `tid` that belong to the classes in `clsmask`.
    ///
    /// The result has one slot per register of the session's register set;
    /// registers outside `clsmask` are `None`.
    pub async fn read_registers(
        &mut self,
        tid: i32,
        clsmask: u32,
    ) -> DebmodResult<Vec<Option<RegValue>>> {
        let regs = self.idaregs.as_ref().ok_or(DebmodError::NoRegisterSet)?;
        let nregs = regs.len();
        let regmap = regs.regmap(clsmask);

        let mut req = PacketWriter::new(RpcCode::READ_REGS);
        req.pack_dd_signed(tid).pack_dd(clsmask).pack_dd(nregs as u32).append(&regmap);

        let client = self.session()?;
        let reply = client.send_request(req).await?;
        let mut u = reply.reader();
        let drc = read_drc(&mut u).map_err(|e| self.violation(e))?;
        if drc != Drc::Ok {
            let message = u.unpack_trailing_str().map_err(|e| self.violation(e))?;
            return Err(DebmodError::remote(drc, message));
        }

        let mut values = vec![None; nregs];
        for idx in regmap_indexes(&regmap, nregs) {
            values[idx] = Some(u.unpack::<RegValue>().map_err(|e| self.violation(e))?);
        }
        Ok(values)
    }

    /// Write register `idx` of `tid`.
    pub async fn write_register(&mut self, tid: i32, idx: u32, value: &RegValue) -> DebmodResult<Drc> {
        let mut req = PacketWriter::new(RpcCode::WRITE_REG);
        req.pack_dd_signed(tid).pack_dd(idx).pack(value);
        self.get_drc(req).await
    }

    /// Base address of the segment selected by `sreg_value` in `tid`.
    pub async fn thread_get_sreg_base(&mut self, tid: i32, sreg_value: u32) -> DebmodResult<u64> {
        let client = self.session()?;
        let mut req = PacketWriter::new(RpcCode::GET_SREG_BASE);
        req.pack_dd_signed(tid).pack_dd(sreg_value);
        let reply = client.send_request(req).await?;
        let mut u = reply.reader();
        match read_drc(&mut u).map_err(|e| self.violation(e))? {
            Drc::Ok => u.unpack_ea64().map_err(|e| self.violation(e)),
            drc => {
                let message = u.unpack_trailing_str().map_err(|e| self.violation(e))?;
                Err(DebmodError::remote(drc, message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use dbgrpc_common::types::{DynamicRegisterSet, RegisterInfo};

    use super::*;
    use crate::debmod::tests::session;

    fn registers() -> DynamicRegisterSet {
        let reg = |name: &str, class| RegisterInfo {
            name: name.into(),
            register_class: class,
            ..Default::default()
        };
        DynamicRegisterSet {
            registers: vec![reg("rax", 1), reg("st0", 2), reg("rip", 1)],
            classes: vec!["general".into(), "fpu".into()],
        }
    }

    #[tokio::test]
    async fn test_read_registers_fills_selected_slots() {
        let (mut debmod, mut server) = session().await;
        debmod.idaregs = Some(registers());
        let task = tokio::spawn(async move {
            let req = server.recv_packet().await.unwrap();
            let mut u = req.reader();
            assert_eq!(u.unpack_dd().unwrap(), 5);
            assert_eq!(u.unpack_dd().unwrap(), 1);
            assert_eq!(u.unpack_dd().unwrap(), 3);
            assert_eq!(u.rest(), &[0b101]);

            let mut reply = PacketWriter::new(RpcCode::OK);
            reply.pack_dd(1).pack(&RegValue::Int(7)).pack(&RegValue::Int(0x401000));
            server.send_packet(reply).await.unwrap();
            server
        });
        let values = debmod.read_registers(5, 1).await.unwrap();
        let _server = task.await.unwrap();
        assert_eq!(values, vec![Some(RegValue::Int(7)), None, Some(RegValue::Int(0x401000))]);
    }

    #[tokio::test]
    async fn test_registers_need_a_layout() {
        let (mut debmod, _server) = session().await;
        assert!(matches!(
            debmod.read_registers(1, 1).await.unwrap_err(),
            DebmodError::NoRegisterSet
        ));
    }
}
