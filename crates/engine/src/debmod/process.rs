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

//! Process lifecycle, threads and debug events.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace};

use dbgrpc_common::types::{
    DebugEvent, Drc, DynamicRegisterSet, GetEventCode, ProcessInfo, ResumeMode, ThreadName,
};

use super::RpcDebmod;
use crate::{
    error::{DebmodError, DebmodResult},
    rpc::{
        client::read_drc,
        packet::{PacketWriter, RpcCode},
    },
};

/// Environment passed to a new process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchEnv {
    /// Merge `vars` into the server's environment instead of replacing it
    pub merge: bool,
    /// `NAME=value` entries
    pub vars: Vec<String>,
}

/// Parameters of a process start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartProcessRequest {
    /// Executable path on the server
    pub path: String,
    /// Command line arguments
    pub args: String,
    /// Working directory
    pub startdir: String,
    /// Launch flags
    pub flags: u32,
    /// Path of the input file as known to the client
    pub input_path: String,
    /// CRC32 of the input file, zero to skip the check
    pub input_crc32: u32,
    /// Environment, `None` to inherit the server's
    pub env: Option<LaunchEnv>,
}

impl<S> RpcDebmod<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// List the processes the server can attach to.
    pub async fn get_processes(&mut self) -> DebmodResult<Vec<ProcessInfo>> {
        let client = self.session()?;
        let reply = client.send_request(PacketWriter::new(RpcCode::GET_PROCESSES)).await?;
        let mut u = reply.reader();
        match read_drc(&mut u).map_err(|e| self.violation(e))? {
            Drc::Ok => u.unpack().map_err(|e| self.violation(e)),
            drc => {
                let message = u.unpack_trailing_str().map_err(|e| self.violation(e))?;
                if drc.is_failure() {
                    Err(DebmodError::remote(drc, message))
                } else {
                    Ok(Vec::new())
                }
            }
        }
    }

    /// Start a process on the server.
    pub async fn start_process(&mut self, request: &StartProcessRequest) -> DebmodResult<Drc> {
        let mut req = PacketWriter::new(RpcCode::START_PROCESS);
        req.pack_str(&request.path)
            .pack_str(&request.args)
            .pack_str(&request.startdir)
            .pack_dd(request.flags)
            .pack_str(&request.input_path)
            .pack_dd(request.input_crc32);
        match &request.env {
            Some(env) => {
                req.pack_db(env.merge as u8).pack_dd(env.vars.len() as u32);
                for var in &env.vars {
                    req.pack_str(var);
                }
            }
            None => {
                req.pack_db(1).pack_dd(0);
            }
        }
        debug!(path = %request.path, "starting process");
        self.process_start_or_attach(req).await
    }

    /// Attach to a running process.
    pub async fn attach_process(&mut self, pid: i32, event_id: i32, flags: u32) -> DebmodResult<Drc> {
        let mut req = PacketWriter::new(RpcCode::ATTACH_PROCESS);
        req.pack_dd_signed(pid).pack_dd_signed(event_id).pack_dd(flags);
        debug!(pid, "attaching to process");
        self.process_start_or_attach(req).await
    }

    async fn process_start_or_attach(&mut self, req: PacketWriter) -> DebmodResult<Drc> {
        let client = self.session()?;
        let reply = client.send_request(req).await?;
        let mut u = reply.reader();
        let drc = read_drc(&mut u).map_err(|e| self.violation(e))?;
        if drc.raw() > Drc::None.raw() {
            self.debapp_attrs = u.unpack().map_err(|e| self.violation(e))?;
            let regs: DynamicRegisterSet = u.unpack().map_err(|e| self.violation(e))?;
            debug!(
                platform = %self.debapp_attrs.platform,
                addrsize = self.debapp_attrs.addrsize,
                nregs = regs.len(),
                "process is running"
            );
            self.idaregs = Some(regs);
            return Ok(drc);
        }
        let message = u.unpack_trailing_str().map_err(|e| self.violation(e))?;
        if drc.is_failure() {
            return Err(DebmodError::remote(drc, message));
        }
        Ok(drc)
    }

    /// Detach from the debugged process.
    pub async fn detach_process(&mut self) -> DebmodResult<Drc> {
        self.get_drc(PacketWriter::new(RpcCode::DETACH_PROCESS)).await
    }

    /// Ask the server to suspend the process soon.
    pub async fn prepare_to_pause_process(&mut self) -> DebmodResult<Drc> {
        self.get_drc(PacketWriter::new(RpcCode::PREPARE_TO_PAUSE_PROCESS)).await
    }

    /// Kill the debugged process.
    pub async fn exit_process(&mut self) -> DebmodResult<Drc> {
        self.get_drc(PacketWriter::new(RpcCode::EXIT_PROCESS)).await
    }

    /// Fetch the next debug event, waiting up to `timeout_ms`.
    ///
    /// The first call asks the server directly. Once the server reports that
    /// nothing is pending, events are expected to be pushed and later calls
    /// wait for the stream to become readable instead.
    pub async fn get_debug_event(&mut self, timeout_ms: u32) -> DebmodResult<Option<DebugEvent>> {
        let polling = self.poll_debug_events;
        let client = self.session()?;

        if let Some(event) = client.interrupts_mut().take_pending_event() {
            trace!(eid = %event.eid, "returning pending event");
            self.poll_debug_events = false;
            return Ok(Some(event));
        }

        if polling {
            if !client.poll_ready(Duration::from_millis(timeout_ms.into())).await? {
                return Ok(None);
            }
            client.service_one_interrupt().await?;
            let event = client.interrupts_mut().take_pending_event();
            if event.is_some() {
                self.poll_debug_events = false;
            }
            return Ok(event);
        }

        let mut req = PacketWriter::new(RpcCode::GET_DEBUG_EVENT);
        req.pack_dd(timeout_ms);
        let reply = client.send_request(req).await?;
        let mut u = reply.reader();
        let code = GetEventCode::from_raw(u.unpack_dd_signed().map_err(|e| self.violation(e))?)
            .map_err(|e| self.violation(e))?;
        match code {
            GetEventCode::OneEvent | GetEventCode::ManyEvents => {
                Ok(Some(u.unpack().map_err(|e| self.violation(e))?))
            }
            GetEventCode::NoEvent => {
                trace!("no event pending, switching to polling");
                self.poll_debug_events = true;
                Ok(None)
            }
            GetEventCode::Error => {
                Err(DebmodError::remote(Drc::Failed, "the server failed to fetch a debug event"))
            }
        }
    }

    /// Resume after `event` was processed.
    pub async fn continue_after_event(&mut self, event: &DebugEvent) -> DebmodResult<Drc> {
        let mut req = PacketWriter::new(RpcCode::CONTINUE_AFTER_EVENT);
        req.pack(event);
        self.get_drc(req).await
    }

    /// Tell the server the debugger stopped. Thread names are returned when
    /// `ask_thread_names` is set.
    pub async fn stopped_at_debug_event(
        &mut self,
        dlls_added: bool,
        ask_thread_names: bool,
    ) -> DebmodResult<Vec<ThreadName>> {
        let client = self.session()?;
        let mut req = PacketWriter::new(RpcCode::STOPPED_AT_DEBUG_EVENT);
        req.pack_db(dlls_added as u8).pack_db(ask_thread_names as u8);
        let reply = client.send_request(req).await?;
        if !ask_thread_names {
            return Ok(Vec::new());
        }
        reply.reader().unpack().map_err(|e| self.violation(e))
    }

    /// Suspend a thread.
    pub async fn thread_suspend(&mut self, tid: i32) -> DebmodResult<Drc> {
        let mut req = PacketWriter::new(RpcCode::TH_SUSPEND);
        req.pack_dd_signed(tid);
        self.get_drc(req).await
    }

    /// Resume a suspended thread.
    pub async fn thread_continue(&mut self, tid: i32) -> DebmodResult<Drc> {
        let mut req = PacketWriter::new(RpcCode::TH_CONTINUE);
        req.pack_dd_signed(tid);
        self.get_drc(req).await
    }

    /// Choose how `tid` resumes.
    pub async fn set_resume_mode(&mut self, tid: i32, mode: ResumeMode) -> DebmodResult<Drc> {
        let mut req = PacketWriter::new(RpcCode::SET_RESUME_MODE);
        req.pack_dd_signed(tid).pack_dd(mode as u32);
        self.get_drc(req).await
    }

    /// Send a request whose reply is a status.
    pub(crate) async fn get_drc(&mut self, req: PacketWriter) -> DebmodResult<Drc> {
        self.session()?.send_request_get_drc_result(req).await
    }
}

#[cfg(test)]
mod tests {
    use dbgrpc_common::types::{DebappAttrs, EventId, RegisterInfo};

    use super::*;
    use crate::debmod::tests::session;

    #[tokio::test]
    async fn test_start_process_stores_attributes() {
        let (mut debmod, mut server) = session().await;
        let task = tokio::spawn(async move {
            let req = server.recv_packet().await.unwrap();
            assert_eq!(req.code, RpcCode::START_PROCESS);
            let mut u = req.reader();
            assert_eq!(u.unpack_str().unwrap(), "/bin/true");
            assert_eq!(u.unpack_str().unwrap(), "");
            assert_eq!(u.unpack_str().unwrap(), "/tmp");
            assert_eq!(u.unpack_dd().unwrap(), 0);
            assert_eq!(u.unpack_str().unwrap(), "true");
            assert_eq!(u.unpack_dd().unwrap(), 0);
            assert_eq!(u.unpack_db().unwrap(), 1);
            assert_eq!(u.unpack_dd().unwrap(), 0);
            assert!(u.is_empty());

            let mut reply = PacketWriter::new(RpcCode::OK);
            reply.pack_dd(1).pack(&DebappAttrs { addrsize: 8, platform: "linux".into() }).pack(
                &DynamicRegisterSet {
                    registers: vec![RegisterInfo {
                        name: "rip".into(),
                        register_class: 1,
                        ..Default::default()
                    }],
                    classes: vec!["general".into()],
                },
            );
            server.send_packet(reply).await.unwrap();
            server
        });

        let request = StartProcessRequest {
            path: "/bin/true".into(),
            startdir: "/tmp".into(),
            input_path: "true".into(),
            ..Default::default()
        };
        assert_eq!(debmod.start_process(&request).await.unwrap(), Drc::Ok);
        let _server = task.await.unwrap();
        assert_eq!(debmod.debapp_attrs().platform, "linux");
        assert_eq!(debmod.register_set().unwrap().find("RIP"), Some(0));
    }

    #[tokio::test]
    async fn test_attach_failure_carries_text() {
        let (mut debmod, mut server) = session().await;
        let task = tokio::spawn(async move {
            server.recv_packet().await.unwrap();
            let mut reply = PacketWriter::new(RpcCode::OK);
            reply.pack_dd_signed(Drc::Failed.raw()).pack_str("permission denied");
            server.send_packet(reply).await.unwrap();
            server
        });
        let err = debmod.attach_process(42, -1, 0).await.unwrap_err();
        let _server = task.await.unwrap();
        assert_eq!(err.drc(), Drc::Failed);
        assert!(err.to_string().ends_with("permission denied"));
        assert!(debmod.register_set().is_none());
    }

    #[tokio::test]
    async fn test_event_polling_switch() {
        let (mut debmod, mut server) = session().await;
        let event = DebugEvent::new(EventId::BREAKPOINT, 7, 8, 0x401000);
        let pushed = event.clone();
        let task = tokio::spawn(async move {
            let req = server.recv_packet().await.unwrap();
            assert_eq!(req.code, RpcCode::GET_DEBUG_EVENT);
            assert_eq!(req.reader().unpack_dd().unwrap(), 50);
            let mut none = PacketWriter::new(RpcCode::OK);
            none.pack_dd(0);
            server.send_packet(none).await.unwrap();

            let mut push = PacketWriter::new(RpcCode::EVENT);
            push.pack(&pushed);
            server.send_packet(push).await.unwrap();
            assert_eq!(server.recv_packet().await.unwrap().code, RpcCode::EVOK);
            server
        });

        assert_eq!(debmod.get_debug_event(50).await.unwrap(), None);
        assert!(debmod.is_polling_events());
        assert_eq!(debmod.get_debug_event(2000).await.unwrap(), Some(event));
        assert!(!debmod.is_polling_events());
        let _server = task.await.unwrap();
    }

    #[tokio::test]
    async fn test_thread_names_on_stop() {
        let (mut debmod, mut server) = session().await;
        let task = tokio::spawn(async move {
            let req = server.recv_packet().await.unwrap();
            assert_eq!(req.payload, vec![1, 1]);
            let mut reply = PacketWriter::new(RpcCode::OK);
            reply.pack(&vec![ThreadName { tid: 3, name: "worker".into() }]);
            server.send_packet(reply).await.unwrap();
            server
        });
        let names = debmod.stopped_at_debug_event(true, true).await.unwrap();
        let _server = task.await.unwrap();
        assert_eq!(names, vec![ThreadName { tid: 3, name: "worker".into() }]);
    }

    #[tokio::test]
    async fn test_operations_before_init() {
        let (mut debmod, _server) = session().await;
        debmod.initialized = false;
        assert!(matches!(debmod.get_processes().await.unwrap_err(), DebmodError::NotInitialized));
    }
}
