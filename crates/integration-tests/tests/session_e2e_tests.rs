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

//! End-to-end tests of a debugger session over TCP
//!
//! Each test runs a scripted server on loopback and drives the debugger
//! module against it, covering:
//! - the login handshake and its refusals
//! - server requests interleaved with replies
//! - memory reads, process start and debug event delivery

use dbgrpc_common::types::{
    BptCode, DebappAttrs, DebugEvent, Drc, DynamicRegisterSet, EventId, ProcessInfo, RegisterInfo,
    UpdateBptInfo,
};
use dbgrpc_engine::{
    DebmodError, HandshakeError, HostHandle, PacketWriter, ProtocolViolation, RpcCode, RpcDebmod,
    RpcError, SessionConfig, StartProcessRequest,
};
use dbgrpc_integration_tests::{
    init,
    mock_server::{MockServer, TEST_PASSWORD},
    recording_host::{HostLog, RecordingHost},
};
use tokio::net::TcpStream;
use tracing::info;

struct Client {
    debmod: RpcDebmod<TcpStream>,
    host: HostHandle,
    log: HostLog,
}

impl Client {
    fn new() -> Self {
        let (recorder, log) = RecordingHost::new();
        let host = HostHandle::spawn(recorder);
        let debmod = RpcDebmod::new(SessionConfig::default(), host.clone());
        Self { debmod, host, log }
    }

    async fn open(server: &MockServer) -> Self {
        let mut client = Self::new();
        client.debmod.open_remote(&server.host(), server.port(), TEST_PASSWORD).await.unwrap();
        client.debmod.init().await.unwrap();
        client
    }

    async fn close(mut self) -> HostLog {
        self.debmod.term().await.unwrap();
        self.debmod.close_remote().await.unwrap();
        // Jobs run in order, so this waits for every earlier notification.
        self.host.call(|_| ()).await.unwrap();
        self.log
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_session_lists_processes() {
    init::init_test_environment();
    info!("Testing a complete session that lists processes");

    let server = MockServer::start(|mut conn| async move {
        conn.open_session().await?;
        conn.expect(RpcCode::GET_PROCESSES).await?;
        let processes = vec![
            ProcessInfo { pid: 1, name: "init".into() },
            ProcessInfo { pid: 4242, name: "/usr/bin/target --flag".into() },
        ];
        conn.reply(|r| {
            r.pack_dd_signed(Drc::Ok.raw()).pack(&processes);
        })
        .await?;
        conn.close_session().await
    })
    .await
    .unwrap();

    let mut client = Client::open(&server).await;
    assert!(client.debmod.is_connected());
    let processes = client.debmod.get_processes().await.unwrap();
    assert_eq!(processes.len(), 2);
    assert_eq!(processes[1].pid, 4242);
    assert_eq!(processes[1].name, "/usr/bin/target --flag");

    client.close().await;
    server.finish().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_incompatible_server_is_refused() {
    init::init_test_environment();

    let server = MockServer::start(|mut conn| async move {
        conn.announce(1, 0, 8).await?;
        let refusal = conn.expect(RpcCode::OK).await?;
        let mut u = refusal.reader();
        eyre::ensure!(u.unpack_dd()? == 0, "refusal must carry 0");
        eyre::ensure!(u.is_empty(), "no password after a refusal");
        Ok(())
    })
    .await
    .unwrap();

    let mut client = Client::new();
    let err =
        client.debmod.open_remote(&server.host(), server.port(), TEST_PASSWORD).await.unwrap_err();
    assert!(matches!(
        err,
        DebmodError::Handshake(HandshakeError::VersionMismatch { actual: 1, .. })
    ));
    assert!(!client.debmod.is_connected());
    server.finish().await.unwrap();

    client.host.call(|_| ()).await.unwrap();
    assert!(client.log.contains("warn:"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wrong_password() {
    init::init_test_environment();

    let server = MockServer::start(|mut conn| async move {
        eyre::ensure!(!conn.accept_login("other").await?, "password should not match");
        Ok(())
    })
    .await
    .unwrap();

    let mut client = Client::new();
    let err =
        client.debmod.open_remote(&server.host(), server.port(), TEST_PASSWORD).await.unwrap_err();
    assert!(matches!(err, DebmodError::Handshake(HandshakeError::BadPassword)));
    assert!(!client.debmod.is_connected());
    server.finish().await.unwrap();

    client.host.call(|_| ()).await.unwrap();
    assert!(client.log.contains("warn: Bad password"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_server_request_does_not_break_the_session() {
    init::init_test_environment();
    info!("Testing an unsupported server request in the middle of a read");

    let server = MockServer::start(|mut conn| async move {
        conn.open_session().await?;

        let req = conn.expect(RpcCode::READ_MEMORY).await?;
        let mut u = req.reader();
        eyre::ensure!(u.unpack_ea64()? == 0x401000, "wrong address");
        eyre::ensure!(u.unpack_dd()? == 16, "wrong size");

        conn.send(PacketWriter::new(RpcCode(99))).await?;
        conn.expect(RpcCode::UNK).await?;

        let bytes: Vec<u8> = (0..16).collect();
        conn.reply(|r| {
            r.pack_dd_signed(16).append(&bytes);
        })
        .await?;
        conn.close_session().await
    })
    .await
    .unwrap();

    let mut client = Client::open(&server).await;
    let mut buf = [0xffu8; 16];
    assert_eq!(client.debmod.read_memory(0x401000, &mut buf).await.unwrap(), 16);
    assert_eq!(buf.to_vec(), (0..16).collect::<Vec<u8>>());

    client.close().await;
    server.finish().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_short_memory_read() {
    init::init_test_environment();

    let server = MockServer::start(|mut conn| async move {
        conn.open_session().await?;
        conn.expect(RpcCode::READ_MEMORY).await?;
        conn.reply(|r| {
            r.pack_dd_signed(4).append(&[0xde, 0xad, 0xbe, 0xef]).pack_str("partial read");
        })
        .await?;
        conn.close_session().await
    })
    .await
    .unwrap();

    let mut client = Client::open(&server).await;
    let mut buf = [0u8; 16];
    assert_eq!(client.debmod.read_memory(0x7000, &mut buf).await.unwrap(), 4);
    assert_eq!(&buf[..4], &[0xde, 0xad, 0xbe, 0xef]);
    assert!(buf[4..].iter().all(|&b| b == 0));

    client.close().await;
    server.finish().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_truncated_reply_ends_the_session() {
    init::init_test_environment();

    let server = MockServer::start(|mut conn| async move {
        conn.open_session().await?;
        conn.expect(RpcCode::READ_MEMORY).await?;
        conn.reply(|r| {
            r.pack_dd(16).append(&[0xde, 0xad]);
        })
        .await?;
        // Nothing else may reach the server once the stream is out of step.
        assert!(conn.recv().await.is_err());
        Ok(())
    })
    .await
    .unwrap();

    let mut client = Client::open(&server).await;
    let mut buf = [0u8; 16];
    let err = client.debmod.read_memory(0x7000, &mut buf).await.unwrap_err();
    assert!(matches!(err, DebmodError::Rpc(RpcError::Protocol(ProtocolViolation::Malformed(_)))));

    let err = client.debmod.get_processes().await.unwrap_err();
    assert!(matches!(err, DebmodError::Rpc(RpcError::SessionBroken)));
    let err = client.debmod.read_memory(0x7000, &mut buf).await.unwrap_err();
    assert!(matches!(err, DebmodError::Rpc(RpcError::SessionBroken)));

    client.debmod.close_remote().await.unwrap();
    server.finish().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_messages_during_start_process() {
    init::init_test_environment();

    let server = MockServer::start(|mut conn| async move {
        conn.open_session().await?;
        conn.expect(RpcCode::START_PROCESS).await?;

        let mut msg = PacketWriter::new(RpcCode::MSG);
        msg.pack_str("starting...");
        conn.send(msg).await?;
        conn.expect(RpcCode::OK).await?;

        let attrs = DebappAttrs { addrsize: 8, platform: "linux".into() };
        let regs = DynamicRegisterSet {
            registers: vec![RegisterInfo {
                name: "rip".into(),
                register_class: 1,
                ..Default::default()
            }],
            classes: vec!["general".into()],
        };
        conn.reply(|r| {
            r.pack_dd_signed(Drc::Ok.raw()).pack(&attrs).pack(&regs);
        })
        .await?;
        conn.close_session().await
    })
    .await
    .unwrap();

    let mut client = Client::open(&server).await;
    let request = StartProcessRequest { path: "/bin/target".into(), ..Default::default() };
    assert_eq!(client.debmod.start_process(&request).await.unwrap(), Drc::Ok);
    assert_eq!(client.debmod.debapp_attrs().platform, "linux");
    assert!(client.debmod.register_set().is_some());

    let log = client.close().await;
    assert!(log.contains("msg: starting..."));
    server.finish().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_events_switch_to_polling() {
    init::init_test_environment();
    info!("Testing debug event delivery after the server reports no event");

    let event = DebugEvent::new(EventId::PROCESS_SUSPENDED, 7, 7, 0x401000);
    let pushed = event.clone();
    let server = MockServer::start(|mut conn| async move {
        conn.open_session().await?;
        conn.expect(RpcCode::GET_DEBUG_EVENT).await?;
        conn.reply(|r| {
            r.pack_dd_signed(0);
        })
        .await?;

        let mut push = PacketWriter::new(RpcCode::EVENT);
        push.pack(&pushed);
        conn.send(push).await?;
        conn.expect(RpcCode::EVOK).await?;
        conn.close_session().await
    })
    .await
    .unwrap();

    let mut client = Client::open(&server).await;
    assert_eq!(client.debmod.get_debug_event(0).await.unwrap(), None);
    assert!(client.debmod.is_polling_events());

    assert_eq!(client.debmod.get_debug_event(2000).await.unwrap(), Some(event));
    assert!(!client.debmod.is_polling_events());

    client.close().await;
    server.finish().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_pushed_event_is_a_protocol_error() {
    init::init_test_environment();

    let event = DebugEvent::new(EventId::THREAD_STARTED, 7, 8, 0x401000);
    let server = MockServer::start(move |mut conn| async move {
        conn.open_session().await?;
        conn.expect(RpcCode::GET_PROCESSES).await?;
        for _ in 0..2 {
            let mut push = PacketWriter::new(RpcCode::EVENT);
            push.pack(&event);
            conn.send(push).await?;
        }
        conn.expect(RpcCode::EVOK).await?;
        Ok(())
    })
    .await
    .unwrap();

    let mut client = Client::open(&server).await;
    let err = client.debmod.get_processes().await.unwrap_err();
    assert!(matches!(
        err,
        DebmodError::Rpc(RpcError::Protocol(ProtocolViolation::EventOverflow))
    ));
    server.finish().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_breakpoint_batch_without_work_is_not_sent() {
    init::init_test_environment();

    let server = MockServer::start(|mut conn| async move {
        conn.open_session().await?;
        // The next packet must be `term`: the empty batch never reaches the wire.
        conn.close_session().await
    })
    .await
    .unwrap();

    let mut client = Client::open(&server).await;
    let mut bpts = vec![UpdateBptInfo { code: BptCode::BadAddr, ..UpdateBptInfo::soft(0x1000, 7) }];
    assert_eq!(client.debmod.update_bpts(&mut bpts, 1, 0).await.unwrap(), 0);
    assert_eq!(bpts[0].code, BptCode::BadAddr);

    client.close().await;
    server.finish().await.unwrap();
}
