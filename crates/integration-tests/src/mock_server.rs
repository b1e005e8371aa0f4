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

//! Scripted debugger server for end-to-end tests
//!
//! A [`MockServer`] listens on an ephemeral loopback port and runs a script
//! against the first client that connects. Scripts drive a [`ServerConn`],
//! which speaks the server side of the protocol one packet at a time.

use std::{future::Future, net::SocketAddr, time::Duration};

use dbgrpc_common::types::Drc;
use dbgrpc_engine::{Packet, PacketWriter, RpcCode, Transport, DEFAULT_PROTOCOL_VERSION};
use eyre::{bail, ensure, Result};
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tracing::debug;

/// How long the server side waits for the client before failing the script.
pub const SCRIPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Password the default login helpers accept.
pub const TEST_PASSWORD: &str = "secret";

/// A debugger server that plays one scripted conversation.
#[derive(Debug)]
pub struct MockServer {
    addr: SocketAddr,
    task: JoinHandle<Result<()>>,
}

impl MockServer {
    /// Bind to loopback and run `script` once a client connects.
    pub async fn start<F, Fut>(script: F) -> Result<Self>
    where
        F: FnOnce(ServerConn) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            let (stream, peer) = listener.accept().await?;
            debug!(%peer, "mock server accepted a client");
            script(ServerConn::new(stream)).await
        });
        Ok(Self { addr, task })
    }

    /// Host the server listens on.
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Port the server listens on.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Wait for the script to finish and return its outcome.
    pub async fn finish(self) -> Result<()> {
        self.task.await?
    }
}

/// Server end of one client connection.
#[derive(Debug)]
pub struct ServerConn {
    transport: Transport<TcpStream>,
}

impl ServerConn {
    fn new(stream: TcpStream) -> Self {
        Self { transport: Transport::new(stream).with_recv_timeout(Some(SCRIPT_TIMEOUT)) }
    }

    /// Send one packet.
    pub async fn send(&mut self, packet: PacketWriter) -> Result<()> {
        self.transport.send_packet(packet).await?;
        Ok(())
    }

    /// Receive one packet.
    pub async fn recv(&mut self) -> Result<Packet> {
        Ok(self.transport.recv_packet().await?)
    }

    /// Receive one packet and check its code.
    pub async fn expect(&mut self, code: RpcCode) -> Result<Packet> {
        let packet = self.recv().await?;
        if packet.code != code {
            bail!("expected {code}, client sent {}", packet.code);
        }
        Ok(packet)
    }

    /// Send an `OK` reply whose payload is built by `build`.
    pub async fn reply(&mut self, build: impl FnOnce(&mut PacketWriter)) -> Result<()> {
        let mut reply = PacketWriter::new(RpcCode::OK);
        build(&mut reply);
        self.send(reply).await
    }

    /// Announce the server with the given parameters.
    pub async fn announce(&mut self, version: u32, debugger_id: u32, address_size: u32) -> Result<()> {
        let mut open = PacketWriter::new(RpcCode::OPEN);
        open.pack_dd(version).pack_dd(debugger_id).pack_dd(address_size);
        self.send(open).await
    }

    /// Announce a compatible server and check the password the client sends.
    ///
    /// Returns whether the password was accepted.
    pub async fn accept_login(&mut self, password: &str) -> Result<bool> {
        self.announce(DEFAULT_PROTOCOL_VERSION, 0, 8).await?;
        let login = self.expect(RpcCode::OK).await?;
        let mut u = login.reader();
        ensure!(u.unpack_dd()? == 1, "client refused a compatible server");
        let accepted = u.unpack_str()? == password;
        self.reply(|r| {
            r.pack_dd(accepted as u32);
        })
        .await?;
        Ok(accepted)
    }

    /// Answer `init` with success and `flags2`.
    pub async fn serve_init(&mut self, flags2: u32) -> Result<()> {
        self.expect(RpcCode::INIT).await?;
        self.reply(|r| {
            r.pack_dd_signed(Drc::Ok.raw()).pack_dd(flags2);
        })
        .await
    }

    /// Log the client in with [`TEST_PASSWORD`] and initialize it.
    pub async fn open_session(&mut self) -> Result<()> {
        ensure!(self.accept_login(TEST_PASSWORD).await?, "client sent the wrong password");
        self.serve_init(0).await
    }

    /// Answer `term` and wait for the client's goodbye.
    pub async fn close_session(&mut self) -> Result<()> {
        self.expect(RpcCode::TERM).await?;
        self.reply(|_| {}).await?;
        let goodbye = self.expect(RpcCode::OK).await?;
        ensure!(goodbye.payload.is_empty(), "goodbye packet carries a payload");
        Ok(())
    }
}
