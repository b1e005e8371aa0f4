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

//! Byte stream transport carrying framed packets.
//!
//! [`Transport`] wraps any `AsyncRead + AsyncWrite` stream (TCP in
//! production, in-memory duplex pipes in tests) in a buffered stream and
//! moves whole frames across it. A frame is either received completely or
//! not at all: a timeout, disconnect or oversized header fails the receive
//! and the caller must treat the stream as unusable.

use std::{io, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream},
    net::TcpStream,
    time::timeout,
};
use tracing::{debug, trace};

use super::packet::{parse_header, Packet, PacketWriter, PACKET_HEADER_SIZE};
use crate::error::{ProtocolViolation, RpcError};

/// Default upper bound on a single payload.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 64 * 1024 * 1024;

/// Connect timeout used when receives wait forever.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Framed packet transport over a byte stream.
#[derive(Debug)]
pub struct Transport<S> {
    stream: BufStream<S>,
    recv_timeout: Option<Duration>,
    max_packet_size: usize,
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap a connected stream. Receives wait forever until a timeout is set.
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufStream::new(stream),
            recv_timeout: None,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    /// Set the time allowed for a complete frame to arrive.
    pub fn with_recv_timeout(mut self, recv_timeout: Option<Duration>) -> Self {
        self.recv_timeout = recv_timeout;
        self
    }

    /// Set the largest payload accepted from the peer.
    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    /// Configured receive timeout.
    pub fn recv_timeout(&self) -> Option<Duration> {
        self.recv_timeout
    }

    /// Finalize and send one frame.
    pub async fn send_packet(&mut self, packet: PacketWriter) -> Result<(), RpcError> {
        let code = packet.code();
        let frame = packet.into_frame();
        debug!(code = %code, len = frame.len() - PACKET_HEADER_SIZE, "sending packet");
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Receive one complete frame.
    pub async fn recv_packet(&mut self) -> Result<Packet, RpcError> {
        let packet = match self.recv_timeout {
            Some(limit) => timeout(limit, self.read_frame())
                .await
                .map_err(|_| RpcError::Timeout(limit))??,
            None => self.read_frame().await?,
        };
        debug!(code = %packet.code, len = packet.payload.len(), "received packet");
        trace!(payload = ?packet.payload, "packet payload");
        Ok(packet)
    }

    async fn read_frame(&mut self) -> Result<Packet, RpcError> {
        let mut header = [0u8; PACKET_HEADER_SIZE];
        self.stream.read_exact(&mut header).await.map_err(map_read_error)?;
        let (len, code) = parse_header(&header);
        if len > self.max_packet_size {
            return Err(ProtocolViolation::PacketTooLarge {
                declared: len,
                limit: self.max_packet_size,
            }
            .into());
        }
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await.map_err(map_read_error)?;
        Ok(Packet { code, payload })
    }

    /// Wait up to `wait` for incoming data without consuming it.
    ///
    /// Returns `Ok(false)` when nothing arrived in time. A closed stream is an
    /// error, not "nothing to read".
    pub async fn poll_ready(&mut self, wait: Duration) -> Result<bool, RpcError> {
        match timeout(wait, self.stream.fill_buf()).await {
            Err(_) => Ok(false),
            Ok(Ok([])) => Err(RpcError::Disconnected),
            Ok(Ok(_)) => Ok(true),
            Ok(Err(e)) => Err(RpcError::Io(e)),
        }
    }

    /// Flush and shut down the write half.
    pub async fn shutdown(&mut self) -> Result<(), RpcError> {
        self.stream.flush().await?;
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Give back the underlying stream. Buffered data is discarded.
    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }
}

fn map_read_error(err: io::Error) -> RpcError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        RpcError::Disconnected
    } else {
        RpcError::Io(err)
    }
}

/// Open a TCP connection to a debugger server.
pub async fn connect(
    host: &str,
    port: u16,
    connect_timeout: Duration,
) -> Result<TcpStream, RpcError> {
    debug!(host, port, "connecting to debugger server");
    let stream = timeout(connect_timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| RpcError::Timeout(connect_timeout))??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::packet::RpcCode;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_packet_crosses_a_pipe() {
        let (a, b) = duplex(1024);
        let mut left = Transport::new(a);
        let mut right = Transport::new(b);

        let mut w = PacketWriter::new(RpcCode::MSG);
        w.pack_str("starting...");
        left.send_packet(w).await.unwrap();
        left.send_packet(PacketWriter::new(RpcCode::OK)).await.unwrap();

        let msg = right.recv_packet().await.unwrap();
        assert_eq!(msg.code, RpcCode::MSG);
        assert_eq!(msg.reader().unpack_str().unwrap(), "starting...");

        let ack = right.recv_packet().await.unwrap();
        assert_eq!(ack.code, RpcCode::OK);
        assert!(ack.payload.is_empty());
    }

    #[tokio::test]
    async fn test_partial_frame_then_close_is_disconnect() {
        let (mut raw, b) = duplex(1024);
        let mut right = Transport::new(b);
        // Header announces 10 bytes, only 3 arrive.
        raw.write_all(&[0, 0, 0, 10, 0, 1, 2, 3]).await.unwrap();
        drop(raw);
        assert!(matches!(right.recv_packet().await, Err(RpcError::Disconnected)));
    }

    #[tokio::test]
    async fn test_recv_timeout() {
        let (_keep, b) = duplex(1024);
        let mut right = Transport::new(b).with_recv_timeout(Some(Duration::from_millis(20)));
        assert!(matches!(right.recv_packet().await, Err(RpcError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_oversized_header_rejected() {
        let (mut raw, b) = duplex(1024);
        let mut right = Transport::new(b).with_max_packet_size(16);
        raw.write_all(&[0, 0, 1, 0, 0]).await.unwrap();
        assert!(matches!(
            right.recv_packet().await,
            Err(RpcError::Protocol(ProtocolViolation::PacketTooLarge { declared: 256, limit: 16 }))
        ));
    }

    #[tokio::test]
    async fn test_poll_ready_does_not_consume() {
        let (a, b) = duplex(1024);
        let mut left = Transport::new(a);
        let mut right = Transport::new(b);

        assert!(!right.poll_ready(Duration::from_millis(10)).await.unwrap());

        left.send_packet(PacketWriter::new(RpcCode::EVENT)).await.unwrap();
        assert!(right.poll_ready(Duration::from_millis(100)).await.unwrap());
        assert_eq!(right.recv_packet().await.unwrap().code, RpcCode::EVENT);

        drop(left);
        assert!(matches!(
            right.poll_ready(Duration::from_millis(100)).await,
            Err(RpcError::Disconnected)
        ));
    }
}
