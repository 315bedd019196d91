use std::net::SocketAddr;

use anyhow::Context;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::{net::UdpSocket, time::Instant};

/// Fire-and-resume transport for out-of-band side queries: send a raw
/// payload to an address and return the raw answer. Implementations must
/// not block the caller beyond the deadline.
#[async_trait]
pub trait SideQueryTransport: Send + Sync {
    async fn exchange(
        &self,
        dest: SocketAddr,
        payload: Bytes,
        deadline: Instant,
    ) -> anyhow::Result<Bytes>;
}

/// Transport used when no side-query backend is wired up. Every exchange
/// fails, which the dispatch layer turns into the empty-answer sentinel.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTransport;

#[async_trait]
impl SideQueryTransport for NullTransport {
    async fn exchange(
        &self,
        dest: SocketAddr,
        _payload: Bytes,
        _deadline: Instant,
    ) -> anyhow::Result<Bytes> {
        anyhow::bail!("no side-query transport configured (dest {})", dest)
    }
}

/// UDP side queries over a per-exchange ephemeral socket. The payload is
/// a raw DNS message; the response is matched on its transaction id.
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpSideQuery;

impl UdpSideQuery {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SideQueryTransport for UdpSideQuery {
    async fn exchange(
        &self,
        dest: SocketAddr,
        payload: Bytes,
        deadline: Instant,
    ) -> anyhow::Result<Bytes> {
        if payload.len() < 2 {
            anyhow::bail!("side-query payload too short: {} bytes", payload.len());
        }
        if payload.len() > u16::MAX as usize {
            anyhow::bail!("side-query payload too large for UDP: {} bytes", payload.len());
        }
        let want_id = u16::from_be_bytes([payload[0], payload[1]]);

        let bind_addr = if dest.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(dest).await?;

        tokio::time::timeout_at(deadline, socket.send(&payload))
            .await
            .context("side-query send timeout")??;

        const RECV_SIZE: usize = 4096;
        let mut buf = BytesMut::with_capacity(RECV_SIZE);
        buf.resize(RECV_SIZE, 0);

        loop {
            let n = tokio::time::timeout_at(deadline, socket.recv(&mut buf))
                .await
                .context("side-query recv timeout")??;

            // accept only a response to our transaction
            if n >= 2 {
                let got_id = u16::from_be_bytes([buf[0], buf[1]]);
                if got_id == want_id {
                    buf.truncate(n);
                    return Ok(buf.split().freeze());
                }
            }
            tracing::debug!(dest = %dest, "ignoring datagram with unexpected transaction id");
            buf.resize(RECV_SIZE, 0);
        }
    }
}
