use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use log::{debug, trace};
use tokio::net::UdpSocket;

use crate::error::{Error, Result};
use crate::magic::MagicPacket;

/// Parses a wake port; anything non-numeric, zero or above `u16::MAX` is rejected.
pub fn parse_port(port: &str) -> Result<u16> {
    match port.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(Error::InvalidPort),
        Ok(port) => Ok(port),
    }
}

/// Sends magic packets over short-lived UDP associations.
///
/// Each call to [`WakeSender::send`] opens its own socket, emits exactly one datagram and
/// releases the socket before returning, whatever the outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct WakeSender;

impl WakeSender {
    pub fn new() -> Self {
        Self
    }

    /// Transmits `packet` to `broadcast_host:port`.
    ///
    /// No acknowledgment is expected; `Ok(())` only means the datagram left the socket.
    ///
    /// # Example
    /// ```no_run
    /// use async_wol::{MagicPacket, WakeSender};
    ///
    /// let packet = MagicPacket::build("AA:BB:CC:DD:EE:FF").unwrap();
    /// tokio_test::block_on(async {
    ///     WakeSender::new()
    ///         .send(&packet, "192.168.1.255", "9")
    ///         .await
    ///         .unwrap();
    /// })
    /// ```
    ///
    /// # Errors
    /// [`Error::InvalidPort`] before any network activity if `port` is not valid,
    /// [`Error::ConnectionFailed`] if the association cannot be established and
    /// [`Error::SendFailed`] if the datagram could not be transmitted.
    pub async fn send(&self, packet: &MagicPacket, broadcast_host: &str, port: &str) -> Result<()> {
        let port = parse_port(port)?;
        let association = Association::prepare(broadcast_host, port).await?;
        association.transmit(packet.as_bytes()).await
    }
}

/// A connected UDP socket that lives for a single send.
///
/// `transmit` consumes the association, so it can carry at most one datagram and is
/// released right after.
#[derive(Debug)]
struct Association {
    socket: UdpSocket,
    target: SocketAddr,
}

impl Association {
    async fn prepare(host: &str, port: u16) -> Result<Self> {
        trace!("preparing association to {}:{}", host, port);
        let association = Self::connect(host, port).await.inspect_err(|err| {
            trace!("association to {}:{} failed: {}", host, port, err);
        })?;
        trace!("association to {} ready", association.target);
        Ok(association)
    }

    async fn connect(host: &str, port: u16) -> Result<Self> {
        let target = resolve(host, port).await?;
        let local: SocketAddr = match target.ip() {
            IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };

        let socket = UdpSocket::bind(local)
            .await
            .map_err(|err| connection_failed("failed to bind socket", err))?;
        socket
            .set_broadcast(true)
            .map_err(|err| connection_failed("failed to enable broadcast", err))?;
        socket
            .connect(target)
            .await
            .map_err(|err| connection_failed("failed to connect", err))?;
        Ok(Self { socket, target })
    }

    async fn transmit(self, payload: &[u8]) -> Result<()> {
        let written = self.socket.send(payload).await.map_err(|err| {
            Error::SendFailed(format!("failed to send packet, reason: {}", err))
        })?;
        if written != payload.len() {
            return Err(Error::SendFailed(format!(
                "short write of {} out of {} bytes",
                written,
                payload.len()
            )));
        }
        debug!("sent {} bytes to {}", written, self.target);
        Ok(())
    }
}

impl Drop for Association {
    fn drop(&mut self) {
        trace!("releasing association to {}", self.target);
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let host = host.trim();
    if host.is_empty() {
        return Err(Error::ConnectionFailed("broadcast address is empty".into()));
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|err| connection_failed("failed to resolve host", err))?;
    addrs.next().ok_or_else(|| {
        Error::ConnectionFailed(format!("no address found for {}", host))
    })
}

fn connection_failed(context: &str, err: std::io::Error) -> Error {
    Error::ConnectionFailed(format!("{}, reason: {}", context, err))
}
