//! Downstream control protocol — the opaque wire primitive.
//!
//! The wire-level encoding of the protocol is explicitly out of scope:
//! downstream boards are reached through a `send(address, args)`
//! primitive. This module provides one concrete UDP-backed
//! implementation of that primitive (newline-delimited `address arg arg
//! ...` datagrams) so the rest of the crate has something to compile and
//! test against; a real deployment can swap in the actual board protocol
//! behind the same [`Sender`] trait.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::debug;

/// A single datagram argument (int or float).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Arg {
    Int(i64),
    Float(f64),
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Int(v) => write!(f, "{v}"),
            Arg::Float(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for Arg {
    fn from(v: i64) -> Self {
        Arg::Int(v)
    }
}
impl From<f64> for Arg {
    fn from(v: f64) -> Self {
        Arg::Float(v)
    }
}

/// Send a control message to a single endpoint. Implementations must not
/// block the caller for long: sends must be non-blocking or short-timeout
/// so one slow endpoint never delays the others.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, address: &str, args: &[Arg]) -> io::Result<()>;
}

/// UDP-backed sender for one `(host, port)` pair, holding a single
/// connected socket for its whole lifetime.
pub struct UdpSender {
    socket: UdpSocket,
}

impl UdpSender {
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        socket.connect(addr).await?;
        Ok(Self { socket })
    }

    fn encode(address: &str, args: &[Arg]) -> Vec<u8> {
        let mut line = address.to_string();
        for a in args {
            line.push(' ');
            line.push_str(&a.to_string());
        }
        line.into_bytes()
    }
}

#[async_trait]
impl Sender for UdpSender {
    async fn send(&self, address: &str, args: &[Arg]) -> io::Result<()> {
        let buf = Self::encode(address, args);
        self.socket.send(&buf).await.map(|_| ())
    }
}

/// A long-lived pool of `(host, port) -> Sender` connections, created
/// lazily on first use and reused thereafter.
#[derive(Default)]
pub struct TransportPool {
    senders: Mutex<HashMap<(String, u16), Arc<dyn Sender>>>,
}

impl TransportPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_connect(&self, host: &str, port: u16) -> io::Result<Arc<dyn Sender>> {
        let key = (host.to_string(), port);
        {
            let senders = self.senders.lock().await;
            if let Some(s) = senders.get(&key) {
                return Ok(s.clone());
            }
        }
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
            .or_else(|_: io::Error| {
                // Hostnames (not bare IPs) are resolved via std's blocking
                // resolver the first time a pool entry is created.
                use std::net::ToSocketAddrs;
                format!("{host}:{port}")
                    .to_socket_addrs()?
                    .next()
                    .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses"))
            })?;
        let sender: Arc<dyn Sender> = Arc::new(UdpSender::connect(addr).await?);
        debug!(host, port, "opened new downstream transport");
        self.senders.lock().await.insert(key, sender.clone());
        Ok(sender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_format() {
        let buf = UdpSender::encode("/setTargetPositionList", &[Arg::Int(1), Arg::Int(2)]);
        assert_eq!(String::from_utf8(buf).unwrap(), "/setTargetPositionList 1 2");
    }

    #[tokio::test]
    async fn test_pool_reuses_connection() {
        let echo = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let echo_addr = echo.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            loop {
                if echo.recv_from(&mut buf).await.is_err() {
                    break;
                }
            }
        });

        let pool = TransportPool::new();
        let a = pool.get_or_connect("127.0.0.1", echo_addr.port()).await.unwrap();
        let b = pool.get_or_connect("127.0.0.1", echo_addr.port()).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        a.send("/hardHiZ", &[Arg::Int(255)]).await.unwrap();
    }

    // Binds a fixed port rather than an ephemeral one, so it must not run
    // concurrently with another test claiming the same port.
    const FIXED_TEST_PORT: u16 = 18231;

    #[serial_test::serial]
    #[tokio::test]
    async fn test_pool_connects_to_fixed_port() {
        let echo = UdpSocket::bind(("127.0.0.1", FIXED_TEST_PORT)).await.unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let _ = echo.recv_from(&mut buf).await;
        });

        let pool = TransportPool::new();
        let sender = pool.get_or_connect("127.0.0.1", FIXED_TEST_PORT).await.unwrap();
        sender.send("/step", &[Arg::Int(1)]).await.unwrap();
    }

    #[serial_test::serial]
    #[tokio::test]
    async fn test_pool_rebinds_fixed_port_after_previous_test() {
        let echo = UdpSocket::bind(("127.0.0.1", FIXED_TEST_PORT)).await.unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let _ = echo.recv_from(&mut buf).await;
        });

        let pool = TransportPool::new();
        let sender = pool.get_or_connect("127.0.0.1", FIXED_TEST_PORT).await.unwrap();
        sender.send("/step", &[Arg::Int(2)]).await.unwrap();
    }
}
