//! LAN IP self-detection, grounded on `ritsudo_server.py`'s
//! `socket.connect(("8.8.8.8", 80))` trick: open a UDP socket "connected" to
//! an external address without sending anything, and read back the local
//! address the kernel picked. Best-effort and purely informational — never
//! used for binding, never fails the process.

use std::net::IpAddr;

use tokio::net::UdpSocket;
use tracing::{debug, warn};

/// Best-effort LAN-facing IP address for operator convenience at startup.
pub async fn detect_lan_ip() -> Option<IpAddr> {
    match try_detect().await {
        Ok(ip) => {
            debug!(%ip, "detected LAN IP");
            Some(ip)
        }
        Err(e) => {
            warn!(error = %e, "could not detect LAN IP, continuing without it");
            None
        }
    }
}

async fn try_detect() -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    socket.connect(("8.8.8.8", 80)).await?;
    Ok(socket.local_addr()?.ip())
}
