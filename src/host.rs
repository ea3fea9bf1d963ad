//! Host network helpers.

use std::net::{IpAddr, Ipv4Addr};

use tokio::net::UdpSocket;
use tracing::debug;

/// First non-loopback IPv4 address of this machine.
///
/// Connecting a UDP socket only selects the outbound interface; no packet
/// is sent. Returns `None` on hosts without an IPv4 route.
pub async fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await.ok()?;
    if let Err(e) = socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).await {
        debug!("No IPv4 route for local address discovery: {}", e);
        return None;
    }

    match socket.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

/// Address advertised to clients, falling back to loopback.
pub async fn advertised_address() -> String {
    local_ipv4()
        .await
        .unwrap_or(Ipv4Addr::LOCALHOST)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_advertised_address_is_ipv4() {
        let addr = advertised_address().await;
        assert!(addr.parse::<Ipv4Addr>().is_ok());
    }
}
