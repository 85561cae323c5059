//! Socket operations for ringing and knocking
//!
//! A knock is nothing but a connection attempt: an empty UDP datagram
//! or a TCP SYN. Whether anything answers is irrelevant.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use anyhow::Result;
use tokio::net::{TcpStream, UdpSocket};

use dm_protocol::{Knock, Protocol};

/// TCP connection attempts are abandoned after this long; the SYN is
/// on the wire either way and waiting longer would only stall pacing.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Send a payload-carrying datagram to the doorbell port.
pub async fn ring(target: SocketAddr, payload: &[u8]) -> Result<()> {
    let socket = UdpSocket::bind(local_bind_addr(&target)).await?;
    socket.send_to(payload, target).await?;
    Ok(())
}

/// Perform one knock against the host.
pub async fn knock(host: IpAddr, knock: Knock) -> Result<()> {
    let target = SocketAddr::new(host, knock.port);
    match knock.protocol {
        Protocol::Udp => {
            let socket = UdpSocket::bind(local_bind_addr(&target)).await?;
            socket.send_to(&[], target).await?;
        }
        Protocol::Tcp => {
            // Fire and forget: a filtered port would otherwise stall
            // the knock pacing for the rest of the sequence.
            tokio::spawn(async move {
                let _ = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(target)).await;
            });
        }
    }
    Ok(())
}

fn local_bind_addr(target: &SocketAddr) -> SocketAddr {
    let ip = match target {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}
