//! Packet delivery boundary
//!
//! The core consumes observed packets through [`PacketSource`] and
//! performs no capture or filtering itself beyond the doorbell-port
//! and payload checks. [`ChannelSource`] is the embedding-friendly
//! implementation; [`crate::listen::SocketSource`] is the shipped
//! socket-based one.

use async_trait::async_trait;
use bytes::Bytes;
use std::net::IpAddr;
use tokio::sync::mpsc;

use dm_protocol::Protocol;

/// One observed packet addressed to the host.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Source address of the packet
    pub source: IpAddr,
    /// Destination port
    pub port: u16,
    /// Transport protocol
    pub protocol: Protocol,
    /// Payload bytes; only inspected for doorbell-port packets
    pub payload: Bytes,
}

impl Packet {
    /// Create a packet with an empty payload (an ordinary knock).
    pub fn knock(source: IpAddr, port: u16, protocol: Protocol) -> Self {
        Self {
            source,
            port,
            protocol,
            payload: Bytes::new(),
        }
    }

    /// Create a UDP packet carrying a payload.
    pub fn datagram(source: IpAddr, port: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            source,
            port,
            protocol: Protocol::Udp,
            payload: payload.into(),
        }
    }
}

/// Stream of observed packets feeding a Doorkeeper.
#[async_trait]
pub trait PacketSource: Send {
    /// Next observed packet, or `None` when the source is exhausted.
    async fn next_packet(&mut self) -> Option<Packet>;
}

/// A [`PacketSource`] fed through an mpsc channel.
///
/// Used by tests and by embedders that bring their own capture
/// mechanism.
pub struct ChannelSource {
    rx: mpsc::Receiver<Packet>,
}

impl ChannelSource {
    /// Create a channel source and the sender that feeds it.
    pub fn new(capacity: usize) -> (mpsc::Sender<Packet>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl PacketSource for ChannelSource {
    async fn next_packet(&mut self) -> Option<Packet> {
        self.rx.recv().await
    }
}
