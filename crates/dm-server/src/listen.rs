//! Socket-based packet observation
//!
//! Without raw capture, the server can still observe every packet
//! that matters by binding the doorbell port plus the expected knock
//! ports for the active period: the sequence is known ahead of time,
//! so listeners are rebound whenever the Doorkeeper announces a
//! period rollover. A knock aimed at a port outside the expected set
//! is simply never observed and surfaces as a timeout; one aimed at a
//! different expected port is observed and fails fast.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use dm_core::HallwayError;
use dm_protocol::{Knock, Protocol};

use crate::source::{Packet, PacketSource};

const CHANNEL_CAPACITY: usize = 256;

/// Doorbell payloads are a tag plus a decimal period; anything longer
/// is truncated and will fail to parse anyway.
const MAX_DOORBELL_PAYLOAD: usize = 256;

/// Observes knocks through bound sockets.
pub struct SocketSource {
    rx: mpsc::Receiver<Packet>,
}

impl SocketSource {
    /// Bind the doorbell port and start tracking the sequence
    /// announced on `sequence_rx`.
    ///
    /// Fails only if the doorbell port itself cannot be bound; an
    /// unavailable knock port is logged and skipped since the knock
    /// protocol degrades to a timeout for that element.
    pub async fn bind(
        doorbell: u16,
        sequence_rx: watch::Receiver<(i64, Arc<Vec<Knock>>)>,
        cancel: CancellationToken,
    ) -> Result<Self, HallwayError> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        let socket = UdpSocket::bind(("0.0.0.0", doorbell))
            .await
            .map_err(|e| HallwayError::Bind {
                kind: "udp",
                port: doorbell,
                source: e,
            })?;

        let doorbell_tx = tx.clone();
        let doorbell_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = doorbell_cancel.cancelled() => {}
                _ = watch_doorbell(socket, doorbell, doorbell_tx) => {}
            }
        });

        tokio::spawn(track_sequence(doorbell, sequence_rx, tx, cancel));

        Ok(Self { rx })
    }
}

#[async_trait]
impl PacketSource for SocketSource {
    async fn next_packet(&mut self) -> Option<Packet> {
        self.rx.recv().await
    }
}

/// Rebind knock listeners every time the period rolls over.
async fn track_sequence(
    doorbell: u16,
    mut sequence_rx: watch::Receiver<(i64, Arc<Vec<Knock>>)>,
    tx: mpsc::Sender<Packet>,
    cancel: CancellationToken,
) {
    loop {
        let (period, sequence) = sequence_rx.borrow_and_update().clone();

        let listeners = CancellationToken::new();
        bind_knock_listeners(&sequence, doorbell, &tx, &listeners).await;
        tracing::debug!("Knock listeners bound for period {}", period);

        tokio::select! {
            _ = cancel.cancelled() => {
                listeners.cancel();
                break;
            }
            changed = sequence_rx.changed() => {
                listeners.cancel();
                if changed.is_err() {
                    // The Doorkeeper is gone.
                    break;
                }
            }
        }
    }
}

async fn bind_knock_listeners(
    sequence: &[Knock],
    doorbell: u16,
    tx: &mpsc::Sender<Packet>,
    cancel: &CancellationToken,
) {
    let mut bound = HashSet::new();
    for &knock in sequence {
        // A derived port can repeat within a sequence; bind it once.
        if !bound.insert(knock) {
            continue;
        }
        // The doorbell port never counts as a knock.
        if knock.port == doorbell {
            continue;
        }

        match knock.protocol {
            Protocol::Tcp => match TcpListener::bind(("0.0.0.0", knock.port)).await {
                Ok(listener) => {
                    let tx = tx.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = cancel.cancelled() => {}
                            _ = accept_knocks(listener, knock, tx) => {}
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!("Cannot bind tcp knock port {}: {}", knock.port, e);
                }
            },
            Protocol::Udp => match UdpSocket::bind(("0.0.0.0", knock.port)).await {
                Ok(socket) => {
                    let tx = tx.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = cancel.cancelled() => {}
                            _ = recv_knocks(socket, knock, tx) => {}
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!("Cannot bind udp knock port {}: {}", knock.port, e);
                }
            },
        }
    }
}

async fn watch_doorbell(socket: UdpSocket, port: u16, tx: mpsc::Sender<Packet>) {
    let mut buf = [0u8; MAX_DOORBELL_PAYLOAD];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, peer)) => {
                let packet =
                    Packet::datagram(peer.ip(), port, Bytes::copy_from_slice(&buf[..len]));
                if tx.send(packet).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!("Doorbell socket error: {}", e);
            }
        }
    }
}

async fn accept_knocks(listener: TcpListener, knock: Knock, tx: mpsc::Sender<Packet>) {
    loop {
        match listener.accept().await {
            // The connection attempt itself is the knock; the stream
            // is dropped immediately.
            Ok((_stream, peer)) => {
                let packet = Packet::knock(peer.ip(), knock.port, Protocol::Tcp);
                if tx.send(packet).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!("Accept failed on knock port {}: {}", knock.port, e);
            }
        }
    }
}

async fn recv_knocks(socket: UdpSocket, knock: Knock, tx: mpsc::Sender<Packet>) {
    let mut buf = [0u8; 64];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((_len, peer)) => {
                let packet = Packet::knock(peer.ip(), knock.port, Protocol::Udp);
                if tx.send(packet).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!("Recv failed on knock port {}: {}", knock.port, e);
            }
        }
    }
}
