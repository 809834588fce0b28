//! Client session state and the channel-backed transport.

use crate::visibility::{Transport, Viewer};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// What the connection task should write next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Binary(Bytes),
    Close(u16, String),
}

/// Queues packets for the connection's writer task and counts what is still in flight.
#[derive(Debug)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Outbound>,
    buffered: AtomicUsize,
}

impl ChannelTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            tx,
            buffered: AtomicUsize::new(0),
        });
        (transport, rx)
    }

    /// Called by the writer task once `len` bytes reached the socket.
    pub fn written(&self, len: usize) {
        let _ = self
            .buffered
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |b| Some(b.saturating_sub(len)));
    }
}

impl Transport for ChannelTransport {
    fn send(&self, data: Bytes) {
        let len = data.len();
        self.buffered.fetch_add(len, Ordering::AcqRel);
        if self.tx.send(Outbound::Binary(data)).is_err() {
            self.written(len);
        }
    }

    fn close(&self, code: u16, reason: &str) {
        let _ = self.tx.send(Outbound::Close(code, reason.to_string()));
    }

    fn buffered_bytes(&self) -> usize {
        self.buffered.load(Ordering::Acquire)
    }
}

/// A connected client session.
pub struct Client {
    /// Controller id, also the player id on the wire.
    pub id: u8,
    pub addr: SocketAddr,
    pub transport: Arc<dyn Transport>,
    /// What this client has been shown so far.
    pub viewer: Viewer,
}

impl Client {
    pub fn send(&self, data: Bytes) {
        self.transport.send(data);
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("buffered", &self.transport.buffered_bytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_transport_counts_buffered() {
        let (transport, mut rx) = ChannelTransport::new();
        transport.send(Bytes::from_static(&[1, 2, 3]));
        transport.send(Bytes::from_static(&[4]));
        assert_eq!(transport.buffered_bytes(), 4);

        let Some(Outbound::Binary(first)) = rx.recv().await else {
            panic!("expected a binary message");
        };
        transport.written(first.len());
        assert_eq!(transport.buffered_bytes(), 1);

        transport.close(1003, "Ambiguous protocol");
        assert_eq!(rx.recv().await, Some(Outbound::Binary(Bytes::from_static(&[4]))));
        assert_eq!(rx.recv().await, Some(Outbound::Close(1003, "Ambiguous protocol".to_string())));
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped() {
        let (transport, rx) = ChannelTransport::new();
        drop(rx);
        transport.send(Bytes::from_static(&[1, 2]));
        assert_eq!(transport.buffered_bytes(), 0);
        transport.written(10);
        assert_eq!(transport.buffered_bytes(), 0);
    }
}
