//! Peer channel abstraction.
//!
//! A [`DataChannel`] is the reliable, ordered message channel a transfer runs
//! over. It carries text (control) and binary (data) messages and exposes the
//! number of bytes queued locally but not yet handed to the network, which the
//! sender uses for flow control.
//!
//! Incoming traffic is delivered as [`ChannelEvent`]s through a
//! [`ChannelReceiver`].

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use protocol::error::{ProtocolError, Result};
use tokio::sync::mpsc;

/// One message on a peer channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelPayload {
    /// Control message (JSON text).
    Text(String),
    /// Data message (binary frame).
    Binary(Bytes),
}

impl ChannelPayload {
    /// Size of the payload in bytes.
    pub fn len(&self) -> usize {
        match self {
            ChannelPayload::Text(text) => text.len(),
            ChannelPayload::Binary(data) => data.len(),
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Something that happened on the receiving side of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Message(ChannelPayload),
    Closed,
}

/// A reliable, ordered peer channel.
pub trait DataChannel: Send + Sync {
    /// Queues a message for sending.
    fn send(&self, payload: ChannelPayload)
        -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Bytes queued locally and not yet transmitted.
    fn buffered_amount(&self) -> Pin<Box<dyn Future<Output = usize> + Send + '_>>;

    /// Whether the channel can still carry messages.
    fn is_open(&self) -> bool;
}

/// Receiving half of a peer channel.
pub struct ChannelReceiver {
    rx: mpsc::UnboundedReceiver<ChannelEvent>,
    in_flight: Arc<AtomicUsize>,
}

impl ChannelReceiver {
    /// Wraps an event queue fed by a transport.
    pub fn new(rx: mpsc::UnboundedReceiver<ChannelEvent>) -> Self {
        Self {
            rx,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Waits for the next event. Returns `None` once the feeding side is gone.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        let event = self.rx.recv().await;
        if let Some(ChannelEvent::Message(payload)) = &event {
            self.in_flight.fetch_sub(payload.len(), Ordering::AcqRel);
        }
        event
    }
}

/// In-memory channel endpoint, one half of a [`memory_pair`].
///
/// Bytes sent count as buffered until the other side receives them.
pub struct MemoryChannel {
    peer_tx: mpsc::UnboundedSender<ChannelEvent>,
    in_flight: Arc<AtomicUsize>,
    open: Arc<AtomicBool>,
}

impl MemoryChannel {
    /// Closes both directions and notifies the other side.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.peer_tx.send(ChannelEvent::Closed);
        }
    }
}

impl DataChannel for MemoryChannel {
    fn send(
        &self,
        payload: ChannelPayload,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if !self.is_open() {
                return Err(ProtocolError::ConnectionClosed("channel closed".to_string()));
            }
            let len = payload.len();
            self.in_flight.fetch_add(len, Ordering::AcqRel);
            self.peer_tx
                .send(ChannelEvent::Message(payload))
                .map_err(|_| {
                    self.in_flight.fetch_sub(len, Ordering::AcqRel);
                    ProtocolError::ConnectionClosed("peer receiver dropped".to_string())
                })
        })
    }

    fn buffered_amount(&self) -> Pin<Box<dyn Future<Output = usize> + Send + '_>> {
        Box::pin(async move { self.in_flight.load(Ordering::Acquire) })
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

/// Creates two connected in-memory channel endpoints.
pub fn memory_pair() -> (
    (MemoryChannel, ChannelReceiver),
    (MemoryChannel, ChannelReceiver),
) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    let a_to_b = Arc::new(AtomicUsize::new(0));
    let b_to_a = Arc::new(AtomicUsize::new(0));
    let open = Arc::new(AtomicBool::new(true));

    let a = MemoryChannel {
        peer_tx: b_tx,
        in_flight: Arc::clone(&a_to_b),
        open: Arc::clone(&open),
    };
    let b = MemoryChannel {
        peer_tx: a_tx,
        in_flight: Arc::clone(&b_to_a),
        open,
    };

    let a_rx = ChannelReceiver {
        rx: a_rx,
        in_flight: b_to_a,
    };
    let b_rx = ChannelReceiver {
        rx: b_rx,
        in_flight: a_to_b,
    };

    ((a, a_rx), (b, b_rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_pair_delivers_in_order() {
        let ((a, _a_rx), (_b, mut b_rx)) = memory_pair();

        a.send(ChannelPayload::Text("first".to_string())).await.unwrap();
        a.send(ChannelPayload::Binary(Bytes::from_static(b"second")))
            .await
            .unwrap();

        assert_eq!(
            b_rx.recv().await,
            Some(ChannelEvent::Message(ChannelPayload::Text("first".to_string())))
        );
        assert_eq!(
            b_rx.recv().await,
            Some(ChannelEvent::Message(ChannelPayload::Binary(
                Bytes::from_static(b"second")
            )))
        );
    }

    #[tokio::test]
    async fn test_buffered_amount_tracks_unreceived_bytes() {
        let ((a, _a_rx), (_b, mut b_rx)) = memory_pair();

        a.send(ChannelPayload::Binary(Bytes::from(vec![0u8; 100])))
            .await
            .unwrap();
        a.send(ChannelPayload::Binary(Bytes::from(vec![0u8; 50])))
            .await
            .unwrap();
        assert_eq!(a.buffered_amount().await, 150);

        b_rx.recv().await.unwrap();
        assert_eq!(a.buffered_amount().await, 50);
        b_rx.recv().await.unwrap();
        assert_eq!(a.buffered_amount().await, 0);
    }

    #[tokio::test]
    async fn test_close_notifies_peer() {
        let ((a, _a_rx), (b, mut b_rx)) = memory_pair();

        a.close();
        assert!(!a.is_open());
        assert!(!b.is_open());
        assert_eq!(b_rx.recv().await, Some(ChannelEvent::Closed));

        let result = a.send(ChannelPayload::Text("late".to_string())).await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed(_))));
    }

    #[test]
    fn test_payload_len() {
        assert_eq!(ChannelPayload::Text("abc".to_string()).len(), 3);
        assert!(ChannelPayload::Binary(Bytes::new()).is_empty());
    }
}
