//! In-process relay for tests, benchmarks and single-machine sessions.
//!
//! Peers push frames up an unbounded queue; the relay side drains it with a
//! [`ReplicationChannel`](crate::channel::ReplicationChannel) in the relay
//! role and fans each frame back out through a [`BroadcastGroup`].

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::broadcast::BroadcastGroup;
use crate::channel::Transport;
use crate::protocol::ProtocolError;

/// Build a relay with `capacity` frames of per-peer buffering.
pub fn local_relay(capacity: usize) -> (LocalRelayTransport, LocalConnector) {
    let (uplink_tx, uplink_rx) = mpsc::unbounded_channel();
    let group = Arc::new(BroadcastGroup::new(capacity));
    (
        LocalRelayTransport {
            uplink: uplink_rx,
            group: group.clone(),
        },
        LocalConnector {
            uplink: uplink_tx,
            group,
        },
    )
}

/// Relay end: reads every peer's uplink, writes to the shared group.
pub struct LocalRelayTransport {
    uplink: mpsc::UnboundedReceiver<Arc<Vec<u8>>>,
    group: Arc<BroadcastGroup>,
}

impl LocalRelayTransport {
    pub fn group(&self) -> &Arc<BroadcastGroup> {
        &self.group
    }
}

impl Transport for LocalRelayTransport {
    fn send(&mut self, _frame: Arc<Vec<u8>>) -> Result<(), ProtocolError> {
        Err(ProtocolError::WrongRole("send"))
    }

    fn poll(&mut self) -> Option<Arc<Vec<u8>>> {
        self.uplink.try_recv().ok()
    }

    fn broadcast(&mut self, frame: Arc<Vec<u8>>) -> Result<usize, ProtocolError> {
        Ok(self.group.broadcast_raw(frame))
    }

    fn is_open(&self) -> bool {
        true
    }
}

/// Hands out peer transports attached to one relay.
#[derive(Clone)]
pub struct LocalConnector {
    uplink: mpsc::UnboundedSender<Arc<Vec<u8>>>,
    group: Arc<BroadcastGroup>,
}

impl LocalConnector {
    /// A new peer only sees frames relayed after it connects.
    pub fn connect(&self) -> LocalPeerTransport {
        LocalPeerTransport {
            uplink: self.uplink.clone(),
            downlink: self.group.subscribe(),
            group: self.group.clone(),
            open: true,
        }
    }
}

pub struct LocalPeerTransport {
    uplink: mpsc::UnboundedSender<Arc<Vec<u8>>>,
    downlink: broadcast::Receiver<Arc<Vec<u8>>>,
    group: Arc<BroadcastGroup>,
    open: bool,
}

impl LocalPeerTransport {
    /// Simulate a dropped connection.
    pub fn close(&mut self) {
        self.open = false;
    }
}

impl Transport for LocalPeerTransport {
    fn send(&mut self, frame: Arc<Vec<u8>>) -> Result<(), ProtocolError> {
        if !self.open {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.uplink
            .send(frame)
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    fn poll(&mut self) -> Option<Arc<Vec<u8>>> {
        if !self.open {
            return None;
        }
        loop {
            match self.downlink.try_recv() {
                Ok(frame) => return Some(frame),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    log::warn!("Local peer lagged, {} frame(s) lost", skipped);
                    self.group.record_lag(skipped);
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Closed) => {
                    self.open = false;
                    return None;
                }
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open && !self.uplink.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ReplicationChannel;

    #[test]
    fn test_frames_reach_every_peer_through_relay() {
        let (relay_side, connector) = local_relay(16);
        let mut relay: ReplicationChannel<()> =
            ReplicationChannel::relay(uuid::Uuid::nil(), uuid::Uuid::nil(), relay_side);
        let mut a = connector.connect();
        let mut b = connector.connect();

        let frame = crate::protocol::SyncMessage::ping(uuid::Uuid::new_v4())
            .encode()
            .unwrap();
        a.send(Arc::new(frame.clone())).unwrap();
        assert!(b.poll().is_none());

        assert_eq!(relay.drain_into(&mut ()), 1);
        assert_eq!(*a.poll().unwrap(), frame);
        assert_eq!(*b.poll().unwrap(), frame);
        assert!(b.poll().is_none());
    }

    #[test]
    fn test_relay_side_cannot_send() {
        let (mut relay_side, _connector) = local_relay(4);
        assert_eq!(
            relay_side.send(Arc::new(vec![1])),
            Err(ProtocolError::WrongRole("send"))
        );
    }

    #[test]
    fn test_lagging_peer_skips_to_newest() {
        let (mut relay_side, connector) = local_relay(2);
        let mut peer = connector.connect();
        for i in 0..4u8 {
            relay_side.broadcast(Arc::new(vec![i])).unwrap();
        }

        assert_eq!(*peer.poll().unwrap(), vec![2]);
        assert_eq!(*peer.poll().unwrap(), vec![3]);
        assert!(peer.poll().is_none());
        assert!(peer.is_open());
    }

    #[test]
    fn test_closed_peer() {
        let (_relay_side, connector) = local_relay(4);
        let mut peer = connector.connect();
        peer.close();
        assert!(!peer.is_open());
        assert_eq!(
            peer.send(Arc::new(vec![1])),
            Err(ProtocolError::ConnectionClosed)
        );
    }

    #[test]
    fn test_dropped_relay_closes_uplink() {
        let (relay_side, connector) = local_relay(4);
        let peer = connector.connect();
        drop(relay_side);
        assert!(!peer.is_open());
    }
}
