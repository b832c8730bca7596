//! Shared state of the signaling relay.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use super::error::RelayError;
use super::types::{ConnectedPeer, ConnectionId};
use super::validation::validate_peer_id;

/// Registry of peers plus admission bookkeeping.
pub struct RelayState {
    pub peers: RwLock<HashMap<String, ConnectedPeer>>,
    pub max_clients: usize,
    active_clients: AtomicUsize,
    next_connection_id: AtomicU64,
}

/// Admission of one connection; frees the slot when dropped.
pub struct ClientSlot {
    state: Arc<RelayState>,
}

impl Drop for ClientSlot {
    fn drop(&mut self) {
        self.state.active_clients.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RelayState {
    pub fn new(max_clients: usize) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            max_clients,
            active_clients: AtomicUsize::new(0),
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Reserves a connection slot, or `None` when the relay is full.
    pub fn try_admit(self: &Arc<Self>) -> Option<ClientSlot> {
        let max = self.max_clients;
        self.active_clients
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |active| {
                (active < max).then_some(active + 1)
            })
            .ok()
            .map(|_| ClientSlot {
                state: Arc::clone(self),
            })
    }

    pub fn active_clients(&self) -> usize {
        self.active_clients.load(Ordering::SeqCst)
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_connection_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Maps `peer_id` to the outbound queue of `connection_id`.
    ///
    /// Re-registering from the same connection replaces the entry; an
    /// identifier owned by another connection is refused.
    pub fn register(
        &self,
        peer_id: &str,
        connection_id: ConnectionId,
        sender: Sender<String>,
    ) -> Result<(), RelayError> {
        validate_peer_id(peer_id)?;

        let mut peers = self.peers.write().map_err(|_| RelayError::LockPoisoned)?;
        if let Some(existing) = peers.get(peer_id) {
            if existing.connection_id != connection_id {
                return Err(RelayError::PeerIdTaken(peer_id.to_string()));
            }
        }
        peers.insert(
            peer_id.to_string(),
            ConnectedPeer {
                connection_id,
                sender,
            },
        );
        info!(%peer_id, connection_id, "peer registered");
        Ok(())
    }

    /// Removes `peer_id` only while it still belongs to `connection_id`.
    pub fn unregister(&self, peer_id: &str, connection_id: ConnectionId) -> bool {
        let Ok(mut peers) = self.peers.write() else {
            return false;
        };
        match peers.get(peer_id) {
            Some(peer) if peer.connection_id == connection_id => {
                peers.remove(peer_id);
                debug!(%peer_id, connection_id, "peer unregistered");
                true
            }
            _ => false,
        }
    }

    pub fn sender_for(&self, peer_id: &str) -> Option<Sender<String>> {
        self.peers
            .read()
            .ok()
            .and_then(|peers| peers.get(peer_id).map(|peer| peer.sender.clone()))
    }

    pub fn registered_count(&self) -> usize {
        self.peers.read().map(|peers| peers.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    const ALICE: &str = "aliceAlice12345";
    const BOB: &str = "bobBobBob123456";

    #[test]
    fn test_register_and_lookup() {
        let state = RelayState::new(10);
        let (tx, rx) = mpsc::channel();

        state.register(ALICE, 1, tx).unwrap();
        state.sender_for(ALICE).unwrap().send("hi".to_string()).unwrap();

        assert_eq!(rx.recv().unwrap(), "hi");
        assert!(state.sender_for(BOB).is_none());
    }

    #[test]
    fn test_duplicate_id_refused() {
        let state = RelayState::new(10);
        let (tx1, _rx1) = mpsc::channel();
        let (tx2, _rx2) = mpsc::channel();

        state.register(ALICE, 1, tx1.clone()).unwrap();
        assert!(matches!(
            state.register(ALICE, 2, tx2),
            Err(RelayError::PeerIdTaken(_))
        ));
        // Same connection may register again.
        assert!(state.register(ALICE, 1, tx1).is_ok());
    }

    #[test]
    fn test_unregister_requires_owner() {
        let state = RelayState::new(10);
        let (tx, _rx) = mpsc::channel();
        state.register(ALICE, 1, tx).unwrap();

        assert!(!state.unregister(ALICE, 2));
        assert!(state.sender_for(ALICE).is_some());
        assert!(state.unregister(ALICE, 1));
        assert!(state.sender_for(ALICE).is_none());
    }

    #[test]
    fn test_invalid_id_rejected() {
        let state = RelayState::new(10);
        let (tx, _rx) = mpsc::channel();
        assert!(matches!(
            state.register("bad id", 1, tx),
            Err(RelayError::InvalidPeerId(_))
        ));
    }

    #[test]
    fn test_admission_limit() {
        let state = Arc::new(RelayState::new(2));
        let first = state.try_admit();
        let second = state.try_admit();
        assert!(first.is_some() && second.is_some());
        assert!(state.try_admit().is_none());

        drop(first);
        assert!(state.try_admit().is_some());
    }

    #[test]
    fn test_concurrent_registration_is_isolated() {
        let state = Arc::new(RelayState::new(100));
        let handles: Vec<_> = (0..32u64)
            .map(|i| {
                let state = Arc::clone(&state);
                thread::spawn(move || {
                    let (tx, rx) = mpsc::channel();
                    let peer_id = format!("peer{:012}", i);
                    state.register(&peer_id, i, tx).unwrap();
                    (peer_id, rx)
                })
            })
            .collect();
        let peers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(state.registered_count(), 32);
        for (peer_id, _) in &peers {
            state
                .sender_for(peer_id)
                .unwrap()
                .send(peer_id.clone())
                .unwrap();
        }
        for (peer_id, rx) in &peers {
            assert_eq!(&rx.try_recv().unwrap(), peer_id);
            assert!(rx.try_recv().is_err());
        }
    }
}
