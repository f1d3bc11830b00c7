//! Connected client registry
//!
//! Holds one entry per connected viewer, capped at `max_clients`. Admission
//! fails closed when the cap is reached; existing clients are never evicted
//! to make room.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::capture::EncodedFrame;
use crate::error::RegistryError;

pub type ClientId = Uuid;

/// Outcome of offering a frame to one client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Queued for the client's writer
    Queued,
    /// Client queue full; this frame is skipped for this client
    Skipped,
    /// Writer has gone away; the client should be removed
    Closed,
}

/// Registry entry for a connected client
#[derive(Clone)]
pub struct ClientHandle {
    pub id: ClientId,
    pub addr: SocketAddr,
    pub connected_at: DateTime<Utc>,
    frames: mpsc::Sender<Arc<EncodedFrame>>,
}

impl ClientHandle {
    pub fn new(addr: SocketAddr, frames: mpsc::Sender<Arc<EncodedFrame>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            addr,
            connected_at: Utc::now(),
            frames,
        }
    }

    /// Offer a frame without waiting
    pub fn offer(&self, frame: Arc<EncodedFrame>) -> Offer {
        match self.frames.try_send(frame) {
            Ok(()) => Offer::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Offer::Skipped,
            Err(mpsc::error::TrySendError::Closed(_)) => Offer::Closed,
        }
    }

    pub fn info(&self) -> ClientInfo {
        ClientInfo {
            id: self.id,
            addr: self.addr.to_string(),
            connected_at: self.connected_at,
        }
    }
}

impl std::fmt::Debug for ClientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .finish()
    }
}

/// Serializable client summary
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub id: ClientId,
    pub addr: String,
    pub connected_at: DateTime<Utc>,
}

/// Set of connected clients
pub struct ClientRegistry {
    clients: Mutex<HashMap<ClientId, ClientHandle>>,
    max_clients: usize,
    removed: Notify,
}

impl ClientRegistry {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            max_clients,
            removed: Notify::new(),
        }
    }

    /// Register a client. Returns the new client count, or
    /// [`RegistryError::RejectedFull`] without registering anything.
    pub fn add(&self, client: ClientHandle) -> Result<usize, RegistryError> {
        let mut clients = self.clients.lock();
        if clients.contains_key(&client.id) {
            return Ok(clients.len());
        }
        if clients.len() >= self.max_clients {
            return Err(RegistryError::RejectedFull(clients.len()));
        }
        clients.insert(client.id, client);
        Ok(clients.len())
    }

    /// Remove a client. Returns the removed handle, or `None` if it was not
    /// registered.
    pub fn remove(&self, id: &ClientId) -> Option<ClientHandle> {
        let removed = self.clients.lock().remove(id);
        if removed.is_some() {
            self.removed.notify_waiters();
        }
        removed
    }

    /// Copy of the current client set, safe to iterate without the lock
    pub fn snapshot(&self) -> Vec<ClientHandle> {
        self.clients.lock().values().cloned().collect()
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.clients.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    pub fn infos(&self) -> Vec<ClientInfo> {
        self.clients.lock().values().map(ClientHandle::info).collect()
    }

    /// Wait until every client has been removed. Returns `false` on timeout.
    pub async fn wait_until_empty(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.removed.notified();
                if self.is_empty() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

/// Thread-safe handle to a client registry
pub type SharedRegistry = Arc<ClientRegistry>;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:5555".parse().unwrap()
    }

    fn client() -> (ClientHandle, mpsc::Receiver<Arc<EncodedFrame>>) {
        let (tx, rx) = mpsc::channel(2);
        (ClientHandle::new(addr(), tx), rx)
    }

    #[test]
    fn test_add_until_full() {
        let registry = ClientRegistry::new(2);
        let (a, _ra) = client();
        let (b, _rb) = client();
        let (c, _rc) = client();

        assert_eq!(registry.add(a), Ok(1));
        assert_eq!(registry.add(b), Ok(2));
        assert_eq!(registry.add(c.clone()), Err(RegistryError::RejectedFull(2)));
        assert_eq!(registry.len(), 2);
        assert!(!registry.contains(&c.id));
    }

    #[test]
    fn test_duplicate_add_is_single_entry() {
        let registry = ClientRegistry::new(4);
        let (a, _ra) = client();
        registry.add(a.clone()).unwrap();
        registry.add(a).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = ClientRegistry::new(4);
        let (a, _ra) = client();
        let (never_added, _rn) = client();
        registry.add(a.clone()).unwrap();

        assert!(registry.remove(&a.id).is_some());
        assert!(registry.remove(&a.id).is_none());
        assert!(registry.remove(&never_added.id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_offer_outcomes() {
        let (tx, rx) = mpsc::channel(1);
        let handle = ClientHandle::new(addr(), tx);
        let frame = Arc::new(EncodedFrame {
            data: bytes::Bytes::from_static(b"x"),
            width: 1,
            height: 1,
            quality: 80,
            sequence: 1,
            captured_at: Utc::now(),
            detection: None,
        });

        assert_eq!(handle.offer(frame.clone()), Offer::Queued);
        assert_eq!(handle.offer(frame.clone()), Offer::Skipped);
        drop(rx);
        assert_eq!(handle.offer(frame), Offer::Closed);
    }

    #[tokio::test]
    async fn test_wait_until_empty() {
        let registry = Arc::new(ClientRegistry::new(4));
        let (a, _ra) = client();
        let id = a.id;
        registry.add(a).unwrap();

        assert!(!registry.wait_until_empty(Duration::from_millis(20)).await);

        let remover = {
            let registry = registry.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                registry.remove(&id);
            })
        };
        assert!(registry.wait_until_empty(Duration::from_secs(2)).await);
        remover.await.unwrap();
    }

    proptest! {
        #[test]
        fn prop_size_never_exceeds_cap(max in 1usize..8, ops in proptest::collection::vec(any::<bool>(), 1..64)) {
            let registry = ClientRegistry::new(max);
            let mut held = Vec::new();

            for add in ops {
                if add {
                    let (handle, rx) = client();
                    let before = registry.len();
                    match registry.add(handle.clone()) {
                        Ok(len) => {
                            prop_assert_eq!(len, before + 1);
                            held.push((handle, rx));
                        }
                        Err(RegistryError::RejectedFull(_)) => {
                            prop_assert_eq!(before, max);
                            prop_assert_eq!(registry.len(), before);
                        }
                    }
                } else if let Some((handle, _rx)) = held.pop() {
                    registry.remove(&handle.id);
                    registry.remove(&handle.id);
                }
                prop_assert!(registry.len() <= max);
            }
        }
    }
}
