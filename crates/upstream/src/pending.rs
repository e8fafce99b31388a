use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use {tokio::sync::oneshot, uuid::Uuid};

use neurelay_protocol::NeuralResponse;

use crate::error::{Error, Result};

/// Write-once delivery slot for one in-flight request.
pub type Slot = oneshot::Sender<Result<NeuralResponse>>;

/// In-flight requests awaiting correlation by UUID.
///
/// At most one entry exists per UUID, and a slot is signalled at most once
/// because removal always precedes delivery. The mutex guards O(1) map
/// operations only and is never held across an await point.
#[derive(Default)]
pub struct PendingRegistry {
    slots: Mutex<HashMap<Uuid, Slot>>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `uuid`, failing if one is already in flight.
    pub fn insert_unique(&self, uuid: Uuid) -> Result<oneshot::Receiver<Result<NeuralResponse>>> {
        let (tx, rx) = oneshot::channel();
        let mut slots = self.lock();
        if slots.contains_key(&uuid) {
            return Err(Error::DuplicateUuid(uuid));
        }
        slots.insert(uuid, tx);
        Ok(rx)
    }

    /// Remove and return the waiter for `uuid`, if still registered.
    pub fn take(&self, uuid: &Uuid) -> Option<Slot> {
        self.lock().remove(uuid)
    }

    /// Drop the waiter for `uuid` without signalling it.
    pub fn remove(&self, uuid: &Uuid) {
        self.lock().remove(uuid);
    }

    /// Fail every in-flight request with `err`.
    ///
    /// Entries are drained under the lock and signalled after it is
    /// released.
    pub fn fail_all(&self, err: &Error) {
        let drained: Vec<Slot> = {
            let mut slots = self.lock();
            slots.drain().map(|(_, slot)| slot).collect()
        };
        for slot in drained {
            let _ = slot.send(Err(err.clone()));
        }
    }

    /// Number of requests currently awaiting a response.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn response(uuid: Uuid) -> NeuralResponse {
        NeuralResponse {
            uuid: uuid.to_string(),
            response: "ok".into(),
            created_at: "2024-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn duplicate_uuid_rejected() {
        let registry = PendingRegistry::new();
        let uuid = Uuid::new_v4();

        let _rx = registry.insert_unique(uuid).unwrap();
        assert_eq!(
            registry.insert_unique(uuid).map(|_| ()),
            Err(Error::DuplicateUuid(uuid))
        );
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn take_delivers_exactly_once() {
        let registry = PendingRegistry::new();
        let uuid = Uuid::new_v4();
        let rx = registry.insert_unique(uuid).unwrap();

        let slot = registry.take(&uuid).unwrap();
        assert!(registry.take(&uuid).is_none(), "slot removed on first take");

        slot.send(Ok(response(uuid))).unwrap();
        let delivered = rx.await.unwrap().unwrap();
        assert_eq!(delivered.uuid, uuid.to_string());
    }

    #[test]
    fn remove_drops_without_signal() {
        let registry = PendingRegistry::new();
        let uuid = Uuid::new_v4();
        let mut rx = registry.insert_unique(uuid).unwrap();

        registry.remove(&uuid);
        assert!(registry.is_empty());
        // The sender side is gone; the receiver observes closure, not a value.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn fail_all_drains_and_signals() {
        let registry = PendingRegistry::new();
        let receivers: Vec<_> = (0..4)
            .map(|_| registry.insert_unique(Uuid::new_v4()).unwrap())
            .collect();

        registry.fail_all(&Error::ConnectionLost("read error".into()));
        assert!(registry.is_empty());

        for rx in receivers {
            match rx.await.unwrap() {
                Err(Error::ConnectionLost(reason)) => assert_eq!(reason, "read error"),
                other => panic!("expected ConnectionLost, got {other:?}"),
            }
        }
    }

    #[test]
    fn uuid_reusable_after_removal() {
        let registry = PendingRegistry::new();
        let uuid = Uuid::new_v4();

        let _rx = registry.insert_unique(uuid).unwrap();
        registry.remove(&uuid);
        assert!(registry.insert_unique(uuid).is_ok());
    }
}
