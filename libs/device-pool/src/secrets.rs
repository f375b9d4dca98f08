//! The record of which devices this client currently holds a lease on.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::models::{DeviceRef, ReservationSecret};

/// Thread-safe `DeviceRef -> ReservationSecret` map.
///
/// A device is present iff this client believes it holds a valid lease on
/// it. Reads are open to every [`Device`](crate::Device) handle; writes
/// happen only inside the reservation manager's critical section.
#[derive(Debug, Clone, Default)]
pub struct SecretStore {
    inner: Arc<RwLock<HashMap<DeviceRef, ReservationSecret>>>,
}

impl SecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, device: &DeviceRef) -> Option<ReservationSecret> {
        self.inner.read().get(device).cloned()
    }

    pub fn contains(&self, device: &DeviceRef) -> bool {
        self.inner.read().contains_key(device)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Devices with a secret on file, in sorted order.
    pub fn devices(&self) -> Vec<DeviceRef> {
        let mut devices: Vec<_> = self.inner.read().keys().cloned().collect();
        devices.sort();
        devices
    }

    pub(crate) fn insert(
        &self,
        device: DeviceRef,
        secret: ReservationSecret,
    ) -> Option<ReservationSecret> {
        self.inner.write().insert(device, secret)
    }

    pub(crate) fn remove(&self, device: &DeviceRef) -> Option<ReservationSecret> {
        self.inner.write().remove(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_replaces_secret() {
        let store = SecretStore::new();
        let dev = DeviceRef::new("acme", "stb-1");
        assert!(store.insert(dev.clone(), "a".into()).is_none());
        assert_eq!(store.insert(dev.clone(), "b".into()), Some("a".into()));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&dev), Some("b".into()));
    }

    #[test]
    fn test_clones_share_state() {
        let store = SecretStore::new();
        let view = store.clone();
        let dev = DeviceRef::new("acme", "stb-2");
        store.insert(dev.clone(), "s".into());
        assert!(view.contains(&dev));
        store.remove(&dev);
        assert!(view.is_empty());
    }

    #[test]
    fn test_devices_sorted() {
        let store = SecretStore::new();
        store.insert(DeviceRef::new("acme", "b"), "1".into());
        store.insert(DeviceRef::new("acme", "a"), "2".into());
        let devices = store.devices();
        assert_eq!(devices[0].device, "a");
        assert_eq!(devices[1].device, "b");
    }
}
