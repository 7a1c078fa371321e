use actix_web::web::Bytes;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

use crate::cache::cache_service::{CacheError, ImageStore};
use crate::cache::models::{CachePolicy, CachedImage};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One slot per session; a new upload atomically replaces the previous one.
pub struct SessionImageStore {
    slots: Mutex<HashMap<Uuid, CachedImage>>,
    ttl: Duration,
    max_entries: usize,
}

impl SessionImageStore {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    fn make_room(&self, slots: &mut HashMap<Uuid, CachedImage>) {
        slots.retain(|_, entry| !entry.is_expired(self.ttl));
        while slots.len() >= self.max_entries {
            let oldest = slots
                .iter()
                .min_by_key(|(_, entry)| entry.created_at)
                .map(|(owner, _)| *owner);
            match oldest {
                Some(owner) => {
                    log::debug!("Image cache full, evicting session {}", owner);
                    slots.remove(&owner);
                }
                None => break,
            }
        }
    }
}

impl ImageStore for SessionImageStore {
    fn put(&self, entry: CachedImage) -> Result<String, CacheError> {
        let mut slots = lock(&self.slots);
        if !slots.contains_key(&entry.owner) {
            self.make_room(&mut slots);
        }
        let id = entry.id.clone();
        slots.insert(entry.owner, entry);
        Ok(id)
    }

    fn get(&self, owner: Uuid, image_id: &str) -> Result<Bytes, CacheError> {
        let mut slots = lock(&self.slots);
        let expired = match slots.get(&owner) {
            Some(entry) => entry.is_expired(self.ttl),
            None => return Err(CacheError::CacheMiss),
        };
        if expired {
            slots.remove(&owner);
            return Err(CacheError::CacheMiss);
        }
        match slots.get(&owner) {
            Some(entry) if entry.id == image_id => Ok(entry.png.clone()),
            _ => Err(CacheError::CacheMiss),
        }
    }

    fn evict_expired(&self) -> usize {
        let mut slots = lock(&self.slots);
        let before = slots.len();
        slots.retain(|_, entry| !entry.is_expired(self.ttl));
        before - slots.len()
    }

    fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    fn policy(&self) -> CachePolicy {
        CachePolicy::Session
    }
}

/// A single process-wide slot. Readers must present the exact id of the
/// current image, so an interleaved upload from another client turns into a
/// miss instead of serving that client's image.
pub struct SharedSlotStore {
    slot: Mutex<Option<CachedImage>>,
    ttl: Duration,
}

impl SharedSlotStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slot: Mutex::new(None),
            ttl,
        }
    }
}

impl ImageStore for SharedSlotStore {
    fn put(&self, entry: CachedImage) -> Result<String, CacheError> {
        let id = entry.id.clone();
        if let Some(previous) = lock(&self.slot).replace(entry) {
            log::debug!("Replaced shared image {}", previous.id);
        }
        Ok(id)
    }

    fn get(&self, _owner: Uuid, image_id: &str) -> Result<Bytes, CacheError> {
        let mut slot = lock(&self.slot);
        if slot.as_ref().is_some_and(|entry| entry.is_expired(self.ttl)) {
            *slot = None;
        }
        match slot.as_ref() {
            Some(entry) if entry.id == image_id => Ok(entry.png.clone()),
            _ => Err(CacheError::CacheMiss),
        }
    }

    fn evict_expired(&self) -> usize {
        let mut slot = lock(&self.slot);
        if slot.as_ref().is_some_and(|entry| entry.is_expired(self.ttl)) {
            *slot = None;
            1
        } else {
            0
        }
    }

    fn len(&self) -> usize {
        usize::from(lock(&self.slot).is_some())
    }

    fn policy(&self) -> CachePolicy {
        CachePolicy::Global
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(600);

    fn entry(owner: Uuid, payload: &'static [u8]) -> CachedImage {
        CachedImage::new(owner, "scan.png".to_string(), Bytes::from_static(payload))
    }

    #[test]
    fn sessions_are_isolated() {
        let store = SessionImageStore::new(TTL, 16);
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        let alice_id = store.put(entry(alice, b"alice")).unwrap();
        let bob_id = store.put(entry(bob, b"bob")).unwrap();

        assert_eq!(store.get(alice, &alice_id).unwrap(), Bytes::from_static(b"alice"));
        assert_eq!(store.get(bob, &bob_id).unwrap(), Bytes::from_static(b"bob"));
        assert!(matches!(store.get(bob, &alice_id), Err(CacheError::CacheMiss)));
        assert!(matches!(store.get(alice, &bob_id), Err(CacheError::CacheMiss)));
    }

    #[test]
    fn new_upload_overwrites_session_slot() {
        let store = SessionImageStore::new(TTL, 16);
        let owner = Uuid::new_v4();

        let first = store.put(entry(owner, b"first")).unwrap();
        let second = store.put(entry(owner, b"second")).unwrap();

        assert_eq!(store.len(), 1);
        assert!(matches!(store.get(owner, &first), Err(CacheError::CacheMiss)));
        assert_eq!(store.get(owner, &second).unwrap(), Bytes::from_static(b"second"));
    }

    #[test]
    fn capacity_evicts_oldest_session() {
        let store = SessionImageStore::new(TTL, 2);
        let owners: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let ids: Vec<String> = owners
            .iter()
            .map(|owner| {
                std::thread::sleep(Duration::from_millis(2));
                store.put(entry(*owner, b"x")).unwrap()
            })
            .collect();

        assert_eq!(store.len(), 2);
        assert!(store.get(owners[0], &ids[0]).is_err());
        assert!(store.get(owners[2], &ids[2]).is_ok());
    }

    #[test]
    fn expired_session_entry_is_a_miss() {
        let store = SessionImageStore::new(Duration::ZERO, 4);
        let owner = Uuid::new_v4();
        let id = store.put(entry(owner, b"x")).unwrap();
        assert!(matches!(store.get(owner, &id), Err(CacheError::CacheMiss)));
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn shared_slot_never_serves_another_clients_image() {
        let store = SharedSlotStore::new(TTL);
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        let alice_id = store.put(entry(alice, b"alice")).unwrap();
        let bob_id = store.put(entry(bob, b"bob")).unwrap();

        assert!(matches!(store.get(alice, &alice_id), Err(CacheError::CacheMiss)));
        assert_eq!(store.get(alice, &bob_id).unwrap(), Bytes::from_static(b"bob"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn shared_slot_expires() {
        let store = SharedSlotStore::new(Duration::ZERO);
        store.put(entry(Uuid::new_v4(), b"x")).unwrap();
        assert_eq!(store.evict_expired(), 1);
        assert_eq!(store.len(), 0);
    }
}
