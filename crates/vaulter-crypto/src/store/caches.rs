// Copyright 2020 The Matrix.org Foundation C.I.C.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Collection of small in-memory stores that can be used to cache recovered
//! room keys.

use std::{
    collections::{hash_map::Entry, HashMap},
    sync::{Arc, PoisonError, RwLock},
};

use tracing::debug;

use crate::types::RecoveredSessionKey;

#[derive(Debug, Default)]
struct CacheEntries {
    version: Option<String>,
    keys: HashMap<(String, String), Arc<RecoveredSessionKey>>,
}

/// In-memory store that holds the room keys recovered from one backup
/// version.
///
/// Lookups never touch the network or run any cryptographic operation.
/// Switching to a different backup version drops every cached key.
#[derive(Debug, Default)]
pub struct SessionKeyCache {
    entries: RwLock<CacheEntries>,
}

impl SessionKeyCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The backup version the cached keys were recovered from.
    pub fn version(&self) -> Option<String> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).version.clone()
    }

    /// Get the recovered key of a session.
    pub fn get(&self, room_id: &str, session_id: &str) -> Option<Arc<RecoveredSessionKey>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys
            .get(&(room_id.to_owned(), session_id.to_owned()))
            .cloned()
    }

    /// Add a key recovered from the given backup version to the cache.
    ///
    /// Returns true if the key was added, false if a key for the same session
    /// was already in the cache or if the cache is scoped to another backup
    /// version. The key already in the cache is kept.
    pub fn insert(&self, backup_version: &str, key: Arc<RecoveredSessionKey>) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        if entries.version.as_deref() != Some(backup_version) {
            debug!(
                cache_version = entries.version.as_deref(),
                backup_version,
                session_id = key.session_id(),
                "Not caching a room key recovered from another backup version"
            );
            return false;
        }

        let cache_key = (key.room_id().to_owned(), key.session_id().to_owned());

        match entries.keys.entry(cache_key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(key);
                true
            }
        }
    }

    /// Scope the cache to the given backup version.
    ///
    /// If the cache holds keys of a different version they are all dropped.
    /// Returns true if keys were dropped.
    pub fn invalidate_all(&self, backup_version: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        if entries.version.as_deref() == Some(backup_version) {
            return false;
        }

        let dropped = entries.keys.len();

        if dropped > 0 {
            debug!(
                old_version = entries.version.as_deref(),
                new_version = backup_version,
                dropped,
                "The backup version changed, dropping cached room keys"
            );
        }

        entries.keys.clear();
        entries.version = Some(backup_version.to_owned());

        dropped > 0
    }

    /// Remove every key from the cache.
    ///
    /// The key material is erased once the last reference to a key is
    /// dropped.
    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        entries.keys.clear();
        entries.version = None;
    }

    /// The number of keys in the cache.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).keys.len()
    }

    /// Is the cache empty?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, sync::Arc};

    use vaulter_test::vectors;

    use super::SessionKeyCache;
    use crate::types::{
        BackedUpRoomKey, EncryptedSessionExport, EventEncryptionAlgorithm, RecoveredSessionKey,
    };

    fn recovered(
        room_id: &str,
        session_id: &str,
        forwarded_count: u32,
    ) -> Arc<RecoveredSessionKey> {
        let export = EncryptedSessionExport {
            room_id: room_id.to_owned(),
            session_id: session_id.to_owned(),
            ephemeral: [9u8; 32],
            ciphertext: Vec::new(),
            mac: [0u8; 8],
            first_message_index: 0,
            forwarded_count,
            is_verified: false,
        };
        let room_key = BackedUpRoomKey {
            algorithm: EventEncryptionAlgorithm::MegolmV1AesSha2,
            sender_key: "XjhWTCjW7l59pbfx9tlCBQolfnIQWARoKOzjTOPSlWM".to_owned(),
            session_key: vectors::MEGOLM_EXPORTED_SESSION_KEY.to_owned(),
            sender_claimed_keys: BTreeMap::new(),
            forwarding_curve25519_key_chain: Vec::new(),
        };

        Arc::new(RecoveredSessionKey::new(&export, room_key, 0))
    }

    #[test]
    fn first_writer_wins() {
        let cache = SessionKeyCache::new();
        cache.invalidate_all("1");

        assert!(cache.is_empty());
        assert!(cache.insert("1", recovered("!a:example.org", "session", 0)));
        assert!(!cache.insert("1", recovered("!a:example.org", "session", 1)));
        assert!(cache.insert("1", recovered("!b:example.org", "session", 2)));

        assert_eq!(cache.len(), 2);

        let cached = cache.get("!a:example.org", "session").unwrap();
        assert_eq!(cached.forwarded_count(), 0);
        assert!(cache.get("!c:example.org", "session").is_none());
    }

    #[test]
    fn switching_versions_drops_everything() {
        let cache = SessionKeyCache::new();

        assert!(!cache.invalidate_all("1"));
        cache.insert("1", recovered("!a:example.org", "session", 0));

        assert!(!cache.invalidate_all("1"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.version().as_deref(), Some("1"));

        assert!(cache.invalidate_all("2"));
        assert!(cache.is_empty());
        assert!(cache.get("!a:example.org", "session").is_none());
        assert_eq!(cache.version().as_deref(), Some("2"));
    }

    #[test]
    fn clearing_keeps_outstanding_references_alive() {
        let cache = SessionKeyCache::new();
        cache.invalidate_all("1");
        cache.insert("1", recovered("!a:example.org", "session", 0));

        let key = cache.get("!a:example.org", "session").unwrap();
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.version(), None);
        assert_eq!(key.session_key(), vectors::MEGOLM_EXPORTED_SESSION_KEY);
    }

    #[test]
    fn concurrent_inserts_keep_a_single_entry() {
        let cache = Arc::new(SessionKeyCache::new());
        cache.invalidate_all("1");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    cache.insert("1", recovered("!a:example.org", "session", i))
                })
            })
            .collect();

        let inserted =
            handles.into_iter().map(|h| h.join().unwrap()).filter(|inserted| *inserted).count();

        assert_eq!(inserted, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn keys_of_another_version_are_rejected() {
        let cache = SessionKeyCache::new();

        assert!(!cache.insert("1", recovered("!a:example.org", "session", 0)));
        assert!(cache.is_empty());

        cache.invalidate_all("2");

        assert!(!cache.insert("1", recovered("!a:example.org", "session", 0)));
        assert!(cache.is_empty());
        assert_eq!(cache.version().as_deref(), Some("2"));

        assert!(cache.insert("2", recovered("!a:example.org", "session", 0)));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(!cache.insert("2", recovered("!a:example.org", "session", 1)));
        assert!(cache.is_empty());
    }
}
