// Copyright 2024 The Matrix.org Foundation C.I.C.
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

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::{DecryptionStatus, EventStore, RawEvent, RoomStatus, UndecryptedEvents};
use crate::StoreError;

#[derive(Debug)]
struct StoredEvent {
    event: RawEvent,
    decrypted_content: Option<String>,
}

/// An in-memory only [`EventStore`].
///
/// Events are kept in insertion order, the backlog is sorted by the
/// `origin_server_ts` of the events.
#[derive(Debug, Default)]
pub struct MemoryEventStore {
    events: RwLock<Vec<StoredEvent>>,
}

impl MemoryEventStore {
    /// Create a new empty `MemoryEventStore`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event received from the homeserver to the store.
    ///
    /// Returns `false` if an event with the same ID was already stored.
    pub fn insert_raw_event(&self, event: RawEvent) -> bool {
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);

        if events.iter().any(|stored| stored.event.event_id == event.event_id) {
            false
        } else {
            events.push(StoredEvent { event, decrypted_content: None });
            true
        }
    }

    /// Get the decrypted content of an event, if it has been decrypted.
    pub fn decrypted_content(&self, event_id: &str) -> Option<String> {
        let events = self.events.read().unwrap_or_else(PoisonError::into_inner);

        events
            .iter()
            .find(|stored| stored.event.event_id == event_id)
            .and_then(|stored| stored.decrypted_content.clone())
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn undecrypted_events(
        &self,
        room_id: Option<&str>,
    ) -> Result<UndecryptedEvents, StoreError> {
        let mut backlog: Vec<_> = {
            let events = self.events.read().unwrap_or_else(PoisonError::into_inner);

            events
                .iter()
                .filter(|stored| stored.event.is_encrypted() && stored.decrypted_content.is_none())
                .filter(|stored| room_id.is_none_or(|room_id| stored.event.room_id == room_id))
                .map(|stored| {
                    (
                        stored.event.origin_server_ts,
                        stored.event.event_id.clone(),
                        stored.event.room_id.clone(),
                        stored.event.content.to_string(),
                    )
                })
                .collect()
        };

        // The sort is stable, events with the same timestamp keep their insertion order.
        backlog.sort_by_key(|(origin_server_ts, ..)| *origin_server_ts);

        let mut undecrypted = UndecryptedEvents::default();

        for (_, event_id, room_id, content) in backlog {
            undecrypted.push_stored(event_id, room_id, &content);
        }

        Ok(undecrypted)
    }

    async fn save_decrypted_content(
        &self,
        event_id: &str,
        plaintext_json: &str,
    ) -> Result<bool, StoreError> {
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);

        let stored = events
            .iter_mut()
            .find(|stored| stored.event.event_id == event_id && stored.decrypted_content.is_none());

        Ok(match stored {
            Some(stored) => {
                stored.decrypted_content = Some(plaintext_json.to_owned());
                true
            }
            None => false,
        })
    }

    async fn decryption_status(&self) -> Result<DecryptionStatus, StoreError> {
        let events = self.events.read().unwrap_or_else(PoisonError::into_inner);
        let mut rooms: Vec<RoomStatus> = Vec::new();

        for stored in events.iter().filter(|stored| stored.event.is_encrypted()) {
            let search = rooms.binary_search_by(|room| room.room_id.cmp(&stored.event.room_id));
            let position = match search {
                Ok(position) => position,
                Err(position) => {
                    rooms.insert(
                        position,
                        RoomStatus { room_id: stored.event.room_id.clone(), ..Default::default() },
                    );
                    position
                }
            };

            rooms[position].encrypted += 1;
            if stored.decrypted_content.is_some() {
                rooms[position].decrypted += 1;
            }
        }

        Ok(DecryptionStatus { rooms })
    }
}
