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

//! Storage of the events waiting for their decryption.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;
use vaulter_crypto::{types::EncryptedMessageEvent, EventError};

use crate::{AsyncTraitDeps, StoreError};

mod memory;
mod sqlite;

pub use memory::MemoryEventStore;
pub use sqlite::SqliteEventStore;

/// The event type of encrypted room events.
pub const ENCRYPTED_EVENT_TYPE: &str = "m.room.encrypted";

/// A room event as received from the homeserver.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RawEvent {
    /// The ID of the event.
    pub event_id: String,
    /// The room the event was sent in.
    pub room_id: String,
    /// The user that sent the event.
    pub sender: String,
    /// The type of the event, e.g. `m.room.encrypted`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// The content of the event.
    pub content: serde_json::Value,
    /// The timestamp of the event on the originating homeserver, in
    /// milliseconds since the unix epoch.
    pub origin_server_ts: u64,
}

impl RawEvent {
    /// Is this an encrypted room event?
    pub fn is_encrypted(&self) -> bool {
        self.event_type == ENCRYPTED_EVENT_TYPE
    }
}

/// An encrypted event together with its stored plaintext.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DecryptedEvent {
    /// The ID of the event.
    pub event_id: String,
    /// The room the event was sent in.
    pub room_id: String,
    /// The user that sent the event.
    pub sender: String,
    /// The timestamp of the event on the originating homeserver, in
    /// milliseconds since the unix epoch.
    pub origin_server_ts: u64,
    /// The decrypted payload, with the `type` and `content` of the event.
    pub plaintext_json: String,
}

/// How many encrypted events of a room have been decrypted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RoomStatus {
    /// The room.
    pub room_id: String,
    /// The number of encrypted events in the room.
    pub encrypted: u64,
    /// The number of encrypted events that have been decrypted.
    pub decrypted: u64,
}

impl RoomStatus {
    /// The number of events still waiting for their decryption.
    pub fn remaining(&self) -> u64 {
        self.encrypted.saturating_sub(self.decrypted)
    }
}

/// The decryption progress of every room of an [`EventStore`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DecryptionStatus {
    /// The rooms containing encrypted events, sorted by room ID.
    pub rooms: Vec<RoomStatus>,
}

impl DecryptionStatus {
    /// The number of encrypted events in all rooms.
    pub fn total_encrypted(&self) -> u64 {
        self.rooms.iter().map(|room| room.encrypted).sum()
    }

    /// The number of decrypted events in all rooms.
    pub fn total_decrypted(&self) -> u64 {
        self.rooms.iter().map(|room| room.decrypted).sum()
    }
}

/// A stored encrypted event whose content couldn't be parsed.
#[derive(Debug)]
pub struct MalformedEvent {
    /// The ID of the event.
    pub event_id: String,
    /// The room the event was sent in.
    pub room_id: String,
    /// The Megolm session named by the content, empty if there is none.
    pub session_id: String,
    /// Why the content couldn't be parsed.
    pub error: EventError,
}

/// The encrypted events of a store that are waiting for their decryption.
#[derive(Debug, Default)]
pub struct UndecryptedEvents {
    /// The parsed events, oldest first.
    pub events: Vec<EncryptedMessageEvent>,
    /// The events whose content couldn't be parsed, oldest first.
    pub malformed: Vec<MalformedEvent>,
}

impl UndecryptedEvents {
    /// The number of events waiting for their decryption, malformed ones
    /// included.
    pub fn len(&self) -> usize {
        self.events.len() + self.malformed.len()
    }

    /// Is nothing waiting for its decryption?
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parse the content of a stored encrypted event and add it to the
    /// backlog.
    pub(crate) fn push_stored(&mut self, event_id: String, room_id: String, content: &str) {
        match EncryptedMessageEvent::from_content(&event_id, &room_id, content) {
            Ok(event) => self.events.push(event),
            Err(error) => {
                warn!(%event_id, %error, "A stored encrypted event couldn't be parsed");

                let session_id = serde_json::from_str::<serde_json::Value>(content)
                    .ok()
                    .and_then(|content| content["session_id"].as_str().map(ToOwned::to_owned))
                    .unwrap_or_default();

                self.malformed.push(MalformedEvent { event_id, room_id, session_id, error });
            }
        }
    }
}

impl From<Vec<EncryptedMessageEvent>> for UndecryptedEvents {
    fn from(events: Vec<EncryptedMessageEvent>) -> Self {
        Self { events, malformed: Vec::new() }
    }
}

/// The local store of room events.
#[async_trait]
pub trait EventStore: AsyncTraitDeps {
    /// Get the encrypted events that haven't been decrypted yet, oldest first.
    ///
    /// Events whose content can't be parsed are returned separately, they
    /// stay undecrypted and need to be reported.
    ///
    /// # Arguments
    ///
    /// * `room_id` - Only return the events of this room, if set.
    async fn undecrypted_events(
        &self,
        room_id: Option<&str>,
    ) -> Result<UndecryptedEvents, StoreError>;

    /// Store the plaintext of an encrypted event.
    ///
    /// Returns `false` if the event already had a plaintext, or if the event
    /// isn't known, in which case nothing is changed.
    async fn save_decrypted_content(
        &self,
        event_id: &str,
        plaintext_json: &str,
    ) -> Result<bool, StoreError>;

    /// Get the decryption progress of every room.
    async fn decryption_status(&self) -> Result<DecryptionStatus, StoreError>;
}
