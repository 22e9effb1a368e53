// Copyright 2022 The Matrix.org Foundation C.I.C.
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

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::EventError;

/// An encryption algorithm to be used to encrypt messages sent to a room.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum EventEncryptionAlgorithm {
    /// Megolm version 1 using AES-256 and SHA-256.
    MegolmV1AesSha2,
    /// Any other algorithm. Events using it are skipped.
    Unknown(String),
}

impl EventEncryptionAlgorithm {
    const MEGOLM_V1_AES_SHA2: &'static str = "m.megolm.v1.aes-sha2";

    /// The name of the algorithm as it appears in events.
    pub fn as_str(&self) -> &str {
        match self {
            EventEncryptionAlgorithm::MegolmV1AesSha2 => Self::MEGOLM_V1_AES_SHA2,
            EventEncryptionAlgorithm::Unknown(algorithm) => algorithm,
        }
    }

    /// Can events using this algorithm be decrypted with a backed up room
    /// key?
    pub fn is_supported(&self) -> bool {
        matches!(self, EventEncryptionAlgorithm::MegolmV1AesSha2)
    }
}

impl From<String> for EventEncryptionAlgorithm {
    fn from(value: String) -> Self {
        match value.as_str() {
            Self::MEGOLM_V1_AES_SHA2 => EventEncryptionAlgorithm::MegolmV1AesSha2,
            _ => EventEncryptionAlgorithm::Unknown(value),
        }
    }
}

impl From<&str> for EventEncryptionAlgorithm {
    fn from(value: &str) -> Self {
        value.to_owned().into()
    }
}

impl From<EventEncryptionAlgorithm> for String {
    fn from(value: EventEncryptionAlgorithm) -> Self {
        match value {
            EventEncryptionAlgorithm::MegolmV1AesSha2 => {
                EventEncryptionAlgorithm::MEGOLM_V1_AES_SHA2.to_owned()
            }
            EventEncryptionAlgorithm::Unknown(algorithm) => algorithm,
        }
    }
}

impl fmt::Display for EventEncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The content of an `m.room.encrypted` event.
#[derive(Deserialize)]
struct EncryptedEventContent {
    algorithm: EventEncryptionAlgorithm,
    #[serde(default)]
    ciphertext: Value,
    session_id: Option<String>,
    sender_key: Option<String>,
}

/// An `m.room.encrypted` room event that is waiting to be decrypted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedMessageEvent {
    /// The ID of the event.
    pub event_id: String,
    /// The room the event was sent in.
    pub room_id: String,
    /// The ID of the Megolm session the event was encrypted with.
    pub session_id: String,
    /// The algorithm the event was encrypted with.
    pub algorithm: EventEncryptionAlgorithm,
    /// The base64 encoded Megolm message.
    pub ciphertext: String,
    /// The Curve25519 key of the sending device, deprecated in newer events.
    pub sender_key: Option<String>,
}

impl EncryptedMessageEvent {
    /// Parse the JSON content of an `m.room.encrypted` event.
    ///
    /// Events using an unknown algorithm are accepted, as long as the content
    /// names the algorithm, so that they can be reported as skipped. Megolm
    /// events need a `ciphertext` string and a `session_id`.
    pub fn from_content(
        event_id: impl Into<String>,
        room_id: impl Into<String>,
        content: &str,
    ) -> Result<Self, EventError> {
        let content: EncryptedEventContent = serde_json::from_str(content)?;

        let (session_id, ciphertext) = if content.algorithm.is_supported() {
            let session_id = content.session_id.ok_or(EventError::MissingField("session_id"))?;
            let Value::String(ciphertext) = content.ciphertext else {
                return Err(EventError::MissingField("ciphertext"));
            };

            (session_id, ciphertext)
        } else {
            (content.session_id.unwrap_or_default(), String::new())
        };

        Ok(Self {
            event_id: event_id.into(),
            room_id: room_id.into(),
            session_id,
            algorithm: content.algorithm,
            ciphertext,
            sender_key: content.sender_key,
        })
    }

    /// The JSON content of the event.
    pub fn to_content(&self) -> Value {
        let mut content = json!({
            "algorithm": self.algorithm.as_str(),
            "ciphertext": self.ciphertext,
            "session_id": self.session_id,
        });

        if let Some(sender_key) = &self.sender_key {
            content["sender_key"] = sender_key.as_str().into();
        }

        content
    }
}

/// The plaintext of an event, ready to be stored next to the encrypted event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecryptedMessage {
    /// The ID of the event that was decrypted.
    pub event_id: String,
    /// The decrypted event, a JSON object.
    pub plaintext_json: String,
}

impl DecryptedMessage {
    /// Validate the decrypted payload of an event.
    ///
    /// The payload must be a JSON object, if it names a room that room must
    /// be the one the encrypted event was received in. Otherwise a
    /// server could replay a message from a different room.
    pub fn from_payload(
        event: &EncryptedMessageEvent,
        plaintext: &str,
    ) -> Result<Self, EventError> {
        let payload: Map<String, Value> = serde_json::from_str(plaintext)?;

        if let Some(room_id) = payload.get("room_id").and_then(Value::as_str) {
            if room_id != event.room_id {
                return Err(EventError::MismatchedRoom {
                    expected: event.room_id.clone(),
                    found: room_id.to_owned(),
                });
            }
        }

        Ok(Self { event_id: event.event_id.clone(), plaintext_json: plaintext.to_owned() })
    }
}
