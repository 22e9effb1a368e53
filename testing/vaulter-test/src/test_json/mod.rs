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

//! Responses of the key backup API.
//!
//! Exporting each const allows all the test data to have a single source of
//! truth for the client and the orchestrator tests.

use once_cell::sync::Lazy;
use serde_json::{json, Value as JsonValue};

use crate::vectors;

pub mod backup;

pub use backup::{
    BACKUP_VERSION, KEY_BACKUP_DATA, NO_BACKUP, ROOM_KEYS_NOT_FOUND, UNSUPPORTED_BACKUP_VERSION,
};

/// An empty response.
pub static EMPTY: Lazy<JsonValue> = Lazy::new(|| json!({}));

/// `M_LIMIT_EXCEEDED` error response.
pub static LIMIT_EXCEEDED: Lazy<JsonValue> = Lazy::new(|| {
    json!({
        "errcode": "M_LIMIT_EXCEEDED",
        "error": "Too many requests",
        "retry_after_ms": 10
    })
});

/// An `m.room.encrypted` event carrying [`vectors::MEGOLM_MESSAGE_AT_0`].
pub static ENCRYPTED_EVENT: Lazy<JsonValue> = Lazy::new(|| {
    json!({
        "type": "m.room.encrypted",
        "event_id": "$143273582443PhrSn:example.org",
        "room_id": vectors::BACKUP_ROOM_ID,
        "sender": "@example:example.org",
        "origin_server_ts": 1432735824653u64,
        "content": {
            "algorithm": "m.megolm.v1.aes-sha2",
            "ciphertext": vectors::MEGOLM_MESSAGE_AT_0,
            "device_id": "RJYKSTBOIE",
            "sender_key": "XjhWTCjW7l59pbfx9tlCBQolfnIQWARoKOzjTOPSlWM",
            "session_id": vectors::MEGOLM_SESSION_ID
        }
    })
});

/// An `m.room.encrypted` event using Olm, which only exists in to-device
/// messages and can't be decrypted with a room key.
pub static OLM_ENCRYPTED_EVENT: Lazy<JsonValue> = Lazy::new(|| {
    json!({
        "type": "m.room.encrypted",
        "event_id": "$143273582443PhrSo:example.org",
        "room_id": vectors::BACKUP_ROOM_ID,
        "sender": "@example:example.org",
        "origin_server_ts": 1432735824654u64,
        "content": {
            "algorithm": "m.olm.v1.curve25519-aes-sha2",
            "sender_key": "XjhWTCjW7l59pbfx9tlCBQolfnIQWARoKOzjTOPSlWM",
            "ciphertext": {
                "XjhWTCjW7l59pbfx9tlCBQolfnIQWARoKOzjTOPSlWM": {
                    "type": 0,
                    "body": "AwogkA"
                }
            }
        }
    })
});
