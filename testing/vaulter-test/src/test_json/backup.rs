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

use once_cell::sync::Lazy;
use serde_json::{json, Value as JsonValue};

use crate::vectors;

/// `GET /_matrix/client/v3/room_keys/version` for the test backup.
pub static BACKUP_VERSION: Lazy<JsonValue> = Lazy::new(|| {
    json!({
        "algorithm": "m.megolm_backup.v1.curve25519-aes-sha2",
        "auth_data": {
            "public_key": vectors::BACKUP_PUBLIC_KEY,
            "signatures": {
                "@example:example.org": {
                    "ed25519:RJYKSTBOIE": "Z0Ofk3bSNhbTX6Rpvdx/hAvMTbyO1SPSNJ7nFDtcRsN3KkcOhuBtlTAUIrmhGUAYbqSCn6fpnrTPOVMsZILXBQ"
                }
            }
        },
        "count": 1,
        "etag": "1",
        "version": vectors::BACKUP_VERSION
    })
});

/// A backup version using an algorithm that isn't supported.
pub static UNSUPPORTED_BACKUP_VERSION: Lazy<JsonValue> = Lazy::new(|| {
    json!({
        "algorithm": "org.example.caesar.cipher",
        "auth_data": {
            "shift": 3
        },
        "count": 12,
        "etag": "4",
        "version": "7"
    })
});

/// `GET /_matrix/client/v3/room_keys/keys/{roomId}/{sessionId}` for the test
/// session.
pub static KEY_BACKUP_DATA: Lazy<JsonValue> = Lazy::new(|| {
    json!({
        "first_message_index": 0,
        "forwarded_count": 0,
        "is_verified": true,
        "session_data": {
            "ephemeral": vectors::EPHEMERAL_PUBLIC_KEY,
            "ciphertext": vectors::BACKUP_CIPHERTEXT,
            "mac": vectors::BACKUP_MAC
        }
    })
});

/// The error returned when no backup exists.
pub static NO_BACKUP: Lazy<JsonValue> = Lazy::new(|| {
    json!({
        "errcode": "M_NOT_FOUND",
        "error": "No current backup version"
    })
});

/// The error returned when the backup has no key for a session.
pub static ROOM_KEYS_NOT_FOUND: Lazy<JsonValue> = Lazy::new(|| {
    json!({
        "errcode": "M_NOT_FOUND",
        "error": "No room_keys found"
    })
});
