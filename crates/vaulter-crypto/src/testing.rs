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

//! Builders producing backups and encrypted events that match each other.
//!
//! Every session is created with a fresh Megolm ratchet and every backup with
//! a fresh recovery key, tests that need fixed values use the vectors of
//! `vaulter-test` instead.

use std::collections::{BTreeMap, HashMap};

use rand::rngs::OsRng;
use serde_json::{json, Value};
use x25519_dalek::StaticSecret;

use crate::{
    backups::{BackupPublicKey, RecoveryKey},
    megolm::{ExportedSessionKey, GroupSession, SessionConfig},
    types::{
        BackedUpRoomKey, BackupDescriptor, EncryptedMessageEvent, EncryptedSessionExport,
        EventEncryptionAlgorithm, MegolmV1AuthData, RoomKeyBackupInfo,
    },
};

const SENDER_KEY: &str = "XjhWTCjW7l59pbfx9tlCBQolfnIQWARoKOzjTOPSlWM";

struct FixtureSession {
    room_id: String,
    session: GroupSession,
    initial_key: ExportedSessionKey,
}

/// A server-side backup together with the sessions backed up in it.
#[allow(missing_debug_implementations)]
pub struct BackupFixture {
    recovery_key: RecoveryKey,
    public_key: BackupPublicKey,
    version: String,
    sessions: HashMap<String, FixtureSession>,
}

impl BackupFixture {
    /// Create an empty backup with a random recovery key.
    pub fn new(version: &str) -> Self {
        let recovery_key = RecoveryKey::new();
        let public_key = BackupPublicKey::from(&StaticSecret::from(*recovery_key.as_bytes()));

        Self { recovery_key, public_key, version: version.to_owned(), sessions: HashMap::new() }
    }

    /// The recovery key of the backup, as it would be shown to the user.
    pub fn recovery_key(&self) -> String {
        self.recovery_key.to_string()
    }

    /// The public key of the backup.
    pub fn public_key(&self) -> BackupPublicKey {
        self.public_key
    }

    /// The backup version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// The descriptor the server would publish for this backup.
    pub fn descriptor(&self) -> BackupDescriptor {
        BackupDescriptor {
            version: self.version.clone(),
            algorithm: RoomKeyBackupInfo::MegolmBackupV1Curve25519AesSha2(MegolmV1AuthData::new(
                self.public_key,
            )),
            count: self.sessions.len() as u64,
            etag: Some(self.sessions.len().to_string()),
        }
    }

    /// Create a new Megolm session for the given room and back it up.
    ///
    /// Returns the session ID.
    pub fn create_session(&mut self, room_id: &str) -> String {
        let session = GroupSession::new(SessionConfig::version_1());
        let session_id = session.session_id();
        let initial_key = session.export();

        self.sessions.insert(
            session_id.clone(),
            FixtureSession { room_id: room_id.to_owned(), session, initial_key },
        );

        session_id
    }

    /// Encrypt a text message with the session.
    pub fn encrypt_event(
        &mut self,
        session_id: &str,
        event_id: &str,
        body: &str,
    ) -> EncryptedMessageEvent {
        let room_id = self.session(session_id).room_id.clone();
        let payload = json!({
            "type": "m.room.message",
            "content": {
                "msgtype": "m.text",
                "body": body,
            },
            "room_id": room_id,
        });

        self.encrypt_payload(session_id, event_id, &payload)
    }

    /// Encrypt an arbitrary payload with the session.
    pub fn encrypt_payload(
        &mut self,
        session_id: &str,
        event_id: &str,
        payload: &Value,
    ) -> EncryptedMessageEvent {
        let session = self
            .sessions
            .get_mut(session_id)
            .unwrap_or_else(|| panic!("Unknown fixture session {session_id}"));
        let message = session.session.encrypt(payload.to_string());

        EncryptedMessageEvent {
            event_id: event_id.to_owned(),
            room_id: session.room_id.clone(),
            session_id: session_id.to_owned(),
            algorithm: EventEncryptionAlgorithm::MegolmV1AesSha2,
            ciphertext: message.to_base64(),
            sender_key: Some(SENDER_KEY.to_owned()),
        }
    }

    /// The plaintext room key of the session, as it is stored in the backup.
    pub fn room_key(&self, session_id: &str) -> BackedUpRoomKey {
        let session = self.session(session_id);

        BackedUpRoomKey {
            algorithm: EventEncryptionAlgorithm::MegolmV1AesSha2,
            sender_key: SENDER_KEY.to_owned(),
            session_key: session.initial_key.to_base64().to_string(),
            sender_claimed_keys: BTreeMap::from([(
                "ed25519".to_owned(),
                session_id.to_owned(),
            )]),
            forwarding_curve25519_key_chain: Vec::new(),
        }
    }

    /// Encrypt the room key of the session for the backup.
    pub fn export(&self, session_id: &str) -> EncryptedSessionExport {
        let session = self.session(session_id);

        self.public_key.encrypt_session(
            session.room_id.as_str(),
            session_id,
            &self.room_key(session_id),
            session.initial_key.ratchet_index(),
        )
    }

    /// Encrypt the room keys of the given sessions under a single ephemeral
    /// key.
    ///
    /// Every export on its own authenticates against the backup key, only the
    /// shared ephemeral key gives the upload away.
    pub fn exports_sharing_ephemeral(&self, session_ids: &[&str]) -> Vec<EncryptedSessionExport> {
        let ephemeral = StaticSecret::random_from_rng(OsRng);

        session_ids
            .iter()
            .map(|session_id| {
                let session = self.session(session_id);

                self.public_key.encrypt_session_with_ephemeral(
                    &ephemeral,
                    session.room_id.as_str(),
                    *session_id,
                    &self.room_key(session_id),
                    session.initial_key.ratchet_index(),
                )
            })
            .collect()
    }

    /// Encrypt the room keys of every session for the backup.
    pub fn exports(&self) -> Vec<EncryptedSessionExport> {
        self.sessions.keys().map(|session_id| self.export(session_id)).collect()
    }

    fn session(&self, session_id: &str) -> &FixtureSession {
        self.sessions
            .get(session_id)
            .unwrap_or_else(|| panic!("Unknown fixture session {session_id}"))
    }
}
