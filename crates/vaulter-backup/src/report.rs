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

//! The outcome of a run of the [`BackupDecryptor`](crate::BackupDecryptor).

use std::fmt;

use serde::Serialize;
use vaulter_crypto::{EventError, MegolmError, SessionKeyError};

use crate::BackupClientError;

/// Why a single room key or event couldn't be decrypted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The backup doesn't contain the room key of the session.
    MissingSessionKey,
    /// The room key couldn't be fetched from the backup, even after retrying.
    Network,
    /// The MAC of the backed up room key didn't match.
    MacAuthentication,
    /// The backed up room key isn't a valid Megolm session key.
    SessionKeyFormat,
    /// The message couldn't be authenticated with the room key.
    MessageAuthentication,
    /// The room key only decrypts messages sent after this one.
    UnknownMessageIndex,
    /// The ciphertext or the decrypted payload is malformed.
    MalformedMessage,
    /// The decrypted payload belongs to a different room.
    MismatchedRoom,
    /// The plaintext couldn't be stored.
    Store,
}

impl FailureKind {
    /// A stable identifier of the failure kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::MissingSessionKey => "missing_session_key",
            FailureKind::Network => "network",
            FailureKind::MacAuthentication => "mac_authentication",
            FailureKind::SessionKeyFormat => "session_key_format",
            FailureKind::MessageAuthentication => "message_authentication",
            FailureKind::UnknownMessageIndex => "unknown_message_index",
            FailureKind::MalformedMessage => "malformed_message",
            FailureKind::MismatchedRoom => "mismatched_room",
            FailureKind::Store => "store",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&BackupClientError> for FailureKind {
    fn from(error: &BackupClientError) -> Self {
        match error {
            BackupClientError::NotFound => FailureKind::MissingSessionKey,
            BackupClientError::Network { .. } | BackupClientError::Rejected { .. } => {
                FailureKind::Network
            }
            BackupClientError::Malformed(_) => FailureKind::SessionKeyFormat,
        }
    }
}

impl From<&SessionKeyError> for FailureKind {
    fn from(error: &SessionKeyError) -> Self {
        if error.is_authentication_failure() {
            FailureKind::MacAuthentication
        } else {
            FailureKind::SessionKeyFormat
        }
    }
}

impl From<&MegolmError> for FailureKind {
    fn from(error: &MegolmError) -> Self {
        match error {
            MegolmError::InvalidMac | MegolmError::InvalidSignature => {
                FailureKind::MessageAuthentication
            }
            MegolmError::UnknownMessageIndex { .. } => FailureKind::UnknownMessageIndex,
            MegolmError::SessionKey(_) => FailureKind::SessionKeyFormat,
            MegolmError::Decode(_) | MegolmError::InvalidPadding | MegolmError::InvalidUtf8(_) => {
                FailureKind::MalformedMessage
            }
        }
    }
}

impl From<&EventError> for FailureKind {
    fn from(error: &EventError) -> Self {
        match error {
            EventError::MismatchedRoom { .. } => FailureKind::MismatchedRoom,
            EventError::NotJson(_) | EventError::MissingField(_) => FailureKind::MalformedMessage,
        }
    }
}

/// An event that wasn't decrypted because it uses an unsupported algorithm.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SkippedEvent {
    /// The ID of the event.
    pub event_id: String,
    /// The algorithm the event was encrypted with.
    pub algorithm: String,
}

/// An event that couldn't be decrypted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailedEvent {
    /// The ID of the event.
    pub event_id: String,
    /// The room of the event.
    pub room_id: String,
    /// The Megolm session the event was encrypted with.
    pub session_id: String,
    /// Why the event couldn't be decrypted.
    pub kind: FailureKind,
}

/// The outcome of a run of the [`BackupDecryptor`](crate::BackupDecryptor).
///
/// Every event of the backlog is accounted for: it was either decrypted, had
/// already been decrypted, was skipped or failed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// The backup version the room keys were taken from.
    pub backup_version: String,
    /// The number of events that were decrypted and stored.
    pub decrypted: usize,
    /// The number of events that were decrypted, but whose plaintext was
    /// already stored.
    pub already_decrypted: usize,
    /// The number of room keys that were fetched from the backup and
    /// decrypted.
    pub sessions_fetched: usize,
    /// The number of room keys that were found in the cache.
    pub cache_hits: usize,
    /// The events using an unsupported algorithm.
    pub skipped: Vec<SkippedEvent>,
    /// The events that couldn't be decrypted.
    pub failed: Vec<FailedEvent>,
}

impl RunReport {
    pub(crate) fn new(backup_version: &str) -> Self {
        Self { backup_version: backup_version.to_owned(), ..Default::default() }
    }

    /// The number of events that couldn't be decrypted.
    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    /// The number of events that were skipped.
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    /// The events that failed for the given reason.
    pub fn failures_of(&self, kind: FailureKind) -> impl Iterator<Item = &FailedEvent> + '_ {
        self.failed.iter().filter(move |failed| failed.kind == kind)
    }

    pub(crate) fn record_failure(
        &mut self,
        event_id: &str,
        room_id: &str,
        session_id: &str,
        kind: FailureKind,
    ) {
        self.failed.push(FailedEvent {
            event_id: event_id.to_owned(),
            room_id: room_id.to_owned(),
            session_id: session_id.to_owned(),
            kind,
        });
    }

    pub(crate) fn record_skipped(&mut self, event_id: &str, algorithm: &str) {
        self.skipped
            .push(SkippedEvent { event_id: event_id.to_owned(), algorithm: algorithm.to_owned() });
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "backup version {}: {} decrypted, {} already decrypted, {} skipped, {} failed \
             ({} room keys fetched, {} cache hits)",
            self.backup_version,
            self.decrypted,
            self.already_decrypted,
            self.skipped_count(),
            self.failure_count(),
            self.sessions_fetched,
            self.cache_hits,
        )
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use vaulter_crypto::{MegolmError, SessionKeyError};

    use super::{FailureKind, RunReport};
    use crate::BackupClientError;

    #[test]
    fn errors_map_to_failure_kinds() {
        assert_eq!(FailureKind::from(&BackupClientError::NotFound), FailureKind::MissingSessionKey);
        assert_eq!(
            FailureKind::from(&BackupClientError::network("timeout")),
            FailureKind::Network
        );
        assert_eq!(
            FailureKind::from(&SessionKeyError::MacAuthentication),
            FailureKind::MacAuthentication
        );
        assert_eq!(
            FailureKind::from(&SessionKeyError::UnsupportedAlgorithm("m.olm".to_owned())),
            FailureKind::SessionKeyFormat
        );
        assert_eq!(
            FailureKind::from(&SessionKeyError::ReusedEphemeralKey {
                other_session_id: "session".to_owned()
            }),
            FailureKind::SessionKeyFormat
        );
        assert_eq!(FailureKind::from(&MegolmError::InvalidMac), FailureKind::MessageAuthentication);
        assert_eq!(
            FailureKind::from(&MegolmError::UnknownMessageIndex {
                first_known_index: 3,
                message_index: 1
            }),
            FailureKind::UnknownMessageIndex
        );
    }

    #[test]
    fn failures_can_be_filtered() {
        let mut report = RunReport::new("1");
        report.record_failure("$a", "!room", "session", FailureKind::Network);
        report.record_failure("$b", "!room", "session", FailureKind::MismatchedRoom);
        report.record_failure("$c", "!room", "session", FailureKind::Network);
        report.record_skipped("$d", "m.olm.v1.curve25519-aes-sha2");

        assert_eq!(report.failure_count(), 3);
        assert_eq!(report.skipped_count(), 1);

        let network: Vec<_> =
            report.failures_of(FailureKind::Network).map(|f| f.event_id.as_str()).collect();
        assert_eq!(network, ["$a", "$c"]);
    }

    #[test]
    fn report_serialization() {
        let mut report = RunReport::new("3");
        report.decrypted = 2;
        report.record_failure("$a", "!room", "session", FailureKind::MacAuthentication);

        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["backup_version"], "3");
        assert_eq!(json["decrypted"], 2);
        assert_eq!(
            json["failed"],
            json!([{
                "event_id": "$a",
                "room_id": "!room",
                "session_id": "session",
                "kind": "mac_authentication"
            }])
        );
        assert_eq!(
            report.to_string(),
            "backup version 3: 2 decrypted, 0 already decrypted, 0 skipped, 1 failed \
             (0 room keys fetched, 0 cache hits)"
        );
    }
}
