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

use std::{collections::BTreeMap, fmt, mem};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use zeroize::Zeroize;

use super::EventEncryptionAlgorithm;
use crate::{
    backups::BackupPublicKey,
    utilities::{base64_decode, base64_decode_array, base64_encode, FixedLengthError},
};

/// The name of the only backup algorithm we know how to decrypt.
pub const MEGOLM_BACKUP_V1_CURVE25519_AES_SHA2: &str = "m.megolm_backup.v1.curve25519-aes-sha2";

/// Signatures of a signed JSON object, keyed by user ID and then by key ID.
pub type Signatures = BTreeMap<String, BTreeMap<String, String>>;

/// Auth data for the `m.megolm_backup.v1.curve25519-aes-sha2` backup algorithm
/// as defined in the [spec].
///
/// [spec]: https://spec.matrix.org/unstable/client-server-api/#backup-algorithm-mmegolm_backupv1curve25519-aes-sha2
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MegolmV1AuthData {
    /// The Curve25519 public key used to encrypt the backups.
    pub public_key: BackupPublicKey,
    /// *Optional.* Signatures of the auth_data, as Signed JSON.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub signatures: Signatures,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl MegolmV1AuthData {
    /// Create a new [`MegolmV1AuthData`] for the given public key, without any
    /// signatures.
    pub fn new(public_key: BackupPublicKey) -> Self {
        Self { public_key, signatures: Default::default(), extra: Default::default() }
    }
}

/// The algorithm and auth data of a room key backup.
#[derive(Clone, Debug, Deserialize)]
#[serde(try_from = "BackupInfoHelper")]
pub enum RoomKeyBackupInfo {
    /// The `m.megolm_backup.v1.curve25519-aes-sha2` variant of a backup.
    MegolmBackupV1Curve25519AesSha2(MegolmV1AuthData),
    /// Any other unknown backup variant.
    Other {
        /// The algorithm of the unknown backup variant.
        algorithm: String,
        /// The auth data of the unknown backup variant.
        auth_data: BTreeMap<String, Value>,
    },
}

impl RoomKeyBackupInfo {
    /// The name of the backup algorithm.
    pub fn algorithm(&self) -> &str {
        match self {
            RoomKeyBackupInfo::MegolmBackupV1Curve25519AesSha2(_) => {
                MEGOLM_BACKUP_V1_CURVE25519_AES_SHA2
            }
            RoomKeyBackupInfo::Other { algorithm, .. } => algorithm,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct BackupInfoHelper {
    algorithm: String,
    auth_data: Value,
}

impl TryFrom<BackupInfoHelper> for RoomKeyBackupInfo {
    type Error = serde_json::Error;

    fn try_from(value: BackupInfoHelper) -> Result<Self, Self::Error> {
        Ok(match value.algorithm.as_str() {
            MEGOLM_BACKUP_V1_CURVE25519_AES_SHA2 => {
                let data: MegolmV1AuthData = serde_json::from_value(value.auth_data)?;
                RoomKeyBackupInfo::MegolmBackupV1Curve25519AesSha2(data)
            }
            _ => RoomKeyBackupInfo::Other {
                algorithm: value.algorithm,
                auth_data: serde_json::from_value(value.auth_data)?,
            },
        })
    }
}

impl Serialize for RoomKeyBackupInfo {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let helper = match self {
            RoomKeyBackupInfo::MegolmBackupV1Curve25519AesSha2(d) => BackupInfoHelper {
                algorithm: MEGOLM_BACKUP_V1_CURVE25519_AES_SHA2.to_owned(),
                auth_data: serde_json::to_value(d).map_err(serde::ser::Error::custom)?,
            },
            RoomKeyBackupInfo::Other { algorithm, auth_data } => BackupInfoHelper {
                algorithm: algorithm.to_owned(),
                auth_data: serde_json::to_value(auth_data.clone())
                    .map_err(serde::ser::Error::custom)?,
            },
        };

        helper.serialize(serializer)
    }
}

/// The current version of the server-side key backup, as returned by
/// `GET /_matrix/client/v3/room_keys/version`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupDescriptor {
    /// The backup version.
    pub version: String,
    /// The algorithm the backup uses, and its public parameters.
    #[serde(flatten)]
    pub algorithm: RoomKeyBackupInfo,
    /// The number of room keys stored in the backup.
    #[serde(default)]
    pub count: u64,
    /// An opaque string representing the stored keys in the backup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// The encrypted part of a backed up room key, all fields are unpadded
/// base64.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncryptedSessionData {
    /// The ephemeral Curve25519 public key used for the key agreement.
    pub ephemeral: String,
    /// The AES-256-CTR encrypted [`BackedUpRoomKey`].
    pub ciphertext: String,
    /// The truncated HMAC-SHA-256 of the ciphertext.
    pub mac: String,
}

/// A backed up room key, as returned by
/// `GET /_matrix/client/v3/room_keys/keys/{roomId}/{sessionId}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeyBackupData {
    /// The index of the first message in the session that the key can
    /// decrypt.
    pub first_message_index: u32,
    /// The number of times this key has been forwarded.
    #[serde(default)]
    pub forwarded_count: u32,
    /// Whether the device backing up the key verified the device that the key
    /// is from.
    #[serde(default)]
    pub is_verified: bool,
    /// The encrypted room key.
    pub session_data: EncryptedSessionData,
}

/// Error type describing why a [`KeyBackupData`] couldn't be turned into an
/// [`EncryptedSessionExport`].
#[derive(Debug, Error)]
pub enum ExportFormatError {
    /// The ephemeral key isn't a base64 encoded Curve25519 key.
    #[error("the ephemeral key of the backed up session is invalid: {0}")]
    Ephemeral(FixedLengthError),
    /// The ciphertext isn't valid base64.
    #[error("the ciphertext of the backed up session isn't valid base64: {0}")]
    Ciphertext(base64::DecodeError),
    /// The MAC isn't a base64 encoded 8 byte value.
    #[error("the MAC of the backed up session is invalid: {0}")]
    Mac(FixedLengthError),
}

/// A validated, binary form of a backed up room key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedSessionExport {
    /// The room the session belongs to.
    pub room_id: String,
    /// The ID of the session.
    pub session_id: String,
    /// The ephemeral Curve25519 public key of the sender side of the key
    /// agreement.
    pub ephemeral: [u8; 32],
    /// The encrypted [`BackedUpRoomKey`].
    pub ciphertext: Vec<u8>,
    /// The truncated MAC of the ciphertext.
    pub mac: [u8; 8],
    /// The index of the first message the session can decrypt.
    pub first_message_index: u32,
    /// The number of times this key has been forwarded.
    pub forwarded_count: u32,
    /// Whether the uploading device verified the sender of the key.
    pub is_verified: bool,
}

impl EncryptedSessionExport {
    /// Decode and validate the server representation of a backed up room
    /// key.
    pub fn from_backup_data(
        room_id: impl Into<String>,
        session_id: impl Into<String>,
        data: KeyBackupData,
    ) -> Result<Self, ExportFormatError> {
        let session_data = data.session_data;

        let ephemeral = base64_decode_array(&session_data.ephemeral)
            .map_err(ExportFormatError::Ephemeral)?;
        let ciphertext =
            base64_decode(&session_data.ciphertext).map_err(ExportFormatError::Ciphertext)?;
        let mac = base64_decode_array(&session_data.mac).map_err(ExportFormatError::Mac)?;

        Ok(Self {
            room_id: room_id.into(),
            session_id: session_id.into(),
            ephemeral,
            ciphertext,
            mac,
            first_message_index: data.first_message_index,
            forwarded_count: data.forwarded_count,
            is_verified: data.is_verified,
        })
    }

    /// Convert the export back into the representation the server uses.
    pub fn to_backup_data(&self) -> KeyBackupData {
        KeyBackupData {
            first_message_index: self.first_message_index,
            forwarded_count: self.forwarded_count,
            is_verified: self.is_verified,
            session_data: EncryptedSessionData {
                ephemeral: base64_encode(self.ephemeral),
                ciphertext: base64_encode(&self.ciphertext),
                mac: base64_encode(self.mac),
            },
        }
    }
}

/// The plaintext of a backed up room key.
#[derive(Deserialize, Serialize)]
pub struct BackedUpRoomKey {
    /// The encryption algorithm that the session uses.
    pub algorithm: EventEncryptionAlgorithm,

    /// The Curve25519 key of the device which initiated the session originally.
    pub sender_key: String,

    /// The exported key of the session.
    pub session_key: String,

    /// The Ed25519 key of the device which initiated the session originally.
    #[serde(default)]
    pub sender_claimed_keys: BTreeMap<String, String>,

    /// Chain of Curve25519 keys through which this session was forwarded, via
    /// m.forwarded_room_key events.
    #[serde(default)]
    pub forwarding_curve25519_key_chain: Vec<String>,
}

impl Drop for BackedUpRoomKey {
    fn drop(&mut self) {
        self.session_key.zeroize();
    }
}

#[cfg(not(tarpaulin_include))]
impl fmt::Debug for BackedUpRoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackedUpRoomKey")
            .field("algorithm", &self.algorithm)
            .field("sender_key", &self.sender_key)
            .finish_non_exhaustive()
    }
}

/// A room key that was recovered from the backup.
///
/// The session key is erased from memory once the last reference to this
/// struct is dropped.
pub struct RecoveredSessionKey {
    room_id: String,
    session_id: String,
    session_key: String,
    ratchet_index: u32,
    sender_key: String,
    sender_claimed_keys: BTreeMap<String, String>,
    forwarded_count: u32,
}

impl RecoveredSessionKey {
    pub(crate) fn new(
        export: &EncryptedSessionExport,
        mut room_key: BackedUpRoomKey,
        ratchet_index: u32,
    ) -> Self {
        Self {
            room_id: export.room_id.clone(),
            session_id: export.session_id.clone(),
            session_key: mem::take(&mut room_key.session_key),
            ratchet_index,
            sender_key: mem::take(&mut room_key.sender_key),
            sender_claimed_keys: mem::take(&mut room_key.sender_claimed_keys),
            forwarded_count: export.forwarded_count,
        }
    }

    /// The room the session belongs to.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// The ID of the session.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The exported Megolm session key, unpadded base64.
    pub fn session_key(&self) -> &str {
        &self.session_key
    }

    /// The first message index the session key can decrypt.
    pub fn ratchet_index(&self) -> u32 {
        self.ratchet_index
    }

    /// The Curve25519 key of the device that created the session.
    pub fn sender_key(&self) -> &str {
        &self.sender_key
    }

    /// The keys the creator of the session claimed to own.
    pub fn sender_claimed_keys(&self) -> &BTreeMap<String, String> {
        &self.sender_claimed_keys
    }

    /// The number of times the key was forwarded before it was backed up.
    pub fn forwarded_count(&self) -> u32 {
        self.forwarded_count
    }
}

impl Drop for RecoveredSessionKey {
    fn drop(&mut self) {
        self.session_key.zeroize();
    }
}

#[cfg(not(tarpaulin_include))]
impl fmt::Debug for RecoveredSessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveredSessionKey")
            .field("room_id", &self.room_id)
            .field("session_id", &self.session_id)
            .field("ratchet_index", &self.ratchet_index)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;
    use vaulter_test::{test_json, vectors};

    use super::{
        BackupDescriptor, EncryptedSessionExport, ExportFormatError, KeyBackupData,
        RoomKeyBackupInfo,
    };

    #[test]
    fn serialization() {
        let json = json!({
            "algorithm": "m.megolm_backup.v2",
            "auth_data": {
                "some": "data"
            }
        });

        let deserialized: RoomKeyBackupInfo = serde_json::from_value(json.clone()).unwrap();
        assert_matches!(deserialized, RoomKeyBackupInfo::Other { algorithm: _, auth_data: _ });

        let serialized = serde_json::to_value(deserialized).unwrap();
        assert_eq!(json, serialized);

        let json = json!({
            "algorithm": "m.megolm_backup.v1.curve25519-aes-sha2",
            "auth_data": {
                "public_key":"XjhWTCjW7l59pbfx9tlCBQolfnIQWARoKOzjTOPSlWM",
                "signatures": {
                    "@alice:example.org": {
                        "ed25519:deviceid": "signature"
                    }
                }
            }
        });

        let deserialized: RoomKeyBackupInfo = serde_json::from_value(json.clone()).unwrap();
        assert_matches!(deserialized, RoomKeyBackupInfo::MegolmBackupV1Curve25519AesSha2(_));

        let serialized = serde_json::to_value(deserialized).unwrap();
        assert_eq!(json, serialized);
    }

    #[test]
    fn descriptor_deserialization() {
        let descriptor: BackupDescriptor =
            serde_json::from_value(test_json::BACKUP_VERSION.clone()).unwrap();

        assert_eq!(descriptor.version, vectors::BACKUP_VERSION);
        assert_eq!(descriptor.count, 1);
        assert_eq!(descriptor.etag.as_deref(), Some("1"));

        let auth_data = assert_matches!(
            descriptor.algorithm,
            RoomKeyBackupInfo::MegolmBackupV1Curve25519AesSha2(auth_data) => auth_data
        );
        assert_eq!(auth_data.public_key.to_base64(), vectors::BACKUP_PUBLIC_KEY);
        assert_eq!(auth_data.signatures.len(), 1);

        let descriptor: BackupDescriptor =
            serde_json::from_value(test_json::UNSUPPORTED_BACKUP_VERSION.clone()).unwrap();
        assert_eq!(descriptor.algorithm.algorithm(), "org.example.caesar.cipher");
        assert_eq!(descriptor.version, "7");
    }

    #[test]
    fn descriptor_with_an_invalid_public_key_is_rejected() {
        let json = json!({
            "algorithm": "m.megolm_backup.v1.curve25519-aes-sha2",
            "auth_data": { "public_key": "not a key" },
            "count": 0,
            "etag": "0",
            "version": "1"
        });

        serde_json::from_value::<BackupDescriptor>(json).unwrap_err();
    }

    #[test]
    fn backup_data_is_decoded() {
        let data: KeyBackupData =
            serde_json::from_value(test_json::KEY_BACKUP_DATA.clone()).unwrap();
        let export = EncryptedSessionExport::from_backup_data(
            vectors::BACKUP_ROOM_ID,
            vectors::MEGOLM_SESSION_ID,
            data,
        )
        .unwrap();

        assert_eq!(export.room_id, vectors::BACKUP_ROOM_ID);
        assert_eq!(export.first_message_index, 0);
        assert!(export.is_verified);
        assert_eq!(export.ciphertext.len(), vectors::BACKED_UP_ROOM_KEY.len());

        let json = serde_json::to_value(export.to_backup_data()).unwrap();
        assert_eq!(json, *test_json::KEY_BACKUP_DATA);
    }

    #[test]
    fn malformed_backup_data_is_rejected() {
        let mut data: KeyBackupData =
            serde_json::from_value(test_json::KEY_BACKUP_DATA.clone()).unwrap();
        data.session_data.mac = "AAAA".to_owned();

        assert_matches!(
            EncryptedSessionExport::from_backup_data("!room:example.org", "session", data.clone()),
            Err(ExportFormatError::Mac(_))
        );

        data.session_data.mac = vectors::BACKUP_MAC.to_owned();
        data.session_data.ephemeral = "AAAA".to_owned();
        assert_matches!(
            EncryptedSessionExport::from_backup_data("!room:example.org", "session", data.clone()),
            Err(ExportFormatError::Ephemeral(_))
        );

        data.session_data.ephemeral = vectors::EPHEMERAL_PUBLIC_KEY.to_owned();
        data.session_data.ciphertext = "%%%".to_owned();
        assert_matches!(
            EncryptedSessionExport::from_backup_data("!room:example.org", "session", data),
            Err(ExportFormatError::Ciphertext(_))
        );
    }
}
