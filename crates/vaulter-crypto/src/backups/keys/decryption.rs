// Copyright 2021 The Matrix.org Foundation C.I.C.
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

use subtle::ConstantTimeEq;
use tracing::{debug, instrument};
use x25519_dalek::{PublicKey, StaticSecret};

use super::{BackupPublicKey, RecoveryKey};
use crate::{
    ciphers::BackupCipherKeys,
    megolm::decode_session_key,
    types::{
        BackedUpRoomKey, BackupDescriptor, EncryptedSessionExport, RecoveredSessionKey,
        RoomKeyBackupInfo,
    },
    BackupKeyError, SessionKeyError,
};

/// The private key of a backup, verified against the public key the server
/// published for one backup version.
///
/// A `BackupDecryptionKey` can only be created through
/// [`BackupDecryptionKey::resolve()`], so holding one means the check has
/// passed.
pub struct BackupDecryptionKey {
    secret: StaticSecret,
    public_key: BackupPublicKey,
    version: String,
}

#[cfg(not(tarpaulin_include))]
impl fmt::Debug for BackupDecryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupDecryptionKey")
            .field("public_key", &self.public_key)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl BackupDecryptionKey {
    /// Turn a recovery key into the decryption key of the given backup.
    ///
    /// For `m.megolm_backup.v1.curve25519-aes-sha2` the recovery key is the
    /// private Curve25519 key of the backup. Its public key is compared, in
    /// constant time, to the public key of the backup. Keys for any other
    /// backup algorithm can't be resolved.
    #[instrument(
        skip_all,
        fields(version = %backup.version, algorithm = backup.algorithm.algorithm())
    )]
    pub fn resolve(key: &RecoveryKey, backup: &BackupDescriptor) -> Result<Self, BackupKeyError> {
        let auth_data = match &backup.algorithm {
            RoomKeyBackupInfo::MegolmBackupV1Curve25519AesSha2(auth_data) => auth_data,
            RoomKeyBackupInfo::Other { algorithm, .. } => {
                return Err(BackupKeyError::UnsupportedAlgorithm(algorithm.to_owned()));
            }
        };

        let secret = StaticSecret::from(*key.as_bytes());
        let public_key = BackupPublicKey::from(&secret);

        let expected = auth_data.public_key.as_bytes();

        if bool::from(public_key.as_bytes().as_slice().ct_eq(expected.as_slice())) {
            debug!("The recovery key matches the public key of the backup");

            Ok(Self { secret, public_key, version: backup.version.to_owned() })
        } else {
            Err(BackupKeyError::KeyMismatch { version: backup.version.to_owned() })
        }
    }

    /// The public key of the backup.
    pub fn public_key(&self) -> BackupPublicKey {
        self.public_key
    }

    /// The backup version this key was verified against.
    pub fn backup_version(&self) -> &str {
        &self.version
    }

    /// Decrypt a single backed up room key.
    ///
    /// The MAC is checked before anything is decrypted. The decrypted room key
    /// must be a Megolm key whose signing key matches the session ID the key
    /// was stored under.
    #[instrument(skip_all, fields(room_id = %export.room_id, session_id = %export.session_id))]
    pub fn decrypt_session_export(
        &self,
        export: &EncryptedSessionExport,
    ) -> Result<RecoveredSessionKey, SessionKeyError> {
        let ephemeral_key = PublicKey::from(export.ephemeral);
        let shared_secret = self.secret.diffie_hellman(&ephemeral_key);

        if !shared_secret.was_contributory() {
            return Err(SessionKeyError::NonContributoryKey);
        }

        let keys = BackupCipherKeys::from_shared_secret(shared_secret.as_bytes());
        let plaintext = keys
            .decrypt(&export.ephemeral, &export.ciphertext, &export.mac)
            .map_err(|_| SessionKeyError::MacAuthentication)?;

        let room_key: BackedUpRoomKey = serde_json::from_slice(&plaintext)?;

        if !room_key.algorithm.is_supported() {
            return Err(SessionKeyError::UnsupportedAlgorithm(room_key.algorithm.to_string()));
        }

        let session_key = decode_session_key(&room_key.session_key)?;
        let session_id = session_key.session_id();

        if session_id != export.session_id {
            return Err(SessionKeyError::SessionIdMismatch {
                expected: export.session_id.to_owned(),
                actual: session_id,
            });
        }

        let ratchet_index = session_key.ratchet_index();

        if ratchet_index != export.first_message_index {
            debug!(
                ratchet_index,
                first_message_index = export.first_message_index,
                "The backed up first message index doesn't match the session key, \
                 using the index of the session key"
            );
        }

        Ok(RecoveredSessionKey::new(export, room_key, ratchet_index))
    }
}
