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

use std::{fmt, mem};

use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::{
    ciphers::BackupCipherKeys,
    types::{BackedUpRoomKey, EncryptedSessionExport, MEGOLM_BACKUP_V1_CURVE25519_AES_SHA2},
    utilities::{base64_decode_array, base64_encode},
    FixedLengthError,
};

/// The public part of a backup key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BackupPublicKey(PublicKey);

#[cfg(not(tarpaulin_include))]
impl fmt::Debug for BackupPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BackupPublicKey").field(&self.to_base64()).finish()
    }
}

impl BackupPublicKey {
    /// Create a public key from its raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(PublicKey::from(bytes))
    }

    /// Try to create a new `BackupPublicKey` from a base 64 encoded string.
    pub fn from_base64(public_key: &str) -> Result<Self, FixedLengthError> {
        Ok(Self::from_bytes(base64_decode_array(public_key)?))
    }

    /// Convert the [`BackupPublicKey`] to a base 64 encoded string.
    pub fn to_base64(&self) -> String {
        base64_encode(self.0.as_bytes())
    }

    /// The raw bytes of the public key.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Get the full name of the backup algorithm this backup key supports.
    pub fn backup_algorithm(&self) -> &str {
        MEGOLM_BACKUP_V1_CURVE25519_AES_SHA2
    }

    /// Encrypt a room key for the backup.
    ///
    /// Every call uses a freshly generated ephemeral key, the AES-CTR
    /// keystream is therefore never reused.
    pub fn encrypt_session(
        &self,
        room_id: impl Into<String>,
        session_id: impl Into<String>,
        room_key: &BackedUpRoomKey,
        first_message_index: u32,
    ) -> EncryptedSessionExport {
        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_key = PublicKey::from(&ephemeral);
        let shared_secret = ephemeral.diffie_hellman(&self.0);

        let keys = BackupCipherKeys::from_shared_secret(shared_secret.as_bytes());

        Self::seal(
            &keys,
            ephemeral_key,
            room_id.into(),
            session_id.into(),
            room_key,
            first_message_index,
        )
    }

    /// Encrypt a room key for the backup using the given ephemeral secret.
    ///
    /// Encrypting more than one room key with the same ephemeral secret
    /// reuses the AES-CTR keystream, this is only useful to exercise the
    /// checks that reject such uploads.
    pub fn encrypt_session_with_ephemeral(
        &self,
        ephemeral: &StaticSecret,
        room_id: impl Into<String>,
        session_id: impl Into<String>,
        room_key: &BackedUpRoomKey,
        first_message_index: u32,
    ) -> EncryptedSessionExport {
        let ephemeral_key = PublicKey::from(ephemeral);
        let shared_secret = ephemeral.diffie_hellman(&self.0);

        let keys = BackupCipherKeys::from_shared_secret(shared_secret.as_bytes());

        Self::seal(
            &keys,
            ephemeral_key,
            room_id.into(),
            session_id.into(),
            room_key,
            first_message_index,
        )
    }

    fn seal(
        keys: &BackupCipherKeys,
        ephemeral_key: PublicKey,
        room_id: String,
        session_id: String,
        room_key: &BackedUpRoomKey,
        first_message_index: u32,
    ) -> EncryptedSessionExport {
        // The key gets zeroized in `BackedUpRoomKey` but we're creating a copy
        // here that won't, so let's wrap it up in a `Zeroizing` struct.
        let mut buffer = Zeroizing::new(
            serde_json::to_vec(room_key).expect("Can't serialize exported room key"),
        );
        let mac = keys.encrypt(ephemeral_key.as_bytes(), &mut buffer);

        EncryptedSessionExport {
            room_id,
            session_id,
            ephemeral: ephemeral_key.to_bytes(),
            ciphertext: mem::take(&mut *buffer),
            mac,
            first_message_index,
            forwarded_count: room_key.forwarding_curve25519_key_chain.len() as u32,
            is_verified: false,
        }
    }
}

impl From<&StaticSecret> for BackupPublicKey {
    fn from(secret: &StaticSecret) -> Self {
        Self(PublicKey::from(secret))
    }
}

impl Serialize for BackupPublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for BackupPublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let key = String::deserialize(deserializer)?;
        Self::from_base64(&key).map_err(serde::de::Error::custom)
    }
}
