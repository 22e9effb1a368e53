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

use std::fmt;

use ed25519_dalek::VerifyingKey;
use tracing::trace;

use super::{
    message::MegolmMessage,
    ratchet::Ratchet,
    session_keys::{decode_session_key, ExportedSessionKey, SessionKey},
    DecryptedPayload,
};
use crate::{
    ciphers::MegolmCipherKeys, types::RecoveredSessionKey, utilities::base64_encode, MegolmError,
};

/// The receiving side of a Megolm session.
///
/// The session remembers the earliest ratchet state it was created from and
/// never modifies it, decrypting a message advances a copy of that state. This
/// allows a backlog of messages to be decrypted in any order.
pub struct InboundGroupSession {
    initial_ratchet: Ratchet,
    signing_key: VerifyingKey,
}

impl InboundGroupSession {
    /// Create a session from a signed session key.
    pub fn new(key: &SessionKey) -> Self {
        Self { initial_ratchet: key.ratchet.clone(), signing_key: key.signing_key }
    }

    /// Create a session from an exported session key.
    pub fn import(key: &ExportedSessionKey) -> Self {
        Self { initial_ratchet: key.ratchet.clone(), signing_key: key.signing_key }
    }

    /// Create a session from a room key that was recovered from a key backup.
    pub fn from_recovered(key: &RecoveredSessionKey) -> Result<Self, MegolmError> {
        let exported = decode_session_key(key.session_key())?;
        Ok(Self::import(&exported))
    }

    /// The unique ID of the session.
    pub fn session_id(&self) -> String {
        base64_encode(self.signing_key.as_bytes())
    }

    /// The first message index the session is able to decrypt.
    pub fn first_known_index(&self) -> u32 {
        self.initial_ratchet.index()
    }

    /// Export the session at the given index.
    ///
    /// Returns `None` if the index precedes the first known index.
    pub fn export_at(&self, index: u32) -> Option<ExportedSessionKey> {
        let ratchet = self.ratchet_at(index)?;
        Some(ExportedSessionKey { ratchet, signing_key: self.signing_key })
    }

    fn ratchet_at(&self, index: u32) -> Option<Ratchet> {
        if index < self.first_known_index() {
            None
        } else {
            let mut ratchet = self.initial_ratchet.clone();
            ratchet.advance_to(index);

            Some(ratchet)
        }
    }

    /// Decrypt a message that was encrypted as part of this session.
    ///
    /// The signature is checked first, then the MAC, only authenticated
    /// ciphertext is ever decrypted.
    pub fn decrypt(&self, message: &MegolmMessage) -> Result<DecryptedPayload, MegolmError> {
        if !message.verify_signature(&self.signing_key) {
            return Err(MegolmError::InvalidSignature);
        }

        let message_index = message.message_index();
        let ratchet = self.ratchet_at(message_index).ok_or(MegolmError::UnknownMessageIndex {
            first_known_index: self.first_known_index(),
            message_index,
        })?;

        trace!(message_index, "Decrypting a Megolm message");

        let keys = MegolmCipherKeys::from_ratchet(ratchet.as_bytes());

        keys.verify_mac(message.mac_input(), message.mac().as_bytes())
            .map_err(|_| MegolmError::InvalidMac)?;

        let plaintext =
            keys.decrypt(message.ciphertext()).map_err(|_| MegolmError::InvalidPadding)?;

        Ok(DecryptedPayload { plaintext: String::from_utf8(plaintext)?, message_index })
    }

    /// Decode and decrypt a base64 encoded message, as found in the
    /// `ciphertext` field of an encrypted event.
    pub fn decrypt_base64(&self, ciphertext: &str) -> Result<DecryptedPayload, MegolmError> {
        let message = MegolmMessage::from_base64(ciphertext)?;
        self.decrypt(&message)
    }
}

#[cfg(not(tarpaulin_include))]
impl fmt::Debug for InboundGroupSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundGroupSession")
            .field("session_id", &self.session_id())
            .field("first_known_index", &self.first_known_index())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use vaulter_test::vectors;

    use super::InboundGroupSession;
    use crate::{
        megolm::{ExportedSessionKey, GroupSession, MegolmMessage, SessionConfig},
        utilities::{base64_decode, base64_encode},
        MegolmError,
    };

    fn known_session() -> InboundGroupSession {
        InboundGroupSession::import(
            &ExportedSessionKey::from_base64(vectors::MEGOLM_EXPORTED_SESSION_KEY).unwrap(),
        )
    }

    #[test]
    fn known_messages_decrypt() {
        let session = known_session();

        let first = session.decrypt_base64(vectors::MEGOLM_MESSAGE_AT_0).unwrap();
        assert_eq!(first.message_index, 0);
        assert_eq!(first.plaintext, vectors::MEGOLM_PLAINTEXT_AT_0);

        let fifth = session.decrypt_base64(vectors::MEGOLM_MESSAGE_AT_5).unwrap();
        assert_eq!(fifth.message_index, 5);
        assert_eq!(fifth.plaintext, vectors::MEGOLM_PLAINTEXT_AT_5);

        // Decrypting doesn't consume the session, older messages still work.
        assert_eq!(session.decrypt_base64(vectors::MEGOLM_MESSAGE_AT_0).unwrap().message_index, 0);
    }

    #[test]
    fn later_exports_cant_decrypt_earlier_messages() {
        let exported = known_session().export_at(3).unwrap();
        let session = InboundGroupSession::import(&exported);

        assert_eq!(session.first_known_index(), 3);
        assert_matches!(
            session.decrypt_base64(vectors::MEGOLM_MESSAGE_AT_0),
            Err(MegolmError::UnknownMessageIndex { first_known_index: 3, message_index: 0 })
        );
        assert_eq!(session.decrypt_base64(vectors::MEGOLM_MESSAGE_AT_5).unwrap().message_index, 5);
        assert!(session.export_at(2).is_none());
    }

    #[test]
    fn tampered_messages_are_rejected() {
        let session = known_session();
        let original = base64_decode(vectors::MEGOLM_MESSAGE_AT_0).unwrap();

        // Flipping a ciphertext bit breaks the signature.
        let mut tampered = original.clone();
        tampered[10] ^= 1;
        assert_matches!(
            session.decrypt_base64(&base64_encode(&tampered)),
            Err(MegolmError::InvalidSignature)
        );

        // So does flipping a bit in the signature itself.
        let mut tampered = original;
        let last = tampered.len() - 1;
        tampered[last] ^= 1;
        let error = session.decrypt_base64(&base64_encode(&tampered)).unwrap_err();
        assert!(error.is_authentication_failure());
    }

    #[test]
    fn messages_from_another_session_are_rejected() {
        let mut other = GroupSession::new(SessionConfig::version_1());
        let message = other.encrypt("Not for you");

        assert_matches!(known_session().decrypt(&message), Err(MegolmError::InvalidSignature));
    }

    #[test]
    fn roundtrip_with_both_mac_variants() {
        for config in [SessionConfig::version_1(), SessionConfig::version_2()] {
            let mut outbound = GroupSession::new(config);
            let inbound = InboundGroupSession::new(&outbound.session_key());

            for i in 0..300u32 {
                let plaintext = format!("Message number {i}");
                let message = outbound.encrypt(&plaintext);

                if i % 37 == 0 {
                    let message = MegolmMessage::from_bytes(&message.to_bytes()).unwrap();
                    let decrypted = inbound.decrypt(&message).unwrap();

                    assert_eq!(decrypted.message_index, i);
                    assert_eq!(decrypted.plaintext, plaintext);
                }
            }
        }
    }
}
