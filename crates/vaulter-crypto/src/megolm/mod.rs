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

//! The Megolm group ratchet.
//!
//! Room messages in Matrix are encrypted with `m.megolm.v1.aes-sha2`. Every
//! session owns a hash ratchet that is advanced for each message, each
//! ratchet state is expanded into AES-256-CBC and HMAC-SHA-256 keys, and every
//! message is signed with the session's Ed25519 key. Holding the ratchet at
//! index `n` allows decrypting messages `n` and later, but never earlier ones.
//!
//! The [`InboundGroupSession`] is used to decrypt messages with room keys
//! recovered from a key backup, the [`GroupSession`] encrypts.

mod inbound;
mod message;
mod outbound;
mod ratchet;
mod session_keys;

pub use inbound::InboundGroupSession;
pub use message::{MegolmMac, MegolmMessage, MessageDecodeError};
pub use outbound::GroupSession;
pub use session_keys::{decode_session_key, ExportedSessionKey, SessionKey, SessionKeyDecodeError};

/// Configuration for the MAC length of a Megolm session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    version: MegolmVersion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MegolmVersion {
    V1,
    V2,
}

impl SessionConfig {
    /// Messages carry a MAC truncated to 8 bytes, this is what
    /// `m.megolm.v1.aes-sha2` uses.
    pub fn version_1() -> Self {
        Self { version: MegolmVersion::V1 }
    }

    /// Messages carry the full 32 byte MAC.
    pub fn version_2() -> Self {
        Self { version: MegolmVersion::V2 }
    }

    pub(crate) fn truncated_mac(&self) -> bool {
        self.version == MegolmVersion::V1
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::version_1()
    }
}

/// The result of decrypting a Megolm message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedPayload {
    /// The decrypted plaintext, for room events this is a JSON object.
    pub plaintext: String,
    /// The index of the ratchet state the message was encrypted with.
    pub message_index: u32,
}

#[cfg(test)]
mod tests {
    use vodozemac::megolm::{
        GroupSession as VodozemacGroupSession, InboundGroupSession as VodozemacInboundSession,
        MegolmMessage as VodozemacMessage, SessionConfig as VodozemacConfig,
        SessionKey as VodozemacSessionKey,
    };

    use super::{ExportedSessionKey, GroupSession, InboundGroupSession, SessionConfig, SessionKey};

    #[test]
    fn decrypts_messages_of_other_implementations() {
        let mut outbound = VodozemacGroupSession::new(VodozemacConfig::version_1());
        let session_key = SessionKey::from_base64(&outbound.session_key().to_base64()).unwrap();
        let inbound = InboundGroupSession::new(&session_key);

        assert_eq!(inbound.session_id(), outbound.session_id());

        for i in 0..20 {
            let message = outbound.encrypt(format!("Hello {i}"));
            let decrypted = inbound.decrypt_base64(&message.to_base64()).unwrap();

            assert_eq!(decrypted.message_index, i);
            assert_eq!(decrypted.plaintext, format!("Hello {i}"));
        }
    }

    #[test]
    fn decrypts_exports_of_other_implementations() {
        let mut outbound = VodozemacGroupSession::new(VodozemacConfig::version_1());
        let mut vodozemac_inbound =
            VodozemacInboundSession::new(&outbound.session_key(), VodozemacConfig::version_1());

        let messages: Vec<_> = (0..10).map(|i| outbound.encrypt(format!("Hello {i}"))).collect();

        let exported = vodozemac_inbound.export_at(4).unwrap();
        let exported = ExportedSessionKey::from_base64(&exported.to_base64()).unwrap();
        let inbound = InboundGroupSession::import(&exported);

        assert_eq!(inbound.first_known_index(), 4);
        assert!(inbound.decrypt_base64(&messages[3].to_base64()).is_err());
        assert_eq!(inbound.decrypt_base64(&messages[9].to_base64()).unwrap().plaintext, "Hello 9");
    }

    #[test]
    fn other_implementations_decrypt_our_messages() {
        let mut outbound = GroupSession::new(SessionConfig::version_1());
        let session_key =
            VodozemacSessionKey::from_base64(outbound.session_key().to_base64().as_str()).unwrap();
        let mut inbound = VodozemacInboundSession::new(&session_key, VodozemacConfig::version_1());

        for i in 0..5 {
            let message = outbound.encrypt(format!("Hi {i}"));
            let message = VodozemacMessage::from_base64(&message.to_base64()).unwrap();
            let decrypted = inbound.decrypt(&message).unwrap();

            assert_eq!(decrypted.message_index, i);
            assert_eq!(decrypted.plaintext, format!("Hi {i}").into_bytes());
        }
    }
}
