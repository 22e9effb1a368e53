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

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

use super::{
    message::MegolmMessage,
    ratchet::Ratchet,
    session_keys::{ExportedSessionKey, SessionKey},
    SessionConfig,
};
use crate::{ciphers::MegolmCipherKeys, utilities::base64_encode};

/// The sending side of a Megolm session.
///
/// Every call to [`GroupSession::encrypt()`] uses the current ratchet state
/// and then advances the ratchet, so each message is encrypted with a
/// different key.
pub struct GroupSession {
    ratchet: Ratchet,
    signing_key: SigningKey,
    config: SessionConfig,
}

impl GroupSession {
    /// Create a new session with a random ratchet and signing key.
    pub fn new(config: SessionConfig) -> Self {
        Self { ratchet: Ratchet::new(), signing_key: SigningKey::generate(&mut OsRng), config }
    }

    /// The unique ID of the session.
    pub fn session_id(&self) -> String {
        base64_encode(self.signing_key.verifying_key().as_bytes())
    }

    /// The index the next message will be encrypted with.
    pub fn message_index(&self) -> u32 {
        self.ratchet.index()
    }

    /// The configuration of the session.
    pub fn session_config(&self) -> SessionConfig {
        self.config
    }

    /// Encrypt the plaintext with the current ratchet state and advance the
    /// ratchet.
    pub fn encrypt(&mut self, plaintext: impl AsRef<[u8]>) -> MegolmMessage {
        let keys = MegolmCipherKeys::from_ratchet(self.ratchet.as_bytes());

        let message = MegolmMessage::encrypt(
            self.ratchet.index(),
            &keys,
            &self.signing_key,
            plaintext.as_ref(),
            self.config.truncated_mac(),
        );

        self.ratchet.advance();

        message
    }

    /// The signed session key that lets others decrypt messages from the
    /// current index onwards.
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(&self.ratchet, &self.signing_key)
    }

    /// Export the session key at the current index, without a signature.
    pub fn export(&self) -> ExportedSessionKey {
        ExportedSessionKey::from(&self.session_key())
    }
}

#[cfg(not(tarpaulin_include))]
impl fmt::Debug for GroupSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupSession")
            .field("session_id", &self.session_id())
            .field("message_index", &self.message_index())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::GroupSession;
    use crate::megolm::SessionConfig;

    #[test]
    fn encrypting_advances_the_ratchet() {
        let mut session = GroupSession::new(SessionConfig::version_1());
        let session_key = session.session_key();

        let first = session.encrypt("first");
        let second = session.encrypt("second");

        assert_eq!(first.message_index(), 0);
        assert_eq!(second.message_index(), 1);
        assert_eq!(session.message_index(), 2);

        assert_eq!(session_key.ratchet_index(), 0);
        assert_eq!(session_key.session_id(), session.session_id());
        assert_eq!(session.export().ratchet_index(), 2);
    }
}
