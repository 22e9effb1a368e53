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

use ed25519_dalek::{
    Signature, SignatureError, Signer, SigningKey, VerifyingKey, PUBLIC_KEY_LENGTH,
    SIGNATURE_LENGTH,
};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::ratchet::{Ratchet, RATCHET_LENGTH};
use crate::utilities::{base64_decode, base64_encode};

const EXPORTED_VERSION: u8 = 1;
const SIGNED_VERSION: u8 = 2;

const INDEX_OFFSET: usize = 1;
const RATCHET_OFFSET: usize = INDEX_OFFSET + 4;
const PUBLIC_KEY_OFFSET: usize = RATCHET_OFFSET + RATCHET_LENGTH;
const EXPORTED_LENGTH: usize = PUBLIC_KEY_OFFSET + PUBLIC_KEY_LENGTH;
const SIGNED_LENGTH: usize = EXPORTED_LENGTH + SIGNATURE_LENGTH;

/// Error type describing failures when decoding a Megolm session key.
#[derive(Debug, Error)]
pub enum SessionKeyDecodeError {
    /// The session key isn't valid base64.
    #[error("the session key isn't valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The session key has a version we don't understand.
    #[error("unknown session key version {0}")]
    Version(u8),

    /// The session key has the wrong length for its version.
    #[error("the session key has an invalid length: expected {0}, got {1}")]
    Length(usize, usize),

    /// The session key contains an invalid Ed25519 public key.
    #[error("the session key contains an invalid Ed25519 public key: {0}")]
    PublicKey(#[source] SignatureError),

    /// The signature of a signed session key didn't verify.
    #[error("the signature of the session key couldn't be verified: {0}")]
    Signature(#[source] SignatureError),
}

/// A Megolm session key without a signature, as found in key backups and key
/// exports.
///
/// The key can only be used to decrypt messages from its ratchet index
/// onwards.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ExportedSessionKey {
    pub(super) ratchet: Ratchet,
    #[zeroize(skip)]
    pub(super) signing_key: VerifyingKey,
}

impl ExportedSessionKey {
    /// The first message index this key is able to decrypt.
    pub fn ratchet_index(&self) -> u32 {
        self.ratchet.index()
    }

    /// The unique ID of the session, the base64 encoded Ed25519 key that
    /// signs all messages of the session.
    pub fn session_id(&self) -> String {
        base64_encode(self.signing_key.as_bytes())
    }

    /// Serialize the key into its binary form.
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        encode(EXPORTED_VERSION, &self.ratchet, &self.signing_key)
    }

    /// Serialize the key into unpadded base64.
    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(base64_encode(self.to_bytes().as_slice()))
    }

    /// Decode an exported session key from its binary form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SessionKeyDecodeError> {
        check_format(bytes, EXPORTED_VERSION, EXPORTED_LENGTH)?;
        let (ratchet, signing_key) = decode(bytes)?;

        Ok(Self { ratchet, signing_key })
    }

    /// Decode an exported session key from unpadded base64.
    pub fn from_base64(key: &str) -> Result<Self, SessionKeyDecodeError> {
        let bytes = Zeroizing::new(base64_decode(key)?);
        Self::from_bytes(&bytes)
    }
}

impl fmt::Debug for ExportedSessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportedSessionKey")
            .field("session_id", &self.session_id())
            .field("ratchet_index", &self.ratchet_index())
            .finish_non_exhaustive()
    }
}

/// A Megolm session key as it is shared by the creator of the session. The
/// key is signed by the session's own signing key.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    pub(super) ratchet: Ratchet,
    #[zeroize(skip)]
    pub(super) signing_key: VerifyingKey,
    #[zeroize(skip)]
    signature: Signature,
}

impl SessionKey {
    pub(super) fn new(ratchet: &Ratchet, signing_key: &SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        let unsigned = encode(SIGNED_VERSION, ratchet, &verifying_key);
        let signature = signing_key.sign(&unsigned);

        Self { ratchet: ratchet.clone(), signing_key: verifying_key, signature }
    }

    /// The first message index this key is able to decrypt.
    pub fn ratchet_index(&self) -> u32 {
        self.ratchet.index()
    }

    /// The unique ID of the session this key belongs to.
    pub fn session_id(&self) -> String {
        base64_encode(self.signing_key.as_bytes())
    }

    /// Serialize the key into its binary form.
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut bytes = encode(SIGNED_VERSION, &self.ratchet, &self.signing_key);
        bytes.extend_from_slice(&self.signature.to_bytes());

        bytes
    }

    /// Serialize the key into unpadded base64.
    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(base64_encode(self.to_bytes().as_slice()))
    }

    /// Decode a signed session key from its binary form, verifying its
    /// signature.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SessionKeyDecodeError> {
        check_format(bytes, SIGNED_VERSION, SIGNED_LENGTH)?;

        let (unsigned, signature) = bytes.split_at(EXPORTED_LENGTH);
        let (ratchet, signing_key) = decode(unsigned)?;

        let mut signature_bytes = [0u8; SIGNATURE_LENGTH];
        signature_bytes.copy_from_slice(signature);
        let signature = Signature::from_bytes(&signature_bytes);

        signing_key
            .verify_strict(unsigned, &signature)
            .map_err(SessionKeyDecodeError::Signature)?;

        Ok(Self { ratchet, signing_key, signature })
    }

    /// Decode a signed session key from unpadded base64.
    pub fn from_base64(key: &str) -> Result<Self, SessionKeyDecodeError> {
        let bytes = Zeroizing::new(base64_decode(key)?);
        Self::from_bytes(&bytes)
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKey")
            .field("session_id", &self.session_id())
            .field("ratchet_index", &self.ratchet_index())
            .finish_non_exhaustive()
    }
}

impl From<&SessionKey> for ExportedSessionKey {
    fn from(key: &SessionKey) -> Self {
        Self { ratchet: key.ratchet.clone(), signing_key: key.signing_key }
    }
}

/// Decode a room key that is either in the exported or in the signed session
/// key format.
///
/// Key backups usually contain exported keys, but some clients upload the
/// signed key they received when the session was shared with them.
pub fn decode_session_key(key: &str) -> Result<ExportedSessionKey, SessionKeyDecodeError> {
    let bytes = Zeroizing::new(base64_decode(key)?);

    match bytes.first() {
        Some(&SIGNED_VERSION) => Ok(ExportedSessionKey::from(&SessionKey::from_bytes(&bytes)?)),
        _ => ExportedSessionKey::from_bytes(&bytes),
    }
}

fn check_format(bytes: &[u8], version: u8, length: usize) -> Result<(), SessionKeyDecodeError> {
    match bytes.first() {
        None => Err(SessionKeyDecodeError::Length(length, 0)),
        Some(&found) if found != version => Err(SessionKeyDecodeError::Version(found)),
        Some(_) if bytes.len() != length => Err(SessionKeyDecodeError::Length(length, bytes.len())),
        Some(_) => Ok(()),
    }
}

fn encode(version: u8, ratchet: &Ratchet, signing_key: &VerifyingKey) -> Zeroizing<Vec<u8>> {
    let mut bytes = Zeroizing::new(Vec::with_capacity(SIGNED_LENGTH));

    bytes.push(version);
    bytes.extend_from_slice(&ratchet.index().to_be_bytes());
    bytes.extend_from_slice(ratchet.as_bytes());
    bytes.extend_from_slice(signing_key.as_bytes());

    bytes
}

/// Decode the fields shared by both key formats, the caller checked the
/// length.
fn decode(bytes: &[u8]) -> Result<(Ratchet, VerifyingKey), SessionKeyDecodeError> {
    let mut index = [0u8; 4];
    index.copy_from_slice(&bytes[INDEX_OFFSET..RATCHET_OFFSET]);

    let mut ratchet = Zeroizing::new([0u8; RATCHET_LENGTH]);
    ratchet.copy_from_slice(&bytes[RATCHET_OFFSET..PUBLIC_KEY_OFFSET]);

    let mut public_key = [0u8; PUBLIC_KEY_LENGTH];
    public_key.copy_from_slice(&bytes[PUBLIC_KEY_OFFSET..EXPORTED_LENGTH]);

    let signing_key =
        VerifyingKey::from_bytes(&public_key).map_err(SessionKeyDecodeError::PublicKey)?;

    Ok((Ratchet::from_bytes(&ratchet, u32::from_be_bytes(index)), signing_key))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use vaulter_test::vectors;

    use super::{decode_session_key, ExportedSessionKey, SessionKey, SessionKeyDecodeError};
    use crate::utilities::{base64_decode, base64_encode};

    #[test]
    fn known_exported_key_decodes() {
        let key = ExportedSessionKey::from_base64(vectors::MEGOLM_EXPORTED_SESSION_KEY).unwrap();

        assert_eq!(key.ratchet_index(), 0);
        assert_eq!(key.session_id(), vectors::MEGOLM_SESSION_ID);
        assert_eq!(key.to_base64().as_str(), vectors::MEGOLM_EXPORTED_SESSION_KEY);
    }

    #[test]
    fn known_signed_key_decodes() {
        let key = SessionKey::from_base64(vectors::MEGOLM_SIGNED_SESSION_KEY).unwrap();

        assert_eq!(key.session_id(), vectors::MEGOLM_SESSION_ID);
        assert_eq!(key.to_base64().as_str(), vectors::MEGOLM_SIGNED_SESSION_KEY);

        let exported = ExportedSessionKey::from(&key);
        assert_eq!(exported.to_base64().as_str(), vectors::MEGOLM_EXPORTED_SESSION_KEY);
    }

    #[test]
    fn both_formats_are_accepted_as_room_keys() {
        let exported = decode_session_key(vectors::MEGOLM_EXPORTED_SESSION_KEY).unwrap();
        let signed = decode_session_key(vectors::MEGOLM_SIGNED_SESSION_KEY).unwrap();

        assert_eq!(exported.to_base64(), signed.to_base64());
    }

    #[test]
    fn tampered_signed_key_is_rejected() {
        let mut bytes = base64_decode(vectors::MEGOLM_SIGNED_SESSION_KEY).unwrap();
        bytes[10] ^= 1;

        assert_matches!(
            SessionKey::from_bytes(&bytes),
            Err(SessionKeyDecodeError::Signature(_))
        );
        assert_matches!(
            decode_session_key(&base64_encode(&bytes)),
            Err(SessionKeyDecodeError::Signature(_))
        );
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert_matches!(
            ExportedSessionKey::from_bytes(&[]),
            Err(SessionKeyDecodeError::Length(165, 0))
        );
        assert_matches!(
            ExportedSessionKey::from_bytes(&[1; 100]),
            Err(SessionKeyDecodeError::Length(165, 100))
        );
        assert_matches!(
            ExportedSessionKey::from_bytes(&[7; 165]),
            Err(SessionKeyDecodeError::Version(7))
        );
        assert_matches!(decode_session_key("***"), Err(SessionKeyDecodeError::Base64(_)));
    }
}
