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

use thiserror::Error;

use crate::megolm::{MessageDecodeError, SessionKeyDecodeError};

/// Error type describing why a recovery key couldn't be turned into a backup
/// decryption key.
#[derive(Debug, Error)]
pub enum BackupKeyError {
    /// The backup uses an algorithm we don't know how to decrypt.
    #[error("the backup uses an unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The public key of the recovery key doesn't match the public key the
    /// server published for the backup.
    #[error("the recovery key doesn't match the public key of backup version {version}")]
    KeyMismatch {
        /// The version of the backup the key was checked against.
        version: String,
    },
}

/// Error type describing failures when decrypting a single backed up room
/// key.
#[derive(Debug, Error)]
pub enum SessionKeyError {
    /// The MAC of the backed up session didn't match, the ciphertext has not
    /// been decrypted.
    #[error("the MAC of the backed up session didn't match")]
    MacAuthentication,

    /// The ephemeral key produced an all-zero shared secret.
    #[error("the ephemeral key of the backed up session is not contributory")]
    NonContributoryKey,

    /// The ephemeral key was already used for a different session.
    #[error("the ephemeral key of the backed up session was reused for session {other_session_id}")]
    ReusedEphemeralKey {
        /// The session that was first seen with this ephemeral key.
        other_session_id: String,
    },

    /// The decrypted data isn't a valid backed up room key.
    #[error("the decrypted backup data isn't a valid room key: {0}")]
    Json(#[from] serde_json::Error),

    /// The backed up room key is for a room encryption algorithm we don't
    /// support.
    #[error("the backed up room key uses an unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The `session_key` of the backed up room key couldn't be decoded.
    #[error(transparent)]
    SessionKey(#[from] SessionKeyDecodeError),

    /// The backed up room key belongs to a different session.
    #[error("the backed up room key belongs to session {actual}, expected {expected}")]
    SessionIdMismatch {
        /// The session ID the key was requested for.
        expected: String,
        /// The session ID the decrypted key belongs to.
        actual: String,
    },
}

impl SessionKeyError {
    /// Did the decryption fail because the backup data wasn't authentic?
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, SessionKeyError::MacAuthentication)
    }
}

/// Error type describing failures when decrypting a Megolm message.
#[derive(Debug, Error)]
pub enum MegolmError {
    /// The ciphertext isn't a valid Megolm message.
    #[error(transparent)]
    Decode(#[from] MessageDecodeError),

    /// The session key couldn't be decoded.
    #[error(transparent)]
    SessionKey(#[from] SessionKeyDecodeError),

    /// The message was encrypted at an index that precedes the first index
    /// our copy of the session knows about.
    #[error(
        "the message was encrypted with index {message_index}, but the session \
         is only known from index {first_known_index}"
    )]
    UnknownMessageIndex {
        /// The first index we are able to decrypt.
        first_known_index: u32,
        /// The index the message was encrypted at.
        message_index: u32,
    },

    /// The MAC of the message didn't match.
    #[error("the MAC of the message didn't match")]
    InvalidMac,

    /// The Ed25519 signature of the message didn't verify.
    #[error("the signature of the message couldn't be verified")]
    InvalidSignature,

    /// The plaintext had invalid padding.
    #[error("the decrypted message has invalid padding")]
    InvalidPadding,

    /// The plaintext isn't valid UTF-8.
    #[error("the decrypted message isn't valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

impl MegolmError {
    /// Did the decryption fail because the message couldn't be authenticated?
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, MegolmError::InvalidMac | MegolmError::InvalidSignature)
    }
}

/// Error type describing why an encrypted event or its decrypted payload was
/// rejected.
#[derive(Debug, Error)]
pub enum EventError {
    /// The event content or the decrypted payload isn't a JSON object.
    #[error("the event isn't a valid JSON object: {0}")]
    NotJson(#[from] serde_json::Error),

    /// A Megolm encrypted event lacks a field that is needed to decrypt it.
    #[error("the encrypted event is missing the `{0}` field")]
    MissingField(&'static str),

    /// The decrypted payload claims to belong to a different room than the
    /// encrypted event.
    #[error("the decrypted payload belongs to room {found}, the event was sent in {expected}")]
    MismatchedRoom {
        /// The room the encrypted event was found in.
        expected: String,
        /// The room the decrypted payload names.
        found: String,
    },
}
