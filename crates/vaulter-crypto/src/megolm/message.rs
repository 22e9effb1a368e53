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

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey, SIGNATURE_LENGTH};
use thiserror::Error;

use crate::{
    ciphers::{MegolmCipherKeys, MAC_SIZE, TRUNCATED_MAC_SIZE},
    utilities::{base64_decode, base64_encode},
};

const VERSION_TRUNCATED_MAC: u8 = 3;
const VERSION_FULL_MAC: u8 = 4;

const INDEX_TAG: u8 = 0x08;
const CIPHERTEXT_TAG: u8 = 0x12;

/// Error type describing failures when decoding a Megolm message.
#[derive(Debug, Error)]
pub enum MessageDecodeError {
    /// The message isn't valid base64.
    #[error("the message isn't valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The message has a version we don't understand.
    #[error("unknown message version {0}")]
    InvalidVersion(u8),

    /// The message is too short to contain a MAC and a signature.
    #[error("the message is too short, got {0} bytes")]
    MessageTooShort(usize),

    /// The protobuf part of the message couldn't be decoded.
    #[error("the message payload couldn't be decoded: {0}")]
    Payload(&'static str),
}

/// The authentication tag of a Megolm message.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum MegolmMac {
    /// The first 8 bytes of the HMAC, used by version 3 messages.
    Truncated([u8; TRUNCATED_MAC_SIZE]),
    /// The full HMAC, used by version 4 messages.
    Full([u8; MAC_SIZE]),
}

impl MegolmMac {
    /// The MAC as a byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            MegolmMac::Truncated(mac) => mac.as_slice(),
            MegolmMac::Full(mac) => mac.as_slice(),
        }
    }

    fn from_full(mac: [u8; MAC_SIZE], truncate: bool) -> Self {
        if truncate {
            let mut truncated = [0u8; TRUNCATED_MAC_SIZE];
            truncated.copy_from_slice(&mac[..TRUNCATED_MAC_SIZE]);

            MegolmMac::Truncated(truncated)
        } else {
            MegolmMac::Full(mac)
        }
    }
}

impl fmt::Debug for MegolmMac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MegolmMac").field(&base64_encode(self.as_bytes())).finish()
    }
}

/// An encrypted Megolm message.
///
/// The wire format is a version byte, a protobuf encoded payload carrying
/// the message index and the AES-CBC ciphertext, the HMAC of everything
/// before it, and finally an Ed25519 signature over all of the above.
#[derive(Clone, PartialEq, Eq)]
pub struct MegolmMessage {
    /// The version byte and the protobuf payload, as received.
    encoded: Vec<u8>,
    message_index: u32,
    ciphertext: Vec<u8>,
    mac: MegolmMac,
    signature: Signature,
}

impl MegolmMessage {
    /// The index of the ratchet state the message was encrypted with.
    pub fn message_index(&self) -> u32 {
        self.message_index
    }

    /// The AES-CBC ciphertext of the message.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// The MAC of the message.
    pub fn mac(&self) -> &MegolmMac {
        &self.mac
    }

    /// The signature of the message.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Decode a message from its unpadded base64 form, as found in the
    /// `ciphertext` field of `m.room.encrypted` events.
    pub fn from_base64(message: &str) -> Result<Self, MessageDecodeError> {
        Self::from_bytes(&base64_decode(message)?)
    }

    /// Decode a message from its binary form.
    pub fn from_bytes(message: &[u8]) -> Result<Self, MessageDecodeError> {
        let version = *message.first().ok_or(MessageDecodeError::MessageTooShort(0))?;

        let mac_length = match version {
            VERSION_TRUNCATED_MAC => TRUNCATED_MAC_SIZE,
            VERSION_FULL_MAC => MAC_SIZE,
            version => return Err(MessageDecodeError::InvalidVersion(version)),
        };

        if message.len() < 1 + mac_length + SIGNATURE_LENGTH {
            return Err(MessageDecodeError::MessageTooShort(message.len()));
        }

        let (authenticated, signature) = message.split_at(message.len() - SIGNATURE_LENGTH);
        let (encoded, mac) = authenticated.split_at(authenticated.len() - mac_length);

        let (message_index, ciphertext) = decode_payload(&encoded[1..])?;

        let mac = match mac_length {
            TRUNCATED_MAC_SIZE => {
                let mut truncated = [0u8; TRUNCATED_MAC_SIZE];
                truncated.copy_from_slice(mac);
                MegolmMac::Truncated(truncated)
            }
            _ => {
                let mut full = [0u8; MAC_SIZE];
                full.copy_from_slice(mac);
                MegolmMac::Full(full)
            }
        };

        let mut signature_bytes = [0u8; SIGNATURE_LENGTH];
        signature_bytes.copy_from_slice(signature);

        Ok(Self {
            encoded: encoded.to_vec(),
            message_index,
            ciphertext,
            mac,
            signature: Signature::from_bytes(&signature_bytes),
        })
    }

    /// Encode the message into its binary form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.encoded.clone();
        bytes.extend_from_slice(self.mac.as_bytes());
        bytes.extend_from_slice(&self.signature.to_bytes());

        bytes
    }

    /// Encode the message as unpadded base64.
    pub fn to_base64(&self) -> String {
        base64_encode(self.to_bytes())
    }

    pub(super) fn encrypt(
        message_index: u32,
        keys: &MegolmCipherKeys,
        signing_key: &SigningKey,
        plaintext: &[u8],
        truncate_mac: bool,
    ) -> Self {
        let ciphertext = keys.encrypt(plaintext);
        let version = if truncate_mac { VERSION_TRUNCATED_MAC } else { VERSION_FULL_MAC };

        let mut encoded = vec![version];
        encode_payload(message_index, &ciphertext, &mut encoded);

        let mac = MegolmMac::from_full(keys.mac(&encoded), truncate_mac);

        let mut signed = encoded.clone();
        signed.extend_from_slice(mac.as_bytes());
        let signature = signing_key.sign(&signed);

        Self { encoded, message_index, ciphertext, mac, signature }
    }

    /// The bytes the MAC was calculated over.
    pub(super) fn mac_input(&self) -> &[u8] {
        &self.encoded
    }

    /// Check that the message was signed by the given session signing key.
    pub(super) fn verify_signature(&self, key: &VerifyingKey) -> bool {
        let mut signed = self.encoded.clone();
        signed.extend_from_slice(self.mac.as_bytes());

        key.verify_strict(&signed, &self.signature).is_ok()
    }
}

impl fmt::Debug for MegolmMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MegolmMessage")
            .field("message_index", &self.message_index)
            .field("ciphertext_length", &self.ciphertext.len())
            .field("mac", &self.mac)
            .finish_non_exhaustive()
    }
}

fn encode_varint(mut value: u64, output: &mut Vec<u8>) {
    while value >= 0x80 {
        output.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }

    output.push(value as u8);
}

fn decode_varint(input: &mut &[u8]) -> Result<u64, MessageDecodeError> {
    let mut value = 0u64;

    for shift in (0..64).step_by(7) {
        let (&byte, rest) =
            input.split_first().ok_or(MessageDecodeError::Payload("truncated varint"))?;
        *input = rest;

        value |= u64::from(byte & 0x7f) << shift;

        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }

    Err(MessageDecodeError::Payload("varint is too long"))
}

fn encode_payload(message_index: u32, ciphertext: &[u8], output: &mut Vec<u8>) {
    output.push(INDEX_TAG);
    encode_varint(message_index.into(), output);
    output.push(CIPHERTEXT_TAG);
    encode_varint(ciphertext.len() as u64, output);
    output.extend_from_slice(ciphertext);
}

/// Decode the protobuf payload, fields we don't know about are skipped.
fn decode_payload(mut input: &[u8]) -> Result<(u32, Vec<u8>), MessageDecodeError> {
    let mut message_index = 0;
    let mut ciphertext = Vec::new();

    while !input.is_empty() {
        let tag = decode_varint(&mut input)?;

        match (tag >> 3, tag & 0x7) {
            (1, 0) => {
                message_index = u32::try_from(decode_varint(&mut input)?)
                    .map_err(|_| MessageDecodeError::Payload("message index is too large"))?;
            }
            (2, 2) => {
                ciphertext = take_length_delimited(&mut input)?.to_vec();
            }
            (_, 0) => {
                decode_varint(&mut input)?;
            }
            (_, 1) => skip(&mut input, 8)?,
            (_, 2) => {
                take_length_delimited(&mut input)?;
            }
            (_, 5) => skip(&mut input, 4)?,
            _ => return Err(MessageDecodeError::Payload("unsupported wire type")),
        }
    }

    Ok((message_index, ciphertext))
}

fn take_length_delimited<'a>(input: &mut &'a [u8]) -> Result<&'a [u8], MessageDecodeError> {
    let length = usize::try_from(decode_varint(input)?)
        .map_err(|_| MessageDecodeError::Payload("field is too long"))?;

    if input.len() < length {
        return Err(MessageDecodeError::Payload("truncated field"));
    }

    let (field, rest) = input.split_at(length);
    *input = rest;

    Ok(field)
}

fn skip(input: &mut &[u8], length: usize) -> Result<(), MessageDecodeError> {
    if input.len() < length {
        return Err(MessageDecodeError::Payload("truncated field"));
    }

    *input = &input[length..];

    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::{decode_payload, encode_payload, MegolmMac, MegolmMessage, MessageDecodeError};

    #[test]
    fn known_message_decodes() {
        let message =
            MegolmMessage::from_base64(vaulter_test::vectors::MEGOLM_MESSAGE_AT_5).unwrap();

        assert_eq!(message.message_index(), 5);
        assert_eq!(message.ciphertext().len(), 144);
        assert_matches!(message.mac(), MegolmMac::Truncated(_));
        assert_eq!(message.to_base64(), vaulter_test::vectors::MEGOLM_MESSAGE_AT_5);
    }

    #[test]
    fn payload_roundtrip_with_large_index() {
        let mut encoded = Vec::new();
        encode_payload(300_000, b"ciphertext", &mut encoded);

        let (index, ciphertext) = decode_payload(&encoded).unwrap();
        assert_eq!(index, 300_000);
        assert_eq!(ciphertext, b"ciphertext");
    }

    #[test]
    fn unknown_payload_fields_are_skipped() {
        // Field 3 as a varint and field 4 as a length delimited value.
        let mut encoded = vec![0x18, 0x96, 0x01, 0x22, 0x02, 0xaa, 0xbb];
        encode_payload(7, b"abc", &mut encoded);

        let (index, ciphertext) = decode_payload(&encoded).unwrap();
        assert_eq!(index, 7);
        assert_eq!(ciphertext, b"abc");
    }

    #[test]
    fn invalid_messages_are_rejected() {
        assert_matches!(
            MegolmMessage::from_bytes(&[]),
            Err(MessageDecodeError::MessageTooShort(0))
        );
        assert_matches!(
            MegolmMessage::from_bytes(&[2; 100]),
            Err(MessageDecodeError::InvalidVersion(2))
        );
        assert_matches!(
            MegolmMessage::from_bytes(&[3; 40]),
            Err(MessageDecodeError::MessageTooShort(40))
        );
        assert_matches!(
            MegolmMessage::from_base64("not base64!"),
            Err(MessageDecodeError::Base64(_))
        );

        // A ciphertext field claiming to be longer than the message.
        let mut message = vec![3, 0x08, 0x00, 0x12, 0x7f];
        message.extend_from_slice(&[0u8; 8 + 64]);
        assert_matches!(MegolmMessage::from_bytes(&message), Err(MessageDecodeError::Payload(_)));
    }
}
