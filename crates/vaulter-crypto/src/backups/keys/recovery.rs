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

use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Error type describing why a recovery key couldn't be decoded.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The decoded key doesn't start with the backup key prefix.
    #[error("The decoded recovery key has an invalid prefix: expected {0:?}, got {1:?}")]
    Prefix([u8; 2], [u8; 2]),
    /// The parity byte doesn't match, the key was most likely mistyped.
    #[error("The parity byte of the recovery key doesn't match")]
    Parity,
    /// The decoded key has the wrong length.
    #[error("The decoded recovery key has an invalid length: expected {0}, got {1}")]
    Length(usize, usize),
    /// The key isn't valid base58.
    #[error(transparent)]
    Base58(#[from] bs58::decode::Error),
}

/// The recovery key of a server-side key backup.
///
/// This is the human readable form of the private Curve25519 key of an
/// `m.megolm_backup.v1.curve25519-aes-sha2` backup. The key is encoded as
/// base58, using the Bitcoin alphabet, after being prefixed with `0x8B 0x01`
/// and followed by a parity byte, the XOR of all the preceding bytes. It is
/// usually displayed in groups of four characters.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct RecoveryKey {
    key: Box<[u8; RecoveryKey::KEY_SIZE]>,
}

impl RecoveryKey {
    const KEY_SIZE: usize = 32;
    const PREFIX: [u8; 2] = [0x8b, 0x01];
    const PREFIX_PARITY: u8 = Self::PREFIX[0] ^ Self::PREFIX[1];
    const DECODED_SIZE: usize = Self::PREFIX.len() + Self::KEY_SIZE + 1;
    const DISPLAY_CHUNK_SIZE: usize = 4;

    fn parity_byte(bytes: &[u8]) -> u8 {
        bytes.iter().fold(Self::PREFIX_PARITY, |acc, x| acc ^ x)
    }

    /// Create a new random recovery key.
    pub fn new() -> Self {
        let mut key = Box::new([0u8; Self::KEY_SIZE]);
        OsRng.fill_bytes(key.as_mut_slice());

        Self { key }
    }

    /// Create a recovery key from the raw private key bytes.
    pub fn from_bytes(key: &[u8; Self::KEY_SIZE]) -> Self {
        Self { key: Box::new(*key) }
    }

    /// The raw private key.
    pub fn as_bytes(&self) -> &[u8; Self::KEY_SIZE] {
        &self.key
    }

    /// Decode a recovery key as it was displayed to the user.
    ///
    /// Whitespace is ignored. The check fails closed, a key with a wrong
    /// prefix, length or parity byte is always rejected.
    pub fn from_base58(value: &str) -> Result<Self, DecodeError> {
        let value: Zeroizing<String> =
            Zeroizing::new(value.chars().filter(|c| !c.is_whitespace()).collect());

        let decoded = Zeroizing::new(
            bs58::decode(value.as_str()).with_alphabet(bs58::Alphabet::BITCOIN).into_vec()?,
        );

        if decoded.len() != Self::DECODED_SIZE {
            return Err(DecodeError::Length(Self::DECODED_SIZE, decoded.len()));
        }

        let (prefix, rest) = decoded.split_at(Self::PREFIX.len());
        let (key_bytes, parity) = rest.split_at(Self::KEY_SIZE);

        if prefix != Self::PREFIX {
            return Err(DecodeError::Prefix(Self::PREFIX, [prefix[0], prefix[1]]));
        }

        if Self::parity_byte(key_bytes) != parity[0] {
            return Err(DecodeError::Parity);
        }

        let mut key = Box::new([0u8; Self::KEY_SIZE]);
        key.copy_from_slice(key_bytes);

        Ok(Self { key })
    }

    /// Encode the recovery key as base58, without any whitespace.
    pub fn to_base58(&self) -> Zeroizing<String> {
        let mut bytes = Zeroizing::new(Vec::with_capacity(Self::DECODED_SIZE));

        bytes.extend_from_slice(&Self::PREFIX);
        bytes.extend_from_slice(self.key.as_slice());
        bytes.push(Self::parity_byte(self.key.as_slice()));

        Zeroizing::new(
            bs58::encode(bytes.as_slice()).with_alphabet(bs58::Alphabet::BITCOIN).into_string(),
        )
    }
}

impl Default for RecoveryKey {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<&str> for RecoveryKey {
    type Error = DecodeError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::from_base58(value)
    }
}

impl fmt::Display for RecoveryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let string = self.to_base58();

        let string = Zeroizing::new(
            string
                .chars()
                .collect::<Vec<char>>()
                .chunks(Self::DISPLAY_CHUNK_SIZE)
                .map(|c| c.iter().collect::<String>())
                .collect::<Vec<_>>()
                .join(" "),
        );

        write!(f, "{}", string.as_str())
    }
}

#[cfg(not(tarpaulin_include))]
impl fmt::Debug for RecoveryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryKey").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use vaulter_test::vectors;

    use super::{DecodeError, RecoveryKey};
    use crate::utilities::base64_decode;

    const ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

    #[test]
    fn known_recovery_key_decodes() {
        let expected = base64_decode(vectors::BACKUP_PRIVATE_KEY).unwrap();

        let key = RecoveryKey::from_base58(vectors::RECOVERY_KEY).unwrap();
        assert_eq!(key.as_bytes().as_slice(), expected.as_slice());

        let spaced = RecoveryKey::from_base58(vectors::RECOVERY_KEY_DISPLAYED).unwrap();
        assert_eq!(spaced.as_bytes(), key.as_bytes());

        assert_eq!(key.to_base58().as_str(), vectors::RECOVERY_KEY);
        assert_eq!(key.to_string(), vectors::RECOVERY_KEY_DISPLAYED);
    }

    #[test]
    fn whitespace_is_ignored() {
        let messy = format!("  {}\n", vectors::RECOVERY_KEY_DISPLAYED.replace(' ', "\t "));
        let key = RecoveryKey::from_base58(&messy).unwrap();

        assert_eq!(key.to_base58().as_str(), vectors::RECOVERY_KEY);
    }

    #[test]
    fn random_keys_roundtrip_through_their_display_form() {
        let key = RecoveryKey::new();
        let decoded = RecoveryKey::from_base58(&key.to_string()).unwrap();

        assert_eq!(key.as_bytes(), decoded.as_bytes());
    }

    #[test]
    fn debug_output_hides_the_key() {
        let key = RecoveryKey::from_base58(vectors::RECOVERY_KEY).unwrap();
        assert_eq!(format!("{key:?}"), "RecoveryKey { .. }");
    }

    #[test]
    fn single_character_corruption_is_caught() {
        let original = vectors::RECOVERY_KEY;
        let mut attempts = 0;
        let mut accepted = 0;

        for (position, current) in original.char_indices() {
            for replacement in ALPHABET.chars().filter(|c| *c != current) {
                let mut corrupted = original.to_owned();
                corrupted.replace_range(position..position + 1, &replacement.to_string());

                attempts += 1;

                if let Ok(key) = RecoveryKey::from_base58(&corrupted) {
                    // A collision of the parity byte never yields the
                    // original key.
                    assert_ne!(key.to_base58().as_str(), original);
                    accepted += 1;
                }
            }
        }

        // A single parity byte can't catch everything, but nearly all typos
        // need to be rejected.
        assert!(accepted * 100 < attempts, "{accepted} out of {attempts} typos were accepted");
    }

    #[test]
    fn invalid_keys_are_rejected() {
        assert_matches!(RecoveryKey::from_base58(""), Err(DecodeError::Length(35, 0)));
        assert_matches!(RecoveryKey::from_base58("0OIl"), Err(DecodeError::Base58(_)));

        // A plain base64 encoded key is not silently accepted.
        assert_matches!(
            RecoveryKey::from_base58(vectors::BACKUP_PRIVATE_KEY),
            Err(DecodeError::Base58(_))
        );

        let mut bytes = vec![0x8c, 0x01];
        bytes.extend_from_slice(&[0u8; 33]);
        let wrong_prefix = bs58::encode(&bytes).into_string();
        assert_matches!(
            RecoveryKey::from_base58(&wrong_prefix),
            Err(DecodeError::Prefix([0x8b, 0x01], [0x8c, 0x01]))
        );

        bytes = vec![0x8b, 0x01];
        bytes.extend_from_slice(&[7u8; 32]);
        bytes.push(0);
        assert_matches!(
            RecoveryKey::from_base58(&bs58::encode(&bytes).into_string()),
            Err(DecodeError::Parity)
        );
    }
}
