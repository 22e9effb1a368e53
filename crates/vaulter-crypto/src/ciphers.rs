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

use aes::{
    cipher::{
        block_padding::{Pkcs7, UnpadError},
        generic_array::GenericArray,
        BlockDecryptMut, BlockEncryptMut, IvSizeUser, KeyIvInit, KeySizeUser, StreamCipher,
    },
    Aes256,
};
use ctr::Ctr128BE;
use hkdf::Hkdf;
use hmac::{Hmac, Mac as _};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

// We could use the `keysize()` method Aes256Ctr as KeySize exposes, but it's
// not const (yet?), same for the IV size.
pub(crate) const IV_SIZE: usize = 16;
pub(crate) const KEY_SIZE: usize = 32;
pub(crate) const MAC_SIZE: usize = 32;
pub(crate) const TRUNCATED_MAC_SIZE: usize = 8;
const MEGOLM_EXPANDED_SIZE: usize = 2 * KEY_SIZE + IV_SIZE;

type Aes256Ctr = Ctr128BE<Aes256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;
type HmacSha256 = Hmac<Sha256>;

type Aes256Key = GenericArray<u8, <Aes256Ctr as KeySizeUser>::KeySize>;
type Aes256Iv = GenericArray<u8, <Aes256Ctr as IvSizeUser>::IvSize>;

/// The authentication tag of some data didn't match the expected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MacMismatch;

/// Expand some input keying material into `N` bytes using HKDF-SHA-256.
pub(crate) fn hkdf_sha256<const N: usize>(
    salt: &[u8],
    input_key_material: &[u8],
    info: &[u8],
) -> Zeroizing<[u8; N]> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), input_key_material);
    let mut output = Zeroizing::new([0u8; N]);

    hkdf.expand(info, output.as_mut_slice()).expect("Output length is valid for HKDF");

    output
}

/// Calculate the HMAC-SHA-256 of the concatenation of the given parts.
pub(crate) fn hmac_sha256(key: &[u8; KEY_SIZE], parts: &[&[u8]]) -> [u8; MAC_SIZE] {
    let mut hmac = HmacSha256::new_from_slice(key)
        .expect("We should be able to create a new HMAC object from our 32 byte MAC key");

    for part in parts {
        hmac.update(part);
    }

    let mut mac = [0u8; MAC_SIZE];
    mac.copy_from_slice(&hmac.finalize().into_bytes());

    mac
}

/// Compare a possibly truncated MAC against the full MAC in constant time.
///
/// An empty or over-long tag never matches.
fn verify_truncated(expected: &[u8; MAC_SIZE], tag: &[u8]) -> Result<(), MacMismatch> {
    if tag.is_empty() || tag.len() > MAC_SIZE {
        return Err(MacMismatch);
    }

    if bool::from(expected[..tag.len()].ct_eq(tag)) {
        Ok(())
    } else {
        Err(MacMismatch)
    }
}

/// Keys for the combination of AES-CTR-256 and truncated HMAC-SHA-256 that the
/// `m.megolm_backup.v1.curve25519-aes-sha2` backups use.
///
/// ⚠️  This struct provides low-level cryptographic primitives.
///
/// Both keys are derived from the X25519 shared secret between the backup key
/// and the per-session ephemeral key. The counter starts at zero for every
/// session, which is only safe as long as no ephemeral key is ever reused.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct BackupCipherKeys {
    aes_key: Box<[u8; KEY_SIZE]>,
    mac_key: Box<[u8; KEY_SIZE]>,
}

impl BackupCipherKeys {
    const SALT: [u8; KEY_SIZE] = [0u8; KEY_SIZE];
    const AES_INFO: &'static [u8] = b"backup";
    const MAC_INFO: &'static [u8] = b"backup_auth";

    /// Derive the AES and MAC keys from an X25519 shared secret.
    pub(crate) fn from_shared_secret(shared_secret: &[u8; KEY_SIZE]) -> Self {
        let aes_key = hkdf_sha256::<KEY_SIZE>(&Self::SALT, shared_secret, Self::AES_INFO);
        let mac_key = hkdf_sha256::<KEY_SIZE>(&Self::SALT, shared_secret, Self::MAC_INFO);

        Self { aes_key: Box::new(*aes_key), mac_key: Box::new(*mac_key) }
    }

    /// The truncated MAC over the ephemeral public key and the ciphertext.
    pub(crate) fn mac(
        &self,
        ephemeral_key: &[u8; KEY_SIZE],
        ciphertext: &[u8],
    ) -> [u8; TRUNCATED_MAC_SIZE] {
        let mac = hmac_sha256(&self.mac_key, &[ephemeral_key.as_slice(), ciphertext]);

        let mut truncated = [0u8; TRUNCATED_MAC_SIZE];
        truncated.copy_from_slice(&mac[..TRUNCATED_MAC_SIZE]);

        truncated
    }

    /// Encrypt the plaintext in place and return the MAC of the ciphertext.
    pub(crate) fn encrypt(
        &self,
        ephemeral_key: &[u8; KEY_SIZE],
        plaintext: &mut [u8],
    ) -> [u8; TRUNCATED_MAC_SIZE] {
        self.apply_keystream(plaintext);
        self.mac(ephemeral_key, plaintext)
    }

    /// Authenticate and decrypt the ciphertext.
    ///
    /// Nothing is decrypted unless the MAC matches.
    pub(crate) fn decrypt(
        &self,
        ephemeral_key: &[u8; KEY_SIZE],
        ciphertext: &[u8],
        mac: &[u8; TRUNCATED_MAC_SIZE],
    ) -> Result<Zeroizing<Vec<u8>>, MacMismatch> {
        let expected = hmac_sha256(&self.mac_key, &[ephemeral_key.as_slice(), ciphertext]);
        verify_truncated(&expected, mac)?;

        let mut plaintext = Zeroizing::new(ciphertext.to_vec());
        self.apply_keystream(&mut plaintext);

        Ok(plaintext)
    }

    fn apply_keystream(&self, data: &mut [u8]) {
        let key = Aes256Key::from_slice(self.aes_key.as_slice());
        let iv = Aes256Iv::default();

        let mut cipher = Aes256Ctr::new(key, &iv);
        cipher.apply_keystream(data);
    }
}

/// The AES-256-CBC and HMAC-SHA-256 keys, plus IV, that a single Megolm
/// ratchet state expands into.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct MegolmCipherKeys {
    aes_key: Box<[u8; KEY_SIZE]>,
    mac_key: Box<[u8; KEY_SIZE]>,
    iv: Box<[u8; IV_SIZE]>,
}

impl MegolmCipherKeys {
    const INFO: &'static [u8] = b"MEGOLM_KEYS";
    const SALT: [u8; 1] = [0];

    pub(crate) fn from_ratchet(ratchet: &[u8]) -> Self {
        let expanded = hkdf_sha256::<MEGOLM_EXPANDED_SIZE>(&Self::SALT, ratchet, Self::INFO);

        let mut aes_key = Box::new([0u8; KEY_SIZE]);
        let mut mac_key = Box::new([0u8; KEY_SIZE]);
        let mut iv = Box::new([0u8; IV_SIZE]);

        aes_key.copy_from_slice(&expanded[..KEY_SIZE]);
        mac_key.copy_from_slice(&expanded[KEY_SIZE..2 * KEY_SIZE]);
        iv.copy_from_slice(&expanded[2 * KEY_SIZE..]);

        Self { aes_key, mac_key, iv }
    }

    pub(crate) fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let cipher = Aes256CbcEnc::new(
            GenericArray::from_slice(self.aes_key.as_slice()),
            GenericArray::from_slice(self.iv.as_slice()),
        );

        cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    pub(crate) fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, UnpadError> {
        let cipher = Aes256CbcDec::new(
            GenericArray::from_slice(self.aes_key.as_slice()),
            GenericArray::from_slice(self.iv.as_slice()),
        );

        cipher.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
    }

    pub(crate) fn mac(&self, message: &[u8]) -> [u8; MAC_SIZE] {
        hmac_sha256(&self.mac_key, &[message])
    }

    /// Verify a full or truncated MAC of the given message.
    pub(crate) fn verify_mac(&self, message: &[u8], tag: &[u8]) -> Result<(), MacMismatch> {
        verify_truncated(&self.mac(message), tag)
    }
}
