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

use base64::{
    alphabet,
    engine::{general_purpose, DecodePaddingMode, GeneralPurpose},
    Engine,
};

/// Matrix uses unpadded base64 everywhere, but some servers and clients
/// still pad, so padding is accepted but never produced.
const STANDARD_NO_PAD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    general_purpose::NO_PAD.with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode the input as base64 with no padding.
pub fn base64_decode(input: impl AsRef<[u8]>) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD_NO_PAD.decode(input)
}

/// Encode the input as base64 with no padding.
pub fn base64_encode(input: impl AsRef<[u8]>) -> String {
    STANDARD_NO_PAD.encode(input)
}

/// Decode a base64 string that must contain exactly `N` bytes.
pub(crate) fn base64_decode_array<const N: usize>(
    input: impl AsRef<[u8]>,
) -> Result<[u8; N], FixedLengthError> {
    let decoded = base64_decode(input)?;

    decoded
        .as_slice()
        .try_into()
        .map_err(|_| FixedLengthError::Length { expected: N, got: decoded.len() })
}

/// Error for base64 values that are expected to decode to a fixed size.
#[derive(Debug, thiserror::Error)]
pub enum FixedLengthError {
    /// The value isn't valid base64.
    #[error(transparent)]
    Base64(#[from] base64::DecodeError),
    /// The value decoded to the wrong number of bytes.
    #[error("expected {expected} bytes, got {got}")]
    Length {
        /// The number of bytes the value should have.
        expected: usize,
        /// The number of bytes the value had.
        got: usize,
    },
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::{base64_decode, base64_decode_array, base64_encode, FixedLengthError};

    #[test]
    fn padding_is_accepted_but_not_produced() {
        assert_eq!(base64_encode(b"ab"), "YWI");
        assert_eq!(base64_decode("YWI").unwrap(), b"ab");
        assert_eq!(base64_decode("YWI=").unwrap(), b"ab");
    }

    #[test]
    fn fixed_length_decoding() {
        let encoded = base64_encode([7u8; 32]);
        assert_eq!(base64_decode_array::<32>(&encoded).unwrap(), [7u8; 32]);

        assert_matches!(
            base64_decode_array::<16>(&encoded),
            Err(FixedLengthError::Length { expected: 16, got: 32 })
        );
        assert_matches!(base64_decode_array::<32>("not base64!"), Err(FixedLengthError::Base64(_)));
    }
}
