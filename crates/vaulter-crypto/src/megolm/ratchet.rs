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

use rand::{rngs::OsRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::ciphers::hmac_sha256;

const PART_COUNT: usize = 4;
const PART_SIZE: usize = 32;
pub(super) const RATCHET_LENGTH: usize = PART_COUNT * PART_SIZE;

/// The HMAC inputs used to derive ratchet part `i` from another part.
const SEEDS: [[u8; 1]; PART_COUNT] = [[0x00], [0x01], [0x02], [0x03]];

/// The Megolm hash ratchet.
///
/// The ratchet consists of four 32 byte parts, `R(i,0)` to `R(i,3)`. Part
/// `j` is re-derived from its predecessor every `2^(8 * (3 - j))` steps, this
/// lets us move forward by arbitrary amounts with at most 1020 hash
/// operations while making it impossible to go backwards.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub(super) struct Ratchet {
    inner: Box<[u8; RATCHET_LENGTH]>,
    counter: u32,
}

impl Ratchet {
    pub(super) fn new() -> Self {
        let mut inner = Box::new([0u8; RATCHET_LENGTH]);
        OsRng.fill_bytes(inner.as_mut_slice());

        Self { inner, counter: 0 }
    }

    pub(super) fn from_bytes(bytes: &[u8; RATCHET_LENGTH], counter: u32) -> Self {
        Self { inner: Box::new(*bytes), counter }
    }

    pub(super) fn as_bytes(&self) -> &[u8; RATCHET_LENGTH] {
        &self.inner
    }

    pub(super) fn index(&self) -> u32 {
        self.counter
    }

    fn part(&self, index: usize) -> &[u8] {
        &self.inner[index * PART_SIZE..(index + 1) * PART_SIZE]
    }

    /// Derive part `to` from part `from`.
    fn rehash(&mut self, from: usize, to: usize) {
        let mut key = [0u8; PART_SIZE];
        key.copy_from_slice(self.part(from));

        let derived = hmac_sha256(&key, &[SEEDS[to].as_slice()]);
        key.zeroize();

        self.inner[to * PART_SIZE..(to + 1) * PART_SIZE].copy_from_slice(&derived);
    }

    /// Move the ratchet forward by a single step.
    pub(super) fn advance(&mut self) {
        let mut mask: u32 = 0x00ff_ffff;
        let mut h = 0;

        self.counter = self.counter.wrapping_add(1);

        // Figure out which parts of the ratchet need to change.
        while h < PART_COUNT {
            if self.counter & mask == 0 {
                break;
            }

            h += 1;
            mask >>= 8;
        }

        // Update the changed parts, the higher ones first since they are
        // derived from the lower ones.
        for i in (h..PART_COUNT).rev() {
            self.rehash(h, i);
        }
    }

    /// Move the ratchet forward to the given index.
    ///
    /// Advancing to an index lower than the current one wraps the counter
    /// around, callers need to make sure that this doesn't happen.
    pub(super) fn advance_to(&mut self, advance_to: u32) {
        for j in 0..PART_COUNT {
            let shift = (PART_COUNT - j - 1) * 8;
            let mask = (!0u32) << shift;

            // How many times part `j` needs to be rehashed.
            let mut steps = u32::from(
                ((advance_to >> shift) as u8).wrapping_sub((self.counter >> shift) as u8),
            );

            if steps == 0 {
                if advance_to < self.counter {
                    steps = 0x100;
                } else {
                    continue;
                }
            }

            // All but the last step only need to touch part `j` itself.
            while steps > 1 {
                self.rehash(j, j);
                steps -= 1;
            }

            for k in (j..PART_COUNT).rev() {
                self.rehash(j, k);
            }

            self.counter = advance_to & mask;
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{Ratchet, RATCHET_LENGTH};
    use crate::utilities::base64_decode_array;

    fn initial_ratchet() -> Ratchet {
        Ratchet::from_bytes(
            &base64_decode_array::<RATCHET_LENGTH>(vaulter_test::vectors::MEGOLM_INITIAL_RATCHET)
                .unwrap(),
            0,
        )
    }

    #[test]
    fn advancing_matches_known_ratchet_states() {
        let mut ratchet = initial_ratchet();
        ratchet.advance_to(300);

        assert_eq!(ratchet.index(), 300);
        assert_eq!(
            ratchet.as_bytes().as_slice(),
            base64_decode_array::<RATCHET_LENGTH>(vaulter_test::vectors::MEGOLM_RATCHET_AT_300)
                .unwrap()
                .as_slice()
        );

        let mut ratchet = initial_ratchet();
        ratchet.advance_to(0x0100_0001);

        assert_eq!(ratchet.index(), 0x0100_0001);
        assert_eq!(
            ratchet.as_bytes().as_slice(),
            base64_decode_array::<RATCHET_LENGTH>(
                vaulter_test::vectors::MEGOLM_RATCHET_AT_16777217
            )
            .unwrap()
            .as_slice()
        );
    }

    #[test]
    fn advancing_to_the_current_index_is_a_noop() {
        let mut ratchet = initial_ratchet();
        ratchet.advance_to(0);

        assert_eq!(ratchet.as_bytes(), initial_ratchet().as_bytes());
    }

    #[test]
    fn only_the_last_part_changes_within_a_block() {
        let initial = initial_ratchet();
        let mut ratchet = initial.clone();
        ratchet.advance();

        assert_eq!(ratchet.as_bytes()[..96], initial.as_bytes()[..96]);
        assert_ne!(ratchet.as_bytes()[96..], initial.as_bytes()[96..]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn stepping_and_jumping_agree(first in 0u32..600, second in 0u32..600) {
            let (low, high) = if first <= second { (first, second) } else { (second, first) };

            let mut stepped = initial_ratchet();
            stepped.advance_to(low);

            let mut jumped = stepped.clone();

            for _ in low..high {
                stepped.advance();
            }

            jumped.advance_to(high);

            prop_assert_eq!(stepped.index(), high);
            prop_assert_eq!(jumped.index(), high);
            prop_assert_eq!(stepped.as_bytes().as_slice(), jumped.as_bytes().as_slice());
        }
    }
}
