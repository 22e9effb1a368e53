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

//! Deterministic key material and ciphertexts shared by the crypto tests.
//!
//! The backup keys are the X25519 test vectors of RFC 7748, section 6.1: the
//! backup private key is Alice's key, the ephemeral key of the backed up
//! session is Bob's key. The Megolm session and the messages encrypted with
//! it were generated with an independent implementation.

/// The private key of the test backup, unpadded base64.
pub const BACKUP_PRIVATE_KEY: &str = "dwdtCnMYpX08FsFyUbJmRd9ML4frwJkqsXf7pR25LCo";

/// The public key of the test backup, as published in the backup `auth_data`.
pub const BACKUP_PUBLIC_KEY: &str = "hSDwCYkwp1R0i33ctD73Wg2/Og0mOBr066SpjqqbTmo";

/// The version of the test backup.
pub const BACKUP_VERSION: &str = "3";

/// The recovery key encoding [`BACKUP_PRIVATE_KEY`].
pub const RECOVERY_KEY: &str = "EsTcLW2KPGiFwKEA3As5g5c4BXwkqeeJZJV8Q9fugUMNUE4d";

/// [`RECOVERY_KEY`] the way it is shown to users.
pub const RECOVERY_KEY_DISPLAYED: &str =
    "EsTc LW2K PGiF wKEA 3As5 g5c4 BXwk qeeJ ZJV8 Q9fu gUMN UE4d";

/// The ephemeral private key the test session was backed up with.
pub const EPHEMERAL_PRIVATE_KEY: &str = "XasIfmJKikt54X+Lg4AO5m87sSkmGLb9HC+LJ/+I4Os";

/// The ephemeral public key of the backed up test session.
pub const EPHEMERAL_PUBLIC_KEY: &str = "3p7bfXt9wbTTW2HC7OQ1Nz+DQ8hbeGdNrfx+FG+IK08";

/// The X25519 shared secret of the backup key and the ephemeral key, hex encoded.
pub const SHARED_SECRET: &str = "4a5d9d5ba4ce2de1728e3bf480350f25e07e21c947d19e3376f09b3c1e161742";

/// The room the test session belongs to.
pub const BACKUP_ROOM_ID: &str = "!cURbafjkfsMDVwdRDQ:matrix.org";

/// The plaintext of the backed up test session.
pub const BACKED_UP_ROOM_KEY: &str =
    r#"{"algorithm":"m.megolm.v1.aes-sha2","sender_key":"XjhWTCjW7l59pbfx9tlCBQolfnIQWARoKOzjTOPSlWM","session_key":"AQAAAABLqoGpNj4wWA6H3jNBb5l0dvK4XFQjvY4an6KjBVU96DV0HvvVHRInb5amKMOMeEZfvzSXiqxN8FDg5neTV+04LFWBuf2+/ckzqaEH7Aj4s67IAyTBHoINHKGSk81pUUItMeMwr2Utlo6D7RvRBq8gcLPUpQIlvph3wrQIkgYpxevOuVzHt3EugKUXEjg4pYQ3BHIhjtgVfnSaaCjkHN6p","sender_claimed_keys":{"ed25519":"6865XMe3cS6ApRcSODilhDcEciGO2BV+dJpoKOQc3qk"},"forwarding_curve25519_key_chain":[]}"#;

/// The encrypted [`BACKED_UP_ROOM_KEY`].
pub const BACKUP_CIPHERTEXT: &str =
    "ySvG0/iAUmvhSxbIuuZQLpmpobgddpqIo7sjhQoyTqcLLdy9VdEE0u0nfRcOPi4ViJPOWkbcR4fnltqkKgtugW8vJC3ZKtKkarrYGja0THB1ABi3qXs58tcZdN8erGfT7yNrSbNpaunckeD69ChFCbtc3r4QEYHO5dZvTQKYKZGyJZjVO7jRQWgmq3yNBuwvrh9thiShtAcm+Paa3JVldPL5H3GzJB203a046PCwA+rNEuUpCjKKzjx5BQ60EM7GCJzKeJcsdQul+mb8LGb617BwBYNEfS0Ra1fzVaxdiUXw1Xo3+uiJmut9oNTpSqGuVv68JTfO8EreYuTKSZ6GNSNca3pqEnWTcyjvZAyqL4Ei76g8siyk7WigzeM81pyKbmpRhPtKQtrxTu8XwGslPqYVEGI1EDQ+UquKRxjtCK4Z9cL7jKRWrpaz5JkHXdlzxCzxLi7G7CMZk8UG3IRTdRaNHi+w8w9dM1wn37H+gN1Hp8R8+N/eDijt/MA5uQbZwWGrrrcoTYJZhM0IW6PsYooEjwDw/Rsj4zI3j7SvrZdaCLuHBEk9Y5SfGoTSYUy9Y1M8kE+Eb9/73Zc93Md9JlA";

/// The truncated MAC of [`BACKUP_CIPHERTEXT`].
pub const BACKUP_MAC: &str = "1EjkAG0dg0U";

/// The ID of the test Megolm session.
pub const MEGOLM_SESSION_ID: &str = "6865XMe3cS6ApRcSODilhDcEciGO2BV+dJpoKOQc3qk";

/// The test Megolm session exported at index 0.
pub const MEGOLM_EXPORTED_SESSION_KEY: &str =
    "AQAAAABLqoGpNj4wWA6H3jNBb5l0dvK4XFQjvY4an6KjBVU96DV0HvvVHRInb5amKMOMeEZfvzSXiqxN8FDg5neTV+04LFWBuf2+/ckzqaEH7Aj4s67IAyTBHoINHKGSk81pUUItMeMwr2Utlo6D7RvRBq8gcLPUpQIlvph3wrQIkgYpxevOuVzHt3EugKUXEjg4pYQ3BHIhjtgVfnSaaCjkHN6p";

/// The signed session key of the test Megolm session.
pub const MEGOLM_SIGNED_SESSION_KEY: &str =
    "AgAAAABLqoGpNj4wWA6H3jNBb5l0dvK4XFQjvY4an6KjBVU96DV0HvvVHRInb5amKMOMeEZfvzSXiqxN8FDg5neTV+04LFWBuf2+/ckzqaEH7Aj4s67IAyTBHoINHKGSk81pUUItMeMwr2Utlo6D7RvRBq8gcLPUpQIlvph3wrQIkgYpxevOuVzHt3EugKUXEjg4pYQ3BHIhjtgVfnSaaCjkHN6p445uCerVTHFOZVMzuJ9LbIvbHFiwQ4D+d+b6unT8w60ZJsh7uZ5ZABYwzkD8pJyax8p0E+O5yR8dfNDwO9daDA";

/// The ratchet of the test Megolm session at index 0.
pub const MEGOLM_INITIAL_RATCHET: &str =
    "S6qBqTY+MFgOh94zQW+ZdHbyuFxUI72OGp+iowVVPeg1dB771R0SJ2+WpijDjHhGX780l4qsTfBQ4OZ3k1ftOCxVgbn9vv3JM6mhB+wI+LOuyAMkwR6CDRyhkpPNaVFCLTHjMK9lLZaOg+0b0QavIHCz1KUCJb6Yd8K0CJIGKcU";

/// The ratchet of the test Megolm session advanced to index 300.
pub const MEGOLM_RATCHET_AT_300: &str =
    "S6qBqTY+MFgOh94zQW+ZdHbyuFxUI72OGp+iowVVPeg1dB771R0SJ2+WpijDjHhGX780l4qsTfBQ4OZ3k1ftOCWBgYMWBi+EMT+IwzVipHuQYQgUlJivNYqHguMZz5RflZZz1wVI0/aOLvAxkyzjkd4PYr/ta305b/m6Fr1noH4";

/// The ratchet of the test Megolm session advanced to index 0x1000001.
pub const MEGOLM_RATCHET_AT_16777217: &str =
    "B6DL2ii20Xklryti+aUKo3F9EaKBP4oUx5AsTn4EYCqu+DYmyExaIoo+MRl395FMGjvJLBC3jLdH44w6MrctDgRmK8y6wPbHH+fPVI3RhFr+L+6bJsoVmV27MmXpP76o7iTJiLHgHwbAL8HrOInxvhXN250jmti8aQImqmIGzng";

/// The plaintext of [`MEGOLM_MESSAGE_AT_0`].
pub const MEGOLM_PLAINTEXT_AT_0: &str =
    r#"{"type":"m.room.message","content":{"msgtype":"m.text","body":"It's a secret to everybody"},"room_id":"!cURbafjkfsMDVwdRDQ:matrix.org"}"#;

/// A message encrypted with the test Megolm session at index 0.
pub const MEGOLM_MESSAGE_AT_0: &str =
    "AwgAEpABs7DVDrKIdAlfUpFyUoZ18Fe2uuQuskCj10b2UFIZ+8G8GkxFc0zvxwHy52Yw3jovvWc+spdceB3Y8bRMuNmr3egSXzh8ZADHS/AjHM3FEc6MGIAo/AATg4kPdTaKE75K7pSjU2WppYX51EjOebrvGZOZglyKhX7x8POoZux0vlfgW72X3JgN+hERvh6nP6enmazIYEYjAxhxs6Hc3Igk0uvLsM+4e+JuiQ2vB/qqqJvEam8tgfDRNiQ92KFFdzes19PBzfOw2BnHgBbI5fqBRSKC91RRZgcM";

/// The plaintext of [`MEGOLM_MESSAGE_AT_5`].
pub const MEGOLM_PLAINTEXT_AT_5: &str =
    r#"{"type":"m.room.message","content":{"msgtype":"m.text","body":"Forward secrecy at index five"},"room_id":"!cURbafjkfsMDVwdRDQ:matrix.org"}"#;

/// A message encrypted with the test Megolm session at index 5.
pub const MEGOLM_MESSAGE_AT_5: &str =
    "AwgFEpAB0aU7cnftsqpgh93ZqwPo9i4izw7tB/iHzpoLPGEO7g+LfikPBvXRfn9trrfFC+9qD5gSOLCMDk6ijuC0cTm11IZ9x57ZfE7pOFozhd0zrBNk0vcjAQtsibnPHPFfl4ROXO5NKchoSk+RTEVLOU+OkQNqtFuaBhiZGGEpnGedEf10ubD/hjkeoRF7jM4p55kkJQr+VycYq608VfD0PNFZIkWXyOMto40TmiLysntxcI5+vKicFYmne+U1dDYZxORCQp93X1ID3G1y7cD6p1KqVYcuKSKEzE0M";
