// Copyright 2021, 2022 The Matrix.org Foundation C.I.C.
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

//! Server-side backup support for room keys
//!
//! This module implements recovery from server-side backups using the
//! `m.megolm_backup.v1.curve25519-aes-sha2` backup algorithm: decoding the
//! recovery key, checking it against the public key of the backup and
//! decrypting individual backed up room keys.
//!
//! The backup algorithm encrypts every room key with AES-256-CTR and a fixed
//! IV, which is only sound because every room key is encrypted for a fresh
//! ephemeral key. Room keys that share an ephemeral key must not be trusted.
//!
//! [spec]: https://spec.matrix.org/unstable/client-server-api/#server-side-key-backups

mod keys;

pub use keys::{BackupDecryptionKey, BackupPublicKey, DecodeError, RecoveryKey};
