// Copyright 2022 The Matrix.org Foundation C.I.C.
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

//! Module containing typed versions of the JSON the key backup API and the
//! event store exchange with the decryption pipeline.
//!
//! Everything here is validated at the point where it is deserialized, the
//! cryptographic code never sees a loosely typed JSON value.

mod backup;
mod events;

pub use backup::{
    BackedUpRoomKey, BackupDescriptor, EncryptedSessionData, EncryptedSessionExport,
    ExportFormatError, KeyBackupData, MegolmV1AuthData, RecoveredSessionKey, RoomKeyBackupInfo,
    Signatures, MEGOLM_BACKUP_V1_CURVE25519_AES_SHA2,
};
pub use events::{DecryptedMessage, EncryptedMessageEvent, EventEncryptionAlgorithm};
