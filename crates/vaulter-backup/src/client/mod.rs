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

//! Access to the server-side key backup.

use async_trait::async_trait;
use vaulter_crypto::types::{BackupDescriptor, EncryptedSessionExport};

use crate::{AsyncTraitDeps, BackupClientError};

mod http;

pub use http::HttpBackupClient;

/// Read access to the server-side key backup of a user.
///
/// Implementations only transport the data, the room keys they return are
/// still encrypted. Requests are retried by the caller, an implementation
/// signals that retrying makes sense by returning
/// [`BackupClientError::Network`].
#[async_trait]
pub trait BackupClient: AsyncTraitDeps {
    /// Fetch the descriptor of the current backup version.
    async fn backup_descriptor(&self) -> Result<BackupDescriptor, BackupClientError>;

    /// Fetch the backed up room key of a single session.
    ///
    /// # Arguments
    ///
    /// * `room_id` - The room the session belongs to.
    ///
    /// * `session_id` - The ID of the Megolm session.
    ///
    /// * `version` - The backup version to fetch the key from.
    async fn session_export(
        &self,
        room_id: &str,
        session_id: &str,
        version: &str,
    ) -> Result<EncryptedSessionExport, BackupClientError>;
}
