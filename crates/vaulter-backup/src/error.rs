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

use std::{io, time::Duration};

use deadpool_sqlite::{CreatePoolError, PoolError};
use thiserror::Error;
use vaulter_crypto::{backups::DecodeError, BackupKeyError};

/// Error type for the requests a [`BackupClient`](crate::BackupClient)
/// makes.
#[derive(Debug, Error)]
pub enum BackupClientError {
    /// The request couldn't be completed, retrying it might succeed.
    ///
    /// This covers transport errors, timeouts, rate limiting and server
    /// errors.
    #[error("the request to the backup server failed: {reason}")]
    Network {
        /// A description of the failure.
        reason: String,
        /// How long the server asked us to wait before retrying.
        retry_after: Option<Duration>,
    },

    /// The server doesn't have the requested backup version or room key.
    #[error("the backup server doesn't have the requested data")]
    NotFound,

    /// The server refused the request, retrying won't help.
    #[error("the backup server rejected the request with status {status}: {errcode:?}")]
    Rejected {
        /// The HTTP status code of the response.
        status: u16,
        /// The Matrix error code of the response, if there was one.
        errcode: Option<String>,
    },

    /// The response of the server couldn't be parsed.
    #[error("the response of the backup server is malformed: {0}")]
    Malformed(String),
}

impl BackupClientError {
    /// Create a new retryable error.
    pub fn network(reason: impl Into<String>) -> Self {
        Self::Network { reason: reason.into(), retry_after: None }
    }

    /// Is it worth retrying the request that failed with this error?
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// How long the server asked us to wait before retrying.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Network { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Error type for the operations of an [`EventStore`](crate::EventStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// An error happened in the underlying database backend.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    /// An error happened while getting a connection from the pool.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The database task didn't run to completion.
    #[error("the database task failed: {0}")]
    Interact(String),

    /// An event couldn't be serialized.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// An error happened in a store implementation outside of this crate.
    #[error(transparent)]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Wrap an error of a custom store implementation.
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend(Box::new(error))
    }
}

/// All the errors that can occur when opening an SQLite event store.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum OpenStoreError {
    /// Failed to create the directory of the database.
    #[error("Failed to create the database directory")]
    CreateDir(#[source] io::Error),

    /// Failed to create the DB pool.
    #[error(transparent)]
    CreatePool(#[from] CreatePoolError),

    /// Failed to apply migrations.
    #[error("Failed to run migrations")]
    Migration(#[source] StoreError),

    /// Failed to get a DB connection from the pool.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Failed to load the database's version.
    #[error("Failed to load database version")]
    LoadVersion(#[source] StoreError),
}

/// An error that stops a run of the [`BackupDecryptor`](crate::BackupDecryptor)
/// before any event is decrypted.
///
/// Errors concerning a single room key or event don't abort the run, they are
/// listed in the [`RunReport`](crate::RunReport).
#[derive(Debug, Error)]
pub enum FatalError {
    /// The recovery key couldn't be decoded.
    #[error("the recovery key is invalid: {0}")]
    InvalidRecoveryKey(#[from] DecodeError),

    /// The recovery key can't decrypt the current backup.
    #[error(transparent)]
    BackupKey(#[from] BackupKeyError),

    /// The current backup version couldn't be fetched.
    #[error("couldn't fetch the current backup version: {0}")]
    BackupFetch(#[source] BackupClientError),

    /// The undecrypted events couldn't be loaded from the event store.
    #[error("couldn't load the undecrypted events: {0}")]
    Store(#[source] StoreError),
}
