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

#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations)]

pub mod client;
pub mod config;
mod decryptor;
mod error;
pub mod report;
mod retry;
pub mod store;

pub use client::{BackupClient, HttpBackupClient};
pub use decryptor::{BackupDecryptor, RunState};
pub use error::{BackupClientError, FatalError, OpenStoreError, StoreError};
pub use report::{FailureKind, RunReport};
pub use store::{EventStore, MemoryEventStore, SqliteEventStore};

/// Super trait of the collaborator traits, their implementations are shared
/// between tasks.
pub trait AsyncTraitDeps: std::fmt::Debug + Send + Sync {}
impl<T: std::fmt::Debug + Send + Sync> AsyncTraitDeps for T {}

#[cfg(test)]
vaulter_test::init_tracing_for_tests!();
