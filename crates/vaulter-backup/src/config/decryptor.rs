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

use std::num::NonZeroUsize;

use super::RequestConfig;

const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 8;

/// Configuration of a [`BackupDecryptor`](crate::BackupDecryptor).
///
/// # Examples
///
/// ```
/// use std::num::NonZeroUsize;
///
/// use vaulter_backup::config::{DecryptorConfig, RequestConfig};
///
/// let config = DecryptorConfig::new()
///     .request_config(RequestConfig::new().retry_limit(5))
///     .max_concurrent_fetches(NonZeroUsize::new(4).unwrap());
/// ```
#[derive(Clone, Copy, Debug)]
pub struct DecryptorConfig {
    pub(crate) request_config: RequestConfig,
    pub(crate) max_concurrent_fetches: NonZeroUsize,
}

impl Default for DecryptorConfig {
    fn default() -> Self {
        Self {
            request_config: RequestConfig::short_retry(),
            max_concurrent_fetches: NonZeroUsize::new(DEFAULT_MAX_CONCURRENT_FETCHES)
                .unwrap_or(NonZeroUsize::MIN),
        }
    }
}

impl DecryptorConfig {
    /// Create a new default `DecryptorConfig`.
    ///
    /// Requests to the backup are retried three times and at most 8 room keys
    /// are fetched concurrently.
    #[must_use]
    pub fn new() -> Self {
        Default::default()
    }

    /// Set how the requests to the backup server are retried.
    #[must_use]
    pub fn request_config(mut self, request_config: RequestConfig) -> Self {
        self.request_config = request_config;
        self
    }

    /// Set how many room keys are fetched from the backup concurrently.
    #[must_use]
    pub fn max_concurrent_fetches(mut self, limit: NonZeroUsize) -> Self {
        self.max_concurrent_fetches = limit;
        self
    }
}
