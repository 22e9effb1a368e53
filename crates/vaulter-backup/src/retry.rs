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

use std::{
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
};

use backoff::{future::retry, Error as RetryError, ExponentialBackoff};

use crate::{config::RequestConfig, BackupClientError};

/// Run a request to the backup server, retrying it with an exponential
/// backoff as long as it fails with a transient error.
///
/// The retry limit and the retry timeout of the [`RequestConfig`] bound the
/// number of attempts; once the limit is reached, the last error is returned.
pub(crate) async fn send_with_retries<T, F, Fut>(
    config: RequestConfig,
    request: F,
) -> Result<T, BackupClientError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, BackupClientError>>,
{
    let backoff =
        ExponentialBackoff { max_elapsed_time: config.retry_timeout, ..Default::default() };
    let retry_count = AtomicU64::new(1);

    let send_request = || async {
        let stop = if let Some(retry_limit) = config.retry_limit {
            retry_count.fetch_add(1, Ordering::Relaxed) >= retry_limit
        } else {
            false
        };

        request().await.map_err(|err| {
            // Turn errors into permanent errors when the retry limit is reached
            if stop || !err.is_transient() {
                RetryError::Permanent(err)
            } else {
                let retry_after = err.retry_after();
                RetryError::Transient { err, retry_after }
            }
        })
    };

    retry::<_, BackupClientError, _, _, _>(backoff, send_request).await
}
