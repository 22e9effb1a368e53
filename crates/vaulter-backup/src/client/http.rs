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

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize};
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};
use url::Url;
use vaulter_crypto::types::{BackupDescriptor, EncryptedSessionExport, KeyBackupData};

use super::BackupClient;
use crate::{config::RequestConfig, BackupClientError};

/// The standard error body of the Matrix client-server API.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    errcode: Option<String>,
    retry_after_ms: Option<u64>,
}

/// A [`BackupClient`] talking to a homeserver over the Matrix client-server
/// API.
#[derive(Clone)]
pub struct HttpBackupClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http_client: reqwest::Client,
    homeserver: Url,
    access_token: String,
    concurrent_requests: Option<Semaphore>,
}

#[cfg(not(tarpaulin_include))]
impl fmt::Debug for HttpBackupClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpBackupClient")
            .field("homeserver", &self.inner.homeserver.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpBackupClient {
    /// Create a new client for the given homeserver.
    ///
    /// # Arguments
    ///
    /// * `homeserver` - The base URL of the homeserver, e.g.
    ///   `https://matrix.example.org`.
    ///
    /// * `access_token` - The access token of the user owning the backup.
    ///
    /// * `request_config` - The timeout and the concurrency limit of the
    ///   requests.
    pub fn new(
        homeserver: Url,
        access_token: impl Into<String>,
        request_config: RequestConfig,
    ) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("vaulter/", env!("CARGO_PKG_VERSION")))
            .timeout(request_config.timeout)
            .build()?;

        let concurrent_requests =
            request_config.max_concurrent_requests.map(|limit| Semaphore::new(limit.get()));

        Ok(Self {
            inner: Arc::new(ClientInner {
                http_client,
                homeserver,
                access_token: access_token.into(),
                concurrent_requests,
            }),
        })
    }

    /// The homeserver this client talks to.
    pub fn homeserver(&self) -> &Url {
        &self.inner.homeserver
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, BackupClientError> {
        let mut url = self.inner.homeserver.clone();

        url.path_segments_mut()
            .map_err(|_| {
                BackupClientError::Malformed("the homeserver URL can't be a base URL".to_owned())
            })?
            .pop_if_empty()
            .extend(["_matrix", "client", "v3", "room_keys"])
            .extend(segments);

        Ok(url)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, BackupClientError> {
        let _permit = match &self.inner.concurrent_requests {
            Some(semaphore) => semaphore.acquire().await.ok(),
            None => None,
        };

        let response = self
            .inner
            .http_client
            .get(url)
            .bearer_auth(&self.inner.access_token)
            .send()
            .await
            .map_err(|e| BackupClientError::network(e.to_string()))?;

        let status = response.status();
        let body =
            response.bytes().await.map_err(|e| BackupClientError::network(e.to_string()))?;

        debug!(status = status.as_u16(), response_size = body.len(), "Got a response");

        if status.is_success() {
            return serde_json::from_slice(&body)
                .map_err(|e| BackupClientError::Malformed(e.to_string()));
        }

        let error: Option<ErrorBody> = serde_json::from_slice(&body).ok();
        let errcode = error.as_ref().and_then(|e| e.errcode.clone());

        Err(match status {
            StatusCode::NOT_FOUND => BackupClientError::NotFound,
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after =
                    error.and_then(|e| e.retry_after_ms).map(Duration::from_millis);
                warn!(?retry_after, "The backup server is rate limiting us");

                BackupClientError::Network {
                    reason: errcode.unwrap_or_else(|| status.to_string()),
                    retry_after,
                }
            }
            status if status.is_server_error() => BackupClientError::network(status.to_string()),
            status => BackupClientError::Rejected { status: status.as_u16(), errcode },
        })
    }
}

#[async_trait]
impl BackupClient for HttpBackupClient {
    #[instrument(skip_all, fields(homeserver = %self.inner.homeserver))]
    async fn backup_descriptor(&self) -> Result<BackupDescriptor, BackupClientError> {
        self.get(self.endpoint(&["version"])?).await
    }

    #[instrument(skip(self))]
    async fn session_export(
        &self,
        room_id: &str,
        session_id: &str,
        version: &str,
    ) -> Result<EncryptedSessionExport, BackupClientError> {
        let mut url = self.endpoint(&["keys", room_id, session_id])?;
        url.query_pairs_mut().append_pair("version", version);

        let data: KeyBackupData = self.get(url).await?;

        EncryptedSessionExport::from_backup_data(room_id, session_id, data)
            .map_err(|e| BackupClientError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use serde_json::json;
    use url::Url;
    use vaulter_crypto::base64_encode;
    use vaulter_test::{test_json, vectors};
    use wiremock::{
        matchers::{header, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    use super::HttpBackupClient;
    use crate::{config::RequestConfig, BackupClient, BackupClientError};

    const KEYS_PATH: &str = "/_matrix/client/v3/room_keys/keys/!cURbafjkfsMDVwdRDQ:matrix.org/6865XMe3cS6ApRcSODilhDcEciGO2BV+dJpoKOQc3qk";

    fn client(server: &MockServer) -> HttpBackupClient {
        let homeserver = Url::parse(&server.uri()).unwrap();
        HttpBackupClient::new(homeserver, "1234", RequestConfig::new().disable_retry()).unwrap()
    }

    #[tokio::test]
    async fn fetches_the_backup_descriptor() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/_matrix/client/v3/room_keys/version"))
            .and(header("authorization", "Bearer 1234"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&*test_json::BACKUP_VERSION))
            .expect(1)
            .mount(&server)
            .await;

        let descriptor = client(&server).backup_descriptor().await.unwrap();

        assert_eq!(descriptor.version, vectors::BACKUP_VERSION);
        assert_eq!(descriptor.count, 1);
        assert_eq!(descriptor.etag.as_deref(), Some("1"));
        assert_eq!(descriptor.algorithm.algorithm(), "m.megolm_backup.v1.curve25519-aes-sha2");
    }

    #[tokio::test]
    async fn homeserver_paths_are_kept() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/matrix/_matrix/client/v3/room_keys/version"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&*test_json::BACKUP_VERSION))
            .expect(1)
            .mount(&server)
            .await;

        let homeserver = Url::parse(&format!("{}/matrix/", server.uri())).unwrap();
        let client = HttpBackupClient::new(homeserver, "1234", RequestConfig::new()).unwrap();

        client.backup_descriptor().await.unwrap();
    }

    #[tokio::test]
    async fn missing_backup_is_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/_matrix/client/v3/room_keys/version"))
            .respond_with(ResponseTemplate::new(404).set_body_json(&*test_json::NO_BACKUP))
            .mount(&server)
            .await;

        let result = client(&server).backup_descriptor().await;
        assert_matches!(result, Err(BackupClientError::NotFound));
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let error = client(&server).backup_descriptor().await.unwrap_err();

        assert!(error.is_transient());
        assert_eq!(error.retry_after(), None);
    }

    #[tokio::test]
    async fn rate_limiting_is_transient() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).set_body_json(&*test_json::LIMIT_EXCEEDED))
            .mount(&server)
            .await;

        let error = client(&server).backup_descriptor().await.unwrap_err();

        assert_matches!(
            error,
            BackupClientError::Network { reason, retry_after: Some(retry_after) } => {
                assert_eq!(reason, "M_LIMIT_EXCEEDED");
                assert_eq!(retry_after, Duration::from_millis(10));
            }
        );
    }

    #[tokio::test]
    async fn client_errors_are_permanent() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "errcode": "M_UNKNOWN_TOKEN",
                "error": "Invalid access token passed."
            })))
            .mount(&server)
            .await;

        let error = client(&server).backup_descriptor().await.unwrap_err();

        assert!(!error.is_transient());
        assert_matches!(
            error,
            BackupClientError::Rejected { status: 401, errcode: Some(errcode) } => {
                assert_eq!(errcode, "M_UNKNOWN_TOKEN");
            }
        );
    }

    #[tokio::test]
    async fn invalid_bodies_are_malformed() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&*test_json::EMPTY))
            .mount(&server)
            .await;

        assert_matches!(
            client(&server).backup_descriptor().await,
            Err(BackupClientError::Malformed(_))
        );
    }

    #[tokio::test]
    async fn fetches_a_session_export() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(KEYS_PATH))
            .and(query_param("version", vectors::BACKUP_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(&*test_json::KEY_BACKUP_DATA))
            .expect(1)
            .mount(&server)
            .await;

        let export = client(&server)
            .session_export(
                vectors::BACKUP_ROOM_ID,
                vectors::MEGOLM_SESSION_ID,
                vectors::BACKUP_VERSION,
            )
            .await
            .unwrap();

        assert_eq!(export.room_id, vectors::BACKUP_ROOM_ID);
        assert_eq!(export.session_id, vectors::MEGOLM_SESSION_ID);
        assert_eq!(base64_encode(export.ephemeral), vectors::EPHEMERAL_PUBLIC_KEY);
        assert_eq!(base64_encode(export.mac), vectors::BACKUP_MAC);
        assert!(export.is_verified);
    }

    #[tokio::test]
    async fn missing_room_key_is_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(KEYS_PATH))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(&*test_json::ROOM_KEYS_NOT_FOUND),
            )
            .mount(&server)
            .await;

        let result = client(&server)
            .session_export(
                vectors::BACKUP_ROOM_ID,
                vectors::MEGOLM_SESSION_ID,
                vectors::BACKUP_VERSION,
            )
            .await;

        assert_matches!(result, Err(BackupClientError::NotFound));
    }

    #[tokio::test]
    async fn invalid_session_data_is_malformed() {
        let server = MockServer::start().await;

        let mut data = test_json::KEY_BACKUP_DATA.clone();
        data["session_data"]["mac"] = "not a mac".into();

        Mock::given(method("GET"))
            .and(path(KEYS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(data))
            .mount(&server)
            .await;

        let result = client(&server)
            .session_export(
                vectors::BACKUP_ROOM_ID,
                vectors::MEGOLM_SESSION_ID,
                vectors::BACKUP_VERSION,
            )
            .await;

        assert_matches!(result, Err(BackupClientError::Malformed(_)));
    }
}
