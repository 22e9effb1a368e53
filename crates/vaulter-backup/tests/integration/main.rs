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

// The http mocking library is not supported for wasm32
#![cfg(not(target_arch = "wasm32"))]

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tempfile::TempDir;
use url::Url;
use vaulter_backup::{
    config::{DecryptorConfig, RequestConfig},
    store::RawEvent,
    BackupDecryptor, HttpBackupClient, SqliteEventStore,
};
use vaulter_test::test_json;
use wiremock::{
    matchers::{header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

mod decryption;
mod failures;

vaulter_test::init_tracing_for_tests!();

const KEYS_PATH: &str = "/_matrix/client/v3/room_keys/keys/!cURbafjkfsMDVwdRDQ:matrix.org/\
                         6865XMe3cS6ApRcSODilhDcEciGO2BV+dJpoKOQc3qk";

struct TestContext {
    server: MockServer,
    store: Arc<SqliteEventStore>,
    decryptor: BackupDecryptor,
    _dir: TempDir,
}

/// Set up a decryptor talking to a mock homeserver and writing into a fresh
/// SQLite database.
async fn test_context() -> TestContext {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let store = Arc::new(SqliteEventStore::open(dir.path().join("events.sqlite3")).await.unwrap());

    let homeserver = Url::parse(&server.uri()).unwrap();
    let client =
        HttpBackupClient::new(homeserver, "1234", RequestConfig::new().retry_limit(3)).unwrap();

    let decryptor = BackupDecryptor::new(
        Arc::new(client),
        store.clone(),
        DecryptorConfig::new().request_config(RequestConfig::new().retry_limit(3)),
    );

    TestContext { server, store, decryptor, _dir: dir }
}

/// Store the given event, as received from the homeserver.
async fn store_event(store: &SqliteEventStore, event: &JsonValue) {
    let event: RawEvent = serde_json::from_value(event.clone()).unwrap();
    store.insert_raw_event(&event).await.unwrap();
}

/// Mount a mock for `GET /room_keys/version` returning the test backup.
async fn mock_backup_version(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/_matrix/client/v3/room_keys/version"))
        .and(header("authorization", "Bearer 1234"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&*test_json::BACKUP_VERSION))
        .mount(server)
        .await;
}

/// Mount a mock for the room key of the test session, returning the given
/// response at most `times` times.
async fn mock_room_key(server: &MockServer, response: ResponseTemplate, times: Option<u64>) {
    let mock = Mock::given(method("GET"))
        .and(path(KEYS_PATH))
        .and(query_param("version", "3"))
        .and(header("authorization", "Bearer 1234"))
        .respond_with(response);

    match times {
        Some(times) => mock.up_to_n_times(times).mount(server).await,
        None => mock.mount(server).await,
    }
}
