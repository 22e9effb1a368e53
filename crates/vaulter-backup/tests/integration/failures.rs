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

use assert_matches::assert_matches;
use vaulter_backup::{store::EventStore, BackupClientError, FailureKind, FatalError, RunState};
use vaulter_crypto::{testing::BackupFixture, BackupKeyError};
use vaulter_test::{test_json, vectors};
use wiremock::{
    matchers::{method, path},
    Mock, ResponseTemplate,
};

use crate::{mock_backup_version, mock_room_key, store_event, test_context, KEYS_PATH};

#[tokio::test]
async fn test_missing_backup() {
    let ctx = test_context().await;

    Mock::given(method("GET"))
        .and(path("/_matrix/client/v3/room_keys/version"))
        .respond_with(ResponseTemplate::new(404).set_body_json(&*test_json::NO_BACKUP))
        .mount(&ctx.server)
        .await;

    let result = ctx.decryptor.run_from_store(vectors::RECOVERY_KEY).await;

    assert_matches!(result, Err(FatalError::BackupFetch(BackupClientError::NotFound)));
    assert_eq!(ctx.decryptor.state(), RunState::AbortedFatal);
}

#[tokio::test]
async fn test_recovery_key_of_another_backup() {
    let ctx = test_context().await;

    mock_backup_version(&ctx.server).await;
    Mock::given(method("GET"))
        .and(path(KEYS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(&*test_json::KEY_BACKUP_DATA))
        .expect(0)
        .mount(&ctx.server)
        .await;

    store_event(&ctx.store, &test_json::ENCRYPTED_EVENT).await;

    let other_backup = BackupFixture::new("1");
    let result = ctx.decryptor.run_from_store(&other_backup.recovery_key()).await;

    assert_matches!(result, Err(FatalError::BackupKey(BackupKeyError::KeyMismatch { .. })));
    assert_eq!(ctx.store.undecrypted_events(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_room_key_missing_from_backup() {
    let ctx = test_context().await;

    mock_backup_version(&ctx.server).await;
    mock_room_key(
        &ctx.server,
        ResponseTemplate::new(404).set_body_json(&*test_json::ROOM_KEYS_NOT_FOUND),
        None,
    )
    .await;

    store_event(&ctx.store, &test_json::ENCRYPTED_EVENT).await;

    let report = ctx.decryptor.run_from_store(vectors::RECOVERY_KEY).await.unwrap();

    assert_eq!(report.decrypted, 0);
    assert_eq!(report.failures_of(FailureKind::MissingSessionKey).count(), 1);
    assert_eq!(ctx.decryptor.state(), RunState::Done);

    // The event stays in the backlog for the next run.
    assert_eq!(ctx.store.undecrypted_events(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_tampered_room_key() {
    let ctx = test_context().await;

    let mut key_data = test_json::KEY_BACKUP_DATA.clone();
    key_data["session_data"]["mac"] = "AAAAAAAAAAA".into();

    mock_backup_version(&ctx.server).await;
    mock_room_key(&ctx.server, ResponseTemplate::new(200).set_body_json(&key_data), None).await;

    store_event(&ctx.store, &test_json::ENCRYPTED_EVENT).await;

    let report = ctx.decryptor.run_from_store(vectors::RECOVERY_KEY).await.unwrap();

    assert_eq!(report.failures_of(FailureKind::MacAuthentication).count(), 1);
    assert!(ctx.decryptor.cache().is_empty());
}
