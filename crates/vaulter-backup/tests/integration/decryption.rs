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

use vaulter_backup::{
    store::{EventStore, RawEvent},
    RunState,
};
use vaulter_crypto::types::EncryptedMessageEvent;
use vaulter_test::{test_json, vectors};
use wiremock::{
    matchers::{method, path},
    Mock, ResponseTemplate,
};

use crate::{mock_backup_version, mock_room_key, store_event, test_context, KEYS_PATH};

#[tokio::test]
async fn test_backlog_decryption() {
    let ctx = test_context().await;

    mock_backup_version(&ctx.server).await;
    mock_room_key(
        &ctx.server,
        ResponseTemplate::new(200).set_body_json(&*test_json::KEY_BACKUP_DATA),
        None,
    )
    .await;

    store_event(&ctx.store, &test_json::ENCRYPTED_EVENT).await;
    store_event(&ctx.store, &test_json::OLM_ENCRYPTED_EVENT).await;

    let report = ctx.decryptor.run_from_store(vectors::RECOVERY_KEY_DISPLAYED).await.unwrap();

    assert_eq!(report.backup_version, vectors::BACKUP_VERSION);
    assert_eq!(report.decrypted, 1);
    assert_eq!(report.sessions_fetched, 1);
    assert_eq!(report.failure_count(), 0);
    assert_eq!(report.skipped_count(), 1);
    assert_eq!(report.skipped[0].algorithm, "m.olm.v1.curve25519-aes-sha2");
    assert_eq!(ctx.decryptor.state(), RunState::Done);

    let event_id = test_json::ENCRYPTED_EVENT["event_id"].as_str().unwrap();
    let content = ctx.store.decrypted_content(event_id).await.unwrap();
    assert_eq!(content.as_deref(), Some(vectors::MEGOLM_PLAINTEXT_AT_0));

    let status = ctx.store.decryption_status().await.unwrap();
    assert_eq!(status.total_encrypted(), 2);
    assert_eq!(status.total_decrypted(), 1);
}

#[tokio::test]
async fn test_room_keys_are_fetched_once() {
    let ctx = test_context().await;

    mock_backup_version(&ctx.server).await;

    // The room key may only be requested a single time, the second run has to
    // use the cached key.
    Mock::given(method("GET"))
        .and(path(KEYS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(&*test_json::KEY_BACKUP_DATA))
        .expect(1)
        .mount(&ctx.server)
        .await;

    store_event(&ctx.store, &test_json::ENCRYPTED_EVENT).await;

    let first = ctx.decryptor.run_from_store(vectors::RECOVERY_KEY).await.unwrap();
    assert_eq!(first.decrypted, 1);

    let events = ctx.store.undecrypted_events(None).await.unwrap();
    assert!(events.is_empty());

    let event: RawEvent = serde_json::from_value(test_json::ENCRYPTED_EVENT.clone()).unwrap();
    let encrypted = EncryptedMessageEvent::from_content(
        event.event_id,
        event.room_id,
        &event.content.to_string(),
    )
    .unwrap();

    let second = ctx.decryptor.run(vectors::RECOVERY_KEY, [encrypted]).await.unwrap();
    assert_eq!(second.cache_hits, 1);
    assert_eq!(second.sessions_fetched, 0);
    assert_eq!(second.already_decrypted, 1);
}

#[tokio::test]
async fn test_rate_limited_room_keys_are_retried() {
    let ctx = test_context().await;

    mock_backup_version(&ctx.server).await;
    mock_room_key(
        &ctx.server,
        ResponseTemplate::new(429).set_body_json(&*test_json::LIMIT_EXCEEDED),
        Some(2),
    )
    .await;
    mock_room_key(
        &ctx.server,
        ResponseTemplate::new(200).set_body_json(&*test_json::KEY_BACKUP_DATA),
        None,
    )
    .await;

    store_event(&ctx.store, &test_json::ENCRYPTED_EVENT).await;

    let report = ctx.decryptor.run_from_store(vectors::RECOVERY_KEY).await.unwrap();

    assert_eq!(report.decrypted, 1);
    assert_eq!(report.failure_count(), 0);
}
