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

//! Decryption of a backlog of encrypted events with the room keys of a key
//! backup.
//!
//! A run goes through the following steps:
//!
//! 1. The recovery key is decoded and checked against the public key of the
//!    current backup version. Any failure here aborts the run.
//! 2. The events are grouped by their Megolm session. The room key of every
//!    session is taken from the [`SessionKeyCache`], or fetched from the
//!    backup and decrypted.
//! 3. Every event is decrypted with the room key of its session and its
//!    plaintext is stored.
//!
//! Failures of a single room key or event are recorded in the [`RunReport`],
//! the run carries on with the remaining events. Stored events that couldn't
//! be parsed are recorded as malformed.

use std::{
    collections::{hash_map::Entry, HashMap},
    fmt,
    sync::Arc,
};

use eyeball::{SharedObservable, Subscriber};
use futures_util::{stream, StreamExt};
use tracing::{debug, info, instrument, trace, warn, Span};
use vaulter_crypto::{
    backups::{BackupDecryptionKey, RecoveryKey},
    megolm::InboundGroupSession,
    store::SessionKeyCache,
    types::{DecryptedMessage, EncryptedMessageEvent, EncryptedSessionExport, RecoveredSessionKey},
    SessionKeyError,
};

use crate::{
    config::DecryptorConfig, retry::send_with_retries, store::UndecryptedEvents, BackupClient,
    EventStore, FailureKind, FatalError, RunReport,
};

/// Current state of a [`BackupDecryptor`].
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum RunState {
    /// No run has started yet, or a new run is starting.
    Idle,
    /// The recovery key has been decoded.
    KeyDecoded,
    /// The recovery key matches the current backup version.
    KeyVerified,
    /// The events are being decrypted.
    Draining,
    /// The run is finished, some events might have failed to decrypt.
    Done,
    /// The run was aborted before any event was decrypted.
    AbortedFatal,
}

/// Where the events of a run come from.
enum Backlog<'a> {
    Events(Vec<EncryptedMessageEvent>),
    Store { room_id: Option<&'a str> },
}

/// The events of a run that were encrypted with the same Megolm session.
struct SessionGroup {
    room_id: String,
    session_id: String,
    events: Vec<EncryptedMessageEvent>,
}

impl SessionGroup {
    fn fail(&self, report: &mut RunReport, kind: FailureKind) {
        for event in &self.events {
            report.record_failure(&event.event_id, &self.room_id, &self.session_id, kind);
        }
    }
}

/// Recovers room keys from a key backup and decrypts stored events with
/// them.
///
/// Recovered room keys are cached for the lifetime of the decryptor, as long
/// as the backup version doesn't change, so running the decryptor again only
/// fetches the room keys of sessions it hasn't seen yet.
pub struct BackupDecryptor {
    client: Arc<dyn BackupClient>,
    store: Arc<dyn EventStore>,
    config: DecryptorConfig,
    cache: SessionKeyCache,
    state: SharedObservable<RunState>,
}

#[cfg(not(tarpaulin_include))]
impl fmt::Debug for BackupDecryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupDecryptor")
            .field("client", &self.client)
            .field("store", &self.store)
            .field("config", &self.config)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

impl BackupDecryptor {
    /// Create a new decryptor.
    ///
    /// # Arguments
    ///
    /// * `client` - The access to the key backup.
    ///
    /// * `store` - The store of the encrypted events, plaintexts are written
    ///   back to it.
    ///
    /// * `config` - How requests are retried and how many room keys are
    ///   fetched concurrently.
    pub fn new(
        client: Arc<dyn BackupClient>,
        store: Arc<dyn EventStore>,
        config: DecryptorConfig,
    ) -> Self {
        Self {
            client,
            store,
            config,
            cache: SessionKeyCache::new(),
            state: SharedObservable::new(RunState::Idle),
        }
    }

    /// The current state of the decryptor.
    pub fn state(&self) -> RunState {
        self.state.get()
    }

    /// Subscribe to the state updates of the decryptor.
    pub fn subscribe_to_state(&self) -> Subscriber<RunState> {
        self.state.subscribe()
    }

    /// The room keys recovered so far.
    pub fn cache(&self) -> &SessionKeyCache {
        &self.cache
    }

    /// Decrypt the given events.
    ///
    /// # Arguments
    ///
    /// * `recovery_key` - The recovery key of the backup, as shown to the
    ///   user.
    ///
    /// * `backlog` - The events to decrypt, events with an unsupported
    ///   algorithm are skipped.
    pub async fn run(
        &self,
        recovery_key: &str,
        backlog: impl IntoIterator<Item = EncryptedMessageEvent>,
    ) -> Result<RunReport, FatalError> {
        self.run_with(recovery_key, Backlog::Events(backlog.into_iter().collect())).await
    }

    /// Decrypt every undecrypted event of the event store.
    pub async fn run_from_store(&self, recovery_key: &str) -> Result<RunReport, FatalError> {
        self.run_with(recovery_key, Backlog::Store { room_id: None }).await
    }

    /// Decrypt the undecrypted events of a single room of the event store.
    pub async fn run_for_room(
        &self,
        recovery_key: &str,
        room_id: &str,
    ) -> Result<RunReport, FatalError> {
        self.run_with(recovery_key, Backlog::Store { room_id: Some(room_id) }).await
    }

    /// Drop every recovered room key.
    ///
    /// The key material is erased from memory once the last copy of a key is
    /// dropped. The next run fetches the room keys from the backup again.
    pub fn erase_secrets(&self) {
        self.cache.clear();
    }

    #[instrument(skip_all, fields(backup_version))]
    async fn run_with(
        &self,
        recovery_key: &str,
        backlog: Backlog<'_>,
    ) -> Result<RunReport, FatalError> {
        self.state.set(RunState::Idle);

        let result = self.run_inner(recovery_key, backlog).await;

        match &result {
            Ok(report) => {
                info!(%report, "Finished decrypting the backlog");
                self.state.set(RunState::Done);
            }
            Err(error) => {
                warn!(%error, "Aborted the decryption of the backlog");
                self.state.set(RunState::AbortedFatal);
            }
        }

        result
    }

    async fn run_inner(
        &self,
        recovery_key: &str,
        backlog: Backlog<'_>,
    ) -> Result<RunReport, FatalError> {
        let backup_key = self.verify_recovery_key(recovery_key).await?;
        Span::current().record("backup_version", backup_key.backup_version());

        let events = match backlog {
            Backlog::Events(events) => UndecryptedEvents::from(events),
            Backlog::Store { room_id } => {
                self.store.undecrypted_events(room_id).await.map_err(FatalError::Store)?
            }
        };

        self.state.set(RunState::Draining);

        Ok(self.drain(&backup_key, events).await)
    }

    async fn verify_recovery_key(
        &self,
        recovery_key: &str,
    ) -> Result<BackupDecryptionKey, FatalError> {
        let recovery_key = RecoveryKey::from_base58(recovery_key)?;
        self.state.set(RunState::KeyDecoded);

        let descriptor = send_with_retries(self.config.request_config, || {
            self.client.backup_descriptor()
        })
        .await
        .map_err(FatalError::BackupFetch)?;

        let backup_key = BackupDecryptionKey::resolve(&recovery_key, &descriptor)?;

        if self.cache.invalidate_all(backup_key.backup_version()) {
            info!("The backup version changed, the room keys will be fetched again");
        }

        self.state.set(RunState::KeyVerified);

        Ok(backup_key)
    }

    async fn drain(
        &self,
        backup_key: &BackupDecryptionKey,
        backlog: UndecryptedEvents,
    ) -> RunReport {
        let mut report = RunReport::new(backup_key.backup_version());
        let mut missing = Vec::new();

        for malformed in &backlog.malformed {
            report.record_failure(
                &malformed.event_id,
                &malformed.room_id,
                &malformed.session_id,
                FailureKind::from(&malformed.error),
            );
        }

        for group in group_by_session(backlog.events, &mut report) {
            match self.cache.get(&group.room_id, &group.session_id) {
                Some(session_key) => {
                    report.cache_hits += 1;
                    self.decrypt_group(&session_key, group, &mut report).await;
                }
                None => missing.push(group),
            }
        }

        debug!(
            cache_hits = report.cache_hits,
            missing = missing.len(),
            "Fetching the missing room keys from the backup"
        );

        let version = backup_key.backup_version();
        let request_config = self.config.request_config;

        let mut fetches = stream::iter(missing)
            .map(|group| async move {
                let result = send_with_retries(request_config, || {
                    self.client.session_export(&group.room_id, &group.session_id, version)
                })
                .await;

                (group, result)
            })
            .buffer_unordered(self.config.max_concurrent_fetches.get());

        let mut ephemeral_keys = HashMap::new();

        while let Some((group, result)) = fetches.next().await {
            let export = match result {
                Ok(export) => export,
                Err(error) => {
                    warn!(
                        room_id = %group.room_id,
                        session_id = %group.session_id,
                        %error,
                        "Couldn't fetch a room key from the backup"
                    );
                    group.fail(&mut report, FailureKind::from(&error));
                    continue;
                }
            };

            if export.room_id != group.room_id || export.session_id != group.session_id {
                warn!(
                    room_id = %group.room_id,
                    session_id = %group.session_id,
                    "The backup returned the room key of a different session"
                );
                group.fail(&mut report, FailureKind::SessionKeyFormat);
                continue;
            }

            match self.recover_session_key(backup_key, &export, &mut ephemeral_keys) {
                Ok(session_key) => {
                    report.sessions_fetched += 1;
                    self.decrypt_group(&session_key, group, &mut report).await;
                }
                Err(error) => {
                    warn!(
                        room_id = %group.room_id,
                        session_id = %group.session_id,
                        %error,
                        "Couldn't decrypt a room key of the backup"
                    );
                    group.fail(&mut report, FailureKind::from(&error));
                }
            }
        }

        report
    }

    /// Decrypt a backed up room key and put it in the cache.
    ///
    /// Every room key of a backup is encrypted with a fresh ephemeral key, a
    /// room key encrypted with an ephemeral key that already protected
    /// another room key in this run is rejected.
    fn recover_session_key(
        &self,
        backup_key: &BackupDecryptionKey,
        export: &EncryptedSessionExport,
        ephemeral_keys: &mut HashMap<[u8; 32], String>,
    ) -> Result<Arc<RecoveredSessionKey>, SessionKeyError> {
        if let Some(other_session_id) = ephemeral_keys.get(&export.ephemeral) {
            if *other_session_id != export.session_id {
                return Err(SessionKeyError::ReusedEphemeralKey {
                    other_session_id: other_session_id.clone(),
                });
            }
        }

        let session_key = Arc::new(backup_key.decrypt_session_export(export)?);

        if let Entry::Vacant(entry) = ephemeral_keys.entry(export.ephemeral) {
            entry.insert(export.session_id.clone());
        }

        if self.cache.insert(backup_key.backup_version(), session_key.clone()) {
            Ok(session_key)
        } else if self.cache.version().as_deref() == Some(backup_key.backup_version()) {
            // Another run recovered the same key in the meantime, use the cached one.
            Ok(self
                .cache
                .get(session_key.room_id(), session_key.session_id())
                .unwrap_or(session_key))
        } else {
            // A concurrent run switched the cache to another backup version,
            // the key is only used for this run.
            Ok(session_key)
        }
    }

    async fn decrypt_group(
        &self,
        session_key: &RecoveredSessionKey,
        group: SessionGroup,
        report: &mut RunReport,
    ) {
        let session = match InboundGroupSession::from_recovered(session_key) {
            Ok(session) => session,
            Err(error) => {
                warn!(session_id = %group.session_id, %error, "The recovered room key is invalid");
                group.fail(report, FailureKind::from(&error));
                return;
            }
        };

        for event in &group.events {
            let message = match decrypt_event(&session, event) {
                Ok(message) => message,
                Err(kind) => {
                    report.record_failure(&event.event_id, &group.room_id, &group.session_id, kind);
                    continue;
                }
            };

            let saved =
                self.store.save_decrypted_content(&message.event_id, &message.plaintext_json).await;

            match saved {
                Ok(true) => report.decrypted += 1,
                Ok(false) => report.already_decrypted += 1,
                Err(error) => {
                    warn!(event_id = %event.event_id, %error, "Couldn't store a decrypted event");
                    report.record_failure(
                        &event.event_id,
                        &group.room_id,
                        &group.session_id,
                        FailureKind::Store,
                    );
                }
            }
        }
    }
}

/// Group the events by their Megolm session, keeping the order of the events
/// within a session and the order in which the sessions first appear.
///
/// Events using an unsupported algorithm are recorded as skipped.
fn group_by_session(
    events: Vec<EncryptedMessageEvent>,
    report: &mut RunReport,
) -> Vec<SessionGroup> {
    let mut groups: Vec<SessionGroup> = Vec::new();
    let mut positions = HashMap::new();

    for event in events {
        if !event.algorithm.is_supported() {
            debug!(
                event_id = %event.event_id,
                algorithm = %event.algorithm,
                "Skipping an event with an unsupported algorithm"
            );
            report.record_skipped(&event.event_id, event.algorithm.as_str());
            continue;
        }

        let position = *positions
            .entry((event.room_id.clone(), event.session_id.clone()))
            .or_insert_with(|| {
                groups.push(SessionGroup {
                    room_id: event.room_id.clone(),
                    session_id: event.session_id.clone(),
                    events: Vec::new(),
                });
                groups.len() - 1
            });

        groups[position].events.push(event);
    }

    groups
}

fn decrypt_event(
    session: &InboundGroupSession,
    event: &EncryptedMessageEvent,
) -> Result<DecryptedMessage, FailureKind> {
    let payload = session.decrypt_base64(&event.ciphertext).map_err(|error| {
        debug!(event_id = %event.event_id, %error, "Couldn't decrypt an event");
        FailureKind::from(&error)
    })?;

    trace!(
        event_id = %event.event_id,
        message_index = payload.message_index,
        "Decrypted an event"
    );

    DecryptedMessage::from_payload(event, &payload.plaintext).map_err(|error| {
        warn!(event_id = %event.event_id, %error, "The decrypted event was rejected");
        FailureKind::from(&error)
    })
}
