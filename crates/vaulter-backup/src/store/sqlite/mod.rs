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

use std::{fmt, path::Path};

use async_trait::async_trait;
use deadpool_sqlite::{Object as SqliteAsyncConn, Pool as SqlitePool, Runtime};
use rusqlite::named_params;
use tokio::fs;
use tracing::{debug, instrument};

use self::utils::{SqliteAsyncConnExt, SqliteTransactionExt};
use super::{
    DecryptedEvent, DecryptionStatus, EventStore, RawEvent, RoomStatus, UndecryptedEvents,
    ENCRYPTED_EVENT_TYPE,
};
use crate::{OpenStoreError, StoreError};

mod utils;

type Result<T, E = StoreError> = std::result::Result<T, E>;

/// The current version of the database schema, migrations are run by
/// [`run_migrations`].
const DATABASE_VERSION: u8 = 1;

/// An SQLite based [`EventStore`].
#[derive(Clone)]
pub struct SqliteEventStore {
    pool: SqlitePool,
}

#[cfg(not(tarpaulin_include))]
impl fmt::Debug for SqliteEventStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteEventStore").finish_non_exhaustive()
    }
}

impl SqliteEventStore {
    /// Open the SQLite database at the given path, creating it and its parent
    /// directories if needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, OpenStoreError> {
        let pool = create_pool(path.as_ref()).await?;

        Self::open_with_pool(pool).await
    }

    /// Create an SQLite based event store using the given database pool.
    pub async fn open_with_pool(pool: SqlitePool) -> Result<Self, OpenStoreError> {
        let conn = pool.get().await?;
        let version = conn.db_version().await.map_err(OpenStoreError::LoadVersion)?;
        run_migrations(&conn, version).await.map_err(OpenStoreError::Migration)?;

        Ok(Self { pool })
    }

    async fn acquire(&self) -> Result<SqliteAsyncConn> {
        Ok(self.pool.get().await?)
    }

    /// Add an event received from the homeserver to the store.
    ///
    /// Returns `false` if an event with the same ID was already stored, the
    /// stored event is left untouched in that case.
    pub async fn insert_raw_event(&self, event: &RawEvent) -> Result<bool> {
        let content = serde_json::to_string(&event.content)?;
        let origin_server_ts = i64::try_from(event.origin_server_ts).unwrap_or(i64::MAX);
        let params = (
            event.event_id.clone(),
            event.room_id.clone(),
            event.sender.clone(),
            event.event_type.clone(),
            content,
            origin_server_ts,
        );

        let inserted = self
            .acquire()
            .await?
            .execute(
                "
                INSERT OR IGNORE INTO events
                    (event_id, room_id, sender, event_type, content, origin_server_ts)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ",
                params,
            )
            .await?;

        Ok(inserted > 0)
    }

    /// The stored plaintext of an event, `None` if the event is unknown or
    /// hasn't been decrypted yet.
    pub async fn decrypted_content(&self, event_id: &str) -> Result<Option<String>> {
        let event_id = event_id.to_owned();

        let rows: Vec<String> = self
            .acquire()
            .await?
            .prepare(
                "
                SELECT decrypted_content
                FROM events
                WHERE event_id = ? AND decrypted_content IS NOT NULL
                ",
                move |mut stmt| stmt.query((event_id,))?.mapped(|row| row.get(0)).collect(),
            )
            .await?;

        Ok(rows.into_iter().next())
    }

    /// Every decrypted event, grouped by room and oldest first within a room.
    pub async fn decrypted_events(&self) -> Result<Vec<DecryptedEvent>> {
        let rows: Vec<(String, String, String, i64, String)> = self
            .acquire()
            .await?
            .prepare(
                "
                SELECT event_id, room_id, sender, origin_server_ts, decrypted_content
                FROM events
                WHERE decrypted_content IS NOT NULL
                ORDER BY room_id, origin_server_ts, rowid
                ",
                |mut stmt| {
                    stmt.query(())?
                        .mapped(|row| {
                            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
                        })
                        .collect()
                },
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(|(event_id, room_id, sender, origin_server_ts, plaintext_json)| DecryptedEvent {
                event_id,
                room_id,
                sender,
                origin_server_ts: count(origin_server_ts),
                plaintext_json,
            })
            .collect())
    }
}

async fn create_pool(path: &Path) -> Result<SqlitePool, OpenStoreError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(OpenStoreError::CreateDir)?;
    }

    let cfg = deadpool_sqlite::Config::new(path);
    Ok(cfg.create_pool(Runtime::Tokio1)?)
}

/// Bring the schema of the database from `version` to [`DATABASE_VERSION`].
async fn run_migrations(conn: &SqliteAsyncConn, version: u8) -> Result<()> {
    if version == 0 {
        debug!("Creating database");
    } else if version < DATABASE_VERSION {
        debug!(version, new_version = DATABASE_VERSION, "Upgrading database");
    }

    if version < 1 {
        // First turn on WAL mode, this can't be done in the transaction, it fails with
        // the error message: "cannot change into wal mode from within a transaction".
        conn.execute_batch("PRAGMA journal_mode = wal;").await?;
        conn.with_transaction(|txn| {
            txn.execute_batch(include_str!("../../../migrations/event_store/001_init.sql"))?;
            txn.set_db_version(1)?;
            Ok(())
        })
        .await?;
    }

    Ok(())
}

fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

#[async_trait]
impl EventStore for SqliteEventStore {
    #[instrument(skip(self))]
    async fn undecrypted_events(
        &self,
        room_id: Option<&str>,
    ) -> Result<UndecryptedEvents> {
        let room_id = room_id.map(ToOwned::to_owned);

        let rows: Vec<(String, String, String)> = self
            .acquire()
            .await?
            .prepare(
                "
                SELECT event_id, room_id, content
                FROM events
                WHERE event_type = :event_type
                    AND decrypted_content IS NULL
                    AND (:room_id IS NULL OR room_id = :room_id)
                ORDER BY origin_server_ts, rowid
                ",
                move |mut stmt| {
                    stmt.query(named_params! {
                        ":event_type": ENCRYPTED_EVENT_TYPE,
                        ":room_id": room_id,
                    })?
                    .mapped(|row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
                    .collect()
                },
            )
            .await?;

        debug!(count = rows.len(), "Loaded the undecrypted events");

        let mut undecrypted = UndecryptedEvents::default();

        for (event_id, room_id, content) in rows {
            undecrypted.push_stored(event_id, room_id, &content);
        }

        Ok(undecrypted)
    }

    async fn save_decrypted_content(&self, event_id: &str, plaintext_json: &str) -> Result<bool> {
        let updated = self
            .acquire()
            .await?
            .execute(
                "
                UPDATE events SET decrypted_content = ?2
                WHERE event_id = ?1 AND decrypted_content IS NULL
                ",
                (event_id.to_owned(), plaintext_json.to_owned()),
            )
            .await?;

        Ok(updated > 0)
    }

    async fn decryption_status(&self) -> Result<DecryptionStatus> {
        let rooms = self
            .acquire()
            .await?
            .prepare(
                "
                SELECT room_id, COUNT(*), COUNT(decrypted_content)
                FROM events
                WHERE event_type = ?1
                GROUP BY room_id
                ORDER BY room_id
                ",
                |mut stmt| {
                    stmt.query((ENCRYPTED_EVENT_TYPE,))?
                        .mapped(|row| {
                            Ok(RoomStatus {
                                room_id: row.get(0)?,
                                encrypted: count(row.get(1)?),
                                decrypted: count(row.get(2)?),
                            })
                        })
                        .collect()
                },
            )
            .await?;

        Ok(DecryptionStatus { rooms })
    }
}
