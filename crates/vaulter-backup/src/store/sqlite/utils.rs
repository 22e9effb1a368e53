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

use async_trait::async_trait;
use deadpool_sqlite::{InteractError, Object as SqliteAsyncConn};
use rusqlite::{Params, Row, Statement, Transaction};

use crate::StoreError;

type Result<T, E = StoreError> = std::result::Result<T, E>;

fn interact_error(error: InteractError) -> StoreError {
    StoreError::Interact(error.to_string())
}

#[async_trait]
pub(super) trait SqliteAsyncConnExt {
    async fn execute<P>(&self, sql: impl AsRef<str> + Send + 'static, params: P) -> Result<usize>
    where
        P: Params + Send + 'static;

    async fn execute_batch(&self, sql: impl AsRef<str> + Send + 'static) -> Result<()>;

    async fn prepare<T, F>(&self, sql: impl AsRef<str> + Send + 'static, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Statement<'_>) -> rusqlite::Result<T> + Send + 'static;

    async fn query_row<T, P, F>(
        &self,
        sql: impl AsRef<str> + Send + 'static,
        params: P,
        f: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        P: Params + Send + 'static,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T> + Send + 'static;

    async fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static;

    /// The schema version, stored in the `user_version` pragma.
    async fn db_version(&self) -> Result<u8>;
}

#[async_trait]
impl SqliteAsyncConnExt for SqliteAsyncConn {
    async fn execute<P>(&self, sql: impl AsRef<str> + Send + 'static, params: P) -> Result<usize>
    where
        P: Params + Send + 'static,
    {
        Ok(self
            .interact(move |conn| conn.execute(sql.as_ref(), params))
            .await
            .map_err(interact_error)??)
    }

    async fn execute_batch(&self, sql: impl AsRef<str> + Send + 'static) -> Result<()> {
        Ok(self
            .interact(move |conn| conn.execute_batch(sql.as_ref()))
            .await
            .map_err(interact_error)??)
    }

    async fn prepare<T, F>(&self, sql: impl AsRef<str> + Send + 'static, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Statement<'_>) -> rusqlite::Result<T> + Send + 'static,
    {
        Ok(self
            .interact(move |conn| f(conn.prepare(sql.as_ref())?))
            .await
            .map_err(interact_error)??)
    }

    async fn query_row<T, P, F>(
        &self,
        sql: impl AsRef<str> + Send + 'static,
        params: P,
        f: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        P: Params + Send + 'static,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T> + Send + 'static,
    {
        Ok(self
            .interact(move |conn| conn.query_row(sql.as_ref(), params, f))
            .await
            .map_err(interact_error)??)
    }

    async fn with_transaction<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
    {
        self.interact(move |conn| {
            let txn = conn.transaction()?;
            let result = f(&txn)?;
            txn.commit()?;
            Ok(result)
        })
        .await
        .map_err(interact_error)?
    }

    async fn db_version(&self) -> Result<u8> {
        self.query_row("PRAGMA user_version", (), |row| row.get::<_, u8>(0)).await
    }
}

pub(super) trait SqliteTransactionExt {
    fn set_db_version(&self, version: u8) -> rusqlite::Result<()>;
}

impl SqliteTransactionExt for Transaction<'_> {
    fn set_db_version(&self, version: u8) -> rusqlite::Result<()> {
        self.execute_batch(&format!("PRAGMA user_version = {version};"))
    }
}
