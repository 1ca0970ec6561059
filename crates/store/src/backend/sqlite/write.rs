/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use super::{SqliteStore, into_error};
use crate::{
    ScanParams, Table, Txn,
    compress::{maybe_compress, maybe_decompress},
};
use rand::Rng;
use std::time::{Duration, Instant};
use trc::{EventType, StoreEvent};

pub(crate) const MAX_COMMIT_ATTEMPTS: u32 = 10;
pub(crate) const MAX_COMMIT_TIME: Duration = Duration::from_secs(10);

impl SqliteStore {
    pub async fn put(&self, table: Table, key: Vec<u8>, value: Vec<u8>) -> trc::Result<()> {
        self.transaction(move |txn| txn.put(table, &key, &value))
            .await
    }

    pub async fn delete(&self, table: Table, key: Vec<u8>) -> trc::Result<bool> {
        self.transaction(move |txn| txn.delete(table, &key)).await
    }

    pub async fn truncate(&self, table: Table) -> trc::Result<()> {
        self.transaction(move |txn| txn.truncate(table)).await
    }

    /// The write envelope: every mutation runs inside `BEGIN IMMEDIATE`,
    /// and the whole closure is replayed when the engine reports
    /// contention. Callers therefore must keep closures free of external
    /// side effects.
    pub async fn transaction<T, F>(&self, mut f: F) -> trc::Result<T>
    where
        F: FnMut(&mut Txn<'_>) -> trc::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.spawn_worker(move |conn| {
            let started = Instant::now();
            let mut attempt = 0;
            loop {
                let result = conn
                    .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
                    .map_err(into_error)
                    .and_then(|tx| {
                        let mut txn = Txn { tx: &tx };
                        let value = f(&mut txn)?;
                        tx.commit().map_err(into_error)?;
                        Ok(value)
                    });

                match result {
                    Err(err)
                        if err.matches(EventType::Store(StoreEvent::DeadlockRetry))
                            && attempt < MAX_COMMIT_ATTEMPTS
                            && started.elapsed() < MAX_COMMIT_TIME =>
                    {
                        attempt += 1;
                        trc::event!(Store(StoreEvent::DeadlockRetry), Attempt = attempt);
                        std::thread::sleep(Duration::from_millis(
                            rand::rng().random_range(5..50),
                        ));
                    }
                    other => return other,
                }
            }
        })
        .await
    }

    pub async fn checkpoint(&self) -> trc::Result<()> {
        self.spawn_worker(|conn| {
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
                .map_err(into_error)?;
            trc::event!(Store(StoreEvent::Checkpoint));
            Ok(())
        })
        .await
    }

    pub async fn compact(&self) -> trc::Result<()> {
        self.spawn_worker(|conn| {
            conn.execute_batch("VACUUM").map_err(into_error)?;
            trc::event!(Store(StoreEvent::Compact));
            Ok(())
        })
        .await
    }
}

impl Txn<'_> {
    pub fn get(&self, table: Table, key: &[u8]) -> trc::Result<Option<Vec<u8>>> {
        let mut stmt = self
            .tx
            .prepare_cached(&format!("SELECT v FROM {} WHERE k = ?", table.sql_name()))
            .map_err(into_error)?;
        match stmt.query_row([key], |row| row.get::<_, Vec<u8>>(0)) {
            Ok(value) if table.is_compressed() => maybe_decompress(value).map(Some),
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(err) => Err(into_error(err)),
        }
    }

    pub fn put(&self, table: Table, key: &[u8], value: &[u8]) -> trc::Result<()> {
        let value = if table.is_compressed() {
            maybe_compress(value)
        } else {
            value.to_vec()
        };
        self.tx
            .prepare_cached(&format!(
                "INSERT INTO {} (k, v) VALUES (?, ?)
                 ON CONFLICT(k) DO UPDATE SET v = excluded.v",
                table.sql_name()
            ))
            .map_err(into_error)?
            .execute(rusqlite::params![key, value])
            .map_err(into_error)?;
        Ok(())
    }

    pub fn delete(&self, table: Table, key: &[u8]) -> trc::Result<bool> {
        let deleted = self
            .tx
            .prepare_cached(&format!("DELETE FROM {} WHERE k = ?", table.sql_name()))
            .map_err(into_error)?
            .execute([key])
            .map_err(into_error)?;
        Ok(deleted > 0)
    }

    pub fn truncate(&self, table: Table) -> trc::Result<()> {
        self.tx
            .execute(&format!("DELETE FROM {}", table.sql_name()), [])
            .map_err(into_error)?;
        Ok(())
    }

    pub fn scan(&self, params: &ScanParams) -> trc::Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let order = if params.ascending { "ASC" } else { "DESC" };
        let mut stmt = self
            .tx
            .prepare_cached(&format!(
                "SELECT k, v FROM {} WHERE k >= ?1 AND k <= ?2 ORDER BY k {order}",
                params.table.sql_name()
            ))
            .map_err(into_error)?;
        let mut rows = stmt
            .query(rusqlite::params![params.from, params.to])
            .map_err(into_error)?;
        let mut results = Vec::new();
        while let Some(row) = rows.next().map_err(into_error)? {
            let key: Vec<u8> = row.get(0).map_err(into_error)?;
            let value: Vec<u8> = row.get(1).map_err(into_error)?;
            let value = if params.table.is_compressed() {
                maybe_decompress(value)?
            } else {
                value
            };
            results.push((key, value));
            if results.len() >= params.limit {
                break;
            }
        }
        Ok(results)
    }
}
