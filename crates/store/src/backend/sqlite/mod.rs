/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

pub mod main;
pub mod read;
pub mod write;

use std::{path::PathBuf, time::Duration};
use trc::EventExt;

#[derive(Clone)]
pub struct SqliteStore {
    pub(crate) pool: r2d2::Pool<SqliteConnectionManager>,
}

pub(crate) struct SqliteConnectionManager {
    pub(crate) path: PathBuf,
}

impl r2d2::ManageConnection for SqliteConnectionManager {
    type Connection = rusqlite::Connection;
    type Error = rusqlite::Error;

    fn connect(&self) -> Result<rusqlite::Connection, rusqlite::Error> {
        let conn = rusqlite::Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_millis(500))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(conn)
    }

    fn is_valid(&self, conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
        conn.query_row("SELECT 1", [], |_| Ok(()))
    }

    fn has_broken(&self, _: &mut rusqlite::Connection) -> bool {
        false
    }
}

impl SqliteStore {
    /// Hand a pooled connection to a blocking closure without stalling the
    /// async threads.
    pub(crate) async fn spawn_worker<U, V>(&self, f: U) -> trc::Result<V>
    where
        U: FnOnce(&mut rusqlite::Connection) -> trc::Result<V> + Send + 'static,
        V: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| trc::StoreEvent::UnexpectedError.reason(err))?;
            f(&mut conn)
        })
        .await
        .map_err(|err| trc::StoreEvent::UnexpectedError.reason(err))?
    }
}

pub(crate) fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}

pub(crate) fn into_error(err: rusqlite::Error) -> trc::Error {
    if is_busy(&err) {
        trc::StoreEvent::DeadlockRetry.reason(err)
    } else {
        trc::StoreEvent::UnexpectedError.reason(err)
    }
}
