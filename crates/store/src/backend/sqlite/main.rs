/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use super::{SqliteConnectionManager, SqliteStore, into_error};
use crate::Table;
use std::{os::unix::fs::PermissionsExt, path::Path, path::PathBuf, time::Duration};
use trc::EventExt;

pub const DB_FILENAME: &str = "citadel.db";

impl SqliteStore {
    /// Open the database under `dir`, walking the recovery ladder when the
    /// clean open fails: plain open with integrity check, then a recovery
    /// reopen, then moving the damaged file aside and starting fresh.
    /// A `RecoveryFailed` error from here means "exit, do not auto-restart".
    pub async fn open(dir: PathBuf) -> trc::Result<Self> {
        tokio::task::spawn_blocking(move || Self::open_sync(&dir))
            .await
            .map_err(|err| trc::StoreEvent::UnexpectedError.reason(err))?
    }

    fn open_sync(dir: &Path) -> trc::Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|err| trc::StoreEvent::UnexpectedError.reason(err))?;
        let _ = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700));

        let db_path = dir.join(DB_FILENAME);
        match Self::try_open(&db_path) {
            Ok(store) => Ok(store),
            Err(err) => {
                trc::event!(
                    Store(trc::StoreEvent::RecoveryAttempt),
                    Path = db_path.to_string_lossy().into_owned(),
                    Reason = err.to_string(),
                );
                Self::run_recovery(&db_path)
            }
        }
    }

    fn try_open(db_path: &Path) -> trc::Result<Self> {
        let pool = r2d2::Pool::builder()
            .max_size((num_cpus::get() as u32).max(4))
            .connection_timeout(Duration::from_secs(30))
            .build(SqliteConnectionManager {
                path: db_path.to_path_buf(),
            })
            .map_err(|err| trc::StoreEvent::UnexpectedError.reason(err))?;

        let store = SqliteStore { pool };
        let conn = store
            .pool
            .get()
            .map_err(|err| trc::StoreEvent::UnexpectedError.reason(err))?;

        let verdict: String = conn
            .query_row("PRAGMA integrity_check(1)", [], |row| row.get(0))
            .map_err(into_error)?;
        if verdict != "ok" {
            return Err(trc::StoreEvent::DataCorruption.details(verdict));
        }

        for table in Table::ALL {
            conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        k BLOB PRIMARY KEY,
                        v BLOB NOT NULL
                    ) WITHOUT ROWID",
                    table.sql_name()
                ),
                [],
            )
            .map_err(into_error)?;
        }
        drop(conn);

        Ok(store)
    }

    fn run_recovery(db_path: &Path) -> trc::Result<Self> {
        // A second open lets the engine replay or discard a torn WAL.
        if let Ok(store) = Self::try_open(db_path) {
            return Ok(store);
        }

        // Catastrophic: preserve the damaged files for post-mortem and
        // start with an empty database.
        let stamp = crate::now();
        for suffix in ["", "-wal", "-shm"] {
            let src = PathBuf::from(format!("{}{suffix}", db_path.display()));
            if src.exists() {
                let dst = PathBuf::from(format!("{}.damaged.{stamp}{suffix}", db_path.display()));
                if let Err(err) = std::fs::rename(&src, &dst) {
                    return Err(trc::StoreEvent::RecoveryFailed
                        .caused_by(trc::location!())
                        .reason(err));
                }
            }
        }

        Self::try_open(db_path).map_err(|err| {
            trc::StoreEvent::RecoveryFailed
                .caused_by(trc::location!())
                .reason(err)
        })
    }

    pub async fn close(&self) {}
}
