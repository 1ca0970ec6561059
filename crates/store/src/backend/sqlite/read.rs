/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use super::{SqliteStore, into_error};
use crate::{ScanParams, Table, compress::maybe_decompress};

impl SqliteStore {
    pub async fn get(&self, table: Table, key: Vec<u8>) -> trc::Result<Option<Vec<u8>>> {
        self.spawn_worker(move |conn| {
            let mut stmt = conn
                .prepare_cached(&format!("SELECT v FROM {} WHERE k = ?", table.sql_name()))
                .map_err(into_error)?;
            match stmt.query_row([&key], |row| row.get::<_, Vec<u8>>(0)) {
                Ok(value) if table.is_compressed() => maybe_decompress(value).map(Some),
                Ok(value) => Ok(Some(value)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(err) => Err(into_error(err)),
            }
        })
        .await
    }

    pub async fn scan(&self, params: ScanParams) -> trc::Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.spawn_worker(move |conn| {
            let order = if params.ascending { "ASC" } else { "DESC" };
            let columns = if params.values { "k, v" } else { "k" };
            let mut stmt = conn
                .prepare_cached(&format!(
                    "SELECT {columns} FROM {} WHERE k >= ?1 AND k <= ?2 ORDER BY k {order} LIMIT ?3",
                    params.table.sql_name()
                ))
                .map_err(into_error)?;
            let limit = if params.limit == usize::MAX {
                -1i64
            } else {
                params.limit as i64
            };
            let mut rows = stmt
                .query(rusqlite::params![params.from, params.to, limit])
                .map_err(into_error)?;

            let mut results = Vec::new();
            while let Some(row) = rows.next().map_err(into_error)? {
                let key: Vec<u8> = row.get(0).map_err(into_error)?;
                let value: Vec<u8> = if params.values {
                    let value: Vec<u8> = row.get(1).map_err(into_error)?;
                    if params.table.is_compressed() {
                        maybe_decompress(value)?
                    } else {
                        value
                    }
                } else {
                    Vec::new()
                };
                results.push((key, value));
            }
            Ok(results)
        })
        .await
    }
}
