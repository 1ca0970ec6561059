/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use crate::{
    CIT_OK, ERROR, ILLEGAL_VALUE, INTERNAL_ERROR, LISTING_END, LISTING_FOLLOWS, SEND_LISTING,
    session::{AccessLevel, Session},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use store::{ScanParams, Table};

/// Full-database migration over the wire. `MIGR export` streams every row
/// of every table as `table|key|value` (key and value base64), with
/// progress markers, ending with the usual listing terminator. `MIGR
/// import` truncates the database and loads the same stream, committing
/// only when the 100% marker arrived.
pub async fn cmd_migr(session: &mut Session, args: &str) {
    if !session.access_check(AccessLevel::Internal) {
        return;
    }
    match args.trim().to_ascii_lowercase().as_str() {
        "export" => cmd_migr_export(session).await,
        "import" => cmd_migr_import(session).await,
        _ => {
            session.cprintf(format!(
                "{} ERROR: usage: MIGR export|import",
                ERROR + ILLEGAL_VALUE
            ));
        }
    }
}

async fn cmd_migr_export(session: &mut Session) {
    session.cprintf(format!("{LISTING_FOLLOWS} export in progress"));
    if session.flush_output().await.is_err() {
        return;
    }

    let server = session.server.clone();
    let total_tables = Table::ALL.len();
    for (index, table) in Table::ALL.into_iter().enumerate() {
        let rows = match server.store().scan(ScanParams::new(table)).await {
            Ok(rows) => rows,
            Err(err) => {
                trc::error!(err.details("migration export failed"));
                session.cprintf(LISTING_END);
                return;
            }
        };
        for (key, value) in rows {
            session.cprintf(format!(
                "{}|{}|{}",
                table.id(),
                BASE64.encode(&key),
                BASE64.encode(&value),
            ));
        }
        session.cprintf(format!(
            "<progress>{}</progress>",
            (index + 1) * 100 / total_tables
        ));
        if session.flush_output().await.is_err() {
            return;
        }
    }
    session.cprintf(LISTING_END);
}

async fn cmd_migr_import(session: &mut Session) {
    session.cprintf(format!("{SEND_LISTING} send the export stream; end with 000"));
    if session.flush_output().await.is_err() {
        return;
    }

    let server = session.server.clone();
    // The importer replaces the whole database; quiet down the
    // housekeeper first.
    services::housekeeper::disable_housekeeping(&server).await;

    for table in Table::ALL {
        if let Err(err) = server.store().truncate(table).await {
            trc::error!(err.details("cannot truncate table for import"));
            session.cprintf(format!("{} ERROR: import failed", ERROR + INTERNAL_ERROR));
            return;
        }
    }

    let mut rows = 0usize;
    let mut reached_100 = false;
    let result = loop {
        let line = match session.read_command_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(()) => break Err(()),
        };
        if line == LISTING_END {
            break Ok(());
        }
        if let Some(progress) = line
            .strip_prefix("<progress>")
            .and_then(|rest| rest.strip_suffix("</progress>"))
        {
            if progress.trim() == "100" {
                reached_100 = true;
            }
            continue;
        }

        let mut tokens = line.split('|');
        let (Some(table), Some(key), Some(value)) =
            (tokens.next(), tokens.next(), tokens.next())
        else {
            continue;
        };
        let Some(table) = table.parse::<u8>().ok().and_then(Table::from_id) else {
            continue;
        };
        let (Ok(key), Ok(value)) = (BASE64.decode(key), BASE64.decode(value)) else {
            continue;
        };
        if let Err(err) = server.store().put(table, &key, &value).await {
            trc::error!(err.details("import write failed"));
            break Err(());
        }
        rows += 1;
    };

    services::housekeeper::enable_housekeeping(&server);

    if result.is_ok() && reached_100 {
        trc::event!(
            Store(trc::StoreEvent::LegacyMigration),
            Total = rows,
            Details = "full database import complete",
        );
        session.cprintf(format!("{CIT_OK} imported {rows} records"));
    } else {
        session.cprintf(format!(
            "{} ERROR: import did not complete; the database must be restored",
            ERROR + INTERNAL_ERROR
        ));
    }
}
