/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use crate::{MsgMeta, meta_key, msg_key};
use ahash::AHashMap;
use common::Server;
use store::Table;

/// Apply every queued reference delta. This is the only writer of message
/// reference counts, so it needs no coordination beyond the queue file
/// swap. Messages reaching zero references are deleted outright, big body
/// and metadata included.
pub async fn run_refcount_reducer(server: &Server) -> trc::Result<()> {
    let entries = server.inner.data.refcount_queue.drain()?;
    if entries.is_empty() {
        return Ok(());
    }

    let mut net: AHashMap<i64, i32> = AHashMap::new();
    for (msgnum, delta) in entries {
        *net.entry(msgnum).or_default() += delta;
    }

    let mut deleted = 0usize;
    let total = net.len();
    for (msgnum, delta) in net {
        let removed = server
            .store()
            .transaction(move |txn| {
                let mut meta = match txn.get(Table::MsgMain, &meta_key(msgnum))? {
                    Some(raw) => MsgMeta::decode(&raw)?,
                    None => MsgMeta {
                        msgnum,
                        ..Default::default()
                    },
                };
                meta.refcount += delta;
                if meta.refcount <= 0 {
                    txn.delete(Table::MsgMain, &msg_key(msgnum))?;
                    txn.delete(Table::MsgMain, &meta_key(msgnum))?;
                    txn.delete(Table::BigMsgs, &msg_key(msgnum))?;
                    Ok(true)
                } else {
                    txn.put(Table::MsgMain, &meta_key(msgnum), &meta.encode())?;
                    Ok(false)
                }
            })
            .await?;
        if removed {
            deleted += 1;
        }
    }

    server.inner.data.refcount_queue.commit_drain()?;
    trc::event!(
        Store(trc::StoreEvent::RefcountApplied),
        Total = total,
        Size = deleted,
    );
    Ok(())
}
