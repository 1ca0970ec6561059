/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use ahash::AHashSet;
use chrono::Timelike;
use common::{
    AX_AIDE, EXPIRE_AGE, EXPIRE_MANUAL, EXPIRE_NEXTLEVEL, EXPIRE_NUMMSGS, QR_DIRECTORY,
    QR_PERMANENT, Server, US_PERM,
    registry::UserHookEvent,
};
use message::{MessageStore, decode_use_table_entry, msg_key, use_table_cutoff};
use rooms::{
    FloorDir, RoomDir, RoomRecord, mailbox_owner,
    msglist::{MsgListDir, msglist_key},
    visits::VisitDir,
};
use store::{ScanParams, Table};
use users::{UserDir, UserRecord};

const PURGE_GUARD_SECS: u64 = 12 * 3600;

#[derive(Default)]
struct PurgeReport {
    users: usize,
    users_deferred: usize,
    messages: usize,
    rooms: usize,
    visits: usize,
    use_table: usize,
    euid: usize,
    corrupt: Vec<String>,
}

/// The daily auto-purger. Runs at the configured hour (or on demand when
/// `force` is set) and never twice within twelve hours.
pub async fn run_purge(server: &Server, force: bool) {
    use std::sync::atomic::Ordering;

    let now = store::now();
    if !force {
        let purge_hour = server.config().int_or("c_purge_hour", 4) as u32;
        if chrono::Utc::now().hour() != purge_hour {
            return;
        }
        let last = server.inner.data.last_purge_run.load(Ordering::Relaxed);
        if now.saturating_sub(last) < PURGE_GUARD_SECS {
            return;
        }
    }
    server
        .inner
        .data
        .last_purge_run
        .store(now, Ordering::Relaxed);

    trc::event!(Purge(trc::PurgeEvent::Started));
    let mut report = PurgeReport::default();

    if let Err(err) = purge_users(server, &mut report).await {
        trc::error!(err.details("user purge failed"));
    }
    if let Err(err) = expire_messages(server, &mut report).await {
        trc::error!(err.details("message expiry failed"));
    }
    if let Err(err) = purge_rooms(server, &mut report).await {
        trc::error!(err.details("room purge failed"));
    }
    if let Err(err) = purge_orphan_visits(server, &mut report).await {
        trc::error!(err.details("visit purge failed"));
    }
    if let Err(err) = purge_use_table(server, &mut report).await {
        trc::error!(err.details("use table purge failed"));
    }
    if let Err(err) = purge_euid_index(server, &mut report).await {
        trc::error!(err.details("euid index purge failed"));
    }
    if server.config().get_bool("c_auto_cull") {
        if let Err(err) = server.store().compact().await {
            trc::error!(err.details("compaction failed"));
        }
    }

    trc::event!(
        Purge(trc::PurgeEvent::Finished),
        Details = vec![
            report.users,
            report.messages,
            report.rooms,
            report.visits,
            report.use_table,
            report.euid
        ],
    );

    let mut text = format!(
        "Automatic purge report:\n\n\
         Users purged: {} ({} deferred until logout)\n\
         Messages expired: {}\n\
         Rooms purged: {}\n\
         Stale visit records removed: {}\n\
         Use table entries culled: {}\n\
         Orphaned EUID entries removed: {}\n",
        report.users,
        report.users_deferred,
        report.messages,
        report.rooms,
        report.visits,
        report.use_table,
        report.euid,
    );
    if !report.corrupt.is_empty() {
        text.push_str("\nRecords needing attention (not purged):\n");
        for line in &report.corrupt {
            text.push_str("  ");
            text.push_str(line);
            text.push('\n');
        }
    }
    if let Err(err) = crate::aide_message(server, "Automatic purge report", &text).await {
        trc::error!(err.details("cannot post purge report"));
    }
}

fn is_logged_in(server: &Server, usernum: i64) -> bool {
    server
        .sessions()
        .snapshot()
        .iter()
        .any(|s| s.user_num() == usernum)
}

async fn purge_user(server: &Server, user: &UserRecord) -> trc::Result<()> {
    server.purge_user_visits(user.usernum).await?;
    server.delete_user_records(user).await?;
    server
        .run_user_hooks(&user.fullname, user.usernum, UserHookEvent::PurgeUser)
        .await;
    trc::event!(
        Purge(trc::PurgeEvent::UserPurged),
        AccountName = user.fullname.clone(),
        Id = user.usernum,
    );
    Ok(())
}

async fn purge_users(server: &Server, report: &mut PurgeReport) -> trc::Result<()> {
    let purge_days = server.config().int_or("c_userpurge", 120);
    let now = store::now();

    // Two-phase: collect names first, then work through them with writes.
    for name in server.each_user_name().await? {
        let Some(user) = server.get_user(&name).await? else {
            continue;
        };

        if user.fullname.trim().is_empty() || user.usernum < 0 {
            report.corrupt.push(format!(
                "user #{} with name \"{}\"",
                user.usernum, user.fullname
            ));
            trc::event!(
                Purge(trc::PurgeEvent::CorruptRecord),
                Id = user.usernum,
            );
            continue;
        }
        if user.usernum == 0 {
            continue;
        }

        // "deleteme" is an explicit self-service deletion request.
        let explicit_delete =
            user.password.trim().eq_ignore_ascii_case("deleteme") || user.axlevel == 0;
        let mut expired = false;
        if !explicit_delete {
            if user.flags & US_PERM != 0 || user.axlevel >= AX_AIDE {
                continue;
            }
            let days = match user.purge_days {
                0 => purge_days,
                days => days as i64,
            };
            if days <= 0 {
                continue;
            }
            expired = now.saturating_sub(user.lastcall) > (days as u64) * 86_400;
        }
        if !(explicit_delete || expired) {
            continue;
        }

        if is_logged_in(server, user.usernum) {
            // Demote now, remove on a later pass once they are offline.
            if user.axlevel != 0 {
                let mut user = user.clone();
                user.axlevel = 0;
                server.put_user(&user).await?;
            }
            report.users_deferred += 1;
            trc::event!(
                Purge(trc::PurgeEvent::UserDeferred),
                AccountName = user.fullname.clone(),
            );
            continue;
        }

        purge_user(server, &user).await?;
        report.users += 1;
    }
    Ok(())
}

/// Resolve the effective expire policy: room, then floor, then the
/// site-wide default (with a separate default for mailboxes).
async fn effective_policy(server: &Server, room: &RoomRecord) -> trc::Result<(i32, i32)> {
    if room.expire_mode != EXPIRE_NEXTLEVEL {
        return Ok((room.expire_mode, room.expire_value));
    }
    let floor = server.get_floor(room.floor).await?;
    if floor.expire_mode != EXPIRE_NEXTLEVEL {
        return Ok((floor.expire_mode, floor.expire_value));
    }
    if room.is_mailbox() {
        Ok((
            server.config().int_or("c_mbxep_mode", EXPIRE_MANUAL as i64) as i32,
            server.config().int_or("c_mbxep_value", 0) as i32,
        ))
    } else {
        Ok((
            server.config().int_or("c_ep_mode", EXPIRE_MANUAL as i64) as i32,
            server.config().int_or("c_ep_value", 0) as i32,
        ))
    }
}

async fn expire_messages(server: &Server, report: &mut PurgeReport) -> trc::Result<()> {
    let now = store::now();
    for room in server.each_room().await? {
        if room.is_system() {
            continue;
        }
        let (mode, value) = effective_policy(server, &room).await?;
        if mode == EXPIRE_MANUAL || value <= 0 {
            continue;
        }

        let msglist = server.get_msglist(room.number).await?;
        let mut targets = Vec::new();
        match mode {
            EXPIRE_NUMMSGS => {
                if msglist.len() > value as usize {
                    targets.extend_from_slice(&msglist[..msglist.len() - value as usize]);
                }
            }
            EXPIRE_AGE => {
                let cutoff = now.saturating_sub(value as u64 * 86_400);
                for msgnum in &msglist {
                    if let Some(msg) = server.fetch_message(*msgnum, false).await? {
                        if msg.timestamp() < cutoff {
                            targets.push(*msgnum);
                        }
                    }
                }
            }
            _ => continue,
        }

        if !targets.is_empty() {
            let expired = server.delete_messages(&room.name, &targets, "").await?;
            report.messages += expired;
            trc::event!(
                Purge(trc::PurgeEvent::MessageExpired),
                RoomName = room.name.clone(),
                Total = expired,
            );
        }
    }
    Ok(())
}

/// Remove a room along with its message references, list row and visits.
async fn purge_room(server: &Server, room: &RoomRecord) -> trc::Result<()> {
    let msglist = server.get_msglist(room.number).await?;
    if !msglist.is_empty() {
        server.delete_messages(&room.name, &msglist, "").await?;
    }
    let list_key = msglist_key(room.number).to_vec();
    server.store().delete(Table::MsgLists, &list_key).await?;

    for visit in server.each_visit().await? {
        if visit.roomnum == room.number {
            server.store().delete(Table::Visit, &visit.key()).await?;
        }
    }

    server.delete_room(&room.name).await?;
    trc::event!(
        Purge(trc::PurgeEvent::RoomPurged),
        RoomName = room.name.clone(),
    );
    Ok(())
}

async fn purge_rooms(server: &Server, report: &mut PurgeReport) -> trc::Result<()> {
    let roompurge_days = server.config().int_or("c_roompurge", 30);
    let now = store::now();

    for room in server.each_room().await? {
        if room.is_system() || room.flags & (QR_PERMANENT | QR_DIRECTORY) != 0 {
            continue;
        }
        if let Some(owner) = mailbox_owner(&room.name) {
            // Mailboxes live and die with their owner.
            if server.get_user_by_number(owner).await?.is_none() {
                purge_room(server, &room).await?;
                report.rooms += 1;
            }
            continue;
        }
        if roompurge_days > 0
            && now.saturating_sub(room.mtime) > roompurge_days as u64 * 86_400
        {
            purge_room(server, &room).await?;
            report.rooms += 1;
        }
    }
    Ok(())
}

async fn purge_orphan_visits(server: &Server, report: &mut PurgeReport) -> trc::Result<()> {
    let mut valid_rooms = AHashSet::new();
    for room in server.each_room().await? {
        valid_rooms.insert((room.number, room.generation));
    }
    let mut valid_users = AHashSet::new();
    for name in server.each_user_name().await? {
        if let Some(user) = server.get_user(&name).await? {
            valid_users.insert(user.usernum);
        }
    }

    for visit in server.each_visit().await? {
        if !valid_rooms.contains(&(visit.roomnum, visit.room_gen))
            || !valid_users.contains(&visit.usernum)
        {
            server.store().delete(Table::Visit, &visit.key()).await?;
            report.visits += 1;
            trc::event!(
                Purge(trc::PurgeEvent::VisitPurged),
                Id = visit.usernum,
                Value = visit.roomnum,
            );
        }
    }
    Ok(())
}

async fn purge_use_table(server: &Server, report: &mut PurgeReport) -> trc::Result<()> {
    let cutoff = use_table_cutoff(store::now());
    for (key, value) in server
        .store()
        .scan(ScanParams::new(Table::UseTable))
        .await?
    {
        let (_, timestamp) = decode_use_table_entry(&value)?;
        if timestamp < cutoff {
            server.store().delete(Table::UseTable, &key).await?;
            report.use_table += 1;
        }
    }
    if report.use_table > 0 {
        trc::event!(
            Purge(trc::PurgeEvent::UseTablePurged),
            Total = report.use_table,
        );
    }
    Ok(())
}

async fn purge_euid_index(server: &Server, report: &mut PurgeReport) -> trc::Result<()> {
    for (key, value) in server
        .store()
        .scan(ScanParams::new(Table::EuidIndex))
        .await?
    {
        let Some(msgnum) = value.try_into().ok().map(i64::from_le_bytes) else {
            server.store().delete(Table::EuidIndex, &key).await?;
            report.euid += 1;
            continue;
        };
        if server
            .store()
            .get(Table::MsgMain, &msg_key(msgnum))
            .await?
            .is_none()
        {
            server.store().delete(Table::EuidIndex, &key).await?;
            report.euid += 1;
            trc::event!(Purge(trc::PurgeEvent::EuidPurged), MsgNum = msgnum);
        }
    }
    Ok(())
}
