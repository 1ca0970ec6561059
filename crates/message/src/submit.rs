/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use crate::{MessageStore, MsgMeta, euid_index_key, meta_key, msg_key};
use common::{
    BIG_MESSAGE, MAILROOM, SMTP_SPOOLOUT_ROOM, Server,
    config::KEY_HIGHEST_MSGNUM,
    message::{CtdlMessage, F_BIG_BODY, F_BODY, F_JOURNAL, F_TIMESTAMP, RecipientSet},
    view_uses_euid,
};
use rooms::{RoomRecord, mailbox_name, msglist, room_key};
use store::Table;
use trc::EventExt;
use users::UserDir;

/// What `submit` recorded for one target room.
struct SavedRoom {
    room_name: String,
    appended: bool,
    replaced_euid_msgnum: Option<i64>,
}

pub trait SubmitMsg: Sync + Send {
    /// The single entry point for message delivery: hooks, storage, room
    /// distribution, reference counting, EUID replacement and journaling
    /// all hang off this path.
    fn submit_msg(
        &self,
        msg: &mut CtdlMessage,
        recps: Option<&RecipientSet>,
        target_room: &str,
    ) -> impl Future<Output = trc::Result<i64>> + Send;
}

impl SubmitMsg for Server {
    async fn submit_msg(
        &self,
        msg: &mut CtdlMessage,
        recps: Option<&RecipientSet>,
        target_room: &str,
    ) -> trc::Result<i64> {
        let hook_sum = self.run_before_save_hooks(msg, recps).await;
        if hook_sum != 0 {
            trc::event!(
                Message(trc::MessageEvent::RejectedByHook),
                Code = hook_sum,
            );
            return Err(trc::MessageEvent::RejectedByHook.ctx(trc::Key::Code, hook_sum));
        }

        if msg.get(F_TIMESTAMP).is_none() {
            msg.set(F_TIMESTAMP, store::now().to_string());
        }

        // Work out the full set of rooms this message lands in.
        let mut rooms: Vec<String> = Vec::new();
        if !target_room.is_empty() {
            rooms.push(target_room.to_string());
        }
        if let Some(recps) = recps {
            for local in &recps.recp_local {
                if let Some(user) = self.get_user(local).await? {
                    rooms.push(mailbox_name(user.usernum, MAILROOM));
                }
            }
            for room in &recps.recp_room {
                rooms.push(room.clone());
            }
            if recps.num_internet() > 0 {
                rooms.push(SMTP_SPOOLOUT_ROOM.to_string());
            }
        }
        rooms.sort();
        rooms.dedup_by(|a, b| room_key(a) == room_key(b));

        let msgnum = self.config().next_i64(KEY_HIGHEST_MSGNUM).await?;

        // Oversized bodies overflow into their own table.
        let mut big_body = None;
        if msg.body().map_or(0, |b| b.len()) > BIG_MESSAGE {
            big_body = msg.remove(F_BODY);
            msg.set(F_BIG_BODY, "1");
        }

        let meta = MsgMeta {
            msgnum,
            refcount: 0,
            content_type: sniff_content_type(
                big_body.as_deref().or(msg.body()).unwrap_or(""),
            ),
            rfc822len: 0,
        };

        let encoded_msg = msg.encode();
        let encoded_meta = meta.encode();
        let euid = msg.euid().map(|e| e.to_string());
        let txn_rooms = rooms.clone();
        let saved: Vec<SavedRoom> = self
            .store()
            .transaction(move |txn| {
                txn.put(Table::MsgMain, &msg_key(msgnum), &encoded_msg)?;
                txn.put(Table::MsgMain, &meta_key(msgnum), &encoded_meta)?;
                if let Some(body) = &big_body {
                    txn.put(Table::BigMsgs, &msg_key(msgnum), body.as_bytes())?;
                }

                let mut saved = Vec::with_capacity(txn_rooms.len());
                for room_name in &txn_rooms {
                    let key = room_key(room_name);
                    let Some(raw) = txn.get(Table::Rooms, key.as_bytes())? else {
                        saved.push(SavedRoom {
                            room_name: room_name.clone(),
                            appended: false,
                            replaced_euid_msgnum: None,
                        });
                        continue;
                    };
                    let mut room = RoomRecord::decode(&raw)?;

                    let list_key = msglist::msglist_key(room.number);
                    let mut list = txn
                        .get(Table::MsgLists, &list_key)?
                        .map(|raw| msglist::unpack(&raw))
                        .unwrap_or_default();
                    // A message number appears in a room's list at most
                    // once.
                    let appended = if list.contains(&msgnum) {
                        false
                    } else {
                        list.push(msgnum);
                        txn.put(Table::MsgLists, &list_key, &msglist::pack(&list))?;
                        true
                    };

                    room.highest = room.highest.max(msgnum);
                    room.mtime = store::now();
                    txn.put(Table::Rooms, key.as_bytes(), &room.encode())?;

                    // Replace-by-id semantics for EUID rooms.
                    let mut replaced = None;
                    if let Some(euid) = &euid {
                        if view_uses_euid(room.default_view) {
                            let index_key = euid_index_key(room.number, euid);
                            replaced = txn
                                .get(Table::EuidIndex, &index_key)?
                                .and_then(|raw| raw.try_into().ok().map(i64::from_le_bytes))
                                .filter(|old| *old != msgnum);
                            txn.put(Table::EuidIndex, &index_key, &msgnum.to_le_bytes())?;
                        }
                    }

                    saved.push(SavedRoom {
                        room_name: room_name.clone(),
                        appended,
                        replaced_euid_msgnum: replaced,
                    });
                }
                Ok(saved)
            })
            .await?;

        for entry in &saved {
            if entry.appended {
                self.inner.data.refcount_queue.enqueue(msgnum, 1)?;
            }
            if let Some(old_msgnum) = entry.replaced_euid_msgnum {
                self.delete_messages(&entry.room_name, &[old_msgnum], "")
                    .await?;
                trc::event!(
                    Message(trc::MessageEvent::EuidReplaced),
                    RoomName = entry.room_name.clone(),
                    MsgNum = old_msgnum,
                    Id = msgnum,
                );
            }
        }

        trc::event!(
            Message(trc::MessageEvent::Saved),
            MsgNum = msgnum,
            Total = saved.iter().filter(|s| s.appended).count(),
        );

        self.run_after_save_hooks(msg, recps, msgnum).await;

        // Journal capture happens after the save so the stored form is
        // what gets journaled.
        if msg.get(F_JOURNAL).is_none_or(|j| j != "do not journal") {
            let journal_email = self.config().get_bool("c_journal_email");
            let journal_pubmsgs = self.config().get_bool("c_journal_pubmsgs");
            let has_recipients = recps.is_some_and(|r| !r.is_empty());
            if (has_recipients && journal_email) || (!has_recipients && journal_pubmsgs) {
                crate::journaling::queue_capture(self, msg, recps, msgnum).await;
            }
        }

        Ok(msgnum)
    }
}

/// A body that opens with MIME headers announces its own type; everything
/// else is plain text. The metadata copy lets queue scans filter without
/// decoding messages.
fn sniff_content_type(body: &str) -> String {
    for line in body.lines() {
        if line.is_empty() {
            break;
        }
        if let Some(value) = line
            .strip_prefix("Content-type:")
            .or_else(|| line.strip_prefix("Content-Type:"))
        {
            return value
                .split(';')
                .next()
                .unwrap_or(value)
                .trim()
                .to_string();
        }
    }
    "text/plain".to_string()
}

#[cfg(test)]
mod tests {
    use super::sniff_content_type;

    #[test]
    fn content_type_sniffing() {
        assert_eq!(
            sniff_content_type(
                "Content-type: application/x-citadel-delivery-list\n\nmsgid|1\n"
            ),
            "application/x-citadel-delivery-list"
        );
        assert_eq!(sniff_content_type("hello world"), "text/plain");
        assert_eq!(
            sniff_content_type("Content-Type: text/html; charset=utf-8\n\n<p>hi</p>"),
            "text/html"
        );
        // Headers end at the first blank line.
        assert_eq!(
            sniff_content_type("\nContent-type: text/html\n"),
            "text/plain"
        );
    }
}
