/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

pub mod convert;
pub mod journaling;
pub mod refcount;
pub mod submit;

use common::{
    Server, USETABLE_RETAIN,
    message::{CtdlMessage, F_BODY},
};
use rooms::{RoomDir, msglist};
use store::{
    Table,
    codec::{Decoder, Encoder},
    xxhash_rust::xxh3::xxh3_64,
};

/// Forward record key: the message number, big-endian so scans walk in
/// numeric order.
pub fn msg_key(msgnum: i64) -> [u8; 8] {
    msgnum.to_be_bytes()
}

/// Metadata lives in the same table under the negated message number, the
/// same trick the classic store used to keep both rows adjacent to their
/// table without a second table id.
pub fn meta_key(msgnum: i64) -> [u8; 8] {
    (-msgnum).to_be_bytes()
}

/// Supplemental message bookkeeping: the reference count maintained by the
/// refcount reducer, plus cached rendering facts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MsgMeta {
    pub msgnum: i64,
    pub refcount: i32,
    pub content_type: String,
    pub rfc822len: i64,
}

impl MsgMeta {
    pub fn encode(&self) -> Vec<u8> {
        Encoder::new(64)
            .put_i64(self.msgnum)
            .put_i32(self.refcount)
            .put_str(&self.content_type)
            .put_i64(self.rfc822len)
            .finalize()
    }

    pub fn decode(raw: &[u8]) -> trc::Result<Self> {
        let mut dec = Decoder::new(raw);
        Ok(MsgMeta {
            msgnum: dec.get_i64()?,
            refcount: dec.get_i32()?,
            content_type: dec.get_str()?,
            rfc822len: dec.get_i64()?,
        })
    }
}

pub fn euid_index_key(roomnum: i64, euid: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + euid.len());
    key.extend_from_slice(&roomnum.to_be_bytes());
    key.extend_from_slice(euid.as_bytes());
    key
}

pub trait MessageStore: Sync + Send {
    fn fetch_message(
        &self,
        msgnum: i64,
        with_body: bool,
    ) -> impl Future<Output = trc::Result<Option<CtdlMessage>>> + Send;

    fn get_msg_meta(
        &self,
        msgnum: i64,
    ) -> impl Future<Output = trc::Result<Option<MsgMeta>>> + Send;

    fn delete_messages(
        &self,
        room_name: &str,
        msgnums: &[i64],
        content_type: &str,
    ) -> impl Future<Output = trc::Result<usize>> + Send;

    fn locate_msg_by_euid(
        &self,
        roomnum: i64,
        euid: &str,
    ) -> impl Future<Output = trc::Result<Option<i64>>> + Send;

    fn check_if_already_seen(
        &self,
        fingerprint: &str,
    ) -> impl Future<Output = trc::Result<bool>> + Send;
}

impl MessageStore for Server {
    async fn fetch_message(
        &self,
        msgnum: i64,
        with_body: bool,
    ) -> trc::Result<Option<CtdlMessage>> {
        let Some(raw) = self.store().get(Table::MsgMain, &msg_key(msgnum)).await? else {
            return Ok(None);
        };
        let mut msg = CtdlMessage::decode(&raw)?;
        if with_body && msg.has_big_body() {
            if let Some(body) = self.store().get(Table::BigMsgs, &msg_key(msgnum)).await? {
                msg.set(F_BODY, String::from_utf8_lossy(&body).into_owned());
            }
        } else if !with_body {
            msg.remove(F_BODY);
        }
        Ok(Some(msg))
    }

    async fn get_msg_meta(&self, msgnum: i64) -> trc::Result<Option<MsgMeta>> {
        match self.store().get(Table::MsgMain, &meta_key(msgnum)).await? {
            Some(raw) => MsgMeta::decode(&raw).map(Some),
            None => Ok(None),
        }
    }

    /// Remove message numbers from a room's list. With a non-empty
    /// `content_type`, only messages whose metadata carries that type are
    /// touched. Each removal queues a `-1` reference delta and fires the
    /// delete hooks.
    async fn delete_messages(
        &self,
        room_name: &str,
        msgnums: &[i64],
        content_type: &str,
    ) -> trc::Result<usize> {
        let Some(room) = self.get_room(room_name).await? else {
            return Ok(0);
        };

        let mut targets = Vec::new();
        for msgnum in msgnums {
            if !content_type.is_empty() {
                match self.get_msg_meta(*msgnum).await? {
                    Some(meta) if meta.content_type.eq_ignore_ascii_case(content_type) => {}
                    _ => continue,
                }
            }
            targets.push(*msgnum);
        }
        if targets.is_empty() {
            return Ok(0);
        }

        let roomnum = room.number;
        let targets_for_txn = targets.clone();
        let removed: Vec<i64> = self
            .store()
            .transaction(move |txn| {
                let list_key = msglist::msglist_key(roomnum);
                let list = txn
                    .get(Table::MsgLists, &list_key)?
                    .map(|raw| msglist::unpack(&raw))
                    .unwrap_or_default();
                let mut removed = Vec::new();
                let kept: Vec<i64> = list
                    .into_iter()
                    .filter(|m| {
                        if targets_for_txn.contains(m) {
                            removed.push(*m);
                            false
                        } else {
                            true
                        }
                    })
                    .collect();
                if !removed.is_empty() {
                    txn.put(Table::MsgLists, &list_key, &msglist::pack(&kept))?;
                }
                Ok(removed)
            })
            .await?;

        for msgnum in &removed {
            self.inner.data.refcount_queue.enqueue(*msgnum, -1)?;
            self.run_delete_hooks(room_name, *msgnum).await;
            trc::event!(
                Message(trc::MessageEvent::Deleted),
                MsgNum = *msgnum,
                RoomName = room_name.to_string(),
            );
        }
        Ok(removed.len())
    }

    async fn locate_msg_by_euid(&self, roomnum: i64, euid: &str) -> trc::Result<Option<i64>> {
        let hit = self
            .store()
            .get(Table::EuidIndex, &euid_index_key(roomnum, euid))
            .await?;
        let hit = match hit {
            Some(hit) => Some(hit),
            // One well-known client appends ".ics" to the id it was given.
            None => match euid.strip_suffix(".ics") {
                Some(stripped) => {
                    self.store()
                        .get(Table::EuidIndex, &euid_index_key(roomnum, stripped))
                        .await?
                }
                None => None,
            },
        };
        Ok(hit.and_then(|raw| raw.try_into().ok().map(i64::from_le_bytes)))
    }

    /// Test-and-set on the content fingerprint table. Returns true when
    /// the fingerprint was already recorded; either way the timestamp is
    /// refreshed. The check and the upsert share one transaction.
    async fn check_if_already_seen(&self, fingerprint: &str) -> trc::Result<bool> {
        let hash = xxh3_64(fingerprint.as_bytes()) as i32;
        let key = hash.to_be_bytes();
        let seen = self
            .store()
            .transaction(move |txn| {
                let seen = txn.get(Table::UseTable, &key)?.is_some();
                let value = Encoder::new(12)
                    .put_i32(hash)
                    .put_i64(store::now() as i64)
                    .finalize();
                txn.put(Table::UseTable, &key, &value)?;
                Ok(seen)
            })
            .await?;
        if seen {
            trc::event!(
                Message(trc::MessageEvent::AlreadySeen),
                Key = fingerprint.to_string(),
            );
        }
        Ok(seen)
    }
}

/// Decode a use-table row into its `{hash, timestamp}` pair.
pub fn decode_use_table_entry(raw: &[u8]) -> trc::Result<(i32, i64)> {
    let mut dec = Decoder::new(raw);
    Ok((dec.get_i32()?, dec.get_i64()?))
}

pub fn use_table_cutoff(now: u64) -> i64 {
    now.saturating_sub(USETABLE_RETAIN) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_round_trip() {
        let meta = MsgMeta {
            msgnum: 55,
            refcount: 3,
            content_type: "application/x-citadel-delivery-list".into(),
            rfc822len: 1024,
        };
        assert_eq!(MsgMeta::decode(&meta.encode()).unwrap(), meta);
    }

    #[test]
    fn meta_keys_do_not_collide_with_message_keys() {
        for msgnum in [1i64, 42, i32::MAX as i64] {
            assert_ne!(msg_key(msgnum), meta_key(msgnum));
        }
    }

    #[test]
    fn euid_keys_scope_by_room() {
        assert_ne!(euid_index_key(1, "E1"), euid_index_key(2, "E1"));
        assert_ne!(euid_index_key(1, "E1"), euid_index_key(1, "E2"));
    }
}
