/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use crate::RoomRecord;
use common::Server;
use store::{
    ScanParams, Table,
    codec::{Decoder, Encoder},
};

/// Per-user/per-room bookkeeping. Keyed by {room number, room generation,
/// user number}, so a zapped and recreated room starts from a clean slate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisitRecord {
    pub roomnum: i64,
    pub room_gen: i64,
    pub usernum: i64,
    pub lastseen: i64,
    /// Opaque IMAP-style sequence sets, round-tripped for the protocol
    /// modules.
    pub seen: String,
    pub answered: String,
    pub view: u8,
    pub flags: u32,
}

impl VisitRecord {
    pub fn key(&self) -> Vec<u8> {
        visit_key(self.roomnum, self.room_gen, self.usernum)
    }

    pub fn encode(&self) -> Vec<u8> {
        Encoder::new(96)
            .put_i64(self.roomnum)
            .put_i64(self.room_gen)
            .put_i64(self.usernum)
            .put_i64(self.lastseen)
            .put_str(&self.seen)
            .put_str(&self.answered)
            .put_u8(self.view)
            .put_u32(self.flags)
            .finalize()
    }

    pub fn decode(raw: &[u8]) -> trc::Result<Self> {
        let mut dec = Decoder::new(raw);
        Ok(VisitRecord {
            roomnum: dec.get_i64()?,
            room_gen: dec.get_i64()?,
            usernum: dec.get_i64()?,
            lastseen: dec.get_i64()?,
            seen: dec.get_str()?,
            answered: dec.get_str()?,
            view: dec.get_u8()?,
            flags: dec.get_u32()?,
        })
    }
}

pub fn visit_key(roomnum: i64, room_gen: i64, usernum: i64) -> Vec<u8> {
    let mut key = Vec::with_capacity(24);
    key.extend_from_slice(&roomnum.to_be_bytes());
    key.extend_from_slice(&room_gen.to_be_bytes());
    key.extend_from_slice(&usernum.to_be_bytes());
    key
}

pub trait VisitDir: Sync + Send {
    fn get_visit(
        &self,
        room: &RoomRecord,
        usernum: i64,
    ) -> impl Future<Output = trc::Result<VisitRecord>> + Send;

    fn put_visit(&self, visit: &VisitRecord) -> impl Future<Output = trc::Result<()>> + Send;

    /// Drop every visit row belonging to `usernum`, part of the user purge
    /// cascade.
    fn purge_user_visits(&self, usernum: i64) -> impl Future<Output = trc::Result<usize>> + Send;

    fn each_visit(&self) -> impl Future<Output = trc::Result<Vec<VisitRecord>>> + Send;
}

impl VisitDir for Server {
    async fn get_visit(&self, room: &RoomRecord, usernum: i64) -> trc::Result<VisitRecord> {
        let key = visit_key(room.number, room.generation, usernum);
        match self.store().get(Table::Visit, &key).await? {
            Some(raw) => VisitRecord::decode(&raw),
            // Fresh visits inherit the room's default view.
            None => Ok(VisitRecord {
                roomnum: room.number,
                room_gen: room.generation,
                usernum,
                view: room.default_view,
                ..Default::default()
            }),
        }
    }

    async fn put_visit(&self, visit: &VisitRecord) -> trc::Result<()> {
        let key = visit.key();
        let raw = visit.encode();
        self.store()
            .transaction(move |txn| txn.put(Table::Visit, &key, &raw))
            .await
    }

    async fn purge_user_visits(&self, usernum: i64) -> trc::Result<usize> {
        let mut purged = 0;
        for visit in self.each_visit().await? {
            if visit.usernum == usernum {
                self.store().delete(Table::Visit, &visit.key()).await?;
                purged += 1;
            }
        }
        Ok(purged)
    }

    async fn each_visit(&self) -> trc::Result<Vec<VisitRecord>> {
        let mut visits = Vec::new();
        for (_, raw) in self.store().scan(ScanParams::new(Table::Visit)).await? {
            visits.push(VisitRecord::decode(&raw)?);
        }
        Ok(visits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visit_record_round_trip() {
        let visit = VisitRecord {
            roomnum: 5,
            room_gen: 2,
            usernum: 99,
            lastseen: 1234,
            seen: "1:1230,1232".into(),
            answered: String::new(),
            view: 3,
            flags: common::V_ACCESS,
        };
        assert_eq!(VisitRecord::decode(&visit.encode()).unwrap(), visit);
    }

    #[test]
    fn visit_keys_group_by_room() {
        let a = visit_key(1, 0, 50);
        let b = visit_key(1, 0, 51);
        let c = visit_key(2, 0, 1);
        assert!(a < b && b < c);
    }
}
