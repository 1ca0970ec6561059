/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

pub mod access;
pub mod msglist;
pub mod netconfig;
pub mod visits;

use common::{
    QR_GUESSNAME, QR_INUSE, QR_MAILBOX, QR_PASSWORDED, QR_PERMANENT, QR_PRIVATE, QR2_SYSTEM,
    ROOMNAMELEN, Server, VIEW_BBS,
    config::KEY_HIGHEST_ROOMNUM,
};
use store::{
    ScanParams, Table,
    codec::{Decoder, Encoder},
};
use trc::EventExt;

pub const MAX_FLOORS: usize = 16;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomRecord {
    pub name: String,
    pub password: String,
    pub roomaide: i64,
    pub highest: i64,
    pub generation: i64,
    pub flags: u32,
    pub dirname: String,
    pub msgnum_info: i64,
    pub floor: u8,
    pub mtime: u64,
    pub expire_mode: i32,
    pub expire_value: i32,
    pub number: i64,
    pub order: u8,
    pub flags2: u32,
    pub default_view: u8,
    pub msgnum_pic: i64,
}

impl RoomRecord {
    pub fn encode(&self) -> Vec<u8> {
        Encoder::new(160)
            .put_str(&self.name)
            .put_str(&self.password)
            .put_i64(self.roomaide)
            .put_i64(self.highest)
            .put_i64(self.generation)
            .put_u32(self.flags)
            .put_str(&self.dirname)
            .put_i64(self.msgnum_info)
            .put_u8(self.floor)
            .put_u64(self.mtime)
            .put_i32(self.expire_mode)
            .put_i32(self.expire_value)
            .put_i64(self.number)
            .put_u8(self.order)
            .put_u32(self.flags2)
            .put_u8(self.default_view)
            .put_i64(self.msgnum_pic)
            .finalize()
    }

    pub fn decode(raw: &[u8]) -> trc::Result<Self> {
        let mut dec = Decoder::new(raw);
        Ok(RoomRecord {
            name: dec.get_str()?,
            password: dec.get_str()?,
            roomaide: dec.get_i64()?,
            highest: dec.get_i64()?,
            generation: dec.get_i64()?,
            flags: dec.get_u32()?,
            dirname: dec.get_str()?,
            msgnum_info: dec.get_i64()?,
            floor: dec.get_u8()?,
            mtime: dec.get_u64()?,
            expire_mode: dec.get_i32()?,
            expire_value: dec.get_i32()?,
            number: dec.get_i64()?,
            order: dec.get_u8()?,
            flags2: dec.get_u32()?,
            default_view: dec.get_u8()?,
            msgnum_pic: dec.get_i64()?,
        })
    }

    pub fn is_mailbox(&self) -> bool {
        self.flags & QR_MAILBOX != 0
    }

    pub fn is_system(&self) -> bool {
        self.flags2 & QR2_SYSTEM != 0
    }
}

/// Room lookup key: the name lowercased, truncated to the name limit.
pub fn room_key(name: &str) -> String {
    name.chars()
        .take(ROOMNAMELEN)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Mailbox rooms are owned: a ten-digit user number, a dot, the room
/// suffix.
pub fn mailbox_name(usernum: i64, suffix: &str) -> String {
    format!("{usernum:010}.{suffix}")
}

pub fn mailbox_owner(name: &str) -> Option<i64> {
    let (prefix, _) = name.split_at_checked(10)?;
    if name.as_bytes().get(10) == Some(&b'.') && prefix.bytes().all(|b| b.is_ascii_digit()) {
        prefix.parse().ok()
    } else {
        None
    }
}

/// Room creation type, mirroring the wire-level `CRE8` argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomType {
    Public = 0,
    GuessName = 1,
    Passworded = 2,
    InvitationOnly = 3,
    Personal = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameRoomResult {
    Ok,
    NotFound,
    AlreadyExists,
    NonEditable,
    InvalidFloor,
    AccessDenied,
}

pub trait RoomDir: Sync + Send {
    fn get_room(&self, name: &str) -> impl Future<Output = trc::Result<Option<RoomRecord>>> + Send;

    fn put_room(&self, room: &RoomRecord) -> impl Future<Output = trc::Result<()>> + Send;

    /// Create a room only if it does not already exist; returns false when
    /// it does (which most callers treat as success).
    fn create_room(
        &self,
        name: &str,
        room_type: RoomType,
        password: &str,
        floor: u8,
        default_view: u8,
    ) -> impl Future<Output = trc::Result<bool>> + Send;

    fn delete_room(&self, name: &str) -> impl Future<Output = trc::Result<bool>> + Send;

    fn rename_room(
        &self,
        old_name: &str,
        new_name: &str,
        floor: Option<u8>,
    ) -> impl Future<Output = trc::Result<RenameRoomResult>> + Send;

    fn each_room(&self) -> impl Future<Output = trc::Result<Vec<RoomRecord>>> + Send;
}

impl RoomDir for Server {
    async fn get_room(&self, name: &str) -> trc::Result<Option<RoomRecord>> {
        let key = room_key(name);
        match self.store().get(Table::Rooms, key.as_bytes()).await? {
            Some(raw) => RoomRecord::decode(&raw).map(Some),
            None => Ok(None),
        }
    }

    async fn put_room(&self, room: &RoomRecord) -> trc::Result<()> {
        let key = room_key(&room.name);
        let raw = room.encode();
        self.store()
            .transaction(move |txn| txn.put(Table::Rooms, key.as_bytes(), &raw))
            .await
    }

    async fn create_room(
        &self,
        name: &str,
        room_type: RoomType,
        password: &str,
        floor: u8,
        default_view: u8,
    ) -> trc::Result<bool> {
        if name.is_empty() || floor as usize >= MAX_FLOORS {
            return Err(trc::StoreEvent::UnexpectedError
                .details("invalid room name or floor"));
        }
        if self.get_room(name).await?.is_some() {
            return Ok(false);
        }

        let mut flags = QR_INUSE;
        match room_type {
            RoomType::Public => {}
            RoomType::GuessName => flags |= QR_PRIVATE | QR_GUESSNAME,
            RoomType::Passworded => flags |= QR_PRIVATE | QR_PASSWORDED,
            RoomType::InvitationOnly => flags |= QR_PRIVATE,
            RoomType::Personal => flags |= QR_MAILBOX,
        }

        let number = self.config().next_i64(KEY_HIGHEST_ROOMNUM).await?;
        let room = RoomRecord {
            name: name.to_string(),
            password: password.to_string(),
            flags,
            floor,
            number,
            generation: 0,
            mtime: store::now(),
            default_view,
            msgnum_info: -1,
            msgnum_pic: -1,
            ..Default::default()
        };
        self.put_room(&room).await?;

        // Every non-mailbox room counts toward exactly one floor.
        if !room.is_mailbox() {
            self.adjust_floor_ref_count(floor, 1).await?;
        }
        Ok(true)
    }

    async fn delete_room(&self, name: &str) -> trc::Result<bool> {
        let Some(room) = self.get_room(name).await? else {
            return Ok(false);
        };
        let key = room_key(name);
        self.store()
            .transaction(move |txn| txn.delete(Table::Rooms, key.as_bytes()))
            .await?;
        if !room.is_mailbox() {
            self.adjust_floor_ref_count(room.floor, -1).await?;
        }
        // Forget the netconfig blob along with the room.
        let _ = self
            .config()
            .delete(&netconfig::netconfig_key(room.number))
            .await;
        Ok(true)
    }

    /// All-or-nothing rename, optionally moving floors in the same
    /// operation.
    async fn rename_room(
        &self,
        old_name: &str,
        new_name: &str,
        floor: Option<u8>,
    ) -> trc::Result<RenameRoomResult> {
        if let Some(floor) = floor {
            if floor as usize >= MAX_FLOORS {
                return Ok(RenameRoomResult::InvalidFloor);
            }
        }
        let Some(mut room) = self.get_room(old_name).await? else {
            return Ok(RenameRoomResult::NotFound);
        };
        if room.is_system()
            || common::BASEROOM.eq_ignore_ascii_case(&room.name)
            || common::AIDEROOM.eq_ignore_ascii_case(&room.name)
        {
            return Ok(RenameRoomResult::NonEditable);
        }
        let old_key = room_key(old_name);
        let new_key = room_key(new_name);
        if new_key != old_key && self.get_room(new_name).await?.is_some() {
            return Ok(RenameRoomResult::AlreadyExists);
        }

        let old_floor = room.floor;
        room.name = new_name.to_string();
        if let Some(floor) = floor {
            room.floor = floor;
        }
        let raw = room.encode();
        let moved_key = new_key != old_key;
        self.store()
            .transaction(move |txn| {
                if moved_key {
                    txn.delete(Table::Rooms, old_key.as_bytes())?;
                }
                txn.put(Table::Rooms, new_key.as_bytes(), &raw)?;
                Ok(())
            })
            .await?;

        if !room.is_mailbox() && room.floor != old_floor {
            self.adjust_floor_ref_count(old_floor, -1).await?;
            self.adjust_floor_ref_count(room.floor, 1).await?;
        }
        Ok(RenameRoomResult::Ok)
    }

    async fn each_room(&self) -> trc::Result<Vec<RoomRecord>> {
        let mut rooms = Vec::new();
        for (_, raw) in self.store().scan(ScanParams::new(Table::Rooms)).await? {
            rooms.push(RoomRecord::decode(&raw)?);
        }
        Ok(rooms)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FloorRecord {
    pub flags: u16,
    pub name: String,
    pub ref_count: i32,
    pub expire_mode: i32,
    pub expire_value: i32,
}

pub const F_INUSE: u16 = 1;

impl FloorRecord {
    pub fn encode(&self) -> Vec<u8> {
        Encoder::new(64)
            .put_u16(self.flags)
            .put_str(&self.name)
            .put_i32(self.ref_count)
            .put_i32(self.expire_mode)
            .put_i32(self.expire_value)
            .finalize()
    }

    pub fn decode(raw: &[u8]) -> trc::Result<Self> {
        let mut dec = Decoder::new(raw);
        Ok(FloorRecord {
            flags: dec.get_u16()?,
            name: dec.get_str()?,
            ref_count: dec.get_i32()?,
            expire_mode: dec.get_i32()?,
            expire_value: dec.get_i32()?,
        })
    }
}

fn floor_key(floor: u8) -> [u8; 4] {
    (floor as i32).to_be_bytes()
}

pub trait FloorDir: Sync + Send {
    fn get_floor(&self, floor: u8) -> impl Future<Output = trc::Result<FloorRecord>> + Send;

    fn put_floor(
        &self,
        floor: u8,
        record: &FloorRecord,
    ) -> impl Future<Output = trc::Result<()>> + Send;

    fn adjust_floor_ref_count(
        &self,
        floor: u8,
        delta: i32,
    ) -> impl Future<Output = trc::Result<()>> + Send;

    /// Rebuild every floor's reference count from the room table. Run at
    /// startup; the counts are derived data.
    fn check_ref_counts(&self) -> impl Future<Output = trc::Result<()>> + Send;
}

impl FloorDir for Server {
    async fn get_floor(&self, floor: u8) -> trc::Result<FloorRecord> {
        match self.store().get(Table::FloorTab, &floor_key(floor)).await? {
            Some(raw) => FloorRecord::decode(&raw),
            None => Ok(FloorRecord::default()),
        }
    }

    async fn put_floor(&self, floor: u8, record: &FloorRecord) -> trc::Result<()> {
        let raw = record.encode();
        let key = floor_key(floor);
        self.store()
            .transaction(move |txn| txn.put(Table::FloorTab, &key, &raw))
            .await
    }

    async fn adjust_floor_ref_count(&self, floor: u8, delta: i32) -> trc::Result<()> {
        let mut record = self.get_floor(floor).await?;
        record.ref_count = (record.ref_count + delta).max(0);
        if record.ref_count > 0 {
            record.flags |= F_INUSE;
        }
        self.put_floor(floor, &record).await
    }

    async fn check_ref_counts(&self) -> trc::Result<()> {
        let mut counts = [0i32; MAX_FLOORS];
        for room in self.each_room().await? {
            if !room.is_mailbox() && (room.floor as usize) < MAX_FLOORS {
                counts[room.floor as usize] += 1;
            }
        }
        for (floor, count) in counts.iter().enumerate() {
            let mut record = self.get_floor(floor as u8).await?;
            record.ref_count = *count;
            if *count > 0 {
                record.flags |= F_INUSE;
            } else {
                record.flags &= !F_INUSE;
            }
            self.put_floor(floor as u8, &record).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_record_round_trip() {
        let room = RoomRecord {
            name: "Monkey Island".into(),
            flags: QR_INUSE | QR_PERMANENT,
            floor: 2,
            number: 17,
            generation: 3,
            highest: 999,
            default_view: VIEW_BBS,
            msgnum_info: -1,
            msgnum_pic: -1,
            ..Default::default()
        };
        assert_eq!(RoomRecord::decode(&room.encode()).unwrap(), room);
    }

    #[test]
    fn room_key_is_case_insensitive() {
        assert_eq!(room_key("Lobby"), room_key("LOBBY"));
        assert_eq!(room_key("Monkey Island"), "monkey island");
    }

    #[test]
    fn mailbox_naming() {
        let name = mailbox_name(42, "Mail");
        assert_eq!(name, "0000000042.Mail");
        assert_eq!(mailbox_owner(&name), Some(42));
        assert_eq!(mailbox_owner("Lobby"), None);
        assert_eq!(mailbox_owner("123456789x.Mail"), None);
        assert_eq!(mailbox_owner("0000000001"), None);
    }
}
