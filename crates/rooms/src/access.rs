/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use crate::{
    RoomDir, RoomRecord, mailbox_name, mailbox_owner,
    msglist::MsgListDir,
    visits::{VisitDir, VisitRecord},
};
use common::{
    AX_AIDE, MAILROOM, QR_GUESSNAME, QR_MAILBOX, QR_PASSWORDED, QR_PRIVATE, QR_READONLY,
    Server, UA_ADMINALLOWED, UA_DELETEALLOWED, UA_GOTOALLOWED, UA_HASNEWMSGS, UA_KNOWN,
    UA_POSTALLOWED, UA_ZAPPED, V_ACCESS, V_FORGET, V_LOCKOUT,
};
use users::UserRecord;

/// Combine room flags, the visit record and the user's access level into
/// the effective access bits plus the view the client should render.
pub fn room_access(room: &RoomRecord, user: &UserRecord, visit: &VisitRecord) -> (u32, u8) {
    let mut retval = 0u32;
    let is_admin = user.axlevel >= AX_AIDE;
    let is_room_aide = room.roomaide != 0 && room.roomaide == user.usernum;

    if room.flags & QR_MAILBOX != 0 {
        match mailbox_owner(&room.name) {
            Some(owner) if owner == user.usernum => {
                retval |= UA_KNOWN | UA_GOTOALLOWED | UA_POSTALLOWED | UA_DELETEALLOWED;
            }
            _ if is_admin => {
                // Global access, but a mailbox never shows up as known.
                retval |= UA_GOTOALLOWED;
            }
            _ => return (0, visit.view),
        }
    } else if room.flags & QR_PRIVATE != 0 {
        if visit.flags & V_ACCESS != 0 {
            retval |= UA_KNOWN | UA_GOTOALLOWED | UA_POSTALLOWED;
        } else if room.flags & (QR_GUESSNAME | QR_PASSWORDED) != 0 {
            // Enterable by name or password, but not listed.
            retval |= UA_GOTOALLOWED | UA_POSTALLOWED;
        }
    } else {
        retval |= UA_KNOWN | UA_GOTOALLOWED | UA_POSTALLOWED;
    }

    if visit.flags & V_LOCKOUT != 0 && !is_admin {
        retval &= !(UA_KNOWN | UA_GOTOALLOWED | UA_POSTALLOWED);
    }
    if visit.flags & V_FORGET != 0 {
        retval &= !UA_KNOWN;
        retval |= UA_ZAPPED;
    }
    if room.flags & QR_READONLY != 0 && !is_admin && !is_room_aide {
        retval &= !UA_POSTALLOWED;
    }
    if is_admin || is_room_aide {
        retval |= UA_GOTOALLOWED | UA_POSTALLOWED | UA_ADMINALLOWED | UA_DELETEALLOWED;
    }
    if room.highest > visit.lastseen {
        retval |= UA_HASNEWMSGS;
    }

    (retval, visit.view)
}

/// Everything a client learns when entering a room.
#[derive(Debug, Clone, Default)]
pub struct GotoBundle {
    pub room_name: String,
    pub new_msgs: i64,
    pub total_msgs: i64,
    pub msgnum_info: i64,
    pub flags: u32,
    pub highest: i64,
    pub last_seen: i64,
    pub is_mail: bool,
    pub is_aide: bool,
    pub new_mail: i64,
    pub floor: u8,
    pub cur_view: u8,
    pub default_view: u8,
    pub is_trash: bool,
    pub flags2: u32,
    pub mtime: u64,
}

pub trait RoomGoto: Sync + Send {
    fn goto_room(
        &self,
        user: &UserRecord,
        room: &RoomRecord,
    ) -> impl Future<Output = trc::Result<GotoBundle>> + Send;
}

impl RoomGoto for Server {
    async fn goto_room(&self, user: &UserRecord, room: &RoomRecord) -> trc::Result<GotoBundle> {
        let visit = self.get_visit(room, user.usernum).await?;
        let msglist = self.get_msglist(room.number).await?;
        let total_msgs = msglist.len() as i64;
        let new_msgs = msglist.iter().filter(|m| **m > visit.lastseen).count() as i64;

        // Unread count in the user's inbox, reported on every goto.
        let new_mail = match self.get_room(&mailbox_name(user.usernum, MAILROOM)).await? {
            Some(mail_room) => {
                let mail_visit = self.get_visit(&mail_room, user.usernum).await?;
                self.get_msglist(mail_room.number)
                    .await?
                    .iter()
                    .filter(|m| **m > mail_visit.lastseen)
                    .count() as i64
            }
            None => 0,
        };

        // Make sure the visit row exists so later seen/view updates have a
        // base to modify.
        self.put_visit(&visit).await?;

        Ok(GotoBundle {
            room_name: room.name.clone(),
            new_msgs,
            total_msgs,
            msgnum_info: room.msgnum_info,
            flags: room.flags,
            highest: room.highest,
            last_seen: visit.lastseen,
            is_mail: room.is_mailbox(),
            is_aide: user.axlevel >= AX_AIDE
                || (room.roomaide != 0 && room.roomaide == user.usernum),
            new_mail,
            floor: room.floor,
            cur_view: visit.view,
            default_view: room.default_view,
            is_trash: room.name.ends_with(".Trash"),
            flags2: room.flags2,
            mtime: room.mtime,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(usernum: i64, axlevel: u8) -> UserRecord {
        UserRecord {
            usernum,
            axlevel,
            fullname: format!("user{usernum}"),
            ..Default::default()
        }
    }

    fn visit(room: &RoomRecord, usernum: i64, flags: u32) -> VisitRecord {
        VisitRecord {
            roomnum: room.number,
            room_gen: room.generation,
            usernum,
            flags,
            view: room.default_view,
            ..Default::default()
        }
    }

    #[test]
    fn public_room_is_open() {
        let room = RoomRecord {
            name: "Lobby".into(),
            number: 1,
            ..Default::default()
        };
        let u = user(5, common::AX_LOCAL);
        let (bits, _) = room_access(&room, &u, &visit(&room, 5, 0));
        assert!(bits & UA_GOTOALLOWED != 0);
        assert!(bits & UA_KNOWN != 0);
        assert!(bits & UA_ADMINALLOWED == 0);
    }

    #[test]
    fn mailbox_is_owner_only() {
        let room = RoomRecord {
            name: mailbox_name(7, MAILROOM),
            number: 2,
            flags: QR_MAILBOX,
            ..Default::default()
        };
        let owner = user(7, common::AX_LOCAL);
        let stranger = user(8, common::AX_LOCAL);
        let admin = user(9, AX_AIDE);

        let (bits, _) = room_access(&room, &owner, &visit(&room, 7, 0));
        assert!(bits & UA_GOTOALLOWED != 0);
        let (bits, _) = room_access(&room, &stranger, &visit(&room, 8, 0));
        assert_eq!(bits, 0);
        let (bits, _) = room_access(&room, &admin, &visit(&room, 9, 0));
        assert!(bits & UA_GOTOALLOWED != 0);
        assert!(bits & UA_KNOWN == 0);
    }

    #[test]
    fn invitation_only_needs_a_grant() {
        let room = RoomRecord {
            name: "Secret".into(),
            number: 3,
            flags: QR_PRIVATE,
            ..Default::default()
        };
        let u = user(5, common::AX_LOCAL);
        let (bits, _) = room_access(&room, &u, &visit(&room, 5, 0));
        assert_eq!(bits & UA_GOTOALLOWED, 0);
        let (bits, _) = room_access(&room, &u, &visit(&room, 5, V_ACCESS));
        assert!(bits & UA_GOTOALLOWED != 0);
    }

    #[test]
    fn forgotten_room_reports_zapped() {
        let room = RoomRecord {
            name: "Old Haunt".into(),
            number: 4,
            ..Default::default()
        };
        let u = user(5, common::AX_LOCAL);
        let (bits, _) = room_access(&room, &u, &visit(&room, 5, V_FORGET));
        assert!(bits & UA_ZAPPED != 0);
        assert!(bits & UA_KNOWN == 0);
    }

    #[test]
    fn new_messages_flagged() {
        let room = RoomRecord {
            name: "Busy".into(),
            number: 5,
            highest: 100,
            ..Default::default()
        };
        let u = user(5, common::AX_LOCAL);
        let mut v = visit(&room, 5, 0);
        v.lastseen = 50;
        let (bits, _) = room_access(&room, &u, &v);
        assert!(bits & UA_HASNEWMSGS != 0);
        v.lastseen = 100;
        let (bits, _) = room_access(&room, &u, &v);
        assert!(bits & UA_HASNEWMSGS == 0);
    }
}
