/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

pub mod login;

use common::{Server, USERNAME_SIZE};
use store::{
    ScanParams, Table,
    codec::{Decoder, Encoder},
};
use trc::EventExt;

/// Bumped when the record layout grows a field. Stamped onto every record
/// by `put_user`.
pub const USER_RECORD_VERSION: u32 = 1;

/// "No associated host account."
pub const NO_UID: u32 = u32::MAX;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserRecord {
    pub version: u32,
    pub uid: u32,
    pub password: String,
    pub flags: u32,
    pub timescalled: i64,
    pub posted: i64,
    pub axlevel: u8,
    pub usernum: i64,
    pub lastcall: u64,
    pub purge_days: i32,
    pub fullname: String,
    pub msgnum_bio: i64,
    pub msgnum_pic: i64,
    pub emailaddrs: String,
    pub msgnum_inboxrules: i64,
    pub lastproc_inboxrules: i64,
}

impl UserRecord {
    pub fn encode(&self) -> Vec<u8> {
        Encoder::new(128)
            .put_u32(self.version)
            .put_u32(self.uid)
            .put_str(&self.password)
            .put_u32(self.flags)
            .put_i64(self.timescalled)
            .put_i64(self.posted)
            .put_u8(self.axlevel)
            .put_i64(self.usernum)
            .put_u64(self.lastcall)
            .put_i32(self.purge_days)
            .put_str(&self.fullname)
            .put_i64(self.msgnum_bio)
            .put_i64(self.msgnum_pic)
            .put_str(&self.emailaddrs)
            .put_i64(self.msgnum_inboxrules)
            .put_i64(self.lastproc_inboxrules)
            .finalize()
    }

    pub fn decode(raw: &[u8]) -> trc::Result<Self> {
        let mut dec = Decoder::new(raw);
        Ok(UserRecord {
            version: dec.get_u32()?,
            uid: dec.get_u32()?,
            password: dec.get_str()?,
            flags: dec.get_u32()?,
            timescalled: dec.get_i64()?,
            posted: dec.get_i64()?,
            axlevel: dec.get_u8()?,
            usernum: dec.get_i64()?,
            lastcall: dec.get_u64()?,
            purge_days: dec.get_i32()?,
            fullname: dec.get_str()?,
            msgnum_bio: dec.get_i64()?,
            msgnum_pic: dec.get_i64()?,
            emailaddrs: dec.get_str()?,
            msgnum_inboxrules: dec.get_i64()?,
            lastproc_inboxrules: dec.get_i64()?,
        })
    }

    pub fn primary_email(&self) -> Option<&str> {
        self.emailaddrs.split('|').next().filter(|s| !s.is_empty())
    }
}

/// Convert a display name into its database key: lowercased, all
/// non-alphanumerics removed, truncated. Applied on every write and every
/// lookup so the two can never diverge.
pub fn user_key(username: &str) -> String {
    username
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .take(USERNAME_SIZE - 1)
        .collect()
}

/// True when two display names collide on the same database key.
pub fn same_user(a: &str, b: &str) -> bool {
    user_key(a) == user_key(b)
}

fn extauth_key(uid: u32) -> Vec<u8> {
    format!("uid:{uid}").into_bytes()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameUserResult {
    Ok,
    NotFound,
    AlreadyExists,
    NotAllowed,
    LoggedIn,
}

pub trait UserDir: Sync + Send {
    fn get_user(&self, name: &str) -> impl Future<Output = trc::Result<Option<UserRecord>>> + Send;

    fn get_user_by_number(
        &self,
        usernum: i64,
    ) -> impl Future<Output = trc::Result<Option<UserRecord>>> + Send;

    fn put_user(&self, user: &UserRecord) -> impl Future<Output = trc::Result<()>> + Send;

    fn create_user(
        &self,
        name: &str,
        axlevel: u8,
        uid: u32,
    ) -> impl Future<Output = trc::Result<UserRecord>> + Send;

    fn rename_user(
        &self,
        old_name: &str,
        new_name: &str,
    ) -> impl Future<Output = trc::Result<RenameUserResult>> + Send;

    fn delete_user_records(
        &self,
        user: &UserRecord,
    ) -> impl Future<Output = trc::Result<()>> + Send;

    fn each_user_name(&self) -> impl Future<Output = trc::Result<Vec<String>>> + Send;
}

impl UserDir for Server {
    async fn get_user(&self, name: &str) -> trc::Result<Option<UserRecord>> {
        let key = user_key(name);
        if key.is_empty() {
            return Ok(None);
        }
        match self.store().get(Table::Users, key.as_bytes()).await? {
            Some(raw) => UserRecord::decode(&raw).map(Some),
            None => Ok(None),
        }
    }

    async fn get_user_by_number(&self, usernum: i64) -> trc::Result<Option<UserRecord>> {
        let name = self
            .store()
            .get(Table::UsersByNumber, &usernum.to_be_bytes())
            .await?;
        match name {
            Some(name) => {
                let name = String::from_utf8(name).map_err(|_| {
                    trc::StoreEvent::DataCorruption
                        .caused_by(trc::location!())
                        .details("reverse user index holds invalid utf-8")
                })?;
                self.get_user(&name).await
            }
            None => Ok(None),
        }
    }

    /// Write the forward record and both secondary indices in one
    /// transaction. Every live user keeps a reverse index entry.
    async fn put_user(&self, user: &UserRecord) -> trc::Result<()> {
        let mut user = user.clone();
        user.version = USER_RECORD_VERSION;
        let key = user_key(&user.fullname);
        if key.is_empty() {
            return Err(trc::StoreEvent::UnexpectedError
                .details("refusing to store user with empty key"));
        }
        let raw = user.encode();
        let fullname = user.fullname.clone();
        let usernum = user.usernum;
        let uid = user.uid;
        self.store()
            .transaction(move |txn| {
                txn.put(Table::Users, key.as_bytes(), &raw)?;
                txn.put(
                    Table::UsersByNumber,
                    &usernum.to_be_bytes(),
                    fullname.as_bytes(),
                )?;
                if uid != NO_UID {
                    txn.put(Table::ExtAuth, &extauth_key(uid), &usernum.to_le_bytes())?;
                }
                Ok(())
            })
            .await
    }

    async fn create_user(&self, name: &str, axlevel: u8, uid: u32) -> trc::Result<UserRecord> {
        let usernum = self
            .config()
            .next_i64(common::config::KEY_HIGHEST_USERNUM)
            .await?;
        let user = UserRecord {
            version: USER_RECORD_VERSION,
            uid,
            axlevel,
            usernum,
            fullname: name.to_string(),
            lastcall: store::now(),
            ..Default::default()
        };
        self.put_user(&user).await?;
        Ok(user)
    }

    /// All-or-nothing rename: moves the forward record to the new key and
    /// repoints the reverse index. The system user and logged-in subjects
    /// are refused (the caller checks the session table for the latter).
    async fn rename_user(&self, old_name: &str, new_name: &str) -> trc::Result<RenameUserResult> {
        let old_key = user_key(old_name);
        let new_key = user_key(new_name);
        if new_key.is_empty() {
            return Ok(RenameUserResult::NotAllowed);
        }
        let new_name = new_name.to_string();
        self.store()
            .transaction(move |txn| {
                let Some(raw) = txn.get(Table::Users, old_key.as_bytes())? else {
                    return Ok(RenameUserResult::NotFound);
                };
                let mut user = UserRecord::decode(&raw)?;
                if user.usernum == 0 {
                    return Ok(RenameUserResult::NotAllowed);
                }
                if new_key != old_key && txn.get(Table::Users, new_key.as_bytes())?.is_some() {
                    return Ok(RenameUserResult::AlreadyExists);
                }
                user.fullname = new_name.clone();
                if new_key != old_key {
                    txn.delete(Table::Users, old_key.as_bytes())?;
                }
                txn.put(Table::Users, new_key.as_bytes(), &user.encode())?;
                txn.put(
                    Table::UsersByNumber,
                    &user.usernum.to_be_bytes(),
                    new_name.as_bytes(),
                )?;
                Ok(RenameUserResult::Ok)
            })
            .await
    }

    /// Remove the forward record and both indices. Callers run the wider
    /// purge cascade (visits, hooks) around this.
    async fn delete_user_records(&self, user: &UserRecord) -> trc::Result<()> {
        let key = user_key(&user.fullname);
        let usernum = user.usernum;
        let uid = user.uid;
        self.store()
            .transaction(move |txn| {
                txn.delete(Table::Users, key.as_bytes())?;
                txn.delete(Table::UsersByNumber, &usernum.to_be_bytes())?;
                if uid != NO_UID {
                    txn.delete(Table::ExtAuth, &extauth_key(uid))?;
                }
                Ok(())
            })
            .await
    }

    /// Phase one of the mandatory two-phase iteration: collect names with
    /// a read scan. Callers then fetch and mutate one user at a time.
    async fn each_user_name(&self) -> trc::Result<Vec<String>> {
        let mut names = Vec::new();
        for (_, raw) in self.store().scan(ScanParams::new(Table::Users)).await? {
            names.push(UserRecord::decode(&raw)?.fullname);
        }
        Ok(names)
    }
}

pub trait ExtAuthDir: Sync + Send {
    fn lookup_by_uid(&self, uid: u32) -> impl Future<Output = trc::Result<Option<i64>>> + Send;
}

impl ExtAuthDir for Server {
    async fn lookup_by_uid(&self, uid: u32) -> trc::Result<Option<i64>> {
        Ok(self
            .store()
            .get(Table::ExtAuth, &extauth_key(uid))
            .await?
            .and_then(|raw| raw.try_into().ok().map(i64::from_le_bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_key_normalization() {
        assert_eq!(user_key("Guybrush Threepwood"), "guybrushthreepwood");
        assert_eq!(user_key("O'Brien, Miles"), "obrienmiles");
        assert_eq!(user_key("   "), "");
        assert!(same_user("J. R. R. Tolkien", "jrrtolkien"));
        assert!(!same_user("alice", "bob"));
    }

    #[test]
    fn user_key_is_idempotent() {
        for name in ["Admin", "number six", "Hello, World!!!"] {
            assert_eq!(user_key(name), user_key(&user_key(name)));
        }
    }

    #[test]
    fn record_round_trip() {
        let user = UserRecord {
            version: USER_RECORD_VERSION,
            uid: NO_UID,
            password: "hunter2".into(),
            flags: common::US_INTERNET,
            timescalled: 17,
            posted: 4,
            axlevel: common::AX_AIDE,
            usernum: 42,
            lastcall: 1_700_000_000,
            purge_days: 0,
            fullname: "Elaine Marley".into(),
            msgnum_bio: -1,
            msgnum_pic: -1,
            emailaddrs: "elaine@example.com|governor@example.com".into(),
            msgnum_inboxrules: 0,
            lastproc_inboxrules: 0,
        };
        let decoded = UserRecord::decode(&user.encode()).unwrap();
        assert_eq!(decoded, user);
        assert_eq!(decoded.primary_email(), Some("elaine@example.com"));
    }
}
