/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use crate::dirs::CitadelDirs;
use ahash::AHashMap;
use arc_swap::ArcSwap;
use std::sync::Arc;
use store::{ScanParams, Store, Table, codec::Decoder};
use trc::EventExt;

/// The closed set of configuration names the server acts on. Peers may
/// write keys outside this list; they are stored and served back verbatim.
/// Entries pair the name with the default applied when the key is absent
/// at boot (`None` means "no default; the subsystem copes").
pub const KNOWN_KEYS: &[(&str, Option<&str>)] = &[
    ("c_nodename", None),
    ("c_fqdn", None),
    ("c_humannode", Some("Citadel Server")),
    ("c_creataide", Some("1")),
    ("c_sleeping", Some("900")),
    ("c_initax", Some("4")),
    ("c_regiscall", Some("0")),
    ("c_twitdetect", Some("0")),
    ("c_twitroom", None),
    ("c_moreprompt", Some("<more>")),
    ("c_restrict", Some("0")),
    ("c_site_location", None),
    ("c_sysadm", Some("admin")),
    ("c_maxsessions", Some("0")),
    ("c_password", None),
    ("c_userpurge", Some("120")),
    ("c_roompurge", Some("30")),
    ("c_logpages", None),
    ("c_createax", Some("3")),
    ("c_maxmsglen", Some("10485760")),
    ("c_min_workers", Some("5")),
    ("c_max_workers", Some("256")),
    ("c_pop3_port", Some("110")),
    ("c_smtp_port", Some("25")),
    ("c_rfc822_strict_from", Some("0")),
    ("c_aide_zap", Some("0")),
    ("c_imap_port", Some("143")),
    ("c_net_freq", Some("3600")),
    ("c_disable_newu", Some("0")),
    ("c_enable_fulltext", Some("0")),
    ("c_baseroom", Some(crate::BASEROOM)),
    ("c_aideroom", Some(crate::AIDEROOM)),
    ("c_purge_hour", Some("4")),
    ("c_mbxep_mode", Some("0")),
    ("c_mbxep_value", Some("0")),
    ("c_ep_mode", Some("0")),
    ("c_ep_value", Some("0")),
    ("c_ldap_host", None),
    ("c_ldap_port", Some("389")),
    ("c_ldap_base_dn", None),
    ("c_ldap_bind_dn", None),
    ("c_ldap_bind_pw", None),
    ("c_ip_addr", Some("*")),
    ("c_msa_port", Some("587")),
    ("c_imaps_port", Some("993")),
    ("c_pop3s_port", Some("995")),
    ("c_smtps_port", Some("465")),
    ("c_auto_cull", Some("1")),
    ("c_allow_spoofing", Some("0")),
    ("c_journal_email", Some("0")),
    ("c_journal_pubmsgs", Some("0")),
    ("c_journal_dest", None),
    ("c_default_cal_zone", Some("UTC")),
    ("c_pftcpdict_port", Some("-1")),
    ("c_managesieve_port", Some("4190")),
    ("c_auth_mode", Some("0")),
    ("c_rbl_at_greeting", Some("0")),
    ("c_master_user", None),
    ("c_master_pass", None),
    ("c_pager_program", None),
    ("c_imap_keep_expanded", Some("0")),
    ("c_xmpp_c2s_port", Some("5222")),
    ("c_xmpp_s2s_port", Some("5269")),
    ("c_pop3_fetch", Some("3600")),
    ("c_pop3_fastest", Some("300")),
    ("c_spam_flag_only", Some("0")),
    ("c_guest_logins", Some("0")),
    ("c_port_number", Some("504")),
    ("c_nntp_port", Some("119")),
    ("c_nntps_port", Some("563")),
    ("c_smtpclient_disable_starttls", Some("0")),
];

// Monotonic counters live in the config table but are only touched inside
// write transactions, never through the cache.
pub const KEY_HIGHEST_MSGNUM: &str = "c_highest_msgnum";
pub const KEY_HIGHEST_ROOMNUM: &str = "c_highest_roomnum";
pub const KEY_HIGHEST_USERNUM: &str = "c_highest_usernum";

/// Typed accessors over the `Config` table with a process-wide cache.
/// Reads are lock-free; writes go to the store first and then refresh the
/// snapshot.
pub struct ConfigCache {
    store: Store,
    values: ArcSwap<AHashMap<String, String>>,
}

impl ConfigCache {
    pub async fn load(store: Store) -> trc::Result<Self> {
        let mut values = AHashMap::new();
        for (key, value) in store.scan(ScanParams::new(Table::Config)).await? {
            if let (Ok(key), Ok(value)) = (String::from_utf8(key), String::from_utf8(value)) {
                values.insert(key, value);
            }
        }
        Ok(ConfigCache {
            store,
            values: ArcSwap::from_pointee(values),
        })
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.values.load().get(key).cloned()
    }

    pub fn str_or(&self, key: &str, default: &str) -> String {
        self.get_str(key).unwrap_or_else(|| default.to_string())
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.values.load().get(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn int_or(&self, key: &str, default: i64) -> i64 {
        self.get_int(key).unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.int_or(key, 0) != 0
    }

    pub async fn put_str(&self, key: &str, value: &str) -> trc::Result<()> {
        self.store
            .put(Table::Config, key.as_bytes(), value.as_bytes())
            .await?;
        let mut values = self.values.load().as_ref().clone();
        values.insert(key.to_string(), value.to_string());
        self.values.store(Arc::new(values));
        Ok(())
    }

    pub async fn put_int(&self, key: &str, value: i64) -> trc::Result<()> {
        self.put_str(key, &value.to_string()).await
    }

    pub async fn delete(&self, key: &str) -> trc::Result<()> {
        self.store.delete(Table::Config, key.as_bytes()).await?;
        let mut values = self.values.load().as_ref().clone();
        values.remove(key);
        self.values.store(Arc::new(values));
        Ok(())
    }

    /// Allocate the next value of a persistent counter. Never recycles and
    /// never goes backwards; runs in its own write transaction.
    pub async fn next_i64(&self, key: &'static str) -> trc::Result<i64> {
        self.store
            .transaction(move |txn| {
                let current = txn
                    .get(Table::Config, key.as_bytes())?
                    .and_then(|v| String::from_utf8(v).ok())
                    .and_then(|v| v.trim().parse::<i64>().ok())
                    .unwrap_or(0);
                let next = current + 1;
                txn.put(Table::Config, key.as_bytes(), next.to_string().as_bytes())?;
                Ok(next)
            })
            .await
    }

    /// Boot-time validation: fill in every missing required value with its
    /// conservative default.
    pub async fn validate_defaults(&self) -> trc::Result<()> {
        let hostname = hostname();
        for (key, default) in KNOWN_KEYS {
            if self.get_str(key).is_none() {
                let value = match *key {
                    "c_nodename" => hostname
                        .split('.')
                        .next()
                        .unwrap_or("citadel")
                        .to_string(),
                    "c_fqdn" => hostname.clone(),
                    _ => match default {
                        Some(value) => value.to_string(),
                        None => continue,
                    },
                };
                trc::event!(
                    Config(trc::ConfigEvent::DefaultApplied),
                    Key = *key,
                    Value = value.clone(),
                );
                self.put_str(key, &value).await?;
            }
        }
        Ok(())
    }

    /// One-shot conversion of the pre-versioned binary control record into
    /// typed entries. The legacy file is renamed once absorbed so this is
    /// idempotent across restarts.
    pub async fn migrate_legacy_control_record(&self, dirs: &CitadelDirs) -> trc::Result<()> {
        let path = dirs.legacy_control_file();
        let Ok(raw) = std::fs::read(&path) else {
            return Ok(());
        };
        if raw.len() >= 40 {
            let mut dec = Decoder::new(&raw);
            let highest_msg = dec.get_i64()?;
            let _flags = dec.get_u64()?;
            let next_user = dec.get_i64()?;
            let next_room = dec.get_i64()?;
            self.put_int(KEY_HIGHEST_MSGNUM, highest_msg.max(0)).await?;
            self.put_int(KEY_HIGHEST_USERNUM, next_user.max(0)).await?;
            self.put_int(KEY_HIGHEST_ROOMNUM, next_room.max(0)).await?;
            trc::event!(
                Config(trc::ConfigEvent::MigratedControlRecord),
                Path = path.to_string_lossy().into_owned(),
                MsgNum = highest_msg,
            );
        }
        std::fs::rename(&path, path.with_extension("migrated")).map_err(|err| {
            trc::ConfigEvent::BuildError
                .caused_by(trc::location!())
                .reason(err)
        })?;
        Ok(())
    }
}

pub fn hostname() -> String {
    let mut buf = [0u8; 256];
    let result = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if result == 0 {
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        String::from_utf8_lossy(&buf[..end]).into_owned()
    } else {
        "localhost".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::KNOWN_KEYS;

    #[test]
    fn known_key_set_is_closed_and_unique() {
        let mut seen = std::collections::HashSet::new();
        for (key, _) in KNOWN_KEYS {
            assert!(key.starts_with("c_"), "{key} must be namespaced");
            assert!(seen.insert(*key), "{key} duplicated");
        }
        assert_eq!(KNOWN_KEYS.len(), 71);
    }
}
