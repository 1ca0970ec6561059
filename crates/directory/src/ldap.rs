/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use common::{Server, auth::AuthMode};
use ldap3::{LdapConnAsync, Scope, SearchEntry};
use trc::EventExt;
use users::{NO_UID, UserDir, UserRecord};

/// LDAP-backed directory, in either RFC 2307 (POSIX) or Active Directory
/// flavor. Authentication binds as the user's DN; synchronization pulls
/// directory attributes into local user records.
pub struct LdapDirectory {
    url: String,
    base_dn: String,
    bind_dn: String,
    bind_pw: String,
    mode: AuthMode,
}

#[derive(Debug, Clone)]
pub struct LdapUserInfo {
    pub dn: String,
    pub display_name: String,
    pub email: Option<String>,
    pub uid_number: Option<u32>,
}

fn into_error(err: ldap3::LdapError) -> trc::Error {
    trc::AuthEvent::LdapError.reason(err)
}

/// RFC 4515 escaping for values interpolated into search filters.
fn escape_filter(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\\' => out.push_str("\\5c"),
            '\0' => out.push_str("\\00"),
            c => out.push(c),
        }
    }
    out
}

impl LdapDirectory {
    pub fn from_config(server: &Server, mode: AuthMode) -> trc::Result<Self> {
        let host = server.config().get_str("c_ldap_host").ok_or_else(|| {
            trc::ConfigEvent::MissingSetting.ctx(trc::Key::Key, "c_ldap_host")
        })?;
        let port = server.config().int_or("c_ldap_port", 389);
        let scheme = if port == 636 { "ldaps" } else { "ldap" };
        Ok(LdapDirectory {
            url: format!("{scheme}://{host}:{port}"),
            base_dn: server.config().str_or("c_ldap_base_dn", ""),
            bind_dn: server.config().str_or("c_ldap_bind_dn", ""),
            bind_pw: server.config().str_or("c_ldap_bind_pw", ""),
            mode,
        })
    }

    fn name_filter(&self, name: &str) -> String {
        let name = escape_filter(name);
        match self.mode {
            AuthMode::LdapAd => {
                format!("(&(objectclass=user)(sAMAccountName={name}))")
            }
            _ => format!(
                "(&(objectclass=posixAccount)(|(uid={name})(cn={name})))"
            ),
        }
    }

    fn all_users_filter(&self) -> &'static str {
        match self.mode {
            AuthMode::LdapAd => "(objectclass=user)",
            _ => "(objectclass=posixAccount)",
        }
    }

    fn attrs(&self) -> Vec<&'static str> {
        match self.mode {
            AuthMode::LdapAd => vec!["displayName", "sAMAccountName", "mail"],
            _ => vec!["displayName", "cn", "uid", "uidNumber", "mail"],
        }
    }

    async fn search(&self, filter: &str) -> trc::Result<Vec<LdapUserInfo>> {
        let (conn, mut ldap) = LdapConnAsync::new(&self.url).await.map_err(into_error)?;
        ldap3::drive!(conn);

        if !self.bind_dn.is_empty() {
            ldap.simple_bind(&self.bind_dn, &self.bind_pw)
                .await
                .map_err(into_error)?
                .success()
                .map_err(into_error)?;
        }

        let (entries, _) = ldap
            .search(&self.base_dn, Scope::Subtree, filter, self.attrs())
            .await
            .map_err(into_error)?
            .success()
            .map_err(into_error)?;

        let mut results = Vec::with_capacity(entries.len());
        for entry in entries {
            let entry = SearchEntry::construct(entry);
            let attr = |name: &str| {
                entry
                    .attrs
                    .get(name)
                    .and_then(|v| v.first())
                    .map(|v| v.to_string())
            };
            let display_name = attr("displayName")
                .or_else(|| attr("cn"))
                .or_else(|| attr("uid"))
                .or_else(|| attr("sAMAccountName"));
            let Some(display_name) = display_name else {
                continue;
            };
            results.push(LdapUserInfo {
                dn: entry.dn,
                display_name,
                email: attr("mail"),
                uid_number: attr("uidNumber").and_then(|v| v.parse().ok()),
            });
        }
        let _ = ldap.unbind().await;
        Ok(results)
    }

    pub async fn lookup(&self, name: &str) -> trc::Result<Option<LdapUserInfo>> {
        let mut results = self.search(&self.name_filter(name)).await?;
        Ok(results.pop())
    }

    /// Bind as the user's own DN with the supplied password. `None` means
    /// the directory rejected the credentials.
    pub async fn authenticate(
        &self,
        name: &str,
        password: &str,
    ) -> trc::Result<Option<LdapUserInfo>> {
        let Some(info) = self.lookup(name).await? else {
            return Ok(None);
        };
        let (conn, mut ldap) = LdapConnAsync::new(&self.url).await.map_err(into_error)?;
        ldap3::drive!(conn);
        let bound = ldap
            .simple_bind(&info.dn, password)
            .await
            .map_err(into_error)?
            .success()
            .is_ok();
        let _ = ldap.unbind().await;
        Ok(bound.then_some(info))
    }

    /// Copy directory attributes onto an existing local record. Addresses
    /// are overwritten from the directory, which is authoritative in LDAP
    /// modes.
    pub async fn apply_to_user(&self, server: &Server, info: &LdapUserInfo) -> trc::Result<()> {
        if let Some(mut user) = server.get_user(&info.display_name).await? {
            let mut dirty = false;
            if let Some(email) = &info.email {
                if user.primary_email() != Some(email.as_str()) {
                    user.emailaddrs = email.clone();
                    dirty = true;
                }
            }
            if let Some(uid) = info.uid_number {
                if user.uid != uid {
                    user.uid = uid;
                    dirty = true;
                }
            }
            if dirty {
                server.put_user(&user).await?;
            }
        }
        Ok(())
    }

    /// Create the local half of a directory user on first sight.
    pub async fn provision_user(
        &self,
        server: &Server,
        info: &LdapUserInfo,
    ) -> trc::Result<UserRecord> {
        let axlevel = server.config().int_or("c_initax", 4).clamp(1, 6) as u8;
        let user = server
            .create_user(
                &info.display_name,
                axlevel,
                info.uid_number.unwrap_or(NO_UID),
            )
            .await?;
        self.apply_to_user(server, info).await?;
        server
            .run_user_hooks(
                &user.fullname,
                user.usernum,
                common::registry::UserHookEvent::NewUser,
            )
            .await;
        trc::event!(
            Auth(trc::AuthEvent::LdapSync),
            AccountName = info.display_name.clone(),
            Details = "provisioned from directory",
        );
        server.get_user(&info.display_name).await.map(|u| u.unwrap_or(user))
    }

    /// Walk the whole directory, provisioning unknown users and refreshing
    /// known ones. Returns how many records were touched.
    pub async fn sync_all(&self, server: &Server) -> trc::Result<usize> {
        let mut synced = 0;
        for info in self.search(self.all_users_filter()).await? {
            if server.get_user(&info.display_name).await?.is_none() {
                self.provision_user(server, &info).await?;
            } else {
                self.apply_to_user(server, &info).await?;
            }
            synced += 1;
        }
        trc::event!(Auth(trc::AuthEvent::LdapSync), Total = synced);
        Ok(synced)
    }
}

#[cfg(test)]
mod tests {
    use super::escape_filter;

    #[test]
    fn filter_escaping() {
        assert_eq!(escape_filter("alice"), "alice");
        assert_eq!(escape_filter("a*b(c)d\\e"), "a\\2ab\\28c\\29d\\5ce");
    }
}
