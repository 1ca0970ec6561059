/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

pub mod chkpwd;
pub mod ldap;

use chkpwd::ChkpwdClient;
use common::{Server, auth::AuthMode, auth::PassResult};
use ldap::LdapDirectory;
use trc::EventExt;
use users::{NO_UID, UserDir, UserRecord};

/// The process-wide authentication backend, built once at startup from
/// `c_auth_mode` and handed to the protocol modules.
pub struct AuthService {
    pub mode: AuthMode,
    chkpwd: Option<ChkpwdClient>,
    ldap: Option<LdapDirectory>,
}

impl AuthService {
    pub fn build(server: &Server) -> trc::Result<AuthService> {
        let mode = AuthMode::from_config(server.config().int_or("c_auth_mode", 0))
            .ok_or_else(|| {
                trc::ConfigEvent::InvalidValue
                    .ctx(trc::Key::Key, "c_auth_mode")
                    .details("unsupported authentication mode")
            })?;

        let chkpwd = if mode == AuthMode::Host {
            Some(ChkpwdClient::new(chkpwd::locate_helper()?))
        } else {
            None
        };

        let ldap = if mode.is_ldap() {
            Some(LdapDirectory::from_config(server, mode)?)
        } else {
            None
        };

        Ok(AuthService { mode, chkpwd, ldap })
    }

    /// Verify a candidate password against the configured backend.
    pub async fn validate_password(
        &self,
        server: &Server,
        user: &UserRecord,
        candidate: &str,
    ) -> PassResult {
        match self.mode {
            AuthMode::Native => {
                // Both sides are canonicalized before the comparison so
                // stray whitespace never locks anyone out.
                let stored = user.password.trim();
                if !stored.is_empty() && stored.eq_ignore_ascii_case(candidate.trim()) {
                    PassResult::Ok
                } else {
                    PassResult::WrongPassword
                }
            }
            AuthMode::Host => {
                if user.uid == NO_UID {
                    return PassResult::NoUser;
                }
                let Some(chkpwd) = &self.chkpwd else {
                    return PassResult::InternalError;
                };
                match chkpwd.check(user.uid, candidate).await {
                    Ok(true) => PassResult::Ok,
                    Ok(false) => PassResult::WrongPassword,
                    Err(err) => {
                        trc::error!(err.details("chkpwd query failed"));
                        PassResult::InternalError
                    }
                }
            }
            AuthMode::LdapPosix | AuthMode::LdapAd => {
                let Some(ldap) = &self.ldap else {
                    return PassResult::InternalError;
                };
                match ldap.authenticate(&user.fullname, candidate).await {
                    Ok(Some(info)) => {
                        // Keep the local record in step with the
                        // directory.
                        if let Err(err) = ldap.apply_to_user(server, &info).await {
                            trc::error!(err.details("ldap attribute sync failed"));
                        }
                        PassResult::Ok
                    }
                    Ok(None) => PassResult::WrongPassword,
                    Err(err) => {
                        trc::error!(err);
                        PassResult::InternalError
                    }
                }
            }
        }
    }

    /// Find or provision the user record for a login name. In LDAP modes
    /// an unknown name is looked up in the directory and created locally
    /// on first sight.
    pub async fn lookup_or_provision(
        &self,
        server: &Server,
        name: &str,
    ) -> trc::Result<Option<UserRecord>> {
        if let Some(user) = server.get_user(name).await? {
            return Ok(Some(user));
        }
        if let Some(ldap) = &self.ldap {
            if let Some(info) = ldap.lookup(name).await? {
                let user = ldap.provision_user(server, &info).await?;
                return Ok(Some(user));
            }
        }
        Ok(None)
    }

    /// Periodic directory synchronization, driven by the housekeeper in
    /// LDAP modes.
    pub async fn sync_directory(&self, server: &Server) -> trc::Result<usize> {
        match &self.ldap {
            Some(ldap) => ldap.sync_all(server).await,
            None => Ok(0),
        }
    }
}
