/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

/// Identity verification mode, selected by `c_auth_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    #[default]
    Native = 0,
    Host = 1,
    LdapPosix = 2,
    LdapAd = 3,
}

impl AuthMode {
    pub fn from_config(value: i64) -> Option<AuthMode> {
        match value {
            0 => Some(AuthMode::Native),
            1 => Some(AuthMode::Host),
            2 => Some(AuthMode::LdapPosix),
            3 => Some(AuthMode::LdapAd),
            _ => None,
        }
    }

    pub fn is_ldap(&self) -> bool {
        matches!(self, AuthMode::LdapPosix | AuthMode::LdapAd)
    }
}

/// Outcome of a `USER` lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginResult {
    Ok,
    AlreadyLoggedIn,
    TooManyUsers,
    NotFound,
}

/// Outcome of a `PASS` check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassResult {
    Ok,
    AlreadyLoggedIn,
    NoUser,
    InternalError,
    WrongPassword,
}
