/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use crate::{UserDir, UserRecord, same_user, user_key};
use common::{
    AX_AIDE, Server,
    auth::AuthMode,
    listener::SessionShared,
};
use std::sync::Arc;

pub struct LoginInfo {
    pub prevlogin: u64,
}

/// Book-keeping applied once credentials have been verified: call counters,
/// admin elevation, address assignment and the session binding.
pub async fn do_login(
    server: &Server,
    session: &Arc<SessionShared>,
    user: &mut UserRecord,
) -> trc::Result<LoginInfo> {
    let prevlogin = user.lastcall;
    user.timescalled += 1;
    user.lastcall = store::now();

    // The configured sysop name always gets admin access, as does uid 0
    // when authenticating against the host.
    let sysadm = server.config().str_or("c_sysadm", "admin");
    if same_user(&user.fullname, &sysadm) {
        user.axlevel = AX_AIDE;
    }
    let auth_mode = AuthMode::from_config(server.config().int_or("c_auth_mode", 0))
        .unwrap_or_default();
    if auth_mode == AuthMode::Host && user.uid == 0 {
        user.axlevel = AX_AIDE;
    }

    // Users created before address assignment get a primary address now.
    if user.emailaddrs.is_empty() {
        let fqdn = server.config().str_or("c_fqdn", "localhost");
        user.emailaddrs = format!("{}@{}", user_key(&user.fullname), fqdn);
    }

    server.put_user(user).await?;

    {
        let mut bound = session.user.lock();
        bound.name = user.fullname.clone();
        bound.num = user.usernum;
        bound.axlevel = user.axlevel;
    }
    session.touch();

    trc::event!(
        Session(trc::SessionEvent::Login),
        SessionId = session.id,
        AccountName = user.fullname.clone(),
        Id = user.usernum,
    );

    Ok(LoginInfo { prevlogin })
}

/// Undo the session binding on `LOUT`.
pub fn do_logout(session: &Arc<SessionShared>) {
    let mut bound = session.user.lock();
    trc::event!(
        Session(trc::SessionEvent::Logout),
        SessionId = session.id,
        AccountName = bound.name.clone(),
    );
    *bound = Default::default();
}
