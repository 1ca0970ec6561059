/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

pub mod autopurge;
pub mod housekeeper;

use common::{
    AIDEROOM, Server,
    message::{CtdlMessage, F_AUTHOR, F_BODY, F_ROOM, F_SUBJECT},
    registry::{UserHook, UserHookEvent},
};
use futures::future::BoxFuture;
use message::submit::SubmitMsg;

/// Post a system notice into the Aide room. New-user announcements, purge
/// reports and crash notices all arrive this way.
pub async fn aide_message(server: &Server, subject: &str, text: &str) -> trc::Result<i64> {
    let mut msg = CtdlMessage::new();
    msg.set(F_AUTHOR, "Citadel");
    msg.set(F_ROOM, AIDEROOM);
    msg.set(F_SUBJECT, subject);
    msg.set(F_BODY, text);
    server.submit_msg(&mut msg, None, AIDEROOM).await
}

/// Announces account creation in the Aide room.
pub struct NewUserNotifier;

impl UserHook for NewUserNotifier {
    fn on_user_event<'x>(
        &'x self,
        server: &'x Server,
        user_name: &'x str,
        user_num: i64,
        event: UserHookEvent,
    ) -> BoxFuture<'x, ()> {
        Box::pin(async move {
            if event != UserHookEvent::NewUser {
                return;
            }
            let text = format!("New user account <{user_name}> (#{user_num}) has been created.");
            if let Err(err) = aide_message(server, "New user", &text).await {
                trc::error!(err.details("cannot post new-user notice"));
            }
        })
    }
}

/// On a restart after a crash, tell the admins which process died and
/// where to look for the core.
pub async fn post_crash_notice(server: &Server, dead_pid: u32) {
    let core_hint = server.core.dirs.core_file_hint(dead_pid);
    let text = format!(
        "The server has recovered from an unclean shutdown.\n\n\
         The previous server process (pid {dead_pid}) terminated without\n\
         cleaning up. If your system saves core dumps, look for\n\
         {}\n",
        core_hint.display(),
    );
    trc::event!(Server(trc::ServerEvent::CrashRecovered), Uid = dead_pid);
    if let Err(err) = aide_message(server, "Server crash recovery", &text).await {
        trc::error!(err.details("cannot post crash notice"));
    }
}
