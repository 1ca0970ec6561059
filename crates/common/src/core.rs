/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use crate::{Server, listener::KillReason};
use std::sync::atomic::Ordering;

impl Server {
    /// Mark sessions idle past `c_sleeping` for teardown. Sessions with
    /// `dont_term` set are never reaped.
    pub fn reap_idle_sessions(&self) {
        let sleeping = self.config().int_or("c_sleeping", 900);
        if sleeping <= 0 {
            return;
        }
        let now = store::now();
        for session in self.inner.data.sessions.snapshot() {
            if session.dont_term.load(Ordering::Relaxed) || session.marked_for_death() {
                continue;
            }
            let last = session.lastcmd.load(Ordering::Relaxed);
            if now.saturating_sub(last) > sleeping as u64 {
                session.kill(KillReason::Idle);
                trc::event!(
                    Session(trc::SessionEvent::IdleReap),
                    SessionId = session.id,
                    AccountName = session.user_name(),
                    Elapsed = std::time::Duration::from_secs(now.saturating_sub(last)),
                );
            }
        }
    }

    /// Shutdown path: every live session is told to die, which unblocks
    /// its read loop.
    pub fn terminate_all_sessions(&self) {
        for session in self.inner.data.sessions.snapshot() {
            session.kill(KillReason::ServerShuttingDown);
        }
    }
}
