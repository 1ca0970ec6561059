/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use common::{
    BuildServer, Inner, Server,
    ipc::HousekeeperEvent,
    registry::HookEvent,
};
use directory::AuthService;
use std::sync::{
    Arc,
    atomic::Ordering,
};
use tokio::sync::mpsc;

const TICK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(15);
const MINUTE_BLOCK: u64 = 60;
const STUCK_THRESHOLD: u64 = 300;

/// The housekeeper task: a periodic tick plus explicit wake-ups. Exactly
/// one housekeeping body runs at a time; everything else skips out early.
pub struct Housekeeper {
    core: Arc<Inner>,
    auth: Arc<AuthService>,
    rx: mpsc::Receiver<HousekeeperEvent>,
    last_ldap_sync: u64,
}

pub trait SpawnHousekeeper {
    fn spawn(self, core: Arc<Inner>, auth: Arc<AuthService>);
}

impl SpawnHousekeeper for mpsc::Receiver<HousekeeperEvent> {
    fn spawn(self, core: Arc<Inner>, auth: Arc<AuthService>) {
        tokio::spawn(async move {
            Housekeeper {
                core,
                auth,
                rx: self,
                last_ldap_sync: 0,
            }
            .start()
            .await;
        });
    }
}

impl Housekeeper {
    async fn start(&mut self) {
        trc::event!(Housekeeper(trc::HousekeeperEvent::Start));
        loop {
            let event = tokio::time::timeout(TICK_INTERVAL, self.rx.recv()).await;
            match event {
                Ok(Some(HousekeeperEvent::Exit)) | Ok(None) => break,
                Ok(Some(HousekeeperEvent::RunPurge)) => {
                    let server = self.core.build_server();
                    crate::autopurge::run_purge(&server, true).await;
                }
                Ok(Some(HousekeeperEvent::Wakeup)) | Err(_) => {
                    self.run_once().await;
                }
            }
        }
        trc::event!(Housekeeper(trc::HousekeeperEvent::Stop));
    }

    /// One housekeeping pass, in the same shape the per-request routine
    /// had: an "as often as needed" block every time, a per-minute block
    /// when due, and a stall warning when the loop has not run for five
    /// minutes.
    pub async fn run_once(&mut self) {
        let server = self.core.build_server();
        let data = &server.inner.data;

        if data.housekeeper_disabled.load(Ordering::Acquire) {
            return;
        }
        if data
            .housekeeper_busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let now = store::now();
        let last_run = data.housekeeper_last_run.load(Ordering::Relaxed);
        if last_run != 0 && now.saturating_sub(last_run) > STUCK_THRESHOLD && !server.is_single_user()
        {
            trc::event!(
                Housekeeper(trc::HousekeeperEvent::Stuck),
                Elapsed = std::time::Duration::from_secs(now.saturating_sub(last_run)),
                Reason = "housekeeping has not run in a while; is something stuck?",
            );
        }

        // Things to do as often as needed.
        message::journaling::drain_journal_queue(&server).await;
        if let Err(err) = message::refcount::run_refcount_reducer(&server).await {
            trc::error!(err.details("refcount reducer failed"));
        }
        server.run_session_hooks(HookEvent::House, None).await;
        server.reap_idle_sessions();

        // Things to do no more than once per minute.
        if now.saturating_sub(last_run) >= MINUTE_BLOCK {
            trc::event!(Housekeeper(trc::HousekeeperEvent::Run));

            if let Err(err) = server.store().checkpoint().await {
                trc::error!(err.details("checkpoint failed"));
            }

            server.run_session_hooks(HookEvent::Timer, None).await;
            crate::autopurge::run_purge(&server, false).await;

            if self.auth.mode.is_ldap() {
                let net_freq = server.config().int_or("c_net_freq", 3600).max(60) as u64;
                if now.saturating_sub(self.last_ldap_sync) >= net_freq {
                    self.last_ldap_sync = now;
                    if let Err(err) = self.auth.sync_directory(&server).await {
                        trc::error!(err.details("directory synchronization failed"));
                    }
                }
            }

            log_memory_datapoint();
            data.housekeeper_last_run.store(now, Ordering::Relaxed);
        } else if last_run == 0 {
            data.housekeeper_last_run.store(now, Ordering::Relaxed);
        }

        data.housekeeper_busy.store(false, Ordering::Release);
    }
}

/// Block new housekeeping runs and wait for an in-flight one to finish.
/// Used by migration import and shutdown.
pub async fn disable_housekeeping(server: &Server) {
    server
        .inner
        .data
        .housekeeper_disabled
        .store(true, Ordering::Release);
    while server.inner.data.housekeeper_busy.load(Ordering::Acquire) {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    trc::event!(Housekeeper(trc::HousekeeperEvent::Disabled));
}

pub fn enable_housekeeping(server: &Server) {
    server
        .inner
        .data
        .housekeeper_disabled
        .store(false, Ordering::Release);
    trc::event!(Housekeeper(trc::HousekeeperEvent::Enabled));
}

/// One datapoint per minute makes slow leaks visible in the logs.
fn log_memory_datapoint() {
    if let Ok(statm) = std::fs::read_to_string("/proc/self/statm") {
        if let Some(pages) = statm.split_whitespace().next() {
            if let Ok(pages) = pages.parse::<u64>() {
                trc::event!(
                    Housekeeper(trc::HousekeeperEvent::Run),
                    Size = pages * 4096,
                    Details = "resident memory datapoint",
                );
            }
        }
    }
}
