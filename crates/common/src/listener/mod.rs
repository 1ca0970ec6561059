/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

pub mod listen;
pub mod stream;
pub mod tls;

use crate::Server;
use ahash::AHashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
};
use stream::ClientStream;
use tokio::sync::{Notify, watch};
use tls::TlsManager;

/// Why a session was torn down. Stamped once, used for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KillReason {
    Alive = 0,
    ClientLoggedOut = 1,
    Idle = 2,
    ClientDisconnected = 3,
    AuthFailed = 4,
    ServerShuttingDown = 5,
    MaxSessionsExceeded = 6,
    AdminTerminate = 7,
    SelectInterrupted = 8,
    SelectFailed = 9,
    WriteFailed = 10,
    SimulationWorker = 11,
    NoLogin = 12,
    NoCrypto = 13,
    ReadstringFailed = 14,
    MallocFailed = 15,
    Quota = 16,
    ReadFailed = 17,
    Spammer = 18,
    XmlParser = 19,
}

impl KillReason {
    pub fn from_u8(value: u8) -> KillReason {
        match value {
            1 => KillReason::ClientLoggedOut,
            2 => KillReason::Idle,
            3 => KillReason::ClientDisconnected,
            4 => KillReason::AuthFailed,
            5 => KillReason::ServerShuttingDown,
            6 => KillReason::MaxSessionsExceeded,
            7 => KillReason::AdminTerminate,
            8 => KillReason::SelectInterrupted,
            9 => KillReason::SelectFailed,
            10 => KillReason::WriteFailed,
            11 => KillReason::SimulationWorker,
            12 => KillReason::NoLogin,
            13 => KillReason::NoCrypto,
            14 => KillReason::ReadstringFailed,
            15 => KillReason::MallocFailed,
            16 => KillReason::Quota,
            17 => KillReason::ReadFailed,
            18 => KillReason::Spammer,
            19 => KillReason::XmlParser,
            _ => KillReason::Alive,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            KillReason::Alive => "alive",
            KillReason::ClientLoggedOut => "client logged out",
            KillReason::Idle => "idle",
            KillReason::ClientDisconnected => "client disconnected",
            KillReason::AuthFailed => "authentication failed",
            KillReason::ServerShuttingDown => "server shutting down",
            KillReason::MaxSessionsExceeded => "too many sessions",
            KillReason::AdminTerminate => "terminated by administrator",
            KillReason::SelectInterrupted => "select interrupted",
            KillReason::SelectFailed => "select failed",
            KillReason::WriteFailed => "write failed",
            KillReason::SimulationWorker => "simulation worker",
            KillReason::NoLogin => "no login",
            KillReason::NoCrypto => "crypto required",
            KillReason::ReadstringFailed => "string read failed",
            KillReason::MallocFailed => "allocation failed",
            KillReason::Quota => "quota exceeded",
            KillReason::ReadFailed => "read failed",
            KillReason::Spammer => "spammer",
            KillReason::XmlParser => "xml parser error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExpressMessage {
    pub sender: String,
    pub text: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SessionUser {
    pub name: String,
    pub num: i64,
    pub axlevel: u8,
}

/// The shared half of a session: everything another task may need to see
/// or poke. The owning task keeps protocol state to itself.
pub struct SessionShared {
    pub id: u64,
    pub protocol: &'static str,
    pub remote_addr: String,
    pub peer_uid: Option<u32>,
    pub is_local_client: bool,
    pub nologin: bool,
    pub created: u64,
    pub user: Mutex<SessionUser>,
    pub room: Mutex<String>,
    pub lastcmd: AtomicU64,
    pub kill_reason: AtomicU8,
    pub dont_term: AtomicBool,
    pub express: Mutex<Vec<ExpressMessage>>,
    pub notify: Notify,
}

impl SessionShared {
    pub fn is_logged_in(&self) -> bool {
        self.user.lock().num > 0
    }

    pub fn user_name(&self) -> String {
        self.user.lock().name.clone()
    }

    pub fn user_num(&self) -> i64 {
        self.user.lock().num
    }

    pub fn axlevel(&self) -> u8 {
        self.user.lock().axlevel
    }

    pub fn touch(&self) {
        self.lastcmd.store(store::now(), Ordering::Relaxed);
    }

    pub fn kill(&self, reason: KillReason) {
        self.kill_reason.store(reason as u8, Ordering::Relaxed);
        self.notify.notify_waiters();
    }

    pub fn kill_reason(&self) -> KillReason {
        KillReason::from_u8(self.kill_reason.load(Ordering::Relaxed))
    }

    pub fn marked_for_death(&self) -> bool {
        self.kill_reason.load(Ordering::Relaxed) != 0
    }

    pub fn queue_express(&self, msg: ExpressMessage) {
        self.express.lock().push(msg);
        self.notify.notify_waiters();
    }

    pub fn has_express(&self) -> bool {
        !self.express.lock().is_empty()
    }

    pub fn take_express(&self) -> Vec<ExpressMessage> {
        std::mem::take(&mut *self.express.lock())
    }
}

// Termination result bits.
pub const TERM_FOUND: u8 = 1;
pub const TERM_ALLOWED: u8 = 2;
pub const TERM_KILLED: u8 = 4;

/// The live session table, replacing the linked context list: a lock-guarded
/// map keyed by session id. Scans that call out snapshot first and release
/// the lock.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<AHashMap<u64, Arc<SessionShared>>>,
}

impl SessionRegistry {
    pub fn insert(&self, session: Arc<SessionShared>) {
        self.sessions.lock().insert(session.id, session);
    }

    pub fn remove(&self, id: u64) -> Option<Arc<SessionShared>> {
        self.sessions.lock().remove(&id)
    }

    pub fn get(&self, id: u64) -> Option<Arc<SessionShared>> {
        self.sessions.lock().get(&id).cloned()
    }

    pub fn count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Copy the table so callers can iterate without holding the lock.
    pub fn snapshot(&self) -> Vec<Arc<SessionShared>> {
        let mut sessions: Vec<_> = self.sessions.lock().values().cloned().collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }

    /// Kill another session on behalf of `actor`. Users may kill their own
    /// other sessions; admins may kill anything but themselves.
    pub fn terminate_other_session(
        &self,
        actor: &SessionShared,
        target_id: u64,
    ) -> u8 {
        let mut result = 0;
        if target_id == actor.id {
            return result;
        }
        if let Some(target) = self.get(target_id) {
            result |= TERM_FOUND;
            let allowed = actor.axlevel() >= crate::AX_AIDE
                || (actor.user_num() > 0 && actor.user_num() == target.user_num());
            if allowed {
                result |= TERM_ALLOWED;
                target.kill(KillReason::AdminTerminate);
                result |= TERM_KILLED;
                trc::event!(
                    Session(trc::SessionEvent::Terminated),
                    SessionId = target_id,
                    AccountName = target.user_name(),
                );
            }
        }
        result
    }

    /// Queue an express message for every live session of `user_num`.
    /// Returns the number of sessions reached.
    pub fn deliver_express(&self, user_num: i64, msg: &ExpressMessage) -> usize {
        let mut delivered = 0;
        for session in self.snapshot() {
            if session.user_num() == user_num {
                session.queue_express(msg.clone());
                delivered += 1;
            }
        }
        delivered
    }
}

/// Process-wide single-user mode: engaged by one session, reported only
/// while that session is the sole survivor.
#[derive(Default)]
pub struct SingleUser {
    engaged_by: Mutex<Option<u64>>,
}

impl SingleUser {
    pub fn try_engage(&self, session_id: u64) -> bool {
        let mut guard = self.engaged_by.lock();
        match *guard {
            Some(owner) if owner != session_id => false,
            _ => {
                *guard = Some(session_id);
                trc::event!(
                    Session(trc::SessionEvent::SingleUserEngaged),
                    SessionId = session_id,
                );
                true
            }
        }
    }

    pub fn release(&self, session_id: u64) {
        let mut guard = self.engaged_by.lock();
        if *guard == Some(session_id) {
            *guard = None;
            trc::event!(
                Session(trc::SessionEvent::SingleUserReleased),
                SessionId = session_id,
            );
        }
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged_by.lock().is_some()
    }

    pub fn is_single_user(&self, registry: &SessionRegistry) -> bool {
        self.is_engaged() && registry.count() == 1
    }
}

/// One bound listener: the protocol tag, its TLS material and the shutdown
/// signal shared by every session it accepts.
pub struct ServerInstance {
    pub id: String,
    pub protocol: &'static str,
    pub tls: Arc<TlsManager>,
    pub shutdown_rx: watch::Receiver<bool>,
}

impl ServerInstance {
    /// Upgrade an established stream to TLS in place. The caller has
    /// already emitted its protocol-level "go ahead" response. A failed
    /// handshake ends the connection; the caller stamps `NoCrypto`.
    pub async fn tls_accept(&self, stream: ClientStream) -> std::io::Result<ClientStream> {
        self.tls.accept(stream).await
    }
}

pub struct SessionData {
    pub stream: ClientStream,
    pub shared: Arc<SessionShared>,
    pub instance: Arc<ServerInstance>,
}

pub trait SessionManager: Send + Sync + 'static {
    fn handle(&self, server: Server, session: SessionData) -> BoxFuture<'static, ()>;

    fn shutdown(&self) -> BoxFuture<'static, ()> {
        Box::pin(async {})
    }
}

pub fn next_session_id(r#gen: &AtomicU64) -> u64 {
    loop {
        let id = r#gen.fetch_add(1, Ordering::Relaxed);
        if id != 0 {
            return id;
        }
    }
}

impl Server {
    pub fn sessions(&self) -> &SessionRegistry {
        &self.inner.data.sessions
    }

    pub fn try_single_user(&self, session_id: u64) -> bool {
        self.inner.data.single_user.try_engage(session_id)
    }

    pub fn is_single_user(&self) -> bool {
        self.inner
            .data
            .single_user
            .is_single_user(&self.inner.data.sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared(id: u64, user_num: i64, axlevel: u8) -> Arc<SessionShared> {
        Arc::new(SessionShared {
            id,
            protocol: "citadel",
            remote_addr: "127.0.0.1".into(),
            peer_uid: None,
            is_local_client: false,
            nologin: false,
            created: 0,
            user: Mutex::new(SessionUser {
                name: format!("user{user_num}"),
                num: user_num,
                axlevel,
            }),
            room: Mutex::new(crate::BASEROOM.into()),
            lastcmd: AtomicU64::new(0),
            kill_reason: AtomicU8::new(0),
            dont_term: AtomicBool::new(false),
            express: Mutex::new(Vec::new()),
            notify: Notify::new(),
        })
    }

    #[test]
    fn session_id_generator_never_yields_zero() {
        let generator = AtomicU64::new(u64::MAX);
        assert_ne!(next_session_id(&generator), 0);
        assert_ne!(next_session_id(&generator), 0);
    }

    #[test]
    fn terminate_rules() {
        let registry = SessionRegistry::default();
        let admin = shared(1, 10, crate::AX_AIDE);
        let user_a = shared(2, 20, crate::AX_LOCAL);
        let user_b = shared(3, 20, crate::AX_LOCAL);
        let stranger = shared(4, 30, crate::AX_LOCAL);
        for s in [&admin, &user_a, &user_b, &stranger] {
            registry.insert(s.clone());
        }

        // A user may kill their own other session.
        assert_eq!(
            registry.terminate_other_session(&user_a, 3),
            TERM_FOUND | TERM_ALLOWED | TERM_KILLED
        );
        // But not an unrelated one.
        assert_eq!(registry.terminate_other_session(&user_a, 4), TERM_FOUND);
        // Admins kill anything except their current session.
        assert_eq!(registry.terminate_other_session(&admin, 1), 0);
        assert_eq!(
            registry.terminate_other_session(&admin, 4),
            TERM_FOUND | TERM_ALLOWED | TERM_KILLED
        );
        // Unknown session.
        assert_eq!(registry.terminate_other_session(&admin, 99), 0);
    }

    #[test]
    fn single_user_mode_requires_exactly_one_session() {
        let registry = SessionRegistry::default();
        let single = SingleUser::default();
        let one = shared(1, 10, crate::AX_LOCAL);
        let two = shared(2, 20, crate::AX_LOCAL);
        registry.insert(one.clone());
        registry.insert(two);

        assert!(single.try_engage(1));
        assert!(!single.try_engage(2));
        assert!(!single.is_single_user(&registry));
        registry.remove(2);
        assert!(single.is_single_user(&registry));
        single.release(1);
        assert!(!single.is_engaged());
    }
}
