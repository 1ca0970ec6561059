/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

pub mod auth;
pub mod config;
pub mod core;
pub mod dirs;
pub mod ipc;
pub mod listener;
pub mod message;
pub mod registry;

use arc_swap::ArcSwap;
use config::ConfigCache;
use dirs::CitadelDirs;
use ipc::{Ipc, JournalQueue, RefcountQueue};
use listener::{SessionRegistry, tls::TlsManager};
use registry::ServiceRegistry;
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicI64, AtomicU64},
};
use store::Store;
use tokio::sync::watch;

pub static DAEMON_NAME: &str = concat!("Citadel Server v", env!("CARGO_PKG_VERSION"));

pub const IPC_CHANNEL_BUFFER: usize = 1024;

// Well-known rooms. The spool-out room is flagged as a system room so it
// never shows up in room listings.
pub const BASEROOM: &str = "Lobby";
pub const MAILROOM: &str = "Mail";
pub const SENTITEMS: &str = "Sent Items";
pub const AIDEROOM: &str = "Aide";
pub const USERCONFIGROOM: &str = "My Citadel Config";
pub const USERCALENDARROOM: &str = "Calendar";
pub const USERTASKSROOM: &str = "Tasks";
pub const USERCONTACTSROOM: &str = "Contacts";
pub const SYSCONFIGROOM: &str = "Local System Configuration";
pub const SMTP_SPOOLOUT_ROOM: &str = "__CitadelSMTPspoolout__";

pub const ROOMNAMELEN: usize = 128;
pub const USERNAME_SIZE: usize = 64;

/// Bodies above this size move out of the main message record.
pub const BIG_MESSAGE: usize = 1024;

/// Use-table entries older than this are culled (10 days).
pub const USETABLE_RETAIN: u64 = 864_000;

pub const DEFAULT_ADMIN_USERNAME: &str = "admin";
pub const DEFAULT_ADMIN_PASSWORD: &str = "citadel";

// Room flags (QRflags).
pub const QR_PERMANENT: u32 = 1;
pub const QR_INUSE: u32 = 2;
pub const QR_PRIVATE: u32 = 4;
pub const QR_PASSWORDED: u32 = 8;
pub const QR_GUESSNAME: u32 = 16;
pub const QR_DIRECTORY: u32 = 32;
pub const QR_UPLOAD: u32 = 64;
pub const QR_DOWNLOAD: u32 = 128;
pub const QR_VISDIR: u32 = 256;
pub const QR_ANONONLY: u32 = 512;
pub const QR_ANONOPT: u32 = 1024;
pub const QR_NETWORK: u32 = 2048;
pub const QR_READONLY: u32 = 8192;
pub const QR_MAILBOX: u32 = 16384;

// Room flags (QRflags2).
pub const QR2_SYSTEM: u32 = 1;
pub const QR2_SELFLIST: u32 = 2;
pub const QR2_COLLABDEL: u32 = 4;
pub const QR2_SUBJECTREQ: u32 = 8;
pub const QR2_SMTP_PUBLIC: u32 = 16;
pub const QR2_MODERATED: u32 = 32;

// User flags (USflags).
pub const US_NEEDVALID: u32 = 1;
pub const US_PERM: u32 = 4;
pub const US_UNLISTED: u32 = 64;
pub const US_INTERNET: u32 = 4096;

// Visit flags.
pub const V_FORGET: u32 = 1;
pub const V_LOCKOUT: u32 = 2;
pub const V_ACCESS: u32 = 4;

// Room access bits returned by the access check.
pub const UA_KNOWN: u32 = 2;
pub const UA_GOTOALLOWED: u32 = 4;
pub const UA_HASNEWMSGS: u32 = 8;
pub const UA_ZAPPED: u32 = 16;
pub const UA_POSTALLOWED: u32 = 32;
pub const UA_ADMINALLOWED: u32 = 64;
pub const UA_DELETEALLOWED: u32 = 128;

// Access levels.
pub const AX_DELETED: u8 = 0;
pub const AX_NEW_USER: u8 = 1;
pub const AX_PROBLEM: u8 = 2;
pub const AX_LOCAL: u8 = 3;
pub const AX_NETWORK: u8 = 4;
pub const AX_PREFERRED: u8 = 5;
pub const AX_AIDE: u8 = 6;

// Default views.
pub const VIEW_BBS: u8 = 0;
pub const VIEW_MAILBOX: u8 = 1;
pub const VIEW_ADDRESSBOOK: u8 = 2;
pub const VIEW_CALENDAR: u8 = 3;
pub const VIEW_TASKS: u8 = 4;
pub const VIEW_NOTES: u8 = 5;
pub const VIEW_WIKI: u8 = 6;
pub const VIEW_JOURNAL: u8 = 8;
pub const VIEW_QUEUE: u8 = 11;

pub fn view_uses_euid(view: u8) -> bool {
    matches!(
        view,
        VIEW_CALENDAR | VIEW_TASKS | VIEW_ADDRESSBOOK | VIEW_WIKI | VIEW_NOTES
    )
}

// Message expiration policy modes.
pub const EXPIRE_NEXTLEVEL: i32 = 0;
pub const EXPIRE_MANUAL: i32 = 1;
pub const EXPIRE_NUMMSGS: i32 = 2;
pub const EXPIRE_AGE: i32 = 3;

pub const SMTP_DELIVER_WARN: u64 = 14_400;
pub const SMTP_DELIVER_FAIL: u64 = 432_000;
pub const BOUNCE_SOURCE: &str = "Citadel Mail Delivery Subsystem";

pub type SharedCore = Arc<ArcSwap<Core>>;

/// The hot-swappable half of the process state: storage handles, the typed
/// configuration cache, listener/TLS material and the frozen hook registry.
#[derive(Clone)]
pub struct Core {
    pub storage: Store,
    pub config: Arc<ConfigCache>,
    pub registry: Arc<ServiceRegistry>,
    pub tls: Arc<TlsManager>,
    pub dirs: CitadelDirs,
}

/// Runtime state that survives a core reload.
pub struct Inner {
    pub shared_core: SharedCore,
    pub data: Data,
    pub ipc: Ipc,
}

pub struct Data {
    pub sessions: SessionRegistry,
    pub session_id_gen: AtomicU64,
    pub single_user: listener::SingleUser,
    pub refcount_queue: RefcountQueue,
    pub journal_queue: JournalQueue,
    pub shutdown_tx: watch::Sender<bool>,
    pub housekeeper_busy: AtomicBool,
    pub housekeeper_disabled: AtomicBool,
    pub housekeeper_last_run: AtomicU64,
    pub last_purge_run: AtomicU64,
    pub queue_last_job_submitted: AtomicI64,
    pub queue_last_job_processed: AtomicI64,
    pub server_start_time: u64,
}

/// A cheap per-task view pairing the immutable runtime with a consistent
/// snapshot of the core.
#[derive(Clone)]
pub struct Server {
    pub inner: Arc<Inner>,
    pub core: Arc<Core>,
}

pub trait BuildServer {
    fn build_server(&self) -> Server;
}

impl BuildServer for Arc<Inner> {
    fn build_server(&self) -> Server {
        Server {
            inner: self.clone(),
            core: self.shared_core.load_full(),
        }
    }
}

impl Server {
    #[inline(always)]
    pub fn store(&self) -> &Store {
        &self.core.storage
    }

    #[inline(always)]
    pub fn config(&self) -> &ConfigCache {
        &self.core.config
    }

    #[inline(always)]
    pub fn registry(&self) -> &ServiceRegistry {
        &self.core.registry
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.inner.data.shutdown_tx.borrow()
    }

    pub fn shutdown(&self) {
        let _ = self.inner.data.shutdown_tx.send(true);
    }
}

pub trait IntoString: Sized {
    fn into_string(self) -> String;
}

impl IntoString for Vec<u8> {
    fn into_string(self) -> String {
        String::from_utf8(self)
            .unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).into_owned())
    }
}
