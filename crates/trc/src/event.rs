/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use crate::Level;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Server(ServerEvent),
    Store(StoreEvent),
    Config(ConfigEvent),
    Network(NetworkEvent),
    Session(SessionEvent),
    Auth(AuthEvent),
    Tls(TlsEvent),
    Queue(QueueEvent),
    Housekeeper(HousekeeperEvent),
    Purge(PurgeEvent),
    Message(MessageEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerEvent {
    Startup,
    Shutdown,
    StartupError,
    CrashRecovered,
    WatcherRestart,
    SignalReceived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreEvent {
    ReadError,
    WriteError,
    DeadlockRetry,
    NotFound,
    NotConfigured,
    DataCorruption,
    UnexpectedError,
    RecoveryAttempt,
    RecoveryFailed,
    Checkpoint,
    Compact,
    LegacyMigration,
    RefcountApplied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigEvent {
    BuildError,
    DefaultApplied,
    MissingSetting,
    InvalidValue,
    MigratedControlRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkEvent {
    ListenStart,
    ListenStop,
    BindError,
    AcceptError,
    ConnectionStart,
    ConnectionEnd,
    ReadError,
    WriteError,
    Timeout,
    TooManySessions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    Start,
    Stop,
    Login,
    Logout,
    IdleReap,
    Terminated,
    ExpressMessage,
    SingleUserEngaged,
    SingleUserReleased,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthEvent {
    Success,
    Failed,
    NoSuchUser,
    AlreadyLoggedIn,
    ChkpwdError,
    LdapError,
    LdapSync,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TlsEvent {
    HandshakeError,
    CertificateGenerated,
    CertificateReloaded,
    CertificateReadError,
    NotConfigured,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueEvent {
    JobSubmitted,
    JobProcessed,
    JobRequeued,
    JobDeleted,
    AttemptStart,
    AttemptSuccess,
    AttemptTempFail,
    AttemptPermFail,
    BounceSent,
    DelayWarningSent,
    Expired,
    MxLookupFailed,
    QueueRunSkipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HousekeeperEvent {
    Start,
    Stop,
    Run,
    Stuck,
    TimerHook,
    Disabled,
    Enabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PurgeEvent {
    Started,
    Finished,
    UserPurged,
    UserDeferred,
    RoomPurged,
    MessageExpired,
    VisitPurged,
    UseTablePurged,
    EuidPurged,
    CorruptRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageEvent {
    Saved,
    Deleted,
    RejectedByHook,
    EuidReplaced,
    AlreadySeen,
    JournalQueued,
    JournalDelivered,
    JournalError,
}

macro_rules! impl_into_event_type {
    ($($name:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$name> for EventType {
                fn from(inner: $name) -> Self {
                    EventType::$variant(inner)
                }
            }
        )*
    };
}

impl_into_event_type!(
    ServerEvent => Server,
    StoreEvent => Store,
    ConfigEvent => Config,
    NetworkEvent => Network,
    SessionEvent => Session,
    AuthEvent => Auth,
    TlsEvent => Tls,
    QueueEvent => Queue,
    HousekeeperEvent => Housekeeper,
    PurgeEvent => Purge,
    MessageEvent => Message,
);

impl EventType {
    pub fn name(&self) -> &'static str {
        match self {
            EventType::Server(e) => match e {
                ServerEvent::Startup => "server.startup",
                ServerEvent::Shutdown => "server.shutdown",
                ServerEvent::StartupError => "server.startup-error",
                ServerEvent::CrashRecovered => "server.crash-recovered",
                ServerEvent::WatcherRestart => "server.watcher-restart",
                ServerEvent::SignalReceived => "server.signal-received",
            },
            EventType::Store(e) => match e {
                StoreEvent::ReadError => "store.read-error",
                StoreEvent::WriteError => "store.write-error",
                StoreEvent::DeadlockRetry => "store.deadlock-retry",
                StoreEvent::NotFound => "store.not-found",
                StoreEvent::NotConfigured => "store.not-configured",
                StoreEvent::DataCorruption => "store.data-corruption",
                StoreEvent::UnexpectedError => "store.unexpected-error",
                StoreEvent::RecoveryAttempt => "store.recovery-attempt",
                StoreEvent::RecoveryFailed => "store.recovery-failed",
                StoreEvent::Checkpoint => "store.checkpoint",
                StoreEvent::Compact => "store.compact",
                StoreEvent::LegacyMigration => "store.legacy-migration",
                StoreEvent::RefcountApplied => "store.refcount-applied",
            },
            EventType::Config(e) => match e {
                ConfigEvent::BuildError => "config.build-error",
                ConfigEvent::DefaultApplied => "config.default-applied",
                ConfigEvent::MissingSetting => "config.missing-setting",
                ConfigEvent::InvalidValue => "config.invalid-value",
                ConfigEvent::MigratedControlRecord => "config.migrated-control-record",
            },
            EventType::Network(e) => match e {
                NetworkEvent::ListenStart => "network.listen-start",
                NetworkEvent::ListenStop => "network.listen-stop",
                NetworkEvent::BindError => "network.bind-error",
                NetworkEvent::AcceptError => "network.accept-error",
                NetworkEvent::ConnectionStart => "network.connection-start",
                NetworkEvent::ConnectionEnd => "network.connection-end",
                NetworkEvent::ReadError => "network.read-error",
                NetworkEvent::WriteError => "network.write-error",
                NetworkEvent::Timeout => "network.timeout",
                NetworkEvent::TooManySessions => "network.too-many-sessions",
            },
            EventType::Session(e) => match e {
                SessionEvent::Start => "session.start",
                SessionEvent::Stop => "session.stop",
                SessionEvent::Login => "session.login",
                SessionEvent::Logout => "session.logout",
                SessionEvent::IdleReap => "session.idle-reap",
                SessionEvent::Terminated => "session.terminated",
                SessionEvent::ExpressMessage => "session.express-message",
                SessionEvent::SingleUserEngaged => "session.single-user-engaged",
                SessionEvent::SingleUserReleased => "session.single-user-released",
            },
            EventType::Auth(e) => match e {
                AuthEvent::Success => "auth.success",
                AuthEvent::Failed => "auth.failed",
                AuthEvent::NoSuchUser => "auth.no-such-user",
                AuthEvent::AlreadyLoggedIn => "auth.already-logged-in",
                AuthEvent::ChkpwdError => "auth.chkpwd-error",
                AuthEvent::LdapError => "auth.ldap-error",
                AuthEvent::LdapSync => "auth.ldap-sync",
                AuthEvent::Error => "auth.error",
            },
            EventType::Tls(e) => match e {
                TlsEvent::HandshakeError => "tls.handshake-error",
                TlsEvent::CertificateGenerated => "tls.certificate-generated",
                TlsEvent::CertificateReloaded => "tls.certificate-reloaded",
                TlsEvent::CertificateReadError => "tls.certificate-read-error",
                TlsEvent::NotConfigured => "tls.not-configured",
            },
            EventType::Queue(e) => match e {
                QueueEvent::JobSubmitted => "queue.job-submitted",
                QueueEvent::JobProcessed => "queue.job-processed",
                QueueEvent::JobRequeued => "queue.job-requeued",
                QueueEvent::JobDeleted => "queue.job-deleted",
                QueueEvent::AttemptStart => "queue.attempt-start",
                QueueEvent::AttemptSuccess => "queue.attempt-success",
                QueueEvent::AttemptTempFail => "queue.attempt-temp-fail",
                QueueEvent::AttemptPermFail => "queue.attempt-perm-fail",
                QueueEvent::BounceSent => "queue.bounce-sent",
                QueueEvent::DelayWarningSent => "queue.delay-warning-sent",
                QueueEvent::Expired => "queue.expired",
                QueueEvent::MxLookupFailed => "queue.mx-lookup-failed",
                QueueEvent::QueueRunSkipped => "queue.run-skipped",
            },
            EventType::Housekeeper(e) => match e {
                HousekeeperEvent::Start => "housekeeper.start",
                HousekeeperEvent::Stop => "housekeeper.stop",
                HousekeeperEvent::Run => "housekeeper.run",
                HousekeeperEvent::Stuck => "housekeeper.stuck",
                HousekeeperEvent::TimerHook => "housekeeper.timer-hook",
                HousekeeperEvent::Disabled => "housekeeper.disabled",
                HousekeeperEvent::Enabled => "housekeeper.enabled",
            },
            EventType::Purge(e) => match e {
                PurgeEvent::Started => "purge.started",
                PurgeEvent::Finished => "purge.finished",
                PurgeEvent::UserPurged => "purge.user-purged",
                PurgeEvent::UserDeferred => "purge.user-deferred",
                PurgeEvent::RoomPurged => "purge.room-purged",
                PurgeEvent::MessageExpired => "purge.message-expired",
                PurgeEvent::VisitPurged => "purge.visit-purged",
                PurgeEvent::UseTablePurged => "purge.use-table-purged",
                PurgeEvent::EuidPurged => "purge.euid-purged",
                PurgeEvent::CorruptRecord => "purge.corrupt-record",
            },
            EventType::Message(e) => match e {
                MessageEvent::Saved => "message.saved",
                MessageEvent::Deleted => "message.deleted",
                MessageEvent::RejectedByHook => "message.rejected-by-hook",
                MessageEvent::EuidReplaced => "message.euid-replaced",
                MessageEvent::AlreadySeen => "message.already-seen",
                MessageEvent::JournalQueued => "message.journal-queued",
                MessageEvent::JournalDelivered => "message.journal-delivered",
                MessageEvent::JournalError => "message.journal-error",
            },
        }
    }

    pub fn level(&self) -> Level {
        match self {
            EventType::Server(e) => match e {
                ServerEvent::Startup | ServerEvent::Shutdown | ServerEvent::WatcherRestart => {
                    Level::Info
                }
                ServerEvent::StartupError => Level::Error,
                ServerEvent::CrashRecovered => Level::Warn,
                ServerEvent::SignalReceived => Level::Info,
            },
            EventType::Store(e) => match e {
                StoreEvent::ReadError
                | StoreEvent::WriteError
                | StoreEvent::DataCorruption
                | StoreEvent::UnexpectedError
                | StoreEvent::RecoveryFailed => Level::Error,
                StoreEvent::DeadlockRetry | StoreEvent::RecoveryAttempt => Level::Warn,
                StoreEvent::NotFound | StoreEvent::NotConfigured => Level::Debug,
                StoreEvent::Checkpoint | StoreEvent::Compact | StoreEvent::RefcountApplied => {
                    Level::Debug
                }
                StoreEvent::LegacyMigration => Level::Info,
            },
            EventType::Config(e) => match e {
                ConfigEvent::BuildError | ConfigEvent::InvalidValue => Level::Error,
                ConfigEvent::MissingSetting => Level::Warn,
                ConfigEvent::DefaultApplied => Level::Debug,
                ConfigEvent::MigratedControlRecord => Level::Info,
            },
            EventType::Network(e) => match e {
                NetworkEvent::BindError | NetworkEvent::AcceptError => Level::Error,
                NetworkEvent::ListenStart | NetworkEvent::ListenStop => Level::Info,
                NetworkEvent::TooManySessions => Level::Warn,
                _ => Level::Debug,
            },
            EventType::Session(e) => match e {
                SessionEvent::IdleReap | SessionEvent::Terminated => Level::Info,
                SessionEvent::Login | SessionEvent::Logout => Level::Info,
                SessionEvent::SingleUserEngaged | SessionEvent::SingleUserReleased => Level::Warn,
                _ => Level::Debug,
            },
            EventType::Auth(e) => match e {
                AuthEvent::Failed | AuthEvent::NoSuchUser => Level::Info,
                AuthEvent::ChkpwdError | AuthEvent::LdapError | AuthEvent::Error => Level::Error,
                AuthEvent::Success | AuthEvent::LdapSync => Level::Debug,
                AuthEvent::AlreadyLoggedIn => Level::Info,
            },
            EventType::Tls(e) => match e {
                TlsEvent::HandshakeError | TlsEvent::CertificateReadError => Level::Warn,
                TlsEvent::CertificateGenerated | TlsEvent::CertificateReloaded => Level::Info,
                TlsEvent::NotConfigured => Level::Debug,
            },
            EventType::Queue(e) => match e {
                QueueEvent::AttemptPermFail | QueueEvent::MxLookupFailed => Level::Warn,
                QueueEvent::BounceSent | QueueEvent::DelayWarningSent | QueueEvent::Expired => {
                    Level::Info
                }
                _ => Level::Debug,
            },
            EventType::Housekeeper(e) => match e {
                HousekeeperEvent::Stuck => Level::Warn,
                HousekeeperEvent::Start
                | HousekeeperEvent::Stop
                | HousekeeperEvent::Disabled
                | HousekeeperEvent::Enabled => Level::Info,
                _ => Level::Debug,
            },
            EventType::Purge(e) => match e {
                PurgeEvent::CorruptRecord => Level::Warn,
                PurgeEvent::Started | PurgeEvent::Finished => Level::Info,
                _ => Level::Debug,
            },
            EventType::Message(e) => match e {
                MessageEvent::RejectedByHook | MessageEvent::JournalError => Level::Warn,
                _ => Level::Debug,
            },
        }
    }
}
