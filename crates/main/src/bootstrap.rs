/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use crate::{
    EXIT_AUTH_MODE, EXIT_CRYPTO, EXIT_DB_INIT, EXIT_NORMAL, EXIT_SANITY, EXIT_UID, ServerArgs,
};
use common::{
    AIDEROOM, BASEROOM, BuildServer, Core, Data, IPC_CHANNEL_BUFFER, Inner, QR_PERMANENT,
    QR2_SYSTEM, SYSCONFIGROOM, Server,
    config::ConfigCache,
    dirs::CitadelDirs,
    ipc::{HousekeeperEvent, Ipc, JournalQueue, QueueEvent, RefcountQueue},
    listener::{self, tls::TlsManager},
    registry::{HookEvent, ServiceRegistry},
};
use directory::AuthService;
use rooms::{FloorDir, FloorRecord, RoomDir, RoomType};
use services::housekeeper::SpawnHousekeeper;
use smtp::queue::manager::SpawnQueue;
use std::{
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI64, AtomicU64},
    },
};
use store::Store;
use tokio::sync::{mpsc, watch};

pub async fn run_server(args: ServerArgs) -> ExitCode {
    let dirs = CitadelDirs::new(&args.home);
    if let Err(err) = dirs.create_all() {
        eprintln!("citserver: cannot prepare directories: {err}");
        return ExitCode::from(crate::EXIT_HOME_MISSING);
    }

    // A lock file still naming a pid means the previous run never shut
    // down cleanly.
    let crashed_pid = read_stale_lock(&dirs);
    let _ = std::fs::write(dirs.lock_file(), format!("{}\n", std::process::id()));

    let storage = match Store::open(dirs.data.clone()).await {
        Ok(storage) => storage,
        Err(err) => {
            trc::error!(err.details("database initialization failed"));
            return ExitCode::from(EXIT_DB_INIT);
        }
    };

    let config = match ConfigCache::load(storage.clone()).await {
        Ok(config) => Arc::new(config),
        Err(err) => {
            trc::error!(err.details("cannot load configuration"));
            return ExitCode::from(EXIT_DB_INIT);
        }
    };
    if let Err(err) = config.migrate_legacy_control_record(&dirs).await {
        trc::error!(err.details("legacy control record migration failed"));
    }
    if let Err(err) = config.validate_defaults().await {
        trc::error!(err.details("configuration validation failed"));
        return ExitCode::from(crate::EXIT_CONFIG);
    }

    if let Some(mode) = &args.sanity_mode {
        return sanity_check(&storage, mode).await;
    }

    let tls = match TlsManager::bootstrap(&dirs) {
        Ok(tls) => Arc::new(tls),
        Err(err) => {
            trc::error!(err.details("TLS bootstrap failed"));
            return ExitCode::from(EXIT_CRYPTO);
        }
    };

    let refcount_queue = match RefcountQueue::open(dirs.refcount_queue_file()) {
        Ok(queue) => queue,
        Err(err) => {
            trc::error!(err.details("cannot open refcount queue"));
            return ExitCode::from(EXIT_DB_INIT);
        }
    };

    let (housekeeper_tx, housekeeper_rx) = mpsc::channel(IPC_CHANNEL_BUFFER);
    let (queue_tx, queue_rx) = mpsc::channel(IPC_CHANNEL_BUFFER);
    let (shutdown_tx, _) = watch::channel(false);

    let bootstrap_core = Core {
        storage: storage.clone(),
        config: config.clone(),
        registry: Arc::new(ServiceRegistry::default()),
        tls: tls.clone(),
        dirs: dirs.clone(),
    };
    let inner = Arc::new(Inner {
        shared_core: Arc::new(arc_swap::ArcSwap::from_pointee(bootstrap_core.clone())),
        data: Data {
            sessions: Default::default(),
            session_id_gen: AtomicU64::new(1),
            single_user: Default::default(),
            refcount_queue,
            journal_queue: JournalQueue::default(),
            shutdown_tx,
            housekeeper_busy: AtomicBool::new(false),
            housekeeper_disabled: AtomicBool::new(false),
            housekeeper_last_run: AtomicU64::new(0),
            last_purge_run: AtomicU64::new(0),
            queue_last_job_submitted: AtomicI64::new(0),
            queue_last_job_processed: AtomicI64::new(0),
            server_start_time: store::now(),
        },
        ipc: Ipc {
            housekeeper_tx: housekeeper_tx.clone(),
            queue_tx: queue_tx.clone(),
        },
    });
    let bootstrap_server = inner.build_server();

    let auth = match AuthService::build(&bootstrap_server) {
        Ok(auth) => Arc::new(auth),
        Err(err) => {
            trc::error!(err.details("unsupported authentication mode"));
            return ExitCode::from(EXIT_AUTH_MODE);
        }
    };

    if let Err(err) = create_base_rooms(&bootstrap_server).await {
        trc::error!(err.details("cannot create base rooms"));
        return ExitCode::from(EXIT_DB_INIT);
    }
    if let Err(err) = smtp::init_spoolout(&bootstrap_server).await {
        trc::error!(err.details("cannot create spool-out room"));
        return ExitCode::from(EXIT_DB_INIT);
    }

    // Static module registration, then freeze the hook tables.
    let mut registry = ServiceRegistry::default();
    citproto::register(&mut registry, &bootstrap_server, auth.clone());
    smtp::SmtpClientModule::register(&mut registry);
    registry.register_user_hook(Arc::new(services::NewUserNotifier));
    inner.shared_core.store(Arc::new(Core {
        registry: Arc::new(registry),
        ..bootstrap_core
    }));
    let server = inner.build_server();

    if let Some(pid) = crashed_pid {
        services::post_crash_notice(&server, pid).await;
    }

    let bind_errors = listener::listen::spawn_services(&inner, tls.clone()).await;
    if !bind_errors.is_empty() {
        let text = format!(
            "The following services could not be started:\n\n{}\n",
            bind_errors.join("\n")
        );
        if let Err(err) = services::aide_message(&server, "Startup problems", &text).await {
            trc::error!(err.details("cannot post startup error notice"));
        }
    }

    // Sockets are bound; root is no longer needed.
    if !args.keep_root {
        if let Some(identity) = &args.run_as_user {
            if let Err(reason) = drop_privileges(identity) {
                eprintln!("citserver: {reason}");
                return ExitCode::from(EXIT_UID);
            }
        }
    }

    housekeeper_rx.spawn(inner.clone(), auth.clone());
    queue_rx.spawn(inner.clone());

    trc::event!(
        Server(trc::ServerEvent::Startup),
        Details = common::DAEMON_NAME,
        Path = dirs.home.to_string_lossy().into_owned(),
    );

    wait_for_shutdown(&server).await;
    graceful_shutdown(&server, housekeeper_tx, queue_tx).await;

    let _ = std::fs::remove_file(dirs.lock_file());
    ExitCode::from(EXIT_NORMAL)
}

/// Lobby, Aide and the system configuration room exist on every server;
/// floor zero anchors them.
async fn create_base_rooms(server: &Server) -> trc::Result<()> {
    let floor = server.get_floor(0).await?;
    if floor.name.is_empty() {
        server
            .put_floor(
                0,
                &FloorRecord {
                    name: "Main Floor".to_string(),
                    flags: rooms::F_INUSE,
                    ..Default::default()
                },
            )
            .await?;
    }

    for (name, system) in [(BASEROOM, false), (AIDEROOM, false), (SYSCONFIGROOM, true)] {
        server
            .create_room(name, RoomType::Public, "", 0, common::VIEW_BBS)
            .await?;
        if let Some(mut room) = server.get_room(name).await? {
            let mut dirty = false;
            if room.flags & QR_PERMANENT == 0 {
                room.flags |= QR_PERMANENT;
                dirty = true;
            }
            if system && room.flags2 & QR2_SYSTEM == 0 {
                room.flags2 |= QR2_SYSTEM;
                dirty = true;
            }
            if dirty {
                server.put_room(&room).await?;
            }
        }
    }

    server.check_ref_counts().await
}

fn read_stale_lock(dirs: &CitadelDirs) -> Option<u32> {
    let pid: u32 = std::fs::read_to_string(dirs.lock_file())
        .ok()?
        .trim()
        .parse()
        .ok()?;
    (pid != std::process::id()).then_some(pid)
}

async fn sanity_check(storage: &Store, mode: &str) -> ExitCode {
    let verdict = match mode {
        "db" | "full" => storage.checkpoint().await.is_ok(),
        _ => true,
    };
    if verdict {
        println!("citserver: sanity check passed");
        ExitCode::from(EXIT_NORMAL)
    } else {
        eprintln!("citserver: sanity check failed");
        ExitCode::from(EXIT_SANITY)
    }
}

fn drop_privileges(identity: &str) -> Result<(), String> {
    let (uid, gid) = if let Ok(uid) = identity.parse::<u32>() {
        (uid, uid)
    } else {
        let name = std::ffi::CString::new(identity).map_err(|_| "invalid user name")?;
        let pw = unsafe { libc::getpwnam(name.as_ptr()) };
        if pw.is_null() {
            return Err(format!("could not determine uid for {identity}"));
        }
        unsafe { ((*pw).pw_uid, (*pw).pw_gid) }
    };
    if unsafe { libc::setgid(gid) } != 0 {
        return Err(format!("setgid({gid}) failed"));
    }
    if unsafe { libc::setuid(uid) } != 0 {
        return Err(format!("setuid({uid}) failed"));
    }
    Ok(())
}

async fn wait_for_shutdown(server: &Server) {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigint = signal(SignalKind::interrupt()).expect("signal handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("signal handler");
    let mut sighup = signal(SignalKind::hangup()).expect("signal handler");
    let mut shutdown_rx = server.inner.data.shutdown_tx.subscribe();

    let signal_name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sighup.recv() => "SIGHUP",
        _ = shutdown_rx.changed() => {
            // An administrator issued DOWN.
            return;
        }
    };
    trc::event!(
        Server(trc::ServerEvent::SignalReceived),
        Details = signal_name,
    );
    server.shutdown();
}

async fn graceful_shutdown(
    server: &Server,
    housekeeper_tx: mpsc::Sender<HousekeeperEvent>,
    queue_tx: mpsc::Sender<QueueEvent>,
) {
    server.run_session_hooks(HookEvent::Shutdown, None).await;
    server.terminate_all_sessions();
    let _ = queue_tx.send(QueueEvent::Stop).await;
    let _ = housekeeper_tx.send(HousekeeperEvent::Exit).await;

    // Give sessions a moment to notice before the final checkpoint.
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    if let Err(err) = message::refcount::run_refcount_reducer(server).await {
        trc::error!(err.details("final refcount drain failed"));
    }
    if let Err(err) = server.store().checkpoint().await {
        trc::error!(err.details("final checkpoint failed"));
    }
    server.store().close().await;
    trc::event!(Server(trc::ServerEvent::Shutdown));
}
