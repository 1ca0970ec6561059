/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

pub mod msgflow;
pub mod purge;
pub mod queue;
pub mod roomdir;
pub mod store_ops;
pub mod userdir;

use common::{
    Core, Data, IPC_CHANNEL_BUFFER, Inner, Server,
    config::ConfigCache,
    dirs::CitadelDirs,
    ipc::{Ipc, JournalQueue, RefcountQueue},
    listener::tls::TlsManager,
    registry::ServiceRegistry,
};
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicI64, AtomicU64},
};
use store::Store;
use tokio::sync::{mpsc, watch};

/// Stand up a complete server over a scratch directory. The ignored
/// receivers keep the IPC channels open so modules can fire events.
pub struct TestServer {
    pub server: Server,
    pub home: std::path::PathBuf,
    _housekeeper_rx: mpsc::Receiver<common::ipc::HousekeeperEvent>,
    _queue_rx: mpsc::Receiver<common::ipc::QueueEvent>,
}

impl TestServer {
    pub async fn new(tag: &str, build_registry: impl FnOnce(&mut ServiceRegistry)) -> TestServer {
        let home = std::env::temp_dir().join(format!(
            "citadel-test-{tag}-{}-{}",
            std::process::id(),
            store::now(),
        ));
        let _ = std::fs::remove_dir_all(&home);
        std::fs::create_dir_all(&home).unwrap();

        let dirs = CitadelDirs::new(&home);
        dirs.create_all().unwrap();

        let storage = Store::open(dirs.data.clone()).await.unwrap();
        let config = Arc::new(ConfigCache::load(storage.clone()).await.unwrap());
        config.validate_defaults().await.unwrap();

        let tls = Arc::new(TlsManager::bootstrap(&dirs).unwrap());
        let refcount_queue = RefcountQueue::open(dirs.refcount_queue_file()).unwrap();

        let (housekeeper_tx, housekeeper_rx) = mpsc::channel(IPC_CHANNEL_BUFFER);
        let (queue_tx, queue_rx) = mpsc::channel(IPC_CHANNEL_BUFFER);
        let (shutdown_tx, _) = watch::channel(false);

        let mut registry = ServiceRegistry::default();
        build_registry(&mut registry);

        let inner = Arc::new(Inner {
            shared_core: Arc::new(arc_swap::ArcSwap::from_pointee(Core {
                storage,
                config,
                registry: Arc::new(registry),
                tls,
                dirs,
            })),
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
                housekeeper_tx,
                queue_tx,
            },
        });

        TestServer {
            server: common::BuildServer::build_server(&inner),
            home,
            _housekeeper_rx: housekeeper_rx,
            _queue_rx: queue_rx,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.home);
    }
}
