/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

pub mod backend;
pub mod codec;
pub mod compress;

use backend::sqlite::SqliteStore;
use std::time::SystemTime;
use trc::EventExt;

pub use rand;
pub use xxhash_rust;

pub const U16_LEN: usize = std::mem::size_of::<u16>();
pub const U32_LEN: usize = std::mem::size_of::<u32>();
pub const U64_LEN: usize = std::mem::size_of::<u64>();

/// The fixed table set. Ids are part of the on-disk layout and the
/// migration wire format; never renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Table {
    MsgMain = 0,
    Users = 1,
    Rooms = 2,
    FloorTab = 3,
    MsgLists = 4,
    Visit = 5,
    Directory = 6,
    UseTable = 7,
    BigMsgs = 8,
    FullText = 9,
    EuidIndex = 10,
    UsersByNumber = 11,
    ExtAuth = 12,
    Config = 13,
}

impl Table {
    pub const ALL: [Table; 14] = [
        Table::MsgMain,
        Table::Users,
        Table::Rooms,
        Table::FloorTab,
        Table::MsgLists,
        Table::Visit,
        Table::Directory,
        Table::UseTable,
        Table::BigMsgs,
        Table::FullText,
        Table::EuidIndex,
        Table::UsersByNumber,
        Table::ExtAuth,
        Table::Config,
    ];

    pub fn id(&self) -> u8 {
        *self as u8
    }

    pub fn from_id(id: u8) -> Option<Table> {
        Table::ALL.get(id as usize).copied()
    }

    pub(crate) fn sql_name(&self) -> &'static str {
        match self {
            Table::MsgMain => "msgmain",
            Table::Users => "users",
            Table::Rooms => "rooms",
            Table::FloorTab => "floortab",
            Table::MsgLists => "msglists",
            Table::Visit => "visit",
            Table::Directory => "directory",
            Table::UseTable => "usetable",
            Table::BigMsgs => "bigmsgs",
            Table::FullText => "fulltext",
            Table::EuidIndex => "euidindex",
            Table::UsersByNumber => "usersbynumber",
            Table::ExtAuth => "extauth",
            Table::Config => "config",
        }
    }

    /// Visit and use-table rows are bulky and repetitive; they are the only
    /// tables stored compressed.
    pub(crate) fn is_compressed(&self) -> bool {
        matches!(self, Table::Visit | Table::UseTable)
    }
}

#[derive(Clone)]
pub enum Store {
    Sqlite(SqliteStore),
    None,
}

/// Bounds for a range scan. Both ends are inclusive.
pub struct ScanParams {
    pub table: Table,
    pub from: Vec<u8>,
    pub to: Vec<u8>,
    pub ascending: bool,
    pub values: bool,
    pub limit: usize,
}

impl ScanParams {
    pub fn new(table: Table) -> Self {
        ScanParams {
            table,
            from: Vec::new(),
            to: vec![0xFF; 32],
            ascending: true,
            values: true,
            limit: usize::MAX,
        }
    }

    pub fn range(mut self, from: impl Into<Vec<u8>>, to: impl Into<Vec<u8>>) -> Self {
        self.from = from.into();
        self.to = to.into();
        self
    }

    pub fn prefix(mut self, prefix: &[u8]) -> Self {
        self.from = prefix.to_vec();
        self.to = prefix.to_vec();
        self.to.extend_from_slice(&[0xFF; 16]);
        self
    }

    pub fn descending(mut self) -> Self {
        self.ascending = false;
        self
    }

    pub fn no_values(mut self) -> Self {
        self.values = false;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

impl Store {
    pub async fn open(path: impl Into<std::path::PathBuf>) -> trc::Result<Self> {
        SqliteStore::open(path.into()).await.map(Store::Sqlite)
    }

    pub async fn get(&self, table: Table, key: &[u8]) -> trc::Result<Option<Vec<u8>>> {
        match self {
            Store::Sqlite(store) => store.get(table, key.to_vec()).await,
            Store::None => Err(trc::StoreEvent::NotConfigured.into_err()),
        }
    }

    pub async fn put(&self, table: Table, key: &[u8], value: &[u8]) -> trc::Result<()> {
        match self {
            Store::Sqlite(store) => store.put(table, key.to_vec(), value.to_vec()).await,
            Store::None => Err(trc::StoreEvent::NotConfigured.into_err()),
        }
    }

    /// Returns false when the key did not exist.
    pub async fn delete(&self, table: Table, key: &[u8]) -> trc::Result<bool> {
        match self {
            Store::Sqlite(store) => store.delete(table, key.to_vec()).await,
            Store::None => Err(trc::StoreEvent::NotConfigured.into_err()),
        }
    }

    pub async fn truncate(&self, table: Table) -> trc::Result<()> {
        match self {
            Store::Sqlite(store) => store.truncate(table).await,
            Store::None => Err(trc::StoreEvent::NotConfigured.into_err()),
        }
    }

    /// Collect a key range into memory. Iteration over mutable state is
    /// two-phase by construction: scan first, then write.
    pub async fn scan(&self, params: ScanParams) -> trc::Result<Vec<(Vec<u8>, Vec<u8>)>> {
        match self {
            Store::Sqlite(store) => store.scan(params).await,
            Store::None => Err(trc::StoreEvent::NotConfigured.into_err()),
        }
    }

    /// Run `f` inside a single write transaction, retrying the whole closure
    /// when the engine reports contention.
    pub async fn transaction<T, F>(&self, f: F) -> trc::Result<T>
    where
        F: FnMut(&mut Txn<'_>) -> trc::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        match self {
            Store::Sqlite(store) => store.transaction(f).await,
            Store::None => Err(trc::StoreEvent::NotConfigured.into_err()),
        }
    }

    pub async fn checkpoint(&self) -> trc::Result<()> {
        match self {
            Store::Sqlite(store) => store.checkpoint().await,
            Store::None => Err(trc::StoreEvent::NotConfigured.into_err()),
        }
    }

    /// Return free space to the filesystem.
    pub async fn compact(&self) -> trc::Result<()> {
        match self {
            Store::Sqlite(store) => store.compact().await,
            Store::None => Err(trc::StoreEvent::NotConfigured.into_err()),
        }
    }

    pub async fn close(&self) {
        if let Store::Sqlite(store) = self {
            store.close().await;
        }
    }
}

/// A handle onto an open write transaction. At most one exists per pooled
/// connection; holders must not start a second one.
pub struct Txn<'a> {
    pub(crate) tx: &'a rusqlite::Transaction<'a>,
}

pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
