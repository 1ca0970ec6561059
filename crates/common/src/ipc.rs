/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    fs::{File, OpenOptions},
    io::{Read, Write},
    path::PathBuf,
};
use tokio::sync::mpsc;
use trc::EventExt;

pub struct Ipc {
    pub housekeeper_tx: mpsc::Sender<HousekeeperEvent>,
    pub queue_tx: mpsc::Sender<QueueEvent>,
}

#[derive(Debug)]
pub enum HousekeeperEvent {
    Wakeup,
    RunPurge,
    Exit,
}

#[derive(Debug)]
pub enum QueueEvent {
    /// A new job was spooled; run a quick pass.
    Refresh,
    /// Per-minute full pass.
    FullRun,
    Stop,
}

/// The append-only ledger of per-message reference deltas
/// (`refcount_adjustments.dat`). Writers append `{msgnum: i64, delta: i32}`
/// pairs; a single reducer periodically takes the whole file and applies the
/// net deltas.
pub struct RefcountQueue {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

const REFCOUNT_ENTRY_LEN: usize = 12;

impl RefcountQueue {
    pub fn open(path: PathBuf) -> trc::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| {
                trc::StoreEvent::UnexpectedError
                    .caused_by(trc::location!())
                    .reason(err)
            })?;
        Ok(RefcountQueue {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    pub fn enqueue(&self, msgnum: i64, delta: i32) -> trc::Result<()> {
        let mut entry = [0u8; REFCOUNT_ENTRY_LEN];
        entry[0..8].copy_from_slice(&msgnum.to_le_bytes());
        entry[8..12].copy_from_slice(&delta.to_le_bytes());
        let mut guard = self.file.lock();
        if let Some(file) = guard.as_mut() {
            file.write_all(&entry).map_err(|err| {
                trc::StoreEvent::WriteError
                    .caused_by(trc::location!())
                    .reason(err)
            })
        } else {
            Err(trc::StoreEvent::NotConfigured.into_err())
        }
    }

    /// Swap the live file out and hand every queued delta to the reducer.
    /// A `.process` file left behind by a crash is picked up first, so no
    /// delta is ever lost or double-applied after the reducer deletes it.
    pub fn drain(&self) -> trc::Result<Vec<(i64, i32)>> {
        let process_path = self.path.with_extension("process");

        if !process_path.exists() {
            let mut guard = self.file.lock();
            let has_data = std::fs::metadata(&self.path).map_or(0, |m| m.len()) > 0;
            if !has_data {
                return Ok(Vec::new());
            }
            *guard = None;
            std::fs::rename(&self.path, &process_path).map_err(|err| {
                trc::StoreEvent::UnexpectedError
                    .caused_by(trc::location!())
                    .reason(err)
            })?;
            *guard = Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
                    .map_err(|err| {
                        trc::StoreEvent::UnexpectedError
                            .caused_by(trc::location!())
                            .reason(err)
                    })?,
            );
        }

        let mut raw = Vec::new();
        File::open(&process_path)
            .and_then(|mut f| f.read_to_end(&mut raw))
            .map_err(|err| {
                trc::StoreEvent::ReadError
                    .caused_by(trc::location!())
                    .reason(err)
            })?;

        let mut entries = Vec::with_capacity(raw.len() / REFCOUNT_ENTRY_LEN);
        for chunk in raw.chunks_exact(REFCOUNT_ENTRY_LEN) {
            entries.push((
                i64::from_le_bytes(chunk[0..8].try_into().unwrap()),
                i32::from_le_bytes(chunk[8..12].try_into().unwrap()),
            ));
        }
        Ok(entries)
    }

    /// Called by the reducer once the drained deltas have been applied.
    pub fn commit_drain(&self) -> trc::Result<()> {
        let process_path = self.path.with_extension("process");
        if process_path.exists() {
            std::fs::remove_file(&process_path).map_err(|err| {
                trc::StoreEvent::UnexpectedError
                    .caused_by(trc::location!())
                    .reason(err)
            })?;
        }
        Ok(())
    }
}

/// A journal capture taken at save time: the rendered rfc822 form plus the
/// recipient set, kept in memory until the housekeeper drains it.
pub struct JournalEntry {
    pub sender: String,
    pub sender_email: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub rfc822: Vec<u8>,
    pub submitted: u64,
}

#[derive(Default)]
pub struct JournalQueue {
    entries: Mutex<VecDeque<JournalEntry>>,
}

impl JournalQueue {
    pub fn push(&self, entry: JournalEntry) {
        self.entries.lock().push_back(entry);
    }

    pub fn pop(&self) -> Option<JournalEntry> {
        self.entries.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::RefcountQueue;

    #[test]
    fn refcount_queue_round_trip() {
        let dir = std::env::temp_dir().join(format!("refq-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let queue = RefcountQueue::open(dir.join("refcount_adjustments.dat")).unwrap();
        queue.enqueue(100, 1).unwrap();
        queue.enqueue(100, 1).unwrap();
        queue.enqueue(200, -1).unwrap();

        let drained = queue.drain().unwrap();
        assert_eq!(drained, vec![(100, 1), (100, 1), (200, -1)]);
        queue.commit_drain().unwrap();

        // Entries written after the swap surface on the next drain.
        queue.enqueue(300, 1).unwrap();
        let drained = queue.drain().unwrap();
        assert_eq!(drained, vec![(300, 1)]);
        queue.commit_drain().unwrap();
        std::fs::remove_dir_all(&dir).ok();
    }
}
