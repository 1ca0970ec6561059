/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use crate::{Error, EventType, Key, Level, Value, serializer::format_event};
use ahash::AHashMap;
use parking_lot::RwLock;
use std::{
    io::Write,
    os::unix::net::UnixDatagram,
    sync::atomic::{AtomicU8, Ordering},
};

static MAX_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);
static OVERRIDES: RwLock<Option<AHashMap<EventType, Level>>> = RwLock::new(None);
static SYSLOG: RwLock<Option<SyslogSink>> = RwLock::new(None);

pub struct Collector;

struct SyslogSink {
    socket: UnixDatagram,
    facility: u8,
    ident: &'static str,
}

impl Collector {
    /// Raise or lower the process-wide maximum level. Events above it are
    /// dropped before their context is built.
    pub fn set_max_level(level: Level) {
        MAX_LEVEL.store(level as u8, Ordering::Relaxed);
    }

    pub fn max_level() -> Level {
        match MAX_LEVEL.load(Ordering::Relaxed) {
            0 => Level::Disable,
            1 => Level::Error,
            2 => Level::Warn,
            3 => Level::Info,
            4 => Level::Debug,
            _ => Level::Trace,
        }
    }

    pub fn set_level(event: EventType, level: Level) {
        OVERRIDES
            .write()
            .get_or_insert_with(AHashMap::new)
            .insert(event, level);
    }

    /// Route a copy of every accepted event to the local syslog socket.
    pub fn attach_syslog(facility: u8, ident: &'static str) {
        if let Ok(socket) = UnixDatagram::unbound() {
            if socket.connect("/dev/log").is_ok() {
                *SYSLOG.write() = Some(SyslogSink {
                    socket,
                    facility,
                    ident,
                });
            }
        }
    }

    pub fn has_interest(event: EventType) -> bool {
        let level = OVERRIDES
            .read()
            .as_ref()
            .and_then(|o| o.get(&event).copied())
            .unwrap_or_else(|| event.level());
        level != Level::Disable && level <= Self::max_level()
    }

    pub fn record(event: EventType, keys: Vec<(Key, Value)>) {
        let level = event.level();
        let line = format_event(level, event, &keys);
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.write_all(b"\n");
        drop(stderr);

        if let Some(sink) = SYSLOG.read().as_ref() {
            let severity = match level {
                Level::Error => 3u8,
                Level::Warn => 4,
                Level::Info => 6,
                _ => 7,
            };
            let pri = (sink.facility << 3) | severity;
            let msg = format!("<{pri}>{}: {line}", sink.ident);
            let _ = sink.socket.send(msg.as_bytes());
        }
    }

    pub fn record_error(err: &Error) {
        if Self::has_interest(err.inner) {
            Self::record(err.inner, err.keys.clone());
        }
    }
}
