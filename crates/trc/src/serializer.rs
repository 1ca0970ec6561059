/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use crate::{EventType, Key, Level, Value};
use std::fmt::Write;

pub fn format_event(level: Level, event: EventType, keys: &[(Key, Value)]) -> String {
    let mut line = String::with_capacity(80);
    let _ = write!(
        line,
        "{} {} {}",
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
        level_abbrev(level),
        event.name()
    );
    for (key, value) in keys {
        let _ = write!(line, " {key:?}={value}");
    }
    line
}

fn level_abbrev(level: Level) -> &'static str {
    match level {
        Level::Disable => "OFF  ",
        Level::Error => "ERROR",
        Level::Warn => "WARN ",
        Level::Info => "INFO ",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

#[cfg(test)]
mod tests {
    use crate::{EventType, Key, Level, StoreEvent, Value};

    #[test]
    fn event_line_contains_name_and_context() {
        let line = super::format_event(
            Level::Warn,
            EventType::Store(StoreEvent::DeadlockRetry),
            &[(Key::Attempt, Value::UInt(3))],
        );
        assert!(line.contains("store.deadlock-retry"));
        assert!(line.contains("Attempt=3"));
    }
}
