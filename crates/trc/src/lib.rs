/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

pub mod collector;
pub mod event;
pub mod macros;
pub mod serializer;

pub use event::*;

use std::{borrow::Cow, fmt, time::Duration};

pub type Result<T> = std::result::Result<T, Error>;

/// A structured error: the event type that caused it plus typed context.
#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    pub inner: EventType,
    pub keys: Vec<(Key, Value)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    AccountName,
    Attempt,
    CausedBy,
    Code,
    Details,
    Due,
    Elapsed,
    Hostname,
    Id,
    Key,
    ListenerId,
    MsgNum,
    Path,
    Port,
    Protocol,
    QueueId,
    Reason,
    RemoteIp,
    RoomName,
    SessionId,
    Size,
    Table,
    Total,
    Uid,
    Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Static(&'static str),
    String(String),
    Int(i64),
    UInt(u64),
    Bool(bool),
    Duration(u64),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Disable = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl Error {
    pub fn new(inner: EventType) -> Self {
        Error {
            inner,
            keys: Vec::with_capacity(4),
        }
    }

    pub fn ctx(mut self, key: Key, value: impl Into<Value>) -> Self {
        self.keys.push((key, value.into()));
        self
    }

    pub fn details(self, details: impl Into<Value>) -> Self {
        self.ctx(Key::Details, details)
    }

    pub fn reason(self, reason: impl fmt::Display) -> Self {
        self.ctx(Key::Reason, reason.to_string())
    }

    pub fn code(self, code: impl Into<Value>) -> Self {
        self.ctx(Key::Code, code)
    }

    pub fn caused_by(self, location: &'static str) -> Self {
        self.ctx(Key::CausedBy, location)
    }

    pub fn matches(&self, inner: EventType) -> bool {
        self.inner == inner
    }

    pub fn value(&self, key: Key) -> Option<&Value> {
        self.keys.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    /// True when the underlying store operation found nothing, as opposed
    /// to having failed.
    pub fn is_not_found(&self) -> bool {
        self.matches(EventType::Store(StoreEvent::NotFound))
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.name())?;
        for (key, value) in &self.keys {
            write!(f, " {key:?}={value}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Static(v) => f.write_str(v),
            Value::String(v) => f.write_str(v),
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Duration(v) => write!(f, "{v}ms"),
            Value::Bytes(v) => write!(f, "{} bytes", v.len()),
            Value::Array(values) => {
                f.write_str("[")?;
                for (pos, value) in values.iter().enumerate() {
                    if pos > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
            Value::None => f.write_str("(none)"),
        }
    }
}

impl From<EventType> for Error {
    fn from(inner: EventType) -> Self {
        Error::new(inner)
    }
}

/// Builder methods available directly on every event enum.
pub trait EventExt: Into<EventType> + Copy {
    fn into_err(self) -> Error {
        Error::new(self.into())
    }

    fn ctx(self, key: Key, value: impl Into<Value>) -> Error {
        self.into_err().ctx(key, value)
    }

    fn details(self, details: impl Into<Value>) -> Error {
        self.into_err().details(details)
    }

    fn reason(self, reason: impl fmt::Display) -> Error {
        self.into_err().reason(reason)
    }

    fn caused_by(self, location: &'static str) -> Error {
        self.into_err().caused_by(location)
    }
}

impl<T: Into<EventType> + Copy> EventExt for T {}

/// Attach call-site context to a `trc::Result` as it propagates.
pub trait AddContext<T> {
    fn caused_by(self, location: &'static str) -> Result<T>;
    fn add_context(self, f: impl FnOnce(Error) -> Error) -> Result<T>;
}

impl<T> AddContext<T> for Result<T> {
    fn caused_by(self, location: &'static str) -> Result<T> {
        match self {
            Ok(value) => Ok(value),
            Err(err) => Err(err.caused_by(location)),
        }
    }

    fn add_context(self, f: impl FnOnce(Error) -> Error) -> Result<T> {
        match self {
            Ok(value) => Ok(value),
            Err(err) => Err(f(err)),
        }
    }
}

impl From<&'static str> for Value {
    fn from(value: &'static str) -> Self {
        Value::Static(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Cow<'static, str>> for Value {
    fn from(value: Cow<'static, str>) -> Self {
        match value {
            Cow::Borrowed(v) => Value::Static(v),
            Cow::Owned(v) => Value::String(v),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u16> for Value {
    fn from(value: u16) -> Self {
        Value::UInt(value as u64)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::UInt(value as u64)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::UInt(value)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::UInt(value as u64)
    }
}

impl From<Duration> for Value {
    fn from(value: Duration) -> Self {
        Value::Duration(value.as_millis() as u64)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::Array(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::None, Into::into)
    }
}
