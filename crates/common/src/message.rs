/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use trc::EventExt;

pub const START_OF_MESSAGE: u8 = 0xFF;

// Anonymous-type byte.
pub const MES_NORMAL: u8 = 65;
pub const MES_ANONONLY: u8 = 66;
pub const MES_ANONOPT: u8 = 67;

// Format-type byte.
pub const FMT_CITADEL: u8 = 0;
pub const FMT_FIXED: u8 = 1;
pub const FMT_RFC822: u8 = 4;

// One-byte field tags. Every field value is a NUL-terminated UTF-8 string.
pub const F_AUTHOR: u8 = b'A';
pub const F_BIG_BODY: u8 = b'B';
pub const F_EUID: u8 = b'E';
pub const F_RFC822_ADDR: u8 = b'F';
pub const F_MSGID: u8 = b'I';
pub const F_JOURNAL: u8 = b'J';
pub const F_REPLY_TO: u8 = b'K';
pub const F_LIST_ID: u8 = b'L';
pub const F_BODY: u8 = b'M';
pub const F_ROOM: u8 = b'O';
pub const F_PATH: u8 = b'P';
pub const F_RECIPIENT: u8 = b'R';
pub const F_TIMESTAMP: u8 = b'T';
pub const F_SUBJECT: u8 = b'U';
pub const F_ENVELOPE_TO: u8 = b'V';
pub const F_REFERENCES: u8 = b'W';
pub const F_CC: u8 = b'Y';

/// A message as a sequence of typed fields, in storage order. Fields may
/// repeat (recipients, cc); accessors return the first occurrence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CtdlMessage {
    pub anon_type: u8,
    pub format_type: u8,
    pub fields: Vec<(u8, String)>,
}

impl CtdlMessage {
    pub fn new() -> Self {
        CtdlMessage {
            anon_type: MES_NORMAL,
            format_type: FMT_CITADEL,
            fields: Vec::with_capacity(8),
        }
    }

    pub fn get(&self, tag: u8) -> Option<&str> {
        self.fields
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, tag: u8) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(move |(t, _)| *t == tag)
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, tag: u8, value: impl Into<String>) {
        let value = value.into();
        if let Some(slot) = self.fields.iter_mut().find(|(t, _)| *t == tag) {
            slot.1 = value;
        } else {
            self.fields.push((tag, value));
        }
    }

    pub fn append(&mut self, tag: u8, value: impl Into<String>) {
        self.fields.push((tag, value.into()));
    }

    pub fn remove(&mut self, tag: u8) -> Option<String> {
        let pos = self.fields.iter().position(|(t, _)| *t == tag)?;
        Some(self.fields.remove(pos).1)
    }

    pub fn author(&self) -> &str {
        self.get(F_AUTHOR).unwrap_or("")
    }

    pub fn subject(&self) -> Option<&str> {
        self.get(F_SUBJECT)
    }

    pub fn body(&self) -> Option<&str> {
        self.get(F_BODY)
    }

    pub fn euid(&self) -> Option<&str> {
        self.get(F_EUID)
    }

    pub fn timestamp(&self) -> u64 {
        self.get(F_TIMESTAMP)
            .and_then(|t| t.parse().ok())
            .unwrap_or(0)
    }

    pub fn has_big_body(&self) -> bool {
        self.get(F_BIG_BODY).is_some()
    }

    /// Serialize into the on-disk form: a start byte, the anon and format
    /// types, then each field as tag + NUL-terminated string.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            3 + self
                .fields
                .iter()
                .map(|(_, v)| v.len() + 2)
                .sum::<usize>(),
        );
        buf.push(START_OF_MESSAGE);
        buf.push(self.anon_type);
        buf.push(self.format_type);
        for (tag, value) in &self.fields {
            buf.push(*tag);
            buf.extend_from_slice(value.as_bytes());
            buf.push(0);
        }
        buf
    }

    pub fn decode(raw: &[u8]) -> trc::Result<Self> {
        let corrupt = || {
            trc::StoreEvent::DataCorruption.details("malformed message record")
        };
        if raw.len() < 3 || raw[0] != START_OF_MESSAGE {
            return Err(corrupt());
        }
        let mut msg = CtdlMessage {
            anon_type: raw[1],
            format_type: raw[2],
            fields: Vec::with_capacity(8),
        };
        let mut pos = 3;
        while pos < raw.len() {
            let tag = raw[pos];
            pos += 1;
            let end = raw[pos..]
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(corrupt)?;
            let value = std::str::from_utf8(&raw[pos..pos + end])
                .map_err(|_| corrupt())?
                .to_string();
            msg.fields.push((tag, value));
            pos += end + 1;
        }
        Ok(msg)
    }
}

/// Parsed recipient classification for a submission.
#[derive(Debug, Clone, Default)]
pub struct RecipientSet {
    pub recp_local: Vec<String>,
    pub recp_internet: Vec<String>,
    pub recp_room: Vec<String>,
    pub bounce_to: String,
    pub envelope_from: Option<String>,
    pub sending_room: Option<String>,
    pub display_recp: String,
    pub num_error: i32,
}

impl RecipientSet {
    pub fn num_internet(&self) -> usize {
        self.recp_internet.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recp_local.is_empty() && self.recp_internet.is_empty() && self.recp_room.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let mut msg = CtdlMessage::new();
        msg.set(F_AUTHOR, "alice");
        msg.set(F_SUBJECT, "hello");
        msg.set(F_TIMESTAMP, "1700000000");
        msg.append(F_RECIPIENT, "bob");
        msg.append(F_RECIPIENT, "carol");
        msg.set(F_BODY, "line one\nline two\n");

        let decoded = CtdlMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.get_all(F_RECIPIENT).count(), 2);
        assert_eq!(decoded.timestamp(), 1_700_000_000);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(CtdlMessage::decode(b"").is_err());
        assert!(CtdlMessage::decode(b"\x01\x41\x00").is_err());
        // Unterminated field value.
        assert!(CtdlMessage::decode(&[START_OF_MESSAGE, MES_NORMAL, FMT_CITADEL, b'A', b'x']).is_err());
    }
}
