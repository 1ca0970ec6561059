/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use trc::EventExt;

/// Little-endian record writer shared by every table codec. Strings are
/// u32-length-prefixed UTF-8; growing a record means appending fields,
/// which old decoders must tolerate missing.
#[derive(Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

pub struct Decoder<'x> {
    buf: &'x [u8],
    pos: usize,
}

impl Encoder {
    pub fn new(capacity: usize) -> Self {
        Encoder {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u8(mut self, value: u8) -> Self {
        self.buf.push(value);
        self
    }

    pub fn put_u16(mut self, value: u16) -> Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn put_u32(mut self, value: u32) -> Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn put_u64(mut self, value: u64) -> Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn put_i32(mut self, value: i32) -> Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn put_i64(mut self, value: i64) -> Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn put_str(mut self, value: &str) -> Self {
        self.buf
            .extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(value.as_bytes());
        self
    }

    pub fn put_bytes(mut self, value: &[u8]) -> Self {
        self.buf
            .extend_from_slice(&(value.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(value);
        self
    }

    pub fn finalize(self) -> Vec<u8> {
        self.buf
    }
}

fn corrupt() -> trc::Error {
    trc::StoreEvent::DataCorruption.details("record shorter than its codec expects")
}

impl<'x> Decoder<'x> {
    pub fn new(buf: &'x [u8]) -> Self {
        Decoder { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> trc::Result<&'x [u8]> {
        let slice = self
            .buf
            .get(self.pos..self.pos + len)
            .ok_or_else(corrupt)?;
        self.pos += len;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> trc::Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> trc::Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    pub fn get_u32(&mut self) -> trc::Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn get_u64(&mut self) -> trc::Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn get_i32(&mut self) -> trc::Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn get_i64(&mut self) -> trc::Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn get_str(&mut self) -> trc::Result<String> {
        let len = self.get_u32()? as usize;
        String::from_utf8(self.take(len)?.to_vec()).map_err(|_| corrupt())
    }

    pub fn get_bytes(&mut self) -> trc::Result<Vec<u8>> {
        let len = self.get_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Optional trailing field: absent on records written by older codecs.
    pub fn get_u64_or(&mut self, default: u64) -> u64 {
        if self.remaining() >= 8 {
            self.get_u64().unwrap_or(default)
        } else {
            default
        }
    }

    pub fn get_str_or_default(&mut self) -> String {
        if self.remaining() >= 4 {
            self.get_str().unwrap_or_default()
        } else {
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        let buf = Encoder::new(64)
            .put_u8(7)
            .put_u32(0xDEAD_BEEF)
            .put_i64(-42)
            .put_str("Guybrush Threepwood")
            .put_bytes(b"\x00\x01\x02")
            .finalize();
        let mut dec = Decoder::new(&buf);
        assert_eq!(dec.get_u8().unwrap(), 7);
        assert_eq!(dec.get_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(dec.get_i64().unwrap(), -42);
        assert_eq!(dec.get_str().unwrap(), "Guybrush Threepwood");
        assert_eq!(dec.get_bytes().unwrap(), b"\x00\x01\x02");
        assert_eq!(dec.remaining(), 0);
    }

    #[test]
    fn truncated_string_is_an_error() {
        let mut buf = Encoder::new(16).put_str("hello world").finalize();
        buf.truncate(buf.len() - 3);
        let mut dec = Decoder::new(&buf);
        assert!(dec.get_str().is_err());
    }

    #[test]
    fn missing_trailing_field_defaults() {
        let buf = Encoder::new(8).put_u32(1).finalize();
        let mut dec = Decoder::new(&buf);
        dec.get_u32().unwrap();
        assert_eq!(dec.get_u64_or(99), 99);
        assert_eq!(dec.get_str_or_default(), "");
    }
}
