/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use trc::EventExt;

/// Marks a compressed value. Stored little-endian ahead of
/// `{uncompressed_len: u32, compressed_len: u32}` and the lz4 payload.
pub const COMPRESS_MAGIC: u32 = 0xCAFE_CAFE;

const HEADER_LEN: usize = 12;

/// Compress `data` when that helps; otherwise hand back the original so
/// short values pay no header overhead.
pub fn maybe_compress(data: &[u8]) -> Vec<u8> {
    let compressed = lz4_flex::compress(data);
    if compressed.len() + HEADER_LEN < data.len() {
        let mut out = Vec::with_capacity(compressed.len() + HEADER_LEN);
        out.extend_from_slice(&COMPRESS_MAGIC.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        out.extend_from_slice(&compressed);
        out
    } else {
        data.to_vec()
    }
}

/// Inflate a value if it carries the compression header. Values written
/// before compression was enabled pass through untouched.
pub fn maybe_decompress(data: Vec<u8>) -> trc::Result<Vec<u8>> {
    if data.len() < HEADER_LEN
        || data[0..4] != COMPRESS_MAGIC.to_le_bytes()
    {
        return Ok(data);
    }
    let uncompressed_len = u32::from_le_bytes(data[4..8].try_into().unwrap()) as usize;
    let compressed_len = u32::from_le_bytes(data[8..12].try_into().unwrap()) as usize;
    if data.len() < HEADER_LEN + compressed_len {
        return Err(trc::StoreEvent::DataCorruption
            .caused_by(trc::location!())
            .details("compressed value shorter than its header claims"));
    }
    lz4_flex::decompress(&data[HEADER_LEN..HEADER_LEN + compressed_len], uncompressed_len)
        .map_err(|err| {
            trc::StoreEvent::DataCorruption
                .caused_by(trc::location!())
                .reason(err)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let data = b"the quick brown fox jumps over the lazy dog ".repeat(32);
        let packed = maybe_compress(&data);
        assert!(packed.len() < data.len());
        assert_eq!(maybe_decompress(packed).unwrap(), data);
    }

    #[test]
    fn short_values_stay_verbatim() {
        let data = b"tiny".to_vec();
        let packed = maybe_compress(&data);
        assert_eq!(packed, data);
        assert_eq!(maybe_decompress(packed).unwrap(), data);
    }

    #[test]
    fn truncated_header_is_an_error() {
        let data = b"highly compressible payload ".repeat(64);
        let mut packed = maybe_compress(&data);
        packed.truncate(16);
        assert!(maybe_decompress(packed).is_err());
    }
}
