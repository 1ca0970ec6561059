/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use common::Server;
use store::Table;

/// A room's message list is a packed array of message numbers in
/// room-insertion order, keyed by the room number.
pub fn pack(msgnums: &[i64]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(msgnums.len() * 8);
    for msgnum in msgnums {
        buf.extend_from_slice(&msgnum.to_le_bytes());
    }
    buf
}

pub fn unpack(raw: &[u8]) -> Vec<i64> {
    raw.chunks_exact(8)
        .map(|chunk| i64::from_le_bytes(chunk.try_into().unwrap()))
        .collect()
}

pub fn msglist_key(roomnum: i64) -> [u8; 8] {
    roomnum.to_be_bytes()
}

pub trait MsgListDir: Sync + Send {
    fn get_msglist(&self, roomnum: i64) -> impl Future<Output = trc::Result<Vec<i64>>> + Send;
}

impl MsgListDir for Server {
    async fn get_msglist(&self, roomnum: i64) -> trc::Result<Vec<i64>> {
        Ok(self
            .store()
            .get(Table::MsgLists, &msglist_key(roomnum))
            .await?
            .map(|raw| unpack(&raw))
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trip() {
        let msgnums = vec![1, 5, 9_000_000_000, 42];
        assert_eq!(unpack(&pack(&msgnums)), msgnums);
        assert!(unpack(&[]).is_empty());
    }
}
