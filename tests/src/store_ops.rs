/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

#[cfg(test)]
mod tests {
    use crate::TestServer;
    use store::{ScanParams, Table};

    #[tokio::test]
    async fn basic_ops_and_ordering() {
        let ts = TestServer::new("store-basic", |_| {}).await;
        let db = ts.server.store();

        db.put(Table::Config, b"b_key", b"two").await.unwrap();
        db.put(Table::Config, b"a_key", b"one").await.unwrap();
        db.put(Table::Config, b"c_key", b"three").await.unwrap();

        assert_eq!(
            db.get(Table::Config, b"a_key").await.unwrap(),
            Some(b"one".to_vec())
        );
        assert_eq!(db.get(Table::Config, b"missing").await.unwrap(), None);

        // Scans walk keys in byte order.
        let rows = db
            .scan(ScanParams::new(Table::Config).range(b"a".to_vec(), b"z".to_vec()))
            .await
            .unwrap();
        let keys: Vec<_> = rows.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![b"a_key".to_vec(), b"b_key".to_vec(), b"c_key".to_vec()]);

        assert!(db.delete(Table::Config, b"b_key").await.unwrap());
        assert!(!db.delete(Table::Config, b"b_key").await.unwrap());
    }

    #[tokio::test]
    async fn compressed_tables_round_trip() {
        let ts = TestServer::new("store-compress", |_| {}).await;
        let db = ts.server.store();

        // Large enough that the lz4 path engages.
        let value = b"seen 1:100,102,104-200 ".repeat(64);
        db.put(Table::Visit, b"visit-key", &value).await.unwrap();
        assert_eq!(
            db.get(Table::Visit, b"visit-key").await.unwrap(),
            Some(value.clone())
        );

        // The same value in an uncompressed table also survives.
        db.put(Table::MsgLists, b"\x00\x00\x00\x01", &value)
            .await
            .unwrap();
        assert_eq!(
            db.get(Table::MsgLists, b"\x00\x00\x00\x01").await.unwrap(),
            Some(value)
        );
    }

    #[tokio::test]
    async fn transactions_are_atomic() {
        let ts = TestServer::new("store-txn", |_| {}).await;
        let db = ts.server.store();

        let result: trc::Result<()> = db
            .transaction(|txn| {
                txn.put(Table::Config, b"txn_a", b"1")?;
                Err(trc::EventExt::into_err(trc::StoreEvent::UnexpectedError))
            })
            .await;
        assert!(result.is_err());
        // The failed transaction left nothing behind.
        assert_eq!(db.get(Table::Config, b"txn_a").await.unwrap(), None);

        db.transaction(|txn| {
            txn.put(Table::Config, b"txn_b", b"1")?;
            txn.put(Table::Config, b"txn_c", b"2")?;
            Ok(())
        })
        .await
        .unwrap();
        assert!(db.get(Table::Config, b"txn_b").await.unwrap().is_some());
        assert!(db.get(Table::Config, b"txn_c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn counters_are_monotonic() {
        let ts = TestServer::new("store-counter", |_| {}).await;
        let config = ts.server.config();
        let first = config
            .next_i64(common::config::KEY_HIGHEST_MSGNUM)
            .await
            .unwrap();
        let second = config
            .next_i64(common::config::KEY_HIGHEST_MSGNUM)
            .await
            .unwrap();
        assert!(second > first);
        assert!(first > 0);
    }
}
