/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

#[cfg(test)]
mod tests {
    use crate::TestServer;
    use rooms::{
        FloorDir, RenameRoomResult, RoomDir, RoomType,
        netconfig::{NetConfig, NetConfigDir},
    };

    #[tokio::test]
    async fn create_is_idempotent_and_numbered() {
        let ts = TestServer::new("room-create", |_| {}).await;
        let server = &ts.server;

        assert!(
            server
                .create_room("Scumm Bar", RoomType::Public, "", 0, common::VIEW_BBS)
                .await
                .unwrap()
        );
        // Second create silently declines.
        assert!(
            !server
                .create_room("scumm bar", RoomType::Public, "", 0, common::VIEW_BBS)
                .await
                .unwrap()
        );

        let room = server.get_room("SCUMM BAR").await.unwrap().unwrap();
        assert!(room.number > 0);
        assert_eq!(room.name, "Scumm Bar");
    }

    #[tokio::test]
    async fn floor_ref_counts_rebuild() {
        let ts = TestServer::new("room-floors", |_| {}).await;
        let server = &ts.server;

        for (name, floor) in [("One", 0u8), ("Two", 0), ("Three", 1)] {
            server
                .create_room(name, RoomType::Public, "", floor, common::VIEW_BBS)
                .await
                .unwrap();
        }
        // A mailbox room must not count toward any floor.
        server
            .create_room(
                &rooms::mailbox_name(42, common::MAILROOM),
                RoomType::Personal,
                "",
                0,
                common::VIEW_MAILBOX,
            )
            .await
            .unwrap();

        server.check_ref_counts().await.unwrap();
        assert_eq!(server.get_floor(0).await.unwrap().ref_count, 2);
        assert_eq!(server.get_floor(1).await.unwrap().ref_count, 1);
        assert_eq!(server.get_floor(2).await.unwrap().ref_count, 0);
    }

    #[tokio::test]
    async fn rename_results() {
        let ts = TestServer::new("room-rename", |_| {}).await;
        let server = &ts.server;

        server
            .create_room("Old Name", RoomType::Public, "", 0, common::VIEW_BBS)
            .await
            .unwrap();
        server
            .create_room("Taken", RoomType::Public, "", 0, common::VIEW_BBS)
            .await
            .unwrap();

        assert_eq!(
            server.rename_room("Old Name", "Taken", None).await.unwrap(),
            RenameRoomResult::AlreadyExists
        );
        assert_eq!(
            server.rename_room("Nothing", "Whatever", None).await.unwrap(),
            RenameRoomResult::NotFound
        );
        assert_eq!(
            server.rename_room("Old Name", "New Name", Some(99)).await.unwrap(),
            RenameRoomResult::InvalidFloor
        );
        assert_eq!(
            server.rename_room("Old Name", "New Name", Some(1)).await.unwrap(),
            RenameRoomResult::Ok
        );
        let room = server.get_room("New Name").await.unwrap().unwrap();
        assert_eq!(room.floor, 1);
    }

    #[tokio::test]
    async fn netconfig_round_trips_through_storage() {
        let ts = TestServer::new("room-netconfig", |_| {}).await;
        let server = &ts.server;

        server
            .create_room("List Room", RoomType::Public, "", 0, common::VIEW_BBS)
            .await
            .unwrap();
        let room = server.get_room("List Room").await.unwrap().unwrap();

        let blob = "listrecp|alice@example.com\nmystery|directive|kept\n";
        server
            .save_netconfig(room.number, &NetConfig::parse(blob))
            .await
            .unwrap();
        let loaded = server.load_netconfig(room.number).await.unwrap();
        assert_eq!(loaded.serialize(), blob);
        assert_eq!(loaded.list_recipients(), vec!["alice@example.com"]);
    }
}
