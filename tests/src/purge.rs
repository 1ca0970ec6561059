/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

#[cfg(test)]
mod tests {
    use crate::TestServer;
    use common::message::{CtdlMessage, F_AUTHOR, F_BODY};
    use message::submit::SubmitMsg;
    use rooms::{
        RoomDir, RoomType,
        visits::{VisitDir, VisitRecord},
    };
    use services::autopurge::run_purge;
    use store::{ScanParams, Table};
    use users::{NO_UID, UserDir};

    #[tokio::test]
    async fn orphan_visits_are_collected() {
        let ts = TestServer::new("purge-visits", |_| {}).await;
        let server = &ts.server;

        // The Aide room must exist for the purge report.
        server
            .create_room(common::AIDEROOM, RoomType::Public, "", 0, common::VIEW_BBS)
            .await
            .unwrap();

        let user = server.create_user("visitor", common::AX_LOCAL, NO_UID).await.unwrap();
        server
            .create_room("Visited", RoomType::Public, "", 0, common::VIEW_BBS)
            .await
            .unwrap();
        let room = server.get_room("Visited").await.unwrap().unwrap();

        // One legitimate visit, one pointing at a room that was never
        // created, one for a user that does not exist.
        server
            .put_visit(&VisitRecord {
                roomnum: room.number,
                room_gen: room.generation,
                usernum: user.usernum,
                ..Default::default()
            })
            .await
            .unwrap();
        server
            .put_visit(&VisitRecord {
                roomnum: 9999,
                room_gen: 0,
                usernum: user.usernum,
                ..Default::default()
            })
            .await
            .unwrap();
        server
            .put_visit(&VisitRecord {
                roomnum: room.number,
                room_gen: room.generation,
                usernum: 31337,
                ..Default::default()
            })
            .await
            .unwrap();

        run_purge(server, true).await;

        let visits = server.each_visit().await.unwrap();
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].usernum, user.usernum);
        assert_eq!(visits[0].roomnum, room.number);
    }

    #[tokio::test]
    async fn deleteme_password_purges_the_account() {
        let ts = TestServer::new("purge-deleteme", |_| {}).await;
        let server = &ts.server;
        server
            .create_room(common::AIDEROOM, RoomType::Public, "", 0, common::VIEW_BBS)
            .await
            .unwrap();

        let mut doomed = server.create_user("doomed", common::AX_LOCAL, NO_UID).await.unwrap();
        doomed.password = "deleteme".to_string();
        server.put_user(&doomed).await.unwrap();
        let keeper = server.create_user("keeper", common::AX_LOCAL, NO_UID).await.unwrap();

        run_purge(server, true).await;

        assert!(server.get_user("doomed").await.unwrap().is_none());
        assert!(server.get_user_by_number(doomed.usernum).await.unwrap().is_none());
        assert!(server.get_user("keeper").await.unwrap().is_some());
        assert!(server.get_user_by_number(keeper.usernum).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn purge_posts_an_aide_report() {
        let ts = TestServer::new("purge-report", |_| {}).await;
        let server = &ts.server;
        server
            .create_room(common::AIDEROOM, RoomType::Public, "", 0, common::VIEW_BBS)
            .await
            .unwrap();

        run_purge(server, true).await;

        let aide = server.get_room(common::AIDEROOM).await.unwrap().unwrap();
        use rooms::msglist::MsgListDir;
        let list = server.get_msglist(aide.number).await.unwrap();
        assert_eq!(list.len(), 1);
        use message::MessageStore;
        let report = server.fetch_message(list[0], true).await.unwrap().unwrap();
        assert!(report.body().unwrap().contains("Automatic purge report"));
    }

    #[tokio::test]
    async fn stale_use_table_entries_age_out() {
        let ts = TestServer::new("purge-usetable", |_| {}).await;
        let server = &ts.server;
        server
            .create_room(common::AIDEROOM, RoomType::Public, "", 0, common::VIEW_BBS)
            .await
            .unwrap();

        use message::MessageStore;
        assert!(!server.check_if_already_seen("fresh").await.unwrap());

        // Plant an entry dated well past the retention window.
        let old = store::codec::Encoder::new(12)
            .put_i32(12345)
            .put_i64((store::now() - common::USETABLE_RETAIN - 86_400) as i64)
            .finalize();
        server
            .store()
            .put(Table::UseTable, &12345i32.to_be_bytes(), &old)
            .await
            .unwrap();

        run_purge(server, true).await;

        let remaining = server
            .store()
            .scan(ScanParams::new(Table::UseTable))
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);

        // An unrelated submit still works after the purge pass.
        server
            .create_room("After", RoomType::Public, "", 0, common::VIEW_BBS)
            .await
            .unwrap();
        let mut msg = CtdlMessage::new();
        msg.set(F_AUTHOR, "alice");
        msg.set(F_BODY, "still alive");
        server.submit_msg(&mut msg, None, "After").await.unwrap();
    }
}
