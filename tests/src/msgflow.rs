/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

#[cfg(test)]
mod tests {
    use crate::TestServer;
    use common::message::{CtdlMessage, F_AUTHOR, F_BODY, F_EUID, F_SUBJECT};
    use message::{MessageStore, refcount::run_refcount_reducer, submit::SubmitMsg};
    use rooms::{RoomDir, RoomType, msglist::MsgListDir};

    fn text_message(subject: &str, body: &str) -> CtdlMessage {
        let mut msg = CtdlMessage::new();
        msg.set(F_AUTHOR, "alice");
        msg.set(F_SUBJECT, subject);
        msg.set(F_BODY, body);
        msg
    }

    #[tokio::test]
    async fn submit_appends_to_room_list_once() {
        let ts = TestServer::new("msg-submit", |_| {}).await;
        let server = &ts.server;
        server
            .create_room("Posts", RoomType::Public, "", 0, common::VIEW_BBS)
            .await
            .unwrap();

        let mut msg = text_message("hello", "first post");
        let msgnum = server.submit_msg(&mut msg, None, "Posts").await.unwrap();
        assert!(msgnum > 0);

        let room = server.get_room("Posts").await.unwrap().unwrap();
        assert_eq!(room.highest, msgnum);
        let list = server.get_msglist(room.number).await.unwrap();
        assert_eq!(list.iter().filter(|m| **m == msgnum).count(), 1);

        let fetched = server.fetch_message(msgnum, true).await.unwrap().unwrap();
        assert_eq!(fetched.subject(), Some("hello"));
        assert_eq!(fetched.body(), Some("first post"));

        // Headers-only fetch omits the body.
        let headers = server.fetch_message(msgnum, false).await.unwrap().unwrap();
        assert_eq!(headers.body(), None);
    }

    #[tokio::test]
    async fn big_bodies_overflow_and_come_back() {
        let ts = TestServer::new("msg-big", |_| {}).await;
        let server = &ts.server;
        server
            .create_room("Essays", RoomType::Public, "", 0, common::VIEW_BBS)
            .await
            .unwrap();

        let body = "All work and no play makes Jack a dull boy.\n".repeat(100);
        assert!(body.len() > common::BIG_MESSAGE);
        let mut msg = text_message("long", &body);
        let msgnum = server.submit_msg(&mut msg, None, "Essays").await.unwrap();

        let fetched = server.fetch_message(msgnum, true).await.unwrap().unwrap();
        assert_eq!(fetched.body(), Some(body.as_str()));
        assert!(fetched.has_big_body());
    }

    #[tokio::test]
    async fn euid_submission_replaces_the_previous_item() {
        let ts = TestServer::new("msg-euid", |_| {}).await;
        let server = &ts.server;
        server
            .create_room("Calendar", RoomType::Public, "", 0, common::VIEW_CALENDAR)
            .await
            .unwrap();
        let room = server.get_room("Calendar").await.unwrap().unwrap();

        let mut first = text_message("event v1", "BEGIN:VEVENT");
        first.set(F_EUID, "E1");
        let m1 = server.submit_msg(&mut first, None, "Calendar").await.unwrap();

        let mut second = text_message("event v2", "BEGIN:VEVENT");
        second.set(F_EUID, "E1");
        let m2 = server.submit_msg(&mut second, None, "Calendar").await.unwrap();
        assert!(m2 > m1);

        assert_eq!(
            server.locate_msg_by_euid(room.number, "E1").await.unwrap(),
            Some(m2)
        );
        // The lenient lookup strips a trailing .ics.
        assert_eq!(
            server.locate_msg_by_euid(room.number, "E1.ics").await.unwrap(),
            Some(m2)
        );

        // The replaced message is gone from the room and, after the
        // reducer drains, from storage entirely.
        let list = server.get_msglist(room.number).await.unwrap();
        assert!(!list.contains(&m1));
        assert!(list.contains(&m2));

        run_refcount_reducer(server).await.unwrap();
        assert!(server.fetch_message(m1, false).await.unwrap().is_none());
        assert!(server.fetch_message(m2, false).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn refcounts_conserve_across_delete() {
        let ts = TestServer::new("msg-refcount", |_| {}).await;
        let server = &ts.server;
        server
            .create_room("Ephemeral", RoomType::Public, "", 0, common::VIEW_BBS)
            .await
            .unwrap();

        let mut msg = text_message("temp", "soon gone");
        let msgnum = server.submit_msg(&mut msg, None, "Ephemeral").await.unwrap();
        run_refcount_reducer(server).await.unwrap();
        // One room reference: the message survives the first drain.
        assert!(server.fetch_message(msgnum, false).await.unwrap().is_some());

        let removed = server
            .delete_messages("Ephemeral", &[msgnum], "")
            .await
            .unwrap();
        assert_eq!(removed, 1);
        run_refcount_reducer(server).await.unwrap();
        assert!(server.fetch_message(msgnum, false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn use_table_checks_then_remembers() {
        let ts = TestServer::new("msg-usetable", |_| {}).await;
        let server = &ts.server;
        assert!(!server.check_if_already_seen("fingerprint-1").await.unwrap());
        assert!(server.check_if_already_seen("fingerprint-1").await.unwrap());
        assert!(!server.check_if_already_seen("fingerprint-2").await.unwrap());
    }
}
