/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

#[cfg(test)]
mod tests {
    use crate::TestServer;
    use users::{NO_UID, RenameUserResult, UserDir, user_key};

    #[tokio::test]
    async fn lookup_ignores_case_and_punctuation() {
        let ts = TestServer::new("user-lookup", |_| {}).await;
        let server = &ts.server;

        let created = server
            .create_user("Guybrush Threepwood", common::AX_LOCAL, NO_UID)
            .await
            .unwrap();
        assert!(created.usernum > 0);

        for name in [
            "guybrush threepwood",
            "GUYBRUSH THREEPWOOD",
            "Guybrush.Threepwood!",
        ] {
            let found = server.get_user(name).await.unwrap().unwrap();
            assert_eq!(found.fullname, "Guybrush Threepwood");
            assert_eq!(user_key(&found.fullname), user_key(name));
        }
    }

    #[tokio::test]
    async fn reverse_index_tracks_the_record() {
        let ts = TestServer::new("user-reverse", |_| {}).await;
        let server = &ts.server;

        let alice = server.create_user("alice", common::AX_LOCAL, NO_UID).await.unwrap();
        let bob = server.create_user("bob", common::AX_LOCAL, NO_UID).await.unwrap();
        assert_ne!(alice.usernum, bob.usernum);

        let by_num = server.get_user_by_number(alice.usernum).await.unwrap().unwrap();
        assert_eq!(by_num.fullname, "alice");

        // Rename updates both the forward key and the reverse index.
        assert_eq!(
            server.rename_user("alice", "alicia").await.unwrap(),
            RenameUserResult::Ok
        );
        assert!(server.get_user("alice").await.unwrap().is_none());
        let renamed = server.get_user_by_number(alice.usernum).await.unwrap().unwrap();
        assert_eq!(renamed.fullname, "alicia");

        // Colliding rename is refused.
        assert_eq!(
            server.rename_user("alicia", "bob").await.unwrap(),
            RenameUserResult::AlreadyExists
        );
        assert_eq!(
            server.rename_user("ghost", "anything").await.unwrap(),
            RenameUserResult::NotFound
        );
    }

    #[tokio::test]
    async fn delete_removes_both_indices() {
        let ts = TestServer::new("user-delete", |_| {}).await;
        let server = &ts.server;

        let user = server.create_user("shortlived", common::AX_LOCAL, NO_UID).await.unwrap();
        server.delete_user_records(&user).await.unwrap();
        assert!(server.get_user("shortlived").await.unwrap().is_none());
        assert!(server.get_user_by_number(user.usernum).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn two_phase_iteration_sees_everyone() {
        let ts = TestServer::new("user-iterate", |_| {}).await;
        let server = &ts.server;
        for name in ["one", "two", "three"] {
            server.create_user(name, common::AX_LOCAL, NO_UID).await.unwrap();
        }
        let mut names = server.each_user_name().await.unwrap();
        names.sort();
        assert_eq!(names, vec!["one", "three", "two"]);
    }
}
