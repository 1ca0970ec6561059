/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

#[cfg(test)]
mod tests {
    use crate::TestServer;
    use common::{
        SMTP_SPOOLOUT_ROOM,
        message::{CtdlMessage, F_AUTHOR, F_BODY, F_RFC822_ADDR, F_SUBJECT, RecipientSet},
    };
    use message::{MessageStore, submit::SubmitMsg};
    use rooms::{RoomDir, msglist::MsgListDir};
    use smtp::queue::{SPOOLMIME, job::QueueJob};

    #[tokio::test]
    async fn internet_mail_generates_a_queue_job() {
        let ts = TestServer::new("queue-spool", |registry| {
            smtp::SmtpClientModule::register(registry);
        })
        .await;
        let server = &ts.server;
        smtp::init_spoolout(server).await.unwrap();

        let spool = server.get_room(SMTP_SPOOLOUT_ROOM).await.unwrap().unwrap();
        assert!(spool.flags2 & common::QR2_SYSTEM != 0);

        let mut msg = CtdlMessage::new();
        msg.set(F_AUTHOR, "alice");
        msg.set(F_RFC822_ADDR, "alice@example.com");
        msg.set(F_SUBJECT, "outbound");
        msg.set(F_BODY, "hello bob");
        let recps = RecipientSet {
            recp_internet: vec!["bob@other.example".to_string()],
            bounce_to: "alice@example.com".to_string(),
            ..Default::default()
        };
        let payload_msgnum = server.submit_msg(&mut msg, Some(&recps), "").await.unwrap();

        // The spool room now holds the payload plus exactly one job.
        let list = server.get_msglist(spool.number).await.unwrap();
        assert!(list.contains(&payload_msgnum));
        let mut jobs = Vec::new();
        for msgnum in &list {
            if let Some(meta) = server.get_msg_meta(*msgnum).await.unwrap() {
                if meta.content_type.eq_ignore_ascii_case(SPOOLMIME) {
                    jobs.push(*msgnum);
                }
            }
        }
        assert_eq!(jobs.len(), 1);

        let job_msg = server.fetch_message(jobs[0], true).await.unwrap().unwrap();
        let job = QueueJob::parse(job_msg.body().unwrap());
        assert_eq!(job.msgid, payload_msgnum);
        assert_eq!(job.bounceto, "alice@example.com");
        assert_eq!(job.recipients.len(), 1);
        assert_eq!(job.recipients[0].addr, "bob@other.example");
        assert_eq!(job.recipients[0].status_class, 0);
        assert!(job.attempted.is_none());
        assert!(job.should_try_now(store::now()));
    }

    #[tokio::test]
    async fn local_mail_spools_nothing() {
        let ts = TestServer::new("queue-local", |registry| {
            smtp::SmtpClientModule::register(registry);
        })
        .await;
        let server = &ts.server;
        smtp::init_spoolout(server).await.unwrap();

        let mut msg = CtdlMessage::new();
        msg.set(F_AUTHOR, "alice");
        msg.set(F_BODY, "internal note");
        let recps = RecipientSet {
            recp_local: vec!["bob".to_string()],
            ..Default::default()
        };
        server.submit_msg(&mut msg, Some(&recps), "").await.unwrap();

        let spool = server.get_room(SMTP_SPOOLOUT_ROOM).await.unwrap().unwrap();
        assert!(server.get_msglist(spool.number).await.unwrap().is_empty());
    }
}
