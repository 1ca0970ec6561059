/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use super::{
    SPOOLMIME, STATUS_PERMANENT, STATUS_SUCCESS, STATUS_TRANSIENT,
    dsn::{self, BounceMode},
    job::QueueJob,
};
use crate::outbound::delivery::attempt_delivery;
use common::{
    BuildServer, Inner, SMTP_DELIVER_FAIL, SMTP_DELIVER_WARN, SMTP_SPOOLOUT_ROOM, Server,
    ipc::QueueEvent,
};
use message::{MessageStore, submit::SubmitMsg};
use rooms::{RoomDir, msglist::MsgListDir};
use std::sync::{Arc, atomic::Ordering};
use tokio::sync::mpsc;

/// The queue runner: one task consuming wake-up events, which also makes
/// every queue run single-flight by construction.
pub struct Queue {
    core: Arc<Inner>,
    rx: mpsc::Receiver<QueueEvent>,
    resolver: Option<mail_auth::MessageAuthenticator>,
}

pub trait SpawnQueue {
    fn spawn(self, core: Arc<Inner>);
}

impl SpawnQueue for mpsc::Receiver<QueueEvent> {
    fn spawn(self, core: Arc<Inner>) {
        tokio::spawn(async move {
            Queue::new(core, self).start().await;
        });
    }
}

impl Queue {
    pub fn new(core: Arc<Inner>, rx: mpsc::Receiver<QueueEvent>) -> Self {
        Queue {
            core,
            rx,
            resolver: mail_auth::MessageAuthenticator::new_system_conf().ok(),
        }
    }

    pub async fn start(&mut self) {
        while let Some(event) = self.rx.recv().await {
            let server = self.core.build_server();
            match event {
                QueueEvent::Refresh => {
                    // Quick pass: only jobs spooled since the last pass.
                    let submitted = server
                        .inner
                        .data
                        .queue_last_job_submitted
                        .load(Ordering::Relaxed);
                    let processed = server
                        .inner
                        .data
                        .queue_last_job_processed
                        .load(Ordering::Relaxed);
                    if submitted > processed {
                        self.do_queue_run(&server, false).await;
                    }
                }
                QueueEvent::FullRun => {
                    self.do_queue_run(&server, true).await;
                }
                QueueEvent::Stop => break,
            }
        }
    }

    async fn do_queue_run(&self, server: &Server, full: bool) {
        let Ok(Some(room)) = server.get_room(SMTP_SPOOLOUT_ROOM).await else {
            trc::event!(
                Queue(trc::QueueEvent::QueueRunSkipped),
                Reason = "spool-out room is missing",
            );
            return;
        };

        let floor = if full {
            0
        } else {
            server
                .inner
                .data
                .queue_last_job_processed
                .load(Ordering::Relaxed)
        };
        let high_water = server
            .inner
            .data
            .queue_last_job_submitted
            .load(Ordering::Relaxed);

        // Snapshot the queue into memory before working through it.
        let msgnums = match server.get_msglist(room.number).await {
            Ok(msgnums) => msgnums,
            Err(err) => {
                trc::error!(err.details("cannot read spool-out room"));
                return;
            }
        };

        let mut jobs = Vec::new();
        for msgnum in msgnums {
            if msgnum <= floor {
                continue;
            }
            match server.get_msg_meta(msgnum).await {
                Ok(Some(meta)) if meta.content_type.eq_ignore_ascii_case(SPOOLMIME) => {
                    jobs.push(msgnum);
                }
                _ => {}
            }
        }

        for qmsgnum in jobs {
            self.process_one(server, qmsgnum).await;
        }

        server
            .inner
            .data
            .queue_last_job_processed
            .store(high_water, Ordering::Relaxed);
    }

    async fn process_one(&self, server: &Server, qmsgnum: i64) {
        let msg = match server.fetch_message(qmsgnum, true).await {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                trc::event!(
                    Queue(trc::QueueEvent::QueueRunSkipped),
                    QueueId = qmsgnum,
                    Reason = "job message no longer exists",
                );
                return;
            }
            Err(err) => {
                trc::error!(err.details("cannot fetch queue job"));
                return;
            }
        };

        let job = QueueJob::parse(msg.body().unwrap_or(""));
        let now = store::now();
        if !job.should_try_now(now) {
            return;
        }

        let prior_attempt = job.attempted.unwrap_or(0);
        let mut rewritten = job.clone();
        let mut num_success = 0usize;
        let mut num_fail = 0usize;
        let mut num_delayed = 0usize;

        for rcpt in &mut rewritten.recipients {
            if !matches!(rcpt.status_class, 0 | STATUS_TRANSIENT) {
                continue;
            }
            let (code, response) = attempt_delivery(
                server,
                self.resolver.as_ref(),
                job.msgid,
                &rcpt.addr,
                job.envelope_from.as_deref(),
                job.source_room.as_deref(),
            )
            .await;

            let class = match code / 100 {
                0 => STATUS_TRANSIENT,
                class => class as u8,
            };
            rcpt.status_class = class;
            rcpt.diagnostic = format!("{code} ({response})");
            match class {
                STATUS_SUCCESS => {
                    num_success += 1;
                    trc::event!(
                        Queue(trc::QueueEvent::AttemptSuccess),
                        QueueId = qmsgnum,
                        AccountName = rcpt.addr.clone(),
                    );
                }
                STATUS_PERMANENT => {
                    num_fail += 1;
                    trc::event!(
                        Queue(trc::QueueEvent::AttemptPermFail),
                        QueueId = qmsgnum,
                        AccountName = rcpt.addr.clone(),
                        Code = code,
                    );
                }
                _ => {
                    rcpt.status_class = STATUS_TRANSIENT;
                    num_delayed += 1;
                    trc::event!(
                        Queue(trc::QueueEvent::AttemptTempFail),
                        QueueId = qmsgnum,
                        AccountName = rcpt.addr.clone(),
                        Code = code,
                    );
                }
            }
        }

        // Delivered recipients drop out of the rewritten job.
        rewritten
            .recipients
            .retain(|r| r.status_class != STATUS_SUCCESS);
        rewritten.attempted = Some(now);

        trc::event!(
            Queue(trc::QueueEvent::JobProcessed),
            QueueId = qmsgnum,
            Total = num_success + num_fail + num_delayed,
            Details = vec![num_success, num_fail, num_delayed],
        );

        // Permanent failures bounce on the pass that discovered them.
        if num_fail > 0 {
            dsn::do_bounce(server, &rewritten, BounceMode::Fatals).await;
        }

        let age = now.saturating_sub(job.submitted);
        let mut delete_job = num_delayed == 0;
        if !delete_job && age > SMTP_DELIVER_FAIL {
            dsn::do_bounce(server, &rewritten, BounceMode::All).await;
            trc::event!(Queue(trc::QueueEvent::Expired), QueueId = qmsgnum);
            delete_job = true;
        } else if !delete_job
            && age >= SMTP_DELIVER_WARN
            && prior_attempt.saturating_sub(job.submitted) < SMTP_DELIVER_WARN
        {
            dsn::do_bounce(server, &rewritten, BounceMode::Warn).await;
        }

        if delete_job {
            // Both the job and the payload leave the spool room; the
            // refcount reducer collects the storage.
            if let Err(err) = server
                .delete_messages(SMTP_SPOOLOUT_ROOM, &[qmsgnum, job.msgid], "")
                .await
            {
                trc::error!(err.details("cannot delete finished queue job"));
            }
            trc::event!(Queue(trc::QueueEvent::JobDeleted), QueueId = qmsgnum);
        } else {
            // Replace the old control block with the updated one.
            let mut new_msg = rewritten.into_message();
            match server.submit_msg(&mut new_msg, None, SMTP_SPOOLOUT_ROOM).await {
                Ok(new_qmsgnum) => {
                    server
                        .inner
                        .data
                        .queue_last_job_submitted
                        .store(new_qmsgnum, Ordering::Relaxed);
                    if let Err(err) = server
                        .delete_messages(SMTP_SPOOLOUT_ROOM, &[qmsgnum], "")
                        .await
                    {
                        trc::error!(err.details("cannot delete superseded queue job"));
                    }
                    trc::event!(
                        Queue(trc::QueueEvent::JobRequeued),
                        QueueId = new_qmsgnum,
                    );
                }
                Err(err) => {
                    trc::error!(err.details("cannot rewrite queue job"));
                }
            }
        }
    }
}
