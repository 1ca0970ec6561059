/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

pub mod outbound;
pub mod queue;

use common::{
    QR2_SYSTEM, SMTP_SPOOLOUT_ROOM, Server, VIEW_QUEUE,
    ipc::QueueEvent,
    message::{CtdlMessage, RecipientSet},
    registry::{HookEvent, MessageHook, ServiceRegistry, SessionHook},
    listener::SessionShared,
};
use futures::future::BoxFuture;
use queue::job::QueueJob;
use rooms::{RoomDir, RoomType};
use std::sync::{Arc, atomic::Ordering};

/// Ensure the spool-out room exists and is flagged as a system room so it
/// stays out of room listings.
pub async fn init_spoolout(server: &Server) -> trc::Result<()> {
    server
        .create_room(
            SMTP_SPOOLOUT_ROOM,
            RoomType::InvitationOnly,
            "",
            0,
            VIEW_QUEUE,
        )
        .await?;
    if let Some(mut room) = server.get_room(SMTP_SPOOLOUT_ROOM).await? {
        if room.flags2 & QR2_SYSTEM == 0 {
            room.flags2 |= QR2_SYSTEM;
            server.put_room(&room).await?;
        }
    }
    Ok(())
}

/// The outbound mail module: an after-save hook that turns internet
/// recipients into queue jobs, plus timer/housekeeping hooks that nudge
/// the queue runner.
pub struct SmtpClientModule;

impl SmtpClientModule {
    pub fn register(registry: &mut ServiceRegistry) {
        let module = Arc::new(SmtpClientModule);
        registry.register_message_hook(module.clone());
        registry.register_session_hook(module, &[HookEvent::Timer, HookEvent::House], 101);
    }
}

impl MessageHook for SmtpClientModule {
    /// For internet mail, generate a delivery job. The job message itself
    /// has no recipients, which is what ends the recursion.
    fn after_save<'x>(
        &'x self,
        server: &'x Server,
        _msg: &'x CtdlMessage,
        recps: Option<&'x RecipientSet>,
        msgnum: i64,
    ) -> BoxFuture<'x, i32> {
        Box::pin(async move {
            let Some(recps) = recps.filter(|r| r.num_internet() > 0) else {
                return 0;
            };

            let job = QueueJob::new_for(msgnum, recps);
            let mut job_msg = job.into_message();
            match message::submit::SubmitMsg::submit_msg(
                server,
                &mut job_msg,
                None,
                SMTP_SPOOLOUT_ROOM,
            )
            .await
            {
                Ok(job_msgnum) => {
                    server
                        .inner
                        .data
                        .queue_last_job_submitted
                        .store(job_msgnum, Ordering::Relaxed);
                    trc::event!(
                        Queue(trc::QueueEvent::JobSubmitted),
                        QueueId = job_msgnum,
                        MsgNum = msgnum,
                        Total = recps.num_internet(),
                    );
                    let _ = server.inner.ipc.queue_tx.try_send(QueueEvent::Refresh);
                    0
                }
                Err(err) => {
                    trc::error!(err.details("failed to spool delivery job"));
                    0
                }
            }
        })
    }
}

impl SessionHook for SmtpClientModule {
    fn on_session_event<'x>(
        &'x self,
        server: &'x Server,
        event: HookEvent,
        _session: Option<&'x Arc<SessionShared>>,
    ) -> BoxFuture<'x, ()> {
        Box::pin(async move {
            let event = match event {
                // Quick pass: only jobs newer than the last one processed.
                HookEvent::House => QueueEvent::Refresh,
                // Full pass: walk the whole queue.
                HookEvent::Timer => QueueEvent::FullRun,
                _ => return,
            };
            let _ = server.inner.ipc.queue_tx.try_send(event);
        })
    }
}
