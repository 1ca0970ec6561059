/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use crate::{convert::to_rfc822, submit::SubmitMsg};
use common::{
    Server,
    ipc::JournalEntry,
    message::{
        CtdlMessage, F_AUTHOR, F_BODY, F_JOURNAL, F_RFC822_ADDR, F_SUBJECT, FMT_RFC822,
        RecipientSet,
    },
};
use mail_builder::MessageBuilder;

/// Capture a copy of a message at save time. The rendered rfc822 form and
/// the recipient set go on the in-memory journal queue; the housekeeper
/// drains it.
pub async fn queue_capture(
    server: &Server,
    msg: &CtdlMessage,
    recps: Option<&RecipientSet>,
    _msgnum: i64,
) {
    let fqdn = server.config().str_or("c_fqdn", "localhost");
    let mut recipients = Vec::new();
    if let Some(recps) = recps {
        recipients.extend(recps.recp_local.iter().cloned());
        recipients.extend(recps.recp_internet.iter().cloned());
        recipients.extend(recps.recp_room.iter().cloned());
    }

    server.inner.data.journal_queue.push(JournalEntry {
        sender: msg.author().to_string(),
        sender_email: msg.get(F_RFC822_ADDR).unwrap_or_default().to_string(),
        recipients,
        subject: msg.subject().unwrap_or("(no subject)").to_string(),
        rfc822: to_rfc822(msg, &fqdn, "").into_bytes(),
        submitted: store::now(),
    });
    trc::event!(Message(trc::MessageEvent::JournalQueued));
}

/// Drain the journal queue: wrap each capture in a multipart/mixed
/// envelope with the sender/recipient listing and the original message as
/// a message/rfc822 part, then resubmit to the configured destination.
pub async fn drain_journal_queue(server: &Server) {
    if server.inner.data.journal_queue.is_empty() {
        return;
    }
    let Some(dest) = server
        .config()
        .get_str("c_journal_dest")
        .filter(|d| !d.is_empty())
    else {
        // No destination configured; discard rather than grow without
        // bound.
        while server.inner.data.journal_queue.pop().is_some() {}
        return;
    };
    let fqdn = server.config().str_or("c_fqdn", "localhost");

    while let Some(entry) = server.inner.data.journal_queue.pop() {
        let summary = format!(
            "Sender: {} <{}>\nMessage-time: {}\nRecipients:\n{}\n",
            entry.sender,
            entry.sender_email,
            entry.submitted,
            entry
                .recipients
                .iter()
                .map(|r| format!("\t{r}\n"))
                .collect::<String>(),
        );
        let mime = MessageBuilder::new()
            .from(("Citadel".to_string(), format!("journal@{fqdn}")))
            .to(dest.clone())
            .subject(format!("Journaled message: {}", entry.subject))
            .text_body(summary)
            .attachment("message/rfc822", "original_message.eml", entry.rfc822)
            .write_to_vec();
        let mime = match mime {
            Ok(mime) => mime,
            Err(err) => {
                trc::event!(
                    Message(trc::MessageEvent::JournalError),
                    Reason = err.to_string(),
                );
                continue;
            }
        };

        let mut journal_msg = CtdlMessage::new();
        journal_msg.format_type = FMT_RFC822;
        journal_msg.set(F_AUTHOR, "Citadel");
        journal_msg.set(F_SUBJECT, format!("Journaled message: {}", entry.subject));
        journal_msg.set(F_JOURNAL, "do not journal");
        journal_msg.set(F_BODY, String::from_utf8_lossy(&mime).into_owned());

        let recps = RecipientSet {
            recp_internet: vec![dest.clone()],
            bounce_to: dest.clone(),
            ..Default::default()
        };
        match server.submit_msg(&mut journal_msg, Some(&recps), "").await {
            Ok(msgnum) => {
                trc::event!(
                    Message(trc::MessageEvent::JournalDelivered),
                    MsgNum = msgnum,
                );
            }
            Err(err) => {
                trc::error!(err.details("journal delivery failed"));
            }
        }
    }
}
