/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use super::{
    RETRY_FAST_INTERVAL, RETRY_FAST_WINDOW, RETRY_SLOW_INTERVAL, SPOOLMIME, STATUS_TRANSIENT,
    STATUS_UNTRIED,
};
use common::message::{CtdlMessage, F_AUTHOR, F_BODY, F_JOURNAL, F_SUBJECT, RecipientSet};
use std::fmt::Write;

/// One queued delivery job, parsed from and rewritten to the control block
/// stored as the body of a spool-room message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueJob {
    pub msgid: i64,
    pub submitted: u64,
    pub attempted: Option<u64>,
    pub bounceto: String,
    pub envelope_from: Option<String>,
    pub source_room: Option<String>,
    pub recipients: Vec<QueueRecipient>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueRecipient {
    pub addr: String,
    pub status_class: u8,
    pub diagnostic: String,
}

impl QueueJob {
    pub fn new_for(payload_msgnum: i64, recps: &RecipientSet) -> Self {
        QueueJob {
            msgid: payload_msgnum,
            submitted: store::now(),
            attempted: None,
            bounceto: recps.bounce_to.clone(),
            envelope_from: recps.envelope_from.clone(),
            source_room: recps.sending_room.clone(),
            recipients: recps
                .recp_internet
                .iter()
                .map(|addr| QueueRecipient {
                    addr: addr.clone(),
                    status_class: STATUS_UNTRIED,
                    diagnostic: String::new(),
                })
                .collect(),
        }
    }

    /// Parse the instruction block. CRLF is tolerated, the MIME header
    /// block is skipped, unknown lines are ignored.
    pub fn parse(text: &str) -> Self {
        let text = text.replace("\r\n", "\n");
        let instructions = match text.split_once("\n\n") {
            Some((headers, rest)) if headers.to_ascii_lowercase().contains("content-type") => rest,
            _ => text.as_str(),
        };

        let mut job = QueueJob::default();
        for line in instructions.lines() {
            let mut tokens = line.split('|');
            match tokens.next().unwrap_or("") {
                "msgid" => {
                    job.msgid = tokens.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                }
                "submitted" => {
                    job.submitted = tokens.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                }
                "attempted" => {
                    job.attempted = tokens.next().and_then(|v| v.parse().ok());
                }
                "bounceto" => {
                    job.bounceto = tokens.next().unwrap_or("").to_string();
                }
                "envelope_from" => {
                    let v = tokens.next().unwrap_or("");
                    if !v.is_empty() {
                        job.envelope_from = Some(v.to_string());
                    }
                }
                "source_room" => {
                    let v = tokens.next().unwrap_or("");
                    if !v.is_empty() {
                        job.source_room = Some(v.to_string());
                    }
                }
                "remote" => {
                    let addr = tokens.next().unwrap_or("").to_string();
                    if !addr.is_empty() {
                        job.recipients.push(QueueRecipient {
                            addr,
                            status_class: tokens
                                .next()
                                .and_then(|v| v.parse().ok())
                                .unwrap_or(STATUS_UNTRIED),
                            diagnostic: tokens.next().unwrap_or("").to_string(),
                        });
                    }
                }
                _ => {}
            }
        }
        job
    }

    pub fn serialize(&self) -> String {
        let mut out = String::with_capacity(256);
        let _ = write!(out, "Content-type: {SPOOLMIME}\n\n");
        let _ = writeln!(out, "msgid|{}", self.msgid);
        let _ = writeln!(out, "submitted|{}", self.submitted);
        if !self.bounceto.is_empty() {
            let _ = writeln!(out, "bounceto|{}", self.bounceto);
        }
        if let Some(envelope_from) = &self.envelope_from {
            let _ = writeln!(out, "envelope_from|{envelope_from}");
        }
        if let Some(source_room) = &self.source_room {
            let _ = writeln!(out, "source_room|{source_room}");
        }
        for rcpt in &self.recipients {
            let _ = writeln!(
                out,
                "remote|{}|{}|{}",
                rcpt.addr, rcpt.status_class, rcpt.diagnostic
            );
        }
        if let Some(attempted) = self.attempted {
            let _ = writeln!(out, "attempted|{attempted}");
        }
        out
    }

    /// Wrap the control block in a spoolable message. Queue jobs carry no
    /// recipients and are never journaled.
    pub fn into_message(self) -> CtdlMessage {
        let mut msg = CtdlMessage::new();
        msg.format_type = common::message::FMT_RFC822;
        msg.set(F_SUBJECT, "QMSG");
        msg.set(F_AUTHOR, "Citadel");
        msg.set(F_JOURNAL, "do not journal");
        msg.set(F_BODY, self.serialize());
        msg
    }

    /// The retry window decision: first attempts go out immediately,
    /// young jobs retry every 30 minutes, older ones every 4 hours.
    pub fn should_try_now(&self, now: u64) -> bool {
        match self.attempted {
            None => true,
            Some(attempted) if attempted < self.submitted => true,
            Some(attempted) => {
                let interval = if attempted - self.submitted <= RETRY_FAST_WINDOW {
                    RETRY_FAST_INTERVAL
                } else {
                    RETRY_SLOW_INTERVAL
                };
                now.saturating_sub(attempted) > interval
            }
        }
    }

    pub fn pending(&self) -> impl Iterator<Item = &QueueRecipient> {
        self.recipients
            .iter()
            .filter(|r| matches!(r.status_class, STATUS_UNTRIED | STATUS_TRANSIENT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{STATUS_PERMANENT, STATUS_SUCCESS};

    const BLOCK: &str = "Content-type: application/x-citadel-delivery-list\n\n\
        msgid|4242\n\
        submitted|1700000000\n\
        bounceto|alice@example.com\n\
        envelope_from|bounces@example.com\n\
        source_room|Announcements\n\
        remote|bob@other.example|0|\n\
        remote|carol@third.example|4|421 (connection refused)\n\
        attempted|1700001800\n";

    #[test]
    fn parse_and_serialize_round_trip() {
        let job = QueueJob::parse(BLOCK);
        assert_eq!(job.msgid, 4242);
        assert_eq!(job.submitted, 1_700_000_000);
        assert_eq!(job.attempted, Some(1_700_001_800));
        assert_eq!(job.bounceto, "alice@example.com");
        assert_eq!(job.envelope_from.as_deref(), Some("bounces@example.com"));
        assert_eq!(job.source_room.as_deref(), Some("Announcements"));
        assert_eq!(job.recipients.len(), 2);
        assert_eq!(job.recipients[1].status_class, STATUS_TRANSIENT);
        assert_eq!(job.recipients[1].diagnostic, "421 (connection refused)");

        // A reparse of the serialized form yields the same job.
        assert_eq!(QueueJob::parse(&job.serialize()), job);
    }

    #[test]
    fn crlf_is_tolerated() {
        let job = QueueJob::parse(&BLOCK.replace('\n', "\r\n"));
        assert_eq!(job.msgid, 4242);
        assert_eq!(job.recipients.len(), 2);
    }

    #[test]
    fn retry_schedule() {
        let mut job = QueueJob::parse(BLOCK);
        let submitted = job.submitted;

        // Never attempted: go now.
        job.attempted = None;
        assert!(job.should_try_now(submitted + 1));

        // Young job, attempted 10 minutes ago: wait for the half hour.
        job.attempted = Some(submitted + 600);
        assert!(!job.should_try_now(submitted + 1200));
        assert!(job.should_try_now(submitted + 600 + 1801));

        // Old job: four-hour cadence.
        job.attempted = Some(submitted + RETRY_FAST_WINDOW + 1);
        let attempted = job.attempted.unwrap();
        assert!(!job.should_try_now(attempted + 7200));
        assert!(job.should_try_now(attempted + RETRY_SLOW_INTERVAL + 1));
    }

    #[test]
    fn pending_skips_finished_recipients() {
        let mut job = QueueJob::parse(BLOCK);
        job.recipients[0].status_class = STATUS_SUCCESS;
        job.recipients[1].status_class = STATUS_PERMANENT;
        assert_eq!(job.pending().count(), 0);
        job.recipients[1].status_class = STATUS_TRANSIENT;
        assert_eq!(job.pending().count(), 1);
    }
}
