/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use super::{STATUS_PERMANENT, STATUS_TRANSIENT, STATUS_UNTRIED, job::QueueJob};
use common::{
    BOUNCE_SOURCE, Server,
    message::{CtdlMessage, F_AUTHOR, F_BODY, F_JOURNAL, F_SUBJECT, FMT_RFC822, RecipientSet},
};
use mail_builder::MessageBuilder;
use message::submit::SubmitMsg;
use std::fmt::Write;
use trc::EventExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BounceMode {
    /// Report recipients that failed permanently on this pass.
    Fatals,
    /// Give up: report everything still undelivered.
    All,
    /// Delivery is delayed but still being retried.
    Warn,
}

/// Compose and submit a delivery status notification to the job's bounce
/// address. Bounces ride the normal submission path; their own jobs carry
/// no bounce address, which is what stops mail loops.
pub async fn do_bounce(server: &Server, job: &QueueJob, mode: BounceMode) {
    let report: Vec<_> = job
        .recipients
        .iter()
        .filter(|r| match mode {
            BounceMode::Fatals => r.status_class == STATUS_PERMANENT,
            BounceMode::All => {
                matches!(r.status_class, STATUS_PERMANENT | STATUS_TRANSIENT | STATUS_UNTRIED)
            }
            BounceMode::Warn => {
                matches!(r.status_class, STATUS_TRANSIENT | STATUS_UNTRIED)
            }
        })
        .collect();
    if report.is_empty() || job.bounceto.is_empty() {
        return;
    }

    let fqdn = server.config().str_or("c_fqdn", "localhost");
    let (subject, preamble) = match mode {
        BounceMode::Fatals | BounceMode::All => (
            "Delivery Status Notification (Failure)",
            "Your message could not be delivered to the following recipients:",
        ),
        BounceMode::Warn => (
            "Delivery Status Notification (Delay)",
            "Your message has not yet been delivered to the following recipients.\n\
             The server will keep trying; you do not need to resend it.",
        ),
    };

    let mut body = String::with_capacity(256);
    let _ = writeln!(body, "{preamble}\n");
    for rcpt in &report {
        if rcpt.diagnostic.is_empty() {
            let _ = writeln!(body, "  {}", rcpt.addr);
        } else {
            let _ = writeln!(body, "  {}: {}", rcpt.addr, rcpt.diagnostic);
        }
    }

    let mime = MessageBuilder::new()
        .from((BOUNCE_SOURCE.to_string(), format!("MAILER-DAEMON@{fqdn}")))
        .to(job.bounceto.clone())
        .subject(subject)
        .text_body(body)
        .write_to_vec();
    let mime = match mime {
        Ok(mime) => mime,
        Err(err) => {
            trc::error!(
                trc::QueueEvent::QueueRunSkipped
                    .reason(err)
                    .details("cannot compose bounce")
            );
            return;
        }
    };

    let mut bounce = CtdlMessage::new();
    bounce.format_type = FMT_RFC822;
    bounce.set(F_AUTHOR, BOUNCE_SOURCE);
    bounce.set(F_SUBJECT, subject);
    bounce.set(F_JOURNAL, "do not journal");
    bounce.set(F_BODY, String::from_utf8_lossy(&mime).into_owned());

    let recps = classify_bounce_address(server, &job.bounceto, &fqdn);
    match server.submit_msg(&mut bounce, Some(&recps), "").await {
        Ok(_) => {
            let event = match mode {
                BounceMode::Warn => trc::QueueEvent::DelayWarningSent,
                _ => trc::QueueEvent::BounceSent,
            };
            trc::event!(Queue(event), AccountName = job.bounceto.clone());
        }
        Err(err) => {
            trc::error!(err.details("cannot submit bounce"));
        }
    }
}

/// A bounce address on our own domain is a local delivery; anything else
/// goes back out through the queue (with no further bounce address).
fn classify_bounce_address(_server: &Server, address: &str, fqdn: &str) -> RecipientSet {
    let mut recps = RecipientSet {
        display_recp: address.to_string(),
        ..Default::default()
    };
    match address.rsplit_once('@') {
        Some((_, domain)) if !domain.eq_ignore_ascii_case(fqdn) => {
            recps.recp_internet.push(address.to_string());
        }
        Some((local, _)) => {
            recps.recp_local.push(local.to_string());
        }
        None => {
            recps.recp_local.push(address.to_string());
        }
    }
    recps
}
