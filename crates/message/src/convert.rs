/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use chrono::{TimeZone, Utc};
use common::message::{
    CtdlMessage, F_CC, F_LIST_ID, F_MSGID, F_RECIPIENT, F_REFERENCES, F_REPLY_TO,
    F_RFC822_ADDR, F_SUBJECT, FMT_RFC822,
};

/// Render a stored message in RFC822 form for SMTP upload and journaling.
/// Messages already stored as RFC822 pass through with their own headers;
/// native-format messages get a minimal header block synthesized from the
/// typed fields. `extra_headers` lines (CRLF-terminated) are injected ahead
/// of everything else.
pub fn to_rfc822(msg: &CtdlMessage, node_fqdn: &str, extra_headers: &str) -> String {
    let body = msg.body().unwrap_or("");

    if msg.format_type == FMT_RFC822 {
        let mut out = String::with_capacity(extra_headers.len() + body.len());
        out.push_str(extra_headers);
        out.push_str(body);
        return out;
    }

    let mut out = String::with_capacity(256 + extra_headers.len() + body.len());
    out.push_str(extra_headers);

    let author = msg.author();
    match msg.get(F_RFC822_ADDR) {
        Some(addr) => push_header(&mut out, "From", &format!("\"{author}\" <{addr}>")),
        None => push_header(
            &mut out,
            "From",
            &format!("\"{author}\" <{}@{node_fqdn}>", author.replace(' ', "_")),
        ),
    }

    let recipients: Vec<&str> = msg.get_all(F_RECIPIENT).collect();
    if !recipients.is_empty() {
        push_header(&mut out, "To", &recipients.join(", "));
    }
    let cc: Vec<&str> = msg.get_all(F_CC).collect();
    if !cc.is_empty() {
        push_header(&mut out, "Cc", &cc.join(", "));
    }
    if let Some(subject) = msg.get(F_SUBJECT) {
        push_header(&mut out, "Subject", subject);
    }
    if let Some(reply_to) = msg.get(F_REPLY_TO) {
        push_header(&mut out, "Reply-To", reply_to);
    }
    if let Some(list_id) = msg.get(F_LIST_ID) {
        push_header(&mut out, "List-Id", list_id);
    }
    if let Some(references) = msg.get(F_REFERENCES) {
        push_header(&mut out, "References", references);
    }

    let msgid = match msg.get(F_MSGID) {
        Some(id) if id.contains('@') => id.to_string(),
        Some(id) => format!("{id}@{node_fqdn}"),
        None => format!("{}@{node_fqdn}", msg.timestamp()),
    };
    push_header(&mut out, "Message-ID", &format!("<{msgid}>"));

    let date = Utc
        .timestamp_opt(msg.timestamp() as i64, 0)
        .single()
        .unwrap_or_else(Utc::now);
    push_header(&mut out, "Date", &date.to_rfc2822());

    out.push_str("\r\n");
    for line in body.lines() {
        out.push_str(line);
        out.push_str("\r\n");
    }
    out
}

fn push_header(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push_str(": ");
    out.push_str(value);
    out.push_str("\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::message::{F_AUTHOR, F_BODY, F_TIMESTAMP};

    #[test]
    fn native_message_gets_headers() {
        let mut msg = CtdlMessage::new();
        msg.set(F_AUTHOR, "alice");
        msg.set(F_RFC822_ADDR, "alice@example.com");
        msg.set(F_SUBJECT, "greetings");
        msg.set(F_TIMESTAMP, "1700000000");
        msg.append(F_RECIPIENT, "bob@other.example");
        msg.set(F_BODY, "hello\nworld");

        let rendered = to_rfc822(&msg, "example.com", "");
        assert!(rendered.starts_with("From: \"alice\" <alice@example.com>\r\n"));
        assert!(rendered.contains("To: bob@other.example\r\n"));
        assert!(rendered.contains("Subject: greetings\r\n"));
        assert!(rendered.contains("\r\n\r\nhello\r\nworld\r\n"));
    }

    #[test]
    fn extra_headers_lead() {
        let mut msg = CtdlMessage::new();
        msg.format_type = FMT_RFC822;
        msg.set(F_BODY, "Subject: x\r\n\r\nbody\r\n");
        let rendered = to_rfc822(&msg, "example.com", "List-Unsubscribe: <http://u>\r\n");
        assert!(rendered.starts_with("List-Unsubscribe: <http://u>\r\nSubject: x"));
    }
}
