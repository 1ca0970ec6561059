/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use super::{trim_response, url_escape};
use common::{Server, message::F_RFC822_ADDR};
use mail_send::SmtpClientBuilder;
use message::{MessageStore, convert::to_rfc822};
use std::time::Duration;

const SMTP_CLIENT_TIMEOUT: Duration = Duration::from_secs(20);

/// Attempt delivery of one message to one recipient. Returns a three-digit
/// SMTP status code plus the trimmed server response; connection-level
/// failures map to 421 so they stay transient.
pub async fn attempt_delivery(
    server: &Server,
    resolver: Option<&mail_auth::MessageAuthenticator>,
    msgid: i64,
    recipient: &str,
    envelope_from: Option<&str>,
    source_room: Option<&str>,
) -> (i32, String) {
    trc::event!(
        Queue(trc::QueueEvent::AttemptStart),
        MsgNum = msgid,
        AccountName = recipient.to_string(),
    );

    let msg = match server.fetch_message(msgid, true).await {
        Ok(Some(msg)) => msg,
        Ok(None) => return (550, "550 message no longer exists".to_string()),
        Err(err) => {
            trc::error!(err.details("cannot load payload message"));
            return (421, "421 temporary local error".to_string());
        }
    };

    let fqdn = server.config().str_or("c_fqdn", "localhost");

    // List mail gets an unsubscribe pointer injected ahead of the payload
    // headers.
    let extra_headers = match source_room {
        Some(room) => format!(
            "List-Unsubscribe: <http://{fqdn}/listsub?cmd=unsubscribe&room={}&email={}>\r\n",
            url_escape(room),
            url_escape(recipient),
        ),
        None => String::new(),
    };
    let body = to_rfc822(&msg, &fqdn, &extra_headers).into_bytes();

    let mail_from = envelope_from
        .map(|s| s.to_string())
        .or_else(|| msg.get(F_RFC822_ADDR).map(|s| s.to_string()))
        .unwrap_or_else(|| format!("noreply@{fqdn}"));

    let Some(domain) = recipient.rsplit_once('@').map(|(_, d)| d.to_string()) else {
        return (550, "550 malformed recipient address".to_string());
    };

    let hosts = resolve_mx(resolver, &domain).await;
    if hosts.is_empty() {
        trc::event!(
            Queue(trc::QueueEvent::MxLookupFailed),
            Hostname = domain.clone(),
        );
        return (421, "421 cannot resolve any mail exchanger".to_string());
    }

    let disable_starttls = server.config().get_bool("c_smtpclient_disable_starttls");
    let mut code = 421;
    let mut response = "421 no delivery attempted".to_string();
    for host in &hosts {
        if code / 100 != 4 {
            break;
        }
        (code, response) = attempt_one_host(
            host,
            &fqdn,
            &mail_from,
            recipient,
            body.clone(),
            disable_starttls,
        )
        .await;
    }
    (code, response)
}

/// MX records in preference order; a domain with no MX is tried directly.
async fn resolve_mx(resolver: Option<&mail_auth::MessageAuthenticator>, domain: &str) -> Vec<String> {
    let Some(resolver) = resolver else {
        return vec![domain.to_string()];
    };
    match resolver
        .mx_lookup(domain, None::<&mail_auth::common::cache::NoCache<String, std::sync::Arc<Vec<mail_auth::MX>>>>)
        .await
    {
        Ok(records) => {
            let mut hosts = Vec::new();
            for mx in records.iter() {
                for exchange in &mx.exchanges {
                    hosts.push(exchange.trim_end_matches('.').to_string());
                }
            }
            if hosts.is_empty() {
                hosts.push(domain.to_string());
            }
            hosts
        }
        Err(mail_auth::Error::DnsRecordNotFound(_)) => vec![domain.to_string()],
        Err(err) => {
            trc::event!(
                Queue(trc::QueueEvent::MxLookupFailed),
                Hostname = domain.to_string(),
                Reason = err.to_string(),
            );
            Vec::new()
        }
    }
}

/// One MX: implicit TLS first, then cleartext with opportunistic STARTTLS
/// unless the administrator disabled it.
async fn attempt_one_host(
    host: &str,
    helo_host: &str,
    mail_from: &str,
    recipient: &str,
    body: Vec<u8>,
    disable_starttls: bool,
) -> (i32, String) {
    // smtps:// on the dedicated port.
    match SmtpClientBuilder::new(host.to_string(), 465)
        .implicit_tls(true)
        .helo_host(helo_host.to_string())
        .allow_invalid_certs()
        .timeout(SMTP_CLIENT_TIMEOUT)
        .connect()
        .await
    {
        Ok(mut client) => {
            return map_send_result(
                client
                    .send(mail_send::smtp::message::Message::new(
                        mail_from,
                        vec![recipient],
                        body,
                    ))
                    .await,
            );
        }
        Err(_) => {
            // Fall back to smtp:// on the standard port.
        }
    }

    let builder = SmtpClientBuilder::new(host.to_string(), 25)
        .implicit_tls(false)
        .helo_host(helo_host.to_string())
        .allow_invalid_certs()
        .timeout(SMTP_CLIENT_TIMEOUT);

    if disable_starttls {
        match builder.connect_plain().await {
            Ok(mut client) => map_send_result(
                client
                    .send(mail_send::smtp::message::Message::new(
                        mail_from,
                        vec![recipient],
                        body,
                    ))
                    .await,
            ),
            Err(err) => connection_failure(err),
        }
    } else {
        match builder.clone().connect().await {
            Ok(mut client) => map_send_result(
                client
                    .send(mail_send::smtp::message::Message::new(
                        mail_from,
                        vec![recipient],
                        body,
                    ))
                    .await,
            ),
            // STARTTLS unavailable or the handshake failed; the peer may
            // still take the message in cleartext.
            Err(mail_send::Error::MissingStartTls | mail_send::Error::Tls(_)) => {
                match builder.connect_plain().await {
                    Ok(mut client) => map_send_result(
                        client
                            .send(mail_send::smtp::message::Message::new(
                                mail_from,
                                vec![recipient],
                                body,
                            ))
                            .await,
                    ),
                    Err(err) => connection_failure(err),
                }
            }
            Err(err) => connection_failure(err),
        }
    }
}

fn map_send_result(result: Result<(), mail_send::Error>) -> (i32, String) {
    match result {
        Ok(()) => (250, "250 2.0.0 message accepted for delivery".to_string()),
        Err(mail_send::Error::UnexpectedReply(reply)) => {
            let code = reply.code() as i32;
            let text = format!("{code} {}", reply.message);
            (code, trim_response(code, &text))
        }
        Err(err) => connection_failure(err),
    }
}

fn connection_failure(err: mail_send::Error) -> (i32, String) {
    (421, trim_response(421, &format!("421 {err}")))
}
