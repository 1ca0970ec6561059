/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use crate::{
    ALREADY_EXISTS, ALREADY_LOGGED_IN, CIT_OK, CMD_NOT_SUPPORTED, ERROR, HIGHER_ACCESS_REQUIRED,
    ILLEGAL_VALUE, INTERNAL_ERROR, LISTING_END, LISTING_FOLLOWS, MAX_SESSIONS_EXCEEDED, MORE_DATA,
    NOT_HERE, NOT_LOGGED_IN, PASSWORD_REQUIRED, SEND_LISTING, USERNAME_REQUIRED,
    session::{AccessLevel, Session},
};
use common::{
    DEFAULT_ADMIN_PASSWORD, DEFAULT_ADMIN_USERNAME, MAILROOM, SENTITEMS, Server, UA_GOTOALLOWED,
    auth::PassResult,
    listener::{KillReason, TERM_ALLOWED, TERM_FOUND, TERM_KILLED},
    message::{CtdlMessage, F_AUTHOR, F_BODY, F_RFC822_ADDR, F_SUBJECT, RecipientSet},
    registry::{HookEvent, ProtoContext},
};
use message::MessageStore;
use message::submit::SubmitMsg;
use rooms::{
    RoomDir, RoomType, access::RoomGoto, access::room_access, mailbox_name,
    msglist::MsgListDir, visits::VisitDir,
};
use std::sync::atomic::Ordering;
use users::{UserDir, login};

pub async fn dispatch(session: &mut Session, verb: &str, args: &str) {
    match verb {
        "NOOP" => session.cprintf(format!("{CIT_OK} ok")),
        "ECHO" => session.cprintf(format!("{CIT_OK} {args}")),
        "IDEN" => session.cprintf(format!("{CIT_OK} ok")),
        "QUIT" => {
            session.cprintf(format!("{CIT_OK} Goodbye."));
            session.shared.kill(KillReason::ClientLoggedOut);
        }
        "USER" => cmd_user(session, args).await,
        "PASS" => cmd_pass(session, args).await,
        "LOUT" => cmd_lout(session).await,
        "INFO" => cmd_info(session),
        "GOTO" => cmd_goto(session, args).await,
        "MSGS" => cmd_msgs(session).await,
        "MSG0" => cmd_msg0(session, args).await,
        "ENT0" => cmd_ent0(session, args).await,
        "CRE8" => cmd_cre8(session, args).await,
        "SETP" => cmd_setp(session, args).await,
        "RWHO" => cmd_rwho(session),
        "SEXP" => cmd_sexp(session, args).await,
        "GEXP" => cmd_gexp(session),
        "TERM" => cmd_term(session, args),
        "DOWN" => cmd_down(session).await,
        "TLS" => cmd_starttls(session).await,
        "MIGR" => crate::migrate::cmd_migr(session, args).await,
        _ => {
            // Extension verbs registered by other modules.
            let verb_bytes: [u8; 4] = {
                let mut padded = [b' '; 4];
                for (i, b) in verb.bytes().take(4).enumerate() {
                    padded[i] = b;
                }
                padded
            };
            let server = session.server.clone();
            if let Some(handler) = server.registry().proto_handler(&verb_bytes) {
                let mut ctx = ProtoContext {
                    session: session.shared.clone(),
                    args: args.to_string(),
                    out: String::new(),
                };
                handler.handle(&server, &mut ctx).await;
                session.cprintf(ctx.out);
            } else {
                session.cprintf(format!(
                    "{} ERROR: command not supported",
                    ERROR + CMD_NOT_SUPPORTED
                ));
            }
        }
    }
}

async fn cmd_user(session: &mut Session, args: &str) {
    let name = args.trim();
    if session.user.is_some() {
        session.cprintf(format!(
            "{} ERROR: already logged in",
            ERROR + ALREADY_LOGGED_IN
        ));
        return;
    }
    if session.shared.nologin {
        session.cprintf(format!(
            "{} ERROR: too many users are already online",
            ERROR + MAX_SESSIONS_EXCEEDED
        ));
        return;
    }
    // During single-user maintenance only the engaging session gets in.
    if session.server.inner.data.single_user.is_engaged()
        && !session.server.try_single_user(session.shared.id)
    {
        session.cprintf(format!(
            "{} ERROR: the server is in single-user maintenance mode",
            ERROR + MAX_SESSIONS_EXCEEDED
        ));
        return;
    }
    if name.is_empty() {
        session.cprintf(format!(
            "{} ERROR: a username is required",
            ERROR + USERNAME_REQUIRED
        ));
        return;
    }

    let server = session.server.clone();
    let auth = session.auth.clone();
    match auth.lookup_or_provision(&server, name).await {
        Ok(Some(user)) => {
            session.cprintf(format!(
                "{MORE_DATA} Password required for {}",
                user.fullname
            ));
            session.user_candidate = Some(user);
        }
        Ok(None) => {
            // A fresh database accepts the bootstrap admin account on
            // first login.
            if users::same_user(name, DEFAULT_ADMIN_USERNAME)
                && server
                    .get_user_by_number(1)
                    .await
                    .ok()
                    .flatten()
                    .is_none()
            {
                session.cprintf(format!(
                    "{MORE_DATA} Password required for {DEFAULT_ADMIN_USERNAME}"
                ));
                session.user_candidate = None;
            } else {
                trc::event!(
                    Auth(trc::AuthEvent::NoSuchUser),
                    AccountName = name.to_string(),
                    SessionId = session.shared.id,
                );
                session.cprintf(format!("{} ERROR: no such user", ERROR + NOT_HERE));
            }
        }
        Err(err) => {
            trc::error!(err.details("user lookup failed"));
            session.cprintf(format!(
                "{} ERROR: internal error",
                ERROR + INTERNAL_ERROR
            ));
        }
    }
}

async fn cmd_pass(session: &mut Session, args: &str) {
    let server = session.server.clone();

    // Bootstrap path: empty database, default admin credentials.
    if session.user_candidate.is_none() {
        if args.trim() == DEFAULT_ADMIN_PASSWORD
            && server.get_user_by_number(1).await.ok().flatten().is_none()
        {
            match server
                .create_user(DEFAULT_ADMIN_USERNAME, common::AX_AIDE, users::NO_UID)
                .await
            {
                Ok(mut admin) => {
                    admin.password = DEFAULT_ADMIN_PASSWORD.to_string();
                    if let Err(err) = server.put_user(&admin).await {
                        trc::error!(err.details("cannot store bootstrap admin"));
                    }
                    server
                        .run_user_hooks(
                            &admin.fullname,
                            admin.usernum,
                            common::registry::UserHookEvent::NewUser,
                        )
                        .await;
                    session.user_candidate = Some(admin);
                }
                Err(err) => {
                    trc::error!(err.details("cannot create bootstrap admin"));
                    session.cprintf(format!(
                        "{} ERROR: internal error",
                        ERROR + INTERNAL_ERROR
                    ));
                    return;
                }
            }
        } else {
            session.cprintf(format!(
                "{} ERROR: send a USER command first",
                ERROR + USERNAME_REQUIRED
            ));
            return;
        }
    }

    let mut user = session.user_candidate.take().unwrap();
    let result = session
        .auth
        .validate_password(&server, &user, args)
        .await;
    match result {
        PassResult::Ok => {}
        PassResult::WrongPassword | PassResult::NoUser => {
            trc::event!(
                Auth(trc::AuthEvent::Failed),
                AccountName = user.fullname.clone(),
                SessionId = session.shared.id,
            );
            session.cprintf(format!(
                "{} ERROR: wrong password",
                ERROR + PASSWORD_REQUIRED
            ));
            return;
        }
        PassResult::AlreadyLoggedIn => {
            session.cprintf(format!(
                "{} ERROR: already logged in",
                ERROR + ALREADY_LOGGED_IN
            ));
            return;
        }
        PassResult::InternalError => {
            session.cprintf(format!(
                "{} ERROR: internal error validating password",
                ERROR + INTERNAL_ERROR
            ));
            return;
        }
    }

    let info = match login::do_login(&server, &session.shared, &mut user).await {
        Ok(info) => info,
        Err(err) => {
            trc::error!(err.details("login bookkeeping failed"));
            session.cprintf(format!(
                "{} ERROR: internal error",
                ERROR + INTERNAL_ERROR
            ));
            return;
        }
    };

    // Make sure the user's mailbox rooms exist.
    for suffix in [MAILROOM, SENTITEMS] {
        let name = mailbox_name(user.usernum, suffix);
        if let Err(err) = server
            .create_room(&name, RoomType::Personal, "", 0, common::VIEW_MAILBOX)
            .await
        {
            trc::error!(err.details("cannot create mailbox room"));
        }
    }

    session.cprintf(format!(
        "{CIT_OK} {}|{}|{}|{}|{}|{}|{}",
        user.fullname,
        user.axlevel,
        user.timescalled,
        user.posted,
        user.flags,
        user.usernum,
        info.prevlogin,
    ));
    session.user = Some(user);
    server
        .run_session_hooks(HookEvent::Login, Some(&session.shared))
        .await;
}

async fn cmd_lout(session: &mut Session) {
    if session.user.take().is_some() {
        let server = session.server.clone();
        server
            .run_session_hooks(HookEvent::Logout, Some(&session.shared))
            .await;
        login::do_logout(&session.shared);
    }
    session.cprintf(format!("{CIT_OK} logged out."));
}

fn cmd_info(session: &mut Session) {
    let session_id = session.shared.id.to_string();
    let nodename = session.server.config().str_or("c_nodename", "citadel");
    let humannode = session.server.config().str_or("c_humannode", "Citadel Server");
    let fqdn = session.server.config().str_or("c_fqdn", "localhost");
    session.cprintf(format!("{LISTING_FOLLOWS} Server info"));
    session.cprintf(session_id);
    session.cprintf(nodename);
    session.cprintf(humannode);
    session.cprintf(fqdn);
    session.cprintf(common::DAEMON_NAME);
    session.cprintf(LISTING_END);
}

async fn cmd_goto(session: &mut Session, args: &str) {
    if !session.access_check(AccessLevel::LoggedIn) {
        return;
    }
    let mut tokens = args.split('|');
    let room_name = tokens.next().unwrap_or("").trim();
    let password = tokens.next().unwrap_or("");

    let server = session.server.clone();
    let Ok(Some(room)) = server.get_room(room_name).await else {
        session.cprintf(format!("{} ERROR: no such room", ERROR + NOT_HERE));
        return;
    };
    let Some(user) = session.user.clone() else {
        session.cprintf(format!("{} ERROR: not logged in", ERROR + NOT_LOGGED_IN));
        return;
    };

    let visit = match server.get_visit(&room, user.usernum).await {
        Ok(mut visit) => {
            // A correct password grants access to a passworded room.
            if room.flags & common::QR_PASSWORDED != 0
                && !password.is_empty()
                && password == room.password
                && visit.flags & common::V_ACCESS == 0
            {
                visit.flags |= common::V_ACCESS;
                if let Err(err) = server.put_visit(&visit).await {
                    trc::error!(err.details("cannot update visit"));
                }
            }
            visit
        }
        Err(err) => {
            trc::error!(err.details("cannot read visit"));
            session.cprintf(format!("{} ERROR: internal error", ERROR + INTERNAL_ERROR));
            return;
        }
    };

    let (access, _) = room_access(&room, &user, &visit);
    if access & UA_GOTOALLOWED == 0 {
        session.cprintf(format!("{} ERROR: access denied", ERROR + NOT_HERE));
        return;
    }

    match server.goto_room(&user, &room).await {
        Ok(bundle) => {
            *session.shared.room.lock() = room.name.clone();
            server
                .run_session_hooks(HookEvent::NewRoom, Some(&session.shared))
                .await;
            session.cprintf(format!(
                "{CIT_OK} {}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
                bundle.room_name,
                bundle.new_msgs,
                bundle.total_msgs,
                bundle.msgnum_info,
                bundle.flags,
                bundle.highest,
                bundle.last_seen,
                bundle.is_mail as u8,
                bundle.is_aide as u8,
                bundle.new_mail,
                bundle.floor,
                bundle.cur_view,
                bundle.default_view,
                bundle.is_trash as u8,
                bundle.flags2,
                bundle.mtime,
            ));
        }
        Err(err) => {
            trc::error!(err.details("goto failed"));
            session.cprintf(format!("{} ERROR: internal error", ERROR + INTERNAL_ERROR));
        }
    }
}

async fn cmd_msgs(session: &mut Session) {
    if !session.access_check(AccessLevel::LoggedIn) {
        return;
    }
    let server = session.server.clone();
    let room_name = session.current_room();
    let Ok(Some(room)) = server.get_room(&room_name).await else {
        session.cprintf(format!("{} ERROR: no such room", ERROR + NOT_HERE));
        return;
    };
    match server.get_msglist(room.number).await {
        Ok(msgnums) => {
            session.cprintf(format!("{LISTING_FOLLOWS} Message list"));
            for msgnum in msgnums {
                session.cprintf(msgnum.to_string());
            }
            session.cprintf(LISTING_END);
        }
        Err(err) => {
            trc::error!(err.details("cannot read message list"));
            session.cprintf(format!("{} ERROR: internal error", ERROR + INTERNAL_ERROR));
        }
    }
}

/// Classify a comma-separated recipient list against the local domain.
fn classify_recipients(server: &Server, recipients: &str, sender_email: &str) -> RecipientSet {
    let fqdn = server.config().str_or("c_fqdn", "localhost");
    let mut recps = RecipientSet {
        bounce_to: sender_email.to_string(),
        display_recp: recipients.to_string(),
        ..Default::default()
    };
    for token in recipients.split([',', ';']) {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        match token.rsplit_once('@') {
            Some((local, domain)) if domain.eq_ignore_ascii_case(&fqdn) => {
                recps.recp_local.push(local.to_string());
            }
            Some(_) => recps.recp_internet.push(token.to_string()),
            None => recps.recp_local.push(token.to_string()),
        }
    }
    recps
}

async fn cmd_ent0(session: &mut Session, args: &str) {
    if !session.access_check(AccessLevel::LoggedIn) {
        return;
    }
    let mut tokens = args.split('|');
    let post = tokens.next().unwrap_or("0") != "0";
    let recipients = tokens.next().unwrap_or("").to_string();
    let _anon = tokens.next();
    let _format = tokens.next();
    let subject = tokens.next().unwrap_or("").to_string();

    let Some(user) = session.user.clone() else {
        session.cprintf(format!("{} ERROR: not logged in", ERROR + NOT_LOGGED_IN));
        return;
    };
    let server = session.server.clone();
    let recps = if recipients.is_empty() {
        None
    } else {
        Some(classify_recipients(
            &server,
            &recipients,
            user.primary_email().unwrap_or(""),
        ))
    };

    // Validate-only probe.
    if !post {
        match &recps {
            Some(recps) if recps.is_empty() => {
                session.cprintf(format!(
                    "{} ERROR: no valid recipients",
                    ERROR + ILLEGAL_VALUE
                ));
            }
            _ => session.cprintf(format!("{CIT_OK} ok to send")),
        }
        return;
    }

    session.cprintf(format!("{SEND_LISTING} send message; end with 000"));
    if session.flush_output().await.is_err() {
        return;
    }
    let Ok(body) = session.read_text_block().await else {
        return;
    };

    let mut msg = CtdlMessage::new();
    msg.set(F_AUTHOR, user.fullname.clone());
    if let Some(addr) = user.primary_email() {
        msg.set(F_RFC822_ADDR, addr);
    }
    if !subject.is_empty() {
        msg.set(F_SUBJECT, subject);
    }
    for rcpt in recps.iter().flat_map(|r| r.recp_local.iter()) {
        msg.append(common::message::F_RECIPIENT, rcpt.clone());
    }
    for rcpt in recps.iter().flat_map(|r| r.recp_internet.iter()) {
        msg.append(common::message::F_RECIPIENT, rcpt.clone());
    }
    msg.set(common::message::F_ROOM, session.current_room());
    msg.set(F_BODY, body);

    // Mail goes into the sender's Sent Items; room posts stay in the
    // current room.
    let target_room = if recps.is_some() {
        mailbox_name(user.usernum, SENTITEMS)
    } else {
        session.current_room()
    };

    match server.submit_msg(&mut msg, recps.as_ref(), &target_room).await {
        Ok(msgnum) => {
            // Update the author's posting counter.
            if let Ok(Some(mut fresh)) = server.get_user(&user.fullname).await {
                fresh.posted += 1;
                if let Err(err) = server.put_user(&fresh).await {
                    trc::error!(err.details("cannot bump post counter"));
                }
            }
            session.cprintf(format!("{CIT_OK} message {msgnum} accepted"));
        }
        Err(err) => {
            trc::error!(err.details("message submission failed"));
            session.cprintf(format!(
                "{} ERROR: message rejected",
                ERROR + ILLEGAL_VALUE
            ));
        }
    }
}

async fn cmd_msg0(session: &mut Session, args: &str) {
    if !session.access_check(AccessLevel::LoggedIn) {
        return;
    }
    let Ok(msgnum) = args.split('|').next().unwrap_or("").trim().parse::<i64>() else {
        session.cprintf(format!(
            "{} ERROR: a message number is required",
            ERROR + ILLEGAL_VALUE
        ));
        return;
    };

    let server = session.server.clone();
    let room_name = session.current_room();
    let Ok(Some(room)) = server.get_room(&room_name).await else {
        session.cprintf(format!("{} ERROR: no such room", ERROR + NOT_HERE));
        return;
    };
    // Only messages filed in the current room are readable through it.
    let in_room = server
        .get_msglist(room.number)
        .await
        .map(|list| list.contains(&msgnum))
        .unwrap_or(false);
    if !in_room {
        session.cprintf(format!(
            "{} ERROR: message not found in this room",
            ERROR + NOT_HERE
        ));
        return;
    }

    match server.fetch_message(msgnum, true).await {
        Ok(Some(msg)) => {
            let author = msg.author().to_string();
            let subject = msg.subject().unwrap_or("").to_string();
            let timestamp = msg.timestamp();
            let body = msg.body().unwrap_or("").to_string();
            session.cprintf(format!("{LISTING_FOLLOWS} message {msgnum}"));
            session.cprintf(format!("from={author}"));
            if !subject.is_empty() {
                session.cprintf(format!("subj={subject}"));
            }
            session.cprintf(format!("time={timestamp}"));
            session.cprintf("text");
            for line in body.lines() {
                // Listing terminators inside bodies get a guard space.
                if line == LISTING_END {
                    session.cprintf(format!(" {line}"));
                } else {
                    session.cprintf(line);
                }
            }
            session.cprintf(LISTING_END);
        }
        Ok(None) => {
            session.cprintf(format!("{} ERROR: no such message", ERROR + NOT_HERE));
        }
        Err(err) => {
            trc::error!(err.details("cannot fetch message"));
            session.cprintf(format!("{} ERROR: internal error", ERROR + INTERNAL_ERROR));
        }
    }
}

async fn cmd_cre8(session: &mut Session, args: &str) {
    if !session.access_check(AccessLevel::LoggedIn) {
        return;
    }
    let mut tokens = args.split('|');
    let really_create = tokens.next().unwrap_or("0") != "0";
    let name = tokens.next().unwrap_or("").trim().to_string();
    let room_type = match tokens.next().unwrap_or("0").trim().parse::<u8>() {
        Ok(0) => RoomType::Public,
        Ok(1) => RoomType::GuessName,
        Ok(2) => RoomType::Passworded,
        Ok(3) => RoomType::InvitationOnly,
        Ok(4) => RoomType::Personal,
        _ => {
            session.cprintf(format!(
                "{} ERROR: invalid room type",
                ERROR + ILLEGAL_VALUE
            ));
            return;
        }
    };
    let password = tokens.next().unwrap_or("").to_string();
    let floor = tokens
        .next()
        .and_then(|f| f.trim().parse::<u8>().ok())
        .unwrap_or(0);

    if name.is_empty() {
        session.cprintf(format!(
            "{} ERROR: a room name is required",
            ERROR + ILLEGAL_VALUE
        ));
        return;
    }
    let min_access = session.server.config().int_or("c_createax", 3) as u8;
    if session.user.as_ref().is_some_and(|u| u.axlevel < min_access) && !session.is_aide() {
        session.cprintf(format!(
            "{} ERROR: higher access is required to create rooms",
            ERROR + HIGHER_ACCESS_REQUIRED
        ));
        return;
    }
    if !really_create {
        session.cprintf(format!("{CIT_OK} ok to create"));
        return;
    }

    let server = session.server.clone();
    match server
        .create_room(&name, room_type, &password, floor, common::VIEW_BBS)
        .await
    {
        Ok(true) => session.cprintf(format!("{CIT_OK} '{name}' has been created.")),
        Ok(false) => session.cprintf(format!(
            "{} ERROR: a room with that name already exists",
            ERROR + ALREADY_EXISTS
        )),
        Err(err) => {
            trc::error!(err.details("room creation failed"));
            session.cprintf(format!(
                "{} ERROR: invalid room name or floor",
                ERROR + ILLEGAL_VALUE
            ));
        }
    }
}

async fn cmd_setp(session: &mut Session, args: &str) {
    if !session.access_check(AccessLevel::LoggedIn) {
        return;
    }
    if session.auth.mode != common::auth::AuthMode::Native {
        session.cprintf(format!(
            "{} ERROR: passwords are not managed by this server",
            ERROR + CMD_NOT_SUPPORTED
        ));
        return;
    }
    let Some(mut user) = session.user.clone() else {
        session.cprintf(format!("{} ERROR: not logged in", ERROR + NOT_LOGGED_IN));
        return;
    };
    user.password = args.trim().to_string();
    let server = session.server.clone();
    match server.put_user(&user).await {
        Ok(()) => {
            session.user = Some(user);
            server
                .run_session_hooks(HookEvent::SetPass, Some(&session.shared))
                .await;
            session.cprintf(format!("{CIT_OK} password changed."));
        }
        Err(err) => {
            trc::error!(err.details("cannot store new password"));
            session.cprintf(format!("{} ERROR: internal error", ERROR + INTERNAL_ERROR));
        }
    }
}

fn cmd_rwho(session: &mut Session) {
    let now = store::now();
    let sessions = session.server.sessions().snapshot();
    session.cprintf(format!("{LISTING_FOLLOWS} Who is online"));
    for s in sessions {
        session.cprintf(format!(
            "{}|{}|{}|{}|{}|{}",
            s.id,
            s.user_name(),
            s.room.lock().clone(),
            s.remote_addr,
            s.protocol,
            now.saturating_sub(s.lastcmd.load(Ordering::Relaxed)),
        ));
    }
    session.cprintf(LISTING_END);
}

async fn cmd_sexp(session: &mut Session, args: &str) {
    if !session.access_check(AccessLevel::LoggedIn) {
        return;
    }
    let Some((recipient, text)) = args.split_once('|') else {
        session.cprintf(format!(
            "{} ERROR: usage: SEXP recipient|message",
            ERROR + ILLEGAL_VALUE
        ));
        return;
    };
    let Some(user) = session.user.clone() else {
        session.cprintf(format!("{} ERROR: not logged in", ERROR + NOT_LOGGED_IN));
        return;
    };
    let server = session.server.clone();
    let delivered = server
        .run_xmsg_hooks(
            &user.fullname,
            user.primary_email().unwrap_or(""),
            recipient.trim(),
            text,
        )
        .await;
    if delivered > 0 {
        session.cprintf(format!("{CIT_OK} message sent"));
    } else {
        session.cprintf(format!(
            "{} ERROR: {} is not logged in",
            ERROR + NOT_HERE,
            recipient.trim()
        ));
    }
}

fn cmd_gexp(session: &mut Session) {
    let messages = session.shared.take_express();
    if messages.is_empty() {
        session.cprintf(format!("{} ERROR: no express messages", ERROR + NOT_HERE));
        return;
    }
    for msg in messages {
        session.cprintf(format!(
            "{LISTING_FOLLOWS} {}|{}",
            msg.sender, msg.timestamp
        ));
        session.cprintf(&msg.text);
        session.cprintf(LISTING_END);
    }
}

fn cmd_term(session: &mut Session, args: &str) {
    let Ok(target) = args.trim().parse::<u64>() else {
        session.cprintf(format!(
            "{} ERROR: a session number is required",
            ERROR + ILLEGAL_VALUE
        ));
        return;
    };
    if !session.access_check(AccessLevel::LoggedIn) {
        return;
    }
    let result = session
        .server
        .sessions()
        .terminate_other_session(&session.shared, target);
    if result & TERM_KILLED != 0 {
        session.cprintf(format!("{CIT_OK} session {target} terminated"));
    } else if result & TERM_FOUND != 0 && result & TERM_ALLOWED == 0 {
        session.cprintf(format!(
            "{} ERROR: higher access is required",
            ERROR + HIGHER_ACCESS_REQUIRED
        ));
    } else {
        session.cprintf(format!("{} ERROR: no such session", ERROR + NOT_HERE));
    }
}

async fn cmd_down(session: &mut Session) {
    if !session.access_check(AccessLevel::Aide) {
        return;
    }
    session.cprintf(format!("{CIT_OK} shutting down server; goodbye"));
    let _ = session.flush_output().await;
    trc::event!(Server(trc::ServerEvent::Shutdown), SessionId = session.shared.id);
    session.server.shutdown();
    session.shared.kill(KillReason::ServerShuttingDown);
}

async fn cmd_starttls(session: &mut Session) {
    if session.stream.as_ref().is_none_or(|s| s.is_tls()) {
        session.cprintf(format!(
            "{} ERROR: TLS is already active",
            ERROR + ILLEGAL_VALUE
        ));
        return;
    }
    session.cprintf(format!("{CIT_OK} begin TLS negotiation now"));
    if session.flush_output().await.is_err() {
        return;
    }
    let stream = session.stream.take().unwrap();
    match session.instance.tls_accept(stream).await {
        Ok(tls_stream) => {
            session.stream = Some(tls_stream);
        }
        Err(_) => {
            session.shared.kill(KillReason::NoCrypto);
        }
    }
}
