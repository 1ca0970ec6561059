/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use crate::{
    CIT_OK, ERROR, HIGHER_ACCESS_REQUIRED, NOT_LOGGED_IN, SERVER_SHUTTING_DOWN,
};
use common::{
    AX_AIDE, Server,
    listener::{KillReason, ServerInstance, SessionData, SessionShared, stream::ClientStream},
    registry::HookEvent,
};
use directory::AuthService;
use std::{sync::Arc, time::Duration};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use users::UserRecord;

/// One protocol line may not exceed this; a peer that keeps sending gets
/// its session killed with the quota reason.
const MAX_LINE_LENGTH: usize = 65_536;

/// Per-verb access requirement, checked before the handler runs. The
/// check emits its own error reply on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLevel {
    None,
    LoggedIn,
    RoomAide,
    Aide,
    Internal,
}

pub struct Session {
    pub server: Server,
    pub shared: Arc<SessionShared>,
    pub instance: Arc<ServerInstance>,
    pub auth: Arc<AuthService>,
    pub internal: bool,
    pub stream: Option<ClientStream>,
    read_buf: Vec<u8>,
    read_pos: usize,
    read_len: usize,
    /// Buffered reply text; flushed after each command so a handler can
    /// build its response piecewise.
    out: String,
    /// Capture stack: while non-empty, output is diverted to the top
    /// entry instead of the wire.
    redirect: Vec<String>,
    pub user: Option<UserRecord>,
    pub user_candidate: Option<UserRecord>,
}

impl Session {
    pub fn new(
        server: Server,
        data: SessionData,
        auth: Arc<AuthService>,
        internal: bool,
    ) -> Self {
        Session {
            server,
            shared: data.shared,
            instance: data.instance,
            auth,
            internal,
            stream: Some(data.stream),
            read_buf: vec![0; 8192],
            read_pos: 0,
            read_len: 0,
            out: String::new(),
            redirect: Vec::new(),
            user: None,
            user_candidate: None,
        }
    }

    pub async fn run(mut self) {
        let nodename = self.server.config().str_or("c_nodename", "citadel");
        if self.shared.nologin {
            let max = self.server.config().int_or("c_maxsessions", 0);
            self.cprintf(format!(
                "{CIT_OK} {nodename} Citadel server ready; too many users are already online (maximum is {max})"
            ));
        } else {
            self.cprintf(format!("{CIT_OK} {nodename} Citadel server ready."));
        }
        if self.flush_output().await.is_err() {
            return;
        }

        loop {
            let line = match self.read_command_line().await {
                Ok(Some(line)) => line,
                Ok(None) | Err(()) => break,
            };
            self.shared.touch();

            let line = line.trim_end().to_string();
            let (verb, args) = match line.split_once(' ') {
                Some((verb, args)) => (verb.to_string(), args.to_string()),
                None => (line.clone(), String::new()),
            };
            let verb = verb.to_ascii_uppercase();

            self.server
                .run_session_hooks(HookEvent::Cmd, Some(&self.shared))
                .await;
            crate::cmds::dispatch(&mut self, &verb, &args).await;

            if self.flush_output().await.is_err() {
                self.shared.kill(KillReason::WriteFailed);
            }
            if self.shared.marked_for_death() {
                break;
            }
        }

        if self.user.is_some() {
            self.server
                .run_session_hooks(HookEvent::Logout, Some(&self.shared))
                .await;
        }
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }

    /// Read one line, honoring the idle timeout, the kill flag, and the
    /// server-wide shutdown signal.
    pub(crate) async fn read_command_line(&mut self) -> Result<Option<String>, ()> {
        let sleeping = self.server.config().int_or("c_sleeping", 900).max(1) as u64;
        let mut shutdown_rx = self.instance.shutdown_rx.clone();
        let mut line = Vec::new();

        loop {
            // Serve buffered bytes first.
            while self.read_pos < self.read_len {
                let byte = self.read_buf[self.read_pos];
                self.read_pos += 1;
                if byte == b'\n' {
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
                }
                line.push(byte);
                if line.len() > MAX_LINE_LENGTH {
                    self.shared.kill(KillReason::Quota);
                    return Err(());
                }
            }

            let Some(stream) = self.stream.as_mut() else {
                return Err(());
            };
            tokio::select! {
                read = tokio::time::timeout(
                    Duration::from_secs(sleeping),
                    stream.read(&mut self.read_buf),
                ) => match read {
                    Ok(Ok(0)) => {
                        self.shared.kill(KillReason::ClientDisconnected);
                        return Ok(None);
                    }
                    Ok(Ok(n)) => {
                        self.read_pos = 0;
                        self.read_len = n;
                    }
                    Ok(Err(_)) => {
                        self.shared.kill(KillReason::ReadFailed);
                        return Err(());
                    }
                    Err(_) => {
                        if !self.shared.dont_term.load(std::sync::atomic::Ordering::Relaxed) {
                            self.shared.kill(KillReason::Idle);
                            trc::event!(
                                Session(trc::SessionEvent::IdleReap),
                                SessionId = self.shared.id,
                                AccountName = self.shared.user_name(),
                            );
                            return Ok(None);
                        }
                    }
                },
                _ = self.shared.notify.notified() => {
                    if self.shared.marked_for_death() {
                        return Ok(None);
                    }
                    // Express message arrived; keep waiting for input.
                }
                _ = shutdown_rx.changed() => {
                    self.shared.kill(KillReason::ServerShuttingDown);
                    self.cprintf(format!(
                        "{} {} server is shutting down",
                        ERROR + SERVER_SHUTTING_DOWN,
                        "ERROR:"
                    ));
                    let _ = self.flush_output().await;
                    return Ok(None);
                }
            }
        }
    }

    /// Read the body of a text submission: lines up to the `000`
    /// terminator, bounded by `c_maxmsglen`.
    pub async fn read_text_block(&mut self) -> Result<String, ()> {
        let max = self
            .server
            .config()
            .int_or("c_maxmsglen", 10_485_760)
            .max(1024) as usize;
        let mut text = String::new();
        loop {
            match self.read_command_line().await {
                Ok(Some(line)) if line == crate::LISTING_END => break,
                Ok(Some(line)) => {
                    if text.len() + line.len() >= max {
                        self.shared.kill(KillReason::Quota);
                        return Err(());
                    }
                    text.push_str(&line);
                    text.push('\n');
                }
                Ok(None) | Err(()) => return Err(()),
            }
        }
        Ok(text)
    }

    /// Buffered reply output; diverted to the capture stack when one is
    /// pushed.
    pub fn cprintf(&mut self, line: impl AsRef<str>) {
        let target = match self.redirect.last_mut() {
            Some(capture) => capture,
            None => &mut self.out,
        };
        target.push_str(line.as_ref());
        if !line.as_ref().ends_with('\n') {
            target.push('\n');
        }
    }

    pub fn push_redirect(&mut self) {
        self.redirect.push(String::new());
    }

    pub fn pop_redirect(&mut self) -> String {
        self.redirect.pop().unwrap_or_default()
    }

    pub async fn flush_output(&mut self) -> Result<(), ()> {
        if self.out.is_empty() {
            return Ok(());
        }
        let out = std::mem::take(&mut self.out);
        let Some(stream) = self.stream.as_mut() else {
            return Err(());
        };
        stream.write_all(out.as_bytes()).await.map_err(|_| ())?;
        stream.flush().await.map_err(|_| ())
    }

    pub fn is_aide(&self) -> bool {
        self.internal || self.user.as_ref().is_some_and(|u| u.axlevel >= AX_AIDE)
    }

    /// Returns false after emitting the appropriate error reply when the
    /// session lacks `level`.
    pub fn access_check(&mut self, level: AccessLevel) -> bool {
        let ok = match level {
            AccessLevel::None => true,
            AccessLevel::LoggedIn => self.internal || self.user.is_some(),
            AccessLevel::RoomAide | AccessLevel::Aide => self.is_aide(),
            AccessLevel::Internal => self.internal,
        };
        if !ok {
            if self.user.is_none() && !self.internal {
                self.cprintf(format!(
                    "{} ERROR: not logged in",
                    ERROR + NOT_LOGGED_IN
                ));
            } else {
                self.cprintf(format!(
                    "{} ERROR: higher access is required to use this command",
                    ERROR + HIGHER_ACCESS_REQUIRED
                ));
            }
        }
        ok
    }

    pub fn current_room(&self) -> String {
        self.shared.room.lock().clone()
    }
}
