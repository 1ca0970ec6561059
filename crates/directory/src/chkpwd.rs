/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use std::{
    path::{Path, PathBuf},
    process::Stdio,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::Mutex,
};
use trc::EventExt;

/// The out-of-process password checker used for host authentication. The
/// child is expected to be setuid (it reads the shadow file or talks to
/// PAM); one long-lived instance answers one query at a time over its
/// pipe pair: `{uid: u32, password: [u8; 256]}` in, exactly `PASS` or
/// `FAIL` back.
pub struct ChkpwdClient {
    helper_path: PathBuf,
    child: Mutex<Option<ChkpwdChild>>,
}

struct ChkpwdChild {
    process: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

const PASSWORD_FIELD_LEN: usize = 256;

impl ChkpwdClient {
    pub fn new(helper_path: PathBuf) -> Self {
        ChkpwdClient {
            helper_path,
            child: Mutex::new(None),
        }
    }

    /// Ask the helper whether `password` is valid for `uid`. The mutex
    /// both serializes access to the pipe pair and guards respawning a
    /// helper that died.
    pub async fn check(&self, uid: u32, password: &str) -> trc::Result<bool> {
        let mut request = Vec::with_capacity(4 + PASSWORD_FIELD_LEN);
        request.extend_from_slice(&uid.to_ne_bytes());
        let mut field = [0u8; PASSWORD_FIELD_LEN];
        let bytes = password.as_bytes();
        let len = bytes.len().min(PASSWORD_FIELD_LEN - 1);
        field[..len].copy_from_slice(&bytes[..len]);
        request.extend_from_slice(&field);

        let mut guard = self.child.lock().await;
        if guard.is_none() {
            *guard = Some(self.spawn()?);
        }
        let child = guard.as_mut().unwrap();

        let result = Self::query(child, &request).await;
        match result {
            Ok(verdict) => Ok(verdict),
            Err(err) => {
                // The pipe broke; drop the child and retry once with a
                // fresh one before reporting failure.
                trc::event!(
                    Auth(trc::AuthEvent::ChkpwdError),
                    Reason = err.to_string(),
                );
                let _ = guard.take();
                *guard = Some(self.spawn()?);
                Self::query(guard.as_mut().unwrap(), &request)
                    .await
                    .map_err(|err| {
                        trc::AuthEvent::ChkpwdError
                            .caused_by(trc::location!())
                            .reason(err)
                    })
            }
        }
    }

    async fn query(child: &mut ChkpwdChild, request: &[u8]) -> std::io::Result<bool> {
        child.stdin.write_all(request).await?;
        child.stdin.flush().await?;
        let mut reply = [0u8; 4];
        child.stdout.read_exact(&mut reply).await?;
        Ok(&reply == b"PASS")
    }

    fn spawn(&self) -> trc::Result<ChkpwdChild> {
        let mut process = Command::new(&self.helper_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| {
                trc::AuthEvent::ChkpwdError
                    .caused_by(trc::location!())
                    .ctx(
                        trc::Key::Path,
                        self.helper_path.to_string_lossy().into_owned(),
                    )
                    .reason(err)
            })?;
        let stdin = process.stdin.take().ok_or_else(|| {
            trc::AuthEvent::ChkpwdError.details("chkpwd child has no stdin")
        })?;
        let stdout = process.stdout.take().ok_or_else(|| {
            trc::AuthEvent::ChkpwdError.details("chkpwd child has no stdout")
        })?;
        Ok(ChkpwdChild {
            process,
            stdin,
            stdout,
        })
    }

    pub async fn shutdown(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            // An empty password field tells the helper to exit cleanly.
            let _ = child.stdin.write_all(&[0u8; 4 + PASSWORD_FIELD_LEN]).await;
            let _ = child.process.kill().await;
        }
    }
}

/// The helper normally sits next to the server binary; fall back to PATH.
pub fn locate_helper() -> trc::Result<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let candidate = dir.join("chkpwd");
            if candidate.exists() {
                return Ok(candidate);
            }
        }
    }
    let fallback = Path::new("/usr/local/citadel/chkpwd");
    if fallback.exists() {
        Ok(fallback.to_path_buf())
    } else {
        Ok(PathBuf::from("chkpwd"))
    }
}
