/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use crate::ServerArgs;
use std::process::ExitCode;

pub const WATCHER_CHILD_ENV: &str = "CITSERVER_WATCHED";

/// Exit codes 0 and 101..=109 mean "do not restart"; 110..=113 are
/// transient subsystem failures that also stop the loop. Everything else,
/// including signal deaths, restarts the server.
fn should_restart(code: Option<i32>) -> bool {
    match code {
        Some(0) | Some(101..=113) => false,
        // Killed by a signal or crashed: restart onto a clean state.
        _ => true,
    }
}

/// The parent watcher: spawn the server as a child of ourselves and
/// restart it when it dies badly. The pid file always names the watcher.
pub fn run_watcher(args: &ServerArgs) -> ExitCode {
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(err) => {
            eprintln!("citserver: cannot find my own binary: {err}");
            return ExitCode::from(crate::EXIT_CONFIG);
        }
    };

    if let Some(pid_file) = &args.pid_file {
        let _ = std::fs::write(pid_file, format!("{}\n", std::process::id()));
    }

    let forwarded: Vec<String> = std::env::args().skip(1).collect();
    loop {
        let status = std::process::Command::new(&exe)
            .args(&forwarded)
            .env(WATCHER_CHILD_ENV, "1")
            .status();
        match status {
            Ok(status) => {
                if !should_restart(status.code()) {
                    if let Some(pid_file) = &args.pid_file {
                        let _ = std::fs::remove_file(pid_file);
                    }
                    return ExitCode::from(status.code().unwrap_or(0).clamp(0, 255) as u8);
                }
                trc::event!(
                    Server(trc::ServerEvent::WatcherRestart),
                    Code = status.code().unwrap_or(-1),
                );
            }
            Err(err) => {
                eprintln!("citserver: cannot spawn server child: {err}");
                return ExitCode::from(crate::EXIT_CONFIG);
            }
        }
        std::thread::sleep(std::time::Duration::from_secs(2));
    }
}

#[cfg(test)]
mod tests {
    use super::should_restart;

    #[test]
    fn restart_policy() {
        assert!(!should_restart(Some(0)));
        for code in 101..=113 {
            assert!(!should_restart(Some(code)));
        }
        assert!(should_restart(Some(1)));
        assert!(should_restart(Some(134)));
        assert!(should_restart(None));
    }
}
