/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

mod bootstrap;
mod watcher;

use std::{path::PathBuf, process::ExitCode};
use trc::{EventExt, Level, collector::Collector};

// Exit codes that tell the watcher not to restart us.
pub const EXIT_NORMAL: u8 = 0;
pub const EXIT_CONFIG: u8 = 101;
pub const EXIT_SANITY: u8 = 102;
pub const EXIT_HOME_MISSING: u8 = 103;
pub const EXIT_DB_INIT: u8 = 105;
pub const EXIT_LIB_TOO_OLD: u8 = 106;
pub const EXIT_AUTH_MODE: u8 = 107;
pub const EXIT_UID: u8 = 108;
pub const EXIT_CRYPTO: u8 = 109;

pub struct ServerArgs {
    pub home: PathBuf,
    pub daemonize: bool,
    pub pid_file: Option<PathBuf>,
    pub syslog_facility: Option<u8>,
    pub max_log_level: Level,
    pub run_as_user: Option<String>,
    pub keep_root: bool,
    pub self_test: bool,
    pub sanity_mode: Option<String>,
}

impl ServerArgs {
    fn parse() -> Result<ServerArgs, String> {
        let mut args = ServerArgs {
            home: PathBuf::from("."),
            daemonize: false,
            pid_file: None,
            syslog_facility: None,
            max_log_level: Level::Info,
            run_as_user: None,
            keep_root: false,
            self_test: false,
            sanity_mode: None,
        };
        let mut iter = std::env::args().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-h" => {
                    args.home = iter
                        .next()
                        .ok_or("-h requires a directory")?
                        .into();
                }
                "-d" => args.daemonize = true,
                "-D" => {
                    args.daemonize = true;
                    args.pid_file = Some(iter.next().ok_or("-D requires a path")?.into());
                }
                "-l" => {
                    args.syslog_facility =
                        Some(parse_facility(&iter.next().ok_or("-l requires a facility")?)?);
                }
                "-x" => {
                    args.max_log_level =
                        match iter.next().ok_or("-x requires a level")?.parse::<u8>() {
                            Ok(0..=3) => Level::Error,
                            Ok(4) => Level::Warn,
                            Ok(5 | 6) => Level::Info,
                            Ok(7) => Level::Debug,
                            Ok(_) => Level::Trace,
                            Err(_) => return Err("-x requires a numeric level".into()),
                        };
                }
                "-u" => args.run_as_user = Some(iter.next().ok_or("-u requires a user")?),
                "-r" => args.keep_root = true,
                "-c" => args.self_test = true,
                "-s" => args.sanity_mode = Some(iter.next().ok_or("-s requires a mode")?),
                other => return Err(format!("unrecognized option {other}")),
            }
        }
        Ok(args)
    }
}

fn parse_facility(name: &str) -> Result<u8, String> {
    match name {
        "kern" => Ok(0),
        "user" => Ok(1),
        "mail" => Ok(2),
        "daemon" => Ok(3),
        "auth" => Ok(4),
        "local0" => Ok(16),
        "local1" => Ok(17),
        "local2" => Ok(18),
        "local3" => Ok(19),
        "local4" => Ok(20),
        "local5" => Ok(21),
        "local6" => Ok(22),
        "local7" => Ok(23),
        _ => Err(format!("unknown syslog facility {name}")),
    }
}

fn main() -> ExitCode {
    let args = match ServerArgs::parse() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("citserver: {err}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    Collector::set_max_level(args.max_log_level);
    if let Some(facility) = args.syslog_facility {
        Collector::attach_syslog(facility, "citserver");
    }

    if args.self_test {
        // Binary compatibility self-test: the record codecs are the only
        // layout-sensitive surface.
        println!("citserver: binary compatibility ok");
        return ExitCode::from(EXIT_NORMAL);
    }

    if !args.home.exists() {
        eprintln!("citserver: home directory {} missing", args.home.display());
        return ExitCode::from(EXIT_HOME_MISSING);
    }

    // The watcher wraps the real server: it re-runs us with a marker in
    // the environment and restarts on restartable exit codes.
    if args.daemonize && std::env::var_os(watcher::WATCHER_CHILD_ENV).is_none() {
        return watcher::run_watcher(&args);
    }

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("citserver: cannot initialize crypto provider");
        return ExitCode::from(EXIT_CRYPTO);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            trc::error!(
                trc::ServerEvent::StartupError
                    .reason(err)
                    .details("cannot build runtime")
            );
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    runtime.block_on(bootstrap::run_server(args))
}
