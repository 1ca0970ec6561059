/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use std::{path::PathBuf, process::ExitCode};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::UnixStream,
};

/// Stream one command to a running server over the admin socket and relay
/// the response, following the native protocol's first-digit convention:
/// 1 = listing follows (000-terminated), 2 = ok, 3 = more data expected,
/// 4 = send text (000-terminated, read from stdin), 5 = error, 6 = binary
/// follows.
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let mut home = PathBuf::from(".");
    let mut command = Vec::new();
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" => {
                let Some(dir) = iter.next() else {
                    eprintln!("sendcommand: -h requires a directory");
                    return ExitCode::from(2);
                };
                home = dir.into();
            }
            other => command.push(other.to_string()),
        }
    }
    let command = command.join(" ");
    if command.is_empty() {
        eprintln!("usage: sendcommand [-h server_dir] <command>");
        return ExitCode::from(2);
    }

    let socket_path = home.join("citadel-admin.socket");
    let stream = match UnixStream::connect(&socket_path).await {
        Ok(stream) => stream,
        Err(err) => {
            eprintln!(
                "sendcommand: cannot connect to {}: {err}",
                socket_path.display()
            );
            return ExitCode::from(2);
        }
    };
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    // Consume the greeting.
    let mut greeting = String::new();
    if reader.read_line(&mut greeting).await.is_err() {
        eprintln!("sendcommand: no greeting from server");
        return ExitCode::from(2);
    }

    if write_half
        .write_all(format!("{command}\n").as_bytes())
        .await
        .is_err()
    {
        eprintln!("sendcommand: cannot send command");
        return ExitCode::from(2);
    }

    let mut reply = String::new();
    if reader.read_line(&mut reply).await.is_err() || reply.is_empty() {
        eprintln!("sendcommand: no response from server");
        return ExitCode::from(2);
    }
    let reply = reply.trim_end();
    println!("{reply}");

    match reply.bytes().next() {
        Some(b'1') => {
            // Listing follows, terminated by 000.
            loop {
                let mut line = String::new();
                match reader.read_line(&mut line).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let line = line.trim_end();
                        if line == "000" {
                            break;
                        }
                        println!("{line}");
                    }
                }
            }
            ExitCode::SUCCESS
        }
        Some(b'4') => {
            // Server wants text; feed stdin through, then terminate.
            let stdin = std::io::stdin();
            let mut text = String::new();
            use std::io::Read;
            if stdin.lock().read_to_string(&mut text).is_err() {
                return ExitCode::from(2);
            }
            for line in text.lines() {
                let line = if line == "000" { " 000" } else { line };
                if write_half
                    .write_all(format!("{line}\n").as_bytes())
                    .await
                    .is_err()
                {
                    return ExitCode::from(2);
                }
            }
            if write_half.write_all(b"000\n").await.is_err() {
                return ExitCode::from(2);
            }
            let mut final_reply = String::new();
            if reader.read_line(&mut final_reply).await.is_ok() {
                let final_reply = final_reply.trim_end();
                println!("{final_reply}");
                if final_reply.starts_with('5') {
                    return ExitCode::from(1);
                }
            }
            ExitCode::SUCCESS
        }
        Some(b'5') => ExitCode::from(1),
        _ => ExitCode::SUCCESS,
    }
}
