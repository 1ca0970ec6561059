/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use common::Server;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use trc::EventExt;

/// A room's network configuration: a line-oriented list of `directive|args`
/// tokens. Parsing is permissive and the original text is retained line by
/// line, so a rewrite reproduces unknown directives byte for byte.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetConfig {
    lines: Vec<String>,
}

/// A typed view over one pop3client directive.
#[derive(Debug, Clone, PartialEq)]
pub struct Pop3Client {
    pub host: String,
    pub user: String,
    pub pass: String,
    pub keep: bool,
    pub interval: i64,
}

impl NetConfig {
    pub fn parse(text: &str) -> Self {
        NetConfig {
            lines: text.split('\n').map(|l| l.to_string()).collect(),
        }
    }

    pub fn serialize(&self) -> String {
        self.lines.join("\n")
    }

    fn args_for<'x>(&'x self, directive: &'x str) -> impl Iterator<Item = &'x str> {
        self.lines.iter().filter_map(move |line| {
            line.strip_prefix(directive)
                .and_then(|rest| rest.strip_prefix('|'))
        })
    }

    /// Mailing-list delivery recipients.
    pub fn list_recipients(&self) -> Vec<&str> {
        self.args_for("listrecp").collect()
    }

    pub fn digest_recipients(&self) -> Vec<&str> {
        self.args_for("digestrecp").collect()
    }

    pub fn participates(&self) -> Vec<&str> {
        self.args_for("participate").collect()
    }

    pub fn rss_feeds(&self) -> Vec<&str> {
        self.args_for("rssclient")
            .map(|args| args.split('|').next().unwrap_or(args))
            .collect()
    }

    pub fn pop3_clients(&self) -> Vec<Pop3Client> {
        self.args_for("pop3client")
            .filter_map(|args| {
                let mut tokens = args.split('|');
                Some(Pop3Client {
                    host: tokens.next()?.to_string(),
                    user: tokens.next()?.to_string(),
                    pass: tokens.next()?.to_string(),
                    keep: tokens.next().is_some_and(|v| v != "0"),
                    interval: tokens.next().and_then(|v| v.parse().ok()).unwrap_or(0),
                })
            })
            .collect()
    }

    pub fn add_line(&mut self, line: impl Into<String>) {
        // Keep a trailing empty line (and so the trailing newline) last.
        let line = line.into();
        match self.lines.last().map(|l| l.is_empty()) {
            Some(true) => {
                let at = self.lines.len() - 1;
                self.lines.insert(at, line);
            }
            _ => self.lines.push(line),
        }
    }

    pub fn remove_lines(&mut self, directive: &str, args: &str) {
        let full = format!("{directive}|{args}");
        self.lines.retain(|line| *line != full);
    }

    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(|l| l.is_empty())
    }
}

pub fn netconfig_key(roomnum: i64) -> String {
    format!("c_netconfig_{roomnum}")
}

pub trait NetConfigDir: Sync + Send {
    fn load_netconfig(&self, roomnum: i64) -> impl Future<Output = trc::Result<NetConfig>> + Send;

    fn save_netconfig(
        &self,
        roomnum: i64,
        config: &NetConfig,
    ) -> impl Future<Output = trc::Result<()>> + Send;
}

impl NetConfigDir for Server {
    async fn load_netconfig(&self, roomnum: i64) -> trc::Result<NetConfig> {
        match self.config().get_str(&netconfig_key(roomnum)) {
            Some(encoded) => {
                let raw = BASE64.decode(encoded.trim()).map_err(|err| {
                    trc::StoreEvent::DataCorruption
                        .caused_by(trc::location!())
                        .reason(err)
                })?;
                Ok(NetConfig::parse(&String::from_utf8_lossy(&raw)))
            }
            None => Ok(NetConfig::default()),
        }
    }

    /// The blob is stored base64-encoded under a single config key so it
    /// survives the store as an opaque string.
    async fn save_netconfig(&self, roomnum: i64, config: &NetConfig) -> trc::Result<()> {
        self.config()
            .put_str(
                &netconfig_key(roomnum),
                &BASE64.encode(config.serialize().as_bytes()),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOB: &str = "listrecp|alice@example.com\n\
        listrecp|bob@example.org\n\
        digestrecp|digest@example.net\n\
        pop3client|mail.example.com|fred|secret|1|3600\n\
        rssclient|http://example.com/feed.rss\n\
        frobnicate|keep|this|line|intact\n";

    #[test]
    fn round_trip_is_byte_identical() {
        let config = NetConfig::parse(BLOB);
        assert_eq!(config.serialize(), BLOB);
    }

    #[test]
    fn typed_views() {
        let config = NetConfig::parse(BLOB);
        assert_eq!(
            config.list_recipients(),
            vec!["alice@example.com", "bob@example.org"]
        );
        assert_eq!(config.rss_feeds(), vec!["http://example.com/feed.rss"]);
        let pop3 = config.pop3_clients();
        assert_eq!(pop3.len(), 1);
        assert_eq!(pop3[0].host, "mail.example.com");
        assert!(pop3[0].keep);
        assert_eq!(pop3[0].interval, 3600);
    }

    #[test]
    fn unknown_lines_survive_edits() {
        let mut config = NetConfig::parse(BLOB);
        config.remove_lines("listrecp", "bob@example.org");
        config.add_line("listrecp|carol@example.com");
        let text = config.serialize();
        assert!(text.contains("frobnicate|keep|this|line|intact"));
        assert!(text.contains("carol@example.com"));
        assert!(!text.contains("bob@example.org"));
        assert!(text.ends_with('\n'));
    }
}
