/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

pub mod cmds;
pub mod migrate;
pub mod session;

use common::{
    Server,
    listener::{ExpressMessage, SessionData, SessionManager},
    registry::{ServiceAddr, ServiceRegistry, XmsgHook},
};
use directory::AuthService;
use futures::future::BoxFuture;
use session::Session;
use std::sync::Arc;

// Native protocol reply classes.
pub const LISTING_FOLLOWS: u16 = 100;
pub const CIT_OK: u16 = 200;
pub const MORE_DATA: u16 = 300;
pub const SEND_LISTING: u16 = 400;
pub const ERROR: u16 = 500;
pub const BINARY_FOLLOWS: u16 = 600;

// Error kinds added to the ERROR class.
pub const NOT_LOGGED_IN: u16 = 10;
pub const CMD_NOT_SUPPORTED: u16 = 20;
pub const SERVER_SHUTTING_DOWN: u16 = 30;
pub const ILLEGAL_VALUE: u16 = 40;
pub const NOT_HERE: u16 = 50;
pub const USERNAME_REQUIRED: u16 = 70;
pub const HIGHER_ACCESS_REQUIRED: u16 = 80;
pub const MAX_SESSIONS_EXCEEDED: u16 = 90;
pub const PASSWORD_REQUIRED: u16 = 94;
pub const ALREADY_LOGGED_IN: u16 = 95;
pub const ALREADY_EXISTS: u16 = 96;
pub const INTERNAL_ERROR: u16 = 100;

/// Terminator for text listings in both directions.
pub const LISTING_END: &str = "000";

/// The native line protocol, served on the configured TCP port and the
/// user socket; a second instance with `internal` set serves the admin
/// socket, whose callers are trusted the way the socket mode trusts them.
pub struct CitadelSessionManager {
    pub auth: Arc<AuthService>,
    pub internal: bool,
}

impl SessionManager for CitadelSessionManager {
    fn handle(&self, server: Server, session: SessionData) -> BoxFuture<'static, ()> {
        let auth = self.auth.clone();
        let internal = self.internal;
        Box::pin(async move {
            Session::new(server, session, auth, internal).run().await;
        })
    }
}

/// Instant message delivery to live sessions, registered on the xmsg hook
/// table at normal priority so external transports can outrank it.
struct LocalExpressHook;

impl XmsgHook for LocalExpressHook {
    fn send_xmsg<'x>(
        &'x self,
        server: &'x Server,
        sender: &'x str,
        _sender_email: &'x str,
        recipient: &'x str,
        text: &'x str,
    ) -> BoxFuture<'x, i32> {
        Box::pin(async move {
            let target = users::user_key(recipient);
            let mut delivered = 0;
            for session in server.sessions().snapshot() {
                if users::user_key(&session.user_name()) == target && session.is_logged_in() {
                    session.queue_express(ExpressMessage {
                        sender: sender.to_string(),
                        text: text.to_string(),
                        timestamp: store::now(),
                    });
                    delivered += 1;
                }
            }
            if delivered > 0 {
                trc::event!(
                    Session(trc::SessionEvent::ExpressMessage),
                    AccountName = recipient.to_string(),
                    Total = delivered,
                );
            }
            delivered
        })
    }
}

/// Register the native protocol services and hooks.
pub fn register(registry: &mut ServiceRegistry, server: &Server, auth: Arc<AuthService>) {
    let port = server.config().int_or("c_port_number", 504) as u16;
    let ip_addr = server.config().str_or("c_ip_addr", "*");

    registry.register_service(
        "citadel",
        ServiceAddr::Tcp(ip_addr, port),
        Arc::new(CitadelSessionManager {
            auth: auth.clone(),
            internal: false,
        }),
    );
    registry.register_service(
        "citadel-uds",
        ServiceAddr::Unix(server.core.dirs.socket_path(), 0o666),
        Arc::new(CitadelSessionManager {
            auth: auth.clone(),
            internal: false,
        }),
    );
    registry.register_service(
        "citadel-admin",
        ServiceAddr::Unix(server.core.dirs.admin_socket_path(), 0o700),
        Arc::new(CitadelSessionManager {
            auth,
            internal: true,
        }),
    );

    registry.register_xmsg_hook(Arc::new(LocalExpressHook), 50);
}
