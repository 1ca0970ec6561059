/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use crate::{
    Server,
    listener::{SessionManager, SessionShared},
    message::{CtdlMessage, RecipientSet},
};
use ahash::AHashMap;
use futures::future::BoxFuture;
use std::{path::PathBuf, sync::Arc};

/// Session lifecycle events a hook can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum HookEvent {
    Start = 1 << 0,
    Stop = 1 << 1,
    Login = 1 << 2,
    Logout = 1 << 3,
    NewRoom = 1 << 4,
    SetPass = 1 << 5,
    Cmd = 1 << 6,
    Rwho = 1 << 7,
    Async = 1 << 8,
    Stealth = 1 << 9,
    Unstealth = 1 << 10,
    Timer = 1 << 11,
    House = 1 << 12,
    Shutdown = 1 << 13,
}

impl HookEvent {
    pub fn bit(&self) -> u32 {
        *self as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserHookEvent {
    NewUser,
    PurgeUser,
}

pub trait SessionHook: Send + Sync {
    fn on_session_event<'x>(
        &'x self,
        server: &'x Server,
        event: HookEvent,
        session: Option<&'x Arc<SessionShared>>,
    ) -> BoxFuture<'x, ()>;
}

pub trait UserHook: Send + Sync {
    fn on_user_event<'x>(
        &'x self,
        server: &'x Server,
        user_name: &'x str,
        user_num: i64,
        event: UserHookEvent,
    ) -> BoxFuture<'x, ()>;
}

pub trait MessageHook: Send + Sync {
    /// A non-zero sum across all hooks aborts the save.
    fn before_save<'x>(
        &'x self,
        _server: &'x Server,
        _msg: &'x mut CtdlMessage,
        _recps: Option<&'x RecipientSet>,
    ) -> BoxFuture<'x, i32> {
        Box::pin(async { 0 })
    }

    fn after_save<'x>(
        &'x self,
        _server: &'x Server,
        _msg: &'x CtdlMessage,
        _recps: Option<&'x RecipientSet>,
        _msgnum: i64,
    ) -> BoxFuture<'x, i32> {
        Box::pin(async { 0 })
    }
}

pub trait RoomHook: Send + Sync {
    fn on_room<'x>(&'x self, server: &'x Server, room_name: &'x str) -> BoxFuture<'x, i32>;
}

/// Side-effect hooks observing message removal from a room.
pub trait DeleteHook: Send + Sync {
    fn on_delete<'x>(
        &'x self,
        server: &'x Server,
        room_name: &'x str,
        msgnum: i64,
    ) -> BoxFuture<'x, ()>;
}

pub trait XmsgHook: Send + Sync {
    fn send_xmsg<'x>(
        &'x self,
        server: &'x Server,
        sender: &'x str,
        sender_email: &'x str,
        recipient: &'x str,
        text: &'x str,
    ) -> BoxFuture<'x, i32>;
}

pub trait FixedOutputHook: Send + Sync {
    fn content_type(&self) -> &'static str;
    fn render(&self, content: &[u8]) -> Option<String>;
}

pub trait SearchHook: Send + Sync {
    fn name(&self) -> &'static str;
    fn search<'x>(&'x self, server: &'x Server, query: &'x str) -> BoxFuture<'x, Vec<i64>>;
}

/// Extension verbs plugged into the native command loop.
pub struct ProtoContext {
    pub session: Arc<SessionShared>,
    pub args: String,
    pub out: String,
}

pub trait ProtoHandler: Send + Sync {
    fn handle<'x>(&'x self, server: &'x Server, ctx: &'x mut ProtoContext) -> BoxFuture<'x, ()>;
}

#[derive(Clone)]
pub enum ServiceAddr {
    /// Bind address string (`*` for wildcard) and port.
    Tcp(String, u16),
    /// Socket path and file mode.
    Unix(PathBuf, u32),
}

pub struct ServiceDef {
    pub name: &'static str,
    pub addr: ServiceAddr,
    pub manager: Arc<dyn SessionManager>,
}

struct SessionHookEntry {
    events: u32,
    priority: i32,
    hook: Arc<dyn SessionHook>,
}

struct XmsgHookEntry {
    priority: i32,
    hook: Arc<dyn XmsgHook>,
}

/// The hook tables and listener registrations. Built once at startup while
/// modules initialize, then frozen behind an `Arc` for the life of the
/// process. Traversal order is priority, ties broken by registration order.
#[derive(Default)]
pub struct ServiceRegistry {
    session_hooks: Vec<SessionHookEntry>,
    user_hooks: Vec<Arc<dyn UserHook>>,
    message_hooks: Vec<Arc<dyn MessageHook>>,
    room_hooks: Vec<Arc<dyn RoomHook>>,
    delete_hooks: Vec<Arc<dyn DeleteHook>>,
    xmsg_hooks: Vec<XmsgHookEntry>,
    fixed_output_hooks: Vec<Arc<dyn FixedOutputHook>>,
    search_hooks: Vec<Arc<dyn SearchHook>>,
    proto_cmds: AHashMap<[u8; 4], Arc<dyn ProtoHandler>>,
    pub services: Vec<ServiceDef>,
}

impl ServiceRegistry {
    pub fn register_session_hook(
        &mut self,
        hook: Arc<dyn SessionHook>,
        events: &[HookEvent],
        priority: i32,
    ) {
        let events = events.iter().fold(0, |acc, e| acc | e.bit());
        self.session_hooks.push(SessionHookEntry {
            events,
            priority,
            hook,
        });
        self.session_hooks.sort_by_key(|e| e.priority);
    }

    pub fn register_user_hook(&mut self, hook: Arc<dyn UserHook>) {
        self.user_hooks.push(hook);
    }

    pub fn register_message_hook(&mut self, hook: Arc<dyn MessageHook>) {
        self.message_hooks.push(hook);
    }

    pub fn register_room_hook(&mut self, hook: Arc<dyn RoomHook>) {
        self.room_hooks.push(hook);
    }

    pub fn register_delete_hook(&mut self, hook: Arc<dyn DeleteHook>) {
        self.delete_hooks.push(hook);
    }

    pub fn register_xmsg_hook(&mut self, hook: Arc<dyn XmsgHook>, priority: i32) {
        self.xmsg_hooks.push(XmsgHookEntry { priority, hook });
        self.xmsg_hooks.sort_by_key(|e| e.priority);
    }

    pub fn register_fixed_output_hook(&mut self, hook: Arc<dyn FixedOutputHook>) {
        self.fixed_output_hooks.push(hook);
    }

    pub fn register_search_hook(&mut self, hook: Arc<dyn SearchHook>) {
        self.search_hooks.push(hook);
    }

    pub fn register_proto(&mut self, verb: &[u8; 4], handler: Arc<dyn ProtoHandler>) {
        self.proto_cmds.insert(*verb, handler);
    }

    /// Register a listener. Bind failures are reported at startup, not
    /// here; registration itself cannot fail.
    pub fn register_service(
        &mut self,
        name: &'static str,
        addr: ServiceAddr,
        manager: Arc<dyn SessionManager>,
    ) {
        self.services.push(ServiceDef {
            name,
            addr,
            manager,
        });
    }

    pub fn proto_handler(&self, verb: &[u8; 4]) -> Option<&Arc<dyn ProtoHandler>> {
        self.proto_cmds.get(verb)
    }

    pub fn fixed_output_for(&self, content_type: &str) -> Option<&Arc<dyn FixedOutputHook>> {
        self.fixed_output_hooks
            .iter()
            .find(|h| h.content_type().eq_ignore_ascii_case(content_type))
    }

    pub fn search_hooks(&self) -> &[Arc<dyn SearchHook>] {
        &self.search_hooks
    }
}

impl Server {
    pub async fn run_session_hooks(&self, event: HookEvent, session: Option<&Arc<SessionShared>>) {
        for entry in &self.core.registry.session_hooks {
            if entry.events & event.bit() != 0 {
                entry.hook.on_session_event(self, event, session).await;
            }
        }
    }

    pub async fn run_user_hooks(&self, user_name: &str, user_num: i64, event: UserHookEvent) {
        for hook in &self.core.registry.user_hooks {
            hook.on_user_event(self, user_name, user_num, event).await;
        }
    }

    pub async fn run_before_save_hooks(
        &self,
        msg: &mut CtdlMessage,
        recps: Option<&RecipientSet>,
    ) -> i32 {
        let mut sum = 0;
        for hook in &self.core.registry.message_hooks {
            sum += hook.before_save(self, msg, recps).await;
        }
        sum
    }

    pub async fn run_after_save_hooks(
        &self,
        msg: &CtdlMessage,
        recps: Option<&RecipientSet>,
        msgnum: i64,
    ) {
        for hook in &self.core.registry.message_hooks {
            hook.after_save(self, msg, recps, msgnum).await;
        }
    }

    pub async fn run_room_hooks(&self, room_name: &str) -> i32 {
        let mut sum = 0;
        for hook in &self.core.registry.room_hooks {
            sum += hook.on_room(self, room_name).await;
        }
        sum
    }

    pub async fn run_delete_hooks(&self, room_name: &str, msgnum: i64) {
        for hook in &self.core.registry.delete_hooks {
            hook.on_delete(self, room_name, msgnum).await;
        }
    }

    /// Deliver an instant message through the hook chain. All hooks of one
    /// priority class run; the first class producing a non-zero sum ends
    /// the traversal.
    pub async fn run_xmsg_hooks(
        &self,
        sender: &str,
        sender_email: &str,
        recipient: &str,
        text: &str,
    ) -> i32 {
        let mut total = 0;
        let mut current_priority = None;
        for entry in &self.core.registry.xmsg_hooks {
            if let Some(priority) = current_priority {
                if priority != entry.priority && total != 0 {
                    break;
                }
            }
            current_priority = Some(entry.priority);
            total += entry
                .hook
                .send_xmsg(self, sender, sender_email, recipient, text)
                .await;
        }
        total
    }
}
