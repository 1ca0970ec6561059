/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs LLC <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use super::{
    ServerInstance, SessionData, SessionShared, SessionUser, next_session_id,
    stream::ClientStream, tls::TlsManager,
};
use crate::{
    BuildServer, Inner,
    registry::{HookEvent, ServiceAddr, ServiceDef},
};
use parking_lot::Mutex;
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    os::unix::fs::PermissionsExt,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, AtomicU64},
    },
};
use tokio::{
    net::{TcpListener, UnixListener},
    sync::Notify,
};

enum BoundListener {
    Tcp(TcpListener),
    Unix(UnixListener, PathBuf),
}

/// Bind and spawn every registered service. Failures are collected and
/// returned so startup can report them in one aide notice; a single bad
/// port never takes the server down.
pub async fn spawn_services(inner: &Arc<Inner>, tls: Arc<TlsManager>) -> Vec<String> {
    let server = inner.build_server();
    let mut errors = Vec::new();

    for service in &server.core.registry.services {
        match bind_service(service).await {
            Ok(listener) => {
                let instance = Arc::new(ServerInstance {
                    id: service.name.to_string(),
                    protocol: service.name,
                    tls: tls.clone(),
                    shutdown_rx: inner.data.shutdown_tx.subscribe(),
                });
                spawn_accept_loop(inner.clone(), service, listener, instance);
            }
            Err(reason) => {
                trc::event!(
                    Network(trc::NetworkEvent::BindError),
                    Id = service.name,
                    Reason = reason.clone(),
                );
                errors.push(format!("{}: {reason}", service.name));
            }
        }
    }

    errors
}

async fn bind_service(service: &ServiceDef) -> Result<BoundListener, String> {
    match &service.addr {
        ServiceAddr::Tcp(addr, port) => {
            let ip: IpAddr = if addr == "*" || addr.is_empty() {
                IpAddr::V4(Ipv4Addr::UNSPECIFIED)
            } else {
                addr.parse().map_err(|_| format!("invalid address {addr}"))?
            };
            let socket = match ip {
                IpAddr::V4(_) => tokio::net::TcpSocket::new_v4(),
                IpAddr::V6(_) => tokio::net::TcpSocket::new_v6(),
            }
            .map_err(|err| err.to_string())?;
            socket.set_reuseaddr(true).map_err(|err| err.to_string())?;
            socket
                .bind(SocketAddr::new(ip, *port))
                .map_err(|err| err.to_string())?;
            let listener = socket.listen(1024).map_err(|err| err.to_string())?;
            trc::event!(
                Network(trc::NetworkEvent::ListenStart),
                Id = service.name,
                Port = *port,
            );
            Ok(BoundListener::Tcp(listener))
        }
        ServiceAddr::Unix(path, mode) => {
            // A previous run may have left the socket node behind.
            let _ = std::fs::remove_file(path);
            let listener = UnixListener::bind(path).map_err(|err| err.to_string())?;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(*mode))
                .map_err(|err| err.to_string())?;
            trc::event!(
                Network(trc::NetworkEvent::ListenStart),
                Id = service.name,
                Path = path.to_string_lossy().into_owned(),
            );
            Ok(BoundListener::Unix(listener, path.clone()))
        }
    }
}

fn spawn_accept_loop(
    inner: Arc<Inner>,
    service: &ServiceDef,
    listener: BoundListener,
    instance: Arc<ServerInstance>,
) {
    let manager = service.manager.clone();
    let service_name = service.name;
    let mut shutdown_rx = inner.data.shutdown_tx.subscribe();

    tokio::spawn(async move {
        loop {
            match &listener {
                BoundListener::Tcp(tcp) => {
                    tokio::select! {
                        accepted = tcp.accept() => match accepted {
                            Ok((stream, peer)) => {
                                let _ = stream.set_nodelay(true);
                                accept_session(
                                    &inner,
                                    &manager,
                                    &instance,
                                    service_name,
                                    ClientStream::Tcp(stream),
                                    peer.ip().to_string(),
                                    None,
                                    false,
                                );
                            }
                            Err(err) => {
                                trc::event!(
                                    Network(trc::NetworkEvent::AcceptError),
                                    Id = service_name,
                                    Reason = err.to_string(),
                                );
                            }
                        },
                        _ = shutdown_rx.changed() => break,
                    }
                }
                BoundListener::Unix(unix, _) => {
                    tokio::select! {
                        accepted = unix.accept() => match accepted {
                            Ok((stream, _)) => {
                                let peer_uid =
                                    stream.peer_cred().ok().map(|cred| cred.uid());
                                accept_session(
                                    &inner,
                                    &manager,
                                    &instance,
                                    service_name,
                                    ClientStream::Unix(stream),
                                    "localhost".to_string(),
                                    peer_uid,
                                    true,
                                );
                            }
                            Err(err) => {
                                trc::event!(
                                    Network(trc::NetworkEvent::AcceptError),
                                    Id = service_name,
                                    Reason = err.to_string(),
                                );
                            }
                        },
                        _ = shutdown_rx.changed() => break,
                    }
                }
            }
        }

        if let BoundListener::Unix(_, path) = &listener {
            let _ = std::fs::remove_file(path);
        }
        trc::event!(Network(trc::NetworkEvent::ListenStop), Id = service_name);
    });
}

#[allow(clippy::too_many_arguments)]
fn accept_session(
    inner: &Arc<Inner>,
    manager: &Arc<dyn super::SessionManager>,
    instance: &Arc<ServerInstance>,
    service_name: &'static str,
    stream: ClientStream,
    remote_addr: String,
    peer_uid: Option<u32>,
    is_local_client: bool,
) {
    let server = inner.build_server();
    let max_sessions = server.config().int_or("c_maxsessions", 0);
    let nologin =
        max_sessions > 0 && server.inner.data.sessions.count() as i64 >= max_sessions;
    if nologin {
        trc::event!(
            Network(trc::NetworkEvent::TooManySessions),
            Id = service_name,
            Total = server.inner.data.sessions.count(),
        );
    }

    let shared = Arc::new(SessionShared {
        id: next_session_id(&inner.data.session_id_gen),
        protocol: service_name,
        remote_addr: remote_addr.clone(),
        peer_uid,
        is_local_client,
        nologin,
        created: store::now(),
        user: Mutex::new(SessionUser::default()),
        room: Mutex::new(crate::BASEROOM.to_string()),
        lastcmd: AtomicU64::new(store::now()),
        kill_reason: AtomicU8::new(0),
        dont_term: AtomicBool::new(false),
        express: Mutex::new(Vec::new()),
        notify: Notify::new(),
    });
    inner.data.sessions.insert(shared.clone());

    trc::event!(
        Network(trc::NetworkEvent::ConnectionStart),
        Id = service_name,
        SessionId = shared.id,
        RemoteIp = remote_addr,
    );

    let manager = manager.clone();
    let instance = instance.clone();
    let inner = inner.clone();
    tokio::spawn(async move {
        let server = inner.build_server();
        server
            .run_session_hooks(HookEvent::Start, Some(&shared))
            .await;

        manager
            .handle(
                server.clone(),
                SessionData {
                    stream,
                    shared: shared.clone(),
                    instance,
                },
            )
            .await;

        server
            .run_session_hooks(HookEvent::Stop, Some(&shared))
            .await;
        inner.data.single_user.release(shared.id);
        inner.data.sessions.remove(shared.id);
        trc::event!(
            Network(trc::NetworkEvent::ConnectionEnd),
            SessionId = shared.id,
            Reason = shared.kill_reason().name(),
        );
    });
}
