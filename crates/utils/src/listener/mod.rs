/*
 * Copyright (c) 2023 Stalwart Labs Ltd.
 *
 * This file is part of the Stalwart Mailing List Server.
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as
 * published by the Free Software Foundation, either version 3 of
 * the License, or (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 * in the LICENSE file at the top-level directory of this distribution.
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <http://www.gnu.org/licenses/>.
 *
 * You can be released from the requirements of the AGPLv3 license by
 * purchasing a commercial license. Please contact licensing@stalw.art
 * for more details.
*/

pub mod limiter;

use std::{future::Future, os::unix::fs::PermissionsExt, path::Path, sync::Arc};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::UnixListener,
    net::UnixStream,
    sync::watch,
};

use self::limiter::{ConcurrencyLimiter, InFlight};

pub trait SessionStream: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static> SessionStream for T {}

pub struct ServerInstance {
    pub id: &'static str,
    pub limiter: ConcurrencyLimiter,
    pub shutdown_rx: watch::Receiver<bool>,
}

pub struct SessionData {
    pub stream: UnixStream,
    pub span: tracing::Span,
    pub in_flight: InFlight,
    pub instance: Arc<ServerInstance>,
}

pub trait SessionManager: Clone + Send + Sync + 'static {
    fn spawn(&self, session: SessionData) {
        let manager = self.clone();
        tokio::spawn(async move {
            manager.handle(session).await;
        });
    }

    fn handle(self, session: SessionData) -> impl Future<Output = ()> + Send;
}

/// Binds a Unix socket, removing any stale file first. Sockets are world
/// writable so the MTA user can connect.
pub fn bind_unix(path: &Path) -> std::io::Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let listener = UnixListener::bind(path)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777))?;
    Ok(listener)
}

pub fn spawn_listener(
    id: &'static str,
    listener: UnixListener,
    max_connections: u64,
    manager: impl SessionManager,
    shutdown_rx: watch::Receiver<bool>,
) {
    let instance = Arc::new(ServerInstance {
        id,
        limiter: ConcurrencyLimiter::new(max_connections),
        shutdown_rx,
    });
    let mut shutdown_rx = instance.shutdown_rx.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                stream = listener.accept() => {
                    match stream {
                        Ok((stream, _addr)) => {
                            if let Some(in_flight) = instance.limiter.is_allowed() {
                                manager.spawn(SessionData {
                                    stream,
                                    span: tracing::info_span!(
                                        "session",
                                        instance = instance.id,
                                    ),
                                    in_flight,
                                    instance: instance.clone(),
                                });
                            } else {
                                tracing::info!(
                                    context = "throttle",
                                    event = "too-many-requests",
                                    instance = instance.id,
                                    max_concurrent = instance.limiter.max_concurrent,
                                    "Too many concurrent connections."
                                );
                            }
                        }
                        Err(err) => {
                            tracing::trace!(
                                context = "io",
                                event = "error",
                                instance = instance.id,
                                "Failed to accept connection: {}", err
                            );
                        }
                    }
                },
                _ = shutdown_rx.changed() => {
                    tracing::debug!(
                        event = "shutdown",
                        instance = instance.id,
                        "Listener shutting down.");
                    break;
                }
            };
        }
    });
}
