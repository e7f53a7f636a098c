/*
 * Copyright (c) 2023 Stalwart Labs Ltd.
 *
 * This file is part of Stalwart Mailing List Server.
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

use common::Server;
use message::addr::Addr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use utils::listener::{SessionData as ListenerSessionData, SessionManager};

/// Upper bound on a single netstring request; Postfix keys are short.
const MAX_REQUEST: usize = 8192;

/// Answers Postfix socketmap lookups so the MTA knows which recipient
/// addresses to hand over via LMTP. Requests and replies are netstrings
/// (`len ":" payload ","`); one connection may carry many queries.
#[derive(Clone)]
pub struct SocketmapSessionManager {
    pub server: Server,
}

impl SocketmapSessionManager {
    pub fn new(server: Server) -> Self {
        Self { server }
    }

    fn lookup(&self, payload: &str) -> String {
        // The payload is "<mapname> <key>"; the map name is irrelevant
        // here, every map we serve answers the same question.
        let key = payload
            .split_once(' ')
            .map(|(_, key)| key)
            .unwrap_or(payload);

        let addr = match Addr::from_spec(&key.to_lowercase()) {
            Some(addr) => addr,
            None => return "NOTFOUND ".to_string(),
        };
        let list_addr = addr.strip_bounce().unwrap_or(addr);

        match self.server.store().is_list(&list_addr) {
            Ok(true) => format!(
                "OK lmtp:unix:{}",
                self.server.config().lmtp_sock.display()
            ),
            Ok(false) => "NOTFOUND ".to_string(),
            Err(err) => {
                tracing::error!(
                    context = "socketmap",
                    event = "error",
                    reason = %err,
                    "List lookup failed."
                );
                format!("TEMP {err}")
            }
        }
    }
}

impl SessionManager for SocketmapSessionManager {
    fn handle(
        self,
        mut session: ListenerSessionData,
    ) -> impl std::future::Future<Output = ()> + Send {
        async move {
            let mut shutdown_rx = session.instance.shutdown_rx.clone();
            let mut buf = Vec::new();
            let mut chunk = vec![0u8; 1024];

            loop {
                tokio::select! {
                    result = session.stream.read(&mut chunk) => {
                        match result {
                            Ok(0) => break,
                            Ok(bytes_read) => {
                                buf.extend_from_slice(&chunk[..bytes_read]);
                                loop {
                                    match parse_netstring(&buf) {
                                        Ok(Some((payload, consumed))) => {
                                            let reply = encode_netstring(&self.lookup(&payload));
                                            buf.drain(..consumed);
                                            if session.stream.write_all(&reply).await.is_err() {
                                                return;
                                            }
                                        }
                                        Ok(None) => break,
                                        Err(reason) => {
                                            tracing::debug!(
                                                parent: &session.span,
                                                context = "socketmap",
                                                event = "disconnect",
                                                reason = reason,
                                                "Malformed netstring request."
                                            );
                                            return;
                                        }
                                    }
                                }
                            }
                            Err(_) => break,
                        }
                    },
                    _ = shutdown_rx.changed() => break,
                }
            }
        }
    }
}

/// Parses one complete netstring from the front of `buf`. Returns the
/// payload and the number of bytes consumed, or `None` when more input is
/// needed.
fn parse_netstring(buf: &[u8]) -> Result<Option<(String, usize)>, &'static str> {
    let colon = match buf.iter().position(|&b| b == b':') {
        Some(colon) => colon,
        None => {
            return if buf.len() > MAX_REQUEST.to_string().len() {
                Err("length prefix is not terminated")
            } else {
                Ok(None)
            };
        }
    };

    let len: usize = std::str::from_utf8(&buf[..colon])
        .ok()
        .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|digits| digits.parse().ok())
        .ok_or("invalid length prefix")?;
    if len > MAX_REQUEST {
        return Err("request too large");
    }

    let end = colon + 1 + len;
    if buf.len() <= end {
        return Ok(None);
    }
    if buf[end] != b',' {
        return Err("missing netstring terminator");
    }

    let payload = String::from_utf8_lossy(&buf[colon + 1..end]).into_owned();
    Ok(Some((payload, end + 1)))
}

fn encode_netstring(payload: &str) -> Vec<u8> {
    format!("{}:{},", payload.len(), payload).into_bytes()
}
