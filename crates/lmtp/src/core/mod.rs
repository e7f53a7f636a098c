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
use smtp_proto::request::receiver::{DataReceiver, RequestReceiver};
use store::List;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use utils::listener::{
    limiter::InFlight, SessionData as ListenerSessionData, SessionManager, SessionStream,
};

#[derive(Clone)]
pub struct LmtpSessionManager {
    pub server: Server,
}

impl LmtpSessionManager {
    pub fn new(server: Server) -> Self {
        Self { server }
    }
}

impl SessionManager for LmtpSessionManager {
    fn handle(
        self,
        session: ListenerSessionData,
    ) -> impl std::future::Future<Output = ()> + Send {
        async move {
            let shutdown_rx = session.instance.shutdown_rx.clone();
            let mut session = Session {
                hostname: self.server.config().hostname.clone(),
                state: State::default(),
                server: self.server,
                stream: session.stream,
                span: session.span,
                in_flight: session.in_flight,
                shutdown_rx,
                data: SessionData::default(),
            };
            session.handle_conn().await;
        }
    }
}

pub enum State {
    Request(RequestReceiver),
    Data(DataReceiver),
    None,
}

impl Default for State {
    fn default() -> Self {
        State::Request(RequestReceiver::default())
    }
}

pub struct Session<T: SessionStream> {
    pub hostname: String,
    pub state: State,
    pub server: Server,
    pub stream: T,
    pub span: tracing::Span,
    pub in_flight: InFlight,
    pub shutdown_rx: tokio::sync::watch::Receiver<bool>,
    pub data: SessionData,
}

#[derive(Default)]
pub struct SessionData {
    pub helo_domain: String,
    /// Reverse path of the current transaction; an empty string is a
    /// bounce notification. `None` before `MAIL FROM`.
    pub mail_from: Option<String>,
    pub rcpt_to: Vec<Recipient>,
    pub message: Vec<u8>,
    pub messages_sent: usize,
}

/// An accepted `RCPT TO`, resolved to the list that owns it. The envelope
/// address may carry the bounce suffix; `list` is the list itself.
pub struct Recipient {
    pub addr: Addr,
    pub list: List,
}

impl<T: SessionStream> Session<T> {
    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), ()> {
        match self.stream.write_all(bytes).await {
            Ok(_) => match self.stream.flush().await {
                Ok(_) => {
                    tracing::trace!(
                        parent: &self.span,
                        event = "write",
                        data = std::str::from_utf8(bytes).unwrap_or_default(),
                    );
                    Ok(())
                }
                Err(_) => Err(()),
            },
            Err(_) => Err(()),
        }
    }

    pub async fn read(&mut self, bytes: &mut [u8]) -> std::io::Result<usize> {
        let len = self.stream.read(bytes).await?;
        tracing::trace!(
            parent: &self.span,
            event = "read",
            data = bytes
                .get(..len)
                .and_then(|bytes| std::str::from_utf8(bytes).ok())
                .unwrap_or_default(),
        );
        Ok(len)
    }

    /// After a completed `DATA` the session keeps the reverse path and
    /// waits for the next transaction; `RSET` clears everything.
    pub fn reset_transaction(&mut self) {
        self.data.rcpt_to.clear();
        self.data.message = Vec::new();
    }

    pub fn reset(&mut self) {
        self.data.mail_from = None;
        self.reset_transaction();
    }
}
