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

pub mod data;

use message::addr::Addr;
use smtp_proto::{
    request::receiver::DataReceiver, Error as ProtoError, MailFrom, RcptTo, Request,
};
use utils::listener::SessionStream;

use crate::core::{Recipient, Session, State};

impl<T: SessionStream> Session<T> {
    pub async fn handle_conn(&mut self) {
        if self
            .write(format!("220 {} Stalwart LMTP at your service\r\n", self.hostname).as_bytes())
            .await
            .is_err()
        {
            return;
        }

        let mut buf = vec![0; 8192];
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = self.read(&mut buf) => {
                    match result {
                        Ok(0) => {
                            tracing::debug!(
                                parent: &self.span,
                                event = "disconnect",
                                reason = "peer",
                                "Connection closed by peer."
                            );
                            break;
                        }
                        Ok(bytes_read) => {
                            match self.ingest(&buf[..bytes_read]).await {
                                Ok(true) => (),
                                Ok(false) => break,
                                Err(_) => break,
                            }
                        }
                        Err(_) => break,
                    }
                },
                _ = shutdown_rx.changed() => {
                    tracing::debug!(
                        parent: &self.span,
                        event = "disconnect",
                        reason = "shutdown",
                        "Server shutting down."
                    );
                    self.write(b"421 4.3.0 Server shutting down.\r\n").await.ok();
                    break;
                }
            };
        }
    }

    /// Feeds received bytes through the command state machine. Returns
    /// `Ok(false)` when the client said `QUIT`.
    pub async fn ingest(&mut self, bytes: &[u8]) -> Result<bool, ()> {
        let mut iter = bytes.iter();
        let mut state = std::mem::replace(&mut self.state, State::None);

        'outer: loop {
            match &mut state {
                State::Request(receiver) => loop {
                    match receiver.ingest(&mut iter, bytes) {
                        Ok(request) => match request {
                            Request::Lhlo { host } => {
                                self.handle_lhlo(host).await?;
                            }
                            Request::Ehlo { .. } | Request::Helo { .. } => {
                                self.write(
                                    b"500 5.5.1 Invalid command: this is LMTP, use LHLO.\r\n",
                                )
                                .await?;
                            }
                            Request::Mail { from } => {
                                self.handle_mail_from(from).await?;
                            }
                            Request::Rcpt { to } => {
                                self.handle_rcpt_to(to).await?;
                            }
                            Request::Data => {
                                if self.can_start_data().await? {
                                    state = State::Data(DataReceiver::new());
                                    continue 'outer;
                                }
                            }
                            Request::Rset => {
                                self.reset();
                                self.write(b"250 2.0.0 OK\r\n").await?;
                            }
                            Request::Noop { .. } => {
                                self.write(b"250 2.0.0 OK\r\n").await?;
                            }
                            Request::Quit => {
                                self.write(b"221 2.0.0 Bye.\r\n").await?;
                                return Ok(false);
                            }
                            _ => {
                                self.write(b"500 5.5.1 Invalid command.\r\n").await?;
                            }
                        },
                        Err(err) => match err {
                            ProtoError::NeedsMoreData { .. } => break 'outer,
                            ProtoError::UnknownCommand | ProtoError::InvalidResponse { .. } => {
                                self.write(b"500 5.5.1 Invalid command.\r\n").await?;
                            }
                            ProtoError::InvalidSenderAddress => {
                                self.write(b"501 5.1.8 Bad sender address syntax.\r\n")
                                    .await?;
                            }
                            ProtoError::InvalidRecipientAddress => {
                                self.write(b"501 5.1.3 Bad destination address syntax.\r\n")
                                    .await?;
                            }
                            ProtoError::SyntaxError { syntax } => {
                                self.write(
                                    format!("501 5.5.2 Syntax error, expected: {syntax}\r\n")
                                        .as_bytes(),
                                )
                                .await?;
                            }
                            ProtoError::InvalidParameter { param } => {
                                self.write(
                                    format!("501 5.5.4 Invalid parameter {param:?}.\r\n")
                                        .as_bytes(),
                                )
                                .await?;
                            }
                            ProtoError::UnsupportedParameter { param } => {
                                self.write(
                                    format!("504 5.5.4 Unsupported parameter {param:?}.\r\n")
                                        .as_bytes(),
                                )
                                .await?;
                            }
                            ProtoError::ResponseTooLong => {
                                self.write(b"554 5.3.4 Line is too long.\r\n").await?;
                            }
                        },
                    }
                },
                State::Data(receiver) => {
                    if receiver.ingest(&mut iter, &mut self.data.message) {
                        let response = self.process_message().await;
                        self.write(&response).await?;
                        self.reset_transaction();
                        state = State::default();
                    } else {
                        break 'outer;
                    }
                }
                State::None => {
                    state = State::default();
                }
            }
        }

        self.state = state;
        Ok(true)
    }

    async fn handle_lhlo(&mut self, host: String) -> Result<(), ()> {
        self.data.helo_domain = host;
        self.write(
            format!(
                "250-{} you had me at LHLO\r\n\
                 250-8BITMIME\r\n\
                 250-ENHANCEDSTATUSCODES\r\n\
                 250 PIPELINING\r\n",
                self.hostname
            )
            .as_bytes(),
        )
        .await
    }

    async fn handle_mail_from(&mut self, from: MailFrom<String>) -> Result<(), ()> {
        if !self.data.rcpt_to.is_empty() {
            return self
                .write(b"503 5.5.1 Multiple MAIL commands.\r\n")
                .await;
        }
        self.data.mail_from = Some(from.address.to_lowercase());
        self.write(b"250 2.1.0 OK\r\n").await
    }

    async fn handle_rcpt_to(&mut self, to: RcptTo<String>) -> Result<(), ()> {
        if self.data.mail_from.is_none() {
            return self.write(b"503 5.5.1 MAIL is required first.\r\n").await;
        }

        let addr = match Addr::from_spec(&to.address.to_lowercase()) {
            Some(addr) => addr,
            None => {
                return self.write(b"550 5.1.1 user not found\r\n").await;
            }
        };
        // Bounce addresses deliver to the list they belong to.
        let list_addr = addr.strip_bounce().unwrap_or_else(|| addr.clone());

        match self.server.store().get_list(&list_addr) {
            Ok(Some(list)) => {
                self.data.rcpt_to.push(Recipient { addr, list });
                self.write(b"250 2.1.5 OK\r\n").await
            }
            Ok(None) => self.write(b"550 5.1.1 user not found\r\n").await,
            Err(err) => {
                tracing::error!(
                    parent: &self.span,
                    context = "rcpt",
                    event = "error",
                    reason = %err,
                    "Failed to look up list."
                );
                self.write(b"451 4.3.0 Temporary server failure, try again later.\r\n")
                    .await
            }
        }
    }

    async fn can_start_data(&mut self) -> Result<bool, ()> {
        if self.data.rcpt_to.is_empty() {
            self.write(b"503 5.5.1 RCPT is required first.\r\n").await?;
            Ok(false)
        } else {
            self.write(b"354 Start mail input; end with <CRLF>.<CRLF>\r\n")
                .await?;
            Ok(true)
        }
    }
}
