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

use message::{
    addr::Addr,
    incoming::{Command, IncomingMessage},
};
use store::List;
use utils::listener::SessionStream;

use crate::{
    core::{Recipient, Session},
    policy::{self, Decision, PolicyError},
};

enum DeliveryError {
    Policy(PolicyError),
    Temporary,
}

impl From<PolicyError> for DeliveryError {
    fn from(err: PolicyError) -> Self {
        DeliveryError::Policy(err)
    }
}

impl<T: SessionStream> Session<T> {
    /// Runs the accepted message through policy once per recipient and
    /// returns the LMTP multi-status reply, one line per `RCPT TO` in
    /// envelope order.
    pub async fn process_message(&mut self) -> Vec<u8> {
        let _in_flight = self.server.inner.in_flight.is_allowed();

        let raw = std::mem::take(&mut self.data.message);
        let mail_from = self.data.mail_from.clone().unwrap_or_default();
        let rcpts = std::mem::take(&mut self.data.rcpt_to);
        let mut response = Vec::with_capacity(rcpts.len() * 32);

        let msg = match IncomingMessage::parse(&raw) {
            Some(msg) => msg,
            None => {
                tracing::debug!(
                    parent: &self.span,
                    context = "data",
                    event = "parse-failed",
                    size = raw.len(),
                );
                for _ in 0..rcpts.len() {
                    response.extend_from_slice(b"550 5.6.0 Failed to parse message.\r\n");
                }
                return response;
            }
        };

        for rcpt in &rcpts {
            match self.deliver(&msg, &raw, &mail_from, rcpt).await {
                Ok(()) => response.extend_from_slice(b"250 2.0.0 OK\r\n"),
                Err(DeliveryError::Policy(PolicyError::Rejected)) => {
                    response.extend_from_slice(b"550 5.1.1 user not found\r\n")
                }
                Err(DeliveryError::Policy(err)) => {
                    response.extend_from_slice(format!("550 5.7.1 {err}\r\n").as_bytes())
                }
                Err(DeliveryError::Temporary) => response.extend_from_slice(
                    b"451 4.3.0 Temporary server failure, try again later.\r\n",
                ),
            }
        }

        self.data.messages_sent += 1;
        response
    }

    async fn deliver(
        &self,
        msg: &IncomingMessage<'_>,
        raw: &[u8],
        env_from: &str,
        rcpt: &Recipient,
    ) -> Result<(), DeliveryError> {
        let list = &rcpt.list;
        let list_spec = list.addr_spec();

        // The bounce channel and the list address are mutually exclusive
        // with respect to the reverse path.
        if rcpt.addr.is_bounce() {
            if !env_from.is_empty() {
                return Err(PolicyError::NonBounceToBounceAddress.into());
            }
            return match self.server.distribute_bounce(list, raw).await {
                Ok(count) => {
                    tracing::info!(
                        parent: &self.span,
                        context = "bounce",
                        event = "forwarded",
                        list = list_spec,
                        recipients = count,
                    );
                    Ok(())
                }
                Err(err) => {
                    tracing::error!(
                        parent: &self.span,
                        context = "bounce",
                        event = "error",
                        list = list_spec,
                        reason = %err,
                        "Failed to forward bounce notification."
                    );
                    Err(DeliveryError::Temporary)
                }
            };
        }
        if env_from.is_empty() {
            return Err(PolicyError::BounceToNonBounceAddress.into());
        }

        if msg.has_list_id(&list_spec) {
            return Err(PolicyError::LoopDetected(list_spec).into());
        }

        if let Some(command) = msg.subject_command() {
            return self.handle_command(list, command, env_from).await;
        }

        if !msg.addressed_to(&list_spec) {
            return Err(PolicyError::NotInToOrCc(list_spec).into());
        }

        let sender = msg.single_from();
        let decision = if msg.is_spam_flagged() {
            Decision::Moderate
        } else {
            let class = policy::classify(self.server.store(), list, sender.as_ref())
                .map_err(|err| {
                    tracing::error!(
                        parent: &self.span,
                        context = "policy",
                        event = "error",
                        list = list_spec,
                        reason = %err,
                        "Failed to classify sender."
                    );
                    DeliveryError::Temporary
                })?;
            policy::decide(list, class)
        };

        match decision {
            Decision::Distribute => match self.server.distribute(list, msg).await {
                Ok(count) => {
                    tracing::info!(
                        parent: &self.span,
                        context = "data",
                        event = "fan-out",
                        list = list_spec,
                        recipients = count,
                    );
                    Ok(())
                }
                Err(err) => {
                    // The submitting MTA treats the message as accepted at
                    // this point, so keep it in the moderation queue
                    // instead of bouncing it.
                    tracing::error!(
                        parent: &self.span,
                        context = "data",
                        event = "error",
                        list = list_spec,
                        reason = %err,
                        "Fan-out failed, re-spooling message."
                    );
                    match self.server.spool().put(list, raw) {
                        Ok(_) => Ok(()),
                        Err(err) => {
                            tracing::error!(
                                parent: &self.span,
                                context = "data",
                                event = "error",
                                list = list_spec,
                                reason = %err,
                                "Failed to spool message."
                            );
                            Err(DeliveryError::Temporary)
                        }
                    }
                }
            },
            Decision::Moderate => {
                let filename = self.server.spool().put(list, raw).map_err(|err| {
                    tracing::error!(
                        parent: &self.span,
                        context = "data",
                        event = "error",
                        list = list_spec,
                        reason = %err,
                        "Failed to spool message."
                    );
                    DeliveryError::Temporary
                })?;
                tracing::info!(
                    parent: &self.span,
                    context = "data",
                    event = "moderate",
                    list = list_spec,
                    filename = filename,
                );
                let sender = sender
                    .as_ref()
                    .map(Addr::addr_spec)
                    .unwrap_or_else(|| env_from.to_string());
                if let Err(err) = self.server.notify_moderators(list, &sender).await {
                    // The message is safely on disk, a lost alert is not
                    // worth a retry loop.
                    tracing::warn!(
                        parent: &self.span,
                        context = "data",
                        event = "error",
                        list = list_spec,
                        reason = %err,
                        "Failed to notify moderators."
                    );
                }
                Ok(())
            }
            Decision::Reject => Err(PolicyError::Rejected.into()),
        }
    }

    /// `join`/`leave` subject commands: mail a checkback URL to the
    /// envelope sender instead of distributing anything.
    async fn handle_command(
        &self,
        list: &List,
        command: Command,
        env_from: &str,
    ) -> Result<(), DeliveryError> {
        let addr = match Addr::from_spec(env_from) {
            Some(addr) => addr,
            None => {
                tracing::debug!(
                    parent: &self.span,
                    context = "command",
                    event = "skip",
                    reason = "unparsable envelope sender",
                );
                return Ok(());
            }
        };

        let result = match command {
            // Non-public lists accept the mail without revealing anything.
            Command::Join if !list.public_signup => return Ok(()),
            Command::Join => self.server.send_join_checkback(list, &addr).await,
            Command::Leave => self
                .server
                .send_leave_checkback(list, &addr)
                .await
                .map(|_sent| ()),
        };

        result.map_err(|err| {
            tracing::error!(
                parent: &self.span,
                context = "command",
                event = "error",
                list = list.addr_spec(),
                reason = %err,
                "Failed to send checkback email."
            );
            DeliveryError::Temporary
        })
    }
}
