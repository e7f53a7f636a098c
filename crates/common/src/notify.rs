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

use mail_builder::MessageBuilder;
use message::{addr::Addr, checkback, IncomingMessage};
use store::List;

use crate::{Error, Result, Server};

impl Server {
    /// Public ask-leave page of a list; this is the URL embedded in
    /// message footers (the HMAC-signed URL is only mailed on request).
    pub fn ask_leave_url(&self, list: &List) -> String {
        format!(
            "{}/leave/{}",
            self.inner.config.web_url.trim_end_matches('/'),
            checkback::escape(&list.addr_spec())
        )
    }

    pub fn moderation_url(&self, list: &List) -> String {
        format!(
            "{}/mod/{}",
            self.inner.config.web_url.trim_end_matches('/'),
            checkback::escape(&list.addr_spec())
        )
    }

    /// Mails an HMAC-signed join link. Deliberately a no-op when the
    /// address is already a member, so membership is not revealed.
    pub async fn send_join_checkback(&self, list: &List, addr: &Addr) -> Result<()> {
        if self.store().is_member(list, addr)? {
            return Ok(());
        }
        let url = self.checkback_join_url(list, addr);
        self.send_checkback(list, addr, "join", &url).await
    }

    /// Mails an HMAC-signed leave link. Returns whether a mail was sent;
    /// the caller decides what to reveal to the end user.
    pub async fn send_leave_checkback(&self, list: &List, addr: &Addr) -> Result<bool> {
        if !self.store().is_member(list, addr)? {
            return Ok(false);
        }
        let url = self.checkback_leave_url(list, addr);
        self.send_checkback(list, addr, "leave", &url).await?;
        Ok(true)
    }

    async fn send_checkback(&self, list: &List, addr: &Addr, action: &str, url: &str) -> Result<()> {
        let list_spec = list.addr_spec();
        let addr_spec = addr.addr_spec();
        let message = MessageBuilder::new()
            .from((list.display.as_str(), list_spec.as_str()))
            .to(addr_spec.as_str())
            .subject(format!("Confirm to {action} the mailing list {list_spec}"))
            .text_body(format!(
                "Please open this link to {action} the mailing list \"{}\":\r\n\
                 \r\n\
                 {url}\r\n\
                 \r\n\
                 If you did not request this, simply ignore this email.\r\n",
                list.display
            ))
            .write_to_vec()
            .map_err(|err| Error::Sink(err.into()))?;

        self.sink()
            .send(&list.bounce_spec(), &[addr_spec], &message)
            .await?;
        Ok(())
    }

    /// Alerts every member with the notify flag that a message was held
    /// for moderation.
    pub async fn notify_moderators(&self, list: &List, sender: &str) -> Result<()> {
        let notifieds = self.store().notifieds(list)?;
        if notifieds.is_empty() {
            return Ok(());
        }

        let list_spec = list.addr_spec();
        let url = self.moderation_url(list);
        let rcpts: Vec<String> = notifieds.iter().map(Addr::addr_spec).collect();
        let message = MessageBuilder::new()
            .from((list.display.as_str(), list_spec.as_str()))
            .to(list_spec.as_str())
            .subject(format!("[{}] A message is waiting for moderation", list.display))
            .text_body(format!(
                "A message from {sender} to the mailing list {list_spec} is waiting \
                 for moderation:\r\n\
                 \r\n\
                 {url}\r\n",
            ))
            .write_to_vec()
            .map_err(|err| Error::Sink(err.into()))?;

        self.sink()
            .send(&list.bounce_spec(), &rcpts, &message)
            .await?;
        Ok(())
    }

    /// Rewrites an accepted message for the list and hands a single
    /// envelope, addressed to all receivers, to the MTA. Returns the
    /// number of recipients.
    pub async fn distribute(&self, list: &List, msg: &IncomingMessage<'_>) -> Result<usize> {
        let receivers = self.store().receivers(list)?;
        if receivers.is_empty() {
            return Ok(0);
        }

        let leave_url = self.ask_leave_url(list);
        let copy = message::rewrite::list_copy(msg, &self.list_context(list, &leave_url));
        let rcpts: Vec<String> = receivers.iter().map(Addr::addr_spec).collect();
        self.sink().send(&list.bounce_spec(), &rcpts, &copy).await?;
        Ok(rcpts.len())
    }

    /// Forwards a bounce notification, unchanged and still with an empty
    /// reverse path, to the members who asked for bounces.
    pub async fn distribute_bounce(&self, list: &List, raw: &[u8]) -> Result<usize> {
        let receivers = self.store().bounce_receivers(list)?;
        if receivers.is_empty() {
            return Ok(0);
        }
        let rcpts: Vec<String> = receivers.iter().map(Addr::addr_spec).collect();
        self.sink().send("", &rcpts, raw).await?;
        Ok(rcpts.len())
    }
}
