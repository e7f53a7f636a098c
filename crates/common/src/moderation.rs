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

use std::path::PathBuf;

use message::IncomingMessage;
use store::List;

use crate::{Error, Result, Server};

/// Held messages shown per page in the moderation queue.
pub const PAGE_SIZE: usize = 10;

/// What the moderation queue shows without opening the full message.
#[derive(Debug, Clone)]
pub struct HeldSummary {
    pub filename: String,
    pub from: Option<String>,
    pub subject: String,
}

impl Server {
    pub fn storage_folder(&self, list: &List) -> PathBuf {
        self.spool().storage_folder(list)
    }

    /// One page of held messages, newest first. Pages are 1-based.
    pub fn held_page(&self, list: &List, page: usize) -> Result<Vec<String>> {
        Ok(self
            .spool()
            .list(list)?
            .into_iter()
            .skip(page.saturating_sub(1) * PAGE_SIZE)
            .take(PAGE_SIZE)
            .collect())
    }

    pub fn read_header(&self, list: &List, filename: &str) -> Result<HeldSummary> {
        let raw = self.spool().read(list, filename)?;
        let msg = IncomingMessage::parse(&raw).ok_or(Error::UnparsableMessage)?;
        Ok(HeldSummary {
            filename: filename.to_string(),
            from: msg.single_from().map(|addr| addr.addr_spec()),
            subject: msg.subject().to_string(),
        })
    }

    pub fn read_message(&self, list: &List, filename: &str) -> Result<Vec<u8>> {
        Ok(self.spool().read(list, filename)?)
    }

    pub fn delete_moderated_mail(&self, list: &List, filename: &str) -> Result<()> {
        Ok(self.spool().delete(list, filename)?)
    }

    /// Moderator approval: distributes the held message to the list's
    /// receivers and removes it from the queue. Holds an in-flight guard
    /// so shutdown waits for the fan-out to finish.
    pub async fn forward(&self, list: &List, filename: &str) -> Result<()> {
        let _in_flight = self.inner.in_flight.is_allowed();
        let raw = self.spool().read(list, filename)?;
        let msg = IncomingMessage::parse(&raw).ok_or(Error::UnparsableMessage)?;
        let recipients = self.distribute(list, &msg).await?;
        self.spool().delete(list, filename)?;
        tracing::info!(
            context = "moderation",
            event = "forward",
            list = list.addr_spec(),
            filename = filename,
            recipients = recipients,
        );
        Ok(())
    }
}
