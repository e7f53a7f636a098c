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

use mail_parser::{ContentType, Header, HeaderValue, Message, MessageParser, MessagePart};

use crate::addr::Addr;

/// Self-service request encoded in the subject line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Join,
    Leave,
}

/// A parsed inbound message. Wraps the raw byte stream together with the
/// `mail-parser` view of it; headers are exposed both parsed and as raw
/// folded slices so rewriting can preserve them byte for byte.
pub struct IncomingMessage<'x> {
    raw: &'x [u8],
    parsed: Message<'x>,
}

impl<'x> IncomingMessage<'x> {
    pub fn parse(raw: &'x [u8]) -> Option<Self> {
        MessageParser::new()
            .parse(raw)
            .filter(|parsed| !parsed.parts.is_empty())
            .map(|parsed| IncomingMessage { raw, parsed })
    }

    pub fn raw(&self) -> &'x [u8] {
        self.raw
    }

    pub fn parsed(&self) -> &Message<'x> {
        &self.parsed
    }

    pub fn root_part(&self) -> &MessagePart<'x> {
        &self.parsed.parts[0]
    }

    /// The raw folded value of a header, exactly as received, including
    /// the trailing line break.
    pub fn raw_header_value(&self, header: &Header<'_>) -> &'x [u8] {
        self.raw
            .get(header.offset_start..header.offset_end)
            .unwrap_or_default()
    }

    fn raw_header_values(&self, name: &str) -> impl Iterator<Item = &'x [u8]> + '_ {
        let name = name.to_string();
        self.root_part()
            .headers
            .iter()
            .filter(move |header| header.name().eq_ignore_ascii_case(&name))
            .map(|header| self.raw_header_value(header))
    }

    /// The `From:` mailbox, if the header carries exactly one.
    pub fn single_from(&self) -> Option<Addr> {
        let from = self.parsed.from()?;
        let mut mailboxes = from.iter();
        let first = mailboxes.next()?;
        if mailboxes.next().is_some() {
            return None;
        }
        let addr = Addr::from_spec(first.address()?)?;
        Some(match first.name() {
            Some(name) if !name.trim().is_empty() => addr.with_display(name.trim()),
            _ => addr,
        })
    }

    /// Loop detection: true when any `List-Id` header already carries the
    /// list's addr-spec.
    pub fn has_list_id(&self, list_spec: &str) -> bool {
        let needle = list_spec.to_ascii_lowercase();
        self.raw_header_values("List-Id").any(|value| {
            String::from_utf8_lossy(value)
                .to_ascii_lowercase()
                .contains(&needle)
        })
    }

    /// Honors an externally-set `X-Spam-Status: Yes, ...` header.
    pub fn is_spam_flagged(&self) -> bool {
        self.raw_header_values("X-Spam-Status").any(|value| {
            String::from_utf8_lossy(value)
                .trim_start()
                .to_ascii_lowercase()
                .starts_with("yes")
        })
    }

    pub fn subject(&self) -> &str {
        self.parsed.subject().unwrap_or("")
    }

    pub fn message_id(&self) -> Option<&str> {
        self.parsed.message_id()
    }

    pub fn subject_command(&self) -> Option<Command> {
        match self.subject().trim().to_lowercase().as_str() {
            "join" => Some(Command::Join),
            "leave" => Some(Command::Leave),
            _ => None,
        }
    }

    /// True when the list address appears in `To:` or `Cc:`; guards
    /// against blind-carbon-copy misrouting.
    pub fn addressed_to(&self, list_spec: &str) -> bool {
        [self.parsed.to(), self.parsed.cc()]
            .into_iter()
            .flatten()
            .flat_map(|addresses| addresses.iter())
            .any(|mailbox| {
                mailbox
                    .address()
                    .is_some_and(|address| address.eq_ignore_ascii_case(list_spec))
            })
    }
}

/// The `Content-Type` of a MIME part, read from its own header block.
pub(crate) fn part_content_type<'a, 'x>(
    part: &'a MessagePart<'x>,
) -> Option<&'a ContentType<'x>> {
    part_typed_header(part, "Content-Type")
}

pub(crate) fn part_disposition<'a, 'x>(part: &'a MessagePart<'x>) -> Option<&'a ContentType<'x>> {
    part_typed_header(part, "Content-Disposition")
}

fn part_typed_header<'a, 'x>(
    part: &'a MessagePart<'x>,
    name: &str,
) -> Option<&'a ContentType<'x>> {
    part.headers
        .iter()
        .rev()
        .find(|header| header.name().eq_ignore_ascii_case(name))
        .and_then(|header| match &header.value {
            HeaderValue::ContentType(ct) => Some(ct),
            _ => None,
        })
}
