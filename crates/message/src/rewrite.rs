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

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::Rng;

use crate::{footer, IncomingMessage};

/// Everything about the target list that header rewriting needs to know.
pub struct ListContext<'a> {
    pub local: &'a str,
    pub domain: &'a str,
    pub display: &'a str,
    pub hide_from: bool,
    pub leave_url: &'a str,
}

impl ListContext<'_> {
    pub fn addr_spec(&self) -> String {
        format!("{}@{}", self.local, self.domain)
    }
}

/// Headers that the rewrite replaces wholesale.
const REWRITTEN_HEADERS: &[&str] = &[
    "from",
    "reply-to",
    "subject",
    "list-id",
    "list-post",
    "list-unsubscribe",
    "list-subscribe",
    "list-owner",
    "list-help",
    "list-archive",
];

/// Produces the outbound copy of an accepted message: headers rewritten
/// for list distribution, the leave footer injected, and the header block
/// emitted in case-insensitive alphabetical order (one header per line,
/// folded continuation lines preserved) so outputs are byte reproducible.
pub fn list_copy(msg: &IncomingMessage<'_>, list: &ListContext<'_>) -> Vec<u8> {
    let (replacement_content_type, body) = footer::inject(msg, list);

    let mut headers: Vec<(String, Vec<u8>)> = Vec::new();
    let mut had_mime_version = false;

    for header in &msg.root_part().headers {
        let name = header.name();
        let lower = name.to_ascii_lowercase();
        if REWRITTEN_HEADERS.contains(&lower.as_str()) {
            continue;
        }
        match lower.as_str() {
            "mime-version" => had_mime_version = true,
            "content-type" | "content-transfer-encoding"
                if replacement_content_type.is_some() =>
            {
                continue;
            }
            _ => {}
        }
        let mut value = msg.raw_header_value(header).to_vec();
        if !value.ends_with(b"\n") {
            value.extend_from_slice(b"\r\n");
        }
        headers.push((name.to_string(), value));
    }

    let original_from = msg.single_from();
    let from_display = if list.hide_from {
        list.display.to_string()
    } else {
        match &original_from {
            Some(from) => format!("{} via {}", from.display_or_local(), list.display),
            None => list.display.to_string(),
        }
    };
    push_composed(
        &mut headers,
        "From",
        &format!("{} <{}>", encode_display(&from_display), list.addr_spec()),
    );
    if let Some(from) = &original_from {
        push_composed(&mut headers, "Reply-To", &format!("<{}>", from.addr_spec()));
    }

    let prefix = format!("[{}] ", list.display);
    let subject = msg.subject();
    let subject = if subject.starts_with(&prefix) {
        subject.to_string()
    } else {
        format!("{prefix}{subject}")
    };
    push_composed(&mut headers, "Subject", &encode_text(&subject));

    push_composed(
        &mut headers,
        "List-Id",
        &format!("\"{}\" <{}>", list.display, list.addr_spec()),
    );
    push_composed(
        &mut headers,
        "List-Post",
        &format!("<mailto:{}>", list.addr_spec()),
    );
    push_composed(
        &mut headers,
        "List-Unsubscribe",
        &format!("<{}>", list.leave_url),
    );

    if msg.message_id().is_none() {
        push_composed(
            &mut headers,
            "Message-Id",
            &format!("<{}@{}>", random_base32(32), list.domain),
        );
    }

    if let Some(content_type) = replacement_content_type {
        push_composed(&mut headers, "Content-Type", &content_type);
        if !had_mime_version {
            push_composed(&mut headers, "MIME-Version", "1.0");
        }
    }

    headers.sort_by(|a, b| a.0.to_ascii_lowercase().cmp(&b.0.to_ascii_lowercase()));

    let mut out = Vec::with_capacity(body.len() + 512);
    for (name, value) in &headers {
        out.extend_from_slice(name.as_bytes());
        out.push(b':');
        out.extend_from_slice(value);
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&body);
    out
}

fn push_composed(headers: &mut Vec<(String, Vec<u8>)>, name: &str, value: &str) {
    headers.push((name.to_string(), format!(" {value}\r\n").into_bytes()));
}

/// Display names are always emitted as a quoted string; non-ASCII names
/// become an RFC 2047 encoded word instead.
fn encode_display(display: &str) -> String {
    if display.is_ascii() {
        format!(
            "\"{}\"",
            display.replace('\\', "\\\\").replace('"', "\\\"")
        )
    } else {
        rfc2047_encode(display)
    }
}

fn encode_text(value: &str) -> String {
    if value.is_ascii() {
        value.to_string()
    } else {
        rfc2047_encode(value)
    }
}

fn rfc2047_encode(value: &str) -> String {
    format!("=?utf-8?B?{}?=", STANDARD.encode(value.as_bytes()))
}

/// Random local part for generated Message-Ids.
fn random_base32(len: usize) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz234567";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}
