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

use mail_parser::PartType;
use rand::Rng;

use crate::{
    incoming::{part_content_type, part_disposition},
    rewrite::ListContext,
    IncomingMessage,
};

/// Generates a fresh MIME boundary token, 60 hex characters.
pub(crate) fn fresh_boundary() -> String {
    let mut rng = rand::thread_rng();
    (0..60)
        .map(|_| char::from_digit(rng.gen_range(0..16), 16).unwrap())
        .collect()
}

pub(crate) fn plain_footer(list: &ListContext<'_>) -> String {
    format!(
        "You can leave the mailing list \"{}\" here: {}",
        list.display, list.leave_url
    )
}

pub(crate) fn html_footer(list: &ListContext<'_>) -> String {
    format!(
        "<span style=\"font-size: 9pt;\">You can leave the mailing list \"{}\" <a href=\"{}\">here</a>.</span>",
        list.display, list.leave_url
    )
}

/// Builds the outbound body with the leave footer injected. Returns the
/// replacement root `Content-Type` value when the body shape required a
/// new top-level type, or `None` when the original content headers stay.
///
/// Shapes handled:
///   - `text/plain` (or no content type): the footer is appended behind a
///     `----` separator line.
///   - `multipart/alternative`: the whole body is wrapped in a fresh
///     `multipart/mixed` with the original part first and a footer
///     `multipart/alternative` sibling.
///   - `multipart/mixed`: a footer `multipart/alternative` part is
///     inserted right after the first text part; attachments keep their
///     order.
///   - anything else is left untouched.
pub(crate) fn inject(msg: &IncomingMessage<'_>, list: &ListContext<'_>) -> (Option<String>, Vec<u8>) {
    let root = msg.root_part();
    let raw_body = msg
        .raw()
        .get(root.offset_body..root.offset_end)
        .unwrap_or_default();

    let (ctype, subtype) = match part_content_type(root) {
        Some(ct) => (
            ct.ctype().to_ascii_lowercase(),
            ct.subtype().unwrap_or("").to_ascii_lowercase(),
        ),
        None => ("text".to_string(), "plain".to_string()),
    };

    match (ctype.as_str(), subtype.as_str()) {
        ("text", "plain") => {
            let mut body = raw_body.to_vec();
            if !body.ends_with(b"\n") {
                body.extend_from_slice(b"\r\n");
            }
            body.extend_from_slice(b"----\r\n");
            body.extend_from_slice(plain_footer(list).as_bytes());
            body.extend_from_slice(b"\r\n");
            (None, body)
        }
        ("multipart", "alternative") => {
            let outer = fresh_boundary();
            let original_type = match part_content_type(root).and_then(|ct| ct.attribute("boundary"))
            {
                Some(boundary) => {
                    format!("multipart/alternative; boundary=\"{boundary}\"")
                }
                // Unusable multipart, leave the body alone.
                None => return (None, raw_body.to_vec()),
            };

            let mut body = Vec::with_capacity(raw_body.len() + 1024);
            body.extend_from_slice(format!("--{outer}\r\n").as_bytes());
            body.extend_from_slice(format!("Content-Type: {original_type}\r\n\r\n").as_bytes());
            body.extend_from_slice(trim_newlines(raw_body));
            body.extend_from_slice(b"\r\n");
            body.extend_from_slice(format!("--{outer}\r\n").as_bytes());
            body.extend_from_slice(&footer_part(list));
            body.extend_from_slice(format!("--{outer}--\r\n").as_bytes());
            (Some(format!("multipart/mixed; boundary=\"{outer}\"")), body)
        }
        ("multipart", "mixed") => {
            let boundary = match part_content_type(root).and_then(|ct| ct.attribute("boundary")) {
                Some(boundary) => boundary.to_string(),
                None => return (None, raw_body.to_vec()),
            };
            let children = match &root.body {
                PartType::Multipart(children) => children.clone(),
                _ => return (None, raw_body.to_vec()),
            };

            let footer_after = children.iter().position(|&id| {
                let part = &msg.parsed().parts[id];
                let is_text = matches!(part.body, PartType::Text(_) | PartType::Html(_));
                let is_attachment = part_disposition(part)
                    .is_some_and(|cd| cd.ctype().eq_ignore_ascii_case("attachment"));
                is_text && !is_attachment
            });

            let mut body = Vec::with_capacity(raw_body.len() + 1024);
            for (pos, &id) in children.iter().enumerate() {
                let part = &msg.parsed().parts[id];
                body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
                body.extend_from_slice(trim_newlines(
                    msg.raw()
                        .get(part.offset_header..part.offset_end)
                        .unwrap_or_default(),
                ));
                body.extend_from_slice(b"\r\n");
                if footer_after == Some(pos) {
                    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
                    body.extend_from_slice(&footer_part(list));
                }
            }
            body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
            (None, body)
        }
        _ => (None, raw_body.to_vec()),
    }
}

/// A complete `multipart/alternative` footer part, headers included,
/// terminated by its own closing boundary.
fn footer_part(list: &ListContext<'_>) -> Vec<u8> {
    let boundary = fresh_boundary();
    format!(
        "Content-Type: multipart/alternative; boundary=\"{boundary}\"\r\n\
         \r\n\
         --{boundary}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         {}\r\n\
         --{boundary}\r\n\
         Content-Type: text/html; charset=utf-8\r\n\
         \r\n\
         {}\r\n\
         --{boundary}--\r\n",
        plain_footer(list),
        html_footer(list)
    )
    .into_bytes()
}

fn trim_newlines(value: &[u8]) -> &[u8] {
    let mut end = value.len();
    while end > 0 && (value[end - 1] == b'\n' || value[end - 1] == b'\r') {
        end -= 1;
    }
    &value[..end]
}
