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

use std::hash::Hash;

/// Reserved local-part suffix of the per-list bounce channel.
pub const BOUNCE_SUFFIX: &str = "+bounces";

/// An RFC 5322 mailbox. Local part and domain are normalized to lowercase
/// at construction; the display name keeps its original casing and only
/// matters for header composition.
#[derive(Debug, Clone)]
pub struct Addr {
    pub display: Option<String>,
    pub local: String,
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Malformed(String),
    NoAddress,
    TooMany(usize),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::Malformed(input) => write!(f, "malformed address {input:?}"),
            ParseError::NoAddress => write!(f, "no address given"),
            ParseError::TooMany(limit) => write!(f, "too many addresses, at most {limit} allowed"),
        }
    }
}

impl std::error::Error for ParseError {}

impl PartialEq for Addr {
    fn eq(&self, other: &Self) -> bool {
        self.local == other.local && self.domain == other.domain
    }
}

impl Eq for Addr {}

impl Hash for Addr {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.local.hash(state);
        self.domain.hash(state);
    }
}

impl Addr {
    pub fn new(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Addr {
            display: None,
            local: local.into().to_lowercase(),
            domain: domain.into().to_lowercase(),
        }
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        let display = display.into();
        self.display = (!display.is_empty()).then_some(display);
        self
    }

    /// Parses a strict `local@domain` spec, as stored in the database.
    pub fn from_spec(spec: &str) -> Option<Addr> {
        let (local, domain) = spec.rsplit_once('@')?;
        if local.is_empty() || domain.is_empty() || !is_valid_domain(domain) {
            return None;
        }
        Some(Addr::new(local, domain))
    }

    /// Parses a single RFC 5322 mailbox (`local@domain` or
    /// `"Display" <local@domain>`).
    pub fn parse(input: &str) -> Result<Addr, ParseError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ParseError::NoAddress);
        }
        parse_mailbox(input)
    }

    /// Parses a comma-separated list of mailboxes, returning every address
    /// that could be parsed along with every error encountered. Parsing
    /// stops with a `TooMany` error once `limit` addresses were accepted.
    pub fn parse_many(input: &str, limit: usize) -> (Vec<Addr>, Vec<ParseError>) {
        let mut addrs = Vec::new();
        let mut errors = Vec::new();
        for item in split_mailbox_list(input) {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            match parse_mailbox(item) {
                Ok(addr) => {
                    if addrs.len() == limit {
                        errors.push(ParseError::TooMany(limit));
                        break;
                    }
                    addrs.push(addr);
                }
                Err(err) => errors.push(err),
            }
        }
        if addrs.is_empty() && errors.is_empty() {
            errors.push(ParseError::NoAddress);
        }
        (addrs, errors)
    }

    /// Canonical `local@domain` form used for equality, lookups and
    /// storage.
    pub fn addr_spec(&self) -> String {
        format!("{}@{}", self.local, self.domain)
    }

    pub fn is_bounce(&self) -> bool {
        self.local.ends_with(BOUNCE_SUFFIX)
    }

    /// The list address a bounce address belongs to, if this is one.
    pub fn strip_bounce(&self) -> Option<Addr> {
        self.local
            .strip_suffix(BOUNCE_SUFFIX)
            .filter(|local| !local.is_empty())
            .map(|local| Addr::new(local, self.domain.clone()))
    }

    pub fn bounce_spec(&self) -> String {
        format!("{}{}@{}", self.local, BOUNCE_SUFFIX, self.domain)
    }

    /// Name used when composing the rewritten `From:` header; falls back
    /// to the local part when the mailbox had no display name.
    pub fn display_or_local(&self) -> &str {
        self.display.as_deref().unwrap_or(&self.local)
    }
}

impl std::fmt::Display for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.display {
            Some(display) => write!(f, "\"{}\" <{}>", display, self.addr_spec()),
            None => write!(f, "{}", self.addr_spec()),
        }
    }
}

fn is_valid_domain(domain: &str) -> bool {
    !domain.is_empty()
        && domain
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.'))
}

fn is_valid_local(local: &str) -> bool {
    !local.is_empty()
        && !local.starts_with('.')
        && !local.ends_with('.')
        && local.chars().all(|c| {
            c.is_ascii_alphanumeric()
                || matches!(
                    c,
                    '!' | '#'
                        | '$'
                        | '%'
                        | '&'
                        | '\''
                        | '*'
                        | '+'
                        | '-'
                        | '/'
                        | '='
                        | '?'
                        | '^'
                        | '_'
                        | '`'
                        | '{'
                        | '|'
                        | '}'
                        | '~'
                        | '.'
                )
        })
}

fn parse_mailbox(item: &str) -> Result<Addr, ParseError> {
    if let Some(lt) = find_unquoted(item, '<') {
        let gt = find_unquoted(item, '>')
            .filter(|gt| *gt > lt && item[gt + 1..].trim().is_empty())
            .ok_or_else(|| ParseError::Malformed(item.to_string()))?;
        let display = unquote(item[..lt].trim());
        let addr = parse_spec(item[lt + 1..gt].trim())
            .ok_or_else(|| ParseError::Malformed(item.to_string()))?;
        Ok(match display {
            Some(display) => addr.with_display(display),
            None => addr,
        })
    } else {
        parse_spec(item).ok_or_else(|| ParseError::Malformed(item.to_string()))
    }
}

fn parse_spec(spec: &str) -> Option<Addr> {
    let (local, domain) = spec.rsplit_once('@')?;
    let local = unquote(local).unwrap_or_else(|| local.to_string());
    if is_valid_local(&local) && is_valid_domain(domain) {
        Some(Addr::new(local, domain))
    } else {
        None
    }
}

/// Strips surrounding double quotes and unescapes `\"` and `\\`. Returns
/// `None` for an empty result.
fn unquote(value: &str) -> Option<String> {
    let value = value.trim();
    let unquoted = if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        let mut result = String::with_capacity(value.len() - 2);
        let mut escaped = false;
        for c in value[1..value.len() - 1].chars() {
            if escaped {
                result.push(c);
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else {
                result.push(c);
            }
        }
        result
    } else {
        value.to_string()
    };
    (!unquoted.is_empty()).then_some(unquoted)
}

fn find_unquoted(value: &str, needle: char) -> Option<usize> {
    let mut in_quotes = false;
    let mut escaped = false;
    for (pos, c) in value.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            in_quotes = !in_quotes;
        } else if c == needle && !in_quotes {
            return Some(pos);
        }
    }
    None
}

fn split_mailbox_list(input: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut in_quotes = false;
    let mut in_angle = false;
    let mut escaped = false;
    let mut start = 0;
    for (pos, c) in input.char_indices() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            in_quotes = !in_quotes;
        } else if !in_quotes {
            match c {
                '<' => in_angle = true,
                '>' => in_angle = false,
                ',' if !in_angle => {
                    items.push(&input[start..pos]);
                    start = pos + 1;
                }
                _ => {}
            }
        }
    }
    items.push(&input[start..]);
    items
}
