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

use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ring::hmac;

/// Tolerated forward clock skew when validating checkback timestamps.
const MAX_CLOCK_SKEW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckbackError {
    InvalidHmac,
    Expired,
    FutureTimestamp,
}

impl std::fmt::Display for CheckbackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckbackError::InvalidHmac => write!(f, "invalid HMAC"),
            CheckbackError::Expired => write!(f, "checkback link expired"),
            CheckbackError::FutureTimestamp => write!(f, "checkback timestamp is in the future"),
        }
    }
}

impl std::error::Error for CheckbackError {}

pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

/// HMAC-SHA256 over the addr-spec and the decimal timestamp, keyed with
/// the list's secret.
pub fn sign(hmac_key: &[u8], addr_spec: &str, timestamp: i64) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, hmac_key);
    let mut data = Vec::with_capacity(addr_spec.len() + 21);
    data.extend_from_slice(addr_spec.as_bytes());
    data.push(b'\n');
    data.extend_from_slice(timestamp.to_string().as_bytes());
    hmac::sign(&key, &data).as_ref().to_vec()
}

pub fn validate(
    hmac_key: &[u8],
    signature: &[u8],
    addr_spec: &str,
    timestamp: i64,
    max_age_days: i64,
) -> Result<(), CheckbackError> {
    let now = now();
    if timestamp > now + MAX_CLOCK_SKEW_SECS {
        return Err(CheckbackError::FutureTimestamp);
    }
    if timestamp < now - max_age_days * 86400 {
        return Err(CheckbackError::Expired);
    }

    let key = hmac::Key::new(hmac::HMAC_SHA256, hmac_key);
    let mut data = Vec::with_capacity(addr_spec.len() + 21);
    data.extend_from_slice(addr_spec.as_bytes());
    data.push(b'\n');
    data.extend_from_slice(timestamp.to_string().as_bytes());
    hmac::verify(&key, &data, signature).map_err(|_| CheckbackError::InvalidHmac)
}

/// Tokens travel inside URL path segments, so they use the URL-safe
/// alphabet without padding.
pub fn encode_token(signature: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(signature)
}

pub fn decode_token(token: &str) -> Result<Vec<u8>, CheckbackError> {
    URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| CheckbackError::InvalidHmac)
}

/// Percent-escapes a URL path segment.
pub fn escape(segment: &str) -> String {
    form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}

fn checkback_url(
    web_url: &str,
    action: &str,
    list_spec: &str,
    hmac_key: &[u8],
    addr_spec: &str,
) -> String {
    let ts = now();
    format!(
        "{}/{}/{}/{}/{}/{}",
        web_url.trim_end_matches('/'),
        action,
        escape(list_spec),
        ts,
        encode_token(&sign(hmac_key, addr_spec, ts)),
        escape(addr_spec)
    )
}

pub fn join_url(web_url: &str, list_spec: &str, hmac_key: &[u8], addr_spec: &str) -> String {
    checkback_url(web_url, "join", list_spec, hmac_key, addr_spec)
}

pub fn leave_url(web_url: &str, list_spec: &str, hmac_key: &[u8], addr_spec: &str) -> String {
    checkback_url(web_url, "leave", list_spec, hmac_key, addr_spec)
}
