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

use store::users::UserStore;

#[derive(Debug)]
pub enum AuthError {
    InvalidCredentials,
    UnknownScheme(String),
    Store(store::Error),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::InvalidCredentials => write!(f, "invalid credentials"),
            AuthError::UnknownScheme(scheme) => {
                write!(f, "unknown password scheme {scheme:?}")
            }
            AuthError::Store(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Credential verification backends. The SMTPS/STARTTLS/SASL transports
/// live outside this server; only the realizations the core owns are
/// dispatched here.
pub enum Authenticator {
    Sql(UserStore),
    /// Accepts any credentials. Dummy mode only.
    Dummy,
}

impl Authenticator {
    pub fn name(&self) -> &'static str {
        match self {
            Authenticator::Sql(_) => "sql",
            Authenticator::Dummy => "dummy",
        }
    }

    pub fn available(&self) -> bool {
        true
    }

    pub fn authenticate(&self, user: &str, password: &str) -> Result<(), AuthError> {
        match self {
            Authenticator::Dummy => Ok(()),
            Authenticator::Sql(users) => {
                let secret = users
                    .get(user)
                    .map_err(AuthError::Store)?
                    .ok_or(AuthError::InvalidCredentials)?;
                match secret.scheme.as_str() {
                    "bcrypt" => {
                        let hash = std::str::from_utf8(&secret.hash)
                            .map_err(|_| AuthError::InvalidCredentials)?;
                        if pwhash::bcrypt::verify(password, hash) {
                            Ok(())
                        } else {
                            Err(AuthError::InvalidCredentials)
                        }
                    }
                    scheme => Err(AuthError::UnknownScheme(scheme.to_string())),
                }
            }
        }
    }
}
