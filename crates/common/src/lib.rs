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

pub mod auth;
pub mod moderation;
pub mod notify;
pub mod sink;

use std::{path::PathBuf, sync::Arc};

use auth::Authenticator;
use message::addr::Addr;
use sink::{MtaSink, SinkError};
use store::{spool::Spool, List, ListStore};
use utils::listener::limiter::ConcurrencyLimiter;

#[derive(Debug)]
pub enum Error {
    /// Deliberately generic: the web side must not learn whether a
    /// non-public list exists.
    NoList,
    Store(store::Error),
    Sink(SinkError),
    UnparsableMessage,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NoList => write!(f, "no such list"),
            Error::Store(err) => write!(f, "{err}"),
            Error::Sink(err) => write!(f, "{err}"),
            Error::UnparsableMessage => write!(f, "failed to parse message"),
        }
    }
}

impl std::error::Error for Error {}

impl From<store::Error> for Error {
    fn from(err: store::Error) -> Self {
        Error::Store(err)
    }
}

impl From<SinkError> for Error {
    fn from(err: SinkError) -> Self {
        Error::Sink(err)
    }
}

/// Runtime configuration snapshot, resolved from flags and environment at
/// startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub hostname: String,
    pub web_url: String,
    pub lmtp_sock: PathBuf,
    pub socketmap_sock: PathBuf,
    pub superadmin: Option<String>,
    pub dummy_mode: bool,
}

/// Shared server state handed to every listener and to the web
/// collaborator. Cheap to clone.
#[derive(Clone)]
pub struct Server {
    pub inner: Arc<Inner>,
}

pub struct Inner {
    pub store: ListStore,
    pub spool: Spool,
    pub sink: MtaSink,
    pub auth: Authenticator,
    pub config: Config,
    /// Incremented for the duration of LMTP `DATA` processing and
    /// moderator-initiated forwards; drained before shutdown completes.
    pub in_flight: ConcurrencyLimiter,
}

impl Server {
    pub fn new(
        store: ListStore,
        spool: Spool,
        sink: MtaSink,
        auth: Authenticator,
        config: Config,
    ) -> Self {
        Server {
            inner: Arc::new(Inner {
                store,
                spool,
                sink,
                auth,
                config,
                in_flight: ConcurrencyLimiter::new(u64::MAX),
            }),
        }
    }

    pub fn store(&self) -> &ListStore {
        &self.inner.store
    }

    pub fn spool(&self) -> &Spool {
        &self.inner.spool
    }

    pub fn sink(&self) -> &MtaSink {
        &self.inner.sink
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// List lookup for the web side; any miss or storage error collapses
    /// into the generic [`Error::NoList`].
    pub fn web_list(&self, addr: &Addr) -> Result<List> {
        self.inner
            .store
            .get_list(addr)
            .map_err(|_| Error::NoList)?
            .ok_or(Error::NoList)
    }

    pub fn checkback_join_url(&self, list: &List, addr: &Addr) -> String {
        message::checkback::join_url(
            &self.inner.config.web_url,
            &list.addr_spec(),
            &list.hmac_key,
            &addr.addr_spec(),
        )
    }

    pub fn checkback_leave_url(&self, list: &List, addr: &Addr) -> String {
        message::checkback::leave_url(
            &self.inner.config.web_url,
            &list.addr_spec(),
            &list.hmac_key,
            &addr.addr_spec(),
        )
    }

    /// The header rewrite context of a list, with the leave URL pointing
    /// at the given recipient.
    pub fn list_context<'a>(&self, list: &'a List, leave_url: &'a str) -> message::rewrite::ListContext<'a> {
        message::rewrite::ListContext {
            local: &list.addr.local,
            domain: &list.addr.domain,
            display: &list.display,
            hide_from: list.hide_from,
            leave_url,
        }
    }
}
