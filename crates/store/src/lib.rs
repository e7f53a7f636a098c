/*
 * Copyright (c) 2023 Stalwart Labs Ltd.
 *
 * This file is part of the Stalwart Mailing List Server.
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

pub mod gdpr;
pub mod knowns;
pub mod lists;
pub mod members;
pub mod spool;
pub mod users;

use std::{path::Path, time::Duration};

use gdpr::GdprLog;
use parking_lot::Mutex;
use rusqlite::Connection;

pub use lists::{List, ListAction};
pub use members::{MemberFlags, Membership};

#[derive(Debug)]
pub enum Error {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
    ReservedAddress(String),
    InvalidAction(String),
    InvalidFilename(String),
    WeakKey,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Sqlite(err) => write!(f, "database error: {err}"),
            Error::Io(err) => write!(f, "I/O error: {err}"),
            Error::ReservedAddress(addr) => {
                write!(f, "address {addr:?} uses the reserved bounce suffix")
            }
            Error::InvalidAction(action) => write!(f, "invalid list action {action:?}"),
            Error::InvalidFilename(name) => write!(f, "invalid spool filename {name:?}"),
            Error::WeakKey => write!(f, "generated HMAC key is all zeroes"),
        }
    }
}

impl std::error::Error for Error {}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Sqlite(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

/// SQLite-backed repository for lists, memberships and known senders.
/// The connection is opened once per database file; batch writers run in
/// explicit transactions and GDPR-relevant changes are logged before the
/// transaction commits.
pub struct ListStore {
    pub(crate) conn: Mutex<Connection>,
    pub(crate) gdpr: GdprLog,
}

impl ListStore {
    pub fn open(db_path: impl AsRef<Path>, gdpr_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        // journal_mode is one of the pragmas that answers with a row.
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.busy_timeout(Duration::from_secs(10))?;

        conn.execute_batch(concat!(
            "CREATE TABLE IF NOT EXISTS list (
                id INTEGER PRIMARY KEY,
                local TEXT NOT NULL,
                domain TEXT NOT NULL,
                display TEXT NOT NULL DEFAULT '',
                hmac_key BLOB NOT NULL,
                public_signup INTEGER NOT NULL DEFAULT 0,
                hide_from INTEGER NOT NULL DEFAULT 0,
                action_mod TEXT NOT NULL DEFAULT 'pass',
                action_member TEXT NOT NULL DEFAULT 'pass',
                action_known TEXT NOT NULL DEFAULT 'pass',
                action_unknown TEXT NOT NULL DEFAULT 'mod',
                UNIQUE(local, domain)
            );",
            "CREATE TABLE IF NOT EXISTS member (
                list_id INTEGER NOT NULL,
                address TEXT NOT NULL,
                receive INTEGER NOT NULL DEFAULT 1,
                moderate INTEGER NOT NULL DEFAULT 0,
                notify INTEGER NOT NULL DEFAULT 0,
                admin INTEGER NOT NULL DEFAULT 0,
                bounces INTEGER NOT NULL DEFAULT 0,
                UNIQUE(list_id, address)
            );",
            "CREATE TABLE IF NOT EXISTS known (
                list_id INTEGER NOT NULL,
                address TEXT NOT NULL,
                UNIQUE(list_id, address)
            );"
        ))?;

        tracing::debug!(
            context = "store",
            event = "open",
            "List database is ready."
        );

        Ok(ListStore {
            conn: Mutex::new(conn),
            gdpr: GdprLog::open(gdpr_path)?,
        })
    }
}
