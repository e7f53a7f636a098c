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

use std::{path::Path, time::Duration};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::{Error, Result};

/// Password hash storage consumed by the SQL authenticator.
pub struct UserStore {
    conn: Mutex<Connection>,
}

#[derive(Debug, Clone)]
pub struct UserSecret {
    pub scheme: String,
    pub hash: Vec<u8>,
}

impl UserStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        conn.busy_timeout(Duration::from_secs(10))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                name TEXT PRIMARY KEY,
                scheme TEXT NOT NULL,
                hash BLOB NOT NULL
            );",
        )?;
        Ok(UserStore {
            conn: Mutex::new(conn),
        })
    }

    pub fn get(&self, name: &str) -> Result<Option<UserSecret>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT scheme, hash FROM users WHERE name = ?1",
            params![name],
            |row| {
                Ok(UserSecret {
                    scheme: row.get(0)?,
                    hash: row.get(1)?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    pub fn set(&self, name: &str, scheme: &str, hash: &[u8]) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (name, scheme, hash) VALUES (?1, ?2, ?3) \
             ON CONFLICT(name) DO UPDATE SET scheme = ?2, hash = ?3",
            params![name, scheme, hash],
        )?;
        Ok(())
    }
}
