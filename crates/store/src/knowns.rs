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

use message::addr::Addr;
use rusqlite::{params, OptionalExtension};

use crate::{Error, List, ListStore, Result};

impl ListStore {
    pub fn knowns(&self, list: &List) -> Result<Vec<Addr>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT address FROM known WHERE list_id = ?1 ORDER BY address")?;
        let rows = stmt.query_map(params![list.id], |row| row.get::<_, String>(0))?;
        let mut addrs = Vec::new();
        for row in rows {
            let spec = row?;
            addrs.push(Addr::from_spec(&spec).unwrap_or_else(|| Addr::new(spec, String::new())));
        }
        Ok(addrs)
    }

    pub fn is_known(&self, list: &List, addr: &Addr) -> Result<bool> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT 1 FROM known WHERE list_id = ?1 AND address = ?2",
            params![list.id, addr.addr_spec()],
            |_| Ok(()),
        )
        .optional()
        .map(|row| row.is_some())
        .map_err(Error::from)
    }

    /// Adds known senders in a single transaction, skipping the list's own
    /// address and addresses already present. Returns the addresses added.
    pub fn add_knowns(&self, list: &List, addrs: &[Addr]) -> Result<Vec<Addr>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut added = Vec::new();
        {
            let mut stmt =
                tx.prepare("INSERT OR IGNORE INTO known (list_id, address) VALUES (?1, ?2)")?;
            for addr in addrs {
                if *addr == list.addr {
                    continue;
                }
                if stmt.execute(params![list.id, addr.addr_spec()])? > 0 {
                    added.push(addr.clone());
                }
            }
        }
        tx.commit()?;
        Ok(added)
    }

    pub fn remove_knowns(&self, list: &List, addrs: &[Addr]) -> Result<Vec<Addr>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut removed = Vec::new();
        {
            let mut stmt = tx.prepare("DELETE FROM known WHERE list_id = ?1 AND address = ?2")?;
            for addr in addrs {
                if stmt.execute(params![list.id, addr.addr_spec()])? > 0 {
                    removed.push(addr.clone());
                }
            }
        }
        tx.commit()?;
        Ok(removed)
    }
}
