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
use rusqlite::{params, OptionalExtension, Row};

use crate::{Error, List, ListStore, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemberFlags {
    pub receive: bool,
    pub moderate: bool,
    pub notify: bool,
    pub admin: bool,
    pub bounces: bool,
}

#[derive(Debug, Clone)]
pub struct Membership {
    pub addr: Addr,
    pub receive: bool,
    pub moderate: bool,
    pub notify: bool,
    pub admin: bool,
    pub bounces: bool,
}

impl Membership {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Membership> {
        Ok(Membership {
            addr: addr_from_column(row.get::<_, String>(0)?),
            receive: row.get(1)?,
            moderate: row.get(2)?,
            notify: row.get(3)?,
            admin: row.get(4)?,
            bounces: row.get(5)?,
        })
    }
}

fn addr_from_column(spec: String) -> Addr {
    Addr::from_spec(&spec).unwrap_or_else(|| Addr::new(spec, String::new()))
}

const MEMBER_COLUMNS: &str = "address, receive, moderate, notify, admin, bounces";

impl ListStore {
    pub fn get_membership(&self, list: &List, addr: &Addr) -> Result<Option<Membership>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {MEMBER_COLUMNS} FROM member WHERE list_id = ?1 AND address = ?2"),
            params![list.id, addr.addr_spec()],
            Membership::from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    pub fn is_member(&self, list: &List, addr: &Addr) -> Result<bool> {
        Ok(self.get_membership(list, addr)?.is_some())
    }

    pub fn members(&self, list: &List) -> Result<Vec<Membership>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MEMBER_COLUMNS} FROM member WHERE list_id = ?1 ORDER BY address"
        ))?;
        let rows = stmt.query_map(params![list.id], Membership::from_row)?;
        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    pub fn admins(&self, list: &List) -> Result<Vec<Addr>> {
        self.flagged_addresses(list, "admin")
    }

    pub fn notifieds(&self, list: &List) -> Result<Vec<Addr>> {
        self.flagged_addresses(list, "notify")
    }

    pub fn receivers(&self, list: &List) -> Result<Vec<Addr>> {
        self.flagged_addresses(list, "receive")
    }

    pub fn bounce_receivers(&self, list: &List) -> Result<Vec<Addr>> {
        self.flagged_addresses(list, "bounces")
    }

    fn flagged_addresses(&self, list: &List, flag: &str) -> Result<Vec<Addr>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT address FROM member WHERE list_id = ?1 AND {flag} = 1 ORDER BY address"
        ))?;
        let rows = stmt.query_map(params![list.id], |row| row.get::<_, String>(0))?;
        let mut addrs = Vec::new();
        for row in rows {
            addrs.push(addr_from_column(row?));
        }
        Ok(addrs)
    }

    /// All memberships of an address, across lists, ordered by list.
    pub fn memberships(&self, addr: &Addr) -> Result<Vec<(List, Membership)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT l.id, l.local, l.domain, l.display, l.hmac_key, l.public_signup, \
             l.hide_from, l.action_mod, l.action_member, l.action_known, l.action_unknown, \
             m.address, m.receive, m.moderate, m.notify, m.admin, m.bounces \
             FROM member m JOIN list l ON l.id = m.list_id \
             WHERE m.address = ?1 ORDER BY l.domain, l.local",
        )?;
        let rows = stmt.query_map(params![addr.addr_spec()], |row| {
            Ok((
                List::from_row(row)?,
                Membership {
                    addr: addr_from_column(row.get::<_, String>(11)?),
                    receive: row.get(12)?,
                    moderate: row.get(13)?,
                    notify: row.get(14)?,
                    admin: row.get(15)?,
                    bounces: row.get(16)?,
                },
            ))
        })?;
        let mut memberships = Vec::new();
        for row in rows {
            memberships.push(row?);
        }
        Ok(memberships)
    }

    /// Adds the given addresses in a single transaction. Addresses that are
    /// already members and the list's own address are skipped. The GDPR log
    /// is written and synced before the transaction commits; a log failure
    /// rolls the whole batch back. Returns the addresses actually added.
    pub fn add_members(
        &self,
        list: &List,
        addrs: &[Addr],
        flags: MemberFlags,
        reason: &str,
    ) -> Result<Vec<Addr>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut added = Vec::new();
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO member (list_id, address, receive, moderate, notify, admin, bounces) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for addr in addrs {
                if *addr == list.addr {
                    continue;
                }
                if stmt.execute(params![
                    list.id,
                    addr.addr_spec(),
                    flags.receive,
                    flags.moderate,
                    flags.notify,
                    flags.admin,
                    flags.bounces
                ])? > 0
                {
                    added.push(addr.clone());
                }
            }
        }
        if !added.is_empty() {
            self.gdpr.log_joins(&added, &list.addr_spec(), reason)?;
        }
        tx.commit()?;
        Ok(added)
    }

    /// Removes the given addresses in a single transaction, logging each
    /// removal. Non-members are skipped. Returns the addresses actually
    /// removed.
    pub fn remove_members(&self, list: &List, addrs: &[Addr], reason: &str) -> Result<Vec<Addr>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut removed = Vec::new();
        {
            let mut stmt = tx.prepare("DELETE FROM member WHERE list_id = ?1 AND address = ?2")?;
            for addr in addrs {
                if stmt.execute(params![list.id, addr.addr_spec()])? > 0 {
                    removed.push(addr.clone());
                }
            }
        }
        if !removed.is_empty() {
            self.gdpr.log_leaves(&removed, &list.addr_spec(), reason)?;
        }
        tx.commit()?;
        Ok(removed)
    }

    pub fn update_member(&self, list: &List, addr: &Addr, flags: MemberFlags) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE member SET receive = ?1, moderate = ?2, notify = ?3, admin = ?4, bounces = ?5 \
             WHERE list_id = ?6 AND address = ?7",
            params![
                flags.receive,
                flags.moderate,
                flags.notify,
                flags.admin,
                flags.bounces,
                list.id,
                addr.addr_spec()
            ],
        )?;
        Ok(())
    }
}
