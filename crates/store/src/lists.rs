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

use message::addr::{Addr, BOUNCE_SUFFIX};
use rand::RngCore;
use rusqlite::{
    params,
    types::{FromSql, FromSqlError, FromSqlResult, ValueRef},
    OptionalExtension, Row,
};

use crate::{Error, ListStore, Result};

pub const HMAC_KEY_LEN: usize = 32;

/// Per-class moderation action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListAction {
    Pass,
    Mod,
    Reject,
}

impl ListAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListAction::Pass => "pass",
            ListAction::Mod => "mod",
            ListAction::Reject => "reject",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pass" => Ok(ListAction::Pass),
            "mod" => Ok(ListAction::Mod),
            "reject" => Ok(ListAction::Reject),
            _ => Err(Error::InvalidAction(value.to_string())),
        }
    }
}

impl FromSql for ListAction {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        ListAction::parse(value.as_str()?)
            .map_err(|err| FromSqlError::Other(Box::new(err)))
    }
}

/// A value snapshot of a list row. Mutations go through
/// [`ListStore::update_list`], which refreshes the snapshot as well.
#[derive(Debug, Clone)]
pub struct List {
    pub id: i64,
    pub addr: Addr,
    pub display: String,
    pub hmac_key: Vec<u8>,
    pub public_signup: bool,
    pub hide_from: bool,
    pub action_mod: ListAction,
    pub action_member: ListAction,
    pub action_known: ListAction,
    pub action_unknown: ListAction,
}

impl List {
    pub fn addr_spec(&self) -> String {
        self.addr.addr_spec()
    }

    /// Reverse-path used on all outbound copies.
    pub fn bounce_spec(&self) -> String {
        format!("{}{}@{}", self.addr.local, BOUNCE_SUFFIX, self.addr.domain)
    }

    /// Filesystem-safe key derived from the addr-spec, used for the spool
    /// directory of this list.
    pub fn storage_key(&self) -> String {
        form_urlencoded::byte_serialize(self.addr_spec().as_bytes()).collect()
    }

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<List> {
        Ok(List {
            id: row.get(0)?,
            addr: Addr::new(row.get::<_, String>(1)?, row.get::<_, String>(2)?),
            display: row.get(3)?,
            hmac_key: row.get(4)?,
            public_signup: row.get(5)?,
            hide_from: row.get(6)?,
            action_mod: row.get(7)?,
            action_member: row.get(8)?,
            action_known: row.get(9)?,
            action_unknown: row.get(10)?,
        })
    }
}

const LIST_COLUMNS: &str = "id, local, domain, display, hmac_key, public_signup, hide_from, \
     action_mod, action_member, action_known, action_unknown";

impl ListStore {
    /// Creates a list with the default action set (moderators, members and
    /// knowns pass, unknown senders are moderated) and a fresh HMAC key.
    pub fn create_list(&self, addr: &Addr, display: &str) -> Result<List> {
        if addr.local.ends_with(BOUNCE_SUFFIX) {
            return Err(Error::ReservedAddress(addr.addr_spec()));
        }

        let mut hmac_key = vec![0u8; HMAC_KEY_LEN];
        rand::thread_rng().fill_bytes(&mut hmac_key);
        if hmac_key.iter().all(|&b| b == 0) {
            return Err(Error::WeakKey);
        }

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO list (local, domain, display, hmac_key) VALUES (?1, ?2, ?3, ?4)",
            params![addr.local, addr.domain, display, hmac_key],
        )?;

        Ok(List {
            id: conn.last_insert_rowid(),
            addr: Addr::new(addr.local.clone(), addr.domain.clone()),
            display: display.to_string(),
            hmac_key,
            public_signup: false,
            hide_from: false,
            action_mod: ListAction::Pass,
            action_member: ListAction::Pass,
            action_known: ListAction::Pass,
            action_unknown: ListAction::Mod,
        })
    }

    /// Returns `Ok(None)` when no such list exists, which is distinct from
    /// a database error.
    pub fn get_list(&self, addr: &Addr) -> Result<Option<List>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("SELECT {LIST_COLUMNS} FROM list WHERE local = ?1 AND domain = ?2"),
            params![addr.local, addr.domain],
            List::from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    pub fn is_list(&self, addr: &Addr) -> Result<bool> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT 1 FROM list WHERE local = ?1 AND domain = ?2",
            params![addr.local, addr.domain],
            |_| Ok(()),
        )
        .optional()
        .map(|row| row.is_some())
        .map_err(Error::from)
    }

    pub fn all_lists(&self) -> Result<Vec<List>> {
        self.query_lists(&format!(
            "SELECT {LIST_COLUMNS} FROM list ORDER BY domain, local"
        ))
    }

    pub fn public_lists(&self) -> Result<Vec<List>> {
        self.query_lists(&format!(
            "SELECT {LIST_COLUMNS} FROM list WHERE public_signup = 1 ORDER BY domain, local"
        ))
    }

    fn query_lists(&self, query: &str) -> Result<Vec<List>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(query)?;
        let rows = stmt.query_map([], List::from_row)?;
        let mut lists = Vec::new();
        for row in rows {
            lists.push(row?);
        }
        Ok(lists)
    }

    /// Replaces the list's settings and action quadruple, updating both the
    /// database row and the caller's snapshot.
    #[allow(clippy::too_many_arguments)]
    pub fn update_list(
        &self,
        list: &mut List,
        display: &str,
        public_signup: bool,
        hide_from: bool,
        action_mod: ListAction,
        action_member: ListAction,
        action_known: ListAction,
        action_unknown: ListAction,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE list SET display = ?1, public_signup = ?2, hide_from = ?3, \
             action_mod = ?4, action_member = ?5, action_known = ?6, action_unknown = ?7 \
             WHERE id = ?8",
            params![
                display,
                public_signup,
                hide_from,
                action_mod.as_str(),
                action_member.as_str(),
                action_known.as_str(),
                action_unknown.as_str(),
                list.id
            ],
        )?;

        list.display = display.to_string();
        list.public_signup = public_signup;
        list.hide_from = hide_from;
        list.action_mod = action_mod;
        list.action_member = action_member;
        list.action_known = action_known;
        list.action_unknown = action_unknown;
        Ok(())
    }

    /// Removes members and knowns first, then the list row, in a single
    /// transaction.
    pub fn delete_list(&self, list: List) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM member WHERE list_id = ?1", params![list.id])?;
        tx.execute("DELETE FROM known WHERE list_id = ?1", params![list.id])?;
        tx.execute("DELETE FROM list WHERE id = ?1", params![list.id])?;
        tx.commit()?;
        Ok(())
    }
}
