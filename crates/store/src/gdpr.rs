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

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use message::addr::Addr;
use parking_lot::Mutex;

use crate::Result;

/// Append-only audit log of membership changes. One line per affected
/// address; writes are synced to disk before the enclosing repository
/// transaction commits.
pub struct GdprLog {
    file: Mutex<File>,
}

impl GdprLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(GdprLog {
            file: Mutex::new(OpenOptions::new().create(true).append(true).open(path)?),
        })
    }

    pub fn log_joins(&self, addrs: &[Addr], list_spec: &str, reason: &str) -> Result<()> {
        self.append(addrs, list_spec, "joined", reason)
    }

    pub fn log_leaves(&self, addrs: &[Addr], list_spec: &str, reason: &str) -> Result<()> {
        self.append(addrs, list_spec, "left", reason)
    }

    fn append(&self, addrs: &[Addr], list_spec: &str, event: &str, reason: &str) -> Result<()> {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        let mut record = String::new();
        for addr in addrs {
            record.push_str(&format!(
                "{ts} {} {event} the list {list_spec}, reason: {reason}\n",
                addr.addr_spec()
            ));
        }

        let mut file = self.file.lock();
        file.write_all(record.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }
}
