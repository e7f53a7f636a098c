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
    fs,
    io::Write,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use rand::Rng;

use crate::{Error, List, Result};

/// Moderation queue. Held messages are stored as `.eml` files in a per-list
/// directory; filenames start with a nanosecond timestamp so a descending
/// sort yields newest first.
pub struct Spool {
    dir: PathBuf,
}

impl Spool {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Spool { dir })
    }

    pub fn storage_folder(&self, list: &List) -> PathBuf {
        self.dir.join(list.storage_key())
    }

    /// Writes the message to a temporary name and renames it into place, so
    /// a crash never leaves a partial `.eml` behind.
    pub fn put(&self, list: &List, message: &[u8]) -> Result<String> {
        let folder = self.storage_folder(list);
        fs::create_dir_all(&folder)?;

        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos());
        let filename = format!("{ts}_{:08x}.eml", rand::thread_rng().gen::<u32>());

        let tmp_path = folder.join(format!("{filename}.tmp"));
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(message)?;
        file.sync_all()?;
        fs::rename(&tmp_path, folder.join(&filename))?;
        Ok(filename)
    }

    /// Held messages, newest first.
    pub fn list(&self, list: &List) -> Result<Vec<String>> {
        let folder = self.storage_folder(list);
        let mut filenames = Vec::new();
        let entries = match fs::read_dir(&folder) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(filenames),
            Err(err) => return Err(err.into()),
        };
        for entry in entries {
            let name = entry?.file_name();
            if let Some(name) = name.to_str() {
                if is_valid_filename(name) {
                    filenames.push(name.to_string());
                }
            }
        }
        filenames.sort_unstable_by(|a, b| b.cmp(a));
        Ok(filenames)
    }

    pub fn read(&self, list: &List, filename: &str) -> Result<Vec<u8>> {
        self.checked_path(list, filename)
            .and_then(|path| fs::read(path).map_err(Error::from))
    }

    pub fn delete(&self, list: &List, filename: &str) -> Result<()> {
        self.checked_path(list, filename)
            .and_then(|path| fs::remove_file(path).map_err(Error::from))
    }

    fn checked_path(&self, list: &List, filename: &str) -> Result<PathBuf> {
        if is_valid_filename(filename) {
            Ok(self.storage_folder(list).join(filename))
        } else {
            Err(Error::InvalidFilename(filename.to_string()))
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.dir
    }
}

/// Spool filenames are restricted to a safe character set and must carry
/// the `.eml` extension; anything else is rejected to keep path traversal
/// out of moderator-supplied names.
fn is_valid_filename(name: &str) -> bool {
    name.len() > ".eml".len()
        && name.ends_with(".eml")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}
