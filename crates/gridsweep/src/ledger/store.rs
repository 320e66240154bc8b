use std::{
    fs::{self, File},
    io::{BufRead, BufWriter, Write},
    path::{Path, PathBuf},
};

use ahash::AHashSet;
use tempfile::NamedTempFile;
use tracing::{debug, trace, warn};

use super::{LedgerError, Result, open_append, open_existing};
use crate::aggregate::Entity;

/// Persistence for discovered entities: the append-only identifier file plus one
/// write-once JSON detail record per entity.
#[derive(Debug)]
pub struct EntityStore {
    ids_path: PathBuf,
    ids_file: File,
    details_dir: PathBuf,
}

impl EntityStore {
    pub fn open(ids_path: impl AsRef<Path>, details_dir: impl AsRef<Path>) -> Result<Self> {
        let ids_path = ids_path.as_ref().to_path_buf();
        let details_dir = details_dir.as_ref().to_path_buf();
        fs::create_dir_all(&details_dir).map_err(LedgerError::io(&details_dir))?;
        Ok(Self {
            ids_file: open_append(&ids_path)?,
            ids_path,
            details_dir,
        })
    }

    /// Every identifier recorded so far. A missing file is an empty set.
    pub fn load_ids(ids_path: impl AsRef<Path>) -> Result<AHashSet<String>> {
        let ids_path = ids_path.as_ref();
        let Some(reader) = open_existing(ids_path)? else {
            return Ok(AHashSet::new());
        };
        let mut ids = AHashSet::new();
        for line in reader.lines() {
            let line = line.map_err(LedgerError::io(ids_path))?;
            let id = line.trim();
            if !id.is_empty() {
                ids.insert(id.to_string());
            }
        }
        Ok(ids)
    }

    pub fn ids_path(&self) -> &Path {
        &self.ids_path
    }

    pub fn details_dir(&self) -> &Path {
        &self.details_dir
    }

    pub fn detail_path(&self, entity_id: &str) -> PathBuf {
        self.details_dir.join(format!("{}.json", file_stem(entity_id)))
    }

    /// Append one identifier line.
    pub fn save_id(&mut self, entity_id: &str) -> Result<()> {
        writeln!(self.ids_file, "{entity_id}")
            .and_then(|()| self.ids_file.flush())
            .map_err(LedgerError::io(&self.ids_path))
    }

    /// Write the detail record unless a readable one already exists. Returns whether
    /// a file was written.
    ///
    /// Records are written to a temporary file in the details directory and renamed
    /// into place, so a crash never leaves a partial record under the final name. A
    /// record that does not parse (left by an older, interrupted writer) is replaced.
    pub fn save_detail(&self, entity: &Entity) -> Result<bool> {
        let path = self.detail_path(&entity.entity_id);
        match detail_state(&path) {
            DetailState::Valid => {
                trace!(id = %entity.entity_id, "Detail record already present");
                return Ok(false);
            }
            DetailState::Corrupt => {
                warn!(id = %entity.entity_id, path = ?path, "Replacing unreadable detail record");
            }
            DetailState::Missing => {}
        }

        let mut temp =
            NamedTempFile::new_in(&self.details_dir).map_err(LedgerError::io(&self.details_dir))?;
        let temp_path = temp.path().to_path_buf();
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, entity)?;
            writer.flush().map_err(LedgerError::io(&temp_path))?;
        }
        temp.as_file()
            .sync_all()
            .map_err(LedgerError::io(&temp_path))?;
        temp.persist(&path)
            .map_err(|e| LedgerError::io(&path)(e.error))?;
        Ok(true)
    }

    /// Persist a batch of entities. Detail records are written for every entity not
    /// yet on disk; identifiers new to `known_entity_ids` are appended and added to
    /// it. Returns how many identifiers were new.
    pub fn persist(
        &mut self,
        entities: &[Entity],
        known_entity_ids: &mut AHashSet<String>,
    ) -> Result<usize> {
        let mut new_ids = 0;
        for entity in entities {
            self.save_detail(entity)?;
            if !known_entity_ids.contains(&entity.entity_id) {
                self.save_id(&entity.entity_id)?;
                known_entity_ids.insert(entity.entity_id.clone());
                new_ids += 1;
            }
        }
        if new_ids > 0 {
            debug!(new_ids, total = known_entity_ids.len(), "Persisted entities");
        }
        Ok(new_ids)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DetailState {
    Missing,
    Valid,
    Corrupt,
}

fn detail_state(path: &Path) -> DetailState {
    match fs::read(path) {
        Ok(bytes) if serde_json::from_slice::<serde_json::Value>(&bytes).is_ok() => {
            DetailState::Valid
        }
        Ok(_) => DetailState::Corrupt,
        Err(_) => DetailState::Missing,
    }
}

/// Identifiers are used as file names; anything outside `[A-Za-z0-9_-]` is replaced.
fn file_stem(entity_id: &str) -> String {
    entity_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
