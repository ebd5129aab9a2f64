use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::casting::commit::{CastingStore, CommitOutcome, CommitRecord};
use crate::casting::types::{CategoryId, PlayerId, RoleId, RoundKey};
use crate::error::StoreError;

/// One line of a committed round file. The first line has kind `round` and
/// carries the metadata; every other line has kind `cast`.
#[derive(Debug, Serialize, Deserialize)]
struct StoredRow {
    kind: String,
    category: String,
    player_id: Option<String>,
    role_id: Option<String>,
    rank: Option<u32>,
    committed_by: Option<String>,
    committed_at: Option<DateTime<Utc>>,
    revision: Option<u64>,
}

const ROUND_ROW: &str = "round";
const CAST_ROW: &str = "cast";

/// Committed rounds as `casting_<category>.csv` files in one directory.
///
/// Writes go to a temp file in the same directory which is then renamed over
/// the target, so readers see either the old file or the complete new one.
#[derive(Debug, Clone)]
pub struct CsvStore {
    dir: PathBuf,
}

impl CsvStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding `round`. Characters unsafe in file names become `_`.
    pub fn path_for(&self, round: &RoundKey) -> PathBuf {
        let safe: String = round
            .category
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("casting_{}.csv", safe))
    }

    fn write_rows(&self, outcome: &CommitOutcome) -> Result<NamedTempFile, StoreError> {
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        {
            let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
            let category = outcome.round.category.to_string();
            writer.serialize(StoredRow {
                kind: ROUND_ROW.to_string(),
                category: category.clone(),
                player_id: None,
                role_id: None,
                rank: None,
                committed_by: Some(outcome.committed_by.clone()),
                committed_at: Some(outcome.committed_at),
                revision: Some(outcome.revision),
            })?;
            for record in &outcome.records {
                writer.serialize(StoredRow {
                    kind: CAST_ROW.to_string(),
                    category: category.clone(),
                    player_id: Some(record.player.to_string()),
                    role_id: Some(record.role.to_string()),
                    rank: record.rank,
                    committed_by: None,
                    committed_at: None,
                    revision: None,
                })?;
            }
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        Ok(tmp)
    }
}

impl CastingStore for CsvStore {
    fn is_committed(&self, round: &RoundKey) -> Result<bool, StoreError> {
        Ok(self.path_for(round).exists())
    }

    fn persist(&mut self, outcome: &CommitOutcome) -> Result<(), StoreError> {
        let target = self.path_for(&outcome.round);
        // a failed write drops the temp file and leaves `target` as it was
        let tmp = self.write_rows(outcome)?;
        tmp.persist_noclobber(&target).map_err(|e| match e.error.kind() {
            io::ErrorKind::AlreadyExists => StoreError::AlreadyStored(outcome.round.clone()),
            _ => StoreError::Io(e.error),
        })?;
        tracing::info!(path = %target.display(), records = outcome.records.len(), "round written");
        Ok(())
    }

    fn load(&self, round: &RoundKey) -> Result<Option<CommitOutcome>, StoreError> {
        let path = self.path_for(round);
        if !path.exists() {
            return Ok(None);
        }

        let mut reader = csv::Reader::from_path(&path)?;
        let mut rows = reader.deserialize::<StoredRow>();

        let header = rows
            .next()
            .ok_or_else(|| StoreError::Corrupt(format!("{} is empty", path.display())))??;
        if header.kind != ROUND_ROW {
            return Err(StoreError::Corrupt(format!(
                "{} does not start with a round row",
                path.display()
            )));
        }
        if CategoryId::from(header.category.as_str()) != round.category {
            return Err(StoreError::Corrupt(format!(
                "{} holds category '{}', expected '{}'",
                path.display(),
                header.category,
                round.category
            )));
        }

        let mut records = Vec::new();
        for row in rows {
            let row = row?;
            if row.kind != CAST_ROW {
                return Err(StoreError::Corrupt(format!("unexpected row kind '{}'", row.kind)));
            }
            let (Some(player), Some(role)) = (row.player_id, row.role_id) else {
                return Err(StoreError::Corrupt("cast row without player or role".to_string()));
            };
            records.push(CommitRecord {
                player: PlayerId::from(player),
                role: RoleId::from(role),
                rank: row.rank,
            });
        }

        Ok(Some(CommitOutcome {
            round: round.clone(),
            records,
            committed_by: header.committed_by.unwrap_or_default(),
            committed_at: header
                .committed_at
                .ok_or_else(|| StoreError::Corrupt("round row without timestamp".to_string()))?,
            revision: header.revision.unwrap_or(0),
        }))
    }

    fn reset(&mut self, round: &RoundKey) -> Result<bool, StoreError> {
        let path = self.path_for(round);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        tracing::warn!(round = %round, "committed round reset");
        Ok(true)
    }
}
