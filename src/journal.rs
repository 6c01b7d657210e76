//! Append-only record of group moves, kept in the output root so a later
//! reconciliation can tell which groups were only partly moved.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const JOURNAL_FILE_NAME: &str = ".burstsort-journal.jsonl";

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("Journal IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Could not serialize journal record: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MoveStatus {
    Started,
    Completed,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JournalRecord {
    pub timestamp: String,
    pub folder: String,
    pub status: MoveStatus,
    /// Planned file names when started, moved file names when completed.
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MoveJournal {
    path: PathBuf,
}

impl MoveJournal {
    pub fn in_dir(output_root: &Path) -> Self {
        Self {
            path: output_root.join(JOURNAL_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &JournalRecord) -> Result<(), JournalError> {
        let line = serde_json::to_string(record)?;
        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| self.io_error(source))?;
        writeln!(out, "{}", line).map_err(|source| self.io_error(source))?;
        out.sync_data().map_err(|source| self.io_error(source))
    }

    /// All readable records; a missing journal reads as empty.
    pub fn read(&self) -> Result<Vec<JournalRecord>, JournalError> {
        let f = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(self.io_error(source)),
        };
        let mut records = Vec::new();
        for (i, line) in BufReader::new(f).lines().enumerate() {
            let line = line.map_err(|source| self.io_error(source))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalRecord>(&line) {
                Ok(rec) => records.push(rec),
                Err(err) => log::warn!("⚠️  Skipping malformed journal entry {}: {}", i, err),
            }
        }
        Ok(records)
    }

    /// Folders whose last record is a start without a matching completion.
    pub fn interrupted(&self) -> Result<Vec<JournalRecord>, JournalError> {
        let mut open: Vec<JournalRecord> = Vec::new();
        for record in self.read()? {
            open.retain(|r| r.folder != record.folder);
            if record.status == MoveStatus::Started {
                open.push(record);
            }
        }
        Ok(open)
    }

    pub fn clear(&self) -> Result<(), JournalError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(self.io_error(source)),
        }
    }

    /// Journal the start of moving `planned` into `folder`.
    pub fn begin<'j>(
        &'j self,
        folder: &str,
        planned: Vec<String>,
    ) -> Result<GroupMove<'j>, JournalError> {
        self.append(&JournalRecord {
            timestamp: Utc::now().to_rfc3339(),
            folder: folder.to_string(),
            status: MoveStatus::Started,
            files: planned,
            failed: Vec::new(),
        })?;
        Ok(GroupMove {
            journal: self,
            folder: folder.to_string(),
            moved: Vec::new(),
            failed: Vec::new(),
        })
    }

    fn io_error(&self, source: io::Error) -> JournalError {
        JournalError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// One group's move in progress. Only [`GroupMove::finish`] writes the
/// completion record, so a crash leaves the group marked as started.
#[derive(Debug)]
pub struct GroupMove<'j> {
    journal: &'j MoveJournal,
    folder: String,
    moved: Vec<String>,
    failed: Vec<String>,
}

impl GroupMove<'_> {
    pub fn record_moved(&mut self, name: impl Into<String>) {
        self.moved.push(name.into());
    }

    pub fn record_failed(&mut self, name: impl Into<String>) {
        self.failed.push(name.into());
    }

    pub fn finish(self) -> Result<(), JournalError> {
        if !self.failed.is_empty() {
            log::warn!(
                "{}: {} moved, {} failed",
                self.folder,
                self.moved.len(),
                self.failed.len()
            );
        }
        self.journal.append(&JournalRecord {
            timestamp: Utc::now().to_rfc3339(),
            folder: self.folder,
            status: MoveStatus::Completed,
            files: self.moved,
            failed: self.failed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_journal_reads_empty() {
        let temp_dir = TempDir::new().unwrap();
        let journal = MoveJournal::in_dir(temp_dir.path());
        assert!(journal.read().unwrap().is_empty());
        assert!(journal.interrupted().unwrap().is_empty());
        assert!(journal.clear().is_ok());
    }

    #[test]
    fn test_finished_group_is_not_interrupted() {
        let temp_dir = TempDir::new().unwrap();
        let journal = MoveJournal::in_dir(temp_dir.path());

        let mut op = journal
            .begin("group_1", vec!["a.jpg".into(), "b.jpg".into()])
            .unwrap();
        op.record_moved("a.jpg");
        op.record_moved("b.jpg");
        op.finish().unwrap();

        let records = journal.read().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].status, MoveStatus::Started);
        assert_eq!(records[1].status, MoveStatus::Completed);
        assert_eq!(records[1].files, vec!["a.jpg", "b.jpg"]);
        assert!(journal.interrupted().unwrap().is_empty());
    }

    #[test]
    fn test_unfinished_group_is_interrupted() {
        let temp_dir = TempDir::new().unwrap();
        let journal = MoveJournal::in_dir(temp_dir.path());

        journal.begin("group_1", vec!["a.jpg".into()]).unwrap().finish().unwrap();
        let op = journal.begin("group_2", vec!["c.jpg".into()]).unwrap();
        drop(op);

        let open = journal.interrupted().unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].folder, "group_2");
        assert_eq!(open[0].files, vec!["c.jpg"]);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let journal = MoveJournal::in_dir(temp_dir.path());
        journal.begin("group_1", Vec::new()).unwrap();
        fs::write(
            journal.path(),
            format!("{}\nnot json\n", fs::read_to_string(journal.path()).unwrap().trim_end()),
        )
        .unwrap();

        assert_eq!(journal.read().unwrap().len(), 1);
    }

    #[test]
    fn test_clear_removes_file() {
        let temp_dir = TempDir::new().unwrap();
        let journal = MoveJournal::in_dir(temp_dir.path());
        journal.begin("group_1", Vec::new()).unwrap();
        assert!(journal.path().exists());
        journal.clear().unwrap();
        assert!(!journal.path().exists());
    }
}
