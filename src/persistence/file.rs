use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use super::{JournalRecord, Persistence};
use crate::error::PersistenceError;

/// Journal stored as one JSON record per line.
///
/// Appends are synced before they return. A final line cut short by a
/// crash is ignored on load; any other unreadable line fails the load.
#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    write: Mutex<()>,
}

impl FileJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut path: OsString = self.path.as_os_str().to_os_string();
        path.push(".tmp");
        PathBuf::from(path)
    }

    fn ensure_parent(&self) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io(e))?;
            }
        }
        Ok(())
    }
}

fn encode(records: &[JournalRecord]) -> Result<Vec<u8>, PersistenceError> {
    let mut buffer = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buffer, record)
            .map_err(|e| PersistenceError::Encode(e.to_string()))?;
        buffer.push(b'\n');
    }
    Ok(buffer)
}

impl Persistence for FileJournal {
    fn append(&self, records: &[JournalRecord]) -> Result<(), PersistenceError> {
        let buffer = encode(records)?;
        let _guard = self.write.lock().map_err(|_| PersistenceError::Poisoned)?;
        self.ensure_parent()?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io(e))?;
        file.write_all(&buffer).map_err(|e| self.io(e))?;
        file.sync_data().map_err(|e| self.io(e))?;
        Ok(())
    }

    fn load(&self) -> Result<Vec<JournalRecord>, PersistenceError> {
        let _guard = self.write.lock().map_err(|_| PersistenceError::Poisoned)?;
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io(e)),
        };

        let complete = content.ends_with('\n');
        let lines: Vec<&str> = content.lines().collect();
        let mut records = Vec::with_capacity(lines.len());
        for (index, line) in lines.iter().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<JournalRecord>(trimmed) {
                Ok(record) => records.push(record),
                Err(e) if !complete && index + 1 == lines.len() => {
                    warn!(path = %self.path.display(), line = index + 1, error = %e, "ignoring torn journal tail");
                }
                Err(e) => {
                    return Err(PersistenceError::Corrupt {
                        line: index + 1,
                        message: e.to_string(),
                    })
                }
            }
        }
        debug!(path = %self.path.display(), records = records.len(), "journal loaded");
        Ok(records)
    }

    fn rewrite(&self, records: &[JournalRecord]) -> Result<(), PersistenceError> {
        let buffer = encode(records)?;
        let _guard = self.write.lock().map_err(|_| PersistenceError::Poisoned)?;
        self.ensure_parent()?;

        let tmp_path = self.tmp_path();
        let written = (|| -> std::io::Result<()> {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            writer.write_all(&buffer)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
            Ok(())
        })();
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(self.io(e));
        }

        fs::rename(&tmp_path, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            self.io(e)
        })
    }
}
