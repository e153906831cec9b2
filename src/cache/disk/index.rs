//! Append-only journal of disk cache entries.
//!
//! Every insert, access and removal appends one JSON line to `index.jsonl`.
//! Replaying the journal at startup restores each entry's size and recency;
//! compaction rewrites it as one `insert` per live entry, oldest first.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

pub(crate) const INDEX_FILE_NAME: &str = "index.jsonl";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub(crate) enum JournalRecord {
    Insert {
        key: String,
        file: String,
        size: u64,
        accessed: u64,
    },
    Touch {
        key: String,
        accessed: u64,
    },
    Remove {
        key: String,
    },
}

/// Index state of one committed payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IndexEntry {
    /// Payload file name, relative to the cache directory
    pub file: String,
    pub size: u64,
    /// Logical access clock; larger is more recent
    pub accessed: u64,
}

/// Result of replaying a journal.
#[derive(Debug, Default)]
pub(crate) struct Replay {
    /// Live entries, least recently used first
    pub entries: Vec<(String, IndexEntry)>,
    pub records: usize,
    pub skipped: usize,
}

fn apply(entries: &mut HashMap<String, IndexEntry>, record: JournalRecord) {
    match record {
        JournalRecord::Insert {
            key,
            file,
            size,
            accessed,
        } => {
            entries.insert(
                key,
                IndexEntry {
                    file,
                    size,
                    accessed,
                },
            );
        }
        JournalRecord::Touch { key, accessed } => {
            if let Some(entry) = entries.get_mut(&key) {
                entry.accessed = entry.accessed.max(accessed);
            }
        }
        JournalRecord::Remove { key } => {
            entries.remove(&key);
        }
    }
}

/// Read the journal in `dir`. A missing journal is an empty index; lines that
/// fail to parse are skipped.
pub(crate) fn replay(dir: &Path) -> io::Result<Replay> {
    let path = dir.join(INDEX_FILE_NAME);
    let file = match File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Replay::default()),
        Err(e) => return Err(e),
    };

    let mut entries = HashMap::new();
    let mut replay = Replay::default();
    // Raw lines: a torn write can end inside a multi-byte character
    for (number, line) in BufReader::new(file).split(b'\n').enumerate() {
        let line = line?;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<JournalRecord>(&line) {
            Ok(record) => {
                apply(&mut entries, record);
                replay.records += 1;
            }
            Err(e) => {
                // A torn final write after a crash looks like this
                warn!(line = number + 1, error = %e, "Skipping unreadable cache index record");
                replay.skipped += 1;
            }
        }
    }

    let mut ordered: Vec<_> = entries.into_iter().collect();
    ordered.sort_by(|(a_key, a), (b_key, b)| {
        a.accessed
            .cmp(&b.accessed)
            .then_with(|| a_key.cmp(b_key))
    });
    replay.entries = ordered;
    Ok(replay)
}

/// Open handle on the journal, appending one line per record.
#[derive(Debug)]
pub(crate) struct Journal {
    path: PathBuf,
    file: File,
    records: usize,
}

impl Journal {
    /// Rewrite the journal in `dir` to exactly `entries` (oldest first) and
    /// open it for appending.
    pub(crate) fn create<'a>(
        dir: &Path,
        entries: impl Iterator<Item = (&'a String, &'a IndexEntry)>,
    ) -> io::Result<Self> {
        let path = dir.join(INDEX_FILE_NAME);
        let records = write_compacted(&path, entries)?;
        let file = OpenOptions::new().append(true).open(&path)?;
        Ok(Self {
            path,
            file,
            records,
        })
    }

    pub(crate) fn append(&mut self, record: &JournalRecord) -> io::Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.records += 1;
        Ok(())
    }

    /// Replace the journal with one `insert` per entry.
    pub(crate) fn compact<'a>(
        &mut self,
        entries: impl Iterator<Item = (&'a String, &'a IndexEntry)>,
    ) -> io::Result<()> {
        self.records = write_compacted(&self.path, entries)?;
        self.file = OpenOptions::new().append(true).open(&self.path)?;
        Ok(())
    }

    pub(crate) fn records(&self) -> usize {
        self.records
    }
}

/// Write `entries` to a sibling tmp file, sync it and rename it over `path`.
fn write_compacted<'a>(
    path: &Path,
    entries: impl Iterator<Item = (&'a String, &'a IndexEntry)>,
) -> io::Result<usize> {
    let tmp_path = path.with_extension("jsonl.tmp");
    let mut buffer = Vec::new();
    let mut records = 0;
    for (key, entry) in entries {
        let record = JournalRecord::Insert {
            key: key.clone(),
            file: entry.file.clone(),
            size: entry.size,
            accessed: entry.accessed,
        };
        serde_json::to_writer(&mut buffer, &record)?;
        buffer.push(b'\n');
        records += 1;
    }

    let mut file = File::create(&tmp_path)?;
    file.write_all(&buffer)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&tmp_path, path)?;
    Ok(records)
}
