//! Append-only journal backing the disk cache index.
//!
//! Each line records one operation:
//!
//! ```text
//! imgcache.journal
//! 1
//!
//! DIRTY 3400330d1dfc7f3f7f4b8d4d803dfcf6
//! CLEAN 3400330d1dfc7f3f7f4b8d4d803dfcf6 8123
//! READ 3400330d1dfc7f3f7f4b8d4d803dfcf6
//! REMOVE 3400330d1dfc7f3f7f4b8d4d803dfcf6
//! ```
//!
//! Replaying the journal rebuilds the access order and sizes. A DIRTY line
//! with no later CLEAN or REMOVE marks a write that never finished.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use lru::LruCache;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, warn};

use crate::domain::entities::CacheKey;
use crate::domain::errors::{CacheError, CacheResult};

pub const JOURNAL_FILE: &str = "journal";
const JOURNAL_TMP_FILE: &str = "journal.tmp";
const MAGIC: &str = "imgcache.journal";
const VERSION: &str = "1";

/// One journal line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Dirty(CacheKey),
    Clean(CacheKey, u64),
    Read(CacheKey),
    Remove(CacheKey),
}

impl Record {
    fn to_line(&self) -> String {
        match self {
            Self::Dirty(key) => format!("DIRTY {key}\n"),
            Self::Clean(key, size) => format!("CLEAN {key} {size}\n"),
            Self::Read(key) => format!("READ {key}\n"),
            Self::Remove(key) => format!("REMOVE {key}\n"),
        }
    }

    fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split(' ');
        let op = parts.next()?;
        let key = CacheKey::new(parts.next()?);
        if !key.is_valid_file_stem() {
            return None;
        }
        let record = match op {
            "DIRTY" => Self::Dirty(key),
            "CLEAN" => Self::Clean(key, parts.next()?.parse().ok()?),
            "READ" => Self::Read(key),
            "REMOVE" => Self::Remove(key),
            _ => return None,
        };
        parts.next().is_none().then_some(record)
    }
}

/// State rebuilt from a journal.
pub struct Replay {
    /// Committed entries, least recently used first when iterated in reverse.
    pub entries: LruCache<CacheKey, u64>,
    /// Keys whose last write never committed or aborted.
    pub dangling: HashSet<CacheKey>,
}

/// Replays the journal in `dir`.
///
/// Returns `Ok(None)` if there is no journal yet and an error if its header
/// does not belong to this cache format.
pub async fn replay(dir: &Path) -> CacheResult<Option<Replay>> {
    let path = dir.join(JOURNAL_FILE);
    let file = match fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CacheError::io("Failed to open journal", &e)),
    };

    let mut lines = BufReader::new(file).lines();
    let mut header = Vec::with_capacity(3);
    for _ in 0..3 {
        let line = lines
            .next_line()
            .await
            .map_err(|e| CacheError::io("Failed to read journal header", &e))?;
        header.push(line.unwrap_or_default());
    }
    if header[0] != MAGIC || header[1] != VERSION || !header[2].is_empty() {
        return Err(CacheError::IoError(format!(
            "Unexpected journal header: {header:?}"
        )));
    }

    let mut replay = Replay {
        entries: LruCache::unbounded(),
        dangling: HashSet::new(),
    };

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Journal read failed mid-way, keeping records so far");
                break;
            }
        };
        let Some(record) = Record::parse(&line) else {
            warn!(line = %line, "Unreadable journal line, dropping the rest");
            break;
        };
        match record {
            Record::Dirty(key) => {
                replay.dangling.insert(key);
            }
            Record::Clean(key, size) => {
                replay.dangling.remove(&key);
                replay.entries.put(key, size);
            }
            Record::Read(key) => {
                let _ = replay.entries.get(&key);
            }
            Record::Remove(key) => {
                replay.dangling.remove(&key);
                replay.entries.pop(&key);
            }
        }
    }

    debug!(
        entries = replay.entries.len(),
        dangling = replay.dangling.len(),
        "Replayed disk cache journal"
    );
    Ok(Some(replay))
}

/// Buffered appender for journal records.
pub struct JournalWriter {
    file: BufWriter<fs::File>,
}

impl JournalWriter {
    /// Writes a compact journal describing `entries` and `in_flight`, then
    /// atomically replaces the live journal with it.
    pub async fn rewrite<'a>(
        dir: &Path,
        entries: impl Iterator<Item = (&'a CacheKey, &'a u64)>,
        in_flight: impl Iterator<Item = &'a CacheKey>,
    ) -> CacheResult<Self> {
        let tmp_path = dir.join(JOURNAL_TMP_FILE);
        let path = dir.join(JOURNAL_FILE);

        let tmp = fs::File::create(&tmp_path)
            .await
            .map_err(|e| CacheError::io("Failed to create journal", &e))?;
        let mut out = BufWriter::new(tmp);

        let mut body = format!("{MAGIC}\n{VERSION}\n\n");
        for key in in_flight {
            body.push_str(&Record::Dirty(key.clone()).to_line());
        }
        for (key, size) in entries {
            body.push_str(&Record::Clean(key.clone(), *size).to_line());
        }

        out.write_all(body.as_bytes())
            .await
            .map_err(|e| CacheError::io("Failed to write journal", &e))?;
        out.flush()
            .await
            .map_err(|e| CacheError::io("Failed to flush journal", &e))?;
        out.get_ref()
            .sync_all()
            .await
            .map_err(|e| CacheError::io("Failed to sync journal", &e))?;
        drop(out);

        fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| CacheError::io("Failed to replace journal", &e))?;

        Self::open_append(path).await
    }

    async fn open_append(path: PathBuf) -> CacheResult<Self> {
        let file = fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .await
            .map_err(|e| CacheError::io("Failed to open journal for append", &e))?;
        Ok(Self {
            file: BufWriter::new(file),
        })
    }

    /// Appends a record. Not durable until [`flush`](Self::flush).
    pub async fn append(&mut self, record: &Record) -> CacheResult<()> {
        self.file
            .write_all(record.to_line().as_bytes())
            .await
            .map_err(|e| CacheError::io("Failed to append to journal", &e))
    }

    /// Pushes buffered records to disk and syncs them.
    pub async fn flush(&mut self) -> CacheResult<()> {
        self.file
            .flush()
            .await
            .map_err(|e| CacheError::io("Failed to flush journal", &e))?;
        self.file
            .get_ref()
            .sync_data()
            .await
            .map_err(|e| CacheError::io("Failed to sync journal", &e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(s: &str) -> CacheKey {
        CacheKey::new(s)
    }

    #[test]
    fn test_record_parse() {
        assert_eq!(Record::parse("DIRTY abc"), Some(Record::Dirty(key("abc"))));
        assert_eq!(
            Record::parse("CLEAN abc 42"),
            Some(Record::Clean(key("abc"), 42))
        );
        assert_eq!(Record::parse("CLEAN abc"), None);
        assert_eq!(Record::parse("CLEAN abc 42 extra"), None);
        assert_eq!(Record::parse("READ ../x"), None);
        assert_eq!(Record::parse("BOGUS abc"), None);
        assert_eq!(Record::parse(""), None);
    }

    #[tokio::test]
    async fn test_missing_journal_replays_as_none() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        assert!(replay(dir.path()).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_replay_rebuilds_order_and_dangling() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let mut writer =
            JournalWriter::rewrite(dir.path(), std::iter::empty(), std::iter::empty()).await?;

        for record in [
            Record::Dirty(key("a")),
            Record::Clean(key("a"), 10),
            Record::Dirty(key("b")),
            Record::Clean(key("b"), 20),
            Record::Dirty(key("c")),
            Record::Clean(key("c"), 30),
            Record::Read(key("a")),
            Record::Remove(key("c")),
            Record::Dirty(key("d")),
        ] {
            writer.append(&record).await?;
        }
        writer.flush().await?;

        let replayed = replay(dir.path()).await?.expect("journal exists");
        let order: Vec<_> = replayed
            .entries
            .iter()
            .rev()
            .map(|(k, v)| (k.as_str().to_string(), *v))
            .collect();
        assert_eq!(order, vec![("b".to_string(), 20), ("a".to_string(), 10)]);
        assert!(replayed.dangling.contains(&key("d")));
        assert_eq!(replayed.dangling.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_torn_tail_keeps_prefix() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let body = format!("{MAGIC}\n{VERSION}\n\nCLEAN a 5\nCLEAN b 6\nCLE");
        fs::write(dir.path().join(JOURNAL_FILE), body).await?;

        let replayed = replay(dir.path()).await?.expect("journal exists");
        assert_eq!(replayed.entries.len(), 2);
        assert!(replayed.entries.contains(&key("b")));
        Ok(())
    }

    #[tokio::test]
    async fn test_bad_header_is_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        fs::write(dir.path().join(JOURNAL_FILE), "libcore.io.DiskLruCache\n1\n\n").await?;
        assert!(replay(dir.path()).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_rewrite_compacts() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let mut entries = LruCache::unbounded();
        entries.put(key("old"), 1u64);
        entries.put(key("new"), 2u64);
        let in_flight = [key("pending")];

        let _writer =
            JournalWriter::rewrite(dir.path(), entries.iter().rev(), in_flight.iter()).await?;
        let text = fs::read_to_string(dir.path().join(JOURNAL_FILE)).await?;
        assert_eq!(
            text,
            format!("{MAGIC}\n{VERSION}\n\nDIRTY pending\nCLEAN old 1\nCLEAN new 2\n")
        );
        Ok(())
    }
}
