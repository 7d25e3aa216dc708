//! Append-only JSON Lines journal.
//!
//! One line per mutation, written and flushed before the mutation is applied
//! in memory:
//! - Each line is a complete JSON object
//! - A torn last line only loses that mutation
//! - Files rotate daily (`journal_YYYY-MM-DD.jsonl`) and are opened in append mode
//! - [`Journal::checkpoint`] replaces every file with one holding current state

use crate::error::StoreResult;
use chrono::{DateTime, Utc};
use scout_core::{ChangeEvent, PositionSnapshot, RankingMetric, Trader, TraderId};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const FILE_PREFIX: &str = "journal_";
const FILE_SUFFIX: &str = ".jsonl";

/// A single journaled mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalRecord {
    TraderRegistered {
        trader: Trader,
    },
    ActivityChanged {
        trader: TraderId,
        active: bool,
    },
    /// Snapshot, events and the refresh timestamp in one line.
    RefreshCommitted {
        snapshot: PositionSnapshot,
        events: Vec<ChangeEvent>,
        at: DateTime<Utc>,
    },
    MetricUpserted {
        metric: RankingMetric,
    },
    /// Full state of one trader, written by a checkpoint. Replaces whatever
    /// was known about the trader before.
    TraderRestored {
        trader: Trader,
        refresh_seq: u64,
        snapshots: Vec<PositionSnapshot>,
        events: Vec<ChangeEvent>,
    },
}

/// Active writer state for the daily file.
struct ActiveWriter {
    writer: BufWriter<File>,
    date: String,
    records_written: usize,
}

/// Daily-rotated journal writer.
pub struct Journal {
    base_dir: PathBuf,
    active_writer: Option<ActiveWriter>,
}

impl Journal {
    /// Open a journal directory, feeding every record already in it to
    /// `apply`, oldest file first. Returns the journal and the record count.
    pub fn open(
        base_dir: impl AsRef<Path>,
        apply: impl FnMut(JournalRecord),
    ) -> StoreResult<(Self, usize)> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;

        let records = Self::replay(&base_dir, apply)?;
        info!(dir = %base_dir.display(), records, "Journal opened");

        Ok((
            Self {
                base_dir,
                active_writer: None,
            },
            records,
        ))
    }

    fn journal_files(base_dir: &Path) -> StoreResult<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(base_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(FILE_PREFIX) && n.ends_with(FILE_SUFFIX))
            })
            .collect();
        // Date-stamped names sort chronologically.
        files.sort();
        Ok(files)
    }

    fn replay(base_dir: &Path, mut apply: impl FnMut(JournalRecord)) -> StoreResult<usize> {
        let mut records = 0;

        for path in Self::journal_files(base_dir)? {
            let reader = BufReader::new(File::open(&path)?);
            for (line_no, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<JournalRecord>(&line) {
                    Ok(record) => {
                        apply(record);
                        records += 1;
                    }
                    Err(e) => {
                        warn!(
                            file = %path.display(),
                            line = line_no + 1,
                            error = %e,
                            "Skipping unreadable journal line"
                        );
                    }
                }
            }
        }

        Ok(records)
    }

    fn close_active_writer(&mut self) {
        if let Some(mut active) = self.active_writer.take() {
            if let Err(e) = active.writer.flush() {
                warn!(?e, "Failed to flush journal on close");
            }
            info!(
                date = %active.date,
                records = active.records_written,
                "Closed journal file"
            );
        }
    }

    fn file_for(&self, date: &str) -> PathBuf {
        self.base_dir
            .join(format!("{FILE_PREFIX}{date}{FILE_SUFFIX}"))
    }

    fn create_new_writer(&mut self, date: &str) -> StoreResult<()> {
        let path = self.file_for(date);
        debug!(path = %path.display(), "Opening journal file (append mode)");

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        self.active_writer = Some(ActiveWriter {
            writer: BufWriter::new(file),
            date: date.to_string(),
            records_written: 0,
        });
        Ok(())
    }

    /// Append one record and flush it to the OS.
    pub fn append(&mut self, record: &JournalRecord) -> StoreResult<()> {
        let line = serde_json::to_string(record)?;
        let today = Utc::now().format("%Y-%m-%d").to_string();

        if self
            .active_writer
            .as_ref()
            .is_some_and(|w| w.date != today)
        {
            self.close_active_writer();
        }

        if self.active_writer.is_none() {
            self.create_new_writer(&today)?;
        }
        let Some(active) = self.active_writer.as_mut() else {
            return Ok(());
        };

        writeln!(active.writer, "{line}")?;
        active.writer.flush()?;
        active.records_written += 1;
        Ok(())
    }
}

impl Journal {
    /// Replace the whole journal with `records`.
    ///
    /// The records are written to a temporary file, synced and renamed over
    /// today's file; older files are removed afterwards. A crash before the
    /// rename leaves the journal untouched, and a crash after it leaves older
    /// files whose records the checkpoint supersedes on replay.
    pub fn checkpoint(
        &mut self,
        records: impl IntoIterator<Item = JournalRecord>,
    ) -> StoreResult<usize> {
        self.close_active_writer();

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let target = self.file_for(&today);
        let tmp = target.with_extension("jsonl.tmp");

        let mut written = 0;
        {
            let file = File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            for record in records {
                writeln!(writer, "{}", serde_json::to_string(&record)?)?;
                written += 1;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        std::fs::rename(&tmp, &target)?;

        let mut removed = 0;
        for path in Self::journal_files(&self.base_dir)? {
            if path != target {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }

        info!(
            dir = %self.base_dir.display(),
            records = written,
            removed_files = removed,
            "Journal checkpointed"
        );
        Ok(written)
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        self.close_active_writer();
    }
}
