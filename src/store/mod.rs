//! Append-only JSONL log of discovered links
//!
//! The log is the only durable state of the collector. Each line is one
//! [`LinkRecord`]; lines are never rewritten or removed. At startup the log is
//! replayed once to rebuild the set of known URLs, which decides what counts as
//! new from then on.
//!
//! A crashed run can leave a partially written final line behind. Replay drops
//! that line (and only that line) by truncating the file at its start, so the
//! next append begins on a clean line. The store assumes a single writer; running
//! two collectors against the same log is not supported.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::StoreError;
use crate::models::LinkRecord;

pub struct DedupeStore {
    path: PathBuf,
    file: File,
    known: HashSet<String>,
    /// Length of the log up to its last complete record
    len: u64,
    /// Set when a failed write could not be rolled back
    poisoned: bool,
    #[cfg(test)]
    fail_next_write: bool,
}

impl DedupeStore {
    /// Open (or create) the log at `path` and rebuild the known URL set
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(io_err)?;

        let mut contents = Vec::new();
        file.read_to_end(&mut contents).map_err(io_err)?;

        let replay = replay_log(&contents);

        if replay.skipped_lines > 0 {
            warn!(
                "Skipped {} malformed line(s) while replaying {}",
                replay.skipped_lines,
                path.display()
            );
        }

        if replay.valid_len < contents.len() as u64 {
            warn!(
                "Discarding truncated trailing record in {} ({} bytes)",
                path.display(),
                contents.len() as u64 - replay.valid_len
            );
            file.set_len(replay.valid_len).map_err(io_err)?;
        }

        if replay.needs_terminator {
            file.write_all(b"\n").map_err(io_err)?;
        }

        if replay.valid_len < contents.len() as u64 || replay.needs_terminator {
            file.sync_data().map_err(io_err)?;
        }

        info!(
            "Loaded {} known links from {}",
            replay.known.len(),
            path.display()
        );

        let len = file.metadata().map_err(io_err)?.len();

        Ok(Self {
            path,
            file,
            known: replay.known,
            len,
            poisoned: false,
            #[cfg(test)]
            fail_next_write: false,
        })
    }

    /// Persist every record whose URL is not known yet.
    ///
    /// Records are handled in input order. Returns the records actually appended,
    /// each with `new_href` set. A failed write is cut back off the log and leaves
    /// the set unchanged for that record; the error is returned and the caller
    /// must stop. If the cut fails too, every later call is refused.
    pub fn propose<I>(&mut self, records: I) -> Result<Vec<LinkRecord>, StoreError>
    where
        I: IntoIterator<Item = LinkRecord>,
    {
        if self.poisoned {
            return Err(StoreError::Poisoned {
                path: self.path.clone(),
            });
        }

        let mut appended = Vec::new();

        for mut record in records {
            if record.url.is_empty() || self.known.contains(&record.url) {
                continue;
            }

            record.new_href = true;
            let mut line = serde_json::to_string(&record)?;
            line.push('\n');

            if let Err(source) = self.write_line(line.as_bytes()) {
                self.roll_back();
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
            self.len += line.len() as u64;

            debug!("Stored new link {}", record.url);
            self.known.insert(record.url.clone());
            appended.push(record);
        }

        if !appended.is_empty() {
            self.file.sync_data().map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;
        }

        Ok(appended)
    }

    pub fn contains(&self, url: &str) -> bool {
        self.known.contains(url)
    }

    pub fn total_known(&self) -> usize {
        self.known.len()
    }

    fn write_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        #[cfg(test)]
        if std::mem::take(&mut self.fail_next_write) {
            self.file.write_all(&line[..line.len() / 2])?;
            return Err(std::io::Error::other("injected write failure"));
        }
        self.file.write_all(line)
    }

    /// Drop a partially written line so the next append starts clean
    fn roll_back(&mut self) {
        let restored = self
            .file
            .set_len(self.len)
            .and_then(|()| self.file.sync_data());
        if let Err(e) = restored {
            error!(
                "Could not cut {} back to {} bytes, refusing further writes: {}",
                self.path.display(),
                self.len,
                e
            );
            self.poisoned = true;
        }
    }

    /// Make the next record write fail half-way through its line
    #[cfg(test)]
    pub(crate) fn fail_next_write(&mut self) {
        self.fail_next_write = true;
    }
}

struct Replay {
    known: HashSet<String>,
    /// Byte length of the log once a broken trailing line is dropped
    valid_len: u64,
    /// Last line is complete JSON but lacks its newline
    needs_terminator: bool,
    skipped_lines: usize,
}

fn replay_log(contents: &[u8]) -> Replay {
    let mut known = HashSet::new();
    let mut skipped_lines = 0;
    let mut valid_len = contents.len() as u64;
    let mut needs_terminator = false;

    let last_content_line = contents
        .split(|b| *b == b'\n')
        .enumerate()
        .filter(|(_, line)| !line.iter().all(u8::is_ascii_whitespace))
        .map(|(idx, _)| idx)
        .last();

    let mut offset = 0usize;
    for (idx, line) in contents.split(|b| *b == b'\n').enumerate() {
        let start = offset;
        offset += line.len() + 1;

        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let is_last = Some(idx) == last_content_line;
        match serde_json::from_slice::<Value>(line) {
            Ok(row) => {
                if let Some(url) = row
                    .get("url")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|url| !url.is_empty())
                {
                    known.insert(url.to_string());
                }
                if is_last && offset > contents.len() {
                    needs_terminator = true;
                }
            }
            Err(_) if is_last => {
                valid_len = start as u64;
            }
            Err(_) => skipped_lines += 1,
        }
    }

    Replay {
        known,
        valid_len,
        needs_terminator,
        skipped_lines,
    }
}
