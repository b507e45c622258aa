//! Tracks the currently active cluster configuration as log entries are
//! applied, including the single-change-at-a-time discipline the consensus
//! module relies on (a new config change may not be proposed while a
//! previous one is still uncommitted).

use crate::proto::{Configuration, ConfigurationSnapshot, ConfigurationSnapshotRef, LogEntry, LogEntryData, LogIndex};

struct PendingChange {
	last_change: LogIndex,
	previous_value: Configuration,
}

pub struct ConfigurationStateMachine {
	pub value: Configuration,
	pub last_applied: LogIndex,
	pending: Option<PendingChange>,
}

impl From<ConfigurationSnapshot> for ConfigurationStateMachine {
	fn from(snap: ConfigurationSnapshot) -> Self {
		ConfigurationStateMachine {
			value: snap.data,
			last_applied: snap.last_applied,
			pending: None,
		}
	}
}

impl ConfigurationStateMachine {
	pub fn snapshot(&self) -> ConfigurationSnapshotRef<'_> {
		ConfigurationSnapshotRef { last_applied: self.last_applied, data: &self.value }
	}

	/// Index of the in-flight change a new config proposal must wait on, if
	/// any.
	pub fn pending_index(&self) -> Option<LogIndex> {
		self.pending.as_ref().map(|p| p.last_change)
	}

	/// Applies a single log entry's effect on the configuration. Called for
	/// every entry (not just `Config` ones) so that `last_applied` always
	/// tracks the log.
	pub fn apply(&mut self, entry: &LogEntry, commit_index: LogIndex) {
		self.last_applied = entry.index;

		if let LogEntryData::Config(change) = &entry.data {
			let previous_value = self.value.clone();
			self.value.apply(change);

			if entry.index > commit_index {
				self.pending = Some(PendingChange { last_change: entry.index, previous_value });
			} else {
				self.pending = None;
			}
		}
	}

	/// Marks any pending change up to `commit_index` as resolved.
	pub fn commit(&mut self, commit_index: LogIndex) -> bool {
		if let Some(p) = &self.pending {
			if p.last_change <= commit_index {
				self.pending = None;
				return true;
			}
		}
		false
	}

	/// Fast-forwards `last_applied` to `index` without replaying anything —
	/// used after an `InstallSnapshot` discards the log entries up to
	/// `index`, so there is nothing left for `apply` to be called with.
	pub fn skip_to(&mut self, index: LogIndex) {
		if index > self.last_applied {
			self.last_applied = index;
		}
		self.pending = None;
	}

	/// Rolls the configuration back to what it was before a pending change
	/// that is being truncated out of the log at or after `index`.
	pub fn revert(&mut self, index: LogIndex) {
		if let Some(p) = self.pending.take() {
			if p.last_change >= index {
				self.value = p.previous_value;
			} else {
				self.pending = Some(p);
			}
		}
	}
}
