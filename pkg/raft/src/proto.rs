//! Wire and on-disk message types for the consensus log, modeled closely on
//! the original Raft paper plus the small set of extensions LogCabin also
//! layers on top of it (the `last_log_index` hint on a rejected
//! `AppendEntries`, in particular).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Uniquely identifies a server. Assigned once at bootstrap/add-server time
/// and never reused.
pub type ServerId = u64;

pub type Term = u64;

pub type LogIndex = u64;

/// Persistent information describing the state of the current server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
	/// Latest term seen by this server (starts at 0).
	pub current_term: Term,

	/// The id of the server that we have voted for in the current term.
	pub voted_for: Option<ServerId>,

	/// Index of the last log entry safely replicated on a majority of
	/// servers and at the same point committed in the same term.
	pub commit_index: LogIndex,
}

impl Default for Metadata {
	fn default() -> Self {
		Metadata { current_term: 0, voted_for: None, commit_index: 0 }
	}
}

/// A configuration at a single log index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationSnapshot {
	/// Index of the last log entry applied to this configuration.
	pub last_applied: LogIndex,
	pub data: Configuration,
}

impl Default for ConfigurationSnapshot {
	fn default() -> Self {
		ConfigurationSnapshot { last_applied: 0, data: Configuration::default() }
	}
}

pub struct ConfigurationSnapshotRef<'a> {
	pub last_applied: LogIndex,
	pub data: &'a Configuration,
}

/// The set of servers participating in the cluster. Voting members count
/// towards majorities; learners receive entries but are never counted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Configuration {
	pub members: HashSet<ServerId>,
	pub learners: HashSet<ServerId>,
}

impl Configuration {
	pub fn apply(&mut self, change: &ConfigChange) {
		match change {
			ConfigChange::AddLearner(s) => {
				if self.members.contains(s) {
					panic!("can not change an existing member into a learner");
				}
				self.learners.insert(*s);
			}
			ConfigChange::AddMember(s) => {
				self.learners.remove(s);
				self.members.insert(*s);
			}
			ConfigChange::RemoveServer(s) => {
				self.learners.remove(s);
				self.members.remove(s);
			}
		}
	}

	pub fn iter(&self) -> impl Iterator<Item = &ServerId> {
		self.members.iter().chain(self.learners.iter())
	}
}

/// A change to the cluster configuration (one server at a time). If a
/// change references a server already having some role, it is invalid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConfigChange {
	AddMember(ServerId),
	AddLearner(ServerId),
	RemoveServer(ServerId),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogEntryData {
	/// Occupies a log index without any effect on the state machine. Used
	/// by a new leader to commit an entry from a previous term.
	Noop,
	Config(ConfigChange),
	/// Opaque payload handed to the state machine on apply — this is where
	/// an encoded `Command` lives.
	Command(Vec<u8>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
	pub index: LogIndex,
	pub term: Term,
	pub data: LogEntryData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogPosition {
	pub term: Term,
	pub index: LogIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
	pub term: Term,
	pub leader_id: ServerId,
	pub prev_log_index: LogIndex,
	pub prev_log_term: Term,
	pub entries: Vec<LogEntry>,
	pub leader_commit: LogIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
	pub term: Term,
	pub success: bool,
	/// Hint to the leader of how far its own log actually extends on this
	/// follower, to speed up backtracking after a mismatch.
	pub last_log_index: Option<LogIndex>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteRequest {
	pub term: Term,
	pub candidate_id: ServerId,
	pub last_log_index: LogIndex,
	pub last_log_term: Term,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteResponse {
	pub term: Term,
	pub vote_granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutNow;

/// Sent instead of `AppendEntries` when a peer's `next_index` has fallen
/// behind `first_index()` — the entries it still needs have already been
/// compacted out of the log, so the only way to catch it up is to ship the
/// state machine's own snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotRequest {
	pub term: Term,
	pub leader_id: ServerId,
	pub last_included_index: LogIndex,
	pub last_included_term: Term,
	pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotResponse {
	pub term: Term,
}

#[derive(Debug, Clone)]
pub enum MessageBody {
	RequestVote(RequestVoteRequest),
	AppendEntries(AppendEntriesRequest, LogIndex),
	/// Carries only the metadata of the snapshot to install — `node.rs`
	/// fetches the actual bytes from the state machine before putting an
	/// `InstallSnapshotRequest` on the wire, since `ConsensusModule` itself
	/// never touches the state machine.
	InstallSnapshot { last_included_index: LogIndex, last_included_term: Term },
}

#[derive(Debug, Clone)]
pub struct Message {
	pub to: Vec<ServerId>,
	pub body: MessageBody,
}

/// Envelope actually placed on the wire between two peers (request/response
/// pairing is handled by the RPC transport, not this type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcRequest {
	RequestVote(RequestVoteRequest),
	AppendEntries(AppendEntriesRequest),
	InstallSnapshot(InstallSnapshotRequest),
	TimeoutNow(TimeoutNow),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcResponse {
	RequestVote(RequestVoteResponse),
	AppendEntries(AppendEntriesResponse),
	InstallSnapshot(InstallSnapshotResponse),
	TimeoutNow,
	Error(String),
}
