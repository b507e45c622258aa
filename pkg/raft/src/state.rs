use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use crate::proto::{LogIndex, ServerId};

pub enum ServerState {
	Follower(ServerFollowerState),
	Candidate(ServerCandidateState),
	Leader(ServerLeaderState),
}

pub struct ServerFollowerState {
	pub election_timeout: Duration,
	pub last_leader_id: Option<ServerId>,
	pub last_heartbeat: Instant,
}

pub struct ServerCandidateState {
	pub election_start: Instant,
	pub election_timeout: Duration,
	pub votes_received: HashSet<ServerId>,
	pub some_rejected: bool,
}

pub struct ServerLeaderState {
	pub servers: HashMap<ServerId, ServerProgress>,
}

/// Tracks replication progress for a single follower, from the leader's
/// point of view.
pub struct ServerProgress {
	pub next_index: LogIndex,
	pub match_index: LogIndex,
	pub request_pending: bool,
	pub last_sent: Option<Instant>,
}

impl ServerProgress {
	pub fn new(last_log_index: LogIndex) -> Self {
		ServerProgress {
			next_index: last_log_index + 1,
			match_index: 0,
			request_pending: false,
			last_sent: None,
		}
	}
}
