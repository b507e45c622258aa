//! The core Raft state machine: election, log replication and commit
//! tracking. Deliberately free of any I/O — it consumes a `LogStorage` and
//! produces a `Tick` describing the side effects the caller (`server.rs`)
//! must perform (persist metadata, persist config, send messages, wake up
//! again after some duration).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::RngCore;

use crate::config_state::ConfigurationStateMachine;
use crate::constraint::MatchConstraint;
use crate::error::Result;
use crate::log::LogStorage;
use crate::proto::*;
use crate::state::*;

/// At some random point in this range, a follower that has not heard from a
/// leader becomes a candidate.
const ELECTION_TIMEOUT: (u64, u64) = (400, 800);

/// If the leader has not otherwise communicated with a follower within this
/// long, it sends an empty heartbeat.
const HEARTBEAT_TIMEOUT: Duration = Duration::from_millis(150);

pub type Proposal = LogPosition;

pub type ProposeResult = std::result::Result<Proposal, ProposeError>;

#[derive(Debug)]
pub enum ProposeError {
	/// The entry cannot currently be processed and should be retried once
	/// the given proposal has been resolved.
	RetryAfter(Proposal),
	/// This server is not the leader.
	NotLeader { leader_hint: Option<ServerId> },
	/// The caller's timeout elapsed before the entry was applied. The entry
	/// was already submitted and may still commit and apply later; this is
	/// purely an upper bound on how long the caller waited for a reply.
	Timeout,
	/// The node is shutting down; the entry's fate past this point is
	/// unknown to the caller.
	ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalStatus {
	Committed,
	Failed,
	Pending,
	Missing,
	Unavailable,
}

/// All external side effects requested by the consensus module during a
/// single operation.
pub struct Tick {
	pub time: Instant,
	pub meta: bool,
	pub config: bool,
	pub new_entries: bool,
	pub messages: Vec<Message>,
	pub next_tick: Option<Duration>,
}

impl Tick {
	pub fn empty() -> Self {
		Tick {
			time: Instant::now(),
			meta: false,
			config: false,
			new_entries: false,
			messages: vec![],
			next_tick: None,
		}
	}

	pub fn write_meta(&mut self) {
		self.meta = true;
	}

	pub fn write_config(&mut self) {
		self.config = true;
	}

	pub fn send(&mut self, msg: Message) {
		self.messages.push(msg);
	}
}

pub struct ConsensusModule {
	id: ServerId,
	meta: Metadata,
	config: ConfigurationStateMachine,
	log: Arc<dyn LogStorage>,
	state: ServerState,
}

impl ConsensusModule {
	pub fn new(
		id: ServerId,
		mut meta: Metadata,
		config_snapshot: ConfigurationSnapshot,
		log: Arc<dyn LogStorage>,
	) -> ConsensusModule {
		let last_log_term = log.term(log.last_index().unwrap_or(0)).unwrap();
		if last_log_term > meta.current_term {
			meta.current_term = last_log_term;
			meta.voted_for = None;
		}

		if config_snapshot.last_applied > meta.commit_index {
			meta.commit_index = config_snapshot.last_applied;
		}

		if config_snapshot.last_applied + 1 < log.first_index().unwrap_or(1) {
			panic!("config snapshot is from before the start of the log");
		}

		let mut config = ConfigurationStateMachine::from(config_snapshot);

		let last_log_index = log.last_index().unwrap_or(0);
		for i in (config.last_applied + 1)..(last_log_index + 1) {
			let e = log.entry(i).unwrap();
			config.apply(&e, meta.commit_index);
		}

		let state = Self::new_follower(Instant::now());

		ConsensusModule { id, meta, config, log, state }
	}

	pub fn id(&self) -> ServerId {
		self.id
	}

	pub fn meta(&self) -> &Metadata {
		&self.meta
	}

	pub fn config_snapshot(&self) -> ConfigurationSnapshotRef<'_> {
		self.config.snapshot()
	}

	pub fn is_leader(&self) -> bool {
		matches!(self.state, ServerState::Leader(_))
	}

	pub fn role_name(&self) -> &'static str {
		match self.state {
			ServerState::Follower(_) => "follower",
			ServerState::Candidate(_) => "candidate",
			ServerState::Leader(_) => "leader",
		}
	}

	pub fn last_leader_id(&self) -> Option<ServerId> {
		match &self.state {
			ServerState::Follower(s) => s.last_leader_id,
			ServerState::Leader(_) => Some(self.id),
			ServerState::Candidate(_) => None,
		}
	}

	pub fn propose_command(&mut self, data: Vec<u8>, out: &mut Tick) -> ProposeResult {
		self.propose_entry(LogEntryData::Command(data), out)
	}

	pub fn propose_noop(&mut self, out: &mut Tick) -> ProposeResult {
		self.propose_entry(LogEntryData::Noop, out)
	}

	pub fn propose_config(&mut self, change: ConfigChange, out: &mut Tick) -> ProposeResult {
		self.propose_entry(LogEntryData::Config(change), out)
	}

	/// Checks the progress of a previously initiated proposal. Safe to call
	/// on any server, though the status on the leader converges first.
	pub fn proposal_status(&self, prop: &Proposal) -> ProposalStatus {
		let last_log_index = self.log.last_index().unwrap_or(0);
		let last_log_term = self.log.term(last_log_index).unwrap();

		if prop.term > last_log_term || prop.index > last_log_index {
			return ProposalStatus::Missing;
		}

		let cur_term = match self.log.term(prop.index) {
			Some(v) => v,
			None => return ProposalStatus::Unavailable,
		};

		if cur_term > prop.term {
			ProposalStatus::Failed
		} else if cur_term < prop.term {
			if self.meta.commit_index >= prop.index {
				ProposalStatus::Failed
			} else {
				ProposalStatus::Missing
			}
		} else if self.meta.commit_index >= prop.index {
			ProposalStatus::Committed
		} else {
			ProposalStatus::Pending
		}
	}

	pub fn propose_entry(&mut self, data: LogEntryData, out: &mut Tick) -> ProposeResult {
		if let ServerState::Leader(_) = self.state {
			let index = self.log.last_index().unwrap_or(0) + 1;
			let term = self.meta.current_term;
			assert!(term > 0);

			if let LogEntryData::Config(_) = data {
				if let Some(last_change) = self.config.pending_index() {
					return Err(ProposeError::RetryAfter(Proposal {
						index: last_change,
						term: self.log.term(last_change).unwrap(),
					}));
				}
			}

			out.new_entries = true;
			self.log.append(LogEntry { term, index, data });

			{
				let e = self.log.entry(index).unwrap();
				self.config.apply(&e, self.meta.commit_index);
			}

			self.cycle(out);

			Ok(Proposal { term, index })
		} else if let ServerState::Follower(ref s) = self.state {
			Err(ProposeError::NotLeader { leader_hint: s.last_leader_id.or(self.meta.voted_for) })
		} else {
			Err(ProposeError::NotLeader { leader_hint: None })
		}
	}

	/// Re-evaluates the server's current role and produces whatever
	/// messages/timers follow from it. Idempotent and safe to call
	/// repeatedly; the only effects are queued onto `tick`.
	pub fn cycle(&mut self, tick: &mut Tick) {
		if self.config.value.members.is_empty() || !self.config.value.members.contains(&self.id) {
			tick.next_tick = Some(Duration::from_secs(1));
			return;
		}

		enum Summary {
			Follower { elapsed: Duration, election_timeout: Duration },
			Candidate { vote_count: usize, election_start: Instant, election_timeout: Duration },
			Leader { next_commit_index: Option<u64> },
		}

		let summary = match &self.state {
			ServerState::Follower(s) => Summary::Follower {
				elapsed: tick.time.duration_since(s.last_heartbeat),
				election_timeout: s.election_timeout,
			},
			ServerState::Candidate(s) => Summary::Candidate {
				vote_count: 1 + s.votes_received.len(),
				election_start: s.election_start,
				election_timeout: s.election_timeout,
			},
			ServerState::Leader(s) => Summary::Leader { next_commit_index: self.find_next_commit_index(s) },
		};

		match summary {
			Summary::Follower { elapsed, election_timeout } => {
				if !self.can_be_leader() {
					if self.config.value.members.len() == 1 {
						panic!("corrupt log in single-node mode will never allow us to become leader");
					}
					self.state = Self::new_follower(tick.time);
				} else if elapsed >= election_timeout || self.config.value.members.len() == 1 {
					self.start_election(tick);
				} else {
					tick.next_tick = Some(election_timeout - elapsed);
					return;
				}
			}
			Summary::Candidate { vote_count, election_start, election_timeout } => {
				let majority = self.majority_size();

				if vote_count >= majority {
					tracing::info!(term = self.meta.current_term, "became leader");

					let last_log_index = self.log.last_index().unwrap_or(0);
					let servers = self
						.config
						.value
						.iter()
						.filter(|s| **s != self.id)
						.map(|s| (*s, ServerProgress::new(last_log_index)))
						.collect::<HashMap<_, _>>();

					self.state = ServerState::Leader(ServerLeaderState { servers });

					if self.meta.commit_index < last_log_index {
						self.propose_noop(tick).expect("failed to propose self noop as the new leader");
					}

					self.cycle(tick);
					return;
				}

				let elapsed = tick.time.duration_since(election_start);
				if elapsed >= election_timeout {
					self.start_election(tick);
				} else {
					tick.next_tick = Some(election_timeout - elapsed);
					return;
				}
			}
			Summary::Leader { next_commit_index } => {
				if let Some(ci) = next_commit_index {
					self.update_committed(ci, tick);
				}

				let mut next_heartbeat = self.replicate_entries(tick);

				if self.config.value.members.len() + self.config.value.learners.len() == 1 {
					next_heartbeat = Duration::from_secs(2);
				}

				tick.next_tick = Some(next_heartbeat);
				return;
			}
		}
	}

	/// A leader may commit entries before they are locally durable on a
	/// restarted server — such a server cannot safely reclaim leadership
	/// until it resyncs.
	fn can_be_leader(&self) -> bool {
		self.log.last_index().unwrap_or(0) >= self.meta().commit_index
	}

	fn find_next_commit_index(&self, s: &ServerLeaderState) -> Option<LogIndex> {
		let mut ci = self.log.last_index().unwrap_or(0);
		let majority = self.majority_size();

		while ci > self.meta.commit_index {
			let term = self.log.term(ci).unwrap();

			if term < self.meta.current_term {
				break;
			} else if term == self.meta.current_term {
				let mut count = 0;

				if self.log.match_index().unwrap_or(0) >= ci {
					count += 1;
				}

				for (id, e) in s.servers.iter() {
					if !self.config.value.members.contains(id) || *id == self.id {
						continue;
					}
					if e.match_index >= ci {
						count += 1;
					}
				}

				if count >= majority {
					return Some(ci);
				}
			}

			ci -= 1;
		}

		None
	}

	/// Produces requests to replicate or heartbeat all other servers.
	/// Returns the time remaining until the next heartbeat is due.
	fn replicate_entries(&mut self, tick: &mut Tick) -> Duration {
		let state = match &mut self.state {
			ServerState::Leader(s) => s,
			_ => panic!("not the leader"),
		};

		let config = &self.config.value;
		let leader_id = self.id;
		let term = self.meta.current_term;
		let leader_commit = self.meta.commit_index;
		let log = &self.log;
		let last_log_index = log.last_index().unwrap_or(0);
		let first_log_index = log.first_index().unwrap_or(1);

		let new_request = |prev_log_index: LogIndex| -> AppendEntriesRequest {
			let mut entries = vec![];
			for i in (prev_log_index + 1)..(last_log_index + 1) {
				entries.push(log.entry(i).unwrap());
			}

			AppendEntriesRequest {
				term,
				leader_id,
				prev_log_index,
				prev_log_term: log.term(prev_log_index).unwrap(),
				entries,
				leader_commit,
			}
		};

		let mut message_map: HashMap<LogIndex, Message> = HashMap::new();
		let mut since_last_heartbeat = Duration::from_millis(0);

		for server_id in config.iter() {
			if *server_id == leader_id {
				continue;
			}

			let progress = state
				.servers
				.entry(*server_id)
				.or_insert_with(|| ServerProgress::new(last_log_index));

			if progress.request_pending {
				continue;
			}

			if progress.match_index >= last_log_index {
				if let Some(time) = progress.last_sent {
					let elapsed = tick.time.duration_since(time);
					if elapsed < HEARTBEAT_TIMEOUT {
						if elapsed > since_last_heartbeat {
							since_last_heartbeat = elapsed;
						}
						continue;
					}
				}
			}

			progress.request_pending = true;
			progress.last_sent = Some(tick.time);

			let msg_key = progress.next_index - 1;

			// The entries this peer needs starting at `msg_key + 1` have
			// already been compacted out of the log — `new_request` would
			// `.unwrap()` on a missing entry/term. Ship a snapshot instead.
			if msg_key + 1 < first_log_index {
				if let Some((last_included_index, last_included_term)) = log.snapshot_point() {
					tick.send(Message {
						to: vec![*server_id],
						body: MessageBody::InstallSnapshot { last_included_index, last_included_term },
					});
					continue;
				}
			}

			if let Some(msg) = message_map.get_mut(&msg_key) {
				msg.to.push(*server_id);
			} else {
				let req = new_request(msg_key);
				message_map.insert(
					msg_key,
					Message { to: vec![*server_id], body: MessageBody::AppendEntries(req, last_log_index) },
				);
			}
		}

		for (_, msg) in message_map.into_iter() {
			tick.send(msg);
		}

		HEARTBEAT_TIMEOUT.saturating_sub(since_last_heartbeat)
	}

	fn start_election(&mut self, tick: &mut Tick) {
		if !self.can_be_leader() {
			panic!("can not be the leader of this cluster");
		}

		let must_increment = match &self.state {
			ServerState::Candidate(s) => s.some_rejected,
			_ => true,
		};

		if must_increment {
			self.meta.current_term += 1;
			self.meta.voted_for = Some(self.id);
			tick.write_meta();
		}

		tracing::info!(term = self.meta.current_term, "starting election");

		self.state = ServerState::Candidate(ServerCandidateState {
			election_start: tick.time,
			election_timeout: Self::new_election_timeout(),
			votes_received: Default::default(),
			some_rejected: false,
		});

		self.perform_election(tick);
		self.cycle(tick);
	}

	fn perform_election(&self, tick: &mut Tick) {
		let idx = self.log.last_index().unwrap_or(0);
		let last_log_term = self.log.term(idx).unwrap();

		let req = RequestVoteRequest {
			term: self.meta.current_term,
			candidate_id: self.id,
			last_log_index: idx,
			last_log_term,
		};

		let ids = self.config.value.members.iter().copied().filter(|s| *s != self.id).collect::<Vec<_>>();

		if ids.is_empty() {
			return;
		}

		tick.send(Message { to: ids, body: MessageBody::RequestVote(req) });
	}

	fn new_follower(now: Instant) -> ServerState {
		ServerState::Follower(ServerFollowerState {
			election_timeout: Self::new_election_timeout(),
			last_leader_id: None,
			last_heartbeat: now,
		})
	}

	fn become_follower(&mut self, tick: &mut Tick) {
		self.state = Self::new_follower(tick.time);
		self.cycle(tick);
	}

	/// Run whenever a higher term is observed in a remote request/response.
	fn observe_term(&mut self, term: Term, tick: &mut Tick) {
		if term > self.meta.current_term {
			self.meta.current_term = term;
			self.meta.voted_for = None;
			tick.write_meta();
			self.become_follower(tick);
		}
	}

	fn update_committed(&mut self, index: LogIndex, tick: &mut Tick) {
		assert!(index > self.meta.commit_index);
		self.meta.commit_index = index;
		tick.write_meta();

		if self.config.commit(self.meta.commit_index) {
			tick.write_config();
		}
	}

	fn majority_size(&self) -> usize {
		if self.config.value.members.is_empty() {
			return usize::MAX;
		}
		(self.config.value.members.len() / 2) + 1
	}

	pub fn request_vote_callback(&mut self, from_id: ServerId, resp: RequestVoteResponse, tick: &mut Tick) {
		self.observe_term(resp.term, tick);

		if self.meta.current_term != resp.term {
			return;
		}

		if from_id == self.id {
			tracing::warn!("rejected duplicate self vote");
			return;
		}

		let should_cycle = if let ServerState::Candidate(s) = &mut self.state {
			if resp.vote_granted {
				s.votes_received.insert(from_id);
			} else {
				s.some_rejected = true;
			}
			true
		} else {
			false
		};

		if should_cycle {
			self.cycle(tick);
		}
	}

	pub fn append_entries_callback(
		&mut self,
		from_id: ServerId,
		last_index: LogIndex,
		resp: AppendEntriesResponse,
		tick: &mut Tick,
	) {
		self.observe_term(resp.term, tick);

		let mut should_noop = false;

		let should_cycle = if let ServerState::Leader(s) = &mut self.state {
			let progress = match s.servers.get_mut(&from_id) {
				Some(p) => p,
				None => return,
			};

			if resp.success {
				if last_index > progress.match_index {
					progress.match_index = last_index;
					progress.next_index = last_index + 1;
				}

				if let Some(idx) = resp.last_log_index {
					let last_log_index = self.log.last_index().unwrap_or(0);
					let last_log_term = self.log.term(last_log_index).unwrap();
					if idx > last_log_index && last_log_term != self.meta.current_term {
						should_noop = true;
					}
				}
			} else if let Some(idx) = resp.last_log_index {
				progress.next_index = idx + 1;
			} else {
				progress.next_index = progress.next_index.saturating_sub(1).max(1);
			}

			progress.request_pending = false;
			true
		} else {
			false
		};

		if should_noop {
			self.propose_noop(tick).expect("failed to propose noop as leader");
		} else if should_cycle {
			self.cycle(tick);
		}
	}

	pub fn append_entries_noresponse(&mut self, from_id: ServerId, _tick: &mut Tick) {
		if let ServerState::Leader(s) = &mut self.state {
			if let Some(progress) = s.servers.get_mut(&from_id) {
				progress.request_pending = false;
			}
		}
	}

	/// Counterpart to `append_entries_callback` for the snapshot path: a
	/// successful `InstallSnapshot` response means the peer is now caught up
	/// through `last_included_index`, exactly as if it had accepted an
	/// `AppendEntries` up to that point.
	pub fn install_snapshot_callback(
		&mut self,
		from_id: ServerId,
		last_included_index: LogIndex,
		resp: InstallSnapshotResponse,
		tick: &mut Tick,
	) {
		self.observe_term(resp.term, tick);

		let should_cycle = if let ServerState::Leader(s) = &mut self.state {
			if let Some(progress) = s.servers.get_mut(&from_id) {
				if last_included_index > progress.match_index {
					progress.match_index = last_included_index;
					progress.next_index = last_included_index + 1;
				}
				progress.request_pending = false;
			}
			true
		} else {
			false
		};

		if should_cycle {
			self.cycle(tick);
		}
	}

	pub fn install_snapshot_noresponse(&mut self, from_id: ServerId, _tick: &mut Tick) {
		if let ServerState::Leader(s) = &mut self.state {
			if let Some(progress) = s.servers.get_mut(&from_id) {
				progress.request_pending = false;
			}
		}
	}

	fn new_election_timeout() -> Duration {
		let mut rng = rand::thread_rng();
		let time =
			ELECTION_TIMEOUT.0 + ((rng.next_u32() as u64) * (ELECTION_TIMEOUT.1 - ELECTION_TIMEOUT.0)) / (u32::MAX as u64);
		Duration::from_millis(time)
	}

	/// Checks if a `RequestVote` would be granted, without mutating state
	/// (other than adopting a higher observed term).
	pub fn pre_vote(&self, req: &RequestVoteRequest) -> RequestVoteResponse {
		let should_grant = || -> bool {
			if req.term < self.meta.current_term {
				return false;
			}

			let idx = self.log.last_index().unwrap_or(0);
			let last_log_term = self.log.term(idx).unwrap();

			let up_to_date = req.last_log_term > last_log_term
				|| (req.last_log_term == last_log_term && req.last_log_index >= idx);

			if !up_to_date {
				return false;
			}

			if req.term > self.meta.current_term {
				return true;
			}

			match self.meta.voted_for {
				Some(id) => id == req.candidate_id,
				None => true,
			}
		};

		RequestVoteResponse { term: self.meta.current_term, vote_granted: should_grant() }
	}

	pub fn request_vote(&mut self, req: RequestVoteRequest, tick: &mut Tick) -> RequestVoteResponse {
		let candidate_id = req.candidate_id;
		tracing::debug!(candidate_id, "received request_vote");

		self.observe_term(req.term, tick);

		let res = self.pre_vote(&req);

		if res.vote_granted {
			match &mut self.state {
				ServerState::Follower(s) => s.last_heartbeat = tick.time,
				_ => panic!("granted vote but did not transition back to follower"),
			};

			self.meta.voted_for = Some(candidate_id);
			tick.write_meta();
			tracing::debug!(candidate_id, "cast vote");
		}

		res
	}

	pub fn append_entries(
		&mut self,
		req: AppendEntriesRequest,
		tick: &mut Tick,
	) -> Result<MatchConstraint<AppendEntriesResponse>> {
		self.observe_term(req.term, tick);

		if req.term == self.meta.current_term {
			let is_candidate = matches!(self.state, ServerState::Candidate(_));
			if is_candidate {
				self.become_follower(tick);
			}
		}

		let current_term = self.meta.current_term;
		let response = |success: bool, last_log_index: Option<LogIndex>| AppendEntriesResponse {
			term: current_term,
			success,
			last_log_index,
		};

		if req.term < self.meta.current_term {
			return Ok(MatchConstraint::new(response(false, None), LogPosition { term: 0, index: 0 }));
		}

		assert_eq!(req.term, self.meta.current_term);

		match &mut self.state {
			ServerState::Follower(s) => {
				s.last_heartbeat = tick.time;
				s.last_leader_id = Some(req.leader_id);
			}
			ServerState::Leader(_) => {
				if req.leader_id != self.id {
					return Err("received append_entries from another leader in the same term".into());
				}
			}
			ServerState::Candidate(_) => {
				return Err("still a candidate after observing the current term's leader".into());
			}
		};

		if !req.entries.is_empty() {
			let first = &req.entries[0];
			if first.term < req.prev_log_term || first.index != req.prev_log_index + 1 {
				return Err("received previous entry does not follow".into());
			}

			for i in 0..(req.entries.len() - 1) {
				let cur = &req.entries[i];
				let next = &req.entries[i + 1];
				if cur.term > next.term || next.index != cur.index + 1 {
					return Err("received entries are unsorted, duplicate, or inconsistent".into());
				}
			}
		}

		if req.prev_log_index < self.log.first_index().unwrap_or(1).saturating_sub(1) {
			return Err("requested previous log entry is before the start of the log".into());
		}

		match self.log.term(req.prev_log_index) {
			Some(term) => {
				if term != req.prev_log_term {
					return Ok(MatchConstraint::new(
						response(false, Some(self.meta.commit_index)),
						LogPosition { term: 0, index: 0 },
					));
				}
			}
			None => {
				return Ok(MatchConstraint::new(
					response(false, Some(self.log.last_index().unwrap_or(0))),
					LogPosition { term: 0, index: 0 },
				));
			}
		};

		let mut first_new = 0;
		for e in req.entries.iter() {
			match self.log.term(e.index) {
				Some(t) if t == e.term => first_new += 1,
				Some(_) => {
					if self.meta.commit_index >= e.index {
						return Err("refusing to truncate already-committed entries".into());
					}
					self.config.revert(e.index);
					self.log.truncate_suffix(e.index);
					break;
				}
				None => break,
			}
		}

		if first_new < req.entries.len() {
			let last_log_index = self.log.last_index().unwrap_or(0);
			let last_log_term = self.log.term(last_log_index).unwrap();
			let next = &req.entries[first_new];

			if next.index != last_log_index + 1 || next.term < last_log_term {
				return Err("next new entry is not immediately after our last local one".into());
			}
		}

		let mut last_new = req.prev_log_index;
		let mut last_new_term = req.prev_log_term;

		if req.entries.len() - first_new > 0 {
			let new_entries = &req.entries[first_new..];
			last_new = new_entries.last().unwrap().index;
			last_new_term = new_entries.last().unwrap().term;

			for e in new_entries {
				let i = e.index;
				tick.new_entries = true;
				self.log.append(e.clone());
				let e = self.log.entry(i).unwrap();
				self.config.apply(&e, self.meta.commit_index);
			}
		}

		if req.leader_commit > self.meta.commit_index {
			let next_commit_index = std::cmp::min(req.leader_commit, last_new);
			if next_commit_index > self.meta.commit_index {
				self.update_committed(next_commit_index, tick);
			}
		}

		let pos = LogPosition { term: last_new_term, index: last_new };
		let last_log_index = self.log.last_index().unwrap_or(0);

		Ok(MatchConstraint::new(
			response(true, if last_log_index != last_new { Some(last_log_index) } else { None }),
			pos,
		))
	}

	/// Follower-side handling of an `InstallSnapshot` RPC. Mirrors
	/// `append_entries`'s leader-observation preamble, then discards
	/// whatever log prefix the snapshot now covers. The actual snapshot
	/// bytes are handed to the state machine by the caller (`node.rs`) —
	/// this only keeps the log and commit index consistent with having
	/// done so.
	pub fn install_snapshot(&mut self, req: InstallSnapshotRequest, tick: &mut Tick) -> InstallSnapshotResponse {
		self.observe_term(req.term, tick);

		if req.term < self.meta.current_term {
			return InstallSnapshotResponse { term: self.meta.current_term };
		}

		match &mut self.state {
			ServerState::Follower(s) => {
				s.last_heartbeat = tick.time;
				s.last_leader_id = Some(req.leader_id);
			}
			ServerState::Candidate(_) => self.become_follower(tick),
			ServerState::Leader(_) => {
				// Two leaders in the same term should never both exist; if
				// it happens anyway, ignore rather than corrupt our own log.
				return InstallSnapshotResponse { term: self.meta.current_term };
			}
		}

		let matches_local_entry = self.log.term(req.last_included_index) == Some(req.last_included_term);
		if !matches_local_entry {
			self.config.revert(req.last_included_index);
			self.log.truncate_suffix(0);
		}
		self.log.truncate_prefix(req.last_included_index, req.last_included_term);

		if req.last_included_index > self.meta.commit_index {
			self.meta.commit_index = req.last_included_index;
			tick.write_meta();
		}
		self.config.skip_to(req.last_included_index);
		// Deliberately not `tick.new_entries = true`: the entries up to
		// `last_included_index` no longer exist in the log for the apply
		// loop to read. `node.rs` advances `applied_index` directly after
		// restoring the state machine from `req.data`.

		InstallSnapshotResponse { term: self.meta.current_term }
	}

	pub fn timeout_now(&mut self, tick: &mut Tick) {
		self.start_election(tick);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::log::Log;

	fn single_node(id: ServerId) -> ConsensusModule {
		let mut config = Configuration::default();
		config.members.insert(id);

		ConsensusModule::new(
			id,
			Metadata::default(),
			ConfigurationSnapshot { last_applied: 0, data: config },
			Arc::new(Log::open_in_memory()),
		)
	}

	#[test]
	fn single_node_becomes_leader() {
		let mut cm = single_node(1);
		let mut tick = Tick::empty();
		cm.cycle(&mut tick);
		assert!(cm.is_leader());
	}

	#[test]
	fn single_node_accepts_proposal() {
		let mut cm = single_node(1);
		let mut tick = Tick::empty();
		cm.cycle(&mut tick);
		assert!(cm.is_leader());

		let prop = cm.propose_command(b"hello".to_vec(), &mut tick).unwrap();
		assert_eq!(cm.proposal_status(&prop), ProposalStatus::Committed);
	}

	#[test]
	fn rejects_proposal_when_not_leader() {
		let mut cm = single_node(1);
		cm.state = ConsensusModule::new_follower(Instant::now());

		let mut tick = Tick::empty();
		let err = cm.propose_command(b"hello".to_vec(), &mut tick).unwrap_err();
		assert!(matches!(err, ProposeError::NotLeader { .. }));
	}
}
