//! Wires a [`ConsensusModule`] up to a real TCP transport and a
//! [`StateMachine`], and exposes the handful of operations an embedding
//! server needs: propose a command, add/remove a server, ask who the
//! leader is.
//!
//! Grounded on the original `Node::start(NodeConfig{..})` entry point (the
//! same project's `main.rs`), modernized from `futures-await` to
//! `async`/`await` over `tokio`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex as SyncMutex;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;

use crate::consensus::{ConsensusModule, ProposeError, Tick};
use crate::error::{Error, Result};
use crate::log::{default_log_path, Log, LogStorage};
use crate::proto::{
	ConfigChange, Configuration, ConfigurationSnapshot, InstallSnapshotRequest, InstallSnapshotResponse,
	LogEntryData, LogIndex, Message, MessageBody, Metadata, RpcRequest, RpcResponse, ServerId, Term,
};
use crate::state_machine::StateMachine;

/// Applied entries since the last compaction before a node snapshots its
/// state machine and truncates the corresponding log prefix. Chosen well
/// above the handful of entries any single test or example cluster
/// produces, so compaction only kicks in under sustained write load.
const SNAPSHOT_THRESHOLD: u64 = 1000;

#[derive(Debug, Clone)]
pub struct PeerInfo {
	pub id: ServerId,
	pub address: String,
}

pub struct NodeConfig {
	pub id: ServerId,
	pub dir: PathBuf,
	pub listen_addr: String,
	/// Peers known at startup (used to seed the address book; cluster
	/// membership itself lives in the replicated configuration).
	pub peers: Vec<PeerInfo>,
	/// If true and no configuration is found on disk, this node forms a
	/// brand-new single-member cluster containing only itself.
	pub bootstrap: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
	Follower,
	Candidate,
	Leader,
}

#[derive(Debug, Clone)]
pub struct NodeStats {
	pub role: Role,
	pub term: u64,
	pub commit_index: LogIndex,
	pub last_log_index: LogIndex,
}

pub struct Node {
	id: ServerId,
	module: SyncMutex<ConsensusModule>,
	log: Arc<dyn LogStorage>,
	meta_path: PathBuf,
	config_path: PathBuf,
	snapshot_path: PathBuf,
	addresses: SyncMutex<HashMap<ServerId, String>>,
	state_machine: Arc<dyn StateMachine>,
	pending: SyncMutex<HashMap<LogIndex, oneshot::Sender<Bytes>>>,
	applied_index: AtomicU64,
	/// Applied index as of the last successful compaction (ours or
	/// installed from a leader), so `maybe_snapshot` knows how much new
	/// ground has been covered since.
	last_snapshot_index: AtomicU64,
	/// Serializes the two ways `applied_index`/`last_snapshot_index` and
	/// the state machine get driven forward — `run_apply_loop`'s normal
	/// per-entry replay and `handle_install_snapshot`'s snapshot-shortcut
	/// fast-forward. Without this, the two could race (e.g. the apply loop
	/// re-storing a smaller `applied_index` right after an install bumped
	/// it past that point) exactly the way the tick-producing call sites
	/// raced before `apply_notify` serialized them.
	apply_gate: tokio::sync::Mutex<()>,
	notify: Notify,
	/// Wakes the single dedicated apply task (see `run_apply_task`) whenever
	/// a tick observes newly committed entries. Tick producers (the tick
	/// loop, inbound RPC handling, outbound RPC callbacks) all funnel
	/// through this rather than calling the apply loop themselves, so
	/// `applied_index` only ever advances from one serialized consumer.
	apply_notify: Notify,
	shutting_down: AtomicBool,
	background: SyncMutex<Vec<JoinHandle<()>>>,
}

fn load_meta(path: &Path) -> Result<Metadata> {
	match std::fs::read(path) {
		Ok(bytes) => Ok(rmp_serde::from_slice(&bytes)?),
		Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Metadata::default()),
		Err(err) => Err(err.into()),
	}
}

fn store_meta(path: &Path, meta: &Metadata) -> Result<()> {
	std::fs::write(path, rmp_serde::to_vec(meta)?)?;
	Ok(())
}

fn load_config(path: &Path, self_id: ServerId, peers: &[PeerInfo], bootstrap: bool) -> Result<ConfigurationSnapshot> {
	match std::fs::read(path) {
		Ok(bytes) => Ok(rmp_serde::from_slice(&bytes)?),
		Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
			let mut data = Configuration::default();
			if bootstrap {
				data.members.insert(self_id);
				for peer in peers {
					data.members.insert(peer.id);
				}
			}
			Ok(ConfigurationSnapshot { last_applied: 0, data })
		}
		Err(err) => Err(err.into()),
	}
}

fn store_config(path: &Path, snapshot: ConfigurationSnapshot) -> Result<()> {
	std::fs::write(path, rmp_serde::to_vec(&snapshot)?)?;
	Ok(())
}

impl Node {
	pub async fn start(config: NodeConfig, state_machine: Arc<dyn StateMachine>) -> Result<Arc<Node>> {
		let meta_path = config.dir.join("meta");
		let config_path = config.dir.join("config");
		let snapshot_path = config.dir.join("snapshot");

		let meta = load_meta(&meta_path)?;
		let config_snapshot = load_config(&config_path, config.id, &config.peers, config.bootstrap)?;
		let log: Arc<dyn LogStorage> = Arc::new(Log::open(&default_log_path(&config.dir))?);

		let module = ConsensusModule::new(config.id, meta, config_snapshot, log.clone());

		let mut addresses = HashMap::new();
		for peer in &config.peers {
			addresses.insert(peer.id, peer.address.clone());
		}

		let node = Arc::new(Node {
			id: config.id,
			module: SyncMutex::new(module),
			log,
			meta_path,
			config_path,
			snapshot_path,
			addresses: SyncMutex::new(addresses),
			state_machine,
			pending: SyncMutex::new(HashMap::new()),
			applied_index: AtomicU64::new(0),
			last_snapshot_index: AtomicU64::new(0),
			apply_gate: tokio::sync::Mutex::new(()),
			notify: Notify::new(),
			apply_notify: Notify::new(),
			shutting_down: AtomicBool::new(false),
			background: SyncMutex::new(Vec::new()),
		});

		let listener = TcpListener::bind(&config.listen_addr).await?;

		let rpc_handle = {
			let node = node.clone();
			tokio::spawn(async move {
				let handler = Arc::new(move |req| {
					let node = node.clone();
					async move { node.handle_rpc(req).await }
				});
				crate::rpc::serve(listener, handler).await;
			})
		};

		let tick_handle = {
			let node = node.clone();
			tokio::spawn(async move {
				node.run_tick_loop().await;
			})
		};

		let apply_handle = {
			let node = node.clone();
			tokio::spawn(async move {
				node.run_apply_task().await;
			})
		};

		node.background.lock().extend([rpc_handle, tick_handle, apply_handle]);

		Ok(node)
	}

	/// Orderly shutdown: stops accepting peer RPCs and ticking, then waits
	/// up to `drain_timeout` for in-flight applies to finish before failing
	/// whatever is still pending with [`ProposeError::ShuttingDown`]. Called
	/// by the embedding server after its frame listener has already closed,
	/// per the shutdown ordering the core requires (listeners first, then
	/// consensus, then transports).
	pub async fn shutdown(&self, drain_timeout: Duration) {
		self.shutting_down.store(true, Ordering::SeqCst);

		for handle in self.background.lock().drain(..) {
			handle.abort();
		}

		let deadline = tokio::time::Instant::now() + drain_timeout;
		while !self.pending.lock().is_empty() && tokio::time::Instant::now() < deadline {
			tokio::time::sleep(Duration::from_millis(10)).await;
		}

		// Whatever remains pending gets its sender dropped here; the waiting
		// `propose()` call observes the closed channel and, having seen
		// `shutting_down`, reports `ShuttingDown` instead of `NotLeader`.
		self.pending.lock().clear();
	}

	pub fn id(&self) -> ServerId {
		self.id
	}

	fn peer_address(&self, id: ServerId) -> Option<String> {
		self.addresses.lock().get(&id).cloned()
	}

	pub fn remember_address(&self, id: ServerId, address: String) {
		self.addresses.lock().insert(id, address);
	}

	pub fn is_leader(&self) -> bool {
		self.module.lock().is_leader()
	}

	pub fn leader_id(&self) -> Option<ServerId> {
		self.module.lock().last_leader_id()
	}

	pub fn leader_address(&self) -> Option<String> {
		self.leader_id().and_then(|id| self.peer_address(id))
	}

	pub fn stats(&self) -> NodeStats {
		let module = self.module.lock();
		let role = match module.role_name() {
			"leader" => Role::Leader,
			"candidate" => Role::Candidate,
			_ => Role::Follower,
		};
		NodeStats {
			role,
			term: module.meta().current_term,
			commit_index: module.meta().commit_index,
			last_log_index: self.applied_index.load(Ordering::SeqCst),
		}
	}

	pub fn peers(&self) -> Vec<PeerInfo> {
		let module = self.module.lock();
		let addresses = self.addresses.lock();
		module
			.config_snapshot()
			.data
			.iter()
			.filter(|id| **id != self.id)
			.map(|id| PeerInfo { id: *id, address: addresses.get(id).cloned().unwrap_or_default() })
			.collect()
	}

	/// Proposes a command, waits for it to be applied to the state machine
	/// (not merely committed), and returns the encoded reply.
	pub async fn propose(&self, data: Vec<u8>, timeout: Duration) -> std::result::Result<Bytes, ProposeError> {
		let (index, tick) = {
			let mut module = self.module.lock();
			let mut tick = Tick::empty();
			let proposal = module.propose_command(data, &mut tick)?;
			(proposal.index, tick)
		};

		let (tx, rx) = oneshot::channel();
		self.pending.lock().insert(index, tx);

		self.apply_tick(tick).await;

		match tokio::time::timeout(timeout, rx).await {
			Ok(Ok(reply)) => Ok(reply),
			// The pending sender was dropped without a reply: either this
			// node stepped down before the entry committed, or the server
			// is shutting down and cleared the pending table.
			Ok(Err(_)) => {
				if self.shutting_down.load(Ordering::SeqCst) {
					Err(ProposeError::ShuttingDown)
				} else {
					Err(ProposeError::NotLeader { leader_hint: self.leader_id() })
				}
			}
			// The caller's timeout elapsed; the entry is still pending and
			// may commit later. This is distinct from leadership loss.
			Err(_) => {
				self.pending.lock().remove(&index);
				Err(ProposeError::Timeout)
			}
		}
	}

	async fn propose_config_and_wait(&self, change: ConfigChange) -> Result<()> {
		let (index, tick) = {
			let mut module = self.module.lock();
			let mut tick = Tick::empty();
			let proposal = module
				.propose_config(change, &mut tick)
				.map_err(|_| Error::Rpc("not leader".into()))?;
			(proposal.index, tick)
		};

		let (tx, rx) = oneshot::channel();
		self.pending.lock().insert(index, tx);

		self.apply_tick(tick).await;

		tokio::time::timeout(Duration::from_secs(10), rx)
			.await
			.map_err(|_| Error::Rpc("timed out waiting for configuration change to commit".into()))?
			.map_err(|_| Error::Rpc("configuration change dropped".into()))?;

		Ok(())
	}

	pub async fn add_server(&self, id: ServerId, address: String) -> Result<()> {
		self.remember_address(id, address);
		self.propose_config_and_wait(ConfigChange::AddMember(id)).await
	}

	pub async fn remove_server(&self, id: ServerId) -> Result<()> {
		self.propose_config_and_wait(ConfigChange::RemoveServer(id)).await
	}

	/// Adds every server in `servers` (and self) as a voting member. Only
	/// meaningful on a node whose configuration is still empty.
	pub async fn bootstrap(&self, servers: Vec<PeerInfo>) -> Result<()> {
		{
			let module = self.module.lock();
			if !module.config_snapshot().data.members.is_empty() {
				return Err(Error::Rpc("already bootstrapped".into()));
			}
		}

		self.propose_config_and_wait(ConfigChange::AddMember(self.id)).await?;

		for peer in servers {
			if peer.id == self.id {
				continue;
			}
			self.add_server(peer.id, peer.address).await?;
		}

		Ok(())
	}

	async fn handle_rpc(self: &Arc<Self>, req: RpcRequest) -> RpcResponse {
		let mut tick = Tick::empty();

		match req {
			RpcRequest::RequestVote(r) => {
				let resp = self.module.lock().request_vote(r, &mut tick);
				self.spawn_apply_tick(tick);
				RpcResponse::RequestVote(resp)
			}
			RpcRequest::AppendEntries(r) => {
				let result = self.module.lock().append_entries(r, &mut tick);
				self.spawn_apply_tick(tick);
				match result {
					Ok(constraint) => RpcResponse::AppendEntries(constraint.persisted()),
					Err(err) => RpcResponse::Error(err.to_string()),
				}
			}
			RpcRequest::InstallSnapshot(r) => {
				let resp = self.handle_install_snapshot(r, &mut tick).await;
				self.spawn_apply_tick(tick);
				RpcResponse::InstallSnapshot(resp)
			}
			RpcRequest::TimeoutNow(_) => {
				self.module.lock().timeout_now(&mut tick);
				self.spawn_apply_tick(tick);
				RpcResponse::TimeoutNow
			}
		}
	}

	/// Applies an inbound `InstallSnapshot` RPC: updates the consensus
	/// module's log/commit-index bookkeeping, then restores the state
	/// machine from the shipped bytes and fast-forwards `applied_index`
	/// past whatever entries the snapshot subsumes (those entries no
	/// longer exist in the log for `run_apply_loop` to replay).
	async fn handle_install_snapshot(
		self: &Arc<Self>,
		req: InstallSnapshotRequest,
		tick: &mut Tick,
	) -> InstallSnapshotResponse {
		let last_included_index = req.last_included_index;
		let data = Bytes::from(req.data.clone());

		let resp = self.module.lock().install_snapshot(req, tick);

		let _guard = self.apply_gate.lock().await;

		if let Err(err) = self.state_machine.restore(data).await {
			tracing::error!(?err, "failed to restore state machine from installed snapshot");
			return resp;
		}

		self.pending.lock().retain(|idx, _| *idx > last_included_index);
		self.applied_index.fetch_max(last_included_index, Ordering::SeqCst);
		self.last_snapshot_index.fetch_max(last_included_index, Ordering::SeqCst);

		resp
	}

	fn spawn_apply_tick(self: &Arc<Self>, tick: Tick) {
		let this = self.clone();
		tokio::spawn(async move { this.apply_tick(tick).await });
	}

	async fn run_tick_loop(self: Arc<Self>) {
		loop {
			let tick = {
				let mut module = self.module.lock();
				let mut tick = Tick::empty();
				module.cycle(&mut tick);
				tick
			};

			let wait = tick.next_tick.unwrap_or(Duration::from_millis(100));
			self.apply_tick(tick).await;

			tokio::select! {
				_ = tokio::time::sleep(wait) => {}
				_ = self.notify.notified() => {}
			}
		}
	}

	/// Persists whatever the tick asked for, applies newly committed
	/// entries to the state machine, and dispatches outbound messages.
	async fn apply_tick(self: &Arc<Self>, tick: Tick) {
		if tick.meta {
			let meta = self.module.lock().meta().clone();
			if let Err(err) = store_meta(&self.meta_path, &meta) {
				tracing::error!(?err, "failed to persist raft metadata");
			}
		}

		if tick.config {
			let snapshot = {
				let module = self.module.lock();
				let s = module.config_snapshot();
				ConfigurationSnapshot { last_applied: s.last_applied, data: s.data.clone() }
			};
			if let Err(err) = store_config(&self.config_path, snapshot) {
				tracing::error!(?err, "failed to persist raft configuration");
			}
		}

		if tick.new_entries {
			// Wake the dedicated apply task rather than applying inline:
			// `apply_tick` runs concurrently from the tick loop, inbound RPC
			// handling, and outbound RPC callbacks, and entries must be
			// applied by exactly one serialized consumer in log-index
			// order.
			self.apply_notify.notify_one();
		}

		for msg in tick.messages {
			self.dispatch_message(msg);
		}
	}

	/// The single consumer of newly committed entries. Woken by
	/// `apply_notify`; `tokio::sync::Notify` coalesces any notifications
	/// that arrive while a run is already in progress into the single
	/// permit consumed by the next iteration, so a burst of ticks still
	/// results in at most one `run_apply_loop` in flight at a time.
	async fn run_apply_task(self: Arc<Self>) {
		loop {
			self.apply_notify.notified().await;
			self.run_apply_loop().await;
		}
	}

	async fn run_apply_loop(self: &Arc<Self>) {
		let _guard = self.apply_gate.lock().await;

		let commit_index = self.module.lock().meta().commit_index;
		let mut next = self.applied_index.load(Ordering::SeqCst) + 1;

		while next <= commit_index {
			let entry = match self.log.entry(next) {
				Some(e) => e,
				None => break,
			};

			let reply = match entry.data {
				LogEntryData::Command(data) => self.state_machine.apply(next, &data).await,
				LogEntryData::Noop | LogEntryData::Config(_) => Bytes::new(),
			};

			if let Some(tx) = self.pending.lock().remove(&next) {
				let _ = tx.send(reply);
			}

			self.applied_index.store(next, Ordering::SeqCst);
			next += 1;
		}

		self.maybe_snapshot(self.applied_index.load(Ordering::SeqCst)).await;
	}

	/// Compacts the log once enough entries have been applied since the
	/// last snapshot. Runs on every replica independently — log compaction
	/// is purely local bookkeeping and does not itself need to go through
	/// consensus.
	async fn maybe_snapshot(self: &Arc<Self>, applied_index: LogIndex) {
		let last = self.last_snapshot_index.load(Ordering::SeqCst);
		if applied_index < last + SNAPSHOT_THRESHOLD {
			return;
		}

		let term: Term = match self.log.term(applied_index) {
			Some(t) => t,
			// Already compacted past this point by a racing install, or the
			// index is otherwise unavailable; nothing to do.
			None => return,
		};

		let data = self.state_machine.snapshot().await;
		if let Err(err) = std::fs::write(&self.snapshot_path, &data) {
			tracing::error!(?err, "failed to persist snapshot to disk");
		}

		self.log.truncate_prefix(applied_index, term);
		self.last_snapshot_index.store(applied_index, Ordering::SeqCst);
		tracing::info!(applied_index, "compacted log via snapshot");
	}

	fn dispatch_message(self: &Arc<Self>, msg: Message) {
		for to in msg.to {
			let address = match self.peer_address(to) {
				Some(a) => a,
				None => continue,
			};

			let this = self.clone();
			let body = msg.body.clone();

			tokio::spawn(async move {
				let req = match &body {
					MessageBody::RequestVote(r) => RpcRequest::RequestVote(r.clone()),
					MessageBody::AppendEntries(r, _) => RpcRequest::AppendEntries(r.clone()),
					MessageBody::InstallSnapshot { last_included_index, last_included_term } => {
						let data = this.state_machine.snapshot().await;
						let (term, leader_id) = {
							let module = this.module.lock();
							(module.meta().current_term, this.id)
						};
						RpcRequest::InstallSnapshot(InstallSnapshotRequest {
							term,
							leader_id,
							last_included_index: *last_included_index,
							last_included_term: *last_included_term,
							data: data.to_vec(),
						})
					}
				};

				let result = crate::rpc::call(&address, req).await;

				let mut tick = Tick::empty();
				{
					let mut module = this.module.lock();
					match (result, &body) {
						(Ok(RpcResponse::RequestVote(resp)), MessageBody::RequestVote(_)) => {
							module.request_vote_callback(to, resp, &mut tick);
						}
						(Ok(RpcResponse::AppendEntries(resp)), MessageBody::AppendEntries(_, last_index)) => {
							module.append_entries_callback(to, *last_index, resp, &mut tick);
						}
						(
							Ok(RpcResponse::InstallSnapshot(resp)),
							MessageBody::InstallSnapshot { last_included_index, .. },
						) => {
							module.install_snapshot_callback(to, *last_included_index, resp, &mut tick);
						}
						(Ok(RpcResponse::Error(err)), MessageBody::InstallSnapshot { .. }) => {
							tracing::debug!(peer = to, %err, "peer rejected install_snapshot rpc");
							module.install_snapshot_noresponse(to, &mut tick);
						}
						(Ok(RpcResponse::Error(err)), _) => {
							tracing::debug!(peer = to, %err, "peer rejected rpc");
							module.append_entries_noresponse(to, &mut tick);
						}
						(Err(err), MessageBody::InstallSnapshot { .. }) => {
							tracing::debug!(peer = to, ?err, "rpc failed");
							module.install_snapshot_noresponse(to, &mut tick);
						}
						(Err(err), _) => {
							tracing::debug!(peer = to, ?err, "rpc failed");
							module.append_entries_noresponse(to, &mut tick);
						}
						_ => {}
					}
				}

				this.apply_tick(tick).await;
				this.notify.notify_one();
			});
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::state_machine::StateMachine;

	struct NoopMachine;

	#[async_trait::async_trait]
	impl StateMachine for NoopMachine {
		async fn apply(&self, _index: u64, _command: &[u8]) -> Bytes {
			Bytes::new()
		}
		async fn snapshot(&self) -> Bytes {
			Bytes::new()
		}
		async fn restore(&self, _data: Bytes) -> Result<()> {
			Ok(())
		}
	}

	async fn single_node(dir: &std::path::Path, addr: &str) -> Arc<Node> {
		let config = NodeConfig { id: 1, dir: dir.to_path_buf(), listen_addr: addr.to_string(), peers: vec![], bootstrap: true };
		Node::start(config, Arc::new(NoopMachine)).await.unwrap()
	}

	#[tokio::test]
	async fn shutdown_drains_pending_proposals_then_stops_ticking() {
		let dir = tempfile::tempdir().unwrap();
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap().to_string();
		drop(listener);

		let node = single_node(dir.path(), &addr).await;

		for _ in 0..50 {
			if node.is_leader() {
				break;
			}
			tokio::time::sleep(Duration::from_millis(20)).await;
		}
		assert!(node.is_leader());

		node.propose(b"hello".to_vec(), Duration::from_secs(1)).await.unwrap();

		node.shutdown(Duration::from_millis(200)).await;
		assert!(node.shutting_down.load(Ordering::SeqCst));
		assert!(node.pending.lock().is_empty());
	}
}
