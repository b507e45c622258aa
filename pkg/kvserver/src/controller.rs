//! The seam between this crate and the `raft` crate. `kvserver`'s dispatch
//! code (C5/C6) is generic over this trait rather than over `raft::Node`
//! directly, so the consensus engine is "consumed as an external
//! collaborator" rather than compiled in as a fixed implementation detail.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use raft::{Node, PeerInfo as RaftPeerInfo, ProposeError};

use crate::error::{Error, Result};

pub type ServerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusState {
	Follower,
	Candidate,
	Leader,
}

#[derive(Debug, Clone)]
pub struct ConsensusStats {
	pub state: ConsensusState,
	pub term: u64,
	pub commit_index: u64,
	pub last_log_index: u64,
}

#[derive(Debug, Clone)]
pub struct PeerInfo {
	pub id: ServerId,
	pub address: String,
}

/// A consensus engine capable of replicating opaque commands and answering
/// cluster-membership questions. The FSM (C7) applies what this proposes;
/// C6 translates its errors into `READONLY`/`ERR` replies.
#[async_trait]
pub trait ConsensusController: Send + Sync {
	/// Proposes `data`, waits for it to be applied, and returns the FSM's
	/// pre-encoded reply frame.
	async fn propose(&self, data: Vec<u8>, timeout: Duration) -> std::result::Result<Bytes, ProposeError>;
	fn leader_id(&self) -> Option<ServerId>;
	fn leader_address(&self) -> Option<String>;
	fn state(&self) -> ConsensusState;
	fn stats(&self) -> ConsensusStats;
	fn peers(&self) -> Vec<PeerInfo>;
	async fn add_server(&self, id: ServerId, addr: String) -> Result<()>;
	async fn remove_server(&self, id: ServerId) -> Result<()>;
	async fn bootstrap(&self, servers: Vec<PeerInfo>) -> Result<()>;
	/// Stops accepting proposals and drains in-flight applies, per the
	/// shutdown ordering: frame listeners close first, then this.
	async fn shutdown(&self, drain_timeout: Duration);
}

#[async_trait]
impl ConsensusController for Node {
	async fn propose(&self, data: Vec<u8>, timeout: Duration) -> std::result::Result<Bytes, ProposeError> {
		Node::propose(self, data, timeout).await
	}

	fn leader_id(&self) -> Option<ServerId> {
		Node::leader_id(self)
	}

	fn leader_address(&self) -> Option<String> {
		Node::leader_address(self)
	}

	fn state(&self) -> ConsensusState {
		match Node::stats(self).role {
			raft::node::Role::Follower => ConsensusState::Follower,
			raft::node::Role::Candidate => ConsensusState::Candidate,
			raft::node::Role::Leader => ConsensusState::Leader,
		}
	}

	fn stats(&self) -> ConsensusStats {
		let stats = Node::stats(self);
		ConsensusStats {
			state: match stats.role {
				raft::node::Role::Follower => ConsensusState::Follower,
				raft::node::Role::Candidate => ConsensusState::Candidate,
				raft::node::Role::Leader => ConsensusState::Leader,
			},
			term: stats.term,
			commit_index: stats.commit_index,
			last_log_index: stats.last_log_index,
		}
	}

	fn peers(&self) -> Vec<PeerInfo> {
		Node::peers(self).into_iter().map(|p: RaftPeerInfo| PeerInfo { id: p.id, address: p.address }).collect()
	}

	async fn add_server(&self, id: ServerId, addr: String) -> Result<()> {
		Node::add_server(self, id, addr).await.map_err(|err| Error::Other(err.to_string()))
	}

	async fn remove_server(&self, id: ServerId) -> Result<()> {
		Node::remove_server(self, id).await.map_err(|err| Error::Other(err.to_string()))
	}

	async fn bootstrap(&self, servers: Vec<PeerInfo>) -> Result<()> {
		let servers = servers.into_iter().map(|p| RaftPeerInfo { id: p.id, address: p.address }).collect();
		Node::bootstrap(self, servers).await.map_err(|err| Error::Other(err.to_string()))
	}

	async fn shutdown(&self, drain_timeout: Duration) {
		Node::shutdown(self, drain_timeout).await
	}
}
