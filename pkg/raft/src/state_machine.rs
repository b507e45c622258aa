//! The interface a replicated service implements to receive committed
//! entries. `kvserver`'s FSM bridge (the sharded store plus reply encoding)
//! is the concrete implementation this crate is built to drive.

use async_trait::async_trait;
use bytes::Bytes;

/// Consumes commands in committed log order and produces snapshots of the
/// resulting state. Implementations must be deterministic: applying the
/// same sequence of commands on any node must produce the same state.
#[async_trait]
pub trait StateMachine: Send + Sync {
	/// Applies a single committed command, returning the encoded reply that
	/// would have been sent to the client that proposed it.
	async fn apply(&self, index: u64, command: &[u8]) -> Bytes;

	/// Serializes the entire current state for transfer to a lagging
	/// follower or for persisting a compaction point.
	async fn snapshot(&self) -> Bytes;

	/// Replaces the entire current state with the contents of a snapshot
	/// produced by `snapshot()`, discarding whatever was there before.
	async fn restore(&self, data: Bytes) -> crate::error::Result<()>;
}
