//! Routes an inbound command to either C5 (read-only, local) or C6
//! (replicating, through consensus), then writes the resulting reply frame.
//! C6 is "the critical path" per the component design: every step's error
//! disposition is spelled out in the match below rather than folded into a
//! generic `?`, because the `READONLY`/`ERR` distinction is load-bearing for
//! Redis-compatible clients.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use raft::ProposeError;
use resp::FrameWriter;

use crate::codec::{self, Command};
use crate::controller::ConsensusController;
use crate::kv::ShardedStore;
use crate::registry::{HandlerKind, Registry};
use crate::reply::{self, ReplyValue};

/// Looks up `name`, runs it, and writes the reply — for reads this means
/// invoking the handler directly against `store`; for writes, routing
/// through `consensus`. Unregistered names get the framer's standard
/// unknown-command reply, independent of read/write classification.
pub async fn dispatch(
	registry: &Registry,
	store: &ShardedStore,
	consensus: &Arc<dyn ConsensusController>,
	name: &str,
	args: Vec<Bytes>,
	w: &mut FrameWriter,
) {
	let Some(entry) = registry.get(name) else {
		w.append_error(&format!("ERR unknown command '{}'", name));
		return;
	};

	match entry.kind {
		HandlerKind::ReadOnly => dispatch_readonly(entry.handler.as_ref(), store, &args, w),
		HandlerKind::Mutating => dispatch_replicating(consensus, name, args, entry.timeout, w).await,
	}
}

fn dispatch_readonly(handler: &dyn crate::registry::Handler, store: &ShardedStore, args: &[Bytes], w: &mut FrameWriter) {
	let value = handler.call(store, args);
	reply::encode(&value, w);
}

async fn dispatch_replicating(
	consensus: &Arc<dyn ConsensusController>,
	name: &str,
	args: Vec<Bytes>,
	timeout: Duration,
	w: &mut FrameWriter,
) {
	// Step 1: encode.
	let payload = match codec::encode(&Command::new(name, args)) {
		Ok(bytes) => bytes,
		Err(err) => {
			w.append_error(&format!("ERR {}", err));
			return;
		}
	};

	// Steps 2-3: submit and await. The success arm is matched first and
	// unconditionally, so a `nil`/ok apply result can never fall through to
	// the not-leader or generic-error branches.
	match consensus.propose(payload, timeout).await {
		Ok(reply_frame) => {
			// Step 4: the FSM already encoded this via C1 — copy verbatim.
			w.append_raw(&reply_frame);
		}
		Err(ProposeError::NotLeader { .. }) => {
			w.append_error("READONLY node is not the leader");
		}
		Err(ProposeError::RetryAfter(_)) => {
			w.append_error("ERR a configuration change is already in progress, retry shortly");
		}
		Err(ProposeError::Timeout) => {
			w.append_error(&format!("ERR command timed out after {:?}", timeout));
		}
		Err(ProposeError::ShuttingDown) => {
			w.append_error("ERR server is shutting down");
		}
	}
}

/// Encodes a single reply value, for built-in commands that don't go
/// through the registry (`PING`, `INFO`, and friends).
pub fn encode_value(value: &ReplyValue, w: &mut FrameWriter) {
	reply::encode(value, w);
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::registry::RegistryBuilder;
	use async_trait::async_trait;
	use raft::ProposeError;
	use std::sync::Mutex;

	struct StubController {
		result: Mutex<Option<Result<Bytes, ProposeError>>>,
	}

	#[async_trait]
	impl ConsensusController for StubController {
		async fn propose(&self, _data: Vec<u8>, _timeout: Duration) -> Result<Bytes, ProposeError> {
			self.result.lock().unwrap().take().expect("propose called more than once in test")
		}
		fn leader_id(&self) -> Option<u64> {
			None
		}
		fn leader_address(&self) -> Option<String> {
			None
		}
		fn state(&self) -> crate::controller::ConsensusState {
			crate::controller::ConsensusState::Follower
		}
		fn stats(&self) -> crate::controller::ConsensusStats {
			crate::controller::ConsensusStats { state: crate::controller::ConsensusState::Follower, term: 0, commit_index: 0, last_log_index: 0 }
		}
		fn peers(&self) -> Vec<crate::controller::PeerInfo> {
			vec![]
		}
		async fn add_server(&self, _id: u64, _addr: String) -> crate::error::Result<()> {
			Ok(())
		}
		async fn remove_server(&self, _id: u64) -> crate::error::Result<()> {
			Ok(())
		}
		async fn bootstrap(&self, _servers: Vec<crate::controller::PeerInfo>) -> crate::error::Result<()> {
			Ok(())
		}
		async fn shutdown(&self, _drain_timeout: Duration) {}
	}

	#[tokio::test]
	async fn not_leader_yields_readonly_prefix() {
		let registry = Arc::new(
			RegistryBuilder::new()
				.handle_rw("set", Duration::from_secs(1), |_: &ShardedStore, _: &[Bytes]| ReplyValue::text("OK"))
				.build(),
		);
		let store = ShardedStore::new();
		let consensus: Arc<dyn ConsensusController> =
			Arc::new(StubController { result: Mutex::new(Some(Err(ProposeError::NotLeader { leader_hint: None }))) });

		let mut w = FrameWriter::new();
		dispatch(&registry, &store, &consensus, "set", vec![Bytes::from_static(b"k"), Bytes::from_static(b"v")], &mut w).await;
		assert_eq!(w.as_bytes(), b"-READONLY node is not the leader\r\n");
	}

	#[tokio::test]
	async fn successful_apply_copies_fsm_frame_verbatim() {
		let registry = Arc::new(
			RegistryBuilder::new()
				.handle_rw("set", Duration::from_secs(1), |_: &ShardedStore, _: &[Bytes]| ReplyValue::text("OK"))
				.build(),
		);
		let store = ShardedStore::new();
		let consensus: Arc<dyn ConsensusController> =
			Arc::new(StubController { result: Mutex::new(Some(Ok(Bytes::from_static(b"$2\r\nOK\r\n")))) });

		let mut w = FrameWriter::new();
		dispatch(&registry, &store, &consensus, "set", vec![Bytes::from_static(b"k"), Bytes::from_static(b"v")], &mut w).await;
		assert_eq!(w.as_bytes(), b"$2\r\nOK\r\n");
	}

	#[tokio::test]
	async fn timeout_yields_err_not_readonly() {
		let registry = Arc::new(
			RegistryBuilder::new()
				.handle_rw("set", Duration::from_secs(1), |_: &ShardedStore, _: &[Bytes]| ReplyValue::text("OK"))
				.build(),
		);
		let store = ShardedStore::new();
		let consensus: Arc<dyn ConsensusController> =
			Arc::new(StubController { result: Mutex::new(Some(Err(ProposeError::Timeout))) });

		let mut w = FrameWriter::new();
		dispatch(&registry, &store, &consensus, "set", vec![Bytes::from_static(b"k"), Bytes::from_static(b"v")], &mut w).await;
		let out = w.as_bytes();
		assert!(out.starts_with(b"-ERR"), "expected ERR prefix, got {:?}", out);
		assert!(!out.starts_with(b"-READONLY"));
	}

	#[tokio::test]
	async fn unknown_command_is_err_not_readonly() {
		let registry = Arc::new(RegistryBuilder::new().build());
		let store = ShardedStore::new();
		let consensus: Arc<dyn ConsensusController> = Arc::new(StubController { result: Mutex::new(None) });

		let mut w = FrameWriter::new();
		dispatch(&registry, &store, &consensus, "wat", vec![], &mut w).await;
		assert_eq!(w.as_bytes(), b"-ERR unknown command 'wat'\r\n");
	}
}
