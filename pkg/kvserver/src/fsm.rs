//! Bridges the consensus layer's [`raft::StateMachine`] to this crate's
//! handler registry and sharded store (C7). Every replica, leader and
//! follower alike, runs every applied command through here — the leader's
//! result additionally flows back to whichever client is waiting on the
//! apply-future (C6); followers discard it but still invoke the handler to
//! keep their state consistent.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use raft::StateMachine;
use resp::FrameWriter;

use crate::codec;
use crate::kv::ShardedStore;
use crate::registry::Registry;
use crate::reply::{self, ReplyValue};

pub struct Fsm {
	store: Arc<ShardedStore>,
	registry: Arc<Registry>,
}

impl Fsm {
	pub fn new(store: Arc<ShardedStore>, registry: Arc<Registry>) -> Self {
		Fsm { store, registry }
	}
}

#[async_trait]
impl StateMachine for Fsm {
	async fn apply(&self, _index: u64, command: &[u8]) -> Bytes {
		let value = match codec::decode(command) {
			Ok(cmd) => match self.registry.get(&cmd.name) {
				Some(entry) => entry.handler.call(&self.store, &cmd.args),
				// A configuration skew between replicas: a name registered
				// on the leader but not on this follower. The entry is not
				// rejected — it still advances the log — but its reply is
				// an error, surfaced to whoever is waiting on it.
				None => ReplyValue::error(format!("unknown command '{}'", cmd.name)),
			},
			Err(err) => ReplyValue::error(format!("malformed log entry: {}", err)),
		};

		let mut w = FrameWriter::new();
		reply::encode(&value, &mut w);
		w.freeze()
	}

	async fn snapshot(&self) -> Bytes {
		let mut buf = Vec::new();
		// Snapshotting can only fail on a sink write error; an in-memory Vec
		// never fails, so this unwrap is infallible in practice.
		self.store.snapshot(&mut buf).expect("in-memory snapshot sink is infallible");
		Bytes::from(buf)
	}

	async fn restore(&self, data: Bytes) -> raft::error::Result<()> {
		self.store.restore(&mut &data[..]).map_err(|err| raft::error::Error::Other(err.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::registry::RegistryBuilder;
	use std::time::Duration;

	fn test_fsm() -> Fsm {
		let store = Arc::new(ShardedStore::new());
		let registry = Arc::new(
			RegistryBuilder::new()
				.handle_rw("set", Duration::from_secs(1), |store: &ShardedStore, args: &[Bytes]| {
					store.put(&args[0], Some(args[1].clone())).unwrap();
					ReplyValue::text("OK")
				})
				.build(),
		);
		Fsm::new(store, registry)
	}

	#[tokio::test]
	async fn applies_registered_command_and_mutates_store() {
		let fsm = test_fsm();
		let cmd = codec::Command::new("SET", vec![Bytes::from_static(b"k"), Bytes::from_static(b"v")]);
		let reply = fsm.apply(1, &codec::encode(&cmd).unwrap()).await;
		assert_eq!(reply, Bytes::from_static(b"$2\r\nOK\r\n"));
		assert_eq!(fsm.store.get(b"k").unwrap(), Some(Bytes::from_static(b"v")));
	}

	#[tokio::test]
	async fn unknown_command_yields_error_reply_without_panicking() {
		let fsm = test_fsm();
		let cmd = codec::Command::new("NOPE", vec![]);
		let reply = fsm.apply(1, &codec::encode(&cmd).unwrap()).await;
		assert_eq!(reply, Bytes::from_static(b"-ERR unknown command 'NOPE'\r\n"));
	}

	#[tokio::test]
	async fn snapshot_restore_round_trips_through_fsm() {
		let fsm = test_fsm();
		fsm.store.put(b"a", Some(Bytes::from_static(b"1"))).unwrap();
		let snap = fsm.snapshot().await;

		let fresh = test_fsm();
		fresh.restore(snap).await.unwrap();
		assert_eq!(fresh.store.get(b"a").unwrap(), Some(Bytes::from_static(b"1")));
	}
}
