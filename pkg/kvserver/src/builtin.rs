//! Built-in commands exposed alongside the user-registered ones: `PING`,
//! `INFO`, the `raft*` family delegating to the consensus controller, and
//! the optional sentinel sub-protocol. These never go through the KV
//! registry (C4) — they act on the consensus controller, node identity, or
//! pub/sub broker rather than the sharded store, so they're dispatched
//! ahead of it.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use resp::{Broker, FrameWriter};

use crate::bootstrap;
use crate::controller::{ConsensusController, ConsensusState};
use crate::reply::{self, ReplyValue};

pub struct SentinelContext {
	pub master_name: String,
	pub broker: Arc<Broker>,
}

pub struct BuiltinContext {
	pub node_id: String,
	pub tcp_addr: String,
	pub consensus: Arc<dyn ConsensusController>,
	pub sentinel: Option<SentinelContext>,
}

/// Attempts to handle `name` as a built-in command. Returns `false` if
/// `name` isn't one, so the caller falls through to the KV registry.
pub async fn try_builtin(ctx: &BuiltinContext, name: &str, args: &[Bytes], w: &mut FrameWriter) -> bool {
	match name.to_ascii_lowercase().as_str() {
		"ping" => {
			w.append_simple_string("PONG");
		}
		"info" => w.append_bulk_string(&info_text(ctx)),
		"raftleader" => {
			let value = match ctx.consensus.leader_address() {
				Some(addr) => ReplyValue::text(addr),
				None => ReplyValue::Nil,
			};
			reply::encode(&value, w);
		}
		"raftstate" => {
			let state = match ctx.consensus.state() {
				ConsensusState::Leader => "leader",
				ConsensusState::Candidate => "candidate",
				ConsensusState::Follower => "follower",
			};
			w.append_bulk_string(state);
		}
		"raftstats" => {
			let stats = ctx.consensus.stats();
			let state = match stats.state {
				ConsensusState::Leader => "leader",
				ConsensusState::Candidate => "candidate",
				ConsensusState::Follower => "follower",
			};
			let value = ReplyValue::Map(vec![
				("state".to_string(), state.to_string()),
				("term".to_string(), stats.term.to_string()),
				("commit_index".to_string(), stats.commit_index.to_string()),
				("last_log_index".to_string(), stats.last_log_index.to_string()),
			]);
			reply::encode(&value, w);
		}
		"raftpeers" => {
			let value = ReplyValue::Array(
				ctx.consensus.peers().into_iter().map(|p| ReplyValue::text(format!("{} {}", p.id, p.address))).collect(),
			);
			reply::encode(&value, w);
		}
		"raftadd" => match parse_two(args) {
			Some((id, addr)) => match ctx.consensus.add_server(id, addr).await {
				Ok(()) => w.append_ok(),
				Err(err) => w.append_error(&format!("ERR {}", err)),
			},
			None => w.append_error("ERR raftadd requires <id> <address>"),
		},
		"raftremove" => match args.first().and_then(|a| std::str::from_utf8(a).ok()).and_then(|s| s.parse().ok()) {
			Some(id) => match ctx.consensus.remove_server(id).await {
				Ok(()) => w.append_ok(),
				Err(err) => w.append_error(&format!("ERR {}", err)),
			},
			None => w.append_error("ERR raftremove requires <id>"),
		},
		"raftbootstrap" => {
			if args.is_empty() {
				w.append_error("ERR raftbootstrap requires at least one peer address");
				return true;
			}
			match bootstrap_cluster(ctx, args).await {
				Ok(()) => w.append_ok(),
				Err(err) => w.append_error(&format!("ERR {}", err)),
			}
		}
		"sentinel" => handle_sentinel(ctx, args, w),
		"publish" => handle_publish(ctx, args, w),
		_ => return false,
	}
	true
}

fn info_text(ctx: &BuiltinContext) -> String {
	format!("# Server\nnode_id:{}\ntcp_addr:{}\n", ctx.node_id, ctx.tcp_addr)
}

async fn bootstrap_cluster(ctx: &BuiltinContext, addrs: &[Bytes]) -> crate::error::Result<()> {
	let mut servers = Vec::with_capacity(addrs.len());
	for addr in addrs {
		let addr = std::str::from_utf8(addr).map_err(|_| crate::error::Error::Other("invalid address".into()))?;
		servers.push(bootstrap::retrieve_peer_info(addr).await?);
	}
	ctx.consensus.bootstrap(servers).await
}

fn parse_two(args: &[Bytes]) -> Option<(u64, String)> {
	let id = std::str::from_utf8(args.first()?).ok()?.parse().ok()?;
	let addr = std::str::from_utf8(args.get(1)?).ok()?.to_string();
	Some((id, addr))
}

fn handle_sentinel(ctx: &BuiltinContext, args: &[Bytes], w: &mut FrameWriter) {
	let Some(sentinel) = &ctx.sentinel else {
		w.append_error("ERR sentinel support is not enabled");
		return;
	};

	match args.first().map(|a| a.to_ascii_lowercase()) {
		Some(sub) if sub == b"get-master-addr-by-name" => {
			let requested = args.get(1).map(|a| a.as_ref()).unwrap_or(b"");
			if requested != sentinel.master_name.as_bytes() {
				w.append_nil();
				return;
			}
			match ctx.consensus.leader_address() {
				Some(addr) => {
					let (host, port) = addr.rsplit_once(':').unwrap_or((addr.as_str(), "0"));
					let value = ReplyValue::Array(vec![ReplyValue::text(host), ReplyValue::text(port)]);
					reply::encode(&value, w);
				}
				None => w.append_nil(),
			}
		}
		Some(_) => w.append_error("ERR unknown SENTINEL sub-command"),
		None => w.append_error("ERR missing SENTINEL sub-command"),
	}
}

fn handle_publish(ctx: &BuiltinContext, args: &[Bytes], w: &mut FrameWriter) {
	let (Some(channel), Some(message)) = (args.first(), args.get(1)) else {
		w.append_error("ERR PUBLISH requires <channel> <message>");
		return;
	};

	let topic = String::from_utf8_lossy(channel).to_string();
	let count = ctx.broker_publish(&topic, message.clone());
	w.append_int(count as i64);
}

impl BuiltinContext {
	fn broker_publish(&self, topic: &str, message: Bytes) -> usize {
		match &self.sentinel {
			Some(s) => s.broker.publish(topic, message),
			None => 0,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use raft::ProposeError;
	use crate::controller::{ConsensusStats, PeerInfo};

	struct NoopConsensus;

	#[async_trait]
	impl ConsensusController for NoopConsensus {
		async fn propose(&self, _data: Vec<u8>, _timeout: Duration) -> Result<Bytes, ProposeError> {
			Err(ProposeError::NotLeader { leader_hint: None })
		}
		fn leader_id(&self) -> Option<u64> {
			None
		}
		fn leader_address(&self) -> Option<String> {
			Some("127.0.0.1:7001".to_string())
		}
		fn state(&self) -> ConsensusState {
			ConsensusState::Leader
		}
		fn stats(&self) -> ConsensusStats {
			ConsensusStats { state: ConsensusState::Leader, term: 1, commit_index: 0, last_log_index: 0 }
		}
		fn peers(&self) -> Vec<PeerInfo> {
			vec![]
		}
		async fn add_server(&self, _id: u64, _addr: String) -> crate::error::Result<()> {
			Ok(())
		}
		async fn remove_server(&self, _id: u64) -> crate::error::Result<()> {
			Ok(())
		}
		async fn bootstrap(&self, _servers: Vec<PeerInfo>) -> crate::error::Result<()> {
			Ok(())
		}
		async fn shutdown(&self, _drain_timeout: Duration) {}
	}

	fn ctx() -> BuiltinContext {
		BuiltinContext {
			node_id: "11111111-1111-1111-1111-111111111111".to_string(),
			tcp_addr: "127.0.0.1:7000".to_string(),
			consensus: Arc::new(NoopConsensus),
			sentinel: None,
		}
	}

	#[tokio::test]
	async fn ping_replies_pong() {
		let mut w = FrameWriter::new();
		assert!(try_builtin(&ctx(), "PING", &[], &mut w).await);
		assert_eq!(w.as_bytes(), b"+PONG\r\n");
	}

	#[tokio::test]
	async fn info_contains_node_id_and_tcp_addr() {
		let mut w = FrameWriter::new();
		assert!(try_builtin(&ctx(), "INFO", &[], &mut w).await);
		let text = String::from_utf8(w.as_bytes().to_vec()).unwrap();
		assert!(text.contains("node_id:11111111-1111-1111-1111-111111111111"));
		assert!(text.contains("tcp_addr:127.0.0.1:7000"));
	}

	#[tokio::test]
	async fn unknown_name_is_not_a_builtin() {
		let mut w = FrameWriter::new();
		assert!(!try_builtin(&ctx(), "SET", &[], &mut w).await);
	}

	#[tokio::test]
	async fn sentinel_disabled_by_default() {
		let mut w = FrameWriter::new();
		assert!(try_builtin(&ctx(), "SENTINEL", &[Bytes::from_static(b"get-master-addr-by-name")], &mut w).await);
		assert_eq!(w.as_bytes(), b"-ERR sentinel support is not enabled\r\n");
	}
}
