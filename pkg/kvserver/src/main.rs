//! CLI entry point: parses startup flags, loads node identity, starts the
//! consensus layer, registers the built-in KV commands, and serves client
//! connections until shutdown. Grounded on the teacher's `main_task`/`main`
//! split in `pkg/raft/src/main.rs`, modernized from `clap` 2's `App`/`Arg`
//! builder to `clap` 4's derive API and from `futures-await` to plain
//! `async`/`await`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use common::fs::DirLock;
use raft::{Node, NodeConfig, PeerInfo as RaftPeerInfo};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use kvserver::builtin::{BuiltinContext, SentinelContext};
use kvserver::config::Config;
use kvserver::fsm::Fsm;
use kvserver::kv::ShardedStore;
use kvserver::registry::{self, RegistryBuilder};
use kvserver::reply::ReplyValue;
use kvserver::{controller, identity, server};

#[derive(Parser, Debug)]
#[command(name = "kvserver", about = "Replicated, strongly-consistent key/value command server")]
struct Args {
	/// Directory to store this node's data files in.
	#[arg(short, long, value_name = "DIRECTORY_PATH")]
	dir: PathBuf,

	/// Address to listen for client and peer RPC connections on.
	#[arg(short, long, default_value = "127.0.0.1:6379")]
	listen: String,

	/// Addresses of peers known at startup (repeatable).
	#[arg(short, long = "peer", value_name = "ID@ADDRESS")]
	peers: Vec<String>,

	/// Forms a brand-new single-member cluster if no configuration exists yet.
	#[arg(long)]
	bootstrap: bool,

	/// Explicit node id, overriding `<dir>/node-id`.
	#[arg(long)]
	node_id: Option<String>,

	/// Enables the sentinel sub-protocol under the given master name.
	#[arg(long)]
	sentinel_master_name: Option<String>,
}

fn parse_peer(raw: &str) -> anyhow::Result<RaftPeerInfo> {
	let (id, addr) = raw.split_once('@').ok_or_else(|| anyhow::anyhow!("peer '{}' must be ID@ADDRESS", raw))?;
	Ok(RaftPeerInfo { id: id.parse()?, address: addr.to_string() })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

	let args = Args::parse();
	std::fs::create_dir_all(&args.dir)?;

	// Held for the remainder of the process; refuses to start a second
	// instance against a data directory that's already in use.
	let _dir_lock = DirLock::open(&args.dir)?;

	let mut config = Config::new(args.dir.clone(), args.listen.clone());
	config.raft.local_id = args.node_id.clone();
	config.sentinel.master_name = args.sentinel_master_name.clone();

	let node_id = identity::load_or_create(&config.dir, config.raft.local_id.as_deref())?;
	let server_id = identity::derive_server_id(&node_id);
	tracing::info!(%node_id, server_id, "node identity resolved");

	let peers = args.peers.iter().map(|p| parse_peer(p)).collect::<anyhow::Result<Vec<_>>>()?;

	let store = Arc::new(ShardedStore::new());
	let registry = Arc::new(build_registry());
	let fsm = Arc::new(Fsm::new(store.clone(), registry.clone()));

	let node_config = NodeConfig { id: server_id, dir: config.dir.clone(), listen_addr: config.listen_addr.clone(), peers, bootstrap: args.bootstrap };
	let node: Arc<Node> = Node::start(node_config, fsm).await?;
	let consensus: Arc<dyn controller::ConsensusController> = node;

	let sentinel = config.sentinel.master_name.clone().map(|master_name| SentinelContext { master_name, broker: Arc::new(resp::Broker::new()) });

	let builtin_ctx = Arc::new(BuiltinContext { node_id, tcp_addr: config.listen_addr.clone(), consensus: consensus.clone(), sentinel });

	let listener = TcpListener::bind(&config.listen_addr).await?;
	let srv = server::Server::new(store, registry, consensus, builtin_ctx);

	let (shutdown_tx, shutdown_rx) = oneshot::channel();
	tokio::spawn(async move {
		let _ = tokio::signal::ctrl_c().await;
		let _ = shutdown_tx.send(());
	});

	srv.serve(listener, shutdown_rx).await;

	// Frame listener is closed; now drain the consensus layer before the
	// process exits, per the shutdown ordering in §5.
	consensus.shutdown(Duration::from_secs(5)).await;
	Ok(())
}

/// Registers the reference KV commands (`SET`/`GET`/`DEL`) that back the
/// end-to-end scenarios in §8 — everything else a deployment needs is
/// registered the same way, through `RegistryBuilder`.
fn build_registry() -> registry::Registry {
	RegistryBuilder::new()
		.handle_ro("get", |store: &ShardedStore, args: &[Bytes]| {
			let Some(key) = args.first() else {
				return ReplyValue::error("wrong number of arguments for 'get' command");
			};
			match store.get(key) {
				Ok(Some(v)) => ReplyValue::Bulk(v),
				Ok(None) => ReplyValue::Nil,
				Err(err) => ReplyValue::error(err.to_string()),
			}
		})
		.handle_rw("set", Duration::from_secs(10), |store: &ShardedStore, args: &[Bytes]| {
			let (Some(key), Some(val)) = (args.first(), args.get(1)) else {
				return ReplyValue::error("wrong number of arguments for 'set' command");
			};
			match store.put(key, Some(val.clone())) {
				Ok(()) => ReplyValue::text("OK"),
				Err(err) => ReplyValue::error(err.to_string()),
			}
		})
		.handle_rw("del", Duration::from_secs(10), |store: &ShardedStore, args: &[Bytes]| {
			let Some(key) = args.first() else {
				return ReplyValue::error("wrong number of arguments for 'del' command");
			};
			match store.delete(key) {
				Ok(()) => ReplyValue::Int(1),
				Err(err) => ReplyValue::error(err.to_string()),
			}
		})
		.build()
}
