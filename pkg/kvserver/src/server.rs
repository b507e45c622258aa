//! Accepts client connections, reads commands off the wire, and routes
//! them through the built-in table (C9/raft/sentinel) or the registry
//! (C4/C5/C6), one task per connection — the scheduling model in §5.

use std::sync::Arc;

use bytes::Bytes;
use resp::{Connection, FrameWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use crate::builtin::{self, BuiltinContext};
use crate::controller::ConsensusController;
use crate::dispatch;
use crate::kv::ShardedStore;
use crate::registry::Registry;

pub struct Server {
	store: Arc<ShardedStore>,
	registry: Arc<Registry>,
	consensus: Arc<dyn ConsensusController>,
	builtin: Arc<BuiltinContext>,
}

impl Server {
	pub fn new(
		store: Arc<ShardedStore>,
		registry: Arc<Registry>,
		consensus: Arc<dyn ConsensusController>,
		builtin: Arc<BuiltinContext>,
	) -> Arc<Server> {
		Arc::new(Server { store, registry, consensus, builtin })
	}

	/// Runs the accept loop until `shutdown` fires. Closing the listener is
	/// the first step of the ordering §5 requires — in-flight connections
	/// are left to finish their current request before the process moves on
	/// to tearing down consensus.
	pub async fn serve(self: Arc<Self>, listener: TcpListener, mut shutdown: oneshot::Receiver<()>) {
		loop {
			tokio::select! {
				accepted = listener.accept() => {
					match accepted {
						Ok((stream, peer)) => {
							let this = self.clone();
							tokio::spawn(async move { this.handle_connection(stream).await });
						}
						Err(err) => {
							tracing::warn!(?err, "accept failed");
						}
					}
				}
				_ = &mut shutdown => {
					tracing::info!("frame listener shutting down");
					break;
				}
			}
		}
	}

	async fn handle_connection(self: Arc<Self>, stream: TcpStream) {
		let peer = stream.peer_addr().ok();
		let mut conn = Connection::new(stream);

		loop {
			let command = match conn.read_command().await {
				Ok(Some(c)) => c,
				Ok(None) => break,
				Err(err) => {
					tracing::debug!(?peer, ?err, "connection closed on protocol error");
					break;
				}
			};

			if command.is_empty() {
				continue;
			}

			let name = String::from_utf8_lossy(&command[0]).to_string();
			let args = &command[1..];

			if name.eq_ignore_ascii_case("subscribe") {
				self.run_subscriber(&mut conn, args).await;
				break;
			}

			let mut w = FrameWriter::new();
			self.dispatch_one(&name, args.to_vec(), &mut w).await;

			if conn.write_reply(w.as_bytes()).await.is_err() {
				break;
			}
		}
	}

	async fn dispatch_one(&self, name: &str, args: Vec<Bytes>, w: &mut FrameWriter) {
		if builtin::try_builtin(&self.builtin, name, &args, w).await {
			return;
		}
		dispatch::dispatch(&self.registry, &self.store, &self.consensus, name, args, w).await;
	}

	/// Switches the connection into subscriber mode: replies to the initial
	/// `SUBSCRIBE` and then only ever forwards published messages, never
	/// accepting further requests — mirrors the peripheral sentinel pub/sub
	/// sub-protocol's expected client behavior.
	async fn run_subscriber(&self, conn: &mut Connection, channels: &[Bytes]) {
		let Some(sentinel) = &self.builtin.sentinel else {
			let mut w = FrameWriter::new();
			w.append_error("ERR sentinel support is not enabled");
			let _ = conn.write_reply(w.as_bytes()).await;
			return;
		};

		let mut receivers = Vec::new();
		for (i, channel) in channels.iter().enumerate() {
			let topic = String::from_utf8_lossy(channel).to_string();
			let rx = sentinel.broker.subscribe(&topic);

			let mut w = FrameWriter::new();
			w.append_array_len(3);
			w.append_bulk_string("subscribe");
			w.append_bulk(channel);
			w.append_int((i + 1) as i64);
			if conn.write_reply(w.as_bytes()).await.is_err() {
				return;
			}

			receivers.push((topic, rx));
		}

		loop {
			let mut any = false;
			for (topic, rx) in &mut receivers {
				if let Ok(message) = rx.try_recv() {
					any = true;
					let mut w = FrameWriter::new();
					w.append_array_len(3);
					w.append_bulk_string("message");
					w.append_bulk_string(topic);
					w.append_bulk(&message);
					if conn.write_reply(w.as_bytes()).await.is_err() {
						return;
					}
				}
			}
			if !any {
				tokio::time::sleep(std::time::Duration::from_millis(20)).await;
			}
		}
	}
}
