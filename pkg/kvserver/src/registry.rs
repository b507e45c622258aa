//! Maps a lowercase command name to its handler, read/write classification
//! and per-command timeout (C4). Built via `RegistryBuilder` at server
//! setup, then frozen into an immutable `Registry` before serving begins —
//! the concurrency model's "written only during setup... no lock required
//! at dispatch time" invariant (§5) realized through ownership instead of a
//! runtime check.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;

use crate::kv::ShardedStore;
use crate::reply::ReplyValue;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const MIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
	ReadOnly,
	Mutating,
}

/// A registered command handler. Implementors see the store (for read-only
/// handlers, a consistent local view; for mutating ones, invoked only from
/// the apply loop) and the command's arguments.
pub trait Handler: Send + Sync {
	fn call(&self, store: &ShardedStore, args: &[Bytes]) -> ReplyValue;
}

impl<F> Handler for F
where
	F: Fn(&ShardedStore, &[Bytes]) -> ReplyValue + Send + Sync,
{
	fn call(&self, store: &ShardedStore, args: &[Bytes]) -> ReplyValue {
		(self)(store, args)
	}
}

pub struct Entry {
	pub kind: HandlerKind,
	pub timeout: Duration,
	pub handler: Box<dyn Handler>,
}

/// An immutable, lock-free command table, looked up by lowercase name.
pub struct Registry {
	entries: HashMap<String, Entry>,
}

impl Registry {
	pub fn get(&self, name: &str) -> Option<&Entry> {
		self.entries.get(&name.to_ascii_lowercase())
	}
}

pub struct RegistryBuilder {
	entries: HashMap<String, Entry>,
}

impl RegistryBuilder {
	pub fn new() -> Self {
		RegistryBuilder { entries: HashMap::new() }
	}

	pub fn handle_ro(mut self, name: &str, handler: impl Handler + 'static) -> Self {
		self.entries.insert(
			name.to_ascii_lowercase(),
			Entry { kind: HandlerKind::ReadOnly, timeout: DEFAULT_TIMEOUT, handler: Box::new(handler) },
		);
		self
	}

	pub fn handle_rw(mut self, name: &str, timeout: Duration, handler: impl Handler + 'static) -> Self {
		let timeout = if timeout < MIN_TIMEOUT { DEFAULT_TIMEOUT } else { timeout };
		self.entries.insert(
			name.to_ascii_lowercase(),
			Entry { kind: HandlerKind::Mutating, timeout, handler: Box::new(handler) },
		);
		self
	}

	pub fn build(self) -> Registry {
		Registry { entries: self.entries }
	}
}

impl Default for RegistryBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// A small token trie for sub-command dispatch (design note: "model as a
/// tree: registry nodes map a token to either a handler or another
/// registry"). Used for the `raft <subcommand>` and `sentinel <subcommand>`
/// namespaces.
pub enum SubNode {
	Handler(Box<dyn Handler>),
	Tree(SubRegistry),
}

pub struct SubRegistry {
	nodes: HashMap<String, SubNode>,
}

impl SubRegistry {
	pub fn new() -> Self {
		SubRegistry { nodes: HashMap::new() }
	}

	pub fn add(mut self, token: &str, handler: impl Handler + 'static) -> Self {
		self.nodes.insert(token.to_ascii_lowercase(), SubNode::Handler(Box::new(handler)));
		self
	}

	pub fn add_tree(mut self, token: &str, tree: SubRegistry) -> Self {
		self.nodes.insert(token.to_ascii_lowercase(), SubNode::Tree(tree));
		self
	}

	/// Consumes leading tokens from `args` until a handler is reached,
	/// dispatching to it with whatever args remain.
	pub fn dispatch(&self, store: &ShardedStore, args: &[Bytes]) -> ReplyValue {
		let Some(token) = args.first() else {
			return ReplyValue::error("missing sub-command");
		};

		let key = String::from_utf8_lossy(token).to_ascii_lowercase();
		match self.nodes.get(&key) {
			Some(SubNode::Handler(h)) => h.call(store, &args[1..]),
			Some(SubNode::Tree(t)) => t.dispatch(store, &args[1..]),
			None => ReplyValue::error(format!("unknown sub-command '{}'", key)),
		}
	}
}

impl Default for SubRegistry {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn clamps_sub_second_timeouts_to_default() {
		let registry = RegistryBuilder::new()
			.handle_rw("set", Duration::from_millis(1), |_: &ShardedStore, _: &[Bytes]| ReplyValue::Nil)
			.build();
		assert_eq!(registry.get("SET").unwrap().timeout, DEFAULT_TIMEOUT);
	}

	#[test]
	fn lookup_is_case_insensitive() {
		let registry = RegistryBuilder::new().handle_ro("ping", |_: &ShardedStore, _: &[Bytes]| ReplyValue::Nil).build();
		assert!(registry.get("PING").is_some());
		assert!(registry.get("ping").is_some());
	}
}
