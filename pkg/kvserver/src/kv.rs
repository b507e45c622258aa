//! The reference sharded in-memory KV store, grounded on
//! `original_source/inmem.go` (`inMemStore`, `inMemShard`,
//! `inMemSnapshotIterator`, `inMemoryBatch`): 64 shards, each guarded by an
//! independent RW lock, key routed by 32-bit FNV-1a hash.

use std::collections::HashMap;
use std::io::Write;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::error::{Error, Result};

pub const NUM_SHARDS: usize = 64;

const FNV_OFFSET_32: u32 = 2166136261;
const FNV_PRIME_32: u32 = 16777619;

fn fnv32a(b: &[u8]) -> u32 {
	if b.is_empty() {
		return 0;
	}
	let mut h = FNV_OFFSET_32;
	for &c in b {
		h ^= c as u32;
		h = h.wrapping_mul(FNV_PRIME_32);
	}
	h
}

struct Shard {
	data: RwLock<HashMap<Bytes, Bytes>>,
}

/// A concurrent key/value store partitioned into 64 independently locked
/// shards. The reference store used by this workspace's FSM bridge.
pub struct ShardedStore {
	shards: Vec<Shard>,
}

impl ShardedStore {
	pub fn new() -> Self {
		let mut shards = Vec::with_capacity(NUM_SHARDS);
		for _ in 0..NUM_SHARDS {
			shards.push(Shard { data: RwLock::new(HashMap::new()) });
		}
		ShardedStore { shards }
	}

	fn shard_for(&self, key: &[u8]) -> &Shard {
		&self.shards[(fnv32a(key) as usize) % NUM_SHARDS]
	}

	pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
		if key.is_empty() {
			return Err(Error::InvalidKey);
		}
		Ok(self.shard_for(key).data.read().get(key).cloned())
	}

	/// `val = None` deletes the key, matching `inMemShard.Put`'s
	/// nil-means-delete convention.
	pub fn put(&self, key: &[u8], val: Option<Bytes>) -> Result<()> {
		if key.is_empty() {
			return Err(Error::InvalidKey);
		}
		let mut shard = self.shard_for(key).data.write();
		match val {
			Some(v) => {
				shard.insert(Bytes::copy_from_slice(key), v);
			}
			None => {
				shard.remove(key);
			}
		}
		Ok(())
	}

	pub fn delete(&self, key: &[u8]) -> Result<()> {
		self.put(key, None)
	}

	/// Writes every shard's contents as a concatenation of
	/// `<varint key-len><key><varint val-len><val>` records. Shards are
	/// snapshotted one at a time under their own read lock, so the result
	/// is not a single atomic point-in-time view across shards (see C2
	/// concurrency note) — callers that need that guarantee must ensure the
	/// store is quiescent first.
	pub fn snapshot(&self, out: &mut impl Write) -> Result<()> {
		for shard in &self.shards {
			let data = shard.data.read();
			for (key, val) in data.iter() {
				let mut framed = Vec::new();
				common::varint::encode(key.len() as u64, &mut framed);
				framed.extend_from_slice(key);
				common::varint::encode(val.len() as u64, &mut framed);
				framed.extend_from_slice(val);
				out.write_all(&framed)?;
			}
		}
		Ok(())
	}

	/// Additive restore: every record read is put into the current state.
	/// Callers wanting a total replacement must restore into a fresh store.
	pub fn restore(&self, input: &mut impl std::io::Read) -> Result<()> {
		loop {
			let key_len = match common::varint::read(input) {
				Ok(v) => v,
				Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
				Err(e) => return Err(e.into()),
			};

			let mut key = vec![0u8; key_len as usize];
			std::io::Read::read_exact(input, &mut key)?;

			let val_len = common::varint::read(input)?;
			let mut val = vec![0u8; val_len as usize];
			std::io::Read::read_exact(input, &mut val)?;

			self.put(&key, Some(Bytes::from(val)))?;
		}
		Ok(())
	}

	pub fn begin(&self, mutating: bool) -> Batch<'_> {
		Batch { store: self, mutating, stash: Vec::new() }
	}
}

impl Default for ShardedStore {
	fn default() -> Self {
		Self::new()
	}
}

enum BatchWrite {
	Put(Bytes, Bytes),
	Delete(Bytes),
}

/// Buffers writes until `commit()`, mirroring `inMemoryBatch.stash` in
/// `original_source/inmem.go`. Exposed for store implementations that want
/// to batch; this workspace's own FSM bridge applies directly through
/// `get`/`put`/`delete` instead.
pub struct Batch<'a> {
	store: &'a ShardedStore,
	#[allow(dead_code)]
	mutating: bool,
	stash: Vec<BatchWrite>,
}

impl<'a> Batch<'a> {
	pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
		self.store.get(key)
	}

	pub fn put(&mut self, key: &[u8], val: Bytes) -> Result<()> {
		if key.is_empty() {
			return Err(Error::InvalidKey);
		}
		self.stash.push(BatchWrite::Put(Bytes::copy_from_slice(key), val));
		Ok(())
	}

	pub fn delete(&mut self, key: &[u8]) -> Result<()> {
		if key.is_empty() {
			return Err(Error::InvalidKey);
		}
		self.stash.push(BatchWrite::Delete(Bytes::copy_from_slice(key)));
		Ok(())
	}

	pub fn rollback(&mut self) {
		self.stash.clear();
	}

	pub fn commit(self) -> Result<()> {
		for write in self.stash {
			match write {
				BatchWrite::Put(k, v) => self.store.put(&k, Some(v))?,
				BatchWrite::Delete(k) => self.store.put(&k, None)?,
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_key_is_invalid() {
		let store = ShardedStore::new();
		assert!(matches!(store.get(b""), Err(Error::InvalidKey)));
		assert!(matches!(store.put(b"", Some(Bytes::new())), Err(Error::InvalidKey)));
	}

	#[test]
	fn put_get_delete_roundtrip() {
		let store = ShardedStore::new();
		store.put(b"key", Some(Bytes::from_static(b"v1"))).unwrap();
		assert_eq!(store.get(b"key").unwrap(), Some(Bytes::from_static(b"v1")));

		store.delete(b"key").unwrap();
		assert_eq!(store.get(b"key").unwrap(), None);
	}

	#[test]
	fn snapshot_restore_roundtrip() {
		let store = ShardedStore::new();
		for (k, v) in [("k1", "v1"), ("k2", "v2"), ("k3", "v3"), ("k4", "v4")] {
			store.put(k.as_bytes(), Some(Bytes::copy_from_slice(v.as_bytes()))).unwrap();
		}

		let mut buf = Vec::new();
		store.snapshot(&mut buf).unwrap();
		assert!((30..=50).contains(&buf.len()), "snapshot size {} out of expected range", buf.len());

		store.delete(b"k1").unwrap();
		store.delete(b"k3").unwrap();

		let fresh = ShardedStore::new();
		fresh.restore(&mut &buf[..]).unwrap();

		assert_eq!(fresh.get(b"k1").unwrap(), Some(Bytes::from_static(b"v1")));
		assert_eq!(fresh.get(b"k3").unwrap(), Some(Bytes::from_static(b"v3")));
	}

	#[test]
	fn batch_buffers_until_commit() {
		let store = ShardedStore::new();
		let mut batch = store.begin(true);
		batch.put(b"a", Bytes::from_static(b"1")).unwrap();
		assert_eq!(store.get(b"a").unwrap(), None);
		batch.commit().unwrap();
		assert_eq!(store.get(b"a").unwrap(), Some(Bytes::from_static(b"1")));
	}
}
