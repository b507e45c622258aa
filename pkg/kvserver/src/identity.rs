//! Node identity (C9, first half). Grounded on `original_source/util.go`'s
//! `normNodeID`: prefer an explicitly configured id, fall back to
//! `<dir>/node-id`, generate and persist a fresh UUID if neither exists.
//!
//! The consensus layer's `ServerId` is a `u64` (a perf-motivated choice
//! carried over from the teacher, not a semantic one — see DESIGN.md), so
//! the UUID this module produces is the node's externally visible identity
//! (what `INFO` reports, what `raftbootstrap` exchanges) while its
//! consensus-internal id is derived by hashing the UUID with the same
//! FNV-1a function `original_source/util.go` already uses for key sharding.
//! Two nodes never collide on this in practice, and if they somehow did the
//! consensus layer would simply fail to reach agreement — loud, not silent.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use uuid::Uuid;

use crate::error::{Error, Result};

pub const NODE_ID_FILE: &str = "node-id";

fn fnv64a(b: &[u8]) -> u64 {
	const OFFSET: u64 = 14695981039346656037;
	const PRIME: u64 = 1099511628211;
	let mut h = OFFSET;
	for &c in b {
		h ^= c as u64;
		h = h.wrapping_mul(PRIME);
	}
	h
}

pub fn derive_server_id(node_id: &str) -> u64 {
	fnv64a(node_id.as_bytes())
}

/// Loads, validates, or creates the node's UUID identity under `dir`.
/// `configured` takes precedence over the file, matching `Config.norm`'s
/// "explicit config value wins" rule.
pub fn load_or_create(dir: &Path, configured: Option<&str>) -> Result<String> {
	if let Some(id) = configured {
		let id = normalize(id);
		if id.is_empty() {
			return load_or_create(dir, None);
		}
		return validate(&id);
	}

	let path = dir.join(NODE_ID_FILE);
	match fs::read_to_string(&path) {
		Ok(raw) => validate(&normalize(&raw)),
		Err(err) if err.kind() == io::ErrorKind::NotFound => create(&path),
		Err(err) => Err(Error::Io(err)),
	}
}

fn normalize(raw: &str) -> String {
	raw.trim().to_ascii_lowercase()
}

fn validate(id: &str) -> Result<String> {
	Uuid::parse_str(id).map_err(|err| Error::Other(format!("invalid node id '{}': {}", id, err)))?;
	Ok(id.to_string())
}

fn create(path: &Path) -> Result<String> {
	let id = Uuid::new_v4().to_string();
	fs::write(path, &id)?;
	fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
	Ok(id)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn creates_and_persists_a_uuid_on_first_boot() {
		let dir = tempfile::tempdir().unwrap();
		let id = load_or_create(dir.path(), None).unwrap();
		assert!(uuid::Uuid::parse_str(&id).is_ok());

		let id2 = load_or_create(dir.path(), None).unwrap();
		assert_eq!(id, id2);
	}

	#[test]
	fn configured_id_takes_precedence_over_file() {
		let dir = tempfile::tempdir().unwrap();
		let _ = load_or_create(dir.path(), None).unwrap();

		let configured = "11111111-1111-1111-1111-111111111111";
		let id = load_or_create(dir.path(), Some(configured)).unwrap();
		assert_eq!(id, configured);
	}

	#[test]
	fn rejects_invalid_uuid() {
		let dir = tempfile::tempdir().unwrap();
		assert!(load_or_create(dir.path(), Some("not-a-uuid")).is_err());
	}
}
