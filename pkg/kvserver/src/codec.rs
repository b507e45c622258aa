//! Canonical binary encoding of a `Command` for the consensus log. Encoded
//! as a MessagePack array (`rmp_serde`'s default struct-as-array mode), not
//! a map, so the encoding never depends on hash-map iteration order — the
//! determinism requirement in C3.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
	pub name: String,
	pub args: Vec<Bytes>,
}

impl Command {
	pub fn new(name: impl Into<String>, args: Vec<Bytes>) -> Self {
		Command { name: name.into(), args }
	}
}

pub fn encode(cmd: &Command) -> Result<Vec<u8>> {
	Ok(rmp_serde::to_vec(&(&cmd.name, &cmd.args))?)
}

pub fn decode(bytes: &[u8]) -> Result<Command> {
	let (name, args): (String, Vec<Bytes>) = rmp_serde::from_slice(bytes)?;
	Ok(Command { name, args })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_arbitrary_binary_args() {
		let cmd = Command::new("SET", vec![Bytes::from_static(b"key"), Bytes::from(vec![0u8, 255, 10, 13])]);
		let encoded = encode(&cmd).unwrap();
		let decoded = decode(&encoded).unwrap();
		assert_eq!(cmd, decoded);
	}

	#[test]
	fn encoding_is_deterministic() {
		let cmd = Command::new("GET", vec![Bytes::from_static(b"key")]);
		assert_eq!(encode(&cmd).unwrap(), encode(&cmd).unwrap());
	}
}
