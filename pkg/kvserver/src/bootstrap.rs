//! `raftbootstrap <addr>...` (C9, second half). For each peer address,
//! dials a short-lived connection, issues `INFO`, and parses the reply for
//! `node_id:`/`tcp_addr:` lines — grounded on `original_source/util.go`'s
//! `retrieveServerConfig`/`serverInfo`.

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use uuid::Uuid;

use crate::controller::PeerInfo;
use crate::error::{Error, Result};

/// Connects to `addr`, sends `INFO`, and returns the peer's validated
/// `(node_id, tcp_addr)` pair.
pub async fn retrieve_peer_info(addr: &str) -> Result<PeerInfo> {
	let stream = TcpStream::connect(addr).await.map_err(|err| bootstrap_err(addr, err))?;
	let mut reader = BufReader::new(stream);

	reader.write_all(b"*1\r\n$4\r\nINFO\r\n").await.map_err(|err| bootstrap_err(addr, err))?;

	let raw = read_bulk_reply(&mut reader).await.map_err(|err| bootstrap_err(addr, err))?;
	let info = ServerInfo(&raw);

	let node_id = info.node_id().map_err(|err| bootstrap_err(addr, err))?;
	let tcp_addr = info.tcp_addr().map_err(|err| bootstrap_err(addr, err))?;

	Ok(PeerInfo { id: crate::identity::derive_server_id(&node_id), address: tcp_addr })
}

fn bootstrap_err(addr: &str, detail: impl std::fmt::Display) -> Error {
	Error::Other(format!("unable to retrieve info from {}: {}", addr, detail))
}

/// Reads one RESP reply off `reader`, expecting a bulk string (what `INFO`
/// replies with); any other reply type or a protocol error is surfaced as
/// an error.
async fn read_bulk_reply<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> std::result::Result<Vec<u8>, String> {
	let marker = read_u8(reader).await?;
	let line = read_line(reader).await?;

	match marker {
		b'$' => {
			let len: i64 = line.parse().map_err(|_| "malformed bulk length".to_string())?;
			if len < 0 {
				return Err("unexpected null reply".to_string());
			}
			let mut buf = vec![0u8; len as usize + 2];
			reader.read_exact(&mut buf).await.map_err(|e| e.to_string())?;
			buf.truncate(len as usize);
			Ok(buf)
		}
		b'-' => Err(format!("server error: {}", line)),
		other => Err(format!("unexpected reply type '{}'", other as char)),
	}
}

async fn read_u8<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> std::result::Result<u8, String> {
	let mut byte = [0u8; 1];
	reader.read_exact(&mut byte).await.map_err(|e| e.to_string())?;
	Ok(byte[0])
}

async fn read_line<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> std::result::Result<String, String> {
	let mut line = Vec::new();
	let mut byte = [0u8; 1];
	loop {
		reader.read_exact(&mut byte).await.map_err(|e| e.to_string())?;
		if byte[0] == b'\n' {
			if line.last() == Some(&b'\r') {
				line.pop();
			}
			break;
		}
		line.push(byte[0]);
	}
	String::from_utf8(line).map_err(|e| e.to_string())
}

struct ServerInfo<'a>(&'a [u8]);

impl<'a> ServerInfo<'a> {
	fn node_id(&self) -> std::result::Result<String, String> {
		let id = self.field("node_id")?;
		Uuid::parse_str(&id).map_err(|e| e.to_string())?;
		Ok(id)
	}

	fn tcp_addr(&self) -> std::result::Result<String, String> {
		let addr = self.field("tcp_addr")?;
		if addr.rsplit_once(':').is_none() {
			return Err(format!("malformed tcp_addr '{}'", addr));
		}
		Ok(addr)
	}

	fn field(&self, key: &str) -> std::result::Result<String, String> {
		let pivot = format!("\n{}:", key);
		let text = String::from_utf8_lossy(self.0);
		let start = text.find(&pivot).ok_or_else(|| format!("missing '{}' field", key))? + pivot.len();
		let rest = &text[start..];
		let end = rest.find('\n').unwrap_or(rest.len());
		Ok(rest[..end].trim().to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_node_id_and_tcp_addr() {
		let body = b"# Server\nnode_id:11111111-1111-1111-1111-111111111111\ntcp_addr:127.0.0.1:7000\n".to_vec();
		let info = ServerInfo(&body);
		assert_eq!(info.node_id().unwrap(), "11111111-1111-1111-1111-111111111111");
		assert_eq!(info.tcp_addr().unwrap(), "127.0.0.1:7000");
	}

	#[test]
	fn rejects_missing_field() {
		let body = b"# Server\nnode_id:11111111-1111-1111-1111-111111111111\n".to_vec();
		let info = ServerInfo(&body);
		assert!(info.tcp_addr().is_err());
	}
}
