//! Reads client commands off the wire. Accepts both the multibulk array
//! form real clients use (`*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n`) and the plain
//! inline form (`GET foo\r\n`) that redis-cli and nc-style testing rely on.

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use crate::error::{Error, Result};

pub struct CommandReader<R> {
	inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> CommandReader<R> {
	pub fn new(inner: R) -> Self {
		CommandReader { inner: BufReader::new(inner) }
	}

	/// Reads one command. Returns `Ok(None)` on a clean EOF between
	/// commands (the connection was closed by the peer).
	pub async fn read_command(&mut self) -> Result<Option<Vec<Bytes>>> {
		let mut line = Vec::new();
		let n = self.read_line(&mut line).await?;
		if n == 0 {
			return Ok(None);
		}

		if line.first() == Some(&b'*') {
			self.read_multibulk(&line).await.map(Some)
		} else {
			Ok(Some(split_inline(&line)))
		}
	}

	async fn read_line(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
		let n = self.inner.read_until(b'\n', buf).await?;
		while buf.last() == Some(&b'\n') || buf.last() == Some(&b'\r') {
			buf.pop();
		}
		Ok(n)
	}

	async fn read_multibulk(&mut self, header: &[u8]) -> Result<Vec<Bytes>> {
		let count = parse_len(&header[1..])?;
		if count < 0 {
			return Ok(vec![]);
		}

		let mut args = Vec::with_capacity(count as usize);
		for _ in 0..count {
			let mut bulk_header = Vec::new();
			let n = self.read_line(&mut bulk_header).await?;
			if n == 0 {
				return Err(Error::Closed);
			}
			if bulk_header.first() != Some(&b'$') {
				return Err(Error::Protocol("expected bulk string header".into()));
			}

			let len = parse_len(&bulk_header[1..])?;
			if len < 0 {
				args.push(Bytes::new());
				continue;
			}

			let mut buf = vec![0u8; len as usize];
			self.inner.read_exact(&mut buf).await?;

			let mut crlf = [0u8; 2];
			self.inner.read_exact(&mut crlf).await?;

			args.push(Bytes::from(buf));
		}

		Ok(args)
	}
}

fn parse_len(bytes: &[u8]) -> Result<i64> {
	std::str::from_utf8(bytes)
		.ok()
		.and_then(|s| s.trim().parse::<i64>().ok())
		.ok_or_else(|| Error::Protocol("invalid length prefix".into()))
}

fn split_inline(line: &[u8]) -> Vec<Bytes> {
	std::str::from_utf8(line)
		.unwrap_or("")
		.split_whitespace()
		.map(|s| Bytes::copy_from_slice(s.as_bytes()))
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn reads_multibulk_command() {
		let data = b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n".to_vec();
		let mut reader = CommandReader::new(&data[..]);
		let cmd = reader.read_command().await.unwrap().unwrap();
		assert_eq!(cmd, vec![Bytes::from_static(b"GET"), Bytes::from_static(b"foo")]);
	}

	#[tokio::test]
	async fn reads_inline_command() {
		let data = b"PING\r\n".to_vec();
		let mut reader = CommandReader::new(&data[..]);
		let cmd = reader.read_command().await.unwrap().unwrap();
		assert_eq!(cmd, vec![Bytes::from_static(b"PING")]);
	}

	#[tokio::test]
	async fn returns_none_on_clean_eof() {
		let data: Vec<u8> = vec![];
		let mut reader = CommandReader::new(&data[..]);
		assert!(reader.read_command().await.unwrap().is_none());
	}
}
