//! Glues a `CommandReader` and a raw socket half together for the common
//! case of a TCP client connection.

use bytes::Bytes;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::net::TcpStream;

use crate::error::Result;
use crate::frame::CommandReader;

pub struct Connection {
	reader: CommandReader<tokio::io::ReadHalf<TcpStream>>,
	writer: WriteHalf<TcpStream>,
}

impl Connection {
	pub fn new(stream: TcpStream) -> Self {
		let (read_half, writer) = tokio::io::split(stream);
		Connection { reader: CommandReader::new(read_half), writer }
	}

	pub async fn read_command(&mut self) -> Result<Option<Vec<Bytes>>> {
		self.reader.read_command().await
	}

	pub async fn write_reply(&mut self, reply: &[u8]) -> Result<()> {
		self.writer.write_all(reply).await?;
		Ok(())
	}
}
