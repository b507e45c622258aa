//! TCP transport for Raft RPCs. Each request/response pair is a single
//! varint-length-prefixed, MessagePack-encoded frame on its own connection —
//! simple rather than efficient, since pipelining a handful of peer RPCs a
//! second is not a bottleneck for this workspace.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{Error, Result};
use crate::proto::{RpcRequest, RpcResponse};

async fn read_varint(stream: &mut TcpStream) -> Result<u64> {
	let mut value: u64 = 0;
	let mut shift = 0u32;

	loop {
		let byte = stream.read_u8().await?;
		value |= ((byte & 0x7f) as u64) << shift;
		if byte & 0x80 == 0 {
			break;
		}
		shift += 7;
		if shift >= 64 {
			return Err(Error::Rpc("varint too long".into()));
		}
	}

	Ok(value)
}

fn write_varint(mut value: u64, out: &mut Vec<u8>) {
	loop {
		let byte = (value & 0x7f) as u8;
		value >>= 7;
		if value == 0 {
			out.push(byte);
			break;
		}
		out.push(byte | 0x80);
	}
}

async fn write_frame<T: serde::Serialize>(stream: &mut TcpStream, value: &T) -> Result<()> {
	let encoded = rmp_serde::to_vec(value)?;
	let mut framed = Vec::with_capacity(encoded.len() + 10);
	write_varint(encoded.len() as u64, &mut framed);
	framed.extend_from_slice(&encoded);
	stream.write_all(&framed).await?;
	Ok(())
}

async fn read_frame<T: serde::de::DeserializeOwned>(stream: &mut TcpStream) -> Result<T> {
	let len = read_varint(stream).await?;
	let mut buf = vec![0u8; len as usize];
	stream.read_exact(&mut buf).await?;
	Ok(rmp_serde::from_slice(&buf)?)
}

/// A single outbound call to a peer's RPC address. A fresh connection is
/// opened for every call — peers are addressed infrequently enough (on the
/// order of the heartbeat interval) that connection reuse is not worth the
/// extra bookkeeping here.
pub async fn call(addr: &str, req: RpcRequest) -> Result<RpcResponse> {
	let addr: SocketAddr = addr.parse().map_err(|_| Error::Rpc(format!("invalid peer address: {}", addr)))?;
	let mut stream = TcpStream::connect(addr).await?;
	write_frame(&mut stream, &req).await?;
	read_frame(&mut stream).await
}

/// Runs the server side of the transport: accepts connections on `listener`
/// forever, handing each request off to `handler`.
pub async fn serve<F, Fut>(listener: TcpListener, handler: Arc<F>)
where
	F: Fn(RpcRequest) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = RpcResponse> + Send + 'static,
{
	loop {
		let (mut stream, _peer) = match listener.accept().await {
			Ok(v) => v,
			Err(err) => {
				tracing::warn!(?err, "failed to accept rpc connection");
				continue;
			}
		};

		let handler = handler.clone();

		tokio::spawn(async move {
			let req: RpcRequest = match read_frame(&mut stream).await {
				Ok(v) => v,
				Err(err) => {
					tracing::debug!(?err, "failed to read rpc request");
					return;
				}
			};

			let resp = handler(req).await;

			if let Err(err) = write_frame(&mut stream, &resp).await {
				tracing::debug!(?err, "failed to write rpc response");
			}
		});
	}
}
