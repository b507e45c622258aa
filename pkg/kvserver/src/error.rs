#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),

	#[error("codec error: {0}")]
	Codec(#[from] rmp_serde::encode::Error),

	#[error("decode error: {0}")]
	Decode(#[from] rmp_serde::decode::Error),

	#[error("invalid key")]
	InvalidKey,

	#[error("unknown command '{0}'")]
	UnknownCommand(String),

	#[error("node is not the leader")]
	NotLeader,

	#[error("{0}")]
	Other(String),
}

impl From<&str> for Error {
	fn from(s: &str) -> Self {
		Error::Other(s.to_string())
	}
}

impl From<String> for Error {
	fn from(s: String) -> Self {
		Error::Other(s)
	}
}

pub type Result<T> = std::result::Result<T, Error>;
