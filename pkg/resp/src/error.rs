#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),

	#[error("protocol error: {0}")]
	Protocol(String),

	#[error("connection closed")]
	Closed,
}

pub type Result<T> = std::result::Result<T, Error>;
