//! The RESP line-protocol collaborator: reading commands off a socket,
//! writing typed replies, and a small pub/sub broker primitive. Deliberately
//! free of any command dispatch or consensus logic — that lives in
//! `kvserver`.

pub mod conn;
pub mod error;
pub mod frame;
pub mod pubsub;
pub mod writer;

pub use conn::Connection;
pub use error::{Error, Result};
pub use frame::CommandReader;
pub use pubsub::Broker;
pub use writer::FrameWriter;
