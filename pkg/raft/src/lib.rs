//! A minimal single-group Raft implementation: leader election, log
//! replication, and cluster membership changes over a plain TCP RPC
//! transport.
//!
//! This crate is consumed through [`Node`] and the [`StateMachine`] trait —
//! everything else here is exported mainly so that `kvserver`'s tests can
//! construct a [`ConsensusModule`] directly without going over the network.

pub mod config_state;
pub mod consensus;
pub mod constraint;
pub mod error;
pub mod log;
pub mod node;
pub mod proto;
pub mod rpc;
pub mod state;
pub mod state_machine;

pub use consensus::{ConsensusModule, ProposalStatus, ProposeError, Tick};
pub use error::{Error, Result};
pub use node::{Node, NodeConfig, PeerInfo};
pub use proto::{ConfigChange, ServerId};
pub use state_machine::StateMachine;
