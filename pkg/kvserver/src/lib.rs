//! THE CORE: the replicated command pipeline and FSM bridge described by
//! this workspace's specification — C1 reply encoding, C2 the sharded
//! reference store, C3 the command codec, C4 the handler registry, C5/C6
//! dispatch, C7 the FSM bridge, C9 node identity/bootstrap — plus the
//! built-in command surface and CLI wiring around them.

pub mod bootstrap;
pub mod builtin;
pub mod codec;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod fsm;
pub mod identity;
pub mod kv;
pub mod registry;
pub mod reply;
pub mod server;
