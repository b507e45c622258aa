//! Runtime configuration, mirroring `original_source/config.go`'s `Config`
//! (a `raft.Config` plus a `Sentinel.MasterName` knob) split per the
//! workspace's crate boundaries: `raft::NodeConfig` owns the actual
//! consensus-layer parameters; this struct owns the things unique to the
//! core (local id override, sentinel).

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(150);
pub const DEFAULT_ELECTION_TIMEOUT_MIN: Duration = Duration::from_millis(400);
pub const DEFAULT_ELECTION_TIMEOUT_MAX: Duration = Duration::from_millis(800);

#[derive(Debug, Clone)]
pub struct RaftSettings {
	pub heartbeat_interval: Duration,
	pub election_timeout_min: Duration,
	pub election_timeout_max: Duration,
	/// Explicitly configured node id, taking precedence over `<dir>/node-id`
	/// per `Config.norm`'s "config value wins over file" rule. Empty means
	/// "let C9 fill it in."
	pub local_id: Option<String>,
}

impl Default for RaftSettings {
	fn default() -> Self {
		RaftSettings {
			heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
			election_timeout_min: DEFAULT_ELECTION_TIMEOUT_MIN,
			election_timeout_max: DEFAULT_ELECTION_TIMEOUT_MAX,
			local_id: None,
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct SentinelSettings {
	/// Non-empty enables sentinel command handling.
	pub master_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
	pub dir: PathBuf,
	pub listen_addr: String,
	pub raft: RaftSettings,
	pub sentinel: SentinelSettings,
}

impl Config {
	pub fn new(dir: PathBuf, listen_addr: String) -> Self {
		Config { dir, listen_addr, raft: RaftSettings::default(), sentinel: SentinelSettings::default() }
	}
}
