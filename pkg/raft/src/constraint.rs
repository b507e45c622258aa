use crate::proto::LogPosition;

/// Wraps a value that must not be sent over the wire until the paired log
/// position has actually been made durable. `append_entries` returns its
/// response wrapped like this because acking a follower append before the
/// fsync completes would let the leader believe replication happened when
/// it might not survive a crash.
pub struct MatchConstraint<T> {
	value: T,
	pos: LogPosition,
}

impl<T> MatchConstraint<T> {
	pub fn new(value: T, pos: LogPosition) -> Self {
		MatchConstraint { value, pos }
	}

	pub fn position(&self) -> &LogPosition {
		&self.pos
	}

	/// Releases the inner value once the caller has confirmed `pos` is
	/// durable.
	pub fn persisted(self) -> T {
		self.value
	}
}
