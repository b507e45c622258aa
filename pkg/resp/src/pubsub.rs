//! A single-writer publish/subscribe broker: a topic-to-subscribers map
//! protected by one lock, grounded on `redeo.NewPubSubBroker()` (used by
//! the original server's sentinel support for master-change notifications).

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

pub struct Broker {
	topics: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Bytes>>>>,
}

impl Broker {
	pub fn new() -> Self {
		Broker { topics: Mutex::new(HashMap::new()) }
	}

	pub fn subscribe(&self, topic: &str) -> mpsc::UnboundedReceiver<Bytes> {
		let (tx, rx) = mpsc::unbounded_channel();
		self.topics.lock().entry(topic.to_string()).or_default().push(tx);
		rx
	}

	/// Publishes `message` to every live subscriber of `topic`, dropping any
	/// subscriber whose receiver has gone away, and returns how many
	/// subscribers received it.
	pub fn publish(&self, topic: &str, message: Bytes) -> usize {
		let mut topics = self.topics.lock();
		let Some(subs) = topics.get_mut(topic) else {
			return 0;
		};

		let mut delivered = 0;
		subs.retain(|tx| {
			let ok = tx.send(message.clone()).is_ok();
			delivered += ok as usize;
			ok
		});

		delivered
	}
}

impl Default for Broker {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn publishes_to_subscribers() {
		let broker = Broker::new();
		let mut rx = broker.subscribe("news");

		let delivered = broker.publish("news", Bytes::from_static(b"hello"));
		assert_eq!(delivered, 1);
		assert_eq!(rx.recv().await.unwrap(), Bytes::from_static(b"hello"));
	}

	#[test]
	fn publish_with_no_subscribers_is_zero() {
		let broker = Broker::new();
		assert_eq!(broker.publish("nobody", Bytes::from_static(b"x")), 0);
	}
}
