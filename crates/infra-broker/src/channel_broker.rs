// In-process broker backed by per-topic subscriber queues.
//
// Implements the MessageBroker port for local operation and integration
// testing. Each subscription gets its own unbounded queue per topic;
// sends fan out one copy per live subscription, preserving per-topic
// order within each queue. Dead subscriptions are pruned on the next
// send to their topic.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use sluice_core::port::{Ack, BrokerError, Delivery, MessageBroker, Subscription};

struct SubscriberEntry {
    group: String,
    tx: mpsc::UnboundedSender<Delivery>,
}

/// In-process message broker.
///
/// Group identifiers are subscription identity, not balancing units:
/// every live subscription to a topic receives its own copy of each
/// message. That is all the relay engine relies on; partition-aware
/// balancing belongs to a networked adapter.
pub struct ChannelBroker {
    topics: DashMap<String, Vec<SubscriberEntry>>,
    /// Total `send` calls
    publish_count: AtomicUsize,
    /// Sends that found no live subscription
    unrouted_count: AtomicUsize,
    acked: Arc<AtomicUsize>,
}

impl ChannelBroker {
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
            publish_count: AtomicUsize::new(0),
            unrouted_count: AtomicUsize::new(0),
            acked: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Messages sent so far (including unrouted ones)
    pub fn publish_count(&self) -> usize {
        self.publish_count.load(Ordering::Relaxed)
    }

    /// Sends that had nobody to deliver to
    pub fn unrouted_count(&self) -> usize {
        self.unrouted_count.load(Ordering::Relaxed)
    }

    /// Deliveries acknowledged by subscribers
    pub fn acked_count(&self) -> usize {
        self.acked.load(Ordering::SeqCst)
    }

    /// Live subscriptions for a topic (diagnostics)
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|subs| subs.iter().filter(|s| !s.tx.is_closed()).count())
            .unwrap_or(0)
    }
}

impl Default for ChannelBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBroker for ChannelBroker {
    async fn subscribe(
        &self,
        group: &str,
        topics: &[String],
    ) -> Result<Subscription, BrokerError> {
        if topics.is_empty() {
            return Err(BrokerError::SubscribeFailed(
                "at least one topic is required".to_string(),
            ));
        }

        let (tx, subscription) = Subscription::channel();
        for topic in topics {
            self.topics
                .entry(topic.clone())
                .or_default()
                .push(SubscriberEntry {
                    group: group.to_string(),
                    tx: tx.clone(),
                });
        }
        debug!(group = %group, topics = ?topics, "Subscription registered");
        Ok(subscription)
    }

    async fn send(&self, topic: &str, payload: Bytes) -> Result<(), BrokerError> {
        self.publish_count.fetch_add(1, Ordering::Relaxed);

        let mut routed = false;
        if let Some(mut subs) = self.topics.get_mut(topic) {
            // Prune subscriptions whose receiver is gone
            subs.retain(|entry| !entry.tx.is_closed());

            for entry in subs.iter() {
                let acked = Arc::clone(&self.acked);
                let delivery = Delivery {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                    ack: Ack::new(move || {
                        acked.fetch_add(1, Ordering::SeqCst);
                    }),
                };
                if entry.tx.send(delivery).is_ok() {
                    routed = true;
                } else {
                    debug!(group = %entry.group, topic = %topic, "Subscriber gone, dropping copy");
                }
            }
        }

        if !routed {
            self.unrouted_count.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}
