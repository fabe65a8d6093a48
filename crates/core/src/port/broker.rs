// Message Broker Port
// Abstraction over the external broker: topic subscription and sends.
// Connection management and authentication live behind the adapter.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

/// Broker errors
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),
}

/// Acknowledgement token for a single delivery.
///
/// Consuming the token tells the broker the message is done; dropping it
/// without acking leaves the message unacknowledged (adapters may then
/// redeliver, which is what keeps relay semantics at-least-once).
pub struct Ack(Option<Box<dyn FnOnce() + Send>>);

impl Ack {
    pub fn new(on_ack: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(on_ack)))
    }

    /// An ack that goes nowhere (for mocks and degenerate wiring)
    pub fn noop() -> Self {
        Self(None)
    }

    /// Acknowledge the delivery to the broker
    pub fn ack(mut self) {
        if let Some(on_ack) = self.0.take() {
            on_ack();
        }
    }
}

impl fmt::Debug for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Ack").finish()
    }
}

/// One message handed to a subscriber, with its ack token
#[derive(Debug)]
pub struct Delivery {
    pub topic: String,
    pub payload: Bytes,
    pub ack: Ack,
}

/// Ordered stream of deliveries for one subscription.
///
/// Adapters push deliveries into the sending half; per-topic order of
/// pushes is the order `next` observes.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl Subscription {
    /// Create a subscription and its feeding half (for adapters)
    pub fn channel() -> (mpsc::UnboundedSender<Delivery>, Subscription) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Subscription { rx })
    }

    /// Await the next delivery; `None` when the broker side is gone
    pub async fn next(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    /// Non-blocking poll for a queued delivery (drain accounting)
    pub fn try_next(&mut self) -> Option<Delivery> {
        self.rx.try_recv().ok()
    }
}

/// Message broker port
///
/// Implementations:
/// - ChannelBroker (infra-broker): in-process topic queues
/// - MockBroker (below): scripted behavior for unit tests
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Subscribe a consumer group to one or more topics.
    ///
    /// # Errors
    /// - BrokerError::SubscribeFailed if the subscription cannot be set up
    async fn subscribe(&self, group: &str, topics: &[String])
        -> Result<Subscription, BrokerError>;

    /// Send one message to a topic.
    ///
    /// # Errors
    /// - BrokerError::Unavailable on (possibly transient) connectivity failure
    async fn send(&self, topic: &str, payload: Bytes) -> Result<(), BrokerError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    /// Mock send behavior
    #[derive(Debug, Clone)]
    pub enum MockSendBehavior {
        /// Every send succeeds
        Success,
        /// The first N send attempts fail, the rest succeed
        FailFirst(usize),
        /// The first N send attempts succeed, the rest fail
        FailAfter(usize),
        /// Every send fails
        AlwaysFail,
    }

    /// Mock broker for unit tests: records sends in order (with the tokio
    /// clock, so paced tests can run under a paused runtime) and lets tests
    /// push deliveries into subscriptions by hand.
    pub struct MockBroker {
        behavior: Mutex<MockSendBehavior>,
        attempts: AtomicUsize,
        sent: Mutex<Vec<(String, Bytes, Instant)>>,
        subscribers: Mutex<Vec<mpsc::UnboundedSender<Delivery>>>,
        acked: Arc<AtomicUsize>,
    }

    impl MockBroker {
        pub fn new() -> Self {
            Self::with_behavior(MockSendBehavior::Success)
        }

        pub fn with_behavior(behavior: MockSendBehavior) -> Self {
            Self {
                behavior: Mutex::new(behavior),
                attempts: AtomicUsize::new(0),
                sent: Mutex::new(Vec::new()),
                subscribers: Mutex::new(Vec::new()),
                acked: Arc::new(AtomicUsize::new(0)),
            }
        }

        /// Push a delivery to every open subscription
        pub fn push_delivery(&self, topic: &str, payload: Bytes) {
            let acked = Arc::clone(&self.acked);
            let subs = self.subscribers.lock().unwrap();
            for tx in subs.iter() {
                let acked = Arc::clone(&acked);
                let _ = tx.send(Delivery {
                    topic: topic.to_string(),
                    payload: payload.clone(),
                    ack: Ack::new(move || {
                        acked.fetch_add(1, Ordering::SeqCst);
                    }),
                });
            }
        }

        /// Messages that were sent successfully, in send order
        pub fn sent(&self) -> Vec<(String, Bytes)> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(t, p, _)| (t.clone(), p.clone()))
                .collect()
        }

        /// Send instants (tokio clock) for pacing assertions
        pub fn sent_instants(&self) -> Vec<Instant> {
            self.sent.lock().unwrap().iter().map(|(_, _, i)| *i).collect()
        }

        pub fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }

        /// Total send attempts, including failed ones
        pub fn attempt_count(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }

        pub fn acked_count(&self) -> usize {
            self.acked.load(Ordering::SeqCst)
        }
    }

    impl Default for MockBroker {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl MessageBroker for MockBroker {
        async fn subscribe(
            &self,
            _group: &str,
            _topics: &[String],
        ) -> Result<Subscription, BrokerError> {
            let (tx, sub) = Subscription::channel();
            self.subscribers.lock().unwrap().push(tx);
            Ok(sub)
        }

        async fn send(&self, topic: &str, payload: Bytes) -> Result<(), BrokerError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            let behavior = self.behavior.lock().unwrap().clone();

            let fail = match behavior {
                MockSendBehavior::Success => false,
                MockSendBehavior::FailFirst(n) => attempt < n,
                MockSendBehavior::FailAfter(n) => attempt >= n,
                MockSendBehavior::AlwaysFail => true,
            };
            if fail {
                return Err(BrokerError::Unavailable("mock send failure".to_string()));
            }

            self.sent
                .lock()
                .unwrap()
                .push((topic.to_string(), payload, Instant::now()));
            Ok(())
        }
    }
}
