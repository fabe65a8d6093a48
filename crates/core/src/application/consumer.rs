// Inbound Bridge - broker topics relayed to a destination mailbox
//
// One relay task per consumer. A delivery is acknowledged only after its
// relay settles: success, or bounded retries exhausted (logged and
// dropped). That keeps the subscription at-least-once without ever
// wedging it behind a dead destination.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};

use crate::application::backoff::{seed_from, BackoffPolicy, RetryDecision};
use crate::application::constants::DEFAULT_RELAY_TIMEOUT;
use crate::application::mailbox::Address;
use crate::application::shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
use crate::domain::WorkItem;
use crate::port::{BrokerError, Delivery, MessageBroker, Subscription, TimeProvider};

/// Consumer subscription identity and destination.
///
/// Immutable once the subscription starts. `relay_target: None` is the
/// degenerate no-op sink: messages are consumed and acknowledged, never
/// relayed. Retargeting means stopping this consumer and starting another
/// (or rebinding the valve downstream).
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub group_id: String,
    pub broker_url: String,
    pub topics: Vec<String>,
    pub relay_target: Option<Address<WorkItem>>,
}

/// Counters shared between the relay task and its handle, so a report can
/// be assembled even when the task is aborted at the drain deadline.
#[derive(Default)]
struct ConsumerStats {
    relayed: AtomicU64,
    relay_failures: AtomicU64,
    acked: AtomicU64,
    abandoned: AtomicU64,
}

/// Final accounting for a stopped consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerReport {
    pub relayed: u64,
    pub relay_failures: u64,
    pub acked: u64,
    pub abandoned: u64,
}

/// Handle to one running consumer
pub struct ConsumerHandle {
    id: String,
    shutdown: ShutdownSender,
    stats: Arc<ConsumerStats>,
    join: JoinHandle<()>,
}

impl ConsumerHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stop the consumer: signal shutdown, let in-flight work drain for
    /// up to `grace`, then abandon whatever remains and report it.
    pub async fn stop(mut self, grace: Duration) -> ConsumerReport {
        self.shutdown.shutdown();
        if timeout(grace, &mut self.join).await.is_err() {
            warn!(consumer = %self.id, "Drain grace period expired, aborting");
            self.join.abort();
        }
        let report = ConsumerReport {
            relayed: self.stats.relayed.load(Ordering::SeqCst),
            relay_failures: self.stats.relay_failures.load(Ordering::SeqCst),
            acked: self.stats.acked.load(Ordering::SeqCst),
            abandoned: self.stats.abandoned.load(Ordering::SeqCst),
        };
        info!(
            consumer = %self.id,
            relayed = report.relayed,
            relay_failures = report.relay_failures,
            abandoned = report.abandoned,
            "Consumer stopped"
        );
        report
    }
}

/// Consumer system: starts independent relay tasks against one broker.
/// Multiple consumers (distinct groups or topics) run without
/// interference.
pub struct ConsumerSystem {
    broker: Arc<dyn MessageBroker>,
    time_provider: Arc<dyn TimeProvider>,
    backoff: BackoffPolicy,
    relay_timeout: Duration,
}

impl ConsumerSystem {
    pub fn new(broker: Arc<dyn MessageBroker>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            broker,
            time_provider,
            backoff: BackoffPolicy::default(),
            relay_timeout: DEFAULT_RELAY_TIMEOUT,
        }
    }

    /// Override retry tuning (tests shrink the delays)
    pub fn with_backoff(mut self, backoff: BackoffPolicy, relay_timeout: Duration) -> Self {
        self.backoff = backoff;
        self.relay_timeout = relay_timeout;
        self
    }

    /// Subscribe and start relaying.
    ///
    /// # Errors
    /// - BrokerError::SubscribeFailed if the subscription cannot be set up
    pub async fn start(&self, config: ConsumerConfig) -> Result<ConsumerHandle, BrokerError> {
        let subscription = self
            .broker
            .subscribe(&config.group_id, &config.topics)
            .await?;

        let id = format!("{}-{}", config.group_id, uuid::Uuid::new_v4());
        let stats = Arc::new(ConsumerStats::default());
        let (shutdown_tx, shutdown_rx) = shutdown_channel();

        info!(
            consumer = %id,
            group = %config.group_id,
            topics = ?config.topics,
            broker = %config.broker_url,
            sink = config.relay_target.is_none(),
            "Consumer subscribed"
        );

        let relay = RelayTask {
            id: id.clone(),
            config,
            subscription,
            stats: Arc::clone(&stats),
            backoff: self.backoff.clone(),
            relay_timeout: self.relay_timeout,
            time_provider: Arc::clone(&self.time_provider),
            shutdown: shutdown_rx,
        };
        let join = tokio::spawn(relay.run());

        Ok(ConsumerHandle {
            id,
            shutdown: shutdown_tx,
            stats,
            join,
        })
    }
}

struct RelayTask {
    id: String,
    config: ConsumerConfig,
    subscription: Subscription,
    stats: Arc<ConsumerStats>,
    backoff: BackoffPolicy,
    relay_timeout: Duration,
    time_provider: Arc<dyn TimeProvider>,
    shutdown: ShutdownToken,
}

impl RelayTask {
    async fn run(mut self) {
        loop {
            tokio::select! {
                // Shutdown first: once signalled, queued deliveries are
                // abandoned (and reported) instead of half-processed.
                biased;
                _ = self.shutdown.wait() => break,
                delivery = self.subscription.next() => match delivery {
                    Some(delivery) => self.handle_delivery(delivery).await,
                    None => {
                        info!(consumer = %self.id, "Broker closed the subscription");
                        break;
                    }
                },
            }
        }
        self.abandon_queued();
    }

    /// Relay one delivery, then acknowledge it.
    ///
    /// Per-partition order is preserved because deliveries are handled
    /// strictly one after another on this task.
    async fn handle_delivery(&self, delivery: Delivery) {
        let Some(target) = &self.config.relay_target else {
            // No-op sink: consume and acknowledge only
            delivery.ack.ack();
            self.stats.acked.fetch_add(1, Ordering::SeqCst);
            return;
        };

        let seed = seed_from(&self.config.group_id);
        let mut attempt: u32 = 0;
        loop {
            let item = WorkItem::new(delivery.payload.clone(), self.time_provider.now_millis());
            let relayed = match timeout(self.relay_timeout, target.send(item)).await {
                Ok(Ok(())) => true,
                Ok(Err(_)) | Err(_) => false,
            };
            if relayed {
                self.stats.relayed.fetch_add(1, Ordering::SeqCst);
                break;
            }

            attempt += 1;
            match self.backoff.decide(attempt, seed) {
                RetryDecision::Retry(delay) => {
                    warn!(
                        consumer = %self.id,
                        topic = %delivery.topic,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Relay failed, retrying"
                    );
                    sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    // At-least-once, bounded: acknowledge and drop with a
                    // diagnostic instead of wedging the subscription.
                    error!(
                        consumer = %self.id,
                        topic = %delivery.topic,
                        attempts = attempt,
                        "RelayFailure: destination unreachable, dropping message"
                    );
                    self.stats.relay_failures.fetch_add(1, Ordering::SeqCst);
                    break;
                }
            }
        }

        delivery.ack.ack();
        self.stats.acked.fetch_add(1, Ordering::SeqCst);
    }

    /// Count deliveries still queued at shutdown; they are dropped, but
    /// reported rather than silently discarded.
    fn abandon_queued(&mut self) {
        let mut abandoned = 0u64;
        while self.subscription.try_next().is_some() {
            abandoned += 1;
        }
        if abandoned > 0 {
            warn!(
                consumer = %self.id,
                abandoned = abandoned,
                "Abandoning queued deliveries at shutdown"
            );
            self.stats.abandoned.fetch_add(abandoned, Ordering::SeqCst);
        }
    }
}
