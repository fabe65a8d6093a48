// Outbound Bridge - throughput-capped batch publisher
//
// One task per named producer. Publish calls against the same name are
// queued on the producer's mailbox, so batches never interleave and
// per-producer send order is exact. Pacing suspends between sends rather
// than batching-and-sleeping: a mid-batch failure always leaves a known
// offset.

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::application::backoff::{seed_from, BackoffPolicy, RetryDecision};
use crate::application::constants::{DEFAULT_MAILBOX_CAPACITY, PUBLISH_PACING_WINDOW};
use crate::application::mailbox::{mailbox, Address, Mailbox};
use crate::application::registry::{RegistryError, SharedRegistry};
use crate::application::shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
use crate::error::{EngineError, Result};
use crate::port::{BrokerError, MessageBroker};

/// Producer identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerConfig {
    pub broker_url: String,
    /// Unique per logical publisher instance
    pub producer_name: String,
}

/// One ordered batch publish at a capped throughput
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub topic: String,
    pub messages: Vec<Bytes>,
    /// Pacing cap in messages per second
    pub throughput: u32,
}

/// Successful publish accounting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub sent: usize,
    pub total: usize,
}

/// Publish errors. Partial progress is always reported: `sent` counts the
/// messages the broker accepted before the failure.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Invalid publish request: {0}")]
    Configuration(String),

    #[error("Broker unavailable after {sent} of {total} messages: {source}")]
    BrokerUnavailable {
        sent: usize,
        total: usize,
        #[source]
        source: BrokerError,
    },

    #[error("Producer stopped before the batch completed")]
    Closed,
}

struct PublishCommand {
    request: PublishRequest,
    reply: oneshot::Sender<std::result::Result<PublishReceipt, PublishError>>,
}

/// Producer system: owns one paced publisher task per registered name
pub struct ProducerSystem {
    broker: Arc<dyn MessageBroker>,
    backoff: BackoffPolicy,
    producers: SharedRegistry<Address<PublishCommand>>,
    shutdown_tx: ShutdownSender,
    joins: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ProducerSystem {
    pub fn new(broker: Arc<dyn MessageBroker>) -> Self {
        let (shutdown_tx, _) = shutdown_channel();
        Self {
            broker,
            backoff: BackoffPolicy::default(),
            producers: SharedRegistry::new(),
            shutdown_tx,
            joins: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Override retry tuning (tests shrink the delays)
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Start a named producer.
    ///
    /// # Errors
    /// - RegistryError::NameCollision if the name is already in use
    pub fn start(&self, config: ProducerConfig) -> Result<()> {
        let (addr, mb) = mailbox(DEFAULT_MAILBOX_CAPACITY);
        self.producers.register(&config.producer_name, addr)?;

        info!(
            producer = %config.producer_name,
            broker = %config.broker_url,
            "Producer started"
        );

        let task = ProducerTask {
            name: config.producer_name,
            broker: Arc::clone(&self.broker),
            backoff: self.backoff.clone(),
            mailbox: mb,
            shutdown: self.shutdown_tx.token(),
        };
        let join = tokio::spawn(task.run());
        self.joins
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(join);
        Ok(())
    }

    /// Publish an ordered batch through a named producer, pacing sends to
    /// at most `request.throughput` messages per second. Concurrent calls
    /// against the same name are serialized, never interleaved.
    ///
    /// # Errors
    /// - RegistryError::LookupFailure for an unknown producer name
    /// - PublishError::Configuration for a zero throughput cap
    /// - PublishError::BrokerUnavailable after retries, with partial count
    pub async fn publish(&self, producer_name: &str, request: PublishRequest) -> Result<PublishReceipt> {
        let producer = self.producers.lookup(producer_name)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        producer
            .send(PublishCommand {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::Publish(PublishError::Closed))?;
        reply_rx
            .await
            .map_err(|_| EngineError::Publish(PublishError::Closed))?
            .map_err(EngineError::Publish)
    }

    /// Stop all producers. In-flight batches run to completion; queued
    /// requests are refused with `PublishError::Closed`.
    pub async fn stop(&self, grace: std::time::Duration) {
        self.shutdown_tx.shutdown();
        let joins: Vec<_> = {
            let mut guard = self
                .joins
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.drain(..).collect()
        };
        for mut join in joins {
            if tokio::time::timeout(grace, &mut join).await.is_err() {
                warn!("Producer did not drain within grace period, aborting");
                join.abort();
            }
        }
    }
}

struct ProducerTask {
    name: String,
    broker: Arc<dyn MessageBroker>,
    backoff: BackoffPolicy,
    mailbox: Mailbox<PublishCommand>,
    shutdown: ShutdownToken,
}

impl ProducerTask {
    async fn run(mut self) {
        loop {
            tokio::select! {
                // Shutdown first: queued batches are refused, the one in
                // flight (inside publish_batch) always completes.
                biased;
                _ = self.shutdown.wait() => break,
                command = self.mailbox.recv() => match command {
                    Some(command) => {
                        let result = self.publish_batch(command.request).await;
                        let _ = command.reply.send(result);
                    }
                    None => break,
                },
            }
        }
        // Refuse whatever was queued behind the shutdown signal
        while let Some(command) = self.mailbox.try_recv() {
            let _ = command.reply.send(Err(PublishError::Closed));
        }
        info!(producer = %self.name, "Producer stopped");
    }

    async fn publish_batch(
        &self,
        request: PublishRequest,
    ) -> std::result::Result<PublishReceipt, PublishError> {
        if request.throughput == 0 {
            return Err(PublishError::Configuration(
                "publish throughput must be greater than zero".to_string(),
            ));
        }

        let total = request.messages.len();
        let pace = PUBLISH_PACING_WINDOW / request.throughput;
        let seed = seed_from(&self.name);

        for (offset, payload) in request.messages.iter().enumerate() {
            self.send_with_retry(&request.topic, payload.clone(), seed)
                .await
                .map_err(|source| PublishError::BrokerUnavailable {
                    sent: offset,
                    total,
                    source,
                })?;

            // Suspend between sends; never after the last one
            if offset + 1 < total {
                sleep(pace).await;
            }
        }

        info!(
            producer = %self.name,
            topic = %request.topic,
            count = total,
            throughput = request.throughput,
            "Batch published"
        );
        Ok(PublishReceipt { sent: total, total })
    }

    async fn send_with_retry(
        &self,
        topic: &str,
        payload: Bytes,
        seed: u64,
    ) -> std::result::Result<(), BrokerError> {
        let mut attempt: u32 = 0;
        loop {
            match self.broker.send(topic, payload.clone()).await {
                Ok(()) => return Ok(()),
                Err(source) => {
                    attempt += 1;
                    match self.backoff.decide(attempt, seed) {
                        RetryDecision::Retry(delay) => {
                            warn!(
                                producer = %self.name,
                                topic = %topic,
                                attempt = attempt,
                                delay_ms = delay.as_millis() as u64,
                                "Send failed, retrying"
                            );
                            sleep(delay).await;
                        }
                        RetryDecision::GiveUp => return Err(source),
                    }
                }
            }
        }
    }
}
