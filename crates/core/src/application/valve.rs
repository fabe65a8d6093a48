// Rate Valve - fixed-window admission control
//
// The valve is an owned execution unit: one task, one command mailbox, one
// window timer, all multiplexed on a single select loop. Backlog, window
// counter, and target binding are owned by that loop alone; rebinding the
// target is just another command and therefore serializes with dispatch.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::application::mailbox::{Address, SendError};
use crate::application::shutdown::ShutdownToken;
use crate::domain::{ValveConfig, WorkItem};

/// Valve errors (control operations)
#[derive(Error, Debug)]
pub enum ValveError {
    #[error("Valve stopped")]
    Closed,
}

/// Enqueue failure, returning the rejected item to its caller
#[derive(Debug)]
pub enum EnqueueError {
    /// Backlog at its configured bound; the caller decides retry or drop
    Backpressure { item: WorkItem, capacity: usize },
    /// Valve task is gone
    Closed(WorkItem),
}

impl EnqueueError {
    /// Recover the item that was not accepted
    pub fn into_item(self) -> WorkItem {
        match self {
            EnqueueError::Backpressure { item, .. } | EnqueueError::Closed(item) => item,
        }
    }
}

impl std::fmt::Display for EnqueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnqueueError::Backpressure { capacity, .. } => {
                write!(f, "backlog full ({} items queued)", capacity)
            }
            EnqueueError::Closed(_) => write!(f, "valve stopped"),
        }
    }
}

impl std::error::Error for EnqueueError {}

/// Commands processed by the valve loop
enum ValveCommand {
    Enqueue(WorkItem),
    SetTarget(Option<Address<WorkItem>>),
}

/// Caller-side handle to a running valve.
///
/// `enqueue` never blocks: the backlog bound is enforced with a shared
/// depth counter before the command is submitted, so a full valve refuses
/// synchronously instead of queueing unboundedly.
#[derive(Clone)]
pub struct ValveHandle {
    commands: mpsc::UnboundedSender<ValveCommand>,
    depth: Arc<AtomicUsize>,
    max_backlog: usize,
}

impl ValveHandle {
    /// Append an item to the backlog. Never blocks.
    ///
    /// # Errors
    /// - EnqueueError::Backpressure if the backlog bound is reached; the
    ///   rejected item rides back in the error
    /// - EnqueueError::Closed if the valve task is gone
    pub fn enqueue(&self, item: WorkItem) -> Result<(), EnqueueError> {
        // Reserve a backlog slot first so concurrent callers cannot
        // overshoot the bound between check and submit.
        let mut current = self.depth.load(Ordering::Acquire);
        loop {
            if current >= self.max_backlog {
                return Err(EnqueueError::Backpressure {
                    item,
                    capacity: self.max_backlog,
                });
            }
            match self.depth.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }

        self.commands
            .send(ValveCommand::Enqueue(item))
            .map_err(|rejected| {
                self.depth.fetch_sub(1, Ordering::AcqRel);
                match rejected.0 {
                    ValveCommand::Enqueue(item) => EnqueueError::Closed(item),
                    ValveCommand::SetTarget(_) => unreachable!("enqueue sends Enqueue only"),
                }
            })
    }

    /// Atomically replace the dispatch target. `None` parks dispatch:
    /// queued items stay queued until a target is set again.
    pub fn set_target(&self, target: Option<Address<WorkItem>>) -> Result<(), ValveError> {
        self.commands
            .send(ValveCommand::SetTarget(target))
            .map_err(|_| ValveError::Closed)
    }

    /// Items accepted but not yet dispatched
    pub fn backlog_depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// Spawn an inlet pump exposing this valve as a relay destination.
    ///
    /// Bridges speak `Address<WorkItem>`; the valve accepts work through
    /// this synchronous handle. The pump forwards mailbox items into the
    /// valve one at a time (so valve order is exactly mailbox order) and
    /// turns backpressure into bounded waiting: a full backlog stalls the
    /// inlet mailbox, which stalls the sender's relay, instead of losing
    /// the item.
    pub fn inlet(&self, capacity: usize) -> (Address<WorkItem>, JoinHandle<()>) {
        let valve = self.clone();
        let (addr, mut mb) = crate::application::mailbox::mailbox(capacity);
        let join = tokio::spawn(async move {
            while let Some(mut item) = mb.recv().await {
                loop {
                    match valve.enqueue(item) {
                        Ok(()) => break,
                        Err(EnqueueError::Backpressure { item: rejected, capacity }) => {
                            debug!(capacity = capacity, "Valve backlog full, inlet holding item");
                            tokio::time::sleep(INLET_RETRY_DELAY).await;
                            item = rejected;
                        }
                        Err(EnqueueError::Closed(_)) => {
                            warn!("Valve stopped, inlet closing");
                            return;
                        }
                    }
                }
            }
        });
        (addr, join)
    }
}

/// Delay before the inlet re-offers an item to a full valve
const INLET_RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(50);

/// The valve execution unit. Construct with [`RateValve::spawn`].
pub struct RateValve {
    config: ValveConfig,
    backlog: VecDeque<WorkItem>,
    emitted_in_window: u32,
    target: Option<Address<WorkItem>>,
    depth: Arc<AtomicUsize>,
    commands: mpsc::UnboundedReceiver<ValveCommand>,
    shutdown: ShutdownToken,
}

impl RateValve {
    /// Spawn a valve task for a validated configuration.
    ///
    /// The window timer starts immediately; the first tick fires at once
    /// and then once per window.
    pub fn spawn(config: ValveConfig, shutdown: ShutdownToken) -> (ValveHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));

        let handle = ValveHandle {
            commands: tx,
            depth: Arc::clone(&depth),
            max_backlog: config.max_backlog,
        };

        let valve = Self {
            backlog: VecDeque::new(),
            emitted_in_window: 0,
            target: None,
            depth,
            commands: rx,
            shutdown,
            config,
        };

        let join = tokio::spawn(valve.run());
        (handle, join)
    }

    async fn run(mut self) {
        info!(
            rate = self.config.rate,
            window_ms = self.config.window.as_millis() as u64,
            max_backlog = self.config.max_backlog,
            "Rate valve started"
        );

        let mut window = tokio::time::interval(self.config.window);
        window.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                // Tick first: window boundaries stay exact even when the
                // command queue is never empty.
                biased;
                _ = window.tick() => self.on_tick(),
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                _ = self.shutdown.wait() => {
                    info!(parked = self.backlog.len(), "Rate valve shutting down");
                    break;
                }
            }
        }

        info!("Rate valve stopped");
    }

    fn on_command(&mut self, command: ValveCommand) {
        match command {
            ValveCommand::Enqueue(item) => {
                self.backlog.push_back(item);
            }
            ValveCommand::SetTarget(target) => {
                // Items already dispatched are unaffected; everything still
                // queued goes to the new target from the next tick on.
                debug!(bound = target.is_some(), "Valve target rebound");
                self.target = target;
            }
        }
    }

    /// Window boundary: reset the counter, then admit up to `rate` items
    /// in FIFO order.
    fn on_tick(&mut self) {
        self.emitted_in_window = 0;

        let Some(target) = self.target.clone() else {
            // No target: items remain queued, not dropped
            return;
        };

        while self.emitted_in_window < self.config.rate {
            let Some(item) = self.backlog.pop_front() else {
                break;
            };
            match target.try_send(item) {
                Ok(()) => {
                    self.emitted_in_window += 1;
                    self.depth.fetch_sub(1, Ordering::AcqRel);
                }
                Err(SendError::Full(item)) => {
                    // Target congested: keep FIFO order and try again next
                    // window rather than blocking the valve loop.
                    self.backlog.push_front(item);
                    debug!("Target mailbox full, deferring dispatch");
                    break;
                }
                Err(SendError::Closed(item)) => {
                    self.backlog.push_front(item);
                    warn!("Target mailbox closed, parking backlog");
                    self.target = None;
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::mailbox::mailbox;
    use crate::application::shutdown::shutdown_channel;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::time::sleep;

    fn item(n: u8) -> WorkItem {
        WorkItem::new(Bytes::from(vec![n]), n as i64)
    }

    fn drain(mb: &mut crate::application::mailbox::Mailbox<WorkItem>) -> Vec<WorkItem> {
        let mut items = Vec::new();
        while let Some(item) = mb.try_recv() {
            items.push(item);
        }
        items
    }

    fn spawn_valve(
        rate: u32,
        window: Duration,
        max_backlog: usize,
    ) -> (ValveHandle, crate::application::shutdown::ShutdownSender) {
        let config = ValveConfig::new(rate, window, max_backlog).unwrap();
        let (tx, token) = shutdown_channel();
        let (handle, _join) = RateValve::spawn(config, token);
        (handle, tx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatches_at_most_rate_per_window() {
        let (handle, _shutdown) = spawn_valve(5, Duration::from_secs(1), 100);
        let (addr, mut mb) = mailbox(64);
        handle.set_target(Some(addr)).unwrap();

        // 12 items enqueued "instantaneously"
        for n in 0..12 {
            handle.enqueue(item(n)).unwrap();
        }
        // Let the valve absorb commands (first window tick already passed)
        sleep(Duration::from_millis(10)).await;
        assert_eq!(drain(&mut mb).len(), 0);

        // Consecutive windows admit 5, 5, 2
        sleep(Duration::from_secs(1)).await;
        assert_eq!(drain(&mut mb).len(), 5);
        sleep(Duration::from_secs(1)).await;
        assert_eq!(drain(&mut mb).len(), 5);
        sleep(Duration::from_secs(1)).await;
        assert_eq!(drain(&mut mb).len(), 2);
        sleep(Duration::from_secs(1)).await;
        assert_eq!(drain(&mut mb).len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_preserves_fifo_order() {
        let (handle, _shutdown) = spawn_valve(3, Duration::from_secs(1), 100);
        let (addr, mut mb) = mailbox(64);
        handle.set_target(Some(addr)).unwrap();

        for n in 0..9 {
            handle.enqueue(item(n)).unwrap();
        }
        sleep(Duration::from_millis(10)).await;

        let mut received = Vec::new();
        for _ in 0..3 {
            sleep(Duration::from_secs(1)).await;
            received.extend(drain(&mut mb));
        }
        let payloads: Vec<u8> = received.iter().map(|i| i.payload[0]).collect();
        assert_eq!(payloads, (0..9).collect::<Vec<u8>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backpressure_at_backlog_bound() {
        let (handle, _shutdown) = spawn_valve(5, Duration::from_secs(1), 100);
        // No target set: nothing drains

        for n in 0..100 {
            handle.enqueue(item((n % 256) as u8)).unwrap();
        }
        let err = handle.enqueue(item(0)).unwrap_err();
        assert!(matches!(
            &err,
            EnqueueError::Backpressure { capacity: 100, .. }
        ));
        // The rejected item comes back to the caller
        assert_eq!(err.into_item().payload[0], 0);

        // The first 100 remain queued
        sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.backlog_depth(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unset_target_parks_items() {
        let (handle, _shutdown) = spawn_valve(5, Duration::from_secs(1), 100);

        for n in 0..4 {
            handle.enqueue(item(n)).unwrap();
        }
        sleep(Duration::from_secs(2)).await;
        assert_eq!(handle.backlog_depth(), 4);

        // Binding a target releases the parked items on the next tick
        let (addr, mut mb) = mailbox(64);
        handle.set_target(Some(addr)).unwrap();
        sleep(Duration::from_secs(1)).await;
        assert_eq!(drain(&mut mb).len(), 4);
        assert_eq!(handle.backlog_depth(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebind_affects_only_undispatched_items() {
        let (handle, _shutdown) = spawn_valve(2, Duration::from_secs(1), 100);
        let (first_addr, mut first_mb) = mailbox(64);
        handle.set_target(Some(first_addr)).unwrap();

        for n in 0..4 {
            handle.enqueue(item(n)).unwrap();
        }
        sleep(Duration::from_millis(10)).await;
        sleep(Duration::from_secs(1)).await;

        // First window went to the first target
        let first_batch = drain(&mut first_mb);
        assert_eq!(
            first_batch.iter().map(|i| i.payload[0]).collect::<Vec<_>>(),
            vec![0, 1]
        );

        // Rebind mid-backlog
        let (second_addr, mut second_mb) = mailbox(64);
        handle.set_target(Some(second_addr)).unwrap();
        sleep(Duration::from_secs(1)).await;

        // Remaining items go to the new target only, in order
        assert_eq!(drain(&mut first_mb).len(), 0);
        let second_batch = drain(&mut second_mb);
        assert_eq!(
            second_batch.iter().map(|i| i.payload[0]).collect::<Vec<_>>(),
            vec![2, 3]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_target_defers_without_reorder() {
        let (handle, _shutdown) = spawn_valve(5, Duration::from_secs(1), 100);
        let (addr, mut mb) = mailbox(2); // tighter than the rate
        handle.set_target(Some(addr)).unwrap();

        for n in 0..5 {
            handle.enqueue(item(n)).unwrap();
        }
        sleep(Duration::from_millis(10)).await;
        sleep(Duration::from_secs(1)).await;

        // Only the mailbox capacity made it through, in order
        let batch = drain(&mut mb);
        assert_eq!(
            batch.iter().map(|i| i.payload[0]).collect::<Vec<_>>(),
            vec![0, 1]
        );

        sleep(Duration::from_secs(1)).await;
        let batch = drain(&mut mb);
        assert_eq!(
            batch.iter().map(|i| i.payload[0]).collect::<Vec<_>>(),
            vec![2, 3]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_after_shutdown_is_closed() {
        let (handle, shutdown) = spawn_valve(5, Duration::from_secs(1), 100);
        shutdown.shutdown();
        sleep(Duration::from_millis(10)).await;
        let err = handle.enqueue(item(1)).unwrap_err();
        assert!(matches!(err, EnqueueError::Closed(_)));
    }
}
