// Worker - serialized item processing loop
//
// One mailbox, one item at a time. A second item is never handed to the
// processor before the previous call returns.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::application::mailbox::{mailbox, Address, Mailbox};
use crate::application::shutdown::ShutdownToken;
use crate::domain::WorkItem;
use crate::port::ItemProcessor;

/// Report sent to the supervisor when a worker hits an unrecoverable
/// per-item failure (processor error or panic). The worker itself keeps
/// running; the supervisor decides whether to replace it.
#[derive(Debug, Clone)]
pub struct SupervisorEvent {
    pub worker: String,
    pub reason: String,
}

/// Worker processes items from its mailbox through an injected processor
pub struct Worker {
    name: String,
    mailbox: Mailbox<WorkItem>,
    processor: Arc<dyn ItemProcessor>,
    supervisor: Option<mpsc::UnboundedSender<SupervisorEvent>>,
    shutdown: ShutdownToken,
}

impl Worker {
    /// Spawn a worker task and return its address.
    ///
    /// # Arguments
    /// * `name` - Worker name (logs and supervisor events)
    /// * `capacity` - Mailbox capacity
    /// * `processor` - Item processor implementation
    /// * `supervisor` - Optional channel for unrecoverable-failure reports
    /// * `shutdown` - Shutdown token
    pub fn spawn(
        name: impl Into<String>,
        capacity: usize,
        processor: Arc<dyn ItemProcessor>,
        supervisor: Option<mpsc::UnboundedSender<SupervisorEvent>>,
        shutdown: ShutdownToken,
    ) -> (Address<WorkItem>, JoinHandle<()>) {
        let (addr, mb) = mailbox(capacity);
        let worker = Self {
            name: name.into(),
            mailbox: mb,
            processor,
            supervisor,
            shutdown,
        };
        let join = tokio::spawn(worker.run());
        (addr, join)
    }

    async fn run(mut self) {
        info!(worker = %self.name, "Worker started");
        loop {
            tokio::select! {
                item = self.mailbox.recv() => match item {
                    Some(item) => self.handle_item(item).await,
                    None => break,
                },
                _ = self.shutdown.wait() => {
                    info!(worker = %self.name, "Worker shutting down");
                    break;
                }
            }
        }
        info!(worker = %self.name, "Worker stopped");
    }

    /// Process one item with panic isolation.
    ///
    /// The processor runs in a spawned task so a panic is caught at the
    /// JoinHandle instead of unwinding through the worker loop; valve
    /// state and the mailbox stay intact either way.
    async fn handle_item(&self, item: WorkItem) {
        let processor = Arc::clone(&self.processor);
        let handle = tokio::task::spawn(async move { processor.process(item).await });

        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(worker = %self.name, error = %e, "Item processing failed");
                self.report(format!("processing failed: {}", e));
            }
            Err(join_err) if join_err.is_panic() => {
                error!(worker = %self.name, "Item processor panicked");
                self.report("processor panicked".to_string());
            }
            Err(join_err) => {
                error!(worker = %self.name, error = %join_err, "Item task cancelled");
                self.report(format!("task cancelled: {}", join_err));
            }
        }
    }

    fn report(&self, reason: String) {
        if let Some(supervisor) = &self.supervisor {
            let _ = supervisor.send(SupervisorEvent {
                worker: self.name.clone(),
                reason,
            });
        }
    }
}
