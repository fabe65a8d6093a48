// Mailbox - the serialized execution unit primitive
//
// Every component owns exactly one Mailbox and processes it one message at
// a time; everyone else holds Addresses. Cross-component calls are channel
// sends, never shared-memory mutation.

use std::fmt;

use tokio::sync::mpsc;

/// Send failure, returning the undelivered message
#[derive(Debug)]
pub enum SendError<T> {
    /// Receiver is gone
    Closed(T),
    /// Mailbox at capacity (try_send only)
    Full(T),
}

impl<T> SendError<T> {
    /// Recover the message that could not be delivered
    pub fn into_inner(self) -> T {
        match self {
            SendError::Closed(msg) | SendError::Full(msg) => msg,
        }
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Closed(_) => write!(f, "mailbox closed"),
            SendError::Full(_) => write!(f, "mailbox full"),
        }
    }
}

impl<T: fmt::Debug> std::error::Error for SendError<T> {}

/// Sending half of a mailbox. Cheap to clone; the only way to reach the
/// owning component.
pub struct Address<T> {
    tx: mpsc::Sender<T>,
}

impl<T> Clone for Address<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> fmt::Debug for Address<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Address")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<T: Send> Address<T> {
    /// Deliver a message, waiting for mailbox capacity
    pub async fn send(&self, msg: T) -> Result<(), SendError<T>> {
        self.tx.send(msg).await.map_err(|e| SendError::Closed(e.0))
    }

    /// Deliver a message without waiting; fails on a full mailbox
    pub fn try_send(&self, msg: T) -> Result<(), SendError<T>> {
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(msg) => SendError::Full(msg),
            mpsc::error::TrySendError::Closed(msg) => SendError::Closed(msg),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half: exclusively owned by one execution unit
pub struct Mailbox<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> Mailbox<T> {
    /// Await the next message; `None` once every Address is dropped
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Non-blocking poll (used when draining at shutdown)
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Stop accepting new sends; queued messages remain receivable
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Create a bounded mailbox and its address
pub fn mailbox<T>(capacity: usize) -> (Address<T>, Mailbox<T>) {
    let (tx, rx) = mpsc::channel(capacity);
    (Address { tx }, Mailbox { rx })
}
