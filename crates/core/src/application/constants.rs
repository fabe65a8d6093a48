// Pipeline tuning constants (no magic values inline)

use std::time::Duration;

/// Default capacity of a component mailbox
pub const DEFAULT_MAILBOX_CAPACITY: usize = 64;

/// Default valve backlog bound before enqueue refuses with backpressure
pub const DEFAULT_MAX_BACKLOG: usize = 1024;

/// Base delay for retry backoff (doubles per attempt)
pub const DEFAULT_BACKOFF_BASE_DELAY: Duration = Duration::from_millis(100);

/// Exponential backoff factor
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Retry attempts before a send/relay is given up on
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// How long one relay send may wait on a congested destination mailbox
pub const DEFAULT_RELAY_TIMEOUT: Duration = Duration::from_secs(1);

/// Grace period for draining in-flight work on bridge shutdown
pub const DEFAULT_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// The unit of time behind "messages per second" publish pacing
pub const PUBLISH_PACING_WINDOW: Duration = Duration::from_secs(1);
