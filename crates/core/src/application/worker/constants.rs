// Worker pool constants (no magic values inline)
use std::time::Duration;

/// Sleep when the FIFO is empty (100ms)
pub const IDLE_SLEEP_DURATION: Duration = Duration::from_millis(100);

/// Backoff after a backend pop error before retrying (1s)
pub const ERROR_BACKOFF_DURATION: Duration = Duration::from_secs(1);

/// How long the dispatcher tops up a partial batch before dispatching it
/// anyway, so a trickle of single items never stalls (20ms)
pub const BATCH_FILL_WINDOW: Duration = Duration::from_millis(20);

/// Poll interval while topping up a partial batch (5ms)
pub const BATCH_FILL_POLL: Duration = Duration::from_millis(5);

/// Poll interval for flush and drain loops (20ms)
pub const FLUSH_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Poll interval while waiting for a boosted backlog to subside (200ms)
pub const BOOST_BACKLOG_POLL: Duration = Duration::from_millis(200);

/// Bound on the post-terminate wait for aborted workers to requeue (1s)
pub const TERMINATE_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);
