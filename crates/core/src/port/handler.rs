// Batch Handler Port (Interface)
//
// The unhandled-remainder contract: a handler returns the subset of the
// batch it could NOT process, which the queue pushes back for a future
// dispatch cycle. Requeue is never a synchronous retry, so handlers must be
// idempotent or rely on the dedup layer.

use async_trait::async_trait;

use crate::domain::Payload;

/// Business handler invoked with popped batches.
#[async_trait]
pub trait BatchHandler<P: Payload>: Send + Sync {
    /// Process a batch; return the items that could not be handled
    /// (empty when everything succeeded).
    async fn handle(&self, batch: Vec<P>) -> Vec<P>;
}

/// Adapter turning a plain function into a handler.
///
/// ```ignore
/// let handler = HandlerFn(|batch: Vec<Notification>| {
///     // deliver...
///     Vec::new()
/// });
/// ```
pub struct HandlerFn<F>(pub F);

#[async_trait]
impl<P, F> BatchHandler<P> for HandlerFn<F>
where
    P: Payload,
    F: Fn(Vec<P>) -> Vec<P> + Send + Sync,
{
    async fn handle(&self, batch: Vec<P>) -> Vec<P> {
        (self.0)(batch)
    }
}
