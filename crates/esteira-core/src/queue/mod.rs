mod local;

pub use local::LocalQueue;

use crate::error::TransportError;
use crate::message::Message;

/// Transport abstraction the worker programs against: a FIFO main queue plus
/// a sibling dead-letter queue. Implementations must be safe under
/// contending producers and consumers.
///
/// Two interchangeable implementations exist: the process-local
/// [`LocalQueue`], and a broker adapter that translates these operations to
/// a durable message broker.
pub trait Transport: Send + Sync {
    /// Enqueue onto the main queue, marking the message `Sent`. Fails with
    /// [`TransportError::Duplicate`] when the id is already resident in the
    /// main queue; the queue is left unchanged.
    fn enqueue(&self, message: Message) -> Result<(), TransportError>;

    /// Pop the oldest main-queue message, marking it `Received` and
    /// releasing its id for later re-submission.
    fn dequeue(&self) -> Result<Option<Message>, TransportError>;

    /// Number of messages currently on the main queue.
    fn depth(&self) -> Result<usize, TransportError>;

    /// Enqueue onto the dead-letter queue. Never rejects duplicates.
    fn enqueue_dlq(&self, message: Message) -> Result<(), TransportError>;

    /// Pop the oldest dead-letter message.
    fn dequeue_dlq(&self) -> Result<Option<Message>, TransportError>;

    /// Number of messages currently on the dead-letter queue.
    fn dlq_depth(&self) -> Result<usize, TransportError>;
}
