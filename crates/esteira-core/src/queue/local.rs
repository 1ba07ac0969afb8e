use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::TransportError;
use crate::message::{Message, MessageStatus};
use crate::queue::Transport;

#[derive(Default)]
struct Inner {
    main: VecDeque<Message>,
    dlq: VecDeque<Message>,
    /// Ids currently resident in `main`. An id is released on dequeue so the
    /// same message may be re-published after it leaves the queue.
    resident: HashSet<Uuid>,
}

/// Process-local, unbounded FIFO pair with per-id deduplication on the main
/// queue. The dead-letter queue accepts anything.
#[derive(Default)]
pub struct LocalQueue {
    inner: Mutex<Inner>,
}

impl LocalQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for LocalQueue {
    fn enqueue(&self, mut message: Message) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        if !inner.resident.insert(message.id) {
            return Err(TransportError::Duplicate(message.id));
        }
        message.status = MessageStatus::Sent;
        debug!(msg_id = %message.id, depth = inner.main.len() + 1, "message enqueued");
        inner.main.push_back(message);
        Ok(())
    }

    fn dequeue(&self) -> Result<Option<Message>, TransportError> {
        let mut inner = self.inner.lock();
        let Some(mut message) = inner.main.pop_front() else {
            return Ok(None);
        };
        inner.resident.remove(&message.id);
        message.status = MessageStatus::Received;
        Ok(Some(message))
    }

    fn depth(&self) -> Result<usize, TransportError> {
        Ok(self.inner.lock().main.len())
    }

    fn enqueue_dlq(&self, message: Message) -> Result<(), TransportError> {
        let mut inner = self.inner.lock();
        debug!(msg_id = %message.id, dlq_depth = inner.dlq.len() + 1, "message dead-lettered");
        inner.dlq.push_back(message);
        Ok(())
    }

    fn dequeue_dlq(&self) -> Result<Option<Message>, TransportError> {
        Ok(self.inner.lock().dlq.pop_front())
    }

    fn dlq_depth(&self) -> Result<usize, TransportError> {
        Ok(self.inner.lock().dlq.len())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn enqueue_dequeue_is_fifo() {
        let queue = LocalQueue::new();
        let first = Message::new("s", "first");
        let second = Message::new("s", "second");
        queue.enqueue(first.clone()).unwrap();
        queue.enqueue(second.clone()).unwrap();

        assert_eq!(queue.dequeue().unwrap().unwrap().id, first.id);
        assert_eq!(queue.dequeue().unwrap().unwrap().id, second.id);
        assert!(queue.dequeue().unwrap().is_none());
    }

    #[test]
    fn enqueue_marks_sent_and_dequeue_marks_received() {
        let queue = LocalQueue::new();
        queue.enqueue(Message::new("s", "p")).unwrap();
        let msg = queue.dequeue().unwrap().unwrap();
        assert_eq!(msg.status, MessageStatus::Received);
    }

    #[test]
    fn duplicate_id_is_rejected_and_queue_unchanged() {
        let queue = LocalQueue::new();
        let msg = Message::new("s", "p");
        queue.enqueue(msg.clone()).unwrap();

        let err = queue.enqueue(msg.clone()).unwrap_err();
        assert!(matches!(err, TransportError::Duplicate(id) if id == msg.id));
        assert_eq!(queue.depth().unwrap(), 1);
    }

    #[test]
    fn dequeue_releases_id_for_resubmission() {
        let queue = LocalQueue::new();
        let msg = Message::new("s", "p");
        queue.enqueue(msg.clone()).unwrap();
        queue.dequeue().unwrap().unwrap();

        queue
            .enqueue(msg)
            .expect("id should be free again after dequeue");
        assert_eq!(queue.depth().unwrap(), 1);
    }

    #[test]
    fn dlq_accepts_duplicates() {
        let queue = LocalQueue::new();
        let msg = Message::new("s", "p");
        queue.enqueue_dlq(msg.clone()).unwrap();
        queue.enqueue_dlq(msg.clone()).unwrap();
        assert_eq!(queue.dlq_depth().unwrap(), 2);
        assert_eq!(queue.dequeue_dlq().unwrap().unwrap().id, msg.id);
    }

    #[test]
    fn dlq_does_not_consume_main_dedup_set() {
        let queue = LocalQueue::new();
        let msg = Message::new("s", "p");
        queue.enqueue_dlq(msg.clone()).unwrap();
        queue
            .enqueue(msg)
            .expect("dlq residency should not block the main queue");
    }

    #[test]
    fn depth_tracks_accepted_enqueues_minus_dequeues() {
        let queue = LocalQueue::new();
        let mut accepted = 0usize;
        for i in 0..10 {
            let msg = Message::new("s", format!("payload {i}"));
            queue.enqueue(msg.clone()).unwrap();
            accepted += 1;
            // Re-submitting the same id must not change the depth.
            assert!(queue.enqueue(msg).is_err());
        }
        assert_eq!(queue.depth().unwrap(), accepted);

        for drained in 1..=4 {
            queue.dequeue().unwrap().unwrap();
            assert_eq!(queue.depth().unwrap(), accepted - drained);
        }
    }

    #[test]
    fn concurrent_producers_and_consumers_lose_nothing() {
        let queue = Arc::new(LocalQueue::new());
        let producers: Vec<_> = (0..4)
            .map(|worker| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        queue
                            .enqueue(Message::new("load", format!("{worker}-{i}")))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in producers {
            handle.join().unwrap();
        }

        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    let mut taken = 0usize;
                    while queue.dequeue().unwrap().is_some() {
                        taken += 1;
                    }
                    taken
                })
            })
            .collect();
        let drained: usize = consumers.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(drained, 400);
        assert_eq!(queue.depth().unwrap(), 0);
    }
}
