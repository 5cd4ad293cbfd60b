//! Message queue abstraction.
//!
//! The S3 router, the starter loop, and the monitor sink all communicate
//! over simple text-message queues. Deployments back this with SQS; tests
//! and local runs use [`InMemoryQueue`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Error from queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue transport error: {0}")]
    Transport(String),
}

/// A message as received from a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    /// Receipt identifier used to delete the message.
    pub id: String,
    pub body: String,
}

/// Minimal queue surface: send, long-poll receive, delete-after-processing.
#[async_trait]
pub trait MessageQueue: Send + Sync + 'static {
    async fn send(&self, body: String) -> Result<(), QueueError>;

    /// Receive one message, waiting up to `wait` for one to arrive.
    async fn receive(&self, wait: Duration) -> Result<Option<QueueMessage>, QueueError>;

    /// Delete a received message. Messages not deleted remain in flight.
    async fn delete(&self, message: &QueueMessage) -> Result<(), QueueError>;
}

/// In-memory queue with long-poll semantics.
#[derive(Default)]
pub struct InMemoryQueue {
    pending: Mutex<VecDeque<QueueMessage>>,
    in_flight: Mutex<HashMap<String, QueueMessage>>,
    notify: Notify,
    counter: AtomicU64,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Return undeleted in-flight messages to the queue, oldest first.
    pub fn requeue_in_flight(&self) {
        let mut messages: Vec<QueueMessage> = {
            let mut in_flight = self.in_flight.lock();
            in_flight.drain().map(|(_, m)| m).collect()
        };
        messages.sort_by(|a, b| a.id.cmp(&b.id));
        {
            let mut pending = self.pending.lock();
            for message in messages {
                pending.push_back(message);
            }
        }
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn send(&self, body: String) -> Result<(), QueueError> {
        let id = format!("msg-{:08}", self.counter.fetch_add(1, Ordering::Relaxed));
        self.pending.lock().push_back(QueueMessage { id, body });
        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> Result<Option<QueueMessage>, QueueError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(message) = self.pending.lock().pop_front() {
                self.in_flight
                    .lock()
                    .insert(message.id.clone(), message.clone());
                return Ok(Some(message));
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            // Wake on send or give up at the deadline, whichever is first.
            let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
        }
    }

    async fn delete(&self, message: &QueueMessage) -> Result<(), QueueError> {
        self.in_flight.lock().remove(&message.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_receive_delete() {
        let queue = InMemoryQueue::new();
        queue.send("hello".into()).await.unwrap();

        let message = queue
            .receive(Duration::from_millis(10))
            .await
            .unwrap()
            .expect("message available");
        assert_eq!(message.body, "hello");
        assert_eq!(queue.in_flight_len(), 1);

        queue.delete(&message).await.unwrap();
        assert_eq!(queue.in_flight_len(), 0);
        assert_eq!(queue.pending_len(), 0);
    }

    #[tokio::test]
    async fn receive_times_out_when_empty() {
        let queue = InMemoryQueue::new();
        let received = queue.receive(Duration::from_millis(5)).await.unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn receive_wakes_on_send() {
        let queue = std::sync::Arc::new(InMemoryQueue::new());
        let reader = queue.clone();
        let handle =
            tokio::spawn(async move { reader.receive(Duration::from_secs(5)).await.unwrap() });

        tokio::time::sleep(Duration::from_millis(5)).await;
        queue.send("late".into()).await.unwrap();

        let message = handle.await.unwrap().expect("message delivered");
        assert_eq!(message.body, "late");
    }

    #[tokio::test]
    async fn undeleted_messages_can_be_requeued() {
        let queue = InMemoryQueue::new();
        queue.send("one".into()).await.unwrap();

        let _message = queue.receive(Duration::from_millis(10)).await.unwrap();
        assert_eq!(queue.pending_len(), 0);

        queue.requeue_in_flight();
        assert_eq!(queue.pending_len(), 1);
        assert_eq!(queue.in_flight_len(), 0);
    }
}
