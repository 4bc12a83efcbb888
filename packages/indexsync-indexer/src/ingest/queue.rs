use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;

use super::event::ChangeEvent;
use crate::error::Result;

/// One received event awaiting settlement
///
/// Exactly one of the settling calls is made per delivery.
#[async_trait]
pub trait Delivery: Send {
    fn event(&self) -> &ChangeEvent;

    fn delivery_tag(&self) -> u64;

    /// 1 on first delivery, incremented on each retry
    fn attempt(&self) -> u32;

    async fn ack(self: Box<Self>) -> Result<()>;

    /// Drop without redelivery
    async fn discard(self: Box<Self>) -> Result<()>;

    /// Redeliver later as the next attempt
    async fn retry(self: Box<Self>) -> Result<()>;

    /// Redeliver later at the same attempt
    async fn requeue(self: Box<Self>) -> Result<()>;

    /// Park for manual inspection
    async fn dead_letter(self: Box<Self>) -> Result<()>;
}

#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Next delivery, `None` once the queue is closed and drained
    async fn next(&self) -> Option<Box<dyn Delivery>>;
}

/// How a delivery was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Discarded,
    Retried,
    Requeued,
    DeadLettered,
}

/// Settlements remembered by `InMemoryEventQueue::settled`
pub const DEFAULT_SETTLED_HISTORY: usize = 10_000;

struct Envelope {
    event: ChangeEvent,
    attempt: u32,
}

struct QueueInner {
    pending: VecDeque<Envelope>,
    in_flight: usize,
    closed: bool,
    next_tag: u64,
    /// oldest dropped first once `history_limit` is reached
    settled: VecDeque<(Settlement, ChangeEvent)>,
    history_limit: usize,
}

struct QueueState {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

/// In-process queue; retries go to the back of the queue
///
/// Keeps the most recent settlements for inspection, up to
/// [`DEFAULT_SETTLED_HISTORY`] unless configured otherwise.
#[derive(Clone)]
pub struct InMemoryEventQueue {
    state: Arc<QueueState>,
}

impl Default for InMemoryEventQueue {
    fn default() -> Self {
        Self::with_history_limit(DEFAULT_SETTLED_HISTORY)
    }
}

impl InMemoryEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history_limit(history_limit: usize) -> Self {
        Self {
            state: Arc::new(QueueState {
                inner: Mutex::new(QueueInner {
                    pending: VecDeque::new(),
                    in_flight: 0,
                    closed: false,
                    next_tag: 0,
                    settled: VecDeque::new(),
                    history_limit,
                }),
                notify: Notify::new(),
            }),
        }
    }

    pub fn publish(&self, event: ChangeEvent) {
        self.state.inner.lock().pending.push_back(Envelope { event, attempt: 1 });
        self.state.notify.notify_waiters();
    }

    /// No further publishes; `next` returns `None` once everything settles
    pub fn close(&self) {
        self.state.inner.lock().closed = true;
        self.state.notify.notify_waiters();
    }

    pub fn pending(&self) -> usize {
        self.state.inner.lock().pending.len()
    }

    /// Recently settled events for `settlement`, in settlement order
    pub fn settled(&self, settlement: Settlement) -> Vec<ChangeEvent> {
        self.state
            .inner
            .lock()
            .settled
            .iter()
            .filter(|(s, _)| *s == settlement)
            .map(|(_, event)| event.clone())
            .collect()
    }

    fn settle(&self, envelope: Envelope, settlement: Settlement) {
        {
            let mut inner = self.state.inner.lock();
            inner.in_flight = inner.in_flight.saturating_sub(1);
            if inner.history_limit > 0 {
                if inner.settled.len() == inner.history_limit {
                    inner.settled.pop_front();
                }
                inner.settled.push_back((settlement, envelope.event.clone()));
            }
            let attempt = match settlement {
                Settlement::Retried => Some(envelope.attempt + 1),
                Settlement::Requeued => Some(envelope.attempt),
                _ => None,
            };
            if let Some(attempt) = attempt {
                inner.pending.push_back(Envelope {
                    event: envelope.event,
                    attempt,
                });
            }
        }
        self.state.notify.notify_waiters();
    }
}

#[async_trait]
impl EventQueue for InMemoryEventQueue {
    async fn next(&self) -> Option<Box<dyn Delivery>> {
        loop {
            // registered before the state check so no wakeup is lost
            let notified = self.state.notify.notified();
            {
                let mut inner = self.state.inner.lock();
                if let Some(envelope) = inner.pending.pop_front() {
                    inner.in_flight += 1;
                    inner.next_tag += 1;
                    return Some(Box::new(InMemoryDelivery {
                        queue: self.clone(),
                        tag: inner.next_tag,
                        envelope,
                    }));
                }
                if inner.closed && inner.in_flight == 0 {
                    return None;
                }
            }
            notified.await;
        }
    }
}

struct InMemoryDelivery {
    queue: InMemoryEventQueue,
    tag: u64,
    envelope: Envelope,
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn event(&self) -> &ChangeEvent {
        &self.envelope.event
    }

    fn delivery_tag(&self) -> u64 {
        self.tag
    }

    fn attempt(&self) -> u32 {
        self.envelope.attempt
    }

    async fn ack(self: Box<Self>) -> Result<()> {
        self.queue.settle(self.envelope, Settlement::Acked);
        Ok(())
    }

    async fn discard(self: Box<Self>) -> Result<()> {
        self.queue.settle(self.envelope, Settlement::Discarded);
        Ok(())
    }

    async fn retry(self: Box<Self>) -> Result<()> {
        self.queue.settle(self.envelope, Settlement::Retried);
        Ok(())
    }

    async fn requeue(self: Box<Self>) -> Result<()> {
        self.queue.settle(self.envelope, Settlement::Requeued);
        Ok(())
    }

    async fn dead_letter(self: Box<Self>) -> Result<()> {
        self.queue.settle(self.envelope, Settlement::DeadLettered);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(path: &str) -> ChangeEvent {
        ChangeEvent::from_value(json!({"base_path": path}), false).unwrap()
    }

    #[tokio::test]
    async fn test_retry_requeues_with_next_attempt() {
        let queue = InMemoryEventQueue::new();
        queue.publish(event("/a"));
        queue.close();

        let first = queue.next().await.unwrap();
        assert_eq!(first.attempt(), 1);
        first.retry().await.unwrap();

        let second = queue.next().await.unwrap();
        assert_eq!(second.attempt(), 2);
        assert_eq!(second.event().base_path(), Some("/a"));
        second.ack().await.unwrap();

        assert!(queue.next().await.is_none());
        assert_eq!(queue.settled(Settlement::Acked).len(), 1);
        assert_eq!(queue.settled(Settlement::Retried).len(), 1);
    }

    #[tokio::test]
    async fn test_requeue_keeps_attempt() {
        let queue = InMemoryEventQueue::new();
        queue.publish(event("/a"));
        queue.close();

        let first = queue.next().await.unwrap();
        first.requeue().await.unwrap();

        let second = queue.next().await.unwrap();
        assert_eq!(second.attempt(), 1);
        second.ack().await.unwrap();
        assert_eq!(queue.settled(Settlement::Requeued).len(), 1);
    }

    #[tokio::test]
    async fn test_settled_history_drops_oldest() {
        let queue = InMemoryEventQueue::with_history_limit(2);
        for path in ["/a", "/b", "/c"] {
            queue.publish(event(path));
        }
        queue.close();
        while let Some(delivery) = queue.next().await {
            delivery.ack().await.unwrap();
        }

        let paths: Vec<String> = queue
            .settled(Settlement::Acked)
            .iter()
            .filter_map(|e| e.base_path().map(str::to_string))
            .collect();
        assert_eq!(paths, vec!["/b".to_string(), "/c".to_string()]);
    }

    #[tokio::test]
    async fn test_closed_queue_waits_for_in_flight() {
        let queue = InMemoryEventQueue::new();
        queue.publish(event("/a"));
        queue.close();

        let delivery = queue.next().await.unwrap();
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await.is_none() })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        delivery.discard().await.unwrap();
        assert!(waiter.await.unwrap());
    }
}
