//! Bounded outbound queue with the stream's drop policy.
//!
//! At most one snapshot is ever queued: a newer snapshot replaces the
//! queued one (latest wins — a stale frame has no value). Control messages
//! queue in order. Whatever arrives at a full queue, the oldest control
//! message is evicted first to make room — never the snapshot. Closing the
//! queue discards anything still pending.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use tokio::sync::Notify;

/// One item bound for a session's socket.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Raw (unsealed) binary frame body. The writer seals it.
    Snapshot(Arc<Vec<u8>>),
    /// Serialized control message JSON.
    Control(String),
}

#[derive(Debug, thiserror::Error)]
#[error("outbound queue saturated")]
pub struct QueueSaturated;

struct Inner {
    items: VecDeque<Outbound>,
    closed: bool,
}

pub struct OutboundQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(OutboundQueue {
            inner: Mutex::new(Inner { items: VecDeque::new(), closed: false }),
            notify: Notify::new(),
            capacity: capacity.max(1),
        })
    }

    /// Queue a snapshot. A snapshot already waiting is replaced by its
    /// successor; on a full queue the oldest control message is evicted to
    /// make room. Saturates only when nothing can be evicted.
    pub fn push_snapshot(&self, body: Arc<Vec<u8>>) -> Result<(), QueueSaturated> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if inner.closed {
            return Err(QueueSaturated);
        }

        if let Some(slot) = inner
            .items
            .iter_mut()
            .find(|item| matches!(item, Outbound::Snapshot(_)))
        {
            *slot = Outbound::Snapshot(body);
        } else {
            if inner.items.len() >= self.capacity {
                let oldest_control = inner
                    .items
                    .iter()
                    .position(|item| matches!(item, Outbound::Control(_)));
                match oldest_control {
                    Some(i) => {
                        inner.items.remove(i);
                    }
                    None => return Err(QueueSaturated),
                }
            }
            inner.items.push_back(Outbound::Snapshot(body));
        }
        drop(inner);
        self.notify.notify_one();
        Ok(())
    }

    /// Queue a control message. On a full queue the oldest control message
    /// is evicted to make room; the waiting snapshot survives.
    pub fn push_control(&self, json: String) -> Result<(), QueueSaturated> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if inner.closed {
            return Err(QueueSaturated);
        }

        if inner.items.len() >= self.capacity {
            let oldest_control = inner
                .items
                .iter()
                .position(|item| matches!(item, Outbound::Control(_)));
            match oldest_control {
                Some(i) => {
                    inner.items.remove(i);
                }
                None => return Err(QueueSaturated),
            }
        }
        inner.items.push_back(Outbound::Control(json));
        drop(inner);
        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the next item. Returns `None` once the queue is closed —
    /// pending items are discarded, per the cancellation contract.
    pub async fn pop(&self) -> Option<Outbound> {
        loop {
            {
                let mut inner = self.inner.lock().expect("queue lock poisoned");
                if inner.closed {
                    return None;
                }
                if let Some(item) = inner.items.pop_front() {
                    return Some(item);
                }
            }
            self.notify.notified().await;
        }
    }

    /// Close the queue and discard whatever is pending.
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.closed = true;
        inner.items.clear();
        drop(inner);
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(tag: u8) -> Arc<Vec<u8>> {
        Arc::new(vec![tag; 4])
    }

    #[tokio::test]
    async fn delivers_in_order() {
        let q = OutboundQueue::new(8);
        q.push_control("a".into()).unwrap();
        q.push_snapshot(snapshot(1)).unwrap();
        q.push_control("b".into()).unwrap();

        assert!(matches!(q.pop().await, Some(Outbound::Control(s)) if s == "a"));
        assert!(matches!(q.pop().await, Some(Outbound::Snapshot(_))));
        assert!(matches!(q.pop().await, Some(Outbound::Control(s)) if s == "b"));
    }

    #[tokio::test]
    async fn successor_snapshot_replaces_queued_one() {
        let q = OutboundQueue::new(8);
        q.push_snapshot(snapshot(1)).unwrap();
        q.push_snapshot(snapshot(2)).unwrap();

        match q.pop().await {
            Some(Outbound::Snapshot(body)) => assert_eq!(body[0], 2),
            other => panic!("expected snapshot, got {other:?}"),
        }
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn snapshot_into_full_queue_evicts_oldest_control() {
        let q = OutboundQueue::new(2);
        q.push_control("old".into()).unwrap();
        q.push_control("new".into()).unwrap();
        q.push_snapshot(snapshot(1)).unwrap();

        // "old" made way; the newer control and the snapshot remain.
        assert!(matches!(q.pop().await, Some(Outbound::Control(s)) if s == "new"));
        assert!(matches!(q.pop().await, Some(Outbound::Snapshot(_))));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn full_queue_evicts_oldest_control_first() {
        let q = OutboundQueue::new(2);
        q.push_snapshot(snapshot(1)).unwrap();
        q.push_control("old".into()).unwrap();
        q.push_control("new".into()).unwrap();

        // The snapshot survived; "old" did not.
        assert!(matches!(q.pop().await, Some(Outbound::Snapshot(_))));
        assert!(matches!(q.pop().await, Some(Outbound::Control(s)) if s == "new"));
    }

    #[tokio::test]
    async fn close_discards_pending_and_wakes_poppers() {
        let q = OutboundQueue::new(8);
        q.push_control("never delivered".into()).unwrap();

        let waiter = {
            let q = q.clone();
            tokio::spawn(async move {
                // Drain the one item, then block until close.
                let first = q.pop().await;
                let second = q.pop().await;
                (first, second)
            })
        };

        tokio::task::yield_now().await;
        q.close();

        let (first, second) = waiter.await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
        assert!(q.push_control("after close".into()).is_err());
    }
}
