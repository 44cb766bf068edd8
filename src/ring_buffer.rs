//! A bounded, lossy, single-consumer event queue.
//!
//! spec.md §9 flags the teacher's "lossy channel via a double-select" as an
//! implementation tactic, not the contract: the contract is "best-effort
//! delivery, never block the producer". This module gives that contract an
//! explicit shape — a ring buffer whose `push` overwrites the oldest
//! element when full, surfaced through an async `recv`.
//!
//! Used as the `Session` output channel (spec.md §4.2 `Output()`) and as
//! the log tailer's `Tail()` emit channel (spec.md §4.4, §9 open question:
//! the teacher is inconsistent between unbounded and bounded-100 readers;
//! resolved as bounded-100 drop-oldest, matching the `Output()` policy).
//! The RPC client's out-of-band notification channel is a separate bounded
//! `tokio::mpsc` with drop-newest semantics instead — it has no ordering
//! contract to preserve, so a plain `try_send` is simpler and sufficient.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

struct Inner<T> {
    queue: std::sync::Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
}

/// The producing half. Exactly one logical writer is expected per spec
/// (the session's reader goroutine-equivalent), though the type itself
/// does not enforce that.
pub struct LossySender<T> {
    inner: Arc<Inner<T>>,
}

/// The consuming half.
pub struct LossyReceiver<T> {
    inner: Arc<Inner<T>>,
}

/// Create a bounded lossy channel. `capacity` must be at least 1.
pub fn lossy_channel<T>(capacity: usize) -> (LossySender<T>, LossyReceiver<T>) {
    let capacity = capacity.max(1);
    let inner = Arc::new(Inner {
        queue: std::sync::Mutex::new(VecDeque::with_capacity(capacity)),
        capacity,
        notify: Notify::new(),
        closed: AtomicBool::new(false),
    });
    (
        LossySender {
            inner: inner.clone(),
        },
        LossyReceiver { inner },
    )
}

impl<T> LossySender<T> {
    /// Enqueue `item`. If the buffer is at capacity, the oldest queued item
    /// is dropped to make room — the push itself never blocks and never
    /// fails.
    pub fn push(&self, item: T) {
        let mut q = self.inner.queue.lock().unwrap();
        if q.len() >= self.inner.capacity {
            q.pop_front();
        }
        q.push_back(item);
        drop(q);
        self.inner.notify.notify_one();
    }

    /// Close the channel. Idempotent. Only the reader loop should call
    /// this, per the ownership rule that the output channel is closed by
    /// the reader and by nobody else (spec.md invariant #2).
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }
}

impl<T> LossyReceiver<T> {
    /// Await the next item. Returns `None` once the channel is closed and
    /// drained.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            {
                let mut q = self.inner.queue.lock().unwrap();
                if let Some(item) = q.pop_front() {
                    return Some(item);
                }
                if self.inner.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.inner.notify.notified().await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire) && self.inner.queue.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_items_in_order() {
        let (tx, mut rx) = lossy_channel(4);
        tx.push(1);
        tx.push(2);
        tx.push(3);
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, Some(3));
    }

    #[tokio::test]
    async fn drops_oldest_when_full() {
        let (tx, mut rx) = lossy_channel(2);
        tx.push(1);
        tx.push(2);
        tx.push(3); // 1 is dropped to make room
        assert_eq!(rx.recv().await, Some(2));
        assert_eq!(rx.recv().await, Some(3));
    }

    #[tokio::test]
    async fn recv_returns_none_after_close_and_drain() {
        let (tx, mut rx) = lossy_channel::<i32>(2);
        tx.push(1);
        tx.close();
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn recv_waits_for_item_then_wakes() {
        let (tx, mut rx) = lossy_channel(2);
        let handle = tokio::spawn(async move { rx.recv().await });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        tx.push(42);
        assert_eq!(handle.await.unwrap(), Some(42));
    }
}
