//! Prioritized, bounded, shutdown-aware task queue
//!
//! A FIFO per priority level; pop takes from the highest non-empty level.
//! Push applies backpressure: a producer blocks while the target level is at
//! capacity, which naturally bounds how far chunk discovery can run ahead of
//! data extraction. Shutdown enqueues one `None` per worker so every waiter
//! wakes exactly once and exits.

use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};

use crate::error::{DumpError, Result};
use crate::task::{Priority, Task};

/// Default per-priority capacity.
const DEFAULT_CAPACITY: usize = 1024;

struct QueueInner {
    high: VecDeque<Task>,
    medium: VecDeque<Task>,
    low: VecDeque<Task>,
    /// Pending shutdown wakeups; each pops as a `None`
    shutdown_tokens: usize,
    closed: bool,
}

impl QueueInner {
    fn level_mut(&mut self, priority: Priority) -> &mut VecDeque<Task> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Medium => &mut self.medium,
            Priority::Low => &mut self.low,
        }
    }

    fn pop_highest(&mut self) -> Option<Task> {
        self.high
            .pop_front()
            .or_else(|| self.medium.pop_front())
            .or_else(|| self.low.pop_front())
    }
}

/// Work queue multiplexed across the worker pool.
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    /// Signalled when a task or shutdown token arrives
    pop_ready: Notify,
    /// Signalled when a slot frees up
    push_ready: Notify,
    capacity: usize,
}

impl TaskQueue {
    /// Create a queue with the default per-priority capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a queue with the given per-priority capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                high: VecDeque::new(),
                medium: VecDeque::new(),
                low: VecDeque::new(),
                shutdown_tokens: 0,
                closed: false,
            }),
            pop_ready: Notify::new(),
            push_ready: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Enqueue a task, waiting while the target priority level is full.
    /// Fails once the queue has been shut down.
    pub async fn push(&self, task: Task, priority: Priority) -> Result<()> {
        loop {
            let wait = {
                let notified = self.push_ready.notified();
                let mut inner = self.inner.lock().await;

                if inner.closed {
                    return Err(DumpError::invalid_state("task queue is shut down"));
                }

                let level = inner.level_mut(priority);
                if level.len() < self.capacity {
                    level.push_back(task);
                    drop(inner);
                    self.pop_ready.notify_waiters();
                    return Ok(());
                }
                notified
            };
            wait.await;
        }
    }

    /// Dequeue the highest-priority task. Returns `None` exactly once per
    /// shutdown token; a worker receiving `None` must exit its loop.
    pub async fn pop(&self) -> Option<Task> {
        loop {
            let wait = {
                let notified = self.pop_ready.notified();
                let mut inner = self.inner.lock().await;

                if let Some(task) = inner.pop_highest() {
                    drop(inner);
                    self.push_ready.notify_waiters();
                    return Some(task);
                }

                if inner.shutdown_tokens > 0 {
                    inner.shutdown_tokens -= 1;
                    return None;
                }
                notified
            };
            wait.await;
        }
    }

    /// Close the queue and wake `workers` waiters with a `None` task.
    /// Remaining queued tasks are still drained before the `None`s.
    pub async fn shutdown(&self, workers: usize) {
        {
            let mut inner = self.inner.lock().await;
            inner.closed = true;
            inner.shutdown_tokens += workers;
        }
        self.pop_ready.notify_waiters();
    }

    /// Queued task count across all levels.
    pub async fn len(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.high.len() + inner.medium.len() + inner.low.len()
    }

    /// True when no tasks are queued.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SchemaId;
    use std::sync::Arc;
    use std::time::Duration;

    fn task(n: usize) -> Task {
        Task::SchemaDdl(SchemaId(n))
    }

    fn schema_idx(task: &Task) -> usize {
        match task {
            Task::SchemaDdl(SchemaId(n)) => *n,
            _ => panic!("unexpected task"),
        }
    }

    #[tokio::test]
    async fn test_priority_ordering() {
        let queue = TaskQueue::new();

        queue.push(task(3), Priority::Low).await.unwrap();
        queue.push(task(1), Priority::High).await.unwrap();
        queue.push(task(2), Priority::Medium).await.unwrap();
        queue.push(task(4), Priority::High).await.unwrap();

        let order: Vec<usize> = [
            queue.pop().await.unwrap(),
            queue.pop().await.unwrap(),
            queue.pop().await.unwrap(),
            queue.pop().await.unwrap(),
        ]
        .iter()
        .map(schema_idx)
        .collect();

        assert_eq!(order, vec![1, 4, 2, 3]);
    }

    #[tokio::test]
    async fn test_fifo_within_priority() {
        let queue = TaskQueue::new();
        for n in 0..5 {
            queue.push(task(n), Priority::Low).await.unwrap();
        }
        for n in 0..5 {
            assert_eq!(schema_idx(&queue.pop().await.unwrap()), n);
        }
    }

    #[tokio::test]
    async fn test_shutdown_wakes_each_worker_once() {
        let queue = Arc::new(TaskQueue::new());
        queue.push(task(0), Priority::High).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let q = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                let mut seen = 0;
                while q.pop().await.is_some() {
                    seen += 1;
                }
                seen
            }));
        }

        queue.shutdown(4).await;

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }
        // the one queued task was drained before the None wakeups
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_push_after_shutdown_fails() {
        let queue = TaskQueue::new();
        queue.shutdown(1).await;
        assert!(queue.push(task(0), Priority::High).await.is_err());
    }

    #[tokio::test]
    async fn test_bounded_push_blocks_until_pop() {
        let queue = Arc::new(TaskQueue::with_capacity(1));
        queue.push(task(0), Priority::Low).await.unwrap();

        let producer = {
            let q = Arc::clone(&queue);
            tokio::spawn(async move { q.push(task(1), Priority::Low).await })
        };

        // producer must be parked while the level is full
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!producer.is_finished());

        assert_eq!(schema_idx(&queue.pop().await.unwrap()), 0);
        producer.await.unwrap().unwrap();
        assert_eq!(schema_idx(&queue.pop().await.unwrap()), 1);
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(TaskQueue::new());

        let consumer = {
            let q = Arc::clone(&queue);
            tokio::spawn(async move { q.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(task(7), Priority::Medium).await.unwrap();

        let popped = consumer.await.unwrap().unwrap();
        assert_eq!(schema_idx(&popped), 7);
    }
}
