//! Deadline queue.
//!
//! A priority-ordered set of future instants with attached kinds. The
//! run loop sleeps until the earliest deadline, then drains everything
//! due onto a channel the kernel consumes. Consumers must be idempotent:
//! wake-up may be late and a deadline may be observed after the
//! condition it guards has already resolved.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::domain::ports::Clock;

/// What elapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadlineKind {
    /// No initial heartbeat before the registration timeout
    RegistrationTimeout { agent_id: Uuid },
    /// Human-approval decision window closed
    ApprovalDeadline { ticket_id: Uuid },
    /// Validator iteration exceeded its window
    ValidationDeadline { task_id: Uuid, iteration: u32 },
    /// In-progress task exceeded its phase timeout
    TaskTimeout { task_id: Uuid },
}

/// A scheduled deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deadline {
    pub due_at: DateTime<Utc>,
    pub kind: DeadlineKind,
}

#[derive(Debug)]
struct HeapEntry {
    due_at: DateTime<Utc>,
    seq: u64,
    deadline: Deadline,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due_at == other.due_at && self.seq == other.seq
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.due_at, self.seq).cmp(&(other.due_at, other.seq))
    }
}

/// Priority-ordered deadline timer.
pub struct DeadlineQueue {
    clock: Arc<dyn Clock>,
    heap: Mutex<BinaryHeap<Reverse<HeapEntry>>>,
    seq: AtomicU64,
    notify: Notify,
}

impl DeadlineQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            heap: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    /// Schedule a deadline. Wakes the run loop if this becomes the earliest.
    pub fn schedule(&self, deadline: Deadline) {
        let entry = HeapEntry {
            due_at: deadline.due_at,
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            deadline,
        };
        self.heap
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(Reverse(entry));
        self.notify.notify_one();
    }

    /// Remove and return every deadline due at or before `now`.
    pub fn pop_due(&self, now: DateTime<Utc>) -> Vec<Deadline> {
        let mut heap = self.heap.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut due = Vec::new();
        while heap.peek().is_some_and(|Reverse(entry)| entry.due_at <= now) {
            if let Some(Reverse(entry)) = heap.pop() {
                due.push(entry.deadline);
            }
        }
        due
    }

    /// Next pending instant, if any.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.heap
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .peek()
            .map(|Reverse(e)| e.due_at)
    }

    pub fn len(&self) -> usize {
        self.heap.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Perpetual loop: fire due deadlines onto `tx`.
    ///
    /// Exits when the receiving side is dropped.
    pub async fn run(self: Arc<Self>, tx: mpsc::Sender<Deadline>) {
        loop {
            for deadline in self.pop_due(self.clock.utc_now()) {
                if tx.send(deadline).await.is_err() {
                    return;
                }
            }

            let sleep = match self.next_due() {
                Some(due) => {
                    let now = self.clock.utc_now();
                    (due - now).to_std().unwrap_or(std::time::Duration::ZERO)
                }
                // Idle until something is scheduled.
                None => std::time::Duration::from_secs(3600),
            };

            tokio::select! {
                () = tokio::time::sleep(sleep) => {}
                () = self.notify.notified() => {}
            }

            if tx.is_closed() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::ManualClock;
    use chrono::Duration;

    #[test]
    fn test_pop_due_in_order() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::starting_at(start));
        let queue = DeadlineQueue::new(clock);

        let late = Deadline {
            due_at: start + Duration::seconds(30),
            kind: DeadlineKind::TaskTimeout { task_id: Uuid::new_v4() },
        };
        let early = Deadline {
            due_at: start + Duration::seconds(10),
            kind: DeadlineKind::ApprovalDeadline { ticket_id: Uuid::new_v4() },
        };
        queue.schedule(late.clone());
        queue.schedule(early.clone());

        // Nothing due yet.
        assert!(queue.pop_due(start).is_empty());

        let due = queue.pop_due(start + Duration::seconds(15));
        assert_eq!(due, vec![early]);

        let due = queue.pop_due(start + Duration::seconds(60));
        assert_eq!(due, vec![late]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_equal_instants_fire_in_schedule_order() {
        let start = Utc::now();
        let queue = DeadlineQueue::new(Arc::new(ManualClock::starting_at(start)));
        let due_at = start + Duration::seconds(5);

        let a = Deadline { due_at, kind: DeadlineKind::TaskTimeout { task_id: Uuid::new_v4() } };
        let b = Deadline { due_at, kind: DeadlineKind::ApprovalDeadline { ticket_id: Uuid::new_v4() } };
        queue.schedule(a.clone());
        queue.schedule(b.clone());

        assert_eq!(queue.pop_due(due_at), vec![a, b]);
    }

    #[tokio::test]
    async fn test_run_loop_delivers_due_deadlines() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::starting_at(start));
        let queue = Arc::new(DeadlineQueue::new(clock.clone()));

        let task_id = Uuid::new_v4();
        queue.schedule(Deadline {
            due_at: start, // already due
            kind: DeadlineKind::TaskTimeout { task_id },
        });

        let (tx, mut rx) = mpsc::channel(8);
        let handle = tokio::spawn(queue.clone().run(tx));

        let fired = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .expect("deadline should fire")
            .expect("channel open");
        assert_eq!(fired.kind, DeadlineKind::TaskTimeout { task_id });

        drop(rx);
        queue.schedule(Deadline {
            due_at: start,
            kind: DeadlineKind::TaskTimeout { task_id },
        });
        let _ = tokio::time::timeout(std::time::Duration::from_secs(2), handle).await;
    }
}
