//! Request lifecycle events
//!
//! Every state change of a request's task is published on a broadcast bus
//! owned by the session. Publishing never blocks; with no subscribers the
//! event is dropped and slow subscribers observe `RecvError::Lagged`.

use tokio::sync::broadcast;

use crate::backend::types::TaskId;

/// What happened to a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEventKind {
    /// The task was started or continued
    Resumed,
    /// The task was paused
    Suspended,
    /// The task was cancelled
    Cancelled,
    /// The task finished and its request was finalized
    Completed,
}

/// A lifecycle notification for one task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleEvent {
    /// What happened
    pub kind: LifecycleEventKind,
    /// Task concerned
    pub task: TaskId,
}

/// Broadcast channel for lifecycle events
#[derive(Clone, Debug)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    /// Capacity is clamped to at least 1
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub(crate) fn publish(&self, kind: LifecycleEventKind, task: TaskId) {
        let _ = self.tx.send(LifecycleEvent { kind, task });
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_is_dropped() {
        let bus = EventBus::new(0);
        bus.publish(LifecycleEventKind::Resumed, TaskId::new(1));

        let mut rx = bus.subscribe();
        bus.publish(LifecycleEventKind::Completed, TaskId::new(1));
        assert_eq!(
            rx.try_recv().unwrap(),
            LifecycleEvent {
                kind: LifecycleEventKind::Completed,
                task: TaskId::new(1)
            }
        );
        assert!(rx.try_recv().is_err());
    }
}
