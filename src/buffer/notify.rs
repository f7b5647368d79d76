use bitflags::bitflags;
use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;

use super::BufferId;

bitflags! {
    /// Kinds of buffer state that changed in one notification
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChangeSet: u16 {
        const LANGUAGE = 1 << 0;
        const DIRTY = 1 << 1;
        const FORMAT = 1 << 2;
        const UNICODE = 1 << 3;
        const READ_ONLY = 1 << 4;
        const STATUS = 1 << 5;
        const TIMESTAMP = 1 << 6;
        const FILE_NAME = 1 << 7;
        const RECENT_TAG = 1 << 8;
        const LEXING = 1 << 9;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferEvent {
    pub id: BufferId,
    pub changes: ChangeSet,
}

/// Fan-out of buffer events to every subscriber.
///
/// Delivery is synchronous with the mutation; subscribers whose receiver was
/// dropped are pruned on the next publish.
#[derive(Debug, Clone, Default)]
pub struct ChangeBus {
    subscribers: Arc<Mutex<Vec<Sender<BufferEvent>>>>,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<BufferEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: BufferEvent) {
        self.subscribers.lock().retain(|tx| tx.send(event).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_subscriber_gets_the_event() {
        let bus = ChangeBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        let event = BufferEvent {
            id: BufferId(3),
            changes: ChangeSet::DIRTY | ChangeSet::UNICODE,
        };
        bus.publish(event);

        assert_eq!(a.try_recv(), Ok(event));
        assert_eq!(b.try_recv(), Ok(event));
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let bus = ChangeBus::new();
        let keep = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(BufferEvent {
            id: BufferId(1),
            changes: ChangeSet::STATUS,
        });
        assert_eq!(bus.subscriber_count(), 1);
        assert!(keep.try_recv().is_ok());
    }
}
