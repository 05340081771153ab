//! Bounded per-consumer outbox with drop-oldest overflow.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use shared::UpdateEvent;
use tokio::sync::Notify;
use uuid::Uuid;

use super::Hub;

/// Result of offering one event to an outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Enqueued,
    /// The outbox was full; its oldest event was evicted to make room.
    EvictedOldest,
    /// Still full after eviction; the event was not delivered to this consumer.
    Dropped,
}

/// Bounded FIFO of update events. The hub pushes, one session drains.
#[derive(Debug)]
pub struct Outbox {
    queue: Mutex<VecDeque<UpdateEvent>>,
    capacity: usize,
    notify: Notify,
}

impl Outbox {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<UpdateEvent>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }

    /// Non-blocking enqueue. Hands the event back when the outbox is full.
    pub fn try_push(&self, event: UpdateEvent) -> Result<(), UpdateEvent> {
        {
            let mut queue = self.queue();
            if queue.len() >= self.capacity {
                return Err(event);
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
        Ok(())
    }

    pub fn evict_oldest(&self) -> Option<UpdateEvent> {
        self.queue().pop_front()
    }

    /// Enqueue with drop-oldest: on overflow evict one element from the front and
    /// retry once; give up for this consumer if that also fails.
    pub fn offer(&self, event: UpdateEvent) -> Delivery {
        let event = match self.try_push(event) {
            Ok(()) => return Delivery::Enqueued,
            Err(event) => event,
        };
        self.evict_oldest();
        match self.try_push(event) {
            Ok(()) => Delivery::EvictedOldest,
            Err(_) => Delivery::Dropped,
        }
    }

    pub fn try_recv(&self) -> Option<UpdateEvent> {
        self.queue().pop_front()
    }

    /// Wait for the next event. Cancel-safe: dropping the future loses nothing.
    pub async fn recv(&self) -> UpdateEvent {
        loop {
            if let Some(event) = self.try_recv() {
                return event;
            }
            // notify_one stores a permit, so a push between the check and here is not missed
            self.notify.notified().await;
        }
    }
}

/// Handle to one registered outbox. Unsubscribes from the hub when dropped.
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    outbox: Arc<Outbox>,
    hub: Weak<Hub>,
}

impl Subscription {
    pub(super) fn new(id: Uuid, outbox: Arc<Outbox>, hub: Weak<Hub>) -> Self {
        Self { id, outbox, hub }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub async fn recv(&self) -> UpdateEvent {
        self.outbox.recv().await
    }

    pub fn try_recv(&self) -> Option<UpdateEvent> {
        self.outbox.try_recv()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
    }
}
