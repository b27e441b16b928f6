//! Typed broadcast with a bounded buffer per subscriber.
//!
//! Every published item is shared as an `Arc<T>` with each current
//! subscriber. Subscribers pull items at their own pace. When one falls
//! behind and its buffer fills up, further items are withheld in that
//! subscriber's backlog and handed over as it pulls, so publishing never
//! waits and never loses an item.

use std::collections::VecDeque;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Items buffered per subscriber before the publisher applies backpressure
pub const DEFAULT_BUFFER_CAPACITY: usize = 256;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    #[error("subscription closed")]
    Closed,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeoutError {
    #[error("timed out waiting for an item")]
    Timeout,
    #[error("subscription closed")]
    Closed,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    #[error("no item available")]
    Empty,
    #[error("subscription closed")]
    Closed,
}

struct SlotState<T> {
    /// Items handed to the subscriber, at most `capacity`
    buffer: VecDeque<Arc<T>>,
    /// Items withheld while the buffer is full, in publish order
    backlog: VecDeque<Arc<T>>,
    closed: bool,
}

impl<T> SlotState<T> {
    fn len(&self) -> usize {
        self.buffer.len() + self.backlog.len()
    }

    /// Move withheld items into the buffer as far as it has room
    fn refill(&mut self, capacity: usize) {
        while self.buffer.len() < capacity {
            match self.backlog.pop_front() {
                Some(item) => self.buffer.push_back(item),
                None => break,
            }
        }
    }
}

struct Slot<T> {
    state: Mutex<SlotState<T>>,
    capacity: usize,
    /// Signalled when an item is queued or the slot is closed
    available: Condvar,
}

enum Offer {
    Buffered,
    Withheld,
    Closed,
}

impl<T> Slot<T> {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(SlotState {
                buffer: VecDeque::with_capacity(capacity.min(DEFAULT_BUFFER_CAPACITY)),
                backlog: VecDeque::new(),
                closed: false,
            }),
            capacity,
            available: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn close(&self) {
        self.lock().closed = true;
        self.available.notify_all();
    }

    fn offer(&self, item: &Arc<T>) -> Offer {
        let mut state = self.lock();
        if state.closed {
            return Offer::Closed;
        }
        if state.buffer.len() >= self.capacity {
            state.backlog.push_back(Arc::clone(item));
            return Offer::Withheld;
        }
        state.buffer.push_back(Arc::clone(item));
        drop(state);
        self.available.notify_one();
        Offer::Buffered
    }

    /// Pulling is the demand signal: it makes room for one withheld item
    fn take(&self, state: &mut SlotState<T>) -> Option<Arc<T>> {
        let item = state.buffer.pop_front();
        state.refill(self.capacity);
        item
    }
}

/// Publisher side of the broadcast
pub struct Broadcast<T> {
    subscribers: Mutex<Vec<Arc<Slot<T>>>>,
    capacity: usize,
}

impl<T> Default for Broadcast<T> {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl<T> Broadcast<T> {
    /// `capacity` is clamped to at least 1
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
        }
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<Arc<Slot<T>>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new subscriber; it only sees items published from now on
    pub fn subscribe(&self) -> Subscription<T> {
        let slot = Arc::new(Slot::new(self.capacity));
        self.subscribers().push(Arc::clone(&slot));
        Subscription { slot }
    }

    /// Number of subscribers that are still open
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers();
        subscribers.retain(|slot| !slot.is_closed());
        subscribers.len()
    }

    /// Queue `item` for every current subscriber and return how many got it.
    ///
    /// Never blocks: a subscriber whose buffer is full keeps the item in its
    /// backlog until it pulls.
    pub fn publish(&self, item: Arc<T>) -> usize {
        let targets: Vec<Arc<Slot<T>>> = {
            let mut subscribers = self.subscribers();
            subscribers.retain(|slot| !slot.is_closed());
            subscribers.clone()
        };

        let mut delivered = 0;
        for slot in targets {
            match slot.offer(&item) {
                Offer::Buffered => delivered += 1,
                Offer::Withheld => {
                    tracing::trace!(capacity = self.capacity, "Subscriber buffer full, item withheld.");
                    delivered += 1;
                }
                Offer::Closed => {}
            }
        }

        delivered
    }
}

impl<T: Send + Sync + 'static> Broadcast<T> {
    /// Run `consumer` on a dedicated thread for every item published from
    /// now on, one at a time.
    ///
    /// A panicking consumer is logged and keeps receiving later items. The
    /// thread exits once the broadcast is dropped.
    pub fn subscribe_with<F>(&self, name: &str, mut consumer: F) -> io::Result<JoinHandle<()>>
    where
        F: FnMut(Arc<T>) + Send + 'static,
    {
        let subscription = self.subscribe();
        let name = name.to_owned();

        thread::Builder::new().name(name.clone()).spawn(move || {
            while let Ok(item) = subscription.recv() {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| consumer(item)));
                if outcome.is_err() {
                    tracing::error!(subscriber = %name, "Subscriber failed on item.");
                }
            }
        })
    }
}

impl<T> Drop for Broadcast<T> {
    fn drop(&mut self) {
        for slot in self.subscribers().drain(..) {
            slot.close();
        }
    }
}

/// Receiving side of the broadcast.
///
/// Pulling an item is the demand signal: it frees a place in the buffer for
/// the publisher. Dropping the subscription unsubscribes.
pub struct Subscription<T> {
    slot: Arc<Slot<T>>,
}

impl<T> Subscription<T> {
    /// Block until an item is available. Items published before closing
    /// are still handed out.
    pub fn recv(&self) -> Result<Arc<T>, RecvError> {
        let mut state = self.slot.lock();
        loop {
            if let Some(item) = self.slot.take(&mut state) {
                return Ok(item);
            }
            if state.closed {
                return Err(RecvError::Closed);
            }
            state = self
                .slot
                .available
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Arc<T>, RecvTimeoutError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.slot.lock();
        loop {
            if let Some(item) = self.slot.take(&mut state) {
                return Ok(item);
            }
            if state.closed {
                return Err(RecvTimeoutError::Closed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(RecvTimeoutError::Timeout);
            }
            state = self
                .slot
                .available
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    pub fn try_recv(&self) -> Result<Arc<T>, TryRecvError> {
        let mut state = self.slot.lock();
        match self.slot.take(&mut state) {
            Some(item) => Ok(item),
            None if state.closed => Err(TryRecvError::Closed),
            None => Err(TryRecvError::Empty),
        }
    }

    /// Take up to `max` items that are already buffered, without blocking
    pub fn drain(&self, max: usize) -> Vec<Arc<T>> {
        let mut state = self.slot.lock();
        let mut items = Vec::new();
        while items.len() < max {
            match self.slot.take(&mut state) {
                Some(item) => items.push(item),
                None => break,
            }
        }
        items
    }

    /// Items not yet pulled, withheld ones included
    pub fn pending(&self) -> usize {
        self.slot.lock().len()
    }

    /// Items ready in the bounded buffer
    pub fn buffered(&self) -> usize {
        self.slot.lock().buffer.len()
    }

    pub fn is_closed(&self) -> bool {
        self.slot.is_closed()
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.slot.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn every_subscriber_receives_each_item() {
        let broadcast = Broadcast::default();
        let first = broadcast.subscribe();
        let second = broadcast.subscribe();

        assert_eq!(broadcast.publish(Arc::new(1)), 2);
        assert_eq!(broadcast.publish(Arc::new(2)), 2);

        assert_eq!(*first.recv().unwrap(), 1);
        assert_eq!(*first.recv().unwrap(), 2);
        assert_eq!(*second.try_recv().unwrap(), 1);
        assert_eq!(*second.try_recv().unwrap(), 2);
        assert_eq!(second.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn late_subscriber_misses_earlier_items() {
        let broadcast = Broadcast::default();
        broadcast.publish(Arc::new("early"));

        let late = broadcast.subscribe();
        assert_eq!(
            late.recv_timeout(Duration::from_millis(10)),
            Err(RecvTimeoutError::Timeout)
        );
    }

    #[test]
    fn dropped_subscription_is_pruned() {
        let broadcast = Broadcast::<u32>::default();
        let kept = broadcast.subscribe();
        drop(broadcast.subscribe());

        assert_eq!(broadcast.subscriber_count(), 1);
        assert_eq!(broadcast.publish(Arc::new(7)), 1);
        assert_eq!(*kept.recv().unwrap(), 7);
    }

    #[test]
    fn slow_subscriber_does_not_block_others() {
        let broadcast = Broadcast::new(2);
        let slow = broadcast.subscribe();
        let fast = broadcast.subscribe();

        let started = Instant::now();
        for i in 0..5 {
            assert_eq!(broadcast.publish(Arc::new(i)), 2);
            assert_eq!(*fast.recv().unwrap(), i);
        }
        assert!(started.elapsed() < Duration::from_millis(500));

        assert!(!slow.is_closed());
        assert_eq!(slow.buffered(), 2);
        assert_eq!(slow.pending(), 5);
    }

    #[test]
    fn withheld_items_arrive_in_order_as_subscriber_pulls() {
        let broadcast = Broadcast::new(3);
        let subscription = broadcast.subscribe();
        for i in 0..10 {
            broadcast.publish(Arc::new(i));
        }

        assert_eq!(*subscription.recv().unwrap(), 0);
        assert_eq!(subscription.buffered(), 3);

        let rest: Vec<i32> = subscription.drain(usize::MAX).iter().map(|i| **i).collect();
        assert_eq!(rest, (1..10).collect::<Vec<_>>());
        assert_eq!(subscription.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn withheld_items_survive_publisher_drop() {
        let broadcast = Broadcast::new(1);
        let subscription = broadcast.subscribe();
        broadcast.publish(Arc::new("first"));
        broadcast.publish(Arc::new("second"));
        drop(broadcast);

        assert_eq!(*subscription.recv().unwrap(), "first");
        assert_eq!(*subscription.recv().unwrap(), "second");
        assert_eq!(subscription.recv(), Err(RecvError::Closed));
    }

    #[test]
    fn blocked_receiver_wakes_on_publish() {
        let broadcast = Arc::new(Broadcast::new(1));
        let subscription = broadcast.subscribe();

        let publisher = Arc::clone(&broadcast);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            publisher.publish(Arc::new(1))
        });

        assert_eq!(
            *subscription.recv_timeout(Duration::from_secs(5)).unwrap(),
            1
        );
        assert_eq!(handle.join().unwrap(), 1);
    }

    #[test]
    fn closing_publisher_ends_subscription() {
        let broadcast = Broadcast::default();
        let subscription = broadcast.subscribe();
        broadcast.publish(Arc::new("last"));
        drop(broadcast);

        assert_eq!(*subscription.recv().unwrap(), "last");
        assert_eq!(subscription.recv(), Err(RecvError::Closed));
    }

    #[test]
    fn panicking_consumer_stays_subscribed() {
        let broadcast = Broadcast::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);

        let handle = broadcast
            .subscribe_with("test-consumer", move |item: Arc<u32>| {
                counter.fetch_add(1, Ordering::SeqCst);
                if *item == 0 {
                    panic!("consumer failure");
                }
            })
            .unwrap();

        broadcast.publish(Arc::new(0));
        broadcast.publish(Arc::new(1));
        drop(broadcast);
        handle.join().unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
