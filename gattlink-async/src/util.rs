use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

use futures_channel::oneshot;

pub struct ScopeGuard<F: FnOnce()> {
    dropfn: ManuallyDrop<F>,
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        // SAFETY: This is OK because `dropfn` is `ManuallyDrop` which will not be dropped by the compiler.
        let dropfn = unsafe { ManuallyDrop::take(&mut self.dropfn) };
        dropfn();
    }
}

pub fn defer<F: FnOnce()>(dropfn: F) -> ScopeGuard<F> {
    ScopeGuard {
        dropfn: ManuallyDrop::new(dropfn),
    }
}

pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct BroadcastSender<T> {
    sender: async_broadcast::Sender<T>,
    _keep_alive: async_broadcast::InactiveReceiver<T>,
}

impl<T> Deref for BroadcastSender<T> {
    type Target = async_broadcast::Sender<T>;

    fn deref(&self) -> &Self::Target {
        &self.sender
    }
}

impl<T> DerefMut for BroadcastSender<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.sender
    }
}

pub type BroadcastReceiver<T> = async_broadcast::Receiver<T>;

pub fn broadcast<T>(cap: usize) -> BroadcastSender<T> {
    let (mut sender, receiver) = async_broadcast::broadcast(cap);
    sender.set_overflow(true);
    BroadcastSender {
        sender,
        _keep_alive: receiver.deactivate(),
    }
}

pub fn watch<T>() -> BroadcastSender<T> {
    broadcast(1)
}

/// A published value with a single writer.
///
/// Readers either sample the current value or subscribe to a stream that yields the latest
/// value after every change.
pub struct Watch<T> {
    value: RwLock<T>,
    updates: BroadcastSender<T>,
}

impl<T: Clone> Watch<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: RwLock::new(value),
            updates: watch(),
        }
    }

    /// Like [`Watch::new`], but subscribers keep up to `cap` values instead of only the latest.
    pub fn with_capacity(value: T, cap: usize) -> Self {
        Self {
            value: RwLock::new(value),
            updates: broadcast(cap),
        }
    }

    pub fn get(&self) -> T {
        self.value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, value: T) {
        *self.value.write().unwrap_or_else(PoisonError::into_inner) = value.clone();
        let _ = self.updates.try_broadcast(value);
    }

    pub fn subscribe(&self) -> BroadcastReceiver<T> {
        self.updates.new_receiver()
    }
}

/// A single-use callback slot resolved from the event loop.
///
/// Arming installs a fresh oneshot sender. Resolving takes the sender out of the slot and
/// sends through it, so a value is delivered at most once even when arming and resolving
/// race on different threads.
pub struct Slot<T> {
    sender: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            sender: Mutex::new(None),
        }
    }
}

impl<T> Slot<T> {
    pub fn arm(&self) -> oneshot::Receiver<T> {
        let (sender, receiver) = oneshot::channel();
        *lock(&self.sender) = Some(sender);
        receiver
    }

    /// Delivers `value` to the armed receiver, if any. Returns whether a receiver was armed.
    pub fn resolve(&self, value: T) -> bool {
        let sender = lock(&self.sender).take();
        match sender {
            Some(sender) => {
                let _ = sender.send(value);
                true
            }
            None => false,
        }
    }

    /// Drops the armed sender, which completes its receiver with `Canceled`.
    pub fn disarm(&self) {
        lock(&self.sender).take();
    }

    pub fn is_armed(&self) -> bool {
        lock(&self.sender).is_some()
    }
}

#[cfg(test)]
mod tests {
    use futures_lite::future::block_on;

    use super::*;

    #[test]
    fn slot_delivers_at_most_once() {
        let slot = Slot::default();
        let receiver = slot.arm();
        assert!(slot.is_armed());
        assert!(slot.resolve(1));
        assert!(!slot.resolve(2));
        assert_eq!(block_on(receiver), Ok(1));
        assert!(!slot.is_armed());
    }

    #[test]
    fn disarmed_slot_cancels_receiver() {
        let slot: Slot<u8> = Slot::default();
        let receiver = slot.arm();
        slot.disarm();
        assert!(block_on(receiver).is_err());
        assert!(!slot.resolve(3));
    }

    #[test]
    fn watch_keeps_latest_value() {
        let cell = Watch::new(0u16);
        let mut updates = cell.subscribe();
        cell.set(1);
        cell.set(2);
        assert_eq!(cell.get(), 2);
        assert!(matches!(
            updates.try_recv(),
            Err(async_broadcast::TryRecvError::Overflowed(1))
        ));
        assert_eq!(updates.try_recv().ok(), Some(2));
        assert!(updates.try_recv().is_err());
    }

    #[test]
    fn deferred_closure_runs_on_drop() {
        let mut ran = false;
        {
            let _guard = defer(|| ran = true);
        }
        assert!(ran);
    }

    #[test]
    fn watch_with_capacity_queues_values() {
        let cell = Watch::with_capacity(Vec::<u8>::new(), 4);
        let mut updates = cell.subscribe();
        cell.set(vec![1]);
        cell.set(vec![2]);
        assert_eq!(cell.get(), vec![2]);
        assert_eq!(updates.try_recv().ok(), Some(vec![1]));
        assert_eq!(updates.try_recv().ok(), Some(vec![2]));
    }
}
