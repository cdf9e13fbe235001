use std::{
    future::Future,
    mem::take,
    pin::Pin,
    task::{Context, Poll, Waker},
};

use slabmap::SlabMap;

use crate::registry::EntryRef;


/// Set of parked wakers tied to one predicate entry.
///
/// `wake_all` advances the epoch and clears the set, so slot ids from earlier
/// epochs are dead even if the slab reuses them. A parked future detects its
/// own wake by the epoch having moved past the one it parked in.
pub(crate) struct WaitQueue {
    wakers: SlabMap<Waker>,
    epoch: u64,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self {
            wakers: SlabMap::new(),
            epoch: 0,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn enqueue(&mut self, waker: Waker) -> usize {
        self.wakers.insert(waker)
    }

    pub fn update(&mut self, slot: usize, waker: &Waker) {
        let w = &mut self.wakers[slot];
        if !w.will_wake(waker) {
            *w = waker.clone();
        }
    }

    pub fn remove(&mut self, slot: usize) {
        self.wakers.remove(slot);
    }

    /// Wake every parked task in slot order and clear the set. Tasks parked
    /// afterward belong to the next epoch and are unaffected.
    pub fn wake_all(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        for (_, waker) in take(&mut self.wakers) {
            waker.wake();
        }
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait queue plus the most recent snapshot that satisfied the entry's
/// predicate. A woken task reads this snapshot, never the possibly-changed
/// current value.
pub(crate) struct WaitEntry<S> {
    pub queue: WaitQueue,
    pub last: Option<S>,
}

impl<S> Default for WaitEntry<S> {
    fn default() -> Self {
        Self {
            queue: WaitQueue::new(),
            last: None,
        }
    }
}

enum ParkState {
    Idle,
    Parked { slot: usize, epoch: u64 },
    Done,
}

/// Future that parks on a wait entry until `wake_all` and resolves to the
/// recorded snapshot.
///
/// Owns its own ref on the entry, registers its waker on first poll, and
/// deregisters on drop unless the epoch it parked in has already ended.
pub(crate) struct Park<K, S> {
    entry: EntryRef<K, WaitEntry<S>>,
    state: ParkState,
}

impl<K, S> Park<K, S> {
    pub fn new(entry: EntryRef<K, WaitEntry<S>>) -> Self {
        Self {
            entry,
            state: ParkState::Idle,
        }
    }
}

impl<K, S: Clone> Future for Park<K, S> {
    type Output = S;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<S> {
        let this = self.get_mut();
        this.entry.with(|e| match this.state {
            ParkState::Idle => {
                let slot = e.queue.enqueue(cx.waker().clone());
                this.state = ParkState::Parked {
                    slot,
                    epoch: e.queue.epoch(),
                };
                Poll::Pending
            }
            ParkState::Parked { slot, epoch } => {
                if e.queue.epoch() == epoch {
                    e.queue.update(slot, cx.waker());
                    Poll::Pending
                } else {
                    this.state = ParkState::Done;
                    Poll::Ready(e.last.clone().unwrap())
                }
            }
            ParkState::Done => panic!("Park polled after completion"),
        })
    }
}

impl<K, S> Drop for Park<K, S> {
    fn drop(&mut self) {
        if let ParkState::Parked { slot, epoch } = self.state {
            self.entry.with(|e| {
                if e.queue.epoch() == epoch {
                    e.queue.remove(slot);
                }
            });
        }
    }
}

/// Yield once to the executor, then resume.
///
/// Used by waits whose condition already holds, so they still suspend exactly
/// once instead of returning inline.
pub async fn checkpoint() {
    struct Checkpoint(bool);
    impl Future for Checkpoint {
        type Output = ();
        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
            if self.0 {
                Poll::Ready(())
            } else {
                self.0 = true;
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }
    Checkpoint(false).await
}
