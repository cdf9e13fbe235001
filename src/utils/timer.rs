//! Background-thread timer usable from any single-threaded executor.
//!
//! The worker thread starts lazily on first use and sleeps on a condition
//! variable until the earliest deadline. Registered wakers are woken at their
//! deadline; dropping a [`Sleep`] before that deregisters it.

use std::{
    collections::BTreeMap,
    future::Future,
    pin::Pin,
    sync::{Condvar, LazyLock, Mutex},
    task::{Context, Poll, Waker},
    time::{Duration, Instant},
};

use slabmap::SlabMap;


static SLEEP_REGISTRY: LazyLock<SleepRegistry> = LazyLock::new(|| SleepRegistry {
    queue: Mutex::new(SleepQueue::new()),
    condvar: Condvar::new(),
});

struct SleepRegistry {
    queue: Mutex<SleepQueue>,
    condvar: Condvar,
}

impl SleepRegistry {
    fn run_worker(&self) {
        let mut wakes = Vec::new();
        let mut queue = self.queue.lock().unwrap();
        loop {
            let now = Instant::now();
            let q = &mut *queue;
            loop {
                let Some(task) = q.tasks.first_entry() else {
                    break;
                };
                if task.key().instant > now {
                    break;
                }
                wakes.push(q.entries[*task.get()].take().unwrap().waker);
                task.remove();
            }
            if !wakes.is_empty() {
                drop(queue);
                for waker in wakes.drain(..) {
                    waker.wake();
                }
                queue = self.queue.lock().unwrap();
                continue;
            }
            queue = if let Some(task) = queue.tasks.first_key_value() {
                let wait_duration = task.0.instant.saturating_duration_since(now);
                self.condvar.wait_timeout(queue, wait_duration).unwrap().0
            } else {
                self.condvar.wait(queue).unwrap()
            };
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    instant: Instant,
    seq: u64,
}

struct Entry {
    waker: Waker,
    key: Key,
}

impl Entry {
    fn set_waker(&mut self, waker: &Waker) {
        if !self.waker.will_wake(waker) {
            self.waker = waker.clone();
        }
    }
}

struct SleepQueue {
    next_seq: u64,
    tasks: BTreeMap<Key, usize>,
    entries: SlabMap<Option<Entry>>,
    thread_running: bool,
}

impl SleepQueue {
    fn lock() -> std::sync::MutexGuard<'static, SleepQueue> {
        SLEEP_REGISTRY.queue.lock().unwrap()
    }

    fn new() -> Self {
        Self {
            next_seq: 0,
            tasks: BTreeMap::new(),
            entries: SlabMap::new(),
            thread_running: false,
        }
    }

    fn insert(&mut self, instant: Instant, waker: Waker, condvar: &Condvar) -> usize {
        self.ensure_thread_running();
        let key = Key {
            instant,
            seq: self.next_seq,
        };
        self.next_seq += 1;

        let notify = if let Some(first_task) = self.tasks.first_key_value() {
            key < *first_task.0
        } else {
            true
        };
        let id = self.entries.insert(Some(Entry { waker, key }));
        self.tasks.insert(key, id);
        if notify {
            condvar.notify_one();
        }
        id
    }

    fn ensure_thread_running(&mut self) {
        if self.thread_running {
            return;
        }
        self.thread_running = true;
        std::thread::spawn(move || SLEEP_REGISTRY.run_worker());
    }

    fn poll_or_remove(&mut self, id: usize, cx: &Context) -> Poll<()> {
        if let Some(e) = &mut self.entries[id] {
            e.set_waker(cx.waker());
            Poll::Pending
        } else {
            self.entries.remove(id);
            Poll::Ready(())
        }
    }

    fn remove(&mut self, id: usize) {
        if let Some(e) = self.entries.remove(id).unwrap() {
            self.tasks.remove(&e.key);
        }
    }
}

enum SleepState {
    Idle,
    Registered(usize),
    Done,
}

/// Future resolving at a deadline. Created by [`sleep`] and [`sleep_until`].
///
/// Registers with the timer thread on first poll and deregisters on drop if
/// the deadline has not fired.
pub struct Sleep {
    deadline: Instant,
    state: SleepState,
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        match this.state {
            SleepState::Idle => {
                if this.deadline <= Instant::now() {
                    this.state = SleepState::Done;
                    return Poll::Ready(());
                }
                let id = SleepQueue::lock().insert(
                    this.deadline,
                    cx.waker().clone(),
                    &SLEEP_REGISTRY.condvar,
                );
                this.state = SleepState::Registered(id);
                Poll::Pending
            }
            SleepState::Registered(id) => {
                let poll = SleepQueue::lock().poll_or_remove(id, cx);
                if poll.is_ready() {
                    this.state = SleepState::Done;
                }
                poll
            }
            SleepState::Done => Poll::Ready(()),
        }
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        if let SleepState::Registered(id) = self.state {
            SleepQueue::lock().remove(id);
        }
    }
}

/// Wait for the given duration.
pub fn sleep(duration: Duration) -> Sleep {
    sleep_until(Instant::now() + duration)
}

/// Wait until the given instant.
pub fn sleep_until(deadline: Instant) -> Sleep {
    Sleep {
        deadline,
        state: SleepState::Idle,
    }
}
