use futures::{Stream, StreamExt};

use crate::{
    cell::WatchCell,
    filter::{Edge, Filter},
};


/// A repeatable event supporting multiple listeners, built on a counter cell.
///
/// Two consumption styles are offered:
/// - *unqueued* ([`wait`](Self::wait), [`unqueued_events`](Self::unqueued_events)):
///   events landing while the listener is busy are dropped;
/// - *eventually consistent* ([`events`](Self::events)): intermediate events
///   may be missed, but an event set after the listener last ran is always
///   delivered.
#[derive(Clone, Default)]
pub struct RepeatedEvent(WatchCell<u64>);

impl RepeatedEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Triggers an event.
    pub fn set(&self) {
        let next = self.0.get() + 1;
        self.0.set(next);
    }

    /// Waits for the next event. Events triggered before the call are not
    /// queued and do not count.
    pub async fn wait(&self) {
        let token = self.0.get();
        self.0
            .wait_value(Filter::when(move |v: &u64| *v > token))
            .await;
    }

    /// Stream yielding once per received event, dropping events that land
    /// while the consumer's loop body runs. Equivalent to looping over
    /// [`wait`](Self::wait), without re-registering between events.
    pub fn unqueued_events(&self) -> impl Stream<Item = ()> {
        self.0.transitions(Edge::any()).map(|_| ())
    }

    /// Eventually consistent event stream: yields whenever events were set
    /// since the last yield. Use it to reprocess some shared state whose
    /// mutations are signalled by [`set`](Self::set); intermediate states may
    /// be skipped but the final one is always seen.
    pub fn events(&self) -> impl Stream<Item = ()> {
        let token = self.0.get();
        self.0
            .eventual_values(Filter::when(move |v: &u64| *v > token))
            .map(|_| ())
    }

    /// Like [`events`](Self::events), but the current position is repeated:
    /// the stream yields immediately even before any [`set`](Self::set),
    /// representing the start state.
    pub fn events_repeat_last(&self) -> impl Stream<Item = ()> {
        let token = self.0.get();
        self.0
            .eventual_values(Filter::when(move |v: &u64| *v >= token))
            .map(|_| ())
    }
}

impl std::fmt::Debug for RepeatedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RepeatedEvent").field(&self.0).finish()
    }
}
