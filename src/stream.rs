use std::{
    cell::RefCell,
    future::Future,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
    time::Duration,
};

use futures::Stream;

use crate::{
    cell::CellNode,
    filter::{Edge, Filter},
    queue::{Park, WaitEntry},
    registry::EntryRef,
    utils::timer::{sleep, Sleep},
};


/// Infinite stream of values matching a [`Filter`], with eventual consistency.
///
/// Created by [`Watch::eventual_values`](crate::Watch::eventual_values) and
/// [`Watch::eventual_values_held`](crate::Watch::eventual_values_held).
///
/// Values changed while the consumer runs its loop body may be skipped, but
/// after the last change the stream always yields the latest matching value.
pub struct EventualValues<T: 'static> {
    node: Rc<CellNode<T>>,
    filter: Filter<T>,
    held_for: Option<Duration>,
    /// Shared with the "value differs from the last yield" condition.
    last: Rc<RefCell<Option<T>>>,
    refs: Option<StreamRefs<T>>,
    state: EvState<T>,
}

struct StreamRefs<T: 'static> {
    matched: EntryRef<Filter<T>, WaitEntry<T>>,
    changed: EntryRef<Filter<T>, WaitEntry<T>>,
    broke: Option<EntryRef<Filter<T>, WaitEntry<T>>>,
}

enum EvState<T> {
    Check,
    ParkedMatch(Park<Filter<T>, T>),
    Hold {
        candidate: T,
        timer: Sleep,
        broke: Park<Filter<T>, T>,
    },
    Yielded,
    ParkedChange(Park<Filter<T>, T>),
}

// No field is pinned; the contained futures are all Unpin themselves.
impl<T> Unpin for EventualValues<T> {}

impl<T: Clone + PartialEq + 'static> EventualValues<T> {
    pub(crate) fn new(node: Rc<CellNode<T>>, filter: Filter<T>, held_for: Option<Duration>) -> Self {
        Self {
            node,
            filter,
            held_for,
            last: Rc::new(RefCell::new(None)),
            refs: None,
            state: EvState::Check,
        }
    }

    /// Registers the stream's conditions on first poll.
    fn refs(&mut self) -> &StreamRefs<T> {
        if self.refs.is_none() {
            let matched = self.node.open_level(self.filter.clone());
            let changed = {
                let last = self.last.clone();
                self.node
                    .open_level(Filter::when(move |v: &T| last.borrow().as_ref() != Some(v)))
            };
            let broke = self.held_for.map(|_| {
                let filter = self.filter.clone();
                self.node
                    .open_level(Filter::when(move |v: &T| !filter.matches(v)))
            });
            self.refs = Some(StreamRefs {
                matched,
                changed,
                broke,
            });
        }
        self.refs.as_ref().unwrap()
    }

    fn stage(&mut self, candidate: T) {
        self.state = match self.held_for {
            Some(d) => EvState::Hold {
                candidate,
                timer: sleep(d),
                broke: Park::new(self.refs().broke.clone().unwrap()),
            },
            None => EvState::Yielded,
        };
    }
}

impl<T: Clone + PartialEq + 'static> Stream for EventualValues<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        this.refs();
        loop {
            match &mut this.state {
                EvState::Check => {
                    if this.node.matches(&this.filter) {
                        let candidate = this.node.get();
                        match this.held_for {
                            Some(_) => this.stage(candidate),
                            None => {
                                *this.last.borrow_mut() = Some(candidate.clone());
                                this.state = EvState::Yielded;
                                return Poll::Ready(Some(candidate));
                            }
                        }
                    } else {
                        let park = Park::new(this.refs().matched.clone());
                        this.state = EvState::ParkedMatch(park);
                    }
                }
                EvState::ParkedMatch(park) => match Pin::new(park).poll(cx) {
                    Poll::Ready(candidate) => match this.held_for {
                        Some(_) => this.stage(candidate),
                        None => {
                            *this.last.borrow_mut() = Some(candidate.clone());
                            this.state = EvState::Yielded;
                            return Poll::Ready(Some(candidate));
                        }
                    },
                    Poll::Pending => return Poll::Pending,
                },
                EvState::Hold {
                    candidate,
                    timer,
                    broke,
                } => {
                    if Pin::new(broke).poll(cx).is_ready() {
                        this.state = EvState::Check;
                        continue;
                    }
                    match Pin::new(timer).poll(cx) {
                        Poll::Ready(()) => {
                            // Hold complete; yield the value at the end of it.
                            let current = this.node.get();
                            let value = if this.filter.matches(&current) {
                                current
                            } else {
                                candidate.clone()
                            };
                            *this.last.borrow_mut() = Some(value.clone());
                            this.state = EvState::Yielded;
                            return Poll::Ready(Some(value));
                        }
                        Poll::Pending => return Poll::Pending,
                    }
                }
                EvState::Yielded => {
                    let current = this.node.get();
                    if this.last.borrow().as_ref() == Some(&current) {
                        let park = Park::new(this.refs().changed.clone());
                        this.state = EvState::ParkedChange(park);
                    } else {
                        this.state = EvState::Check;
                    }
                }
                EvState::ParkedChange(park) => match Pin::new(park).poll(cx) {
                    Poll::Ready(_) => this.state = EvState::Check,
                    Poll::Pending => return Poll::Pending,
                },
            }
        }
    }
}

/// Infinite stream of `(new, old)` transition pairs matching an [`Edge`].
///
/// Created by [`Watch::transitions`](crate::Watch::transitions). The edge
/// registration is held for the whole life of the stream; transitions landing
/// while the consumer's loop body runs are dropped.
pub struct Transitions<T: 'static> {
    entry: EntryRef<Edge<T>, WaitEntry<(T, T)>>,
    park: Option<Park<Edge<T>, (T, T)>>,
}

impl<T: 'static> Transitions<T> {
    pub(crate) fn new(entry: EntryRef<Edge<T>, WaitEntry<(T, T)>>) -> Self {
        Self { entry, park: None }
    }
}

impl<T: Clone + 'static> Stream for Transitions<T> {
    type Item = (T, T);

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<(T, T)>> {
        let this = self.get_mut();
        let park = this
            .park
            .get_or_insert_with(|| Park::new(this.entry.clone()));
        match Pin::new(park).poll(cx) {
            Poll::Ready(pair) => {
                this.park = None;
                Poll::Ready(Some(pair))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
