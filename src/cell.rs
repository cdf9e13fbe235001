use std::{
    cell::{Ref, RefCell},
    mem,
    ops::Deref,
    rc::Rc,
    time::Duration,
};

use derive_ex::derive_ex;
use futures::{
    future::{select, Either},
    pin_mut,
};
use serde::{Deserialize, Serialize};

use crate::{
    filter::{Edge, Filter},
    map::{MapEntry, MapFn, MapKey, Mapped},
    queue::{checkpoint, Park, WaitEntry},
    registry::{EntryRef, Registry},
    stream::{EventualValues, Transitions},
    utils::timer::sleep,
};

#[cfg(test)]
mod tests;

/// Similar to `Rc<RefCell<T>>`, but waitable: tasks can await a value matching
/// a [`Filter`] or a transition matching an [`Edge`].
///
/// ```
/// use watchcell::WatchCell;
///
/// let cell = WatchCell::new(10);
/// cell.set(20);
/// let v = futures::executor::block_on(cell.wait_value(20));
/// assert_eq!(v, 20);
/// ```
///
/// [`set`](WatchCell::set) evaluates every registered condition and wakes the
/// matching waiters synchronously, before returning to the caller. A waiter
/// always receives the exact value (or transition pair) that satisfied its
/// condition, even if the cell has changed again by the time it resumes.
///
/// `WatchCell` dereferences to [`Watch`], the read-only view carrying all the
/// wait APIs.
#[derive_ex(Clone, bound())]
pub struct WatchCell<T: 'static> {
    watch: Watch<T>,
}

impl<T: 'static> WatchCell<T> {
    /// Create a new `WatchCell` with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            watch: Watch {
                node: Rc::new(CellNode {
                    value: RefCell::new(value),
                    levels: Registry::new(),
                    edges: Registry::new(),
                    maps: Registry::new(),
                }),
            },
        }
    }

    /// Returns the read-only view of this cell.
    pub fn watch(&self) -> Watch<T> {
        self.watch.clone()
    }
}

impl<T: Clone + PartialEq + 'static> WatchCell<T> {
    /// Sets the value, waking every waiter whose condition the change
    /// satisfies.
    ///
    /// No-op if the new value equals the current one: no condition is
    /// evaluated and nothing is woken. Otherwise, level conditions are
    /// evaluated against the new value, edge conditions against the
    /// `(new, old)` pair, and registered transforms are recomputed, in that
    /// order, all before `set` returns. Woken tasks only become runnable;
    /// none of them runs until the caller next yields.
    ///
    /// Panics if called from inside one of this cell's own conditions.
    pub fn set(&self, value: T) {
        self.watch.node.set(value);
    }
}

impl<T: 'static> Deref for WatchCell<T> {
    type Target = Watch<T>;

    fn deref(&self) -> &Watch<T> {
        &self.watch
    }
}

impl<T: Default + 'static> Default for WatchCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for WatchCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.watch, f)
    }
}

impl<T> Serialize for WatchCell<T>
where
    T: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        self.watch.serialize(serializer)
    }
}

impl<'de, T: 'static> Deserialize<'de> for WatchCell<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<WatchCell<T>, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        T::deserialize(deserializer).map(WatchCell::new)
    }
}

impl<T: 'static> ToWatch for WatchCell<T> {
    type Value = T;

    fn to_watch(&self) -> Watch<T> {
        self.watch()
    }
}

/// Read-only view of a [`WatchCell`].
///
/// Carries every read and wait operation but not `set`. Derived cells
/// ([`Watch::map`], [`compose`](crate::compose)) expose only this view, so
/// their values cannot be written from outside.
#[derive_ex(Clone, bound())]
pub struct Watch<T: 'static> {
    node: Rc<CellNode<T>>,
}

impl<T: 'static> Watch<T> {
    /// Borrows the current value.
    ///
    /// Escape hatch for values that are expensive to clone. Panics if the
    /// cell is being set.
    pub fn borrow(&self) -> Ref<'_, T> {
        self.node.value.borrow()
    }

    /// Returns a clone of the current value. No side effects.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.node.value.borrow().clone()
    }
}

impl<T: Clone + PartialEq + 'static> Watch<T> {
    /// Waits until the value matches `filter` and returns the matching value.
    ///
    /// The condition is tested immediately and, if false, whenever the value
    /// changes. A plain value is equivalent to [`Filter::value`]; waiters on
    /// the same plain value share one wait queue. If the condition already
    /// holds, the task still suspends for exactly one scheduling checkpoint
    /// before returning.
    ///
    /// The returned value is the one that satisfied the condition, which may
    /// differ from the cell's value by the time the caller resumes.
    pub async fn wait_value(&self, filter: impl Into<Filter<T>>) -> T {
        let filter = filter.into();
        let matched = {
            let value = self.node.value.borrow();
            filter.matches(&value).then(|| value.clone())
        };
        match matched {
            Some(value) => {
                checkpoint().await;
                value
            }
            None => Park::new(self.node.open_level(filter)).await,
        }
    }

    /// Like [`wait_value`](Self::wait_value), but the condition must stay
    /// continuously true for `held_for` before the wait resolves.
    ///
    /// Any change to a non-matching value restarts the hold from the next
    /// match. Returns the matching value as of the end of the hold.
    pub async fn wait_value_held(&self, filter: impl Into<Filter<T>>, held_for: Duration) -> T {
        let filter = filter.into();
        if held_for.is_zero() {
            return self.wait_value(filter).await;
        }
        loop {
            let value = self.wait_value(filter.clone()).await;
            let negated = {
                let filter = filter.clone();
                Filter::when(move |v: &T| !filter.matches(v))
            };
            let broke = self.wait_value(negated);
            let timer = sleep(held_for);
            pin_mut!(broke, timer);
            match select(broke, timer).await {
                Either::Left(..) => continue,
                Either::Right(..) => {
                    // The value may have moved to another matching value
                    // during the hold; report the one at the end of it.
                    let current = self.get();
                    return if filter.matches(&current) {
                        current
                    } else {
                        value
                    };
                }
            }
        }
    }

    /// Waits for a value transition matching `edge` and returns the
    /// `(new, old)` pair that satisfied it.
    ///
    /// Only transitions after the call are considered; the current value never
    /// matches by itself. Consider whether the transition you want may already
    /// have happened before this task got to run.
    pub async fn wait_transition(&self, edge: impl Into<Edge<T>>) -> (T, T) {
        Park::new(self.node.open_edge(edge.into())).await
    }

    /// Stream of values matching `filter`, with eventual consistency.
    ///
    /// The current value is yielded immediately if it matches. Rapid changes,
    /// and changes landing while the consumer's loop body runs, may be
    /// skipped, but the stream always catches up with the latest matching
    /// value. The stream is infinite. Nothing is registered on the cell until
    /// the stream is first polled.
    pub fn eventual_values(&self, filter: impl Into<Filter<T>>) -> EventualValues<T> {
        EventualValues::new(self.node.clone(), filter.into(), None)
    }

    /// Like [`eventual_values`](Self::eventual_values), but each candidate
    /// value must stay continuously matching for `held_for` before it is
    /// yielded.
    pub fn eventual_values_held(
        &self,
        filter: impl Into<Filter<T>>,
        held_for: Duration,
    ) -> EventualValues<T> {
        let held_for = (!held_for.is_zero()).then_some(held_for);
        EventualValues::new(self.node.clone(), filter.into(), held_for)
    }

    /// Stream of `(new, old)` pairs for transitions matching `edge`.
    ///
    /// One registration is held for the whole iteration, so consecutive
    /// transitions are caught without re-registering. Transitions occurring
    /// while the consumer's loop body runs are dropped, including the latest
    /// one; use [`eventual_values`](Self::eventual_values) when the final
    /// state matters.
    pub fn transitions(&self, edge: impl Into<Edge<T>>) -> Transitions<T> {
        Transitions::new(self.node.open_edge(edge.into()))
    }

    /// Returns a handle to a derived cell holding `f` applied to this cell's
    /// value, updated synchronously from inside [`WatchCell::set`].
    ///
    /// Each `map` call registers its own transform. To share one derived cell
    /// between several call sites, use [`map_fn`](Self::map_fn).
    pub fn map<U: Clone + PartialEq + 'static>(&self, f: impl Fn(&T) -> U + 'static) -> Mapped<U> {
        self.map_raw(MapKey::new(), Rc::new(f))
    }

    /// Like [`map`](Self::map), keyed by the [`MapFn`]'s identity: all
    /// handles opened with clones of one `MapFn` share a single derived cell.
    pub fn map_fn<U: Clone + PartialEq + 'static>(&self, f: &MapFn<T, U>) -> Mapped<U> {
        self.map_raw(f.key(), f.func())
    }

    fn map_raw<U: Clone + PartialEq + 'static>(
        &self,
        key: MapKey,
        f: Rc<dyn Fn(&T) -> U>,
    ) -> Mapped<U> {
        let node = &self.node;
        let entry = node.maps.open_ref(key, || {
            let child = WatchCell::new(f(&node.value.borrow()));
            let apply = {
                let child = child.clone();
                let f = f.clone();
                Box::new(move |v: &T| child.set(f(v))) as Box<dyn Fn(&T)>
            };
            MapEntry {
                child: Rc::new(child),
                apply,
            }
        });
        let watch = entry
            .with(|e| e.child.clone())
            .downcast::<WatchCell<U>>()
            .unwrap()
            .watch();
        Mapped {
            watch,
            _entry: Box::new(entry),
        }
    }

    pub(crate) fn hook_level(
        &self,
        f: impl Fn(&T) -> bool + 'static,
    ) -> EntryRef<Filter<T>, WaitEntry<T>> {
        self.node.open_level(Filter::when(f))
    }

    #[cfg(test)]
    pub(crate) fn level_count(&self) -> usize {
        self.node.levels.len()
    }
    #[cfg(test)]
    pub(crate) fn edge_count(&self) -> usize {
        self.node.edges.len()
    }
    #[cfg(test)]
    pub(crate) fn map_count(&self) -> usize {
        self.node.maps.len()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Watch<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.node.value.try_borrow() {
            Ok(value) => std::fmt::Debug::fmt(&*value, f),
            Err(_) => write!(f, "<borrowed>"),
        }
    }
}

impl<T> Serialize for Watch<T>
where
    T: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        match self.node.value.try_borrow() {
            Ok(value) => T::serialize(&*value, serializer),
            Err(_) => Err(serde::ser::Error::custom("borrowed")),
        }
    }
}

impl<T: 'static> ToWatch for Watch<T> {
    type Value = T;

    fn to_watch(&self) -> Watch<T> {
        self.clone()
    }
}

/// Types that can provide a [`Watch`] view: [`WatchCell`], [`Watch`] itself,
/// [`Mapped`], [`Composite`](crate::Composite), and references to them.
pub trait ToWatch {
    type Value: 'static;

    fn to_watch(&self) -> Watch<Self::Value>;
}

impl<W> ToWatch for &W
where
    W: ?Sized + ToWatch,
{
    type Value = W::Value;

    fn to_watch(&self) -> Watch<Self::Value> {
        (**self).to_watch()
    }
}

pub(crate) struct CellNode<T: 'static> {
    value: RefCell<T>,
    levels: Registry<Filter<T>, WaitEntry<T>>,
    edges: Registry<Edge<T>, WaitEntry<(T, T)>>,
    maps: Registry<MapKey, MapEntry<T>>,
}

impl<T: 'static> CellNode<T> {
    pub(crate) fn get(&self) -> T
    where
        T: Clone,
    {
        self.value.borrow().clone()
    }

    pub(crate) fn matches(&self, filter: &Filter<T>) -> bool
    where
        T: PartialEq,
    {
        filter.matches(&self.value.borrow())
    }

    pub(crate) fn open_level(&self, filter: Filter<T>) -> EntryRef<Filter<T>, WaitEntry<T>>
    where
        T: PartialEq,
    {
        self.levels.open_ref(filter, WaitEntry::default)
    }

    pub(crate) fn open_edge(&self, edge: Edge<T>) -> EntryRef<Edge<T>, WaitEntry<(T, T)>>
    where
        T: PartialEq,
    {
        self.edges.open_ref(edge, WaitEntry::default)
    }

    fn set(&self, value: T)
    where
        T: Clone + PartialEq,
    {
        let old = {
            let Ok(mut current) = self.value.try_borrow_mut() else {
                panic!(
                    "cyclic update: WatchCell::set called from one of the cell's own conditions"
                );
            };
            if *current == value {
                return;
            }
            mem::replace(&mut *current, value)
        };
        // Conditions run against a shared borrow: reading the cell from a
        // condition is fine, setting it is the cycle panic above.
        let new = self.value.borrow();
        let new = &*new;
        self.levels.scan(|filter, entry| {
            if filter.matches(new) {
                entry.last = Some(new.clone());
                entry.queue.wake_all();
            }
        });
        self.edges.scan(|edge, entry| {
            if edge.matches(new, &old) {
                entry.last = Some((new.clone(), old.clone()));
                entry.queue.wake_all();
            }
        });
        self.maps.scan(|_, entry| (entry.apply)(new));
    }
}
