use std::{any::Any, cell::RefCell, ops::Deref, rc::Rc};

use crate::cell::{ToWatch, Watch, WatchCell};


/// Builds a cell whose value is the tuple of the sources' current values,
/// kept in sync with every source.
///
/// ```
/// use watchcell::{compose, WatchCell};
///
/// let x = WatchCell::new(-1);
/// let y = WatchCell::new(10);
/// let xy = compose((&x, &y));
/// assert_eq!(xy.get(), (-1, 10));
/// x.set(5);
/// assert_eq!(xy.get(), (5, 10));
/// ```
///
/// The composite is updated from inside each source's `set`, not by a relay
/// task, so a task waiting on the composite can never observe a source change
/// before the composite reflects it. Sources are 1- to 8-tuples of [`ToWatch`]
/// values; supplying no sources or a non-cell source is a compile error.
pub fn compose<S: ComposeSources>(sources: S) -> Composite<S::Value> {
    sources.compose_into(Rc::new(|v: &S::Value| v.clone()))
}

/// Like [`compose`], applying `f` to the tuple before each assignment.
///
/// Equivalent to composing and then [`map`](Watch::map)ping, minus the
/// intermediate tuple cell.
pub fn compose_map<S: ComposeSources, U: Clone + PartialEq + 'static>(
    sources: S,
    f: impl Fn(&S::Value) -> U + 'static,
) -> Composite<U> {
    sources.compose_into(Rc::new(f))
}

/// Source tuples accepted by [`compose`]. Implemented for 1- to 8-tuples of
/// [`ToWatch`] values. Sealed.
pub trait ComposeSources: private::Sealed {
    type Value: Clone + PartialEq + 'static;

    #[doc(hidden)]
    fn compose_into<U: Clone + PartialEq + 'static>(
        &self,
        f: Rc<dyn Fn(&Self::Value) -> U>,
    ) -> Composite<U>;
}

mod private {
    pub trait Sealed {}
}

/// Handle to a composite cell created by [`compose`] or [`compose_map`].
///
/// Keeps the hooks on every source cell alive; dropping it detaches the
/// composite from its sources.
#[must_use]
pub struct Composite<U: 'static> {
    watch: Watch<U>,
    _hooks: Vec<Box<dyn Any>>,
}

impl<U: 'static> Composite<U> {
    /// Returns a plain read-only view of the composite cell.
    ///
    /// The view does not keep the source hooks alive; it sees further updates
    /// only while the `Composite` handle exists.
    pub fn watch(&self) -> Watch<U> {
        self.watch.clone()
    }
}

impl<U: 'static> Deref for Composite<U> {
    type Target = Watch<U>;

    fn deref(&self) -> &Watch<U> {
        &self.watch
    }
}

impl<U: 'static> ToWatch for Composite<U> {
    type Value = U;

    fn to_watch(&self) -> Watch<U> {
        self.watch.clone()
    }
}

macro_rules! impl_compose_sources {
    ($(($W:ident, $w:ident, $i:tt)),+) => {
        impl<$($W: ToWatch),+> private::Sealed for ($($W,)+)
        where
            $($W::Value: Clone + PartialEq),+
        {
        }
        impl<$($W: ToWatch),+> ComposeSources for ($($W,)+)
        where
            $($W::Value: Clone + PartialEq),+
        {
            type Value = ($($W::Value,)+);

            fn compose_into<U: Clone + PartialEq + 'static>(
                &self,
                f: Rc<dyn Fn(&Self::Value) -> U>,
            ) -> Composite<U> {
                let ($($w,)+) = self;
                $(let $w = $w.to_watch();)+
                let current = Rc::new(RefCell::new(($($w.get(),)+)));
                let cell = WatchCell::new(f(&current.borrow()));
                // Always-false level conditions: evaluated inside each
                // source's set scan, splicing the new value into the tuple
                // and re-assigning the composite before any waiter runs.
                let hooks: Vec<Box<dyn Any>> = vec![$({
                    let current = current.clone();
                    let cell = cell.clone();
                    let f = f.clone();
                    Box::new($w.hook_level(move |v| {
                        current.borrow_mut().$i = v.clone();
                        let value = f(&current.borrow());
                        cell.set(value);
                        false
                    })) as Box<dyn Any>
                }),+];
                Composite {
                    watch: cell.watch(),
                    _hooks: hooks,
                }
            }
        }
    };
}

impl_compose_sources!((W0, w0, 0));
impl_compose_sources!((W0, w0, 0), (W1, w1, 1));
impl_compose_sources!((W0, w0, 0), (W1, w1, 1), (W2, w2, 2));
impl_compose_sources!((W0, w0, 0), (W1, w1, 1), (W2, w2, 2), (W3, w3, 3));
impl_compose_sources!(
    (W0, w0, 0),
    (W1, w1, 1),
    (W2, w2, 2),
    (W3, w3, 3),
    (W4, w4, 4)
);
impl_compose_sources!(
    (W0, w0, 0),
    (W1, w1, 1),
    (W2, w2, 2),
    (W3, w3, 3),
    (W4, w4, 4),
    (W5, w5, 5)
);
impl_compose_sources!(
    (W0, w0, 0),
    (W1, w1, 1),
    (W2, w2, 2),
    (W3, w3, 3),
    (W4, w4, 4),
    (W5, w5, 5),
    (W6, w6, 6)
);
impl_compose_sources!(
    (W0, w0, 0),
    (W1, w1, 1),
    (W2, w2, 2),
    (W3, w3, 3),
    (W4, w4, 4),
    (W5, w5, 5),
    (W6, w6, 6),
    (W7, w7, 7)
);
