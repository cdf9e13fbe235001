use std::{any::Any, ops::Deref, rc::Rc};

use derive_ex::derive_ex;

use crate::{
    cell::{ToWatch, Watch},
    registry::RegistryKey,
};

/// Shareable transform function.
///
/// Passing clones of one `MapFn` to [`WatchCell::map_fn`](crate::WatchCell::map_fn)
/// on the same cell returns handles to a single shared derived cell instead of
/// registering the transform twice.
///
/// ```
/// use watchcell::{MapFn, WatchCell};
///
/// let cell = WatchCell::new(2);
/// let double = MapFn::new(|x: &u32| x * 2);
/// let a = cell.map_fn(&double);
/// let b = cell.map_fn(&double);
/// cell.set(5);
/// assert_eq!(a.get(), 10);
/// assert_eq!(b.get(), 10);
/// ```
#[derive_ex(Clone, bound())]
pub struct MapFn<T: 'static, U: 'static> {
    token: Rc<()>,
    f: Rc<dyn Fn(&T) -> U>,
}

impl<T: 'static, U: 'static> MapFn<T, U> {
    pub fn new(f: impl Fn(&T) -> U + 'static) -> Self {
        Self {
            token: Rc::new(()),
            f: Rc::new(f),
        }
    }
    pub(crate) fn key(&self) -> MapKey {
        MapKey(self.token.clone())
    }
    pub(crate) fn func(&self) -> Rc<dyn Fn(&T) -> U> {
        self.f.clone()
    }
}

/// Identity of a registered transform.
///
/// Plain closures get a fresh token per `map` call, so each call registers its
/// own derived cell. [`MapFn`] clones share a token.
pub(crate) struct MapKey(pub(crate) Rc<()>);

impl MapKey {
    pub fn new() -> Self {
        Self(Rc::new(()))
    }
}

impl RegistryKey for MapKey {
    fn same_key(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Entry in a cell's transform registry. `child` keeps the derived cell alive
/// and is downcast when another handle to the same transform is opened.
pub(crate) struct MapEntry<T> {
    pub child: Rc<dyn Any>,
    pub apply: Box<dyn Fn(&T)>,
}

/// Handle to a derived cell created by [`WatchCell::map`](crate::WatchCell::map)
/// or [`Watch::map`].
///
/// The derived cell stays registered on its source for as long as a handle to
/// it exists. Dropping the last handle unregisters the transform; the derived
/// cell then stops updating.
#[must_use]
pub struct Mapped<U: 'static> {
    pub(crate) watch: Watch<U>,
    pub(crate) _entry: Box<dyn Any>,
}

impl<U: 'static> Mapped<U> {
    /// Returns a plain read-only view of the derived cell.
    ///
    /// The view does not keep the transform registered; it sees further
    /// updates only while some `Mapped` handle is alive.
    pub fn watch(&self) -> Watch<U> {
        self.watch.clone()
    }
}

impl<U: 'static> Deref for Mapped<U> {
    type Target = Watch<U>;

    fn deref(&self) -> &Self::Target {
        &self.watch
    }
}

impl<U: 'static> ToWatch for Mapped<U> {
    type Value = U;

    fn to_watch(&self) -> Watch<U> {
        self.watch.clone()
    }
}
