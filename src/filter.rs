use std::{fmt, rc::Rc};

use crate::registry::RegistryKey;

#[cfg(test)]
mod tests;

#[derive(Clone)]
enum RawFilter<T> {
    Any,
    Value(T),
    Fn(Rc<dyn Fn(&T) -> bool>),
}

/// Condition on a value, used by level-triggered waits.
///
/// A plain value converts into a filter matching it by equality, so waiters
/// on the same value share one wait queue:
///
/// ```
/// # use watchcell::Filter;
/// let by_value: Filter<u32> = 7.into();
/// let by_predicate = Filter::when(|v: &u32| *v > 10);
/// ```
///
/// Filters built with [`Filter::when`] are keyed by closure identity and are
/// never shared between calls.
#[derive(Clone)]
pub struct Filter<T>(RawFilter<T>);

impl<T> Filter<T> {
    /// Filter matching every value.
    pub fn any() -> Self {
        Self(RawFilter::Any)
    }

    /// Filter matching values equal to `value`.
    pub fn value(value: T) -> Self {
        Self(RawFilter::Value(value))
    }

    /// Filter matching values for which `f` returns true.
    pub fn when(f: impl Fn(&T) -> bool + 'static) -> Self {
        Self(RawFilter::Fn(Rc::new(f)))
    }

    pub(crate) fn matches(&self, value: &T) -> bool
    where
        T: PartialEq,
    {
        match &self.0 {
            RawFilter::Any => true,
            RawFilter::Value(v) => value == v,
            RawFilter::Fn(f) => f(value),
        }
    }
}

impl<T> From<T> for Filter<T> {
    fn from(value: T) -> Self {
        Self::value(value)
    }
}

impl<T> Default for Filter<T> {
    fn default() -> Self {
        Self::any()
    }
}

impl<T: fmt::Debug> fmt::Debug for Filter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            RawFilter::Any => f.write_str("Filter::any()"),
            RawFilter::Value(v) => f.debug_tuple("Filter::value").field(v).finish(),
            RawFilter::Fn(_) => f.write_str("Filter::when(..)"),
        }
    }
}

impl<T: PartialEq> RegistryKey for Filter<T> {
    fn same_key(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (RawFilter::Any, RawFilter::Any) => true,
            (RawFilter::Value(a), RawFilter::Value(b)) => a == b,
            (RawFilter::Fn(a), RawFilter::Fn(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[derive(Clone)]
enum RawEdge<T> {
    Any,
    Value(T),
    Fn(Rc<dyn Fn(&T, &T) -> bool>),
}

/// Condition on a `(new, old)` transition, used by edge-triggered waits.
///
/// A plain value converts into an edge matching transitions whose new value
/// equals it. [`Edge::any`] (the default) matches every transition. Closures
/// receive `(new, old)` and are keyed by identity.
#[derive(Clone)]
pub struct Edge<T>(RawEdge<T>);

impl<T> Edge<T> {
    /// Edge matching every transition.
    pub fn any() -> Self {
        Self(RawEdge::Any)
    }

    /// Edge matching transitions to a new value equal to `value`.
    pub fn value(value: T) -> Self {
        Self(RawEdge::Value(value))
    }

    /// Edge matching transitions for which `f(new, old)` returns true.
    pub fn when(f: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self(RawEdge::Fn(Rc::new(f)))
    }

    pub(crate) fn matches(&self, new: &T, old: &T) -> bool
    where
        T: PartialEq,
    {
        match &self.0 {
            RawEdge::Any => true,
            RawEdge::Value(v) => new == v,
            RawEdge::Fn(f) => f(new, old),
        }
    }
}

impl<T> From<T> for Edge<T> {
    fn from(value: T) -> Self {
        Self::value(value)
    }
}

impl<T> Default for Edge<T> {
    fn default() -> Self {
        Self::any()
    }
}

impl<T: fmt::Debug> fmt::Debug for Edge<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            RawEdge::Any => f.write_str("Edge::any()"),
            RawEdge::Value(v) => f.debug_tuple("Edge::value").field(v).finish(),
            RawEdge::Fn(_) => f.write_str("Edge::when(..)"),
        }
    }
}

impl<T: PartialEq> RegistryKey for Edge<T> {
    fn same_key(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (RawEdge::Any, RawEdge::Any) => true,
            (RawEdge::Value(a), RawEdge::Value(b)) => a == b,
            (RawEdge::Fn(a), RawEdge::Fn(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}
