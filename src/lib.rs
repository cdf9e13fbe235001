//! Waitable value cells for single-threaded async code.
//!
//! [`WatchCell`] wraps a value so that any number of tasks can await a
//! condition on it: a value match ([`wait_value`](Watch::wait_value)), a
//! transition ([`wait_transition`](Watch::wait_transition)), or streams of
//! either. Assigning a value wakes every matching waiter synchronously, and
//! each waiter receives the exact value that satisfied its condition.
//!
//! ```
//! use futures::executor::block_on;
//! use watchcell::{Filter, WatchCell};
//!
//! let cell = WatchCell::new(0);
//! cell.set(21);
//! let v = block_on(cell.wait_value(Filter::when(|v: &i32| *v > 20)));
//! assert_eq!(v, 21);
//! ```
//!
//! Derived values stay in lock step with their sources: [`Watch::map`]
//! registers a transform recomputed inside the source's `set`, and
//! [`compose`] builds a tuple cell updated from inside each source's `set`,
//! so no task can ever observe a source ahead of its derivatives.

mod cell;
mod compose;
mod event;
mod filter;
mod map;
mod queue;
mod registry;
mod stream;
pub mod utils;

pub use cell::{ToWatch, Watch, WatchCell};
pub use compose::{compose, compose_map, Composite, ComposeSources};
pub use event::RepeatedEvent;
pub use filter::{Edge, Filter};
pub use map::{MapFn, Mapped};
pub use queue::checkpoint;
pub use stream::{EventualValues, Transitions};
