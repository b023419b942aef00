//! Forward-only iteration over a stream's available items.
//!
//! A cursor remembers the sequence of the last item it produced and
//! resumes after it, so items appended while iterating are picked up and
//! items are never produced twice.

mod locking;
mod non_locking;

pub use locking::LockingCursor;
pub use non_locking::NonLockingCursor;
