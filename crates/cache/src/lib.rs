//! The State Cache: a versioned, last-writer-wins mirror of remote entities.
//!
//! All mutation goes through [`StateCache`]; handlers only ever see
//! [`CacheView`], which can read and fetch through but not write.

mod fetch;
mod store;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
mod view;

pub use {
    fetch::EntityFetcher,
    store::{MAX_TOMBSTONES_PER_KIND, PinGuard, ResyncReport, StateCache, UpsertOutcome},
    view::CacheView,
};
