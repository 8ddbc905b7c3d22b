//! Lazily-paginated remote sequences
//!
//! [`PagingCache`] presents a remote, cursor-paginated collection as an
//! indexable sequence. Pages are fetched on demand, in order, and kept for
//! the lifetime of the cache. Forward access never fetches past the page that
//! holds the requested item; operations that need the total length (`len`,
//! negative indices, open-ended slices) fetch everything.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod cache;

pub use cache::{Page, PageSource, PagingCache, PagingIter};
