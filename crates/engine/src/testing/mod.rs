//! Test doubles for the remote collaborators
//!
//! [`InMemoryRemote`] implements [`DatasetApi`](crate::DatasetApi),
//! [`ObjectStorage`](portex_core::ObjectStorage),
//! [`SearchBackend`](portex_frame::SearchBackend) and
//! [`PackageSource`](portex_core::PackageSource) over one in-memory state,
//! with call counters and failure injection.
//!
//! # Example
//!
//! ```ignore
//! use portex_engine::{testing::InMemoryRemote, Workspace};
//!
//! let remote = InMemoryRemote::shared();
//! let workspace = Workspace::builder().remote(remote.clone()).build()?;
//! remote.fail_next_add_rows(2);
//! ```

mod remote;

pub use remote::{stored_file, InMemoryRemote};
