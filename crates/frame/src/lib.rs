//! Columnar sheets for Portex
//!
//! A [`DataFrame`] is an ordered set of [`Series`] sharing one row count and
//! one record schema. Record columns are nested frames; array columns hold
//! one nested series per row. Frames built from a remote sheet read their
//! cells lazily through a shared [`PagingCache`](portex_paging::PagingCache).
//!
//! Mutability follows provenance: a frame whose schema came out of a
//! template rejects every in-place edit and column change with
//! [`Error::ImmutableField`](portex_core::Error::ImmutableField).
//!
//! [`DataFrame::query`] and [`DataFrame::apply`] run locally by default.
//! Inside an [`online`] scope they are translated to a [`Criteria`] tree and
//! executed by a [`SearchBackend`].

#![warn(missing_docs)]
#![warn(clippy::all)]

mod criteria;
mod frame;
mod infer;
pub mod online;
mod query;
mod row;
mod series;

pub use criteria::{CompareCriteria, Criteria, CriteriaOp, LogicalOp};
pub use frame::{Changes, DataFrame};
pub use infer::infer_primitive;
pub use online::{online, OnlineGuard, SearchBackend, SearchTarget};
pub use query::{col, compare, Column, CompareOp, Predicate, RowMap};
pub use row::Row;
pub use series::Series;

use portex_core::Error;

/// Prefix the path of a schema validation error.
pub(crate) fn at(error: Error, prefix: &str) -> Error {
    match error {
        Error::SchemaValidation { path, message } => {
            let path = match (prefix.is_empty(), path.is_empty()) {
                (true, _) => path,
                (false, true) => prefix.to_string(),
                (false, false) if path.starts_with('[') => format!("{}{}", prefix, path),
                (false, false) => format!("{}.{}", prefix, path),
            };
            Error::SchemaValidation { path, message }
        }
        other => other,
    }
}

pub(crate) fn out_of_range(index: usize, len: usize) -> Error {
    Error::InvalidArgument(format!("index {} out of range for length {}", index, len))
}
