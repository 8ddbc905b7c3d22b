//! Portex - client engine for versioned, schema-typed tabular datasets
//!
//! Portex describes every sheet with a type from a small schema language,
//! holds sheets as columnar frames that read remote rows lazily, and
//! versions datasets with commits, branches, tags and drafts.
//!
//! # Quick Start
//!
//! ```ignore
//! use portex::{DataFrame, Field, SchemaType, Value, Workspace};
//! use portex::testing::InMemoryRemote;
//!
//! let workspace = Workspace::builder().remote(InMemoryRemote::shared()).build()?;
//! let mut dataset = workspace.datasets().create("animals", None, None)?;
//!
//! let schema = SchemaType::record(vec![Field::new("name", SchemaType::string())])?;
//! let frame = DataFrame::from_rows(schema, vec![Value::record([("name", Value::from("otter"))])])?;
//! dataset.insert_sheet("train", frame)?;
//! dataset.commit("first rows", None)?;
//! ```
//!
//! # Architecture
//!
//! - `portex-core`: errors, cell values, file references and the schema language
//! - `portex-paging`: lazily paged, cached sequences over paginated endpoints
//! - `portex-frame`: columnar frames, queries and online search
//! - `portex-engine`: workspace, datasets, drafts, upload and actions
//!
//! Everything public is re-exported here.

pub use portex_core::*;
pub use portex_engine::*;
pub use portex_frame::*;
pub use portex_paging::*;
