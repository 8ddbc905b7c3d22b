//! Shared test utilities for the integration suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

use std::ops::Range;
use std::sync::{Arc, Once};

pub use portex::testing::{stored_file, InMemoryRemote};
pub use portex::{
    col, ClientConfig, DataFrame, Dataset, Error, Field, FileRef, RowMap, SchemaType, SheetAction,
    SheetSource, Value, Workspace,
};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Route `portex::*` logs to the test writer; `RUST_LOG` overrides the filter.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("portex=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Small, fast config: few workers, tiny chunks, 1ms backoff.
pub fn fast_config() -> ClientConfig {
    ClientConfig {
        upload_workers: 3,
        retry_backoff_ms: 1,
        chunk_size: 4,
        ..ClientConfig::default()
    }
}

// ============================================================================
// TestWorkspace
// ============================================================================

/// A workspace over a fresh in-memory remote
pub struct TestWorkspace {
    pub remote: Arc<InMemoryRemote>,
    pub workspace: Workspace,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        init_tracing();
        let remote = InMemoryRemote::shared();
        let workspace = Workspace::builder()
            .remote(remote.clone())
            .config(config)
            .build()
            .expect("workspace");
        TestWorkspace { remote, workspace }
    }

    pub fn dataset(&self, name: &str) -> Dataset {
        self.workspace
            .datasets()
            .create(name, None, None)
            .expect("create dataset")
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// `{id: int64, label: enum[cat, dog, bird], score: float32?}`
pub fn pets_schema() -> SchemaType {
    SchemaType::record(vec![
        Field::new("id", SchemaType::int64()),
        Field::new("label", SchemaType::enumeration(["cat", "dog", "bird"]).expect("enum")),
        Field::new("score", SchemaType::float32().nullable()),
    ])
    .expect("record")
}

pub fn pet(id: i64) -> Value {
    let label = ["cat", "dog", "bird"][id as usize % 3];
    let score = if id % 4 == 3 { Value::Null } else { Value::Float(id as f64 / 2.0) };
    Value::record([("id", Value::Int(id)), ("label", Value::from(label)), ("score", score)])
}

pub fn pets(ids: Range<i64>) -> DataFrame {
    DataFrame::from_rows(pets_schema(), ids.map(pet).collect()).expect("frame")
}

pub fn ids(frame: &DataFrame) -> Vec<i64> {
    frame
        .to_rows()
        .expect("rows")
        .iter()
        .map(|row| row.get_path("id").and_then(Value::as_int).expect("id"))
        .collect()
}
