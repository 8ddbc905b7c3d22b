//! Staged sheets of a dataset HEAD or a draft
//!
//! Sheets are listed from the remote on first access and materialize lazily
//! as remote-backed frames. Each entry remembers how many rows the remote
//! holds so the sync planner can tell an append from a rewrite.

use crate::remote::SheetSource;
use crate::workspace::Context;
use portex_core::{Error, Result, Value};
use portex_frame::{DataFrame, SearchTarget};
use portex_paging::{Page, PagingCache};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// One sheet and its relation to the remote state
#[derive(Debug, Clone)]
pub(crate) struct StagedSheet {
    pub(crate) frame: DataFrame,
    /// Rows of this sheet on the remote; `None` if it does not exist there
    pub(crate) remote_rows: Option<usize>,
    /// Set by a replaced frame or a failed upload; forces delete-then-recreate
    pub(crate) needs_replace: bool,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Sheets {
    loaded: bool,
    pub(crate) entries: BTreeMap<String, StagedSheet>,
    /// Sheets deleted locally that still exist remotely
    pub(crate) removed: BTreeSet<String>,
}

/// Remote-backed frame over `sheet` of `source`.
pub(crate) fn remote_frame(
    ctx: &Context,
    dataset: &str,
    source: &SheetSource,
    sheet: &str,
    schema: portex_core::SchemaType,
    rows: usize,
) -> Result<DataFrame> {
    let api = Arc::clone(&ctx.api);
    let (dataset_name, source_owned, sheet_name) = (dataset.to_string(), source.clone(), sheet.to_string());
    let cache = PagingCache::new(move |cursor: Option<&str>| -> Result<Page<Value>> {
        api.list_rows(&dataset_name, &source_owned, &sheet_name, cursor)
    });
    let frame = DataFrame::from_remote(schema, rows, Arc::new(cache))?;
    Ok(match source {
        SheetSource::Commit(commit_id) => frame.with_origin(SearchTarget {
            dataset: dataset.to_string(),
            commit_id: commit_id.clone(),
            sheet: sheet.to_string(),
        }),
        SheetSource::Draft(_) => frame,
    })
}

impl Sheets {
    /// Sheets of a branch with no commits: nothing to list.
    pub(crate) fn empty() -> Self {
        Sheets {
            loaded: true,
            ..Sheets::default()
        }
    }

    pub(crate) fn ensure_loaded(&mut self, ctx: &Context, dataset: &str, source: Option<&SheetSource>) -> Result<()> {
        if self.loaded {
            return Ok(());
        }
        if let Some(source) = source {
            for info in ctx.api.list_sheets(dataset, source)? {
                let schema = ctx.registry.load_canonical(&info.schema).map_err(|e| match e {
                    Error::SchemaValidation { path, message } => {
                        Error::schema(format!("{}:{}", info.name, path), message)
                    }
                    other => other,
                })?;
                let frame = remote_frame(ctx, dataset, source, &info.name, schema, info.record_count)?;
                self.entries.insert(
                    info.name.clone(),
                    StagedSheet {
                        frame,
                        remote_rows: Some(info.record_count),
                        needs_replace: false,
                    },
                );
            }
            debug!(target: "portex::version", dataset, %source, sheets = self.entries.len(), "Listed sheets");
        }
        self.loaded = true;
        Ok(())
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub(crate) fn get(&self, name: &str) -> Result<&DataFrame> {
        self.entries
            .get(name)
            .map(|s| &s.frame)
            .ok_or_else(|| Error::not_found("sheet", name))
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Result<&mut DataFrame> {
        self.entries
            .get_mut(name)
            .map(|s| &mut s.frame)
            .ok_or_else(|| Error::not_found("sheet", name))
    }

    /// Add or replace a sheet. Replacing a remote sheet forces a full
    /// re-upload of it.
    pub(crate) fn insert(&mut self, name: &str, frame: DataFrame) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("sheet name must not be empty".into()));
        }
        if frame.schema().as_record().is_none() {
            return Err(Error::schema(name, "a sheet schema must be a record"));
        }
        let remote_rows = match self.entries.get(name) {
            Some(existing) => existing.remote_rows,
            None if self.removed.remove(name) => Some(0),
            None => None,
        };
        self.entries.insert(
            name.to_string(),
            StagedSheet {
                frame,
                remote_rows,
                needs_replace: remote_rows.is_some(),
            },
        );
        Ok(())
    }

    pub(crate) fn remove(&mut self, name: &str) -> Result<DataFrame> {
        let staged = self
            .entries
            .remove(name)
            .ok_or_else(|| Error::not_found("sheet", name))?;
        if staged.remote_rows.is_some() {
            self.removed.insert(name.to_string());
        }
        Ok(staged.frame)
    }

    /// True if anything would be sent by an upload.
    pub(crate) fn is_modified(&self) -> bool {
        !self.removed.is_empty()
            || self
                .entries
                .values()
                .any(|s| s.remote_rows.is_none() || s.needs_replace || !s.frame.changes().is_empty())
    }
}
