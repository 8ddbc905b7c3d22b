//! Dataset handle: HEAD, staged sheets and the managers hanging off them
//!
//! A [`Dataset`] has exactly one HEAD. Sheets are read at HEAD's commit and
//! may be edited locally; [`Dataset::commit`] ships those edits through a
//! throw-away draft. HEAD never moves on its own: a remote branch advancing
//! under a checked-out handle is only reported with a warning.
//!
//! HEAD lives in a [`HeadState`] shared with the drafts opened from this
//! handle, so a draft committed with `update_dataset_head` can move it. Each
//! move bumps a generation counter; the handle drops its staged sheets the
//! next time it notices a newer generation.

use crate::action::ActionManager;
use crate::draft::{CommitOptions, Draft, DraftManager};
use crate::remote::{DatasetApi, DatasetInfo, SheetSource};
use crate::sheets::Sheets;
use crate::version::{resolve_revision, Branch, BranchManager, CommitManager, Head, TagManager};
use crate::workspace::Context;
use parking_lot::Mutex;
use portex_core::{Error, FileRef, Result, Value};
use portex_frame::DataFrame;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub(crate) struct HeadState {
    pub(crate) head: Head,
    pub(crate) generation: u64,
}

impl HeadState {
    pub(crate) fn move_to(&mut self, head: Head) {
        self.head = head;
        self.generation += 1;
    }
}

/// A remote dataset checked out at one HEAD
#[derive(Debug)]
pub struct Dataset {
    ctx: Arc<Context>,
    info: DatasetInfo,
    head: Arc<Mutex<HeadState>>,
    generation: u64,
    sheets: Sheets,
}

impl Dataset {
    pub(crate) fn open(ctx: Arc<Context>, info: DatasetInfo) -> Result<Self> {
        let branch = ctx.api.get_branch(&info.name, &info.default_branch)?;
        debug!(target: "portex::version", dataset = %info.name, head = %Head::from(branch.clone()), "Opened dataset");
        Ok(Dataset {
            ctx,
            info,
            head: Arc::new(Mutex::new(HeadState {
                head: branch.into(),
                generation: 0,
            })),
            generation: 0,
            sheets: Sheets::default(),
        })
    }

    /// Dataset name.
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Dataset metadata as of opening.
    pub fn info(&self) -> &DatasetInfo {
        &self.info
    }

    /// Current HEAD.
    pub fn head(&self) -> Head {
        self.head.lock().head.clone()
    }

    pub(crate) fn api(&self) -> &dyn DatasetApi {
        self.ctx.api.as_ref()
    }

    pub(crate) fn api_arc(&self) -> &Arc<dyn DatasetApi> {
        &self.ctx.api
    }

    pub(crate) fn ctx(&self) -> &Arc<Context> {
        &self.ctx
    }

    pub(crate) fn head_state(&self) -> &Arc<Mutex<HeadState>> {
        &self.head
    }

    /// Warn when the remote shows the checked-out branch somewhere else.
    pub(crate) fn observe_branch(&self, branch: &Branch) {
        let head = self.head();
        if head.branch() == Some(branch.name.as_str()) && head.commit_id() != branch.commit_id.as_deref() {
            warn!(
                target: "portex::version",
                dataset = self.name(),
                branch = %branch.name,
                local = head.commit_id().unwrap_or("<no commit>"),
                remote = branch.commit_id.as_deref().unwrap_or("<no commit>"),
                "HEAD is stale; call checkout(\"{}\") to move to the latest commit",
                branch.name
            );
        }
    }

    // ========================================================================
    // Version graph
    // ========================================================================

    /// Branches of this dataset.
    pub fn branches(&self) -> BranchManager<'_> {
        BranchManager::new(self)
    }

    /// Tags of this dataset.
    pub fn tags(&self) -> TagManager<'_> {
        TagManager::new(self)
    }

    /// Commit history.
    pub fn commits(&self) -> CommitManager<'_> {
        CommitManager::new(self)
    }

    /// Drafts of this dataset.
    pub fn drafts(&self) -> DraftManager<'_> {
        DraftManager::new(self)
    }

    /// Actions of this dataset.
    pub fn actions(&self) -> ActionManager<'_> {
        ActionManager::new(self)
    }

    /// Move HEAD to `revision` (commit id, branch or tag, in that order).
    ///
    /// Local sheet edits are discarded.
    pub fn checkout(&mut self, revision: &str) -> Result<Head> {
        let head = resolve_revision(self.api(), self.name(), revision)?;
        if self.sheets.is_modified() {
            warn!(target: "portex::version", dataset = self.name(), "Discarding local sheet edits on checkout");
        }
        self.head.lock().move_to(head.clone());
        self.sync_head();
        info!(target: "portex::version", dataset = self.name(), head = %head, "Checked out");
        Ok(head)
    }

    /// Commit local sheet edits to the checked-out branch.
    ///
    /// The edits travel through a fresh draft that is uploaded and committed
    /// in one go; HEAD then moves to the new commit. If anything fails the
    /// draft is closed and the local edits are kept.
    ///
    /// # Errors
    ///
    /// `InvalidState` when HEAD is not a branch, when there is nothing to
    /// commit, or when the branch moved on the remote since HEAD was
    /// resolved.
    pub fn commit(&mut self, title: &str, description: Option<&str>) -> Result<Branch> {
        self.sync_head();
        let head = self.head();
        let Some(branch) = head.branch() else {
            return Err(Error::InvalidState(format!(
                "cannot commit on {}; check out a branch first",
                head
            )));
        };
        if !self.sheets.is_modified() {
            return Err(Error::InvalidState("nothing to commit".into()));
        }
        let info = self.api().create_draft(self.name(), branch, title, description)?;
        let mut draft = Draft::new(Arc::clone(&self.ctx), self.name(), Arc::clone(&self.head), info);
        if draft.parent_commit_id() != head.commit_id() {
            draft.close()?;
            return Err(Error::InvalidState(format!(
                "{} is stale: the remote branch has moved; checkout before committing",
                head
            )));
        }
        draft.stage(self.sheets.clone());

        let options = CommitOptions::new(title).description(description);
        match draft.commit(options) {
            Ok(branch) => {
                self.sync_head();
                Ok(branch)
            }
            Err(e) => {
                if let Err(close) = draft.close() {
                    debug!(target: "portex::version", dataset = self.name(), draft = draft.number(), error = %close, "Could not close failed draft");
                }
                Err(e)
            }
        }
    }

    /// Commit `draft`, optionally moving this handle's HEAD to the result.
    ///
    /// Equivalent to [`Draft::commit`]; provided so the HEAD update reads at
    /// the dataset level.
    pub fn commit_draft(&mut self, draft: &mut Draft, options: CommitOptions) -> Result<Branch> {
        if draft.dataset() != self.name() {
            return Err(Error::InvalidArgument(format!(
                "draft #{} belongs to dataset '{}', not '{}'",
                draft.number(),
                draft.dataset(),
                self.name()
            )));
        }
        let update_head = options.update_dataset_head;
        let branch = draft.commit(options)?;
        if update_head {
            // the draft may come from another handle of the same dataset
            self.head.lock().move_to(Head::from(branch.clone()));
        }
        self.sync_head();
        Ok(branch)
    }

    // ========================================================================
    // Sheets at HEAD
    // ========================================================================

    fn sync_head(&mut self) {
        let generation = self.head.lock().generation;
        if generation != self.generation {
            self.generation = generation;
            self.sheets = Sheets::default();
        }
    }

    fn loaded_sheets(&mut self) -> Result<&mut Sheets> {
        self.sync_head();
        let source = self.head().commit_id().map(|id| SheetSource::Commit(id.to_string()));
        self.sheets.ensure_loaded(&self.ctx, &self.info.name, source.as_ref())?;
        Ok(&mut self.sheets)
    }

    /// Sheet names at HEAD, including local edits.
    pub fn sheet_names(&mut self) -> Result<Vec<String>> {
        Ok(self.loaded_sheets()?.names())
    }

    /// Sheet by name. Remote sheets read their rows lazily.
    pub fn sheet(&mut self, name: &str) -> Result<&DataFrame> {
        self.loaded_sheets()?.get(name)
    }

    /// Sheet by name, for editing.
    pub fn sheet_mut(&mut self, name: &str) -> Result<&mut DataFrame> {
        self.loaded_sheets()?.get_mut(name)
    }

    /// Add or replace a sheet.
    pub fn insert_sheet(&mut self, name: &str, frame: DataFrame) -> Result<()> {
        self.loaded_sheets()?.insert(name, frame)
    }

    /// Remove a sheet, returning its frame.
    pub fn remove_sheet(&mut self, name: &str) -> Result<DataFrame> {
        self.loaded_sheets()?.remove(name)
    }

    /// True if local edits are waiting to be committed.
    pub fn is_modified(&mut self) -> bool {
        self.sync_head();
        self.sheets.is_modified()
    }

    // ========================================================================
    // Files
    // ========================================================================

    /// Make remote files of `source` usable in this dataset without moving
    /// their content.
    ///
    /// Only the access records are copied, so object storage never sees a
    /// `put`. Local files pass through unchanged; they are uploaded with the
    /// rows that reference them.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the datasets use different storage configs.
    pub fn copy_files(&self, source: &Dataset, files: Vec<FileRef>) -> Result<Vec<FileRef>> {
        if source.info.storage_config != self.info.storage_config {
            return Err(Error::InvalidArgument(format!(
                "cannot copy files from '{}' (storage '{}') to '{}' (storage '{}')",
                source.name(),
                source.info.storage_config,
                self.name(),
                self.info.storage_config
            )));
        }
        let keys: Vec<String> = files.iter().filter_map(|f| f.key().map(str::to_string)).collect();
        if keys.is_empty() {
            return Ok(files);
        }
        let copied = self.api().copy_objects(source.name(), self.name(), &keys)?;
        if copied.len() != keys.len() {
            return Err(Error::Network(format!(
                "copy_objects returned {} keys for {} objects",
                copied.len(),
                keys.len()
            )));
        }
        debug!(target: "portex::sync", source = source.name(), target = self.name(), files = keys.len(), "Copied file records");
        let mut copied = copied.into_iter();
        Ok(files
            .into_iter()
            .map(|file| match file {
                FileRef::Remote(mut remote) => {
                    if let Some(key) = copied.next() {
                        remote.key = key;
                    }
                    FileRef::Remote(remote)
                }
                local => local,
            })
            .collect())
    }

    /// Copy the file cells of every row in `rows`, rewriting them in place.
    pub fn copy_files_in(&self, source: &Dataset, rows: &mut [Value]) -> Result<usize> {
        let mut files = Vec::new();
        for row in rows.iter() {
            collect_files(row, &mut files);
        }
        let count = files.len();
        let mut copied = self.copy_files(source, files)?.into_iter();
        for row in rows.iter_mut() {
            replace_files(row, &mut copied);
        }
        Ok(count)
    }
}

fn collect_files(value: &Value, out: &mut Vec<FileRef>) {
    match value {
        Value::File(file) => out.push(file.clone()),
        Value::Array(items) => items.iter().for_each(|v| collect_files(v, out)),
        Value::Record(fields) => fields.values().for_each(|v| collect_files(v, out)),
        _ => {}
    }
}

fn replace_files(value: &mut Value, copied: &mut impl Iterator<Item = FileRef>) {
    match value {
        Value::File(file) => {
            if let Some(next) = copied.next() {
                *file = next;
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|v| replace_files(v, copied)),
        Value::Record(fields) => fields.values_mut().for_each(|v| replace_files(v, copied)),
        _ => {}
    }
}
