//! Drafts: staging areas that become commits
//!
//! A draft starts OPEN with the sheets of its branch's commit. Edits are
//! staged locally and pushed with [`Draft::upload`]; [`Draft::commit`]
//! uploads whatever is left and turns the draft into a commit on its branch.
//! COMMITTED and CLOSED are terminal: every read, edit, upload or commit of
//! a draft in either state fails with `DraftState`.

use crate::dataset::{Dataset, HeadState};
use crate::remote::{DraftInfo, DraftState, DraftUpdate, SheetSource};
use crate::sheets::Sheets;
use crate::sync::{upload_sheets, UploadReport};
use crate::version::{Branch, Head};
use crate::workspace::Context;
use parking_lot::Mutex;
use portex_core::{Error, Result};
use portex_frame::DataFrame;
use portex_paging::{Page, PagingCache};
use std::sync::Arc;
use tracing::{info, warn};

/// How to commit a draft
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOptions {
    /// Commit title; the draft title when empty
    pub title: String,
    /// Commit description
    pub description: Option<String>,
    /// Move the dataset HEAD to the committed branch, discarding its local
    /// sheet edits (default true)
    pub update_dataset_head: bool,
}

impl CommitOptions {
    /// Options with `title` and HEAD update on.
    pub fn new(title: impl Into<String>) -> Self {
        CommitOptions {
            title: title.into(),
            description: None,
            update_dataset_head: true,
        }
    }

    /// Set the description.
    pub fn description(mut self, description: Option<&str>) -> Self {
        self.description = description.map(str::to_string);
        self
    }

    /// Leave the dataset HEAD where it is.
    pub fn keep_head(mut self) -> Self {
        self.update_dataset_head = false;
        self
    }
}

impl Default for CommitOptions {
    fn default() -> Self {
        CommitOptions::new("")
    }
}

/// An open (or finished) draft of one dataset
#[derive(Debug)]
pub struct Draft {
    ctx: Arc<Context>,
    dataset: String,
    head: Arc<Mutex<HeadState>>,
    info: DraftInfo,
    sheets: Sheets,
}

impl Draft {
    pub(crate) fn new(ctx: Arc<Context>, dataset: &str, head: Arc<Mutex<HeadState>>, info: DraftInfo) -> Self {
        Draft {
            ctx,
            dataset: dataset.to_string(),
            head,
            info,
            sheets: Sheets::default(),
        }
    }

    /// Replace the staged sheets wholesale.
    pub(crate) fn stage(&mut self, sheets: Sheets) {
        self.sheets = sheets;
    }

    /// Dataset the draft belongs to.
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Draft number.
    pub fn number(&self) -> u64 {
        self.info.number
    }

    /// Title.
    pub fn title(&self) -> &str {
        &self.info.title
    }

    /// Description.
    pub fn description(&self) -> Option<&str> {
        self.info.description.as_deref()
    }

    /// Branch the draft commits to.
    pub fn branch(&self) -> &str {
        &self.info.branch
    }

    /// Commit the draft started from.
    pub fn parent_commit_id(&self) -> Option<&str> {
        self.info.parent_commit_id.as_deref()
    }

    /// Lifecycle state.
    pub fn state(&self) -> DraftState {
        self.info.state
    }

    /// Full metadata.
    pub fn info(&self) -> &DraftInfo {
        &self.info
    }

    fn ensure_open(&self, operation: &str) -> Result<()> {
        match self.info.state {
            DraftState::Open => Ok(()),
            state => Err(Error::DraftState {
                number: self.info.number,
                state: state.to_string(),
                operation: operation.to_string(),
            }),
        }
    }

    fn loaded_sheets(&mut self, operation: &str) -> Result<&mut Sheets> {
        self.ensure_open(operation)?;
        let source = SheetSource::Draft(self.info.number);
        self.sheets.ensure_loaded(&self.ctx, &self.dataset, Some(&source))?;
        Ok(&mut self.sheets)
    }

    // ---- sheets ----

    /// Sheet names, including staged edits.
    pub fn sheet_names(&mut self) -> Result<Vec<String>> {
        Ok(self.loaded_sheets("list sheets")?.names())
    }

    /// Sheet by name.
    pub fn sheet(&mut self, name: &str) -> Result<&DataFrame> {
        self.loaded_sheets("read sheets")?.get(name)
    }

    /// Sheet by name, for editing.
    pub fn sheet_mut(&mut self, name: &str) -> Result<&mut DataFrame> {
        self.loaded_sheets("edit sheets")?.get_mut(name)
    }

    /// Add or replace a sheet.
    pub fn insert_sheet(&mut self, name: &str, frame: DataFrame) -> Result<()> {
        self.loaded_sheets("edit sheets")?.insert(name, frame)
    }

    /// Remove a sheet.
    pub fn remove_sheet(&mut self, name: &str) -> Result<DataFrame> {
        self.loaded_sheets("edit sheets")?.remove(name)
    }

    /// True if staged edits are waiting for upload.
    pub fn is_modified(&self) -> bool {
        self.sheets.is_modified()
    }

    // ---- lifecycle ----

    /// Change title and/or description.
    pub fn edit(&mut self, title: Option<&str>, description: Option<&str>) -> Result<()> {
        self.ensure_open("edit")?;
        let update = DraftUpdate {
            title: title.map(str::to_string),
            description: description.map(str::to_string),
            state: None,
        };
        self.info = self.ctx.api.update_draft(&self.dataset, self.info.number, &update)?;
        Ok(())
    }

    /// Abandon the draft. Staged edits are dropped.
    pub fn close(&mut self) -> Result<()> {
        self.ensure_open("close")?;
        let update = DraftUpdate {
            state: Some(DraftState::Closed),
            ..DraftUpdate::default()
        };
        self.info = self.ctx.api.update_draft(&self.dataset, self.info.number, &update)?;
        self.sheets = Sheets::default();
        info!(target: "portex::version", dataset = %self.dataset, draft = self.info.number, "Closed draft");
        Ok(())
    }

    /// Push staged edits to the remote draft.
    ///
    /// # Errors
    ///
    /// `UploadWorker` when a chunk runs out of retries. Sheets that failed
    /// are fully replaced by the next upload.
    pub fn upload(&mut self) -> Result<UploadReport> {
        self.ensure_open("upload")?;
        upload_sheets(&self.ctx, &self.dataset, self.info.number, &mut self.sheets)
    }

    /// Upload pending edits and commit. Returns the branch at its new commit.
    pub fn commit(&mut self, options: CommitOptions) -> Result<Branch> {
        self.ensure_open("commit")?;
        self.upload()?;
        let title = if options.title.is_empty() {
            self.info.title.clone()
        } else {
            options.title
        };
        let commit = self.ctx.api.commit_draft(
            &self.dataset,
            self.info.number,
            &title,
            options.description.as_deref(),
        )?;
        self.info.state = DraftState::Committed;
        self.sheets = Sheets::default();
        let branch = Branch {
            name: self.info.branch.clone(),
            commit_id: Some(commit.id.clone()),
        };
        if options.update_dataset_head {
            self.head.lock().move_to(Head::from(branch.clone()));
        }
        info!(
            target: "portex::version",
            dataset = %self.dataset,
            draft = self.info.number,
            branch = %branch.name,
            commit = %commit.id,
            "Committed draft"
        );
        Ok(branch)
    }
}

/// Drafts of one dataset
pub struct DraftManager<'a> {
    dataset: &'a Dataset,
}

impl<'a> DraftManager<'a> {
    pub(crate) fn new(dataset: &'a Dataset) -> Self {
        Self { dataset }
    }

    fn wrap(&self, info: DraftInfo) -> Draft {
        Draft::new(
            Arc::clone(self.dataset.ctx()),
            self.dataset.name(),
            Arc::clone(self.dataset.head_state()),
            info,
        )
    }

    /// Open a draft on `branch` (the checked-out branch when `None`).
    ///
    /// # Errors
    ///
    /// `InvalidState` when no branch is given and HEAD is not a branch.
    pub fn create(&self, title: &str, branch: Option<&str>, description: Option<&str>) -> Result<Draft> {
        let head = self.dataset.head();
        let branch = match (branch, head.branch()) {
            (Some(branch), _) | (None, Some(branch)) => branch.to_string(),
            (None, None) => {
                return Err(Error::InvalidState(format!(
                    "{} is not a branch; name the branch the draft commits to",
                    head
                )))
            }
        };
        let info = self
            .dataset
            .api()
            .create_draft(self.dataset.name(), &branch, title, description)?;
        if head.branch() == Some(branch.as_str()) && head.commit_id() != info.parent_commit_id.as_deref() {
            warn!(
                target: "portex::version",
                dataset = self.dataset.name(),
                branch = %branch,
                draft = info.number,
                "Draft starts from a newer commit than HEAD; call checkout(\"{}\") to catch up",
                branch
            );
        }
        info!(target: "portex::version", dataset = self.dataset.name(), draft = info.number, branch = %branch, "Created draft");
        Ok(self.wrap(info))
    }

    /// Draft by number, in whatever state it is.
    pub fn get(&self, number: u64) -> Result<Draft> {
        let info = self.dataset.api().get_draft(self.dataset.name(), number)?;
        Ok(self.wrap(info))
    }

    /// Drafts, optionally filtered by state and branch.
    pub fn list(&self, state: Option<DraftState>, branch: Option<&str>) -> PagingCache<DraftInfo> {
        let api = Arc::clone(self.dataset.api_arc());
        let dataset = self.dataset.name().to_string();
        let branch = branch.map(str::to_string);
        PagingCache::new(move |cursor: Option<&str>| -> Result<Page<DraftInfo>> {
            api.list_drafts(&dataset, state, branch.as_deref(), cursor)
        })
    }
}
