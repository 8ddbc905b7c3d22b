//! Remote dataset service collaborator
//!
//! [`DatasetApi`] is the transport-agnostic surface of the tabular store.
//! List endpoints are paginated with opaque cursors and are consumed through
//! [`PagingCache`](portex_paging::PagingCache); everything else is a single
//! request/response. Transport failures surface as `Error::Network`, missing
//! resources as `Error::NotFound`.

use crate::version::{Branch, Commit, Tag};
use chrono::{DateTime, Utc};
use portex_core::{Result, Value};
use portex_paging::Page;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Wire records
// ============================================================================

/// Dataset metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    /// Unique dataset name
    pub name: String,
    /// Display alias
    pub alias: String,
    /// Branch checked out by default
    pub default_branch: String,
    /// Storage configuration; datasets sharing one can copy files by metadata
    pub storage_config: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Draft lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DraftState {
    /// Accepting edits
    Open,
    /// Abandoned; terminal
    Closed,
    /// Turned into a commit; terminal
    Committed,
}

impl DraftState {
    /// Upper-case wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftState::Open => "OPEN",
            DraftState::Closed => "CLOSED",
            DraftState::Committed => "COMMITTED",
        }
    }
}

impl fmt::Display for DraftState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Draft metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftInfo {
    /// Per-dataset draft number
    pub number: u64,
    /// Title
    pub title: String,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
    /// Branch the draft commits to
    pub branch: String,
    /// Commit the draft started from; `None` on a branch without commits
    #[serde(default)]
    pub parent_commit_id: Option<String>,
    /// Lifecycle state
    pub state: DraftState,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last update time
    pub updated_at: DateTime<Utc>,
}

/// Partial update of a draft; `None` fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftUpdate {
    /// New title
    pub title: Option<String>,
    /// New description
    pub description: Option<String>,
    /// New state; only `Closed` is accepted by the service
    pub state: Option<DraftState>,
}

/// Where sheets are read from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SheetSource {
    /// An immutable commit
    Commit(String),
    /// The staging area of a draft
    Draft(u64),
}

impl fmt::Display for SheetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SheetSource::Commit(id) => write!(f, "commit {}", id),
            SheetSource::Draft(number) => write!(f, "draft #{}", number),
        }
    }
}

/// Sheet metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetInfo {
    /// Sheet name
    pub name: String,
    /// Canonical schema tree, with imports
    pub schema: serde_json::Value,
    /// Number of rows
    pub record_count: usize,
}

/// Action enablement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionState {
    /// Runs may be created
    Enabled,
    /// Runs are rejected
    Disabled,
}

/// Action metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionInfo {
    /// Unique name within the dataset
    pub name: String,
    /// Bumped on every edit
    pub edition: u64,
    /// Enablement
    pub state: ActionState,
    /// Workflow definition, opaque to the client
    pub payload: String,
}

/// Partial update of an action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionUpdate {
    /// New name
    pub name: Option<String>,
    /// New payload
    pub payload: Option<String>,
    /// New state
    pub state: Option<ActionState>,
}

/// Run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Queued
    Pending,
    /// Executing
    Running,
    /// Finished successfully
    Succeeded,
    /// Finished with an error
    Failed,
    /// Cancelled by a caller
    Cancelled,
}

impl RunStatus {
    /// True once the run can no longer change.
    pub fn is_finished(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed | RunStatus::Cancelled)
    }
}

/// Run metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    /// Per-action run number
    pub number: u64,
    /// Action edition the run was created from
    pub edition: u64,
    /// Status
    pub status: RunStatus,
    /// Arguments given at creation
    pub arguments: serde_json::Value,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time, once finished
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Collaborator trait
// ============================================================================

/// The remote tabular store.
///
/// Implementations must be safe to call from upload worker threads.
pub trait DatasetApi: Send + Sync {
    // ---- datasets ----

    /// Create a dataset with a `main` branch and no commits.
    fn create_dataset(&self, name: &str, alias: &str, storage_config: Option<&str>) -> Result<DatasetInfo>;
    /// Dataset by name.
    fn get_dataset(&self, name: &str) -> Result<DatasetInfo>;
    /// One page of datasets.
    fn list_datasets(&self, cursor: Option<&str>) -> Result<Page<DatasetInfo>>;
    /// Delete a dataset and everything in it.
    fn delete_dataset(&self, name: &str) -> Result<()>;

    // ---- commits, branches, tags ----

    /// Commit by exact id.
    fn get_commit(&self, dataset: &str, commit_id: &str) -> Result<Commit>;
    /// One page of the history ending at `commit_id`, newest first.
    fn list_commits(&self, dataset: &str, commit_id: &str, cursor: Option<&str>) -> Result<Page<Commit>>;
    /// Create a branch pointing at `commit_id`.
    fn create_branch(&self, dataset: &str, name: &str, commit_id: &str) -> Result<Branch>;
    /// Branch by name.
    fn get_branch(&self, dataset: &str, name: &str) -> Result<Branch>;
    /// One page of branches.
    fn list_branches(&self, dataset: &str, cursor: Option<&str>) -> Result<Page<Branch>>;
    /// Delete a branch.
    fn delete_branch(&self, dataset: &str, name: &str) -> Result<()>;
    /// Create a tag fixed at `commit_id`.
    fn create_tag(&self, dataset: &str, name: &str, commit_id: &str) -> Result<Tag>;
    /// Tag by name.
    fn get_tag(&self, dataset: &str, name: &str) -> Result<Tag>;
    /// One page of tags.
    fn list_tags(&self, dataset: &str, cursor: Option<&str>) -> Result<Page<Tag>>;
    /// Delete a tag.
    fn delete_tag(&self, dataset: &str, name: &str) -> Result<()>;

    // ---- drafts ----

    /// Open a draft on `branch`, staged from the branch's current commit.
    fn create_draft(&self, dataset: &str, branch: &str, title: &str, description: Option<&str>) -> Result<DraftInfo>;
    /// Draft by number.
    fn get_draft(&self, dataset: &str, number: u64) -> Result<DraftInfo>;
    /// One page of drafts, optionally filtered.
    fn list_drafts(
        &self,
        dataset: &str,
        state: Option<DraftState>,
        branch: Option<&str>,
        cursor: Option<&str>,
    ) -> Result<Page<DraftInfo>>;
    /// Edit or close a draft.
    fn update_draft(&self, dataset: &str, number: u64, update: &DraftUpdate) -> Result<DraftInfo>;
    /// Turn an open draft into a commit whose parent is the draft's base, and
    /// advance the draft's branch to it.
    fn commit_draft(&self, dataset: &str, number: u64, title: &str, description: Option<&str>) -> Result<Commit>;

    // ---- sheets and rows ----

    /// Sheets of a commit or draft.
    fn list_sheets(&self, dataset: &str, source: &SheetSource) -> Result<Vec<SheetInfo>>;
    /// Create an empty sheet in a draft.
    fn create_sheet(&self, dataset: &str, draft: u64, name: &str, schema: &serde_json::Value) -> Result<()>;
    /// Delete a sheet from a draft.
    fn delete_sheet(&self, dataset: &str, draft: u64, name: &str) -> Result<()>;
    /// One page of rows, in row order.
    fn list_rows(&self, dataset: &str, source: &SheetSource, sheet: &str, cursor: Option<&str>) -> Result<Page<Value>>;
    /// Write `rows` so the first lands at row `position`. Chunks may arrive
    /// in any order; the sheet's final order follows positions. Writing the
    /// same position twice replaces the earlier chunk.
    fn add_rows(&self, dataset: &str, draft: u64, sheet: &str, position: usize, rows: &[Value]) -> Result<()>;
    /// Overwrite rows already in the sheet; each entry is `(row index, row)`.
    /// Indices past the end of the sheet are rejected.
    fn update_rows(&self, dataset: &str, draft: u64, sheet: &str, rows: &[(usize, Value)]) -> Result<()>;

    // ---- objects ----

    /// Grant `target` access to objects of `source` by copying their access
    /// records. No content is transferred. Returns keys valid in `target`.
    fn copy_objects(&self, source: &str, target: &str, keys: &[String]) -> Result<Vec<String>>;

    // ---- actions and runs ----

    /// Create an enabled action.
    fn create_action(&self, dataset: &str, name: &str, payload: &str) -> Result<ActionInfo>;
    /// Action by name.
    fn get_action(&self, dataset: &str, name: &str) -> Result<ActionInfo>;
    /// One page of actions.
    fn list_actions(&self, dataset: &str, cursor: Option<&str>) -> Result<Page<ActionInfo>>;
    /// Edit, enable or disable an action.
    fn update_action(&self, dataset: &str, name: &str, update: &ActionUpdate) -> Result<ActionInfo>;
    /// Delete an action and its runs.
    fn delete_action(&self, dataset: &str, name: &str) -> Result<()>;
    /// Start a run of an enabled action.
    fn create_run(&self, dataset: &str, action: &str, arguments: &serde_json::Value) -> Result<RunInfo>;
    /// Run by number.
    fn get_run(&self, dataset: &str, action: &str, number: u64) -> Result<RunInfo>;
    /// One page of runs, newest first.
    fn list_runs(&self, dataset: &str, action: &str, cursor: Option<&str>) -> Result<Page<RunInfo>>;
    /// Move an unfinished run to `Cancelled`.
    fn cancel_run(&self, dataset: &str, action: &str, number: u64) -> Result<RunInfo>;
}
