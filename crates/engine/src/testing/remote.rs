//! In-memory dataset service
//!
//! Implements every collaborator the engine talks to over one shared state
//! so tests can run a whole session without a server. List endpoints page
//! with offset cursors. Hooks inject add_rows failures and delays and count
//! calls per endpoint.

use crate::remote::{
    ActionInfo, ActionState, ActionUpdate, DatasetApi, DatasetInfo, DraftInfo, DraftState, DraftUpdate,
    RunInfo, RunStatus, SheetInfo, SheetSource,
};
use crate::version::{Branch, Commit, Tag};
use chrono::Utc;
use parking_lot::Mutex;
use portex_core::{checksum, Error, FileRef, ObjectStorage, PackageRef, PackageSource, Result, Value};
use portex_frame::{Criteria, SearchBackend, SearchTarget};
use portex_paging::Page;
use serde_json::Value as Json;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: usize = 100;

type DelayFn = dyn Fn(&str, usize) -> Duration + Send + Sync;

#[derive(Debug, Clone, Default)]
struct StoredSheet {
    schema: Json,
    /// Chunks keyed by first row position
    chunks: BTreeMap<usize, Vec<Value>>,
}

impl StoredSheet {
    fn rows(&self) -> Vec<Value> {
        self.chunks.values().flatten().cloned().collect()
    }

    fn len(&self) -> usize {
        self.chunks.values().map(Vec::len).sum()
    }

    fn row_mut(&mut self, index: usize) -> Option<&mut Value> {
        let (start, rows) = self.chunks.range_mut(..=index).next_back()?;
        let offset = index - *start;
        rows.get_mut(offset)
    }
}

type SheetMap = BTreeMap<String, StoredSheet>;

struct StoredCommit {
    commit: Commit,
    sheets: SheetMap,
}

struct StoredDraft {
    info: DraftInfo,
    sheets: SheetMap,
}

struct StoredAction {
    info: ActionInfo,
    runs: Vec<RunInfo>,
}

struct DatasetState {
    info: DatasetInfo,
    commits: HashMap<String, StoredCommit>,
    branches: BTreeMap<String, Option<String>>,
    tags: BTreeMap<String, String>,
    drafts: BTreeMap<u64, StoredDraft>,
    actions: BTreeMap<String, StoredAction>,
}

impl DatasetState {
    fn commit(&self, id: &str) -> Result<&StoredCommit> {
        self.commits.get(id).ok_or_else(|| Error::not_found("commit", id))
    }

    fn draft(&self, number: u64) -> Result<&StoredDraft> {
        self.drafts
            .get(&number)
            .ok_or_else(|| Error::not_found("draft", number.to_string()))
    }

    fn open_draft(&mut self, number: u64) -> Result<&mut StoredDraft> {
        let draft = self
            .drafts
            .get_mut(&number)
            .ok_or_else(|| Error::not_found("draft", number.to_string()))?;
        if draft.info.state != DraftState::Open {
            return Err(Error::InvalidState(format!("draft #{} is {}", number, draft.info.state)));
        }
        Ok(draft)
    }

    fn sheets(&self, source: &SheetSource) -> Result<&SheetMap> {
        match source {
            SheetSource::Commit(id) => Ok(&self.commit(id)?.sheets),
            SheetSource::Draft(number) => Ok(&self.draft(*number)?.sheets),
        }
    }

    fn action(&mut self, name: &str) -> Result<&mut StoredAction> {
        self.actions.get_mut(name).ok_or_else(|| Error::not_found("action", name))
    }

    /// Record a commit on `branch` holding `sheets`.
    fn push_commit(&mut self, branch: &str, title: &str, description: Option<&str>, sheets: SheetMap) -> Commit {
        let parent_id = self.branches.get(branch).cloned().flatten();
        let commit = Commit {
            id: Uuid::new_v4().to_string(),
            parent_id,
            title: title.to_string(),
            description: description.map(str::to_string),
            committer: "in-memory".to_string(),
            committed_at: Utc::now(),
        };
        self.commits.insert(
            commit.id.clone(),
            StoredCommit {
                commit: commit.clone(),
                sheets,
            },
        );
        self.branches.insert(branch.to_string(), Some(commit.id.clone()));
        commit
    }
}

#[derive(Default)]
struct State {
    datasets: BTreeMap<String, DatasetState>,
    objects: HashMap<String, Vec<u8>>,
    /// Keys granted by `copy_objects`, pointing at the original key
    aliases: HashMap<String, String>,
    packages: HashMap<PackageRef, BTreeMap<String, Json>>,
}

impl State {
    fn dataset(&self, name: &str) -> Result<&DatasetState> {
        self.datasets.get(name).ok_or_else(|| Error::not_found("dataset", name))
    }

    fn dataset_mut(&mut self, name: &str) -> Result<&mut DatasetState> {
        self.datasets.get_mut(name).ok_or_else(|| Error::not_found("dataset", name))
    }
}

/// In-memory [`DatasetApi`], [`ObjectStorage`], [`SearchBackend`] and
/// [`PackageSource`]
pub struct InMemoryRemote {
    state: Mutex<State>,
    page_size: usize,
    calls: Mutex<HashMap<&'static str, usize>>,
    fail_next_add_rows: AtomicUsize,
    failing_sheets: Mutex<HashSet<String>>,
    add_rows_delay: Mutex<Option<Arc<DelayFn>>>,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        InMemoryRemote::new()
    }
}

impl InMemoryRemote {
    /// Empty service paging lists 100 items at a time.
    pub fn new() -> Self {
        InMemoryRemote {
            state: Mutex::new(State::default()),
            page_size: DEFAULT_PAGE_SIZE,
            calls: Mutex::new(HashMap::new()),
            fail_next_add_rows: AtomicUsize::new(0),
            failing_sheets: Mutex::new(HashSet::new()),
            add_rows_delay: Mutex::new(None),
        }
    }

    /// Empty service behind an `Arc`, ready for `WorkspaceBuilder::remote`.
    pub fn shared() -> Arc<Self> {
        Arc::new(InMemoryRemote::new())
    }

    /// Page every list endpoint `page_size` items at a time.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    // ---- hooks ----

    /// Calls made to `endpoint` so far (method names, e.g. `"add_rows"`).
    pub fn calls(&self, endpoint: &str) -> usize {
        self.calls.lock().get(endpoint).copied().unwrap_or(0)
    }

    /// Objects stored through `put`.
    pub fn puts(&self) -> usize {
        self.calls("put")
    }

    /// Fail the next `count` add_rows or update_rows calls with a network error.
    pub fn fail_next_add_rows(&self, count: usize) {
        self.fail_next_add_rows.store(count, Ordering::SeqCst);
    }

    /// Fail every row write for `sheet` until [`heal_sheet`](Self::heal_sheet).
    pub fn fail_sheet(&self, sheet: &str) {
        self.failing_sheets.lock().insert(sheet.to_string());
    }

    /// Stop failing add_rows calls for `sheet`.
    pub fn heal_sheet(&self, sheet: &str) {
        self.failing_sheets.lock().remove(sheet);
    }

    /// Sleep before each add_rows call for `delay(sheet, position)`.
    pub fn set_add_rows_delay(&self, delay: impl Fn(&str, usize) -> Duration + Send + Sync + 'static) {
        *self.add_rows_delay.lock() = Some(Arc::new(delay));
    }

    /// Make `templates` fetchable as `package`.
    pub fn publish_package(&self, package: PackageRef, templates: BTreeMap<String, Json>) {
        self.state.lock().packages.insert(package, templates);
    }

    /// Commit on `branch` as another client would, keeping its sheets.
    pub fn advance_branch(&self, dataset: &str, branch: &str, title: &str) -> Result<Commit> {
        let mut state = self.state.lock();
        let ds = state.dataset_mut(dataset)?;
        let current = ds
            .branches
            .get(branch)
            .ok_or_else(|| Error::not_found("branch", branch))?
            .clone();
        let sheets = match current {
            Some(id) => ds.commit(&id)?.sheets.clone(),
            None => SheetMap::new(),
        };
        Ok(ds.push_commit(branch, title, None, sheets))
    }

    /// Move a run to a final status, as the executor would.
    pub fn finish_run(&self, dataset: &str, action: &str, number: u64, status: RunStatus) -> Result<()> {
        let mut state = self.state.lock();
        let stored = state.dataset_mut(dataset)?.action(action)?;
        let run = stored
            .runs
            .iter_mut()
            .find(|r| r.number == number)
            .ok_or_else(|| Error::not_found("run", number.to_string()))?;
        run.status = status;
        run.ended_at = Some(Utc::now());
        Ok(())
    }

    /// Every row of a sheet, in position order.
    pub fn rows(&self, dataset: &str, source: &SheetSource, sheet: &str) -> Result<Vec<Value>> {
        let state = self.state.lock();
        let sheets = state.dataset(dataset)?.sheets(source)?;
        sheets
            .get(sheet)
            .map(StoredSheet::rows)
            .ok_or_else(|| Error::not_found("sheet", sheet))
    }

    fn count(&self, endpoint: &'static str) {
        *self.calls.lock().entry(endpoint).or_insert(0) += 1;
    }

    fn page<T: Clone>(&self, items: &[T], cursor: Option<&str>) -> Result<Page<T>> {
        let start = match cursor {
            None => 0,
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| Error::InvalidArgument(format!("bad cursor '{}'", cursor)))?,
        };
        let end = (start + self.page_size).min(items.len());
        let slice = items.get(start..end).unwrap_or_default().to_vec();
        let next = (end < items.len()).then(|| end.to_string());
        Ok(Page::new(slice, next))
    }
}

fn has_local_file(value: &Value) -> bool {
    match value {
        Value::File(file) => file.is_local(),
        Value::Array(items) => items.iter().any(has_local_file),
        Value::Record(fields) => fields.values().any(has_local_file),
        _ => false,
    }
}

fn sheet_infos(sheets: &SheetMap) -> Vec<SheetInfo> {
    sheets
        .iter()
        .map(|(name, sheet)| SheetInfo {
            name: name.clone(),
            schema: sheet.schema.clone(),
            record_count: sheet.len(),
        })
        .collect()
}

// ============================================================================
// DatasetApi
// ============================================================================

impl DatasetApi for InMemoryRemote {
    fn create_dataset(&self, name: &str, alias: &str, storage_config: Option<&str>) -> Result<DatasetInfo> {
        self.count("create_dataset");
        let mut state = self.state.lock();
        if state.datasets.contains_key(name) {
            return Err(Error::InvalidArgument(format!("dataset '{}' already exists", name)));
        }
        let info = DatasetInfo {
            name: name.to_string(),
            alias: alias.to_string(),
            default_branch: "main".to_string(),
            storage_config: storage_config
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}-storage", name)),
            created_at: Utc::now(),
        };
        state.datasets.insert(
            name.to_string(),
            DatasetState {
                info: info.clone(),
                commits: HashMap::new(),
                branches: BTreeMap::from([("main".to_string(), None)]),
                tags: BTreeMap::new(),
                drafts: BTreeMap::new(),
                actions: BTreeMap::new(),
            },
        );
        Ok(info)
    }

    fn get_dataset(&self, name: &str) -> Result<DatasetInfo> {
        Ok(self.state.lock().dataset(name)?.info.clone())
    }

    fn list_datasets(&self, cursor: Option<&str>) -> Result<Page<DatasetInfo>> {
        let infos: Vec<DatasetInfo> = self.state.lock().datasets.values().map(|d| d.info.clone()).collect();
        self.page(&infos, cursor)
    }

    fn delete_dataset(&self, name: &str) -> Result<()> {
        self.state
            .lock()
            .datasets
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("dataset", name))
    }

    fn get_commit(&self, dataset: &str, commit_id: &str) -> Result<Commit> {
        self.count("get_commit");
        Ok(self.state.lock().dataset(dataset)?.commit(commit_id)?.commit.clone())
    }

    fn list_commits(&self, dataset: &str, commit_id: &str, cursor: Option<&str>) -> Result<Page<Commit>> {
        self.count("list_commits");
        let history = {
            let state = self.state.lock();
            let ds = state.dataset(dataset)?;
            let mut history = Vec::new();
            let mut next = Some(commit_id.to_string());
            while let Some(id) = next {
                let stored = ds.commit(&id)?;
                next = stored.commit.parent_id.clone();
                history.push(stored.commit.clone());
            }
            history
        };
        self.page(&history, cursor)
    }

    fn create_branch(&self, dataset: &str, name: &str, commit_id: &str) -> Result<Branch> {
        let mut state = self.state.lock();
        let ds = state.dataset_mut(dataset)?;
        ds.commit(commit_id)?;
        if ds.branches.contains_key(name) {
            return Err(Error::InvalidArgument(format!("branch '{}' already exists", name)));
        }
        ds.branches.insert(name.to_string(), Some(commit_id.to_string()));
        Ok(Branch {
            name: name.to_string(),
            commit_id: Some(commit_id.to_string()),
        })
    }

    fn get_branch(&self, dataset: &str, name: &str) -> Result<Branch> {
        self.count("get_branch");
        let state = self.state.lock();
        let commit_id = state
            .dataset(dataset)?
            .branches
            .get(name)
            .ok_or_else(|| Error::not_found("branch", name))?;
        Ok(Branch {
            name: name.to_string(),
            commit_id: commit_id.clone(),
        })
    }

    fn list_branches(&self, dataset: &str, cursor: Option<&str>) -> Result<Page<Branch>> {
        let branches: Vec<Branch> = self
            .state
            .lock()
            .dataset(dataset)?
            .branches
            .iter()
            .map(|(name, commit_id)| Branch {
                name: name.clone(),
                commit_id: commit_id.clone(),
            })
            .collect();
        self.page(&branches, cursor)
    }

    fn delete_branch(&self, dataset: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        let ds = state.dataset_mut(dataset)?;
        if name == ds.info.default_branch {
            return Err(Error::InvalidArgument(format!("cannot delete default branch '{}'", name)));
        }
        ds.branches
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("branch", name))
    }

    fn create_tag(&self, dataset: &str, name: &str, commit_id: &str) -> Result<Tag> {
        let mut state = self.state.lock();
        let ds = state.dataset_mut(dataset)?;
        ds.commit(commit_id)?;
        if ds.tags.contains_key(name) {
            return Err(Error::InvalidArgument(format!("tag '{}' already exists", name)));
        }
        ds.tags.insert(name.to_string(), commit_id.to_string());
        Ok(Tag {
            name: name.to_string(),
            commit_id: commit_id.to_string(),
        })
    }

    fn get_tag(&self, dataset: &str, name: &str) -> Result<Tag> {
        self.count("get_tag");
        let state = self.state.lock();
        let commit_id = state
            .dataset(dataset)?
            .tags
            .get(name)
            .ok_or_else(|| Error::not_found("tag", name))?;
        Ok(Tag {
            name: name.to_string(),
            commit_id: commit_id.clone(),
        })
    }

    fn list_tags(&self, dataset: &str, cursor: Option<&str>) -> Result<Page<Tag>> {
        let tags: Vec<Tag> = self
            .state
            .lock()
            .dataset(dataset)?
            .tags
            .iter()
            .map(|(name, commit_id)| Tag {
                name: name.clone(),
                commit_id: commit_id.clone(),
            })
            .collect();
        self.page(&tags, cursor)
    }

    fn delete_tag(&self, dataset: &str, name: &str) -> Result<()> {
        self.state
            .lock()
            .dataset_mut(dataset)?
            .tags
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("tag", name))
    }

    fn create_draft(&self, dataset: &str, branch: &str, title: &str, description: Option<&str>) -> Result<DraftInfo> {
        self.count("create_draft");
        let mut state = self.state.lock();
        let ds = state.dataset_mut(dataset)?;
        let parent_commit_id = ds
            .branches
            .get(branch)
            .ok_or_else(|| Error::not_found("branch", branch))?
            .clone();
        let sheets = match &parent_commit_id {
            Some(id) => ds.commit(id)?.sheets.clone(),
            None => SheetMap::new(),
        };
        let now = Utc::now();
        let info = DraftInfo {
            number: ds.drafts.len() as u64 + 1,
            title: title.to_string(),
            description: description.map(str::to_string),
            branch: branch.to_string(),
            parent_commit_id,
            state: DraftState::Open,
            created_at: now,
            updated_at: now,
        };
        ds.drafts.insert(
            info.number,
            StoredDraft {
                info: info.clone(),
                sheets,
            },
        );
        Ok(info)
    }

    fn get_draft(&self, dataset: &str, number: u64) -> Result<DraftInfo> {
        Ok(self.state.lock().dataset(dataset)?.draft(number)?.info.clone())
    }

    fn list_drafts(
        &self,
        dataset: &str,
        state: Option<DraftState>,
        branch: Option<&str>,
        cursor: Option<&str>,
    ) -> Result<Page<DraftInfo>> {
        let drafts: Vec<DraftInfo> = self
            .state
            .lock()
            .dataset(dataset)?
            .drafts
            .values()
            .map(|d| &d.info)
            .filter(|info| state.map_or(true, |s| info.state == s))
            .filter(|info| branch.map_or(true, |b| info.branch == b))
            .cloned()
            .collect();
        self.page(&drafts, cursor)
    }

    fn update_draft(&self, dataset: &str, number: u64, update: &DraftUpdate) -> Result<DraftInfo> {
        self.count("update_draft");
        let mut state = self.state.lock();
        let draft = state.dataset_mut(dataset)?.open_draft(number)?;
        match update.state {
            None | Some(DraftState::Open) => {}
            Some(DraftState::Closed) => {
                draft.info.state = DraftState::Closed;
                draft.sheets.clear();
            }
            Some(DraftState::Committed) => {
                return Err(Error::InvalidArgument("drafts are committed through commit_draft".into()))
            }
        }
        if let Some(title) = &update.title {
            draft.info.title = title.clone();
        }
        if let Some(description) = &update.description {
            draft.info.description = Some(description.clone());
        }
        draft.info.updated_at = Utc::now();
        Ok(draft.info.clone())
    }

    fn commit_draft(&self, dataset: &str, number: u64, title: &str, description: Option<&str>) -> Result<Commit> {
        self.count("commit_draft");
        let mut state = self.state.lock();
        let ds = state.dataset_mut(dataset)?;
        let (branch, parent, sheets) = {
            let draft = ds.open_draft(number)?;
            (draft.info.branch.clone(), draft.info.parent_commit_id.clone(), draft.sheets.clone())
        };
        let current = ds
            .branches
            .get(&branch)
            .ok_or_else(|| Error::not_found("branch", &branch))?;
        if *current != parent {
            return Err(Error::Network(format!(
                "conflict: branch '{}' moved since draft #{} was created",
                branch, number
            )));
        }
        let commit = ds.push_commit(&branch, title, description, sheets);
        if let Some(draft) = ds.drafts.get_mut(&number) {
            draft.info.state = DraftState::Committed;
            draft.info.updated_at = commit.committed_at;
        }
        Ok(commit)
    }

    fn list_sheets(&self, dataset: &str, source: &SheetSource) -> Result<Vec<SheetInfo>> {
        self.count("list_sheets");
        let state = self.state.lock();
        Ok(sheet_infos(state.dataset(dataset)?.sheets(source)?))
    }

    fn create_sheet(&self, dataset: &str, draft: u64, name: &str, schema: &Json) -> Result<()> {
        self.count("create_sheet");
        let mut state = self.state.lock();
        let draft = state.dataset_mut(dataset)?.open_draft(draft)?;
        if draft.sheets.contains_key(name) {
            return Err(Error::InvalidArgument(format!("sheet '{}' already exists", name)));
        }
        draft.sheets.insert(
            name.to_string(),
            StoredSheet {
                schema: schema.clone(),
                chunks: BTreeMap::new(),
            },
        );
        Ok(())
    }

    fn delete_sheet(&self, dataset: &str, draft: u64, name: &str) -> Result<()> {
        self.count("delete_sheet");
        let mut state = self.state.lock();
        state
            .dataset_mut(dataset)?
            .open_draft(draft)?
            .sheets
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("sheet", name))
    }

    fn list_rows(&self, dataset: &str, source: &SheetSource, sheet: &str, cursor: Option<&str>) -> Result<Page<Value>> {
        self.count("list_rows");
        let rows = self.rows(dataset, source, sheet)?;
        self.page(&rows, cursor)
    }

    fn add_rows(&self, dataset: &str, draft: u64, sheet: &str, position: usize, rows: &[Value]) -> Result<()> {
        self.count("add_rows");
        let delay = self.add_rows_delay.lock().clone();
        if let Some(delay) = delay {
            std::thread::sleep(delay(sheet, position));
        }
        let injected = self
            .fail_next_add_rows
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected || self.failing_sheets.lock().contains(sheet) {
            return Err(Error::Network(format!("injected failure for '{}' at row {}", sheet, position)));
        }
        if rows.iter().any(has_local_file) {
            return Err(Error::InvalidArgument(format!(
                "rows for '{}' at {} reference files that were never uploaded",
                sheet, position
            )));
        }
        let mut state = self.state.lock();
        let stored = state
            .dataset_mut(dataset)?
            .open_draft(draft)?
            .sheets
            .get_mut(sheet)
            .ok_or_else(|| Error::not_found("sheet", sheet))?;
        stored.chunks.insert(position, rows.to_vec());
        Ok(())
    }

    fn update_rows(&self, dataset: &str, draft: u64, sheet: &str, rows: &[(usize, Value)]) -> Result<()> {
        self.count("update_rows");
        let first = rows.first().map_or(0, |(index, _)| *index);
        let injected = self
            .fail_next_add_rows
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected || self.failing_sheets.lock().contains(sheet) {
            return Err(Error::Network(format!("injected failure for '{}' at row {}", sheet, first)));
        }
        if rows.iter().any(|(_, row)| has_local_file(row)) {
            return Err(Error::InvalidArgument(format!(
                "rows for '{}' from {} reference files that were never uploaded",
                sheet, first
            )));
        }
        let mut state = self.state.lock();
        let stored = state
            .dataset_mut(dataset)?
            .open_draft(draft)?
            .sheets
            .get_mut(sheet)
            .ok_or_else(|| Error::not_found("sheet", sheet))?;
        let total = stored.len();
        for (index, row) in rows {
            let slot = stored.row_mut(*index).ok_or_else(|| {
                Error::InvalidArgument(format!("row {} is past the end of '{}' ({} rows)", index, sheet, total))
            })?;
            *slot = row.clone();
        }
        Ok(())
    }

    fn copy_objects(&self, source: &str, target: &str, keys: &[String]) -> Result<Vec<String>> {
        self.count("copy_objects");
        let mut state = self.state.lock();
        let (from, to) = (state.dataset(source)?, state.dataset(target)?);
        if from.info.storage_config != to.info.storage_config {
            return Err(Error::InvalidArgument(format!(
                "datasets '{}' and '{}' use different storage",
                source, target
            )));
        }
        let mut copied = Vec::with_capacity(keys.len());
        for key in keys {
            let original = state.aliases.get(key).cloned().unwrap_or_else(|| key.clone());
            if !state.objects.contains_key(&original) {
                return Err(Error::not_found("object", key.as_str()));
            }
            let granted = format!("{}/{}", target, original);
            state.aliases.insert(granted.clone(), original);
            copied.push(granted);
        }
        Ok(copied)
    }

    fn create_action(&self, dataset: &str, name: &str, payload: &str) -> Result<ActionInfo> {
        let mut state = self.state.lock();
        let ds = state.dataset_mut(dataset)?;
        if ds.actions.contains_key(name) {
            return Err(Error::InvalidArgument(format!("action '{}' already exists", name)));
        }
        let info = ActionInfo {
            name: name.to_string(),
            edition: 1,
            state: ActionState::Enabled,
            payload: payload.to_string(),
        };
        ds.actions.insert(
            name.to_string(),
            StoredAction {
                info: info.clone(),
                runs: Vec::new(),
            },
        );
        Ok(info)
    }

    fn get_action(&self, dataset: &str, name: &str) -> Result<ActionInfo> {
        let mut state = self.state.lock();
        Ok(state.dataset_mut(dataset)?.action(name)?.info.clone())
    }

    fn list_actions(&self, dataset: &str, cursor: Option<&str>) -> Result<Page<ActionInfo>> {
        let actions: Vec<ActionInfo> = self
            .state
            .lock()
            .dataset(dataset)?
            .actions
            .values()
            .map(|a| a.info.clone())
            .collect();
        self.page(&actions, cursor)
    }

    fn update_action(&self, dataset: &str, name: &str, update: &ActionUpdate) -> Result<ActionInfo> {
        let mut state = self.state.lock();
        let ds = state.dataset_mut(dataset)?;
        let mut stored = ds.actions.remove(name).ok_or_else(|| Error::not_found("action", name))?;
        if let Some(enabled) = update.state {
            stored.info.state = enabled;
        }
        if update.name.is_some() || update.payload.is_some() {
            stored.info.edition += 1;
        }
        if let Some(payload) = &update.payload {
            stored.info.payload = payload.clone();
        }
        if let Some(new_name) = &update.name {
            stored.info.name = new_name.clone();
        }
        let info = stored.info.clone();
        ds.actions.insert(info.name.clone(), stored);
        Ok(info)
    }

    fn delete_action(&self, dataset: &str, name: &str) -> Result<()> {
        self.state
            .lock()
            .dataset_mut(dataset)?
            .actions
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("action", name))
    }

    fn create_run(&self, dataset: &str, action: &str, arguments: &Json) -> Result<RunInfo> {
        let mut state = self.state.lock();
        let stored = state.dataset_mut(dataset)?.action(action)?;
        if stored.info.state == ActionState::Disabled {
            return Err(Error::InvalidState(format!("action '{}' is disabled", action)));
        }
        let run = RunInfo {
            number: stored.runs.len() as u64 + 1,
            edition: stored.info.edition,
            status: RunStatus::Running,
            arguments: arguments.clone(),
            started_at: Utc::now(),
            ended_at: None,
        };
        stored.runs.push(run.clone());
        Ok(run)
    }

    fn get_run(&self, dataset: &str, action: &str, number: u64) -> Result<RunInfo> {
        let mut state = self.state.lock();
        state
            .dataset_mut(dataset)?
            .action(action)?
            .runs
            .iter()
            .find(|r| r.number == number)
            .cloned()
            .ok_or_else(|| Error::not_found("run", number.to_string()))
    }

    fn list_runs(&self, dataset: &str, action: &str, cursor: Option<&str>) -> Result<Page<RunInfo>> {
        let runs: Vec<RunInfo> = {
            let mut state = self.state.lock();
            state.dataset_mut(dataset)?.action(action)?.runs.iter().rev().cloned().collect()
        };
        self.page(&runs, cursor)
    }

    fn cancel_run(&self, dataset: &str, action: &str, number: u64) -> Result<RunInfo> {
        let mut state = self.state.lock();
        let run = state
            .dataset_mut(dataset)?
            .action(action)?
            .runs
            .iter_mut()
            .find(|r| r.number == number)
            .ok_or_else(|| Error::not_found("run", number.to_string()))?;
        if run.status.is_finished() {
            return Err(Error::InvalidState(format!("run #{} already finished", number)));
        }
        run.status = RunStatus::Cancelled;
        run.ended_at = Some(Utc::now());
        Ok(run.clone())
    }
}

// ============================================================================
// Other collaborators
// ============================================================================

impl ObjectStorage for InMemoryRemote {
    fn put(&self, content: &[u8]) -> Result<String> {
        self.count("put");
        let key = format!("obj/{}", checksum(content));
        self.state.lock().objects.insert(key.clone(), content.to_vec());
        Ok(key)
    }

    fn open(&self, key: &str) -> Result<Box<dyn Read + Send>> {
        let state = self.state.lock();
        let original = state.aliases.get(key).map(String::as_str).unwrap_or(key);
        let content = state
            .objects
            .get(original)
            .ok_or_else(|| Error::not_found("object", key))?;
        Ok(Box::new(Cursor::new(content.clone())))
    }
}

impl SearchBackend for InMemoryRemote {
    fn search(&self, target: &SearchTarget, criteria: Option<&Criteria>) -> Result<Vec<Value>> {
        self.count("search");
        let rows = self.rows(&target.dataset, &SheetSource::Commit(target.commit_id.clone()), &target.sheet)?;
        Ok(rows
            .into_iter()
            .filter(|row| criteria.map_or(true, |c| c.matches(row)))
            .collect())
    }
}

impl PackageSource for InMemoryRemote {
    fn fetch(&self, package: &PackageRef) -> Result<BTreeMap<String, Json>> {
        self.count("fetch_package");
        self.state
            .lock()
            .packages
            .get(package)
            .cloned()
            .ok_or_else(|| Error::not_found("package", package.to_string()))
    }
}

/// Remote file reference for already-stored `content`, for seeding rows.
pub fn stored_file(remote: &InMemoryRemote, content: &[u8]) -> Result<FileRef> {
    let key = remote.put(content)?;
    Ok(FileRef::remote(key, content.len() as u64, checksum(content)))
}
