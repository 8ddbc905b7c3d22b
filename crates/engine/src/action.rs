//! Actions and their runs
//!
//! An action is a named workflow definition stored with a dataset. Its
//! payload is opaque here; the service executes it. Each edit bumps the
//! action's edition and every run records the edition it started from.

use crate::dataset::Dataset;
use crate::remote::{ActionInfo, ActionState, ActionUpdate, DatasetApi, RunInfo, RunStatus};
use chrono::{DateTime, Duration, Utc};
use portex_core::{Error, Result};
use portex_paging::{Page, PagingCache};
use std::sync::Arc;
use tracing::info;

/// Actions of one dataset
pub struct ActionManager<'a> {
    dataset: &'a Dataset,
}

impl<'a> ActionManager<'a> {
    pub(crate) fn new(dataset: &'a Dataset) -> Self {
        Self { dataset }
    }

    fn wrap(&self, info: ActionInfo) -> Action {
        Action {
            api: Arc::clone(self.dataset.api_arc()),
            dataset: self.dataset.name().to_string(),
            info,
        }
    }

    /// Create an enabled action.
    pub fn create(&self, name: &str, payload: &str) -> Result<Action> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("action name must not be empty".into()));
        }
        let info = self.dataset.api().create_action(self.dataset.name(), name, payload)?;
        info!(target: "portex::version", dataset = self.dataset.name(), action = name, "Created action");
        Ok(self.wrap(info))
    }

    /// Action by name.
    pub fn get(&self, name: &str) -> Result<Action> {
        let info = self.dataset.api().get_action(self.dataset.name(), name)?;
        Ok(self.wrap(info))
    }

    /// All actions, fetched page by page.
    pub fn list(&self) -> PagingCache<ActionInfo> {
        let api = Arc::clone(self.dataset.api_arc());
        let dataset = self.dataset.name().to_string();
        PagingCache::new(move |cursor: Option<&str>| -> Result<Page<ActionInfo>> {
            api.list_actions(&dataset, cursor)
        })
    }

    /// Delete an action and its runs.
    pub fn delete(&self, name: &str) -> Result<()> {
        self.dataset.api().delete_action(self.dataset.name(), name)
    }
}

/// A workflow definition
#[derive(Clone)]
pub struct Action {
    api: Arc<dyn DatasetApi>,
    dataset: String,
    info: ActionInfo,
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("dataset", &self.dataset)
            .field("info", &self.info)
            .finish()
    }
}

impl Action {
    /// Name.
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Edition, bumped on every edit.
    pub fn edition(&self) -> u64 {
        self.info.edition
    }

    /// Enablement.
    pub fn state(&self) -> ActionState {
        self.info.state
    }

    /// Workflow definition.
    pub fn payload(&self) -> &str {
        &self.info.payload
    }

    fn update(&mut self, update: ActionUpdate) -> Result<()> {
        self.info = self.api.update_action(&self.dataset, &self.info.name, &update)?;
        Ok(())
    }

    /// Rename and/or replace the payload.
    pub fn edit(&mut self, name: Option<&str>, payload: Option<&str>) -> Result<()> {
        self.update(ActionUpdate {
            name: name.map(str::to_string),
            payload: payload.map(str::to_string),
            state: None,
        })
    }

    /// Allow new runs.
    pub fn enable(&mut self) -> Result<()> {
        self.update(ActionUpdate {
            state: Some(ActionState::Enabled),
            ..ActionUpdate::default()
        })
    }

    /// Reject new runs.
    pub fn disable(&mut self) -> Result<()> {
        self.update(ActionUpdate {
            state: Some(ActionState::Disabled),
            ..ActionUpdate::default()
        })
    }

    /// Runs of this action.
    pub fn runs(&self) -> RunManager<'_> {
        RunManager { action: self }
    }
}

/// Runs of one action
pub struct RunManager<'a> {
    action: &'a Action,
}

impl<'a> RunManager<'a> {
    fn wrap(&self, info: RunInfo) -> Run {
        Run {
            api: Arc::clone(&self.action.api),
            dataset: self.action.dataset.clone(),
            action: self.action.info.name.clone(),
            info,
        }
    }

    /// Start a run.
    ///
    /// # Errors
    ///
    /// `InvalidState` when the action is disabled.
    pub fn create(&self, arguments: serde_json::Value) -> Result<Run> {
        if self.action.state() == ActionState::Disabled {
            return Err(Error::InvalidState(format!(
                "action '{}' is disabled",
                self.action.name()
            )));
        }
        let info = self
            .action
            .api
            .create_run(&self.action.dataset, self.action.name(), &arguments)?;
        info!(target: "portex::version", dataset = %self.action.dataset, action = self.action.name(), run = info.number, "Started run");
        Ok(self.wrap(info))
    }

    /// Run by number.
    pub fn get(&self, number: u64) -> Result<Run> {
        let info = self
            .action
            .api
            .get_run(&self.action.dataset, self.action.name(), number)?;
        Ok(self.wrap(info))
    }

    /// All runs, newest first.
    pub fn list(&self) -> PagingCache<RunInfo> {
        let api = Arc::clone(&self.action.api);
        let dataset = self.action.dataset.clone();
        let action = self.action.info.name.clone();
        PagingCache::new(move |cursor: Option<&str>| -> Result<Page<RunInfo>> {
            api.list_runs(&dataset, &action, cursor)
        })
    }
}

/// One execution of an action
#[derive(Clone)]
pub struct Run {
    api: Arc<dyn DatasetApi>,
    dataset: String,
    action: String,
    info: RunInfo,
}

impl std::fmt::Debug for Run {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Run")
            .field("action", &self.action)
            .field("info", &self.info)
            .finish()
    }
}

impl Run {
    /// Run number.
    pub fn number(&self) -> u64 {
        self.info.number
    }

    /// Action edition the run started from.
    pub fn edition(&self) -> u64 {
        self.info.edition
    }

    /// Status as of the last fetch.
    pub fn status(&self) -> RunStatus {
        self.info.status
    }

    /// Arguments.
    pub fn arguments(&self) -> &serde_json::Value {
        &self.info.arguments
    }

    /// Start time.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.info.started_at
    }

    /// End time, once finished.
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.info.ended_at
    }

    /// Wall time between start and end, once finished.
    pub fn duration(&self) -> Option<Duration> {
        self.info.ended_at.map(|end| end - self.info.started_at)
    }

    /// Re-read the status from the service.
    pub fn refresh(&mut self) -> Result<RunStatus> {
        self.info = self.api.get_run(&self.dataset, &self.action, self.info.number)?;
        Ok(self.info.status)
    }

    /// Cancel the run.
    ///
    /// # Errors
    ///
    /// `InvalidState` when the run already finished.
    pub fn cancel(&mut self) -> Result<()> {
        if self.info.status.is_finished() {
            return Err(Error::InvalidState(format!(
                "run #{} of '{}' already finished",
                self.info.number, self.action
            )));
        }
        self.info = self.api.cancel_run(&self.dataset, &self.action, self.info.number)?;
        Ok(())
    }
}
