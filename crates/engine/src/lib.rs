//! Session engine for Portex datasets
//!
//! This crate ties the type system and frames to the remote service:
//! - Workspace: session object owning collaborators, config and packages
//! - Dataset: HEAD, staged sheets, branches, tags and commit history
//! - Draft: OPEN → COMMITTED | CLOSED staging areas
//! - Sync: chunked, retried, order-preserving draft upload
//! - Actions and runs stored with a dataset
//!
//! The engine is the only component that knows about:
//! - The [`DatasetApi`] collaborator and its paginated endpoints
//! - Revision resolution and stale-HEAD detection
//! - Worker threads (only during chunk transfer)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod action;
pub mod config;
pub mod dataset;
pub mod draft;
pub mod remote;
mod sheets;
pub mod sync;
pub mod testing;
pub mod version;
pub mod workspace;

pub use action::{Action, ActionManager, Run, RunManager};
pub use config::{ClientConfig, CONFIG_FILE_NAME};
pub use dataset::Dataset;
pub use draft::{CommitOptions, Draft, DraftManager};
pub use remote::{
    ActionInfo, ActionState, ActionUpdate, DatasetApi, DatasetInfo, DraftInfo, DraftState, DraftUpdate,
    RunInfo, RunStatus, SheetInfo, SheetSource,
};
pub use sync::{SheetAction, SheetPlan, SheetReport, UploadReport};
pub use version::{resolve_revision, Branch, BranchManager, Commit, CommitManager, Head, Tag, TagManager};
pub use workspace::{DatasetManager, Workspace, WorkspaceBuilder};
