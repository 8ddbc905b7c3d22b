//! Version graph: commits, branches, tags and HEAD
//!
//! History is linear per branch: a commit has at most one parent. Branches
//! are movable pointers (possibly at no commit yet), tags are fixed at
//! creation. A revision string resolves, in order, as an exact commit id,
//! a branch name, then a tag name.

use crate::dataset::Dataset;
use crate::remote::DatasetApi;
use chrono::{DateTime, Utc};
use portex_core::{Error, Result};
use portex_paging::{Page, PagingCache};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// An immutable point in a dataset's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Commit id
    pub id: String,
    /// Previous commit on the same history; `None` for the first
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Title
    pub title: String,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
    /// Author
    pub committer: String,
    /// Creation time
    pub committed_at: DateTime<Utc>,
}

/// A movable named pointer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Branch name
    pub name: String,
    /// Current commit; `None` until the first commit lands
    pub commit_id: Option<String>,
}

/// A fixed named pointer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Tag name
    pub name: String,
    /// Tagged commit
    pub commit_id: String,
}

/// What a dataset handle has checked out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Head {
    /// A branch, at the commit it pointed to when resolved
    Branch {
        /// Branch name
        name: String,
        /// Commit at resolution time
        commit_id: Option<String>,
    },
    /// A detached commit
    Commit {
        /// Commit id
        id: String,
    },
    /// A tag
    Tag {
        /// Tag name
        name: String,
        /// Tagged commit
        commit_id: String,
    },
}

impl Head {
    /// Commit the head resolves to, if any.
    pub fn commit_id(&self) -> Option<&str> {
        match self {
            Head::Branch { commit_id, .. } => commit_id.as_deref(),
            Head::Commit { id } => Some(id),
            Head::Tag { commit_id, .. } => Some(commit_id),
        }
    }

    /// Branch name when a branch is checked out.
    pub fn branch(&self) -> Option<&str> {
        match self {
            Head::Branch { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Commit id a new branch or tag would point to.
    ///
    /// # Errors
    ///
    /// `BranchWithoutCommit` when a branch with no commits is checked out.
    pub fn require_commit(&self) -> Result<&str> {
        match self {
            Head::Branch { name, commit_id: None } => Err(Error::BranchWithoutCommit {
                branch: name.clone(),
            }),
            other => other
                .commit_id()
                .ok_or_else(|| Error::InvalidState("head has no commit".into())),
        }
    }
}

impl From<Branch> for Head {
    fn from(branch: Branch) -> Self {
        Head::Branch {
            name: branch.name,
            commit_id: branch.commit_id,
        }
    }
}

impl fmt::Display for Head {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Head::Branch { name, commit_id } => {
                write!(f, "branch '{}' at {}", name, commit_id.as_deref().unwrap_or("<no commit>"))
            }
            Head::Commit { id } => write!(f, "commit {}", id),
            Head::Tag { name, commit_id } => write!(f, "tag '{}' at {}", name, commit_id),
        }
    }
}

/// Resolve `revision` as commit id, then branch, then tag.
pub fn resolve_revision(api: &dyn DatasetApi, dataset: &str, revision: &str) -> Result<Head> {
    if revision.is_empty() {
        return Err(Error::InvalidArgument("revision must not be empty".into()));
    }
    match api.get_commit(dataset, revision) {
        Ok(commit) => return Ok(Head::Commit { id: commit.id }),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }
    match api.get_branch(dataset, revision) {
        Ok(branch) => return Ok(branch.into()),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }
    match api.get_tag(dataset, revision) {
        Ok(tag) => Ok(Head::Tag {
            name: tag.name,
            commit_id: tag.commit_id,
        }),
        Err(e) if e.is_not_found() => Err(Error::RevisionNotFound {
            revision: revision.to_string(),
        }),
        Err(e) => Err(e),
    }
}

/// Commit a new pointer would start from: `revision` if given, else HEAD.
fn source_commit(dataset: &Dataset, revision: Option<&str>) -> Result<String> {
    let head = match revision {
        Some(revision) => resolve_revision(dataset.api(), dataset.name(), revision)?,
        None => dataset.head(),
    };
    head.require_commit().map(str::to_string)
}

// ============================================================================
// Managers
// ============================================================================

/// Branches of one dataset
pub struct BranchManager<'a> {
    dataset: &'a Dataset,
}

impl<'a> BranchManager<'a> {
    pub(crate) fn new(dataset: &'a Dataset) -> Self {
        Self { dataset }
    }

    /// Create `name` at `revision` (HEAD when `None`).
    ///
    /// # Errors
    ///
    /// `BranchWithoutCommit` when the source is a branch with no commits.
    pub fn create(&self, name: &str, revision: Option<&str>) -> Result<Branch> {
        let commit_id = source_commit(self.dataset, revision)?;
        let branch = self
            .dataset
            .api()
            .create_branch(self.dataset.name(), name, &commit_id)?;
        info!(target: "portex::version", dataset = self.dataset.name(), branch = name, commit = %commit_id, "Created branch");
        Ok(branch)
    }

    /// Branch by name.
    pub fn get(&self, name: &str) -> Result<Branch> {
        let branch = self.dataset.api().get_branch(self.dataset.name(), name)?;
        self.dataset.observe_branch(&branch);
        Ok(branch)
    }

    /// All branches, fetched page by page.
    pub fn list(&self) -> PagingCache<Branch> {
        let api = Arc::clone(self.dataset.api_arc());
        let dataset = self.dataset.name().to_string();
        PagingCache::new(move |cursor: Option<&str>| -> Result<Page<Branch>> {
            api.list_branches(&dataset, cursor)
        })
    }

    /// Delete a branch.
    pub fn delete(&self, name: &str) -> Result<()> {
        self.dataset.api().delete_branch(self.dataset.name(), name)?;
        debug!(target: "portex::version", dataset = self.dataset.name(), branch = name, "Deleted branch");
        Ok(())
    }
}

/// Tags of one dataset
pub struct TagManager<'a> {
    dataset: &'a Dataset,
}

impl<'a> TagManager<'a> {
    pub(crate) fn new(dataset: &'a Dataset) -> Self {
        Self { dataset }
    }

    /// Tag `revision` (HEAD when `None`) as `name`.
    ///
    /// # Errors
    ///
    /// `BranchWithoutCommit` when the source is a branch with no commits.
    pub fn create(&self, name: &str, revision: Option<&str>) -> Result<Tag> {
        let commit_id = source_commit(self.dataset, revision)?;
        let tag = self
            .dataset
            .api()
            .create_tag(self.dataset.name(), name, &commit_id)?;
        info!(target: "portex::version", dataset = self.dataset.name(), tag = name, commit = %commit_id, "Created tag");
        Ok(tag)
    }

    /// Tag by name.
    pub fn get(&self, name: &str) -> Result<Tag> {
        self.dataset.api().get_tag(self.dataset.name(), name)
    }

    /// All tags, fetched page by page.
    pub fn list(&self) -> PagingCache<Tag> {
        let api = Arc::clone(self.dataset.api_arc());
        let dataset = self.dataset.name().to_string();
        PagingCache::new(move |cursor: Option<&str>| -> Result<Page<Tag>> {
            api.list_tags(&dataset, cursor)
        })
    }

    /// Delete a tag.
    pub fn delete(&self, name: &str) -> Result<()> {
        self.dataset.api().delete_tag(self.dataset.name(), name)
    }
}

/// Commit history of one dataset
pub struct CommitManager<'a> {
    dataset: &'a Dataset,
}

impl<'a> CommitManager<'a> {
    pub(crate) fn new(dataset: &'a Dataset) -> Self {
        Self { dataset }
    }

    fn commit_of(&self, revision: Option<&str>) -> Result<Option<String>> {
        let head = match revision {
            Some(revision) => resolve_revision(self.dataset.api(), self.dataset.name(), revision)?,
            None => self.dataset.head(),
        };
        Ok(head.commit_id().map(str::to_string))
    }

    /// Commit `revision` resolves to (HEAD when `None`).
    ///
    /// # Errors
    ///
    /// `BranchWithoutCommit` for a branch with no commits.
    pub fn get(&self, revision: Option<&str>) -> Result<Commit> {
        let head = match revision {
            Some(revision) => resolve_revision(self.dataset.api(), self.dataset.name(), revision)?,
            None => self.dataset.head(),
        };
        let id = head.require_commit()?;
        self.dataset.api().get_commit(self.dataset.name(), id)
    }

    /// History ending at `revision` (HEAD when `None`), newest first.
    /// Empty for a branch with no commits.
    pub fn list(&self, revision: Option<&str>) -> Result<PagingCache<Commit>> {
        let Some(commit_id) = self.commit_of(revision)? else {
            return Ok(PagingCache::from_items(Vec::new()));
        };
        let api = Arc::clone(self.dataset.api_arc());
        let dataset = self.dataset.name().to_string();
        Ok(PagingCache::new(move |cursor: Option<&str>| -> Result<Page<Commit>> {
            api.list_commits(&dataset, &commit_id, cursor)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_commit_ids() {
        let empty = Head::Branch {
            name: "main".into(),
            commit_id: None,
        };
        assert_eq!(empty.commit_id(), None);
        assert_eq!(empty.branch(), Some("main"));
        assert!(matches!(
            empty.require_commit(),
            Err(Error::BranchWithoutCommit { branch }) if branch == "main"
        ));

        let tag = Head::Tag {
            name: "v1".into(),
            commit_id: "c1".into(),
        };
        assert_eq!(tag.require_commit().unwrap(), "c1");
        assert_eq!(tag.branch(), None);
    }

    #[test]
    fn test_head_display() {
        let head: Head = Branch {
            name: "dev".into(),
            commit_id: None,
        }
        .into();
        assert_eq!(head.to_string(), "branch 'dev' at <no commit>");
        assert_eq!(Head::Commit { id: "abc".into() }.to_string(), "commit abc");
    }
}
