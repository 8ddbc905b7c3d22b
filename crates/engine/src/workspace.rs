//! Session object owning collaborators, configuration and the package registry
//!
//! A [`Workspace`] is built once per session and hands out [`Dataset`]
//! handles. Every handle shares the same [`Context`], so a package fetched
//! while loading one dataset's sheets is never fetched again for another.

use crate::config::ClientConfig;
use crate::dataset::Dataset;
use crate::remote::{DatasetApi, DatasetInfo};
use portex_core::{Error, ObjectStorage, PackageRegistry, PackageSource, Result};
use portex_frame::{OnlineGuard, SearchBackend};
use portex_paging::{Page, PagingCache};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Everything a dataset handle needs to talk to the outside world
pub(crate) struct Context {
    pub(crate) api: Arc<dyn DatasetApi>,
    pub(crate) storage: Arc<dyn ObjectStorage>,
    pub(crate) search: Arc<dyn SearchBackend>,
    pub(crate) registry: Arc<PackageRegistry>,
    pub(crate) config: ClientConfig,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context").field("config", &self.config).finish_non_exhaustive()
    }
}

// ============================================================================
// Workspace Builder Pattern
// ============================================================================

/// Builder for a [`Workspace`]
///
/// ```ignore
/// use portex_engine::{testing::InMemoryRemote, Workspace};
///
/// let remote = InMemoryRemote::shared();
/// let workspace = Workspace::builder().remote(remote).build()?;
///
/// // or wire collaborators one by one
/// let workspace = Workspace::builder()
///     .api(api)
///     .storage(storage)
///     .search(search)
///     .config_file("portex.toml")
///     .build()?;
/// ```
#[derive(Default)]
pub struct WorkspaceBuilder {
    api: Option<Arc<dyn DatasetApi>>,
    storage: Option<Arc<dyn ObjectStorage>>,
    search: Option<Arc<dyn SearchBackend>>,
    packages: Option<Arc<dyn PackageSource>>,
    config: Option<ClientConfig>,
    config_file: Option<PathBuf>,
}

impl WorkspaceBuilder {
    /// Create a builder with no collaborators and the default config
    pub fn new() -> Self {
        Self::default()
    }

    /// Use one object for every collaborator.
    pub fn remote<R>(self, remote: Arc<R>) -> Self
    where
        R: DatasetApi + ObjectStorage + SearchBackend + PackageSource + 'static,
    {
        self.api(remote.clone())
            .storage(remote.clone())
            .search(remote.clone())
            .package_source(remote)
    }

    /// Set the dataset service
    pub fn api(mut self, api: Arc<dyn DatasetApi>) -> Self {
        self.api = Some(api);
        self
    }

    /// Set the object storage used for file cells
    pub fn storage(mut self, storage: Arc<dyn ObjectStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the search backend used in online mode
    pub fn search(mut self, search: Arc<dyn SearchBackend>) -> Self {
        self.search = Some(search);
        self
    }

    /// Set the source of external template packages
    ///
    /// Without one, loading a schema that imports an external package fails.
    pub fn package_source(mut self, source: Arc<dyn PackageSource>) -> Self {
        self.packages = Some(source);
        self
    }

    /// Use an explicit config
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Read the config from a TOML file at build time
    ///
    /// Ignored when [`config`](Self::config) is also set.
    pub fn config_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config_file = Some(path.into());
        self
    }

    /// Build the workspace
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the api, storage or search collaborator is
    /// missing, and `InvalidArgument` if the config fails validation.
    pub fn build(self) -> Result<Workspace> {
        let config = match (self.config, self.config_file) {
            (Some(config), _) => config,
            (None, Some(path)) => ClientConfig::from_file(&path)?,
            (None, None) => ClientConfig::default(),
        };
        config.validate()?;
        let missing = |what: &str| Error::InvalidState(format!("WorkspaceBuilder::build() requires {}", what));
        let registry = match self.packages {
            Some(source) => PackageRegistry::with_source(source),
            None => PackageRegistry::new(),
        };
        let ctx = Context {
            api: self.api.ok_or_else(|| missing("a dataset api"))?,
            storage: self.storage.ok_or_else(|| missing("an object storage"))?,
            search: self.search.ok_or_else(|| missing("a search backend"))?,
            registry: Arc::new(registry),
            config,
        };
        info!(
            target: "portex::version",
            upload_workers = ctx.config.upload_workers,
            max_retries = ctx.config.max_retries,
            "Workspace ready"
        );
        Ok(Workspace { ctx: Arc::new(ctx) })
    }
}

// ============================================================================
// Workspace
// ============================================================================

/// One client session
#[derive(Debug, Clone)]
pub struct Workspace {
    ctx: Arc<Context>,
}

impl Workspace {
    /// Start building a workspace.
    pub fn builder() -> WorkspaceBuilder {
        WorkspaceBuilder::new()
    }

    /// Datasets of the remote service.
    pub fn datasets(&self) -> DatasetManager<'_> {
        DatasetManager { ctx: &self.ctx }
    }

    /// Session package registry. Register local templates here.
    pub fn registry(&self) -> &Arc<PackageRegistry> {
        &self.ctx.registry
    }

    /// Effective client config.
    pub fn config(&self) -> &ClientConfig {
        &self.ctx.config
    }

    /// Search backend used by online mode.
    pub fn search(&self) -> Arc<dyn SearchBackend> {
        Arc::clone(&self.ctx.search)
    }

    /// Route `query`/`apply` of remote frames to the search backend until
    /// the guard drops.
    pub fn enter_online(&self) -> OnlineGuard {
        portex_frame::online::enter(self.search())
    }

    /// Run `f` in online mode.
    pub fn online<T>(&self, f: impl FnOnce() -> T) -> T {
        portex_frame::online(self.search(), f)
    }
}

/// Create, open, list and delete datasets
pub struct DatasetManager<'a> {
    ctx: &'a Arc<Context>,
}

impl<'a> DatasetManager<'a> {
    /// Create a dataset and check out its default branch.
    ///
    /// Datasets created with the same `storage_config` can share file
    /// objects through [`Dataset::copy_files`].
    pub fn create(&self, name: &str, alias: Option<&str>, storage_config: Option<&str>) -> Result<Dataset> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("dataset name must not be empty".into()));
        }
        let info = self
            .ctx
            .api
            .create_dataset(name, alias.unwrap_or(""), storage_config)?;
        info!(target: "portex::version", dataset = name, storage = %info.storage_config, "Created dataset");
        Dataset::open(Arc::clone(self.ctx), info)
    }

    /// Open a dataset at its default branch.
    pub fn get(&self, name: &str) -> Result<Dataset> {
        let info = self.ctx.api.get_dataset(name)?;
        Dataset::open(Arc::clone(self.ctx), info)
    }

    /// All datasets, fetched page by page.
    pub fn list(&self) -> PagingCache<DatasetInfo> {
        let api = Arc::clone(&self.ctx.api);
        PagingCache::new(move |cursor: Option<&str>| -> Result<Page<DatasetInfo>> {
            api.list_datasets(cursor)
        })
    }

    /// Delete a dataset. Open handles to it fail on their next remote call.
    pub fn delete(&self, name: &str) -> Result<()> {
        self.ctx.api.delete_dataset(name)?;
        info!(target: "portex::version", dataset = name, "Deleted dataset");
        Ok(())
    }
}
