//! Template packages and the session package registry
//!
//! Templates live in packages. The session's local package holds templates
//! registered in-process; external packages are identified by
//! `(repository, revision)` and fetched through a [`PackageSource`] the first
//! time they are imported. Fetched packages are cached for the lifetime of
//! the registry and never re-validated, even for mutable revisions such as
//! branch names.

use super::canonical::TypeResolver;
use super::template::Template;
use super::{SchemaType, TemplateId, TemplateInstance};
use crate::error::{Error, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// External package identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageRef {
    /// Repository URL
    pub repository: String,
    /// Commit id, branch or tag in that repository
    pub revision: String,
}

impl PackageRef {
    /// Create a package reference.
    pub fn new(repository: impl Into<String>, revision: impl Into<String>) -> Self {
        PackageRef {
            repository: repository.into(),
            revision: revision.into(),
        }
    }

    /// Parse `"<repository>@<revision>"`.
    pub fn parse(text: &str) -> Result<Self> {
        match text.rsplit_once('@') {
            Some((repository, revision)) if !repository.is_empty() && !revision.is_empty() => {
                Ok(PackageRef::new(repository, revision))
            }
            _ => Err(Error::InvalidArgument(format!(
                "package reference '{}' must look like <repository>@<revision>",
                text
            ))),
        }
    }
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repository, self.revision)
    }
}

/// Fetches raw template declarations for an external package.
pub trait PackageSource: Send + Sync {
    /// Template name to canonical template tree.
    fn fetch(&self, package: &PackageRef) -> Result<BTreeMap<String, Json>>;
}

/// A set of templates
#[derive(Debug, Clone, Default)]
pub struct Package {
    reference: Option<PackageRef>,
    templates: BTreeMap<String, Arc<Template>>,
}

impl Package {
    /// Empty local package.
    pub fn local() -> Self {
        Package::default()
    }

    /// Build an external package from its declarations.
    pub fn from_declarations(reference: PackageRef, declarations: BTreeMap<String, Json>) -> Result<Self> {
        let templates = declarations
            .into_iter()
            .map(|(name, tree)| -> Result<(String, Arc<Template>)> {
                let template = Template::from_canonical(name.clone(), &tree)?;
                Ok((name, Arc::new(template)))
            })
            .collect::<Result<_>>()?;
        Ok(Package {
            reference: Some(reference),
            templates,
        })
    }

    /// `None` for the local package.
    pub fn reference(&self) -> Option<&PackageRef> {
        self.reference.as_ref()
    }

    /// Look up a template.
    pub fn template(&self, name: &str) -> Option<&Arc<Template>> {
        self.templates.get(name)
    }

    /// Template names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }
}

impl TypeResolver for Arc<Package> {
    fn resolve(&self, name: &str) -> Option<Resolved> {
        self.templates.get(name).map(|template| Resolved {
            template: Arc::clone(template),
            package: Arc::clone(self),
        })
    }
}

/// A template together with the package that declares it
#[derive(Debug, Clone)]
pub struct Resolved {
    /// The template
    pub template: Arc<Template>,
    /// Its declaring package, used to resolve names inside the declaration
    pub package: Arc<Package>,
}

impl Resolved {
    /// Bind arguments, substitute and decode the declaration.
    pub fn instantiate(&self, arguments: BTreeMap<String, Json>) -> Result<SchemaType> {
        let (effective, explicit) = self.template.bind(arguments)?;
        let tree = self.template.expand(&effective)?;
        let mut expanded = SchemaType::from_canonical_in(&tree, &self.package).map_err(|e| {
            Error::Template(format!("expanding '{}': {}", self.template.name, e))
        })?;
        expanded.freeze();
        Ok(SchemaType::Template(TemplateInstance {
            template: TemplateId {
                name: self.template.name.clone(),
                package: self.package.reference().cloned(),
            },
            arguments: explicit,
            expanded: Box::new(expanded),
        }))
    }
}

/// One entry of a canonical `imports` list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Import {
    /// `"<repository>@<revision>"`
    pub repo: String,
    /// Imported template names
    pub types: Vec<ImportedType>,
}

/// One imported template, optionally renamed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedType {
    /// Name in the source package
    pub name: String,
    /// Local name, if different
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// Names visible while decoding one canonical tree
pub struct Scope {
    local: Arc<Package>,
    imported: BTreeMap<String, Resolved>,
}

impl TypeResolver for Scope {
    fn resolve(&self, name: &str) -> Option<Resolved> {
        self.imported
            .get(name)
            .cloned()
            .or_else(|| self.local.resolve(name))
    }
}

/// Session-owned registry of local and external template packages
pub struct PackageRegistry {
    local: RwLock<Arc<Package>>,
    externals: Mutex<HashMap<PackageRef, Arc<Package>>>,
    source: Option<Arc<dyn PackageSource>>,
}

impl Default for PackageRegistry {
    fn default() -> Self {
        PackageRegistry::new()
    }
}

impl PackageRegistry {
    /// Registry without an external source; imports fail.
    pub fn new() -> Self {
        PackageRegistry {
            local: RwLock::new(Arc::new(Package::local())),
            externals: Mutex::new(HashMap::new()),
            source: None,
        }
    }

    /// Registry that fetches imports from `source`.
    pub fn with_source(source: Arc<dyn PackageSource>) -> Self {
        PackageRegistry {
            source: Some(source),
            ..PackageRegistry::new()
        }
    }

    /// Add a template to the local package, replacing any of the same name.
    pub fn register(&self, template: Template) {
        let mut local = self.local.write();
        let mut next = (**local).clone();
        next.templates.insert(template.name.clone(), Arc::new(template));
        *local = Arc::new(next);
    }

    /// Instantiate a local template.
    pub fn instantiate(&self, name: &str, arguments: BTreeMap<String, Json>) -> Result<SchemaType> {
        let local = self.local.read().clone();
        let resolved = local
            .resolve(name)
            .ok_or_else(|| Error::not_found("template", name))?;
        resolved.instantiate(arguments)
    }

    /// Resolve an external package, fetching it on first use.
    pub fn resolve(&self, package: &PackageRef) -> Result<Arc<Package>> {
        let mut externals = self.externals.lock();
        if let Some(cached) = externals.get(package) {
            return Ok(Arc::clone(cached));
        }
        let source = self.source.as_ref().ok_or_else(|| {
            Error::InvalidState(format!("no package source configured to fetch {}", package))
        })?;
        let declarations = source.fetch(package)?;
        debug!(
            target: "portex::schema",
            package = %package,
            templates = declarations.len(),
            "Fetched external package"
        );
        let fetched = Arc::new(Package::from_declarations(package.clone(), declarations)?);
        externals.insert(package.clone(), Arc::clone(&fetched));
        Ok(fetched)
    }

    /// Number of external packages cached so far.
    pub fn cached_packages(&self) -> usize {
        self.externals.lock().len()
    }

    /// Build the scope described by an `imports` list.
    pub fn scope(&self, imports: &[Import]) -> Result<Scope> {
        let mut imported = BTreeMap::new();
        for import in imports {
            let package = self.resolve(&PackageRef::parse(&import.repo)?)?;
            for ty in &import.types {
                let resolved = package.resolve(&ty.name).ok_or_else(|| {
                    Error::Template(format!("{} has no template '{}'", import.repo, ty.name))
                })?;
                let local_name = ty.alias.clone().unwrap_or_else(|| ty.name.clone());
                imported.insert(local_name, resolved);
            }
        }
        Ok(Scope {
            local: self.local.read().clone(),
            imported,
        })
    }

    /// Decode a canonical tree, honoring its top-level `imports` list.
    pub fn load_canonical(&self, tree: &Json) -> Result<SchemaType> {
        let mut tree = tree.clone();
        let imports: Vec<Import> = match tree.as_object_mut().and_then(|m| m.remove("imports")) {
            Some(imports) => serde_json::from_value(imports)?,
            None => Vec::new(),
        };
        let scope = self.scope(&imports)?;
        SchemaType::from_canonical_in(&tree, &scope)
    }

    /// Encode `ty` with an `imports` list covering its external templates.
    pub fn to_canonical_with_imports(ty: &SchemaType) -> Json {
        let mut used: BTreeMap<PackageRef, BTreeSet<String>> = BTreeMap::new();
        collect_imports(ty, &mut used);
        let mut tree = ty.to_canonical();
        if !used.is_empty() {
            let imports: Vec<Json> = used
                .into_iter()
                .map(|(package, names)| {
                    serde_json::json!({
                        "repo": package.to_string(),
                        "types": names.into_iter().map(|name| serde_json::json!({"name": name})).collect::<Vec<_>>(),
                    })
                })
                .collect();
            if let Some(map) = tree.as_object_mut() {
                map.insert("imports".into(), Json::Array(imports));
            }
        }
        tree
    }
}

fn collect_imports(ty: &SchemaType, used: &mut BTreeMap<PackageRef, BTreeSet<String>>) {
    match ty {
        SchemaType::Template(t) => {
            if let Some(package) = &t.template.package {
                used.entry(package.clone()).or_default().insert(t.template.name.clone());
            }
        }
        SchemaType::Record(r) => r.fields.iter().for_each(|f| collect_imports(&f.ty, used)),
        SchemaType::Array(a) => collect_imports(&a.items, used),
        _ => {}
    }
}
