//! Binding declarations and the registry that owns them.
//!
//! A binding names a remote location that should be mirrored locally. Its
//! path is either fixed or computed from the local state snapshot, which is
//! what lets the mirror follow the application around: when a computed path
//! changes, the subscription follows it.

use crate::{error::Result, BindingName, Error, QueryDescriptor, STATUS_BINDING};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Path function evaluated against the local state snapshot.
pub type PathFn<S> = Arc<dyn Fn(&S) -> Option<String> + Send + Sync>;

/// How a binding's path is obtained.
pub enum PathSpec<S> {
    /// Always the same path
    Static(String),
    /// Computed from local state; `None` means "currently unsubscribed"
    Computed(PathFn<S>),
}

impl<S> PathSpec<S> {
    /// Create a computed path spec from a closure.
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&S) -> Option<String> + Send + Sync + 'static,
    {
        PathSpec::Computed(Arc::new(f))
    }

    /// Evaluate against a state snapshot.
    pub fn evaluate(&self, state: &S) -> Option<String> {
        match self {
            PathSpec::Static(path) => Some(path.clone()),
            PathSpec::Computed(f) => f(state),
        }
    }
}

impl<S> Clone for PathSpec<S> {
    fn clone(&self) -> Self {
        match self {
            PathSpec::Static(path) => PathSpec::Static(path.clone()),
            PathSpec::Computed(f) => PathSpec::Computed(Arc::clone(f)),
        }
    }
}

impl<S> fmt::Debug for PathSpec<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSpec::Static(path) => f.debug_tuple("Static").field(path).finish(),
            PathSpec::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

impl<S> From<&str> for PathSpec<S> {
    fn from(path: &str) -> Self {
        PathSpec::Static(path.to_string())
    }
}

impl<S> From<String> for PathSpec<S> {
    fn from(path: String) -> Self {
        PathSpec::Static(path)
    }
}

/// Shape of the mirrored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CollectionType {
    /// Whole value, replaced on every change
    #[default]
    Scalar,
    /// Whole object, replaced on every change
    Object,
    /// Ordered children, reconciled incrementally by sibling key
    Array,
}

/// A named declaration of a mirrored location.
pub struct Binding<S> {
    /// Binding name, also the key of its store slot
    pub name: BindingName,
    /// Where the data lives
    pub path: PathSpec<S>,
    /// How the data is mirrored
    pub collection_type: CollectionType,
    /// Optional ordering/filtering
    pub query: Option<QueryDescriptor>,
    /// Child fields holding paths to other locations, mirrored in place
    pub populate: Vec<String>,
}

impl<S> Binding<S> {
    /// Create a scalar binding.
    pub fn new(name: impl Into<BindingName>, path: impl Into<PathSpec<S>>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            collection_type: CollectionType::Scalar,
            query: None,
            populate: Vec::new(),
        }
    }

    /// Create an array binding.
    pub fn array(name: impl Into<BindingName>, path: impl Into<PathSpec<S>>) -> Self {
        Self::new(name, path).with_type(CollectionType::Array)
    }

    /// Create an object binding.
    pub fn object(name: impl Into<BindingName>, path: impl Into<PathSpec<S>>) -> Self {
        Self::new(name, path).with_type(CollectionType::Object)
    }

    pub fn with_type(mut self, collection_type: CollectionType) -> Self {
        self.collection_type = collection_type;
        self
    }

    pub fn with_query(mut self, query: QueryDescriptor) -> Self {
        self.query = Some(query);
        self
    }

    pub fn populate(mut self, field: impl Into<String>) -> Self {
        self.populate.push(field.into());
        self
    }
}

impl<S> Clone for Binding<S> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            path: self.path.clone(),
            collection_type: self.collection_type,
            query: self.query.clone(),
            populate: self.populate.clone(),
        }
    }
}

impl<S> fmt::Debug for Binding<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("collection_type", &self.collection_type)
            .field("query", &self.query)
            .field("populate", &self.populate)
            .finish()
    }
}

/// A partial binding descriptor. Unset fields keep their current value.
pub struct BindingUpdate<S> {
    pub name: BindingName,
    pub path: Option<PathSpec<S>>,
    pub collection_type: Option<CollectionType>,
    /// `Some(None)` clears the query
    pub query: Option<Option<QueryDescriptor>>,
    pub populate: Option<Vec<String>>,
}

impl<S> BindingUpdate<S> {
    pub fn new(name: impl Into<BindingName>) -> Self {
        Self {
            name: name.into(),
            path: None,
            collection_type: None,
            query: None,
            populate: None,
        }
    }

    pub fn path(mut self, path: impl Into<PathSpec<S>>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn collection_type(mut self, collection_type: CollectionType) -> Self {
        self.collection_type = Some(collection_type);
        self
    }

    pub fn query(mut self, query: Option<QueryDescriptor>) -> Self {
        self.query = Some(query);
        self
    }

    pub fn populate(mut self, fields: Vec<String>) -> Self {
        self.populate = Some(fields);
        self
    }
}

/// Declared bindings, in declaration order.
pub struct BindingRegistry<S> {
    bindings: Vec<Binding<S>>,
}

impl<S> Default for BindingRegistry<S> {
    fn default() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }
}

impl<S> BindingRegistry<S> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding, builder style.
    pub fn with_binding(mut self, binding: Binding<S>) -> Result<Self> {
        self.add(binding)?;
        Ok(self)
    }

    /// Add a binding. Names must be unique and not reserved.
    pub fn add(&mut self, binding: Binding<S>) -> Result<()> {
        validate_name(&binding.name)?;
        if let PathSpec::Static(path) = &binding.path {
            normalize_path(path)?;
        }
        if self.contains(&binding.name) {
            return Err(Error::BindingAlreadyExists(binding.name));
        }
        self.bindings.push(binding);
        Ok(())
    }

    /// Remove a binding by name, returning it.
    pub fn remove(&mut self, name: &str) -> Result<Binding<S>> {
        let index = self
            .bindings
            .iter()
            .position(|b| b.name == name)
            .ok_or_else(|| Error::BindingNotFound(name.to_string()))?;
        Ok(self.bindings.remove(index))
    }

    /// Merge a partial descriptor into an existing binding.
    pub fn update(&mut self, update: BindingUpdate<S>) -> Result<()> {
        if let Some(PathSpec::Static(path)) = &update.path {
            normalize_path(path)?;
        }
        let binding = self
            .bindings
            .iter_mut()
            .find(|b| b.name == update.name)
            .ok_or_else(|| Error::BindingNotFound(update.name.clone()))?;

        if let Some(path) = update.path {
            binding.path = path;
        }
        if let Some(collection_type) = update.collection_type {
            binding.collection_type = collection_type;
        }
        if let Some(query) = update.query {
            binding.query = query;
        }
        if let Some(populate) = update.populate {
            binding.populate = populate;
        }
        Ok(())
    }

    /// Get a binding by name.
    pub fn get(&self, name: &str) -> Option<&Binding<S>> {
        self.bindings.iter().find(|b| b.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterate in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Binding<S>> {
        self.bindings.iter()
    }

    /// Binding names in declaration order.
    pub fn names(&self) -> Vec<BindingName> {
        self.bindings.iter().map(|b| b.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl<S> Clone for BindingRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            bindings: self.bindings.clone(),
        }
    }
}

impl<S> fmt::Debug for BindingRegistry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.bindings.iter()).finish()
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::EmptyBindingName);
    }
    if name == STATUS_BINDING {
        return Err(Error::ReservedBindingName(name.to_string()));
    }
    Ok(())
}

/// Normalize a slash-separated path.
///
/// Leading and trailing slashes are dropped. Empty segments and the
/// characters `.`, `#`, `$`, `[`, `]` are rejected.
pub fn normalize_path(path: &str) -> Result<String> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(String::new());
    }

    for segment in trimmed.split('/') {
        if segment.is_empty() {
            return Err(Error::InvalidPath {
                path: path.to_string(),
                reason: "empty segment".into(),
            });
        }
        if let Some(c) = segment.chars().find(|c| matches!(c, '.' | '#' | '$' | '[' | ']')) {
            return Err(Error::InvalidPath {
                path: path.to_string(),
                reason: format!("forbidden character '{}'", c),
            });
        }
    }

    Ok(trimmed.to_string())
}

/// Last segment of a normalized path, used as the key of a mirrored entry.
pub fn path_key(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
