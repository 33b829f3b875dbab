//! Binding resolution and subscription diffing.
//!
//! # Algorithm
//!
//! 1. Evaluate every binding's path against the current state snapshot
//! 2. Compare the whole resolved map with the previous one; equal maps stop here
//! 3. Split binding names into unsubscribe / subscribe / resubscribe sets
//!
//! Both steps are pure. Applying the plan (opening and closing remote
//! listeners) is the caller's job.

use crate::binding::{normalize_path, BindingRegistry, CollectionType};
use crate::{BindingName, Path, QueryDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One binding after resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedBinding {
    /// Concrete path, or `None` when the binding is currently unresolved
    pub path: Option<Path>,
    /// Normalized query (empty when the binding declares none)
    pub query_state: QueryDescriptor,
    pub collection_type: CollectionType,
    pub populate: Vec<String>,
}

impl ResolvedBinding {
    pub fn is_resolved(&self) -> bool {
        self.path.is_some()
    }

    /// Whether a live listener for `self` can serve `other` unchanged.
    fn same_target(&self, other: &ResolvedBinding) -> bool {
        self.path == other.path
            && self.query_state == other.query_state
            && self.collection_type == other.collection_type
            && self.populate == other.populate
    }
}

/// Resolved bindings by name. Compared structurally between passes.
pub type ResolvedOptions = BTreeMap<BindingName, ResolvedBinding>;

/// Resolve every binding in the registry against a state snapshot.
///
/// A computed path that yields an invalid path string is treated as
/// unresolved.
pub fn resolve<S>(registry: &BindingRegistry<S>, state: &S) -> ResolvedOptions {
    registry
        .iter()
        .map(|binding| {
            let path = binding
                .path
                .evaluate(state)
                .and_then(|raw| match normalize_path(&raw) {
                    Ok(path) => Some(path),
                    Err(err) => {
                        tracing::warn!(binding = %binding.name, error = %err, "Computed path rejected");
                        None
                    }
                });

            let resolved = ResolvedBinding {
                path,
                query_state: binding.query.clone().unwrap_or_default(),
                collection_type: binding.collection_type,
                populate: binding.populate.clone(),
            };
            (binding.name.clone(), resolved)
        })
        .collect()
}

/// Names of the resolved bindings in a map.
pub fn resolved_names(options: &ResolvedOptions) -> Vec<BindingName> {
    options
        .iter()
        .filter(|(_, resolved)| resolved.is_resolved())
        .map(|(name, _)| name.clone())
        .collect()
}

/// Minimal set of listener transitions between two resolver passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionPlan {
    /// Resolved before, unresolved or gone now
    pub unsubscribe: Vec<BindingName>,
    /// Unresolved or absent before, resolved now
    pub subscribe: Vec<BindingName>,
    /// Resolved on both sides with a different path or query
    pub resubscribe: Vec<BindingName>,
}

impl SubscriptionPlan {
    /// Diff two resolved maps.
    ///
    /// Structurally equal maps short-circuit to an empty plan before any
    /// per-binding comparison.
    pub fn diff(previous: &ResolvedOptions, next: &ResolvedOptions) -> Self {
        let mut plan = Self::default();
        if previous == next {
            return plan;
        }

        let was_resolved = |name: &str| previous.get(name).is_some_and(|r| r.is_resolved());

        for (name, before) in previous {
            if !before.is_resolved() {
                continue;
            }
            match next.get(name) {
                Some(after) if after.is_resolved() => {
                    if !before.same_target(after) {
                        plan.resubscribe.push(name.clone());
                    }
                }
                _ => plan.unsubscribe.push(name.clone()),
            }
        }

        for (name, after) in next {
            if after.is_resolved() && !was_resolved(name) {
                plan.subscribe.push(name.clone());
            }
        }

        plan
    }

    /// Check if the plan has nothing to do.
    pub fn is_empty(&self) -> bool {
        self.unsubscribe.is_empty() && self.subscribe.is_empty() && self.resubscribe.is_empty()
    }

    /// Total number of subscribe and unsubscribe actions.
    ///
    /// A resubscribe counts as two.
    pub fn action_count(&self) -> usize {
        self.unsubscribe.len() + self.subscribe.len() + 2 * self.resubscribe.len()
    }
}
