//! Re-scoping propagation: turning tenant-unaware root collaborators into
//! short-lived tenant-bound clones.
//!
//! A root collaborator is built once per process and acts as a prototype.
//! `rescope(tenant)` returns a shallow duplicate sharing the root's heavy
//! resources (cache, transport) by reference, with every sub-collaborator
//! re-scoped and every tenant-dependent filter rebuilt for `tenant`. The
//! receiver is never mutated.
//!
//! Collaborators held behind a trait object cannot be re-scoped through the
//! [`Rescope`] trait directly. They are wrapped in a [`Dependency`] that
//! either declares a re-scoping factory or is opaque. [`Dependency::require`]
//! turns a declared dependency into a [`Scoped`] handle and fails for an
//! opaque one; constructors call it so the check runs once at wiring time
//! rather than per request. [`CompositionRoot`] verifies the whole graph at
//! startup.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use tenantry_core::{CompositionError, TenancyResult, TenantIdentity};
use tracing::debug;

/// Capability of producing a tenant-bound clone of oneself.
pub trait Rescope: Send + Sync {
    /// A clone bound to `tenant`. Must not mutate `self`.
    fn rescope(&self, tenant: &TenantIdentity) -> Self
    where
        Self: Sized;

    /// The tenant this instance answers for, `None` for a root.
    fn bound_tenant(&self) -> Option<&TenantIdentity>;
}

type Factory<T> = Arc<dyn Fn(&TenantIdentity) -> Arc<T> + Send + Sync>;

/// A collaborator reference as handed to a constructor.
pub struct Dependency<T: ?Sized> {
    current: Arc<T>,
    factory: Option<Factory<T>>,
}

impl<T: ?Sized> Dependency<T> {
    /// A dependency that can be re-scoped with `factory`.
    ///
    /// The factory should close over the prototype root, never over a
    /// previously re-scoped clone.
    pub fn declared<F>(current: Arc<T>, factory: F) -> Self
    where
        F: Fn(&TenantIdentity) -> Arc<T> + Send + Sync + 'static,
    {
        Self {
            current,
            factory: Some(Arc::new(factory)),
        }
    }

    /// A dependency with no re-scoping capability.
    pub fn opaque(current: Arc<T>) -> Self {
        Self {
            current,
            factory: None,
        }
    }

    pub fn supports_rescope(&self) -> bool {
        self.factory.is_some()
    }

    pub fn get(&self) -> &Arc<T> {
        &self.current
    }

    /// Capability assertion. Fails with [`CompositionError::CapabilityMissing`]
    /// naming `collaborator` when the dependency is opaque.
    pub fn require(self, collaborator: &str) -> TenancyResult<Scoped<T>> {
        match self.factory {
            Some(factory) => Ok(Scoped {
                current: self.current,
                factory,
            }),
            None => Err(CompositionError::CapabilityMissing {
                collaborator: collaborator.to_string(),
            }
            .into()),
        }
    }
}

impl<T: Rescope + 'static> Dependency<T> {
    /// Declared dependency for a concrete [`Rescope`] type.
    pub fn of(value: T) -> Self {
        let root = Arc::new(value);
        let prototype = Arc::clone(&root);
        Self::declared(root, move |tenant| Arc::new(prototype.rescope(tenant)))
    }
}

impl<T: ?Sized> fmt::Debug for Dependency<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("supports_rescope", &self.supports_rescope())
            .finish()
    }
}

/// A collaborator handle known to support re-scoping.
pub struct Scoped<T: ?Sized> {
    current: Arc<T>,
    factory: Factory<T>,
}

impl<T: ?Sized> Scoped<T> {
    /// Handle bound to `tenant`, built from the prototype root.
    pub fn rescope(&self, tenant: &TenantIdentity) -> Self {
        Self {
            current: (self.factory)(tenant),
            factory: Arc::clone(&self.factory),
        }
    }

    pub fn arc(&self) -> Arc<T> {
        Arc::clone(&self.current)
    }
}

impl<T: ?Sized> Clone for Scoped<T> {
    fn clone(&self) -> Self {
        Self {
            current: Arc::clone(&self.current),
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<T: ?Sized> Deref for Scoped<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.current
    }
}

impl<T: ?Sized> fmt::Debug for Scoped<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scoped").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
struct Node {
    rescopable: bool,
    dependencies: Vec<String>,
}

/// Startup-time description of the collaborator graph.
#[derive(Debug, Clone, Default)]
pub struct CompositionRoot {
    nodes: BTreeMap<String, Node>,
    duplicates: Vec<String>,
}

impl CompositionRoot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a collaborator, whether it can be re-scoped, and what it holds.
    pub fn collaborator(mut self, name: &str, rescopable: bool, dependencies: &[&str]) -> Self {
        let node = Node {
            rescopable,
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
        };
        if self.nodes.insert(name.to_string(), node).is_some() {
            self.duplicates.push(name.to_string());
        }
        self
    }

    /// Declare a collaborator held through a [`Dependency`].
    pub fn dependency<T: ?Sized>(self, name: &str, dep: &Dependency<T>, dependencies: &[&str]) -> Self {
        self.collaborator(name, dep.supports_rescope(), dependencies)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Check the graph: no duplicates, no unknown edges, no cycles, and no
    /// re-scopable collaborator holding a non-re-scopable one.
    pub fn verify(&self) -> TenancyResult<()> {
        if let Some(name) = self.duplicates.first() {
            return Err(CompositionError::DuplicateCollaborator {
                collaborator: name.clone(),
            }
            .into());
        }

        for (name, node) in &self.nodes {
            for dep in &node.dependencies {
                let Some(target) = self.nodes.get(dep) else {
                    return Err(CompositionError::UnknownDependency {
                        collaborator: name.clone(),
                        dependency: dep.clone(),
                    }
                    .into());
                };
                if node.rescopable && !target.rescopable {
                    return Err(CompositionError::CapabilityMissing {
                        collaborator: dep.clone(),
                    }
                    .into());
                }
            }
        }

        let mut done = BTreeSet::new();
        for name in self.nodes.keys() {
            let mut stack = Vec::new();
            self.visit(name, &mut stack, &mut done, &mut Vec::new())?;
        }
        debug!(collaborators = self.nodes.len(), "Composition graph verified");
        Ok(())
    }

    /// Depth-first post-order from `root`: every collaborator appears after
    /// everything it depends on.
    pub fn rescope_order(&self, root: &str) -> TenancyResult<Vec<String>> {
        if !self.nodes.contains_key(root) {
            return Err(CompositionError::UnknownDependency {
                collaborator: root.to_string(),
                dependency: root.to_string(),
            }
            .into());
        }
        let mut order = Vec::new();
        self.visit(root, &mut Vec::new(), &mut BTreeSet::new(), &mut order)?;
        Ok(order)
    }

    fn visit(
        &self,
        name: &str,
        stack: &mut Vec<String>,
        done: &mut BTreeSet<String>,
        order: &mut Vec<String>,
    ) -> TenancyResult<()> {
        if done.contains(name) {
            return Ok(());
        }
        if let Some(pos) = stack.iter().position(|n| n == name) {
            let mut path = stack[pos..].to_vec();
            path.push(name.to_string());
            return Err(CompositionError::Cycle { path }.into());
        }
        let Some(node) = self.nodes.get(name) else {
            return Ok(());
        };

        stack.push(name.to_string());
        for dep in &node.dependencies {
            self.visit(dep, stack, done, order)?;
        }
        stack.pop();
        done.insert(name.to_string());
        order.push(name.to_string());
        Ok(())
    }
}
