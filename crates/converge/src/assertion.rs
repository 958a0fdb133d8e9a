//! Assertions and plans - the ordered desired-state description

use crate::guard::Guard;
use crate::resource::{BoxedResource, Resource};

/// A desired-state statement about one resource
///
/// Wraps the resource with the conditions of its evaluation: a guard that
/// may skip it, and the handlers to notify when applying it changed host
/// state.
pub struct Assertion {
    /// The resource to converge
    pub resource: BoxedResource,
    /// Guard gating evaluation; false means skip (no record, no error)
    pub guard: Guard,
    /// Handler names to notify when this assertion reports a change
    pub notify: Vec<String>,
}

impl Assertion {
    /// Create an unguarded assertion
    pub fn new(resource: BoxedResource) -> Self {
        Self {
            resource,
            guard: Guard::Always,
            notify: Vec::new(),
        }
    }

    /// Attach a guard
    pub fn when(mut self, guard: Guard) -> Self {
        self.guard = guard;
        self
    }

    /// Add a handler to notify on change
    pub fn notifies(mut self, handler: impl Into<String>) -> Self {
        self.notify.push(handler.into());
        self
    }
}

impl std::fmt::Debug for Assertion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assertion")
            .field("id", &self.resource.id())
            .field("type", &self.resource.resource_type())
            .field("guard", &self.guard)
            .field("notify", &self.notify)
            .finish()
    }
}

/// A named follow-up action, triggered only by changed assertions
pub struct Handler {
    pub name: String,
    pub resource: BoxedResource,
}

impl Handler {
    pub fn new(name: impl Into<String>, resource: BoxedResource) -> Self {
        Self {
            name: name.into(),
            resource,
        }
    }
}

/// An ordered convergence plan for one host
///
/// Declaration order is execution order: assertions run strictly in
/// sequence, handlers fire afterwards in their own declaration order.
#[derive(Default)]
pub struct Plan {
    pub assertions: Vec<Assertion>,
    pub handlers: Vec<Handler>,
}

impl Plan {
    /// Create a new empty plan
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an assertion
    pub fn push(&mut self, assertion: Assertion) {
        self.assertions.push(assertion);
    }

    /// Declare a handler
    pub fn add_handler(&mut self, handler: Handler) {
        self.handlers.push(handler);
    }

    /// Look up a handler by name
    pub fn handler(&self, name: &str) -> Option<&Handler> {
        self.handlers.iter().find(|h| h.name == name)
    }

    /// Names of handlers an assertion notifies but the plan does not declare
    pub fn undeclared_handlers(&self) -> Vec<(String, String)> {
        let mut missing = Vec::new();
        for a in &self.assertions {
            for n in &a.notify {
                if self.handler(n).is_none() {
                    missing.push((a.resource.id(), n.clone()));
                }
            }
        }
        missing
    }

    /// Total number of assertions in the plan
    pub fn len(&self) -> usize {
        self.assertions.len()
    }

    /// Check if plan has no assertions
    pub fn is_empty(&self) -> bool {
        self.assertions.is_empty()
    }

    /// Filter the plan to assertions matching a predicate
    ///
    /// Handlers are kept: a filtered apply still notifies them.
    pub fn filter<F>(self, predicate: F) -> Self
    where
        F: Fn(&dyn Resource) -> bool,
    {
        Self {
            assertions: self
                .assertions
                .into_iter()
                .filter(|a| predicate(a.resource.as_ref()))
                .collect(),
            handlers: self.handlers,
        }
    }

    /// Filter plan to assertions matching a target pattern
    ///
    /// Target format: "type" or "type.name"
    pub fn filter_by_target(self, target: Option<&str>) -> Self {
        match target {
            None => self,
            Some(t) => {
                let (resource_type, name) = parse_target(t);
                self.filter(|r| matches_filter(r, resource_type.as_deref(), name.as_deref()))
            }
        }
    }
}

/// Parse a target string like "type.name" into (type, name)
fn parse_target(target: &str) -> (Option<String>, Option<String>) {
    let parts: Vec<&str> = target.split('.').collect();
    match parts.len() {
        1 => (Some(parts[0].to_string()), None),
        2 => (Some(parts[0].to_string()), Some(parts[1].to_string())),
        _ => (None, Some(target.to_string())),
    }
}

/// Check if a resource matches the filter criteria
fn matches_filter(
    resource: &dyn Resource,
    resource_type: Option<&str>,
    name: Option<&str>,
) -> bool {
    if let Some(rt) = resource_type {
        // Allow common aliases
        let matches_type = match rt {
            "packages" => resource.resource_type().ends_with("package"),
            "files" => resource.resource_type() == "file",
            "users" => resource.resource_type() == "user",
            "dirs" | "directories" => resource.resource_type() == "directory",
            _ => resource.resource_type() == rt || resource.resource_type().starts_with(rt),
        };
        if !matches_type {
            return false;
        }
    }

    if let Some(n) = name
        && !resource.id().contains(n)
    {
        return false;
    }

    true
}
