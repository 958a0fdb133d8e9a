//! Resource trait for declarative state management
//!
//! A Resource represents something on the host that can be in a certain
//! state, and can be changed to reach a desired state.

use crate::types::{ApplyOutcome, ChangeRecord};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current or desired state of a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceState {
    /// Resource exists/is configured
    Present { details: Option<String> },
    /// Resource does not exist/is not configured
    Absent,
    /// Resource exists but differs from desired
    Modified { from: String, to: String },
    /// State cannot be determined
    Unknown,
}

impl ResourceState {
    /// Check if state represents presence
    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present { .. })
    }

    /// Check if state represents absence
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }
}

/// Context passed to resource apply operations
pub struct ApplyContext {
    /// Whether this is a dry run (the engine never calls apply in dry-run,
    /// but handler-style resources may want to know)
    pub dry_run: bool,
    /// Whether to output verbose information
    pub verbose: bool,
}

impl ApplyContext {
    /// Create a new apply context
    pub fn new(dry_run: bool, verbose: bool) -> Self {
        Self { dry_run, verbose }
    }
}

/// Core trait for declarative resources
///
/// Every assertion variant implements this trait, which provides:
/// - Identity (id, description, type)
/// - State detection (current vs desired)
/// - State convergence (apply)
///
/// `apply` must be idempotent: called against a host that already matches
/// the desired state it returns [`ApplyOutcome::Unchanged`] and mutates
/// nothing. That contract is what makes re-running a plan the recovery
/// path after a failure.
pub trait Resource: Send + Sync + fmt::Debug {
    /// Bare target identity for this resource
    ///
    /// The name or path the assertion is about, with no type prefix.
    /// Examples:
    /// - "mongodb" for a pip package
    /// - "/data/db" for a directory
    /// - "mongod" for a service
    ///
    /// An empty id marks the assertion as having no target; the engine
    /// treats that as an implicit skip.
    fn id(&self) -> String;

    /// Human-readable description of what this resource ensures
    fn description(&self) -> String;

    /// Resource type category (e.g., "pip_package", "user", "directory")
    fn resource_type(&self) -> &'static str;

    /// Detect the current state of this resource on the host
    fn current_state(&self) -> Result<ResourceState>;

    /// Get the desired state for this resource
    fn desired_state(&self) -> ResourceState;

    /// Check if the resource needs changes to reach desired state
    ///
    /// Default implementation compares current and desired states.
    fn needs_apply(&self) -> Result<bool> {
        let current = self.current_state()?;
        let desired = self.desired_state();
        Ok(current != desired)
    }

    /// Apply changes to reach the desired state
    ///
    /// Must return [`ApplyOutcome::Unchanged`] without mutating when the
    /// host already matches.
    fn apply(&self, ctx: &mut ApplyContext) -> Result<ApplyOutcome>;
}

/// A boxed resource for type-erased storage
pub type BoxedResource = Box<dyn Resource>;

/// Progress callback for convergence runs
///
/// Implement this trait to receive progress updates during execution.
pub trait ProgressCallback: Send {
    /// Called when the assertion sweep starts
    fn on_run_start(&mut self, count: usize);

    /// Called before an assertion is evaluated
    fn on_assertion_start(&mut self, id: &str, description: &str);

    /// Called when an assertion produced a record
    fn on_assertion_complete(&mut self, record: &ChangeRecord);

    /// Called when an assertion was skipped (guard false or empty target)
    fn on_assertion_skipped(&mut self, id: &str, reason: &str);

    /// Called when a handler fires
    fn on_handler(&mut self, name: &str);

    /// Called when the run completes
    fn on_run_complete(&mut self);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_run_start(&mut self, _count: usize) {}
    fn on_assertion_start(&mut self, _id: &str, _description: &str) {}
    fn on_assertion_complete(&mut self, _record: &ChangeRecord) {}
    fn on_assertion_skipped(&mut self, _id: &str, _reason: &str) {}
    fn on_handler(&mut self, _name: &str) {}
    fn on_run_complete(&mut self) {}
}
