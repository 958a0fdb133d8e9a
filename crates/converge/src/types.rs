//! Core types for the convergence engine

use serde::{Deserialize, Serialize};

/// Outcome of applying a single assertion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyOutcome {
    /// Host already matched the desired state
    Unchanged,
    /// Resource was created
    Created,
    /// Resource was modified
    Modified,
    /// Resource was removed
    Removed,
    /// Apply was skipped by the resource itself
    Skipped { reason: String },
}

impl ApplyOutcome {
    /// Check if the outcome represents a change to host state
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Created | Self::Modified | Self::Removed)
    }
}

/// Record of one evaluated assertion
///
/// Produced in declaration order for every assertion that was not skipped
/// by its guard. `changed` drives handler notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Identity of the assertion (its resource id)
    pub assertion: String,
    /// Resource type category
    pub resource_type: String,
    /// Whether host state was (or, in dry-run, would be) mutated
    pub changed: bool,
    /// Optional human-readable detail
    pub detail: Option<String>,
}

/// Summary of a convergence run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub created: usize,
    pub modified: usize,
    pub removed: usize,
    pub unchanged: usize,
    /// Assertions skipped by guard, empty target, or the resource itself
    pub skipped: usize,
    /// Handlers that fired after the sweep
    pub handlers: usize,
}

impl RunSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.modified + self.removed
    }

    /// Total number of assertions evaluated (skips included)
    pub fn total(&self) -> usize {
        self.created + self.modified + self.removed + self.unchanged + self.skipped
    }

    /// Add an outcome to the summary
    pub fn add_outcome(&mut self, outcome: &ApplyOutcome) {
        match outcome {
            ApplyOutcome::Unchanged => self.unchanged += 1,
            ApplyOutcome::Created => self.created += 1,
            ApplyOutcome::Modified => self.modified += 1,
            ApplyOutcome::Removed => self.removed += 1,
            ApplyOutcome::Skipped { .. } => self.skipped += 1,
        }
    }
}

/// Report of a completed convergence run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    /// Records for every non-skipped assertion, in declaration order
    pub records: Vec<ChangeRecord>,
    /// Aggregate counts
    pub summary: RunSummary,
    /// Handler names that fired (or would fire, in dry-run), deduplicated
    pub handlers_fired: Vec<String>,
    /// Whether this was a dry run
    pub dry_run: bool,
}

impl RunReport {
    /// Check whether any assertion reported a change
    pub fn changed(&self) -> bool {
        self.records.iter().any(|r| r.changed)
    }

    /// Look up the record for an assertion id
    pub fn record(&self, assertion: &str) -> Option<&ChangeRecord> {
        self.records.iter().find(|r| r.assertion == assertion)
    }
}

/// Options for a convergence run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Detect only, mutate nothing
    pub dry_run: bool,
    /// Verbose output from resources
    pub verbose: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            verbose: false,
        }
    }
}
