//! # Converge
//!
//! A declarative host-convergence engine.
//!
//! Given an ordered plan of idempotent resource assertions and a read-only
//! fact map, the engine decides per assertion whether action is needed,
//! applies it if so, and records whether a change occurred. Handlers
//! (named follow-up actions) fire once, deduplicated, after the sweep when
//! a notifying assertion changed host state.
//!
//! ## Core Concepts
//!
//! - **Resource**: something on the host with state that can be managed
//! - **Assertion**: a resource plus its guard and notify relations
//! - **Guard**: a boolean predicate over facts and prior change records
//! - **Plan**: the ordered assertion list plus named handlers
//! - **ChangeRecord**: per-assertion changed flag, consumed by handlers
//!
//! ## Example
//!
//! ```ignore
//! use converge::{
//!     Assertion, ApplyContext, ApplyOutcome, Facts, Guard, Plan,
//!     Resource, ResourceState, RunOptions, run_simple,
//! };
//!
//! #[derive(Debug)]
//! struct MarkerFile { path: String }
//!
//! impl Resource for MarkerFile {
//!     fn id(&self) -> String { self.path.clone() }
//!     fn description(&self) -> String { format!("Marker at {}", self.path) }
//!     fn resource_type(&self) -> &'static str { "file" }
//!
//!     fn current_state(&self) -> anyhow::Result<ResourceState> {
//!         if std::path::Path::new(&self.path).exists() {
//!             Ok(ResourceState::Present { details: None })
//!         } else {
//!             Ok(ResourceState::Absent)
//!         }
//!     }
//!
//!     fn desired_state(&self) -> ResourceState {
//!         ResourceState::Present { details: None }
//!     }
//!
//!     fn apply(&self, _ctx: &mut ApplyContext) -> anyhow::Result<ApplyOutcome> {
//!         if std::path::Path::new(&self.path).exists() {
//!             return Ok(ApplyOutcome::Unchanged);
//!         }
//!         std::fs::write(&self.path, b"")?;
//!         Ok(ApplyOutcome::Created)
//!     }
//! }
//!
//! let mut plan = Plan::new();
//! plan.push(Assertion::new(Box::new(MarkerFile {
//!     path: "/tmp/marker".into(),
//! })));
//!
//! let report = run_simple(&plan, &Facts::new(), &RunOptions::default())?;
//! assert!(report.records[0].changed);
//! ```
//!
//! Applying the same plan twice yields `changed = false` on the second run
//! with identical host state; that idempotence contract is what the whole
//! model exists to guarantee.

pub mod assertion;
pub mod diff;
pub mod error;
pub mod executor;
pub mod facts;
pub mod guard;
pub mod resource;
pub mod types;

// Re-export main types at crate root
pub use assertion::{Assertion, Handler, Plan};
pub use diff::{AssertionDiff, DiffSummary};
pub use error::{ConvergeError, GuardError};
pub use executor::{HostPlan, HostReport, merge_host_summaries, run, run_hosts, run_simple};
pub use facts::{FactValue, Facts};
pub use guard::Guard;
pub use resource::{
    ApplyContext, BoxedResource, NoProgress, ProgressCallback, Resource, ResourceState,
};
pub use types::{ApplyOutcome, ChangeRecord, RunOptions, RunReport, RunSummary};
