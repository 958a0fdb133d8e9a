//! Execution engine - converges a host against an ordered plan
//!
//! Assertions run strictly in declaration order, single-threaded per host.
//! The only cross-assertion state is the accumulating record list (visible
//! to `changed` guards) and the read-only fact map. Handlers fire once,
//! deduplicated, after the sweep. The first mutation failure aborts the
//! host (no rollback; re-run to recover).

use crate::assertion::Plan;
use crate::error::ConvergeError;
use crate::facts::Facts;
use crate::resource::{ApplyContext, NoProgress, ProgressCallback};
use crate::types::{ApplyOutcome, ChangeRecord, RunOptions, RunReport, RunSummary};
use rayon::prelude::*;

/// Run a plan against the local host
///
/// Returns the run report, or the first fatal error (guard evaluation,
/// mutation, or handler failure). Effects of assertions applied before the
/// failure persist.
pub fn run<P: ProgressCallback>(
    plan: &Plan,
    facts: &Facts,
    opts: &RunOptions,
    progress: &mut P,
) -> Result<RunReport, ConvergeError> {
    // Notify relations must resolve before anything mutates
    if let Some((assertion, handler)) = plan.undeclared_handlers().into_iter().next() {
        return Err(ConvergeError::UnknownHandler { assertion, handler });
    }

    let mut report = RunReport {
        dry_run: opts.dry_run,
        ..Default::default()
    };

    progress.on_run_start(plan.len());

    for assertion in &plan.assertions {
        let id = assertion.resource.id();

        // Empty target: defensive default for optional facts, not an error
        if id.trim().is_empty() {
            report.summary.skipped += 1;
            progress.on_assertion_skipped("(no target)", "empty target");
            continue;
        }

        let pass = assertion
            .guard
            .eval(facts, &report.records)
            .map_err(|source| ConvergeError::Guard {
                assertion: id.clone(),
                source,
            })?;
        if !pass {
            report.summary.skipped += 1;
            progress.on_assertion_skipped(&id, "guard false");
            continue;
        }

        progress.on_assertion_start(&id, &assertion.resource.description());

        let outcome = if opts.dry_run {
            detect_only(assertion.resource.as_ref(), &id)?
        } else {
            let mut ctx = ApplyContext::new(opts.dry_run, opts.verbose);
            assertion
                .resource
                .apply(&mut ctx)
                .map_err(|source| ConvergeError::Mutation {
                    assertion: id.clone(),
                    source,
                })?
        };

        report.summary.add_outcome(&outcome);
        let record = ChangeRecord {
            assertion: id,
            resource_type: assertion.resource.resource_type().to_string(),
            changed: outcome.is_change(),
            detail: outcome_detail(&outcome),
        };
        progress.on_assertion_complete(&record);

        if record.changed {
            for handler in &assertion.notify {
                if !report.handlers_fired.contains(handler) {
                    report.handlers_fired.push(handler.clone());
                }
            }
        }
        report.records.push(record);
    }

    // Order handler firing by declaration, not by notification
    let notified = std::mem::take(&mut report.handlers_fired);
    report.handlers_fired = plan
        .handlers
        .iter()
        .map(|h| h.name.clone())
        .filter(|n| notified.contains(n))
        .collect();

    let fired = report.handlers_fired.clone();
    for name in &fired {
        progress.on_handler(name);
        report.summary.handlers += 1;
        if opts.dry_run {
            continue;
        }
        // Verified upfront, handlers are always resolvable here
        if let Some(handler) = plan.handler(name) {
            let mut ctx = ApplyContext::new(opts.dry_run, opts.verbose);
            handler
                .resource
                .apply(&mut ctx)
                .map_err(|source| ConvergeError::Handler {
                    handler: name.clone(),
                    source,
                })?;
        }
    }

    progress.on_run_complete();
    Ok(report)
}

/// Run without progress reporting
pub fn run_simple(plan: &Plan, facts: &Facts, opts: &RunOptions) -> Result<RunReport, ConvergeError> {
    run(plan, facts, opts, &mut NoProgress)
}

/// Dry-run path: probe state, mutate nothing
fn detect_only(
    resource: &dyn crate::resource::Resource,
    id: &str,
) -> Result<ApplyOutcome, ConvergeError> {
    let needs = resource
        .needs_apply()
        .map_err(|source| ConvergeError::Mutation {
            assertion: id.to_string(),
            source,
        })?;
    if needs {
        let current = resource
            .current_state()
            .map_err(|source| ConvergeError::Mutation {
                assertion: id.to_string(),
                source,
            })?;
        Ok(if current.is_absent() {
            ApplyOutcome::Created
        } else if resource.desired_state().is_absent() {
            ApplyOutcome::Removed
        } else {
            ApplyOutcome::Modified
        })
    } else {
        Ok(ApplyOutcome::Unchanged)
    }
}

fn outcome_detail(outcome: &ApplyOutcome) -> Option<String> {
    match outcome {
        ApplyOutcome::Skipped { reason } => Some(reason.clone()),
        _ => None,
    }
}

/// A per-host plan for multi-host convergence
pub struct HostPlan {
    pub host: String,
    pub plan: Plan,
    pub facts: Facts,
}

/// Result of converging one host
pub struct HostReport {
    pub host: String,
    pub result: Result<RunReport, ConvergeError>,
}

/// Converge several hosts in parallel
///
/// Hosts are independent: each gets its own plan, fact map, and record
/// list, so there is no ordering guarantee (and no shared state) between
/// them. Within each host the sequence is strictly ordered as in [`run`].
pub fn run_hosts(host_plans: Vec<HostPlan>, opts: &RunOptions) -> Vec<HostReport> {
    host_plans
        .into_par_iter()
        .map(|hp| HostReport {
            result: run_simple(&hp.plan, &hp.facts, opts),
            host: hp.host,
        })
        .collect()
}

/// Aggregate per-host summaries (failed hosts contribute nothing)
pub fn merge_host_summaries(reports: &[HostReport]) -> RunSummary {
    let mut total = RunSummary::default();
    for report in reports {
        if let Ok(r) = &report.result {
            total.created += r.summary.created;
            total.modified += r.summary.modified;
            total.removed += r.summary.removed;
            total.unchanged += r.summary.unchanged;
            total.skipped += r.summary.skipped;
            total.handlers += r.summary.handlers;
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertion::{Assertion, Handler};
    use crate::guard::Guard;
    use crate::resource::{ApplyContext, Resource, ResourceState};
    use anyhow::Result;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory resource that flips a shared "present" flag
    #[derive(Debug)]
    struct FlagResource {
        name: String,
        present: &'static Mutex<bool>,
        fail: bool,
    }

    impl Resource for FlagResource {
        fn id(&self) -> String {
            self.name.clone()
        }

        fn description(&self) -> String {
            format!("Flag {}", self.name)
        }

        fn resource_type(&self) -> &'static str {
            "flag"
        }

        fn current_state(&self) -> Result<ResourceState> {
            Ok(if *self.present.lock().unwrap() {
                ResourceState::Present { details: None }
            } else {
                ResourceState::Absent
            })
        }

        fn desired_state(&self) -> ResourceState {
            ResourceState::Present { details: None }
        }

        fn apply(&self, _ctx: &mut ApplyContext) -> Result<ApplyOutcome> {
            if self.fail {
                anyhow::bail!("simulated OS failure");
            }
            let mut present = self.present.lock().unwrap();
            if *present {
                Ok(ApplyOutcome::Unchanged)
            } else {
                *present = true;
                Ok(ApplyOutcome::Created)
            }
        }
    }

    /// Counts how many times the handler fired
    #[derive(Debug)]
    struct CountingHandler {
        fired: &'static AtomicUsize,
    }

    impl Resource for CountingHandler {
        fn id(&self) -> String {
            "restart".into()
        }

        fn description(&self) -> String {
            "Restart service".into()
        }

        fn resource_type(&self) -> &'static str {
            "service"
        }

        fn current_state(&self) -> Result<ResourceState> {
            Ok(ResourceState::Present { details: None })
        }

        fn desired_state(&self) -> ResourceState {
            ResourceState::Present { details: None }
        }

        fn apply(&self, _ctx: &mut ApplyContext) -> Result<ApplyOutcome> {
            self.fired.fetch_add(1, Ordering::SeqCst);
            Ok(ApplyOutcome::Modified)
        }
    }

    fn leak_flag(present: bool) -> &'static Mutex<bool> {
        Box::leak(Box::new(Mutex::new(present)))
    }

    #[test]
    fn test_idempotence() {
        let flag = leak_flag(false);
        let facts = Facts::new();
        let opts = RunOptions::default();

        let make_plan = || {
            let mut plan = Plan::new();
            plan.push(Assertion::new(Box::new(FlagResource {
                name: "res".into(),
                present: flag,
                fail: false,
            })));
            plan
        };

        let first = run_simple(&make_plan(), &facts, &opts).unwrap();
        assert!(first.records[0].changed);

        let second = run_simple(&make_plan(), &facts, &opts).unwrap();
        assert!(!second.records[0].changed);
        assert!(*flag.lock().unwrap());
    }

    #[test]
    fn test_false_guard_produces_no_record_and_no_mutation() {
        let flag = leak_flag(false);
        let mut facts = Facts::new();
        facts.set("enabled", false);

        let mut plan = Plan::new();
        plan.push(
            Assertion::new(Box::new(FlagResource {
                name: "res".into(),
                present: flag,
                fail: false,
            }))
            .when(Guard::FactTruthy {
                fact: "enabled".into(),
            }),
        );

        let report = run_simple(&plan, &facts, &RunOptions::default()).unwrap();
        assert!(report.records.is_empty());
        assert_eq!(report.summary.skipped, 1);
        assert!(!*flag.lock().unwrap());
    }

    #[test]
    fn test_notify_deduplication() {
        let fired: &'static AtomicUsize = Box::leak(Box::new(AtomicUsize::new(0)));
        let mut plan = Plan::new();
        for i in 0..3 {
            plan.push(
                Assertion::new(Box::new(FlagResource {
                    name: format!("res{}", i),
                    present: leak_flag(false),
                    fail: false,
                }))
                .notifies("restart mongod"),
            );
        }
        plan.add_handler(Handler::new(
            "restart mongod",
            Box::new(CountingHandler { fired }),
        ));

        let report = run_simple(&plan, &Facts::new(), &RunOptions::default()).unwrap();
        assert_eq!(report.summary.total_changes(), 3);
        assert_eq!(report.handlers_fired, vec!["restart mongod".to_string()]);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_skipped_when_nothing_changed() {
        let fired: &'static AtomicUsize = Box::leak(Box::new(AtomicUsize::new(0)));
        let mut plan = Plan::new();
        plan.push(
            Assertion::new(Box::new(FlagResource {
                name: "res".into(),
                present: leak_flag(true),
                fail: false,
            }))
            .notifies("restart mongod"),
        );
        plan.add_handler(Handler::new(
            "restart mongod",
            Box::new(CountingHandler { fired }),
        ));

        let report = run_simple(&plan, &Facts::new(), &RunOptions::default()).unwrap();
        assert!(report.handlers_fired.is_empty());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_fail_fast_preserves_prior_effects() {
        let first = leak_flag(false);
        let third = leak_flag(false);

        let mut plan = Plan::new();
        plan.push(Assertion::new(Box::new(FlagResource {
            name: "first".into(),
            present: first,
            fail: false,
        })));
        plan.push(Assertion::new(Box::new(FlagResource {
            name: "second".into(),
            present: leak_flag(false),
            fail: true,
        })));
        plan.push(Assertion::new(Box::new(FlagResource {
            name: "third".into(),
            present: third,
            fail: false,
        })));

        let err = run_simple(&plan, &Facts::new(), &RunOptions::default()).unwrap_err();
        assert_eq!(err.subject(), "second");
        // first applied, third never evaluated
        assert!(*first.lock().unwrap());
        assert!(!*third.lock().unwrap());
    }

    #[test]
    fn test_empty_target_is_implicit_skip() {
        let mut plan = Plan::new();
        plan.push(Assertion::new(Box::new(FlagResource {
            name: String::new(),
            present: leak_flag(false),
            fail: true, // would fail if evaluated
        })));

        let report = run_simple(&plan, &Facts::new(), &RunOptions::default()).unwrap();
        assert!(report.records.is_empty());
        assert_eq!(report.summary.skipped, 1);
    }

    #[test]
    fn test_unknown_handler_rejected_before_any_mutation() {
        let flag = leak_flag(false);
        let mut plan = Plan::new();
        plan.push(
            Assertion::new(Box::new(FlagResource {
                name: "res".into(),
                present: flag,
                fail: false,
            }))
            .notifies("nope"),
        );

        let err = run_simple(&plan, &Facts::new(), &RunOptions::default()).unwrap_err();
        assert!(matches!(err, ConvergeError::UnknownHandler { .. }));
        assert!(!*flag.lock().unwrap());
    }

    #[test]
    fn test_dry_run_mutates_nothing_but_reports_changes() {
        let flag = leak_flag(false);
        let mut plan = Plan::new();
        plan.push(
            Assertion::new(Box::new(FlagResource {
                name: "res".into(),
                present: flag,
                fail: false,
            }))
            .notifies("restart mongod"),
        );
        plan.add_handler(Handler::new(
            "restart mongod",
            Box::new(CountingHandler {
                fired: Box::leak(Box::new(AtomicUsize::new(0))),
            }),
        ));

        let opts = RunOptions {
            dry_run: true,
            ..Default::default()
        };
        let report = run_simple(&plan, &Facts::new(), &opts).unwrap();
        assert!(report.dry_run);
        assert!(report.records[0].changed);
        assert_eq!(report.handlers_fired, vec!["restart mongod".to_string()]);
        assert!(!*flag.lock().unwrap());
    }

    #[test]
    fn test_changed_guard_chains_assertions() {
        let mut plan = Plan::new();
        plan.push(Assertion::new(Box::new(FlagResource {
            name: "base".into(),
            present: leak_flag(false),
            fail: false,
        })));
        let dependent = leak_flag(false);
        plan.push(
            Assertion::new(Box::new(FlagResource {
                name: "dependent".into(),
                present: dependent,
                fail: false,
            }))
            .when(Guard::Changed {
                assertion: "base".into(),
            }),
        );

        let report = run_simple(&plan, &Facts::new(), &RunOptions::default()).unwrap();
        assert_eq!(report.records.len(), 2);
        assert!(*dependent.lock().unwrap());
    }

    #[test]
    fn test_run_hosts_is_independent() {
        let mk = |host: &str| {
            let mut plan = Plan::new();
            plan.push(Assertion::new(Box::new(FlagResource {
                name: "res".into(),
                present: leak_flag(false),
                fail: host == "bad",
            })));
            HostPlan {
                host: host.to_string(),
                plan,
                facts: Facts::new(),
            }
        };

        let reports = run_hosts(vec![mk("good"), mk("bad")], &RunOptions::default());
        assert_eq!(reports.len(), 2);
        for hr in &reports {
            match hr.host.as_str() {
                "good" => assert!(hr.result.is_ok()),
                _ => assert!(hr.result.is_err()),
            }
        }
        let total = merge_host_summaries(&reports);
        assert_eq!(total.created, 1);
    }
}
