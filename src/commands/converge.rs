//! Core convergence commands
//!
//! - `status` - current state vs desired state per assertion
//! - `diff` - preview what apply would change
//! - `apply` - converge the host to the desired state

use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use converge::{AssertionDiff, DiffSummary, Facts, Plan, RunOptions};
use rayon::prelude::*;
use std::path::Path;

use crate::Context;
use crate::progress::ApplyProgress;
use crate::schema::{self, HostDocument};
use crate::state::Changelog;
use crate::ui;

/// Load the document and the merged fact map
fn load(document: Option<&Path>, skip_facts: bool) -> Result<(HostDocument, Facts)> {
    let path = match document {
        Some(p) => p.to_path_buf(),
        None => crate::paths::document_path()?,
    };
    let doc = HostDocument::load(&path)?;

    let mut facts = if skip_facts {
        Facts::new()
    } else {
        crate::facts::gather()?
    };
    facts.merge(&doc.facts);

    Ok((doc, facts))
}

/// Per-assertion status line
enum AssertionStatus {
    InSync,
    Drifted(AssertionDiff),
    Skipped,
    ProbeFailed(String),
}

/// Probe every assertion's current state, in parallel
fn probe(plan: &Plan, facts: &Facts) -> Vec<AssertionStatus> {
    plan.assertions
        .par_iter()
        .map(|assertion| {
            match assertion.guard.eval(facts, &[]) {
                Ok(false) => return AssertionStatus::Skipped,
                Err(e) => return AssertionStatus::ProbeFailed(e.to_string()),
                Ok(true) => {}
            }
            match AssertionDiff::from_resource(assertion.resource.as_ref()) {
                Ok(Some(diff)) => AssertionStatus::Drifted(diff),
                Ok(None) => AssertionStatus::InSync,
                Err(e) => AssertionStatus::ProbeFailed(e.to_string()),
            }
        })
        .collect()
}

/// Show current vs desired state for every assertion
pub fn status(_ctx: &Context, document: Option<&Path>, target: Option<&str>) -> Result<()> {
    let (doc, facts) = load(document, false)?;
    let plan = schema::build_plan(&doc, &facts)?.filter_by_target(target);

    ui::header("Host status");
    let statuses = probe(&plan, &facts);
    let mut in_sync = 0usize;
    let mut drifted = 0usize;

    for (assertion, status) in plan.assertions.iter().zip(&statuses) {
        let id = assertion.resource.id();
        let rtype = assertion.resource.resource_type();
        match status {
            AssertionStatus::InSync => {
                in_sync += 1;
                println!("  {} {} {}", "✓".green(), id, format!("({})", rtype).dimmed());
            }
            AssertionStatus::Drifted(_) => {
                drifted += 1;
                println!("  {} {} {}", "~".yellow(), id, format!("({})", rtype).dimmed());
            }
            AssertionStatus::Skipped => {
                println!("  {} {} {}", "-".dimmed(), id.dimmed(), "(guard false)".dimmed());
            }
            AssertionStatus::ProbeFailed(e) => {
                println!("  {} {} {}", "✗".red(), id, e.red());
            }
        }
    }

    println!();
    if drifted == 0 {
        ui::success(&format!("{} assertions in sync", in_sync));
    } else {
        ui::warn(&format!("{} in sync, {} drifted", in_sync, drifted));
    }
    Ok(())
}

/// Preview what apply would change
pub fn diff(_ctx: &Context, document: Option<&Path>, target: Option<&str>) -> Result<()> {
    let (doc, facts) = load(document, false)?;
    let plan = schema::build_plan(&doc, &facts)?.filter_by_target(target);

    let diffs: Vec<AssertionDiff> = probe(&plan, &facts)
        .into_iter()
        .filter_map(|s| match s {
            AssertionStatus::Drifted(diff) => Some(diff),
            _ => None,
        })
        .collect();

    if diffs.is_empty() {
        ui::success("Nothing to change");
        return Ok(());
    }

    ui::header("Planned changes");
    for diff in &diffs {
        let marker = if diff.is_addition() {
            "+".green()
        } else if diff.is_removal() {
            "-".red()
        } else {
            "~".yellow()
        };
        println!("  {} {}", marker, diff.description);
        if let converge::ResourceState::Modified { from, to } = &diff.current {
            println!("      {} {}", "from".dimmed(), from.red());
            println!("      {} {}", "to  ".dimmed(), to.green());
        }
    }

    let summary = DiffSummary::from_diffs(&diffs);
    println!();
    ui::info(&format!(
        "{} to add, {} to remove, {} to modify",
        summary.additions, summary.removals, summary.modifications
    ));
    Ok(())
}

/// Converge the host
pub fn apply(
    ctx: &Context,
    document: Option<&Path>,
    target: Option<&str>,
    dry_run: bool,
    yes: bool,
    skip_facts: bool,
) -> Result<()> {
    let (doc, facts) = load(document, skip_facts)?;
    let plan = schema::build_plan(&doc, &facts)?.filter_by_target(target);

    if plan.is_empty() {
        ui::warn("No assertions match");
        return Ok(());
    }

    if !dry_run && !yes {
        let prompt = format!("Apply {} assertions to this host?", plan.len());
        let confirmed = dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .context("Confirmation failed")?;
        if !confirmed {
            ui::warn("Aborted");
            return Ok(());
        }
    }

    let opts = RunOptions {
        dry_run,
        verbose: ctx.verbose > 0,
    };
    let mut progress = ApplyProgress::new(ctx.quiet);

    let report = match converge::run(&plan, &facts, &opts, &mut progress) {
        Ok(report) => report,
        Err(e) => {
            ui::error(&format!("Run aborted: {}", e));
            return Err(e.into());
        }
    };

    println!();
    let s = &report.summary;
    let verb = if dry_run { "Would change" } else { "Changed" };
    ui::success(&format!(
        "{} {} ({} created, {} modified, {} removed), {} unchanged, {} skipped",
        verb,
        s.total_changes(),
        s.created,
        s.modified,
        s.removed,
        s.unchanged,
        s.skipped
    ));
    if !report.handlers_fired.is_empty() {
        let verb = if dry_run { "Would notify" } else { "Notified" };
        ui::info(&format!("{}: {}", verb, report.handlers_fired.join(", ")));
    }

    if !dry_run {
        let mut changelog = Changelog::load().unwrap_or_default();
        match changelog.record(report) {
            Ok(path) => log::debug!("Change log written to {}", path.display()),
            Err(e) => ui::warn(&format!("Could not write change log: {}", e)),
        }
    }

    Ok(())
}
