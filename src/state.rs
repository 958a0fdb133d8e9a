//! Change-log persistence
//!
//! Every completed apply appends its run report, capped to the most
//! recent runs, so an operator can answer "what changed on this host and
//! when" after the fact.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use converge::RunReport;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Number of runs kept in the log
const KEEP_RUNS: usize = 50;

/// One logged run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangelogEntry {
    pub timestamp: DateTime<Utc>,
    pub report: RunReport,
}

/// The persisted change log
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Changelog {
    #[serde(default)]
    pub runs: Vec<ChangelogEntry>,
}

impl Changelog {
    fn path() -> Result<PathBuf> {
        Ok(crate::paths::state_dir()?.join("changelog.json"))
    }

    /// Load the change log, empty if none exists yet
    pub fn load() -> Result<Self> {
        let path = Self::path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read change log: {}", path.display()))?;
        serde_json::from_str(&content).context("Invalid change log format")
    }

    /// Append a run and persist
    pub fn record(&mut self, report: RunReport) -> Result<PathBuf> {
        self.runs.push(ChangelogEntry {
            timestamp: Utc::now(),
            report,
        });
        if self.runs.len() > KEEP_RUNS {
            let excess = self.runs.len() - KEEP_RUNS;
            self.runs.drain(..excess);
        }
        self.save()
    }

    fn save(&self) -> Result<PathBuf> {
        let path = Self::path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize change log")?;
        fs::write(&path, content)
            .with_context(|| format!("Could not write change log: {}", path.display()))?;
        Ok(path)
    }
}
