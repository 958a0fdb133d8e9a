//! Service restart resource - the usual handler target

use anyhow::{Context, Result};
use converge::{ApplyContext, ApplyOutcome, Resource, ResourceState};
use std::process::Command;

/// A service to restart via systemctl
///
/// Meant to run as a handler: it fires only when a notifying assertion
/// changed state, and always restarts when it does fire.
#[derive(Debug, Clone)]
pub struct ServiceRestart {
    pub unit: String,
}

impl ServiceRestart {
    pub fn new(unit: &str) -> Self {
        Self {
            unit: unit.to_string(),
        }
    }

    /// Check if the unit is currently active
    fn is_active(&self) -> bool {
        Command::new("systemctl")
            .args(["is-active", "--quiet", &self.unit])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn restart(&self) -> Result<()> {
        let output = Command::new("systemctl")
            .args(["restart", &self.unit])
            .output()
            .context("Failed to run systemctl restart")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("systemctl restart {} failed: {}", self.unit, stderr.trim());
        }
        Ok(())
    }
}

impl Resource for ServiceRestart {
    fn id(&self) -> String {
        self.unit.clone()
    }

    fn description(&self) -> String {
        format!("Restart {}", self.unit)
    }

    fn resource_type(&self) -> &'static str {
        "service"
    }

    fn current_state(&self) -> Result<ResourceState> {
        Ok(ResourceState::Present { details: None })
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::Present {
            details: Some("restarted".to_string()),
        }
    }

    fn needs_apply(&self) -> Result<bool> {
        // A notified restart always runs
        Ok(true)
    }

    fn apply(&self, _ctx: &mut ApplyContext) -> Result<ApplyOutcome> {
        if !self.is_active() {
            return Ok(ApplyOutcome::Skipped {
                reason: format!("{} is not active", self.unit),
            });
        }
        self.restart()?;
        Ok(ApplyOutcome::Modified)
    }
}
