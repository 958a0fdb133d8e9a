//! System group resource

use anyhow::{Context, Result, bail};
use converge::{ApplyContext, ApplyOutcome, Resource, ResourceState};
use std::process::Command;

/// A system group to keep present
#[derive(Debug, Clone)]
pub struct Group {
    pub name: String,
    pub system: bool,
}

impl Group {
    pub fn new(name: &str, system: bool) -> Self {
        Self {
            name: name.to_string(),
            system,
        }
    }

    fn exists(&self) -> Result<bool> {
        let output = Command::new("getent")
            .args(["group", &self.name])
            .output()
            .context("Failed to run getent group")?;
        Ok(output.status.success())
    }

    fn create(&self) -> Result<()> {
        let mut cmd = Command::new("groupadd");
        if self.system {
            cmd.arg("--system");
        }
        cmd.arg(&self.name);

        let output = cmd.output().context("Failed to run groupadd")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("groupadd {} failed: {}", self.name, stderr.trim());
        }
        Ok(())
    }
}

impl Resource for Group {
    fn id(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        format!("Group {}", self.name)
    }

    fn resource_type(&self) -> &'static str {
        "group"
    }

    fn current_state(&self) -> Result<ResourceState> {
        if self.exists()? {
            Ok(ResourceState::Present { details: None })
        } else {
            Ok(ResourceState::Absent)
        }
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::Present { details: None }
    }

    fn apply(&self, _ctx: &mut ApplyContext) -> Result<ApplyOutcome> {
        if self.exists()? {
            return Ok(ApplyOutcome::Unchanged);
        }
        self.create()?;
        Ok(ApplyOutcome::Created)
    }
}
