//! Virtualization driver for test-instance teardown
//!
//! The driver is a black box exposing destroy-with-changed-flag; the
//! concrete implementation wraps vagrant.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Command;

/// A virtualized test platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    /// Instance name
    pub name: String,
    /// Base image
    #[serde(rename = "box")]
    pub box_name: String,
    /// Virtualization provider (virtualbox, libvirt, ...)
    pub provider: String,
}

/// Lifecycle driver for test instances
pub trait InstanceDriver: Send + Sync {
    /// Destroy the instance; returns whether anything was actually torn down
    fn destroy(&self, platform: &Platform) -> Result<bool>;
}

/// Driver shelling out to vagrant
pub struct VagrantDriver {
    /// Directory holding the Vagrantfile
    pub workdir: PathBuf,
}

impl VagrantDriver {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Whether the machine exists at all (anything but "not created")
    fn exists(&self, name: &str) -> Result<bool> {
        let output = Command::new("vagrant")
            .args(["status", name, "--machine-readable"])
            .current_dir(&self.workdir)
            .output()
            .context("Failed to run vagrant status")?;
        if !output.status.success() {
            // unknown machine name: nothing to destroy
            return Ok(false);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let state = stdout
            .lines()
            .filter_map(|l| {
                let fields: Vec<&str> = l.split(',').collect();
                (fields.get(2) == Some(&"state")).then(|| fields.get(3).copied()).flatten()
            })
            .next_back();
        Ok(!matches!(state, Some("not_created") | None))
    }
}

impl InstanceDriver for VagrantDriver {
    fn destroy(&self, platform: &Platform) -> Result<bool> {
        if !self.exists(&platform.name)? {
            log::debug!("Instance {} not created, nothing to destroy", platform.name);
            return Ok(false);
        }

        let output = Command::new("vagrant")
            .args(["destroy", "--force", &platform.name])
            .current_dir(&self.workdir)
            .output()
            .context("Failed to run vagrant destroy")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "vagrant destroy {} failed: {}",
                platform.name,
                stderr.trim()
            );
        }
        Ok(true)
    }
}
