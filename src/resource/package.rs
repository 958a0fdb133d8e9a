//! Package resources - pip-installed tooling and distro packages

use anyhow::{Context, Result, bail};
use converge::{ApplyContext, ApplyOutcome, Resource, ResourceState};
use std::process::Command;

/// A package installed through pip
///
/// Carries an optional alternate package index. A desired-state document
/// typically declares two guarded variants of the same package, one with
/// an index url and one without, gated on whether the index fact is set.
#[derive(Debug, Clone)]
pub struct PipPackage {
    pub name: String,
    pub version: Option<String>,
    pub index_url: Option<String>,
    pub executable: String,
}

impl PipPackage {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: None,
            index_url: None,
            executable: "pip3".to_string(),
        }
    }

    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version;
        self
    }

    pub fn with_index_url(mut self, index_url: Option<String>) -> Self {
        self.index_url = index_url;
        self
    }

    /// Installed version, if the package is present
    fn installed_version(&self) -> Result<Option<String>> {
        let output = Command::new(&self.executable)
            .args(["show", &self.name])
            .output()
            .with_context(|| format!("Failed to run {} show", self.executable))?;

        if !output.status.success() {
            return Ok(None);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let version = stdout
            .lines()
            .find_map(|l| l.strip_prefix("Version:"))
            .map(|v| v.trim().to_string());
        Ok(version.or_else(|| Some(String::new())))
    }

    /// Whether an installed version satisfies the desired one
    fn satisfied_by(&self, installed: &str) -> bool {
        match &self.version {
            Some(wanted) => installed == wanted,
            None => true,
        }
    }

    fn install(&self) -> Result<()> {
        let spec = match &self.version {
            Some(v) => format!("{}=={}", self.name, v),
            None => self.name.clone(),
        };

        let mut cmd = Command::new(&self.executable);
        cmd.args(["install", &spec]);
        if let Some(url) = &self.index_url {
            cmd.args(["--index-url", url]);
        }

        let output = cmd
            .output()
            .with_context(|| format!("Failed to run {} install", self.executable))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{} install {} failed: {}", self.executable, spec, stderr.trim());
        }
        Ok(())
    }
}

impl Resource for PipPackage {
    fn id(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        match &self.index_url {
            Some(url) => format!("Pip package {} from {}", self.name, url),
            None => format!("Pip package {}", self.name),
        }
    }

    fn resource_type(&self) -> &'static str {
        "pip_package"
    }

    fn current_state(&self) -> Result<ResourceState> {
        match self.installed_version()? {
            Some(installed) if self.satisfied_by(&installed) => Ok(ResourceState::Present {
                details: self.version.clone(),
            }),
            Some(installed) => Ok(ResourceState::Modified {
                from: installed,
                to: self.version.clone().unwrap_or_default(),
            }),
            None => Ok(ResourceState::Absent),
        }
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::Present {
            details: self.version.clone(),
        }
    }

    fn apply(&self, _ctx: &mut ApplyContext) -> Result<ApplyOutcome> {
        match self.installed_version()? {
            Some(installed) if self.satisfied_by(&installed) => Ok(ApplyOutcome::Unchanged),
            Some(_) => {
                self.install()?;
                Ok(ApplyOutcome::Modified)
            }
            None => {
                self.install()?;
                Ok(ApplyOutcome::Created)
            }
        }
    }
}

/// A distro package installed through the platform package manager
///
/// The package-manager family comes from the `os_family` fact at plan
/// build time.
#[derive(Debug, Clone)]
pub struct SystemPackage {
    pub name: String,
    pub os_family: String,
}

impl SystemPackage {
    pub fn new(name: &str, os_family: &str) -> Self {
        Self {
            name: name.to_string(),
            os_family: os_family.to_string(),
        }
    }

    fn is_installed(&self) -> Result<bool> {
        match self.os_family.as_str() {
            "debian" => {
                let output = Command::new("dpkg-query")
                    .args(["-W", "-f=${Status}", &self.name])
                    .output()
                    .context("Failed to run dpkg-query")?;
                let status = String::from_utf8_lossy(&output.stdout);
                Ok(output.status.success() && status.contains("install ok installed"))
            }
            "redhat" => {
                let output = Command::new("rpm")
                    .args(["-q", &self.name])
                    .output()
                    .context("Failed to run rpm")?;
                Ok(output.status.success())
            }
            family => bail!("Unsupported package family: {}", family),
        }
    }

    fn install(&self) -> Result<()> {
        let (cmd, args): (&str, Vec<&str>) = match self.os_family.as_str() {
            "debian" => ("apt-get", vec!["install", "-y", &self.name]),
            "redhat" => ("yum", vec!["install", "-y", &self.name]),
            family => bail!("Unsupported package family: {}", family),
        };

        let output = Command::new(cmd)
            .args(&args)
            .env("DEBIAN_FRONTEND", "noninteractive")
            .output()
            .with_context(|| format!("Failed to run {}", cmd))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{} install {} failed: {}", cmd, self.name, stderr.trim());
        }
        Ok(())
    }
}

impl Resource for SystemPackage {
    fn id(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        format!("System package {}", self.name)
    }

    fn resource_type(&self) -> &'static str {
        "system_package"
    }

    fn current_state(&self) -> Result<ResourceState> {
        if self.is_installed()? {
            Ok(ResourceState::Present { details: None })
        } else {
            Ok(ResourceState::Absent)
        }
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::Present { details: None }
    }

    fn apply(&self, _ctx: &mut ApplyContext) -> Result<ApplyOutcome> {
        if self.is_installed()? {
            return Ok(ApplyOutcome::Unchanged);
        }
        self.install()?;
        Ok(ApplyOutcome::Created)
    }
}
