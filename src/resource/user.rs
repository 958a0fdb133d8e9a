//! System user resource

use anyhow::{Context, Result, bail};
use converge::{ApplyContext, ApplyOutcome, Resource, ResourceState};
use std::process::Command;

/// A system user account to keep present
#[derive(Debug, Clone)]
pub struct UserAccount {
    pub name: String,
    /// Primary group; must already exist (declare a group assertion first)
    pub group: Option<String>,
    pub home: Option<String>,
    pub shell: Option<String>,
    /// Create as a system account (no aging, low uid range)
    pub system: bool,
    pub create_home: bool,
}

/// Fields of a passwd entry we converge on
#[derive(Debug, PartialEq, Eq)]
struct PasswdEntry {
    home: String,
    shell: String,
}

impl UserAccount {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            group: None,
            home: None,
            shell: None,
            system: false,
            create_home: false,
        }
    }

    /// Look up the passwd entry, None when the user does not exist
    fn passwd_entry(&self) -> Result<Option<PasswdEntry>> {
        let output = Command::new("getent")
            .args(["passwd", &self.name])
            .output()
            .context("Failed to run getent passwd")?;

        if !output.status.success() {
            return Ok(None);
        }

        let line = String::from_utf8_lossy(&output.stdout);
        let fields: Vec<&str> = line.trim().split(':').collect();
        if fields.len() < 7 {
            bail!("Malformed passwd entry for {}", self.name);
        }
        Ok(Some(PasswdEntry {
            home: fields[5].to_string(),
            shell: fields[6].to_string(),
        }))
    }

    /// Attributes that differ from the current entry, as usermod args
    fn drift(&self, entry: &PasswdEntry) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(home) = &self.home
            && home != &entry.home
        {
            args.push("-d".to_string());
            args.push(home.clone());
        }
        if let Some(shell) = &self.shell
            && shell != &entry.shell
        {
            args.push("-s".to_string());
            args.push(shell.clone());
        }
        args
    }

    fn create(&self) -> Result<()> {
        let mut cmd = Command::new("useradd");
        if self.system {
            cmd.arg("--system");
        }
        if let Some(group) = &self.group {
            cmd.args(["-g", group]);
        }
        if let Some(home) = &self.home {
            cmd.args(["-d", home]);
        }
        if self.create_home {
            cmd.arg("-m");
        } else {
            cmd.arg("-M");
        }
        if let Some(shell) = &self.shell {
            cmd.args(["-s", shell]);
        }
        cmd.arg(&self.name);

        let output = cmd.output().context("Failed to run useradd")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("useradd {} failed: {}", self.name, stderr.trim());
        }
        Ok(())
    }

    fn modify(&self, args: &[String]) -> Result<()> {
        let output = Command::new("usermod")
            .args(args)
            .arg(&self.name)
            .output()
            .context("Failed to run usermod")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("usermod {} failed: {}", self.name, stderr.trim());
        }
        Ok(())
    }
}

impl Resource for UserAccount {
    fn id(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        format!("User {}", self.name)
    }

    fn resource_type(&self) -> &'static str {
        "user"
    }

    fn current_state(&self) -> Result<ResourceState> {
        match self.passwd_entry()? {
            None => Ok(ResourceState::Absent),
            Some(entry) => {
                let drift = self.drift(&entry);
                if drift.is_empty() {
                    Ok(ResourceState::Present { details: None })
                } else {
                    Ok(ResourceState::Modified {
                        from: format!("{}:{}", entry.home, entry.shell),
                        to: format!(
                            "{}:{}",
                            self.home.clone().unwrap_or_else(|| entry.home.clone()),
                            self.shell.clone().unwrap_or_else(|| entry.shell.clone())
                        ),
                    })
                }
            }
        }
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::Present { details: None }
    }

    fn apply(&self, _ctx: &mut ApplyContext) -> Result<ApplyOutcome> {
        match self.passwd_entry()? {
            None => {
                self.create()?;
                Ok(ApplyOutcome::Created)
            }
            Some(entry) => {
                let drift = self.drift(&entry);
                if drift.is_empty() {
                    Ok(ApplyOutcome::Unchanged)
                } else {
                    self.modify(&drift)?;
                    Ok(ApplyOutcome::Modified)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drift_detection() {
        let mut user = UserAccount::new("mongodb");
        user.home = Some("/var/lib/mongodb".into());
        user.shell = Some("/usr/sbin/nologin".into());

        let entry = PasswdEntry {
            home: "/var/lib/mongodb".into(),
            shell: "/bin/bash".into(),
        };
        let drift = user.drift(&entry);
        assert_eq!(drift, vec!["-s".to_string(), "/usr/sbin/nologin".to_string()]);
    }

    #[test]
    fn test_no_drift_when_attributes_unspecified() {
        let user = UserAccount::new("mongodb");
        let entry = PasswdEntry {
            home: "/home/mongodb".into(),
            shell: "/bin/bash".into(),
        };
        assert!(user.drift(&entry).is_empty());
    }
}
