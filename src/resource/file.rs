//! File resource - present with attributes, or absent

use anyhow::{Context, Result, bail};
use converge::{ApplyContext, ApplyOutcome, Resource, ResourceState};
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Desired presence of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileDesired {
    Present,
    Absent,
}

/// A file to keep present (with mode/ownership) or absent
#[derive(Debug, Clone)]
pub struct FileNode {
    pub path: PathBuf,
    pub desired: FileDesired,
    /// Octal mode string, e.g. "0600"
    pub mode: Option<String>,
    pub owner: Option<String>,
    pub group: Option<String>,
}

impl FileNode {
    pub fn present(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            desired: FileDesired::Present,
            mode: None,
            owner: None,
            group: None,
        }
    }

    pub fn absent(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            desired: FileDesired::Absent,
            mode: None,
            owner: None,
            group: None,
        }
    }

    fn attrs(&self) -> Attributes {
        Attributes {
            mode: self.mode.clone(),
            owner: self.owner.clone(),
            group: self.group.clone(),
        }
    }
}

impl Resource for FileNode {
    fn id(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    fn description(&self) -> String {
        match self.desired {
            FileDesired::Present => format!("File {}", self.path.display()),
            FileDesired::Absent => format!("Absent file {}", self.path.display()),
        }
    }

    fn resource_type(&self) -> &'static str {
        "file"
    }

    fn current_state(&self) -> Result<ResourceState> {
        if !self.path.exists() {
            return Ok(ResourceState::Absent);
        }
        if self.desired == FileDesired::Absent {
            return Ok(ResourceState::Present { details: None });
        }
        match self.attrs().drift(&self.path)? {
            Some(drift) => Ok(ResourceState::Modified {
                from: drift.from,
                to: drift.to,
            }),
            None => Ok(ResourceState::Present { details: None }),
        }
    }

    fn desired_state(&self) -> ResourceState {
        match self.desired {
            FileDesired::Present => ResourceState::Present { details: None },
            FileDesired::Absent => ResourceState::Absent,
        }
    }

    fn apply(&self, _ctx: &mut ApplyContext) -> Result<ApplyOutcome> {
        match self.desired {
            FileDesired::Absent => {
                if !self.path.exists() {
                    return Ok(ApplyOutcome::Unchanged);
                }
                fs::remove_file(&self.path)
                    .with_context(|| format!("Failed to remove {}", self.path.display()))?;
                Ok(ApplyOutcome::Removed)
            }
            FileDesired::Present => {
                if !self.path.exists() {
                    if let Some(parent) = self.path.parent() {
                        fs::create_dir_all(parent).with_context(|| {
                            format!("Failed to create parent directory: {}", parent.display())
                        })?;
                    }
                    fs::write(&self.path, b"")
                        .with_context(|| format!("Failed to create {}", self.path.display()))?;
                    self.attrs().set(&self.path)?;
                    return Ok(ApplyOutcome::Created);
                }

                if self.attrs().drift(&self.path)?.is_some() {
                    self.attrs().set(&self.path)?;
                    Ok(ApplyOutcome::Modified)
                } else {
                    Ok(ApplyOutcome::Unchanged)
                }
            }
        }
    }
}

// ============================================================================
// Shared mode/ownership machinery (also used by the directory resource)
// ============================================================================

/// Desired mode/ownership attributes of a filesystem node
#[derive(Debug, Clone)]
pub(crate) struct Attributes {
    pub mode: Option<String>,
    pub owner: Option<String>,
    pub group: Option<String>,
}

/// A detected attribute mismatch
pub(crate) struct AttrDrift {
    pub from: String,
    pub to: String,
}

impl Attributes {
    /// Compare desired attributes against the node at `path`
    pub fn drift(&self, path: &Path) -> Result<Option<AttrDrift>> {
        let meta = fs::metadata(path)
            .with_context(|| format!("Failed to stat {}", path.display()))?;

        let mut from = Vec::new();
        let mut to = Vec::new();

        if let Some(mode) = &self.mode {
            let wanted = parse_mode(mode)?;
            let actual = meta.permissions().mode() & 0o7777;
            if actual != wanted {
                from.push(format!("{:04o}", actual));
                to.push(format!("{:04o}", wanted));
            }
        }
        if let Some(owner) = &self.owner {
            let wanted = resolve_uid(owner)?;
            if meta.uid() != wanted {
                from.push(format!("uid {}", meta.uid()));
                to.push(owner.clone());
            }
        }
        if let Some(group) = &self.group {
            let wanted = resolve_gid(group)?;
            if meta.gid() != wanted {
                from.push(format!("gid {}", meta.gid()));
                to.push(group.clone());
            }
        }

        if from.is_empty() {
            Ok(None)
        } else {
            Ok(Some(AttrDrift {
                from: from.join(" "),
                to: to.join(" "),
            }))
        }
    }

    /// Apply desired attributes to the node at `path`
    pub fn set(&self, path: &Path) -> Result<()> {
        if let Some(mode) = &self.mode {
            let parsed = parse_mode(mode)?;
            fs::set_permissions(path, fs::Permissions::from_mode(parsed))
                .with_context(|| format!("Failed to chmod {}", path.display()))?;
        }
        if self.owner.is_some() || self.group.is_some() {
            chown(path, self.owner.as_deref(), self.group.as_deref(), false)?;
        }
        Ok(())
    }
}

/// Parse an octal mode string like "0755"
pub(crate) fn parse_mode(mode: &str) -> Result<u32> {
    u32::from_str_radix(mode, 8).with_context(|| format!("Invalid octal mode: {}", mode))
}

/// Change ownership via chown(1)
pub(crate) fn chown(path: &Path, owner: Option<&str>, group: Option<&str>, recurse: bool) -> Result<()> {
    let spec = match (owner, group) {
        (Some(o), Some(g)) => format!("{}:{}", o, g),
        (Some(o), None) => o.to_string(),
        (None, Some(g)) => format!(":{}", g),
        (None, None) => return Ok(()),
    };

    let mut cmd = Command::new("chown");
    if recurse {
        cmd.arg("-R");
    }
    cmd.arg(&spec).arg(path);

    let output = cmd.output().context("Failed to run chown")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("chown {} {} failed: {}", spec, path.display(), stderr.trim());
    }
    Ok(())
}

/// Resolve a user name to its uid
pub(crate) fn resolve_uid(name: &str) -> Result<u32> {
    resolve_id("passwd", name)
}

/// Resolve a group name to its gid
pub(crate) fn resolve_gid(name: &str) -> Result<u32> {
    resolve_id("group", name)
}

fn resolve_id(database: &str, name: &str) -> Result<u32> {
    let output = Command::new("getent")
        .args([database, name])
        .output()
        .context("Failed to run getent")?;
    if !output.status.success() {
        bail!("Unknown {} entry: {}", database, name);
    }
    let line = String::from_utf8_lossy(&output.stdout);
    let id = line
        .trim()
        .split(':')
        .nth(2)
        .with_context(|| format!("Malformed {} entry for {}", database, name))?;
    id.parse()
        .with_context(|| format!("Non-numeric id in {} entry for {}", database, name))
}
