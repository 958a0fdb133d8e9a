//! Directory resource - present with attributes, optionally recursive

use anyhow::{Context, Result};
use converge::{ApplyContext, ApplyOutcome, Resource, ResourceState};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::file::{Attributes, chown, parse_mode};

/// A directory to keep present with the given attributes
///
/// With `recurse`, mode and ownership are also converged onto everything
/// below the directory (the data dir of a mongod, typically).
#[derive(Debug, Clone)]
pub struct DirectoryNode {
    pub path: PathBuf,
    /// Octal mode string, e.g. "0755"
    pub mode: Option<String>,
    pub owner: Option<String>,
    pub group: Option<String>,
    pub recurse: bool,
}

impl DirectoryNode {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            mode: None,
            owner: None,
            group: None,
            recurse: false,
        }
    }

    fn attrs(&self) -> Attributes {
        Attributes {
            mode: self.mode.clone(),
            owner: self.owner.clone(),
            group: self.group.clone(),
        }
    }

    /// Check the tree (or just the root) for attribute drift
    fn tree_drift(&self) -> Result<Option<String>> {
        let attrs = self.attrs();
        if !self.recurse {
            return Ok(attrs.drift(&self.path)?.map(|d| d.from));
        }
        for entry in WalkDir::new(&self.path) {
            let entry = entry.context("Failed to walk directory")?;
            if let Some(drift) = attrs.drift(entry.path())? {
                return Ok(Some(format!("{}: {}", entry.path().display(), drift.from)));
            }
        }
        Ok(None)
    }

    /// Converge attributes onto the tree (or just the root)
    fn set_tree(&self) -> Result<()> {
        if let Some(mode) = &self.mode {
            let parsed = parse_mode(mode)?;
            if self.recurse {
                for entry in WalkDir::new(&self.path) {
                    let entry = entry.context("Failed to walk directory")?;
                    fs::set_permissions(entry.path(), fs::Permissions::from_mode(parsed))
                        .with_context(|| format!("Failed to chmod {}", entry.path().display()))?;
                }
            } else {
                fs::set_permissions(&self.path, fs::Permissions::from_mode(parsed))
                    .with_context(|| format!("Failed to chmod {}", self.path.display()))?;
            }
        }
        chown(
            &self.path,
            self.owner.as_deref(),
            self.group.as_deref(),
            self.recurse,
        )
    }
}

impl Resource for DirectoryNode {
    fn id(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    fn description(&self) -> String {
        format!("Directory {}", self.path.display())
    }

    fn resource_type(&self) -> &'static str {
        "directory"
    }

    fn current_state(&self) -> Result<ResourceState> {
        if !self.path.exists() {
            return Ok(ResourceState::Absent);
        }
        if !self.path.is_dir() {
            return Ok(ResourceState::Modified {
                from: "regular file".to_string(),
                to: "directory".to_string(),
            });
        }
        match self.tree_drift()? {
            Some(drift) => Ok(ResourceState::Modified {
                from: drift,
                to: self.mode.clone().unwrap_or_else(|| "desired".to_string()),
            }),
            None => Ok(ResourceState::Present { details: None }),
        }
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::Present { details: None }
    }

    fn apply(&self, _ctx: &mut ApplyContext) -> Result<ApplyOutcome> {
        if !self.path.exists() {
            fs::create_dir_all(&self.path)
                .with_context(|| format!("Failed to create {}", self.path.display()))?;
            self.set_tree()?;
            return Ok(ApplyOutcome::Created);
        }

        anyhow::ensure!(
            self.path.is_dir(),
            "{} exists but is not a directory",
            self.path.display()
        );

        if self.tree_drift()?.is_some() {
            self.set_tree()?;
            Ok(ApplyOutcome::Modified)
        } else {
            Ok(ApplyOutcome::Unchanged)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_then_converged() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("data").join("db");

        let mut node = DirectoryNode::new(&target);
        node.mode = Some("0755".into());

        let mut ctx = ApplyContext::new(false, false);
        assert_eq!(node.apply(&mut ctx).unwrap(), ApplyOutcome::Created);
        assert!(target.is_dir());
        let mode = fs::metadata(&target).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o755);

        // applying the same assertion again reports no change
        assert_eq!(node.apply(&mut ctx).unwrap(), ApplyOutcome::Unchanged);
    }

    #[test]
    fn test_recursive_mode_convergence() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("data");
        fs::create_dir_all(target.join("journal")).unwrap();
        fs::write(target.join("journal").join("j.0"), b"").unwrap();
        fs::set_permissions(
            target.join("journal").join("j.0"),
            fs::Permissions::from_mode(0o777),
        )
        .unwrap();

        let mut node = DirectoryNode::new(&target);
        node.mode = Some("0750".into());
        node.recurse = true;

        let mut ctx = ApplyContext::new(false, false);
        assert_eq!(node.apply(&mut ctx).unwrap(), ApplyOutcome::Modified);
        let mode = fs::metadata(target.join("journal").join("j.0"))
            .unwrap()
            .permissions()
            .mode()
            & 0o7777;
        assert_eq!(mode, 0o750);
        assert_eq!(node.apply(&mut ctx).unwrap(), ApplyOutcome::Unchanged);
    }
}
