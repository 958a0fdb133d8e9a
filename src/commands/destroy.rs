//! Test-instance teardown
//!
//! Destroys the configured platforms through the virtualization driver.
//! The instance configuration is serialized (YAML with a managed-file
//! header) only when the driver actually tore something down; a no-op run
//! writes nothing.

use anyhow::{Context as AnyhowContext, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::Context;
use crate::driver::{InstanceDriver, Platform, VagrantDriver};
use crate::schema::HostDocument;
use crate::ui;

/// Header comment on the serialized instance configuration
const CONFIG_HEADER: &str = "# Managed by mongoform - do not edit\n";

pub fn run(ctx: &Context, document: Option<&Path>, dry_run: bool) -> Result<()> {
    let path = match document {
        Some(p) => p.to_path_buf(),
        None => crate::paths::document_path()?,
    };
    let doc = HostDocument::load(&path)?;

    let Some(teardown) = doc.teardown else {
        ui::warn("Document has no [teardown] section");
        return Ok(());
    };
    if teardown.platforms.is_empty() {
        ui::warn("No platforms to destroy");
        return Ok(());
    }

    let workdir = match &teardown.workdir {
        Some(w) => crate::paths::expand(w),
        None => crate::paths::config_dir()?,
    };
    let driver = VagrantDriver::new(workdir);
    let config_path = crate::paths::state_dir()?.join("instance_config.yml");

    let changed = teardown_platforms(&driver, &teardown.platforms, dry_run, &config_path, ctx)?;

    println!();
    if dry_run {
        ui::info("Dry run, nothing destroyed");
    } else if changed {
        ui::success("Teardown complete");
    } else {
        ui::success("Nothing to destroy");
    }
    Ok(())
}

/// Destroy each platform; dump the instance config only on actual change
fn teardown_platforms(
    driver: &dyn InstanceDriver,
    platforms: &[Platform],
    dry_run: bool,
    config_path: &Path,
    ctx: &Context,
) -> Result<bool> {
    let mut changed = false;

    for platform in platforms {
        if dry_run {
            if !ctx.quiet {
                ui::dim(&format!(
                    "would destroy {} ({} via {})",
                    platform.name, platform.box_name, platform.provider
                ));
            }
            continue;
        }

        let destroyed = driver
            .destroy(platform)
            .with_context(|| format!("Destroying {}", platform.name))?;
        changed |= destroyed;
        if !ctx.quiet {
            if destroyed {
                ui::success(&format!("destroyed {}", platform.name));
            } else {
                ui::dim(&format!("{} was not created", platform.name));
            }
        }
    }

    if changed {
        let written = write_instance_config(config_path, platforms)?;
        log::debug!("Instance config written to {}", written.display());
    }

    Ok(changed)
}

/// Serialize the instance configuration as YAML with a managed header
fn write_instance_config(path: &Path, platforms: &[Platform]) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let yaml = serde_yaml::to_string(platforms).context("Failed to serialize instance config")?;
    let content = format!("{}---\n{}", CONFIG_HEADER, yaml);
    fs::write(path, content)
        .with_context(|| format!("Could not write instance config: {}", path.display()))?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeDriver {
        /// Instances that "exist" and will report a destroy
        existing: Mutex<Vec<String>>,
    }

    impl InstanceDriver for FakeDriver {
        fn destroy(&self, platform: &Platform) -> Result<bool> {
            let mut existing = self.existing.lock().unwrap();
            let before = existing.len();
            existing.retain(|n| n != &platform.name);
            Ok(existing.len() != before)
        }
    }

    fn platforms() -> Vec<Platform> {
        vec![Platform {
            name: "mongodb-test".into(),
            box_name: "debian/bookworm64".into(),
            provider: "virtualbox".into(),
        }]
    }

    fn ctx() -> Context {
        Context {
            verbose: 0,
            quiet: true,
        }
    }

    #[test]
    fn test_config_written_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("instance_config.yml");

        let driver = FakeDriver {
            existing: Mutex::new(vec!["mongodb-test".to_string()]),
        };

        // first teardown destroys, so the config is dumped
        let changed =
            teardown_platforms(&driver, &platforms(), false, &config_path, &ctx()).unwrap();
        assert!(changed);
        let content = fs::read_to_string(&config_path).unwrap();
        assert!(content.starts_with(CONFIG_HEADER));
        assert!(content.contains("mongodb-test"));
        assert!(content.contains("---"));

        // second teardown is a no-op and must not rewrite the config
        fs::remove_file(&config_path).unwrap();
        let changed =
            teardown_platforms(&driver, &platforms(), false, &config_path, &ctx()).unwrap();
        assert!(!changed);
        assert!(!config_path.exists());
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("instance_config.yml");

        let driver = FakeDriver {
            existing: Mutex::new(vec!["mongodb-test".to_string()]),
        };
        let changed =
            teardown_platforms(&driver, &platforms(), true, &config_path, &ctx()).unwrap();
        assert!(!changed);
        assert!(!config_path.exists());
        assert_eq!(driver.existing.lock().unwrap().len(), 1);
    }
}
