//! Host fact gathering
//!
//! Facts are collected once at run start and frozen for the remainder of
//! convergence. Document-provided facts are merged over gathered ones.

use anyhow::Result;
use converge::Facts;
use std::process::Command;

/// Gather facts about the local host
///
/// Probes that fail leave their fact undefined rather than aborting; a
/// guard that depends on it will surface the gap explicitly.
pub fn gather() -> Result<Facts> {
    let mut facts = Facts::new();

    facts.set("arch", std::env::consts::ARCH);
    facts.set("os", std::env::consts::OS);

    if let Some(hostname) = capture("hostname", &[]) {
        facts.set("hostname", hostname);
    }

    if let Some(kernel) = capture("uname", &["-r"]) {
        facts.set("kernel", kernel);
    }

    if let Ok(contents) = std::fs::read_to_string("/etc/os-release") {
        apply_os_release(&mut facts, &contents);
    }

    log::debug!("Gathered {} facts", facts.len());
    Ok(facts)
}

/// Run a probe command and return trimmed stdout on success
fn capture(cmd: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(cmd).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if stdout.is_empty() { None } else { Some(stdout) }
}

/// Parse distribution facts out of /etc/os-release
fn apply_os_release(facts: &mut Facts, contents: &str) {
    for line in contents.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim_matches('"');
        match key {
            "ID" => {
                facts.set("distribution", value);
                facts.set("os_family", os_family(value));
            }
            "VERSION_ID" => facts.set("distribution_version", value),
            _ => {}
        }
    }
}

/// Map a distribution id to its package-management family
fn os_family(distribution: &str) -> &'static str {
    match distribution {
        "debian" | "ubuntu" | "linuxmint" | "raspbian" => "debian",
        "rhel" | "centos" | "fedora" | "rocky" | "almalinux" | "amzn" => "redhat",
        other => {
            log::debug!("Unknown distribution '{}', os_family left generic", other);
            "unknown"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_release_parsing() {
        let mut facts = Facts::new();
        apply_os_release(
            &mut facts,
            "NAME=\"Ubuntu\"\nID=ubuntu\nVERSION_ID=\"24.04\"\n",
        );
        assert_eq!(facts.get("distribution").unwrap().as_str(), Some("ubuntu"));
        assert_eq!(facts.get("os_family").unwrap().as_str(), Some("debian"));
        assert_eq!(
            facts.get("distribution_version").unwrap().as_str(),
            Some("24.04")
        );
    }

    #[test]
    fn test_os_family_mapping() {
        assert_eq!(os_family("rocky"), "redhat");
        assert_eq!(os_family("debian"), "debian");
        assert_eq!(os_family("plan9"), "unknown");
    }
}
