//! Desired-state document schema
//!
//! The document is TOML: an optional `[facts]` table, ordered
//! `[[assertions]]` with guards and notify relations, `[[handlers]]`, and
//! an optional `[teardown]` section for the destroy workflow.

use anyhow::{Context, Result, bail};
use converge::{Assertion, Facts, Guard, Handler, Plan};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::sync::LazyLock;

use crate::driver::Platform;
use crate::resource::{
    DirectoryNode, FileNode, Group, MemberSpec, PipPackage, ReplicaSet,
    ReplicaSetTarget, ServiceRestart, SystemPackage, UserAccount,
};
use crate::resource::replica_set::{MongoshClient, ReplicaSettings};

static MODE_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[0-7]{3,4}$").expect("static pattern"));

// ============================================================================
// Document structure
// ============================================================================

/// The root desired-state document
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HostDocument {
    /// Static facts merged over gathered host facts
    #[serde(default)]
    pub facts: Facts,

    /// Ordered resource assertions
    #[serde(default)]
    pub assertions: Vec<AssertionSpec>,

    /// Named handlers, fired when notified by a changed assertion
    #[serde(default)]
    pub handlers: Vec<HandlerSpec>,

    /// Test-instance teardown configuration
    #[serde(default)]
    pub teardown: Option<TeardownSpec>,
}

/// One assertion entry
#[derive(Debug, Serialize, Deserialize)]
pub struct AssertionSpec {
    #[serde(flatten)]
    pub kind: AssertionKind,

    /// Guard; omitted means always
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Guard>,

    /// Handlers to notify on change
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notify: Vec<String>,
}

/// Desired file presence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceSpec {
    #[default]
    Present,
    Absent,
}

/// The typed assertion variants
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssertionKind {
    /// pip-installed package, optionally from an alternate index
    PipPackage {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
        /// Literal index url
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index_url: Option<String>,
        /// Fact holding the index url; empty or undefined means default index
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index_url_fact: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        executable: Option<String>,
    },
    /// Distro package via the platform package manager
    Package { name: String },
    User {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        home: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        shell: Option<String>,
        #[serde(default)]
        system: bool,
        #[serde(default)]
        create_home: bool,
    },
    Group {
        name: String,
        #[serde(default)]
        system: bool,
    },
    File {
        path: String,
        #[serde(default)]
        state: PresenceSpec,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group: Option<String>,
    },
    Directory {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mode: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group: Option<String>,
        #[serde(default)]
        recurse: bool,
    },
    ReplicaSet {
        state: ReplicaSetStateSpec,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        set_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        member: Option<String>,
        #[serde(default)]
        arbiter_only: bool,
        #[serde(default = "default_true")]
        build_indexes: bool,
        #[serde(default)]
        hidden: bool,
        #[serde(default = "default_priority")]
        priority: f64,
        #[serde(default)]
        slave_delay: i64,
        #[serde(default = "default_votes")]
        votes: i64,
        #[serde(default = "default_login_host")]
        login_host: String,
        #[serde(default = "default_login_port")]
        login_port: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        login_user: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        login_password: Option<String>,
    },
}

/// Desired replica set state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaSetStateSpec {
    Initiated,
    Present,
    Absent,
    Reconfigured,
}

fn default_true() -> bool {
    true
}
fn default_priority() -> f64 {
    1.0
}
fn default_votes() -> i64 {
    1
}
fn default_login_host() -> String {
    "localhost".to_string()
}
fn default_login_port() -> u16 {
    crate::resource::replica_set::DEFAULT_PORT
}

/// A named handler entry
#[derive(Debug, Serialize, Deserialize)]
pub struct HandlerSpec {
    pub name: String,
    /// Service unit to restart
    pub service: String,
}

/// Teardown section for the destroy workflow
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TeardownSpec {
    /// Directory holding the Vagrantfile; defaults to the config dir
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,

    #[serde(default)]
    pub platforms: Vec<Platform>,
}

// ============================================================================
// Loading and validation
// ============================================================================

impl HostDocument {
    /// Load a document from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read document: {}", path.display()))?;
        let doc: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid TOML in {}", path.display()))?;
        doc.validate()?;
        Ok(doc)
    }

    /// Validate the document
    pub fn validate(&self) -> Result<()> {
        for spec in &self.assertions {
            spec.validate()?;
            for notified in &spec.notify {
                if !self.handlers.iter().any(|h| &h.name == notified) {
                    bail!(
                        "assertion '{}' notifies undeclared handler '{}'",
                        spec.kind.target(),
                        notified
                    );
                }
            }
        }

        // Same unguarded target twice is a mistake; guarded repeats are the
        // mutually-exclusive install pattern and stay legal
        let mut unguarded = std::collections::HashSet::new();
        for spec in &self.assertions {
            if spec.when.is_none() && !unguarded.insert(spec.kind.target()) {
                bail!("duplicate unguarded assertion for '{}'", spec.kind.target());
            }
        }

        let mut handler_names = std::collections::HashSet::new();
        for handler in &self.handlers {
            if !handler_names.insert(&handler.name) {
                bail!("duplicate handler '{}'", handler.name);
            }
        }

        Ok(())
    }
}

impl AssertionSpec {
    fn validate(&self) -> Result<()> {
        let (mode, label) = match &self.kind {
            AssertionKind::File { mode, path, .. } => (mode, path),
            AssertionKind::Directory { mode, path, .. } => (mode, path),
            _ => return Ok(()),
        };
        if let Some(mode) = mode
            && !MODE_RE.is_match(mode)
        {
            bail!("invalid octal mode '{}' on '{}'", mode, label);
        }
        Ok(())
    }
}

impl AssertionKind {
    /// Target identity, mirroring the resource ids
    pub fn target(&self) -> String {
        match self {
            Self::PipPackage { name, .. }
            | Self::Package { name }
            | Self::User { name, .. }
            | Self::Group { name, .. } => name.clone(),
            Self::File { path, .. } | Self::Directory { path, .. } => path.clone(),
            Self::ReplicaSet {
                member, set_name, ..
            } => member
                .clone()
                .or_else(|| set_name.clone())
                .unwrap_or_default(),
        }
    }
}

// ============================================================================
// Plan building
// ============================================================================

/// Build an executable plan from the document
///
/// Facts must already include the document's `[facts]` overrides; they
/// resolve build-time lookups such as the package family and pip index.
pub fn build_plan(doc: &HostDocument, facts: &Facts) -> Result<Plan> {
    let mut plan = Plan::new();

    for spec in &doc.assertions {
        let resource = build_resource(&spec.kind, facts)?;
        let mut assertion = Assertion::new(resource);
        if let Some(guard) = &spec.when {
            assertion = assertion.when(guard.clone());
        }
        for handler in &spec.notify {
            assertion = assertion.notifies(handler.clone());
        }
        plan.push(assertion);
    }

    for handler in &doc.handlers {
        plan.add_handler(Handler::new(
            handler.name.clone(),
            Box::new(ServiceRestart::new(&handler.service)),
        ));
    }

    Ok(plan)
}

fn build_resource(kind: &AssertionKind, facts: &Facts) -> Result<converge::BoxedResource> {
    Ok(match kind {
        AssertionKind::PipPackage {
            name,
            version,
            index_url,
            index_url_fact,
            executable,
        } => {
            let index = match (index_url, index_url_fact) {
                (Some(url), _) => Some(url.clone()),
                (None, Some(fact)) => facts
                    .get(fact)
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
                (None, None) => None,
            };
            let mut package = PipPackage::new(name)
                .with_version(version.clone())
                .with_index_url(index);
            if let Some(exe) = executable {
                package.executable = exe.clone();
            }
            Box::new(package)
        }
        AssertionKind::Package { name } => {
            let family = facts
                .get("os_family")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            Box::new(SystemPackage::new(name, family))
        }
        AssertionKind::User {
            name,
            group,
            home,
            shell,
            system,
            create_home,
        } => {
            let mut user = UserAccount::new(name);
            user.group = group.clone();
            user.home = home.clone();
            user.shell = shell.clone();
            user.system = *system;
            user.create_home = *create_home;
            Box::new(user)
        }
        AssertionKind::Group { name, system } => Box::new(Group::new(name, *system)),
        AssertionKind::File {
            path,
            state,
            mode,
            owner,
            group,
        } => {
            let expanded = crate::paths::expand(path);
            let mut file = match state {
                PresenceSpec::Present => FileNode::present(expanded),
                PresenceSpec::Absent => FileNode::absent(expanded),
            };
            file.mode = mode.clone();
            file.owner = owner.clone();
            file.group = group.clone();
            Box::new(file)
        }
        AssertionKind::Directory {
            path,
            mode,
            owner,
            group,
            recurse,
        } => {
            let mut dir = DirectoryNode::new(crate::paths::expand(path));
            dir.mode = mode.clone();
            dir.owner = owner.clone();
            dir.group = group.clone();
            dir.recurse = *recurse;
            Box::new(dir)
        }
        AssertionKind::ReplicaSet {
            state,
            set_name,
            member,
            arbiter_only,
            build_indexes,
            hidden,
            priority,
            slave_delay,
            votes,
            login_host,
            login_port,
            login_user,
            login_password,
        } => {
            let client = Arc::new(MongoshClient {
                host: login_host.clone(),
                port: *login_port,
                user: login_user.clone(),
                password: login_password.clone(),
            });

            let member_spec = member.as_deref().map(|host| {
                let mut spec = MemberSpec::new(host);
                spec.arbiter_only = *arbiter_only;
                spec.build_indexes = *build_indexes;
                spec.hidden = *hidden;
                spec.priority = *priority;
                spec.slave_delay = *slave_delay;
                spec.votes = *votes;
                spec
            });

            let target = match state {
                ReplicaSetStateSpec::Initiated => ReplicaSetTarget::Initiated {
                    set_name: set_name.clone(),
                    member: member_spec,
                },
                ReplicaSetStateSpec::Present => {
                    let spec = member_spec
                        .context("replica_set state=present requires a member")?;
                    ReplicaSetTarget::MemberPresent(spec)
                }
                ReplicaSetStateSpec::Absent => {
                    let host = member
                        .as_deref()
                        .context("replica_set state=absent requires a member")?;
                    ReplicaSetTarget::MemberAbsent {
                        host: crate::resource::replica_set::normalize_host(host),
                    }
                }
                ReplicaSetStateSpec::Reconfigured => {
                    ReplicaSetTarget::Reconfigured(ReplicaSettings::default())
                }
            };

            Box::new(ReplicaSet::new(client, target))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::FactValue;

    const MONGO_DOC: &str = r#"
[facts]
mongodb_pip_index_url = ""

[[assertions]]
type = "group"
name = "mongodb"
system = true

[[assertions]]
type = "user"
name = "mongodb"
group = "mongodb"
home = "/var/lib/mongodb"
shell = "/usr/sbin/nologin"
system = true

[[assertions]]
type = "pip_package"
name = "pymongo"
index_url_fact = "mongodb_pip_index_url"
when = { fact_equals = { fact = "mongodb_pip_index_url", value = "" } }

[[assertions]]
type = "pip_package"
name = "pymongo"
index_url_fact = "mongodb_pip_index_url"
when = { fact_not_equals = { fact = "mongodb_pip_index_url", value = "" } }

[[assertions]]
type = "directory"
path = "/data/db"
mode = "0755"
owner = "mongodb"
group = "mongodb"
recurse = true
notify = ["restart mongod"]

[[assertions]]
type = "file"
path = "/etc/mongodb.conf.dpkg-dist"
state = "absent"

[[handlers]]
name = "restart mongod"
service = "mongod"

[teardown]
workdir = "/tmp/molecule"

[[teardown.platforms]]
name = "mongodb-test"
box = "debian/bookworm64"
provider = "virtualbox"
"#;

    fn parse(doc: &str) -> HostDocument {
        let doc: HostDocument = toml::from_str(doc).unwrap();
        doc.validate().unwrap();
        doc
    }

    #[test]
    fn test_full_document_roundtrip() {
        let doc = parse(MONGO_DOC);
        assert_eq!(doc.assertions.len(), 6);
        assert_eq!(doc.handlers.len(), 1);
        assert_eq!(
            doc.facts.get("mongodb_pip_index_url"),
            Some(&FactValue::Str(String::new()))
        );
        let teardown = doc.teardown.unwrap();
        assert_eq!(teardown.platforms[0].box_name, "debian/bookworm64");
    }

    #[test]
    fn test_build_plan_preserves_order_and_guards() {
        let doc = parse(MONGO_DOC);
        let mut facts = Facts::new();
        facts.set("os_family", "debian");
        facts.merge(&doc.facts);

        let plan = build_plan(&doc, &facts).unwrap();
        assert_eq!(plan.len(), 6);
        assert_eq!(plan.assertions[0].resource.resource_type(), "group");
        assert_eq!(plan.assertions[4].notify, vec!["restart mongod".to_string()]);
        assert!(plan.undeclared_handlers().is_empty());
    }

    #[test]
    fn test_undeclared_handler_rejected() {
        let err = toml::from_str::<HostDocument>(
            r#"
[[assertions]]
type = "directory"
path = "/data/db"
notify = ["nope"]
"#,
        )
        .unwrap()
        .validate()
        .unwrap_err();
        assert!(err.to_string().contains("undeclared handler"));
    }

    #[test]
    fn test_invalid_mode_rejected() {
        let err = toml::from_str::<HostDocument>(
            r#"
[[assertions]]
type = "directory"
path = "/data/db"
mode = "rwxr-xr-x"
"#,
        )
        .unwrap()
        .validate()
        .unwrap_err();
        assert!(err.to_string().contains("invalid octal mode"));
    }

    #[test]
    fn test_duplicate_unguarded_assertion_rejected() {
        let err = toml::from_str::<HostDocument>(
            r#"
[[assertions]]
type = "group"
name = "mongodb"

[[assertions]]
type = "group"
name = "mongodb"
"#,
        )
        .unwrap()
        .validate()
        .unwrap_err();
        assert!(err.to_string().contains("duplicate unguarded"));
    }

    #[test]
    fn test_guarded_repeats_are_legal() {
        // the mutually-exclusive pip index pattern
        parse(MONGO_DOC);
    }

    #[test]
    fn test_pip_index_resolution_from_fact() {
        let mut facts = Facts::new();
        facts.set("mongodb_pip_index_url", "https://pypi.internal/simple");

        let kind = AssertionKind::PipPackage {
            name: "pymongo".into(),
            version: None,
            index_url: None,
            index_url_fact: Some("mongodb_pip_index_url".into()),
            executable: None,
        };
        let resource = build_resource(&kind, &facts).unwrap();
        assert!(resource.description().contains("pypi.internal"));

        // empty fact value means the default index
        let mut empty = Facts::new();
        empty.set("mongodb_pip_index_url", "");
        let resource = build_resource(&kind, &empty).unwrap();
        assert!(!resource.description().contains("pypi.internal"));
    }

    #[test]
    fn test_replica_set_member_requires_host_for_present() {
        let kind = AssertionKind::ReplicaSet {
            state: ReplicaSetStateSpec::Present,
            set_name: None,
            member: None,
            arbiter_only: false,
            build_indexes: true,
            hidden: false,
            priority: 1.0,
            slave_delay: 0,
            votes: 1,
            login_host: "localhost".into(),
            login_port: 27017,
            login_user: None,
            login_password: None,
        };
        assert!(build_resource(&kind, &Facts::new()).is_err());
    }
}
