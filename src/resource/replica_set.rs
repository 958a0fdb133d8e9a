//! Replica set membership resource
//!
//! Converges a MongoDB replica set: initiate it on first boot, keep a
//! member present or absent, or push settings. The client is a trait so
//! the convergence logic is testable without a live mongod; the real
//! client shells out to mongosh and parses JSON.

use anyhow::{Context, Result, bail};
use converge::{ApplyContext, ApplyOutcome, Resource, ResourceState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 27017;

/// How long to wait for the set to elect this node primary after initiate
const PRIMARY_WAIT: Duration = Duration::from_secs(60);
const PRIMARY_POLL: Duration = Duration::from_secs(1);

/// Reconfiguration attempts before giving up on election contention
const RECONFIG_RETRIES: u32 = 5;

// ============================================================================
// Wire documents
// ============================================================================

/// A member document as stored in the replica set config
///
/// Optional attributes are serialized only when set, so a freshly added
/// member carries nothing beyond host and _id unless asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberDoc {
    #[serde(rename = "_id")]
    pub id: i64,
    pub host: String,
    #[serde(rename = "arbiterOnly", skip_serializing_if = "Option::is_none")]
    pub arbiter_only: Option<bool>,
    #[serde(rename = "buildIndexes", skip_serializing_if = "Option::is_none")]
    pub build_indexes: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hidden: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<f64>,
    #[serde(rename = "slaveDelay", skip_serializing_if = "Option::is_none")]
    pub slave_delay: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub votes: Option<i64>,
    /// Server-added fields we must not drop on reconfig
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

/// The replica set configuration document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RsConfig {
    #[serde(rename = "_id")]
    pub set_name: String,
    pub version: i64,
    pub members: Vec<MemberDoc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

impl RsConfig {
    /// Find a member by host
    pub fn member(&self, host: &str) -> Option<&MemberDoc> {
        self.members.iter().find(|m| m.host == host)
    }

    /// Next free member id: one past the highest in use
    pub fn next_member_id(&self) -> i64 {
        self.members.iter().map(|m| m.id).max().map_or(0, |id| id + 1)
    }

    /// Append a member and bump the version
    pub fn add_member(&mut self, member: MemberDoc) {
        self.members.push(member);
        self.version += 1;
    }

    /// Remove a member by host and bump the version
    ///
    /// Returns false when the host was not a member.
    pub fn remove_member(&mut self, host: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m.host != host);
        if self.members.len() == before {
            return false;
        }
        self.version += 1;
        true
    }
}

// ============================================================================
// Desired state
// ============================================================================

/// Desired attributes of one member
#[derive(Debug, Clone, PartialEq)]
pub struct MemberSpec {
    pub host: String,
    pub arbiter_only: bool,
    pub build_indexes: bool,
    pub hidden: bool,
    pub priority: f64,
    pub slave_delay: i64,
    pub votes: i64,
}

impl MemberSpec {
    pub fn new(host: &str) -> Self {
        Self {
            host: normalize_host(host),
            arbiter_only: false,
            build_indexes: true,
            hidden: false,
            priority: 1.0,
            slave_delay: 0,
            votes: 1,
        }
    }

    /// Build the wire document, serializing only non-default attributes
    pub fn document(&self, id: i64) -> MemberDoc {
        MemberDoc {
            id,
            host: self.host.clone(),
            arbiter_only: self.arbiter_only.then_some(true),
            build_indexes: (!self.build_indexes).then_some(false),
            hidden: self.hidden.then_some(true),
            priority: (self.priority != 1.0).then_some(self.priority),
            slave_delay: (self.slave_delay != 0).then_some(self.slave_delay),
            votes: (self.votes != 1).then_some(self.votes),
            rest: serde_json::Map::new(),
        }
    }
}

/// Append the default port when the host carries none
pub fn normalize_host(host: &str) -> String {
    if host.contains(':') {
        host.to_string()
    } else {
        format!("{}:{}", host, DEFAULT_PORT)
    }
}

/// Replica set settings document
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicaSettings {
    pub chaining_allowed: bool,
    /// Heartbeat timeout in seconds
    pub heartbeat: i64,
    /// Default write concern; numeric or a tag like "majority"
    pub write_concern: Value,
    pub journal: bool,
    pub wtimeout: i64,
}

impl Default for ReplicaSettings {
    fn default() -> Self {
        Self {
            chaining_allowed: true,
            heartbeat: 10,
            write_concern: Value::from(1),
            journal: false,
            wtimeout: 0,
        }
    }
}

impl ReplicaSettings {
    /// Build the settings document for the config
    pub fn document(&self) -> Value {
        serde_json::json!({
            "chainingAllowed": self.chaining_allowed,
            "heartbeatTimeoutSecs": self.heartbeat,
            "getLastErrorDefaults": {
                "w": self.write_concern,
                "j": self.journal,
                "wtimeout": self.wtimeout,
            },
        })
    }
}

/// What the assertion wants of the replica set
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicaSetTarget {
    /// Initiate the set if this node is not yet part of one
    Initiated {
        set_name: Option<String>,
        member: Option<MemberSpec>,
    },
    /// Keep a member in the set
    MemberPresent(MemberSpec),
    /// Keep a host out of the set
    MemberAbsent { host: String },
    /// Push the settings document
    Reconfigured(ReplicaSettings),
}

// ============================================================================
// Client seam
// ============================================================================

/// Result of a reconfiguration attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconfigOutcome {
    Applied,
    /// The node lost (or has not yet won) an election; retryable
    Contended,
}

/// Operations against one mongod, treated as a black box
pub trait ReplicaSetClient: Send + Sync + fmt::Debug {
    /// The set name this node reports, None when not in a set
    fn set_name(&self) -> Result<Option<String>>;

    /// Current replica set config, None before initiation
    fn get_config(&self) -> Result<Option<RsConfig>>;

    /// Initiate the set, with an explicit config or server defaults
    fn initiate(&self, config: Option<&RsConfig>) -> Result<()>;

    /// Push a new config version
    fn reconfigure(&self, config: &RsConfig) -> Result<ReconfigOutcome>;

    /// Whether status reports ok with this node primary
    fn is_ok_and_primary(&self) -> Result<bool>;
}

/// Client shelling out to mongosh
#[derive(Debug, Clone)]
pub struct MongoshClient {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl MongoshClient {
    fn eval(&self, script: &str) -> Result<String> {
        let mut cmd = Command::new("mongosh");
        cmd.args(["--quiet", "--host", &self.host, "--port"])
            .arg(self.port.to_string());
        if let Some(user) = &self.user {
            cmd.args(["--username", user]);
        }
        if let Some(password) = &self.password {
            cmd.args(["--password", password]);
        }
        cmd.args(["--eval", script]);

        let output = cmd.output().context("Failed to run mongosh")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("mongosh eval failed: {}", stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl ReplicaSetClient for MongoshClient {
    fn set_name(&self) -> Result<Option<String>> {
        let raw = self.eval("JSON.stringify(db.adminCommand({ hello: 1 }))")?;
        let hello: Value = serde_json::from_str(&raw).context("Malformed hello response")?;
        Ok(hello
            .get("setName")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    fn get_config(&self) -> Result<Option<RsConfig>> {
        let raw = match self.eval("JSON.stringify(rs.conf())") {
            Ok(raw) => raw,
            // Not yet initiated reports an error rather than a document
            Err(e) if e.to_string().contains("no replset config") => return Ok(None),
            Err(e) if e.to_string().contains("NotYetInitialized") => return Ok(None),
            Err(e) => return Err(e),
        };
        let config = serde_json::from_str(&raw).context("Malformed rs.conf() response")?;
        Ok(Some(config))
    }

    fn initiate(&self, config: Option<&RsConfig>) -> Result<()> {
        let script = match config {
            Some(cfg) => format!("rs.initiate({})", serde_json::to_string(cfg)?),
            None => "rs.initiate()".to_string(),
        };
        self.eval(&script)?;
        Ok(())
    }

    fn reconfigure(&self, config: &RsConfig) -> Result<ReconfigOutcome> {
        let script = format!("rs.reconfig({})", serde_json::to_string(config)?);
        match self.eval(&script) {
            Ok(_) => Ok(ReconfigOutcome::Applied),
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("NotWritablePrimary")
                    || msg.contains("not primary")
                    || msg.contains("ConfigurationInProgress")
                {
                    Ok(ReconfigOutcome::Contended)
                } else {
                    Err(e)
                }
            }
        }
    }

    fn is_ok_and_primary(&self) -> Result<bool> {
        let raw = self.eval("JSON.stringify(rs.status())")?;
        let status: Value = serde_json::from_str(&raw).context("Malformed rs.status() response")?;
        let ok = status.get("ok").and_then(Value::as_f64).unwrap_or(0.0);
        let state = status.get("myState").and_then(Value::as_i64).unwrap_or(0);
        Ok(ok == 1.0 && state == 1)
    }
}

// ============================================================================
// Resource
// ============================================================================

/// The replica set assertion
#[derive(Debug, Clone)]
pub struct ReplicaSet {
    pub client: Arc<dyn ReplicaSetClient>,
    pub target: ReplicaSetTarget,
    /// Initial delay between contended reconfig attempts
    pub backoff: Duration,
}

impl ReplicaSet {
    pub fn new(client: Arc<dyn ReplicaSetClient>, target: ReplicaSetTarget) -> Self {
        Self {
            client,
            target,
            backoff: Duration::from_secs(2),
        }
    }

    /// Reconfigure, retrying while the node contends for primary
    fn reconfigure_with_retry(&self, config: &RsConfig) -> Result<()> {
        let mut backoff = self.backoff;
        for attempt in 0..RECONFIG_RETRIES {
            match self.client.reconfigure(config)? {
                ReconfigOutcome::Applied => return Ok(()),
                ReconfigOutcome::Contended => {
                    log::debug!(
                        "Reconfig contended (attempt {}), retrying in {:?}",
                        attempt + 1,
                        backoff
                    );
                    std::thread::sleep(backoff);
                    backoff = (backoff * 2).min(Duration::from_secs(8));
                }
            }
        }
        bail!("replica set reconfiguration still contended after {} attempts", RECONFIG_RETRIES)
    }

    /// Block until the set reports ok with this node primary
    fn wait_for_primary(&self) -> Result<()> {
        let mut waited = Duration::ZERO;
        loop {
            if self.client.is_ok_and_primary()? {
                return Ok(());
            }
            if waited >= PRIMARY_WAIT {
                bail!("timed out waiting for replica set to elect a primary");
            }
            std::thread::sleep(PRIMARY_POLL);
            waited += PRIMARY_POLL;
        }
    }

    fn config_required(&self) -> Result<RsConfig> {
        self.client
            .get_config()?
            .context("replica set has no configuration; initiate it first")
    }
}

impl Resource for ReplicaSet {
    fn id(&self) -> String {
        match &self.target {
            ReplicaSetTarget::Initiated { set_name, member } => set_name
                .clone()
                .or_else(|| member.as_ref().map(|m| m.host.clone()))
                .unwrap_or_else(|| "replica-set".to_string()),
            ReplicaSetTarget::MemberPresent(spec) => spec.host.clone(),
            ReplicaSetTarget::MemberAbsent { host } => host.clone(),
            ReplicaSetTarget::Reconfigured(_) => "replica-set-settings".to_string(),
        }
    }

    fn description(&self) -> String {
        match &self.target {
            ReplicaSetTarget::Initiated { .. } => "Replica set initiated".to_string(),
            ReplicaSetTarget::MemberPresent(spec) => format!("Replica set member {}", spec.host),
            ReplicaSetTarget::MemberAbsent { host } => {
                format!("No replica set member {}", host)
            }
            ReplicaSetTarget::Reconfigured(_) => "Replica set settings".to_string(),
        }
    }

    fn resource_type(&self) -> &'static str {
        "replica_set"
    }

    fn current_state(&self) -> Result<ResourceState> {
        match &self.target {
            ReplicaSetTarget::Initiated { .. } => match self.client.set_name()? {
                Some(name) => Ok(ResourceState::Present {
                    details: Some(name),
                }),
                None => Ok(ResourceState::Absent),
            },
            ReplicaSetTarget::MemberPresent(spec) => {
                let present = self
                    .client
                    .get_config()?
                    .is_some_and(|c| c.member(&spec.host).is_some());
                if present {
                    Ok(ResourceState::Present { details: None })
                } else {
                    Ok(ResourceState::Absent)
                }
            }
            ReplicaSetTarget::MemberAbsent { host } => {
                let present = self
                    .client
                    .get_config()?
                    .is_some_and(|c| c.member(host).is_some());
                if present {
                    Ok(ResourceState::Present { details: None })
                } else {
                    Ok(ResourceState::Absent)
                }
            }
            ReplicaSetTarget::Reconfigured(settings) => {
                let config = self.config_required()?;
                if config.settings.as_ref() == Some(&settings.document()) {
                    Ok(ResourceState::Present { details: None })
                } else {
                    Ok(ResourceState::Modified {
                        from: "current settings".to_string(),
                        to: "desired settings".to_string(),
                    })
                }
            }
        }
    }

    fn desired_state(&self) -> ResourceState {
        match &self.target {
            ReplicaSetTarget::MemberAbsent { .. } => ResourceState::Absent,
            ReplicaSetTarget::Initiated { set_name, .. } => ResourceState::Present {
                details: set_name.clone(),
            },
            _ => ResourceState::Present { details: None },
        }
    }

    fn apply(&self, _ctx: &mut ApplyContext) -> Result<ApplyOutcome> {
        match &self.target {
            ReplicaSetTarget::Initiated { set_name, member } => {
                if self.client.set_name()?.is_some() {
                    return Ok(ApplyOutcome::Unchanged);
                }
                match member {
                    None => self.client.initiate(None)?,
                    Some(spec) => {
                        let Some(name) = set_name else {
                            bail!("set_name must be specified when initiating with a member");
                        };
                        let config = RsConfig {
                            set_name: name.clone(),
                            version: 1,
                            members: vec![spec.document(0)],
                            settings: None,
                            rest: serde_json::Map::new(),
                        };
                        self.client.initiate(Some(&config))?;
                    }
                }
                self.wait_for_primary()?;
                Ok(ApplyOutcome::Created)
            }
            ReplicaSetTarget::MemberPresent(spec) => {
                let mut config = self.config_required()?;
                if config.member(&spec.host).is_some() {
                    return Ok(ApplyOutcome::Unchanged);
                }
                let id = config.next_member_id();
                config.add_member(spec.document(id));
                self.reconfigure_with_retry(&config)?;
                Ok(ApplyOutcome::Created)
            }
            ReplicaSetTarget::MemberAbsent { host } => {
                let mut config = self.config_required()?;
                if !config.remove_member(host) {
                    return Ok(ApplyOutcome::Unchanged);
                }
                self.reconfigure_with_retry(&config)?;
                Ok(ApplyOutcome::Removed)
            }
            ReplicaSetTarget::Reconfigured(settings) => {
                let mut config = self.config_required()?;
                let desired = settings.document();
                if config.settings.as_ref() == Some(&desired) {
                    return Ok(ApplyOutcome::Unchanged);
                }
                config.settings = Some(desired);
                config.version += 1;
                self.reconfigure_with_retry(&config)?;
                Ok(ApplyOutcome::Modified)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// In-memory stand-in for a mongod
    #[derive(Debug, Default)]
    struct FakeNode {
        state: Mutex<FakeState>,
    }

    #[derive(Debug, Default)]
    struct FakeState {
        config: Option<RsConfig>,
        contended_rounds: u32,
    }

    impl ReplicaSetClient for FakeNode {
        fn set_name(&self) -> Result<Option<String>> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .config
                .as_ref()
                .map(|c| c.set_name.clone()))
        }

        fn get_config(&self) -> Result<Option<RsConfig>> {
            Ok(self.state.lock().unwrap().config.clone())
        }

        fn initiate(&self, config: Option<&RsConfig>) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.config = Some(config.cloned().unwrap_or_else(|| RsConfig {
                set_name: "rs0".to_string(),
                version: 1,
                members: vec![MemberSpec::new("localhost").document(0)],
                settings: None,
                rest: serde_json::Map::new(),
            }));
            Ok(())
        }

        fn reconfigure(&self, config: &RsConfig) -> Result<ReconfigOutcome> {
            let mut state = self.state.lock().unwrap();
            if state.contended_rounds > 0 {
                state.contended_rounds -= 1;
                return Ok(ReconfigOutcome::Contended);
            }
            state.config = Some(config.clone());
            Ok(ReconfigOutcome::Applied)
        }

        fn is_ok_and_primary(&self) -> Result<bool> {
            Ok(self.state.lock().unwrap().config.is_some())
        }
    }

    fn ctx() -> ApplyContext {
        ApplyContext::new(false, false)
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("db1.example.com"), "db1.example.com:27017");
        assert_eq!(normalize_host("arbiter:30000"), "arbiter:30000");
    }

    #[test]
    fn test_member_doc_serializes_only_non_defaults() {
        let doc = MemberSpec::new("db1").document(3);
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "_id": 3, "host": "db1:27017" })
        );

        let mut spec = MemberSpec::new("arbiter");
        spec.arbiter_only = true;
        spec.priority = 0.0;
        spec.votes = 0;
        let json = serde_json::to_value(spec.document(4)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "_id": 4,
                "host": "arbiter:27017",
                "arbiterOnly": true,
                "priority": 0.0,
                "votes": 0,
            })
        );
    }

    #[test]
    fn test_next_member_id_is_max_plus_one() {
        let mut config = RsConfig {
            set_name: "rs0".into(),
            version: 1,
            members: vec![
                MemberSpec::new("a").document(0),
                MemberSpec::new("b").document(5),
                MemberSpec::new("c").document(2),
            ],
            settings: None,
            rest: serde_json::Map::new(),
        };
        assert_eq!(config.next_member_id(), 6);
        config.members.clear();
        assert_eq!(config.next_member_id(), 0);
    }

    #[test]
    fn test_initiate_then_idempotent() {
        let client = Arc::new(FakeNode::default());
        let rs = ReplicaSet::new(
            client.clone(),
            ReplicaSetTarget::Initiated {
                set_name: Some("rs0".into()),
                member: Some(MemberSpec::new("db1")),
            },
        );

        assert_eq!(rs.apply(&mut ctx()).unwrap(), ApplyOutcome::Created);
        let config = client.get_config().unwrap().unwrap();
        assert_eq!(config.set_name, "rs0");
        assert_eq!(config.members[0].id, 0);

        assert_eq!(rs.apply(&mut ctx()).unwrap(), ApplyOutcome::Unchanged);
    }

    #[test]
    fn test_member_add_bumps_version_and_allocates_id() {
        let client = Arc::new(FakeNode::default());
        client.initiate(None).unwrap();
        let before = client.get_config().unwrap().unwrap().version;

        let rs = ReplicaSet::new(
            client.clone(),
            ReplicaSetTarget::MemberPresent(MemberSpec::new("db2")),
        );
        assert_eq!(rs.apply(&mut ctx()).unwrap(), ApplyOutcome::Created);

        let config = client.get_config().unwrap().unwrap();
        assert_eq!(config.version, before + 1);
        assert_eq!(config.member("db2:27017").unwrap().id, 1);

        // already a member: no change, no version bump
        assert_eq!(rs.apply(&mut ctx()).unwrap(), ApplyOutcome::Unchanged);
        assert_eq!(client.get_config().unwrap().unwrap().version, before + 1);
    }

    #[test]
    fn test_member_remove() {
        let client = Arc::new(FakeNode::default());
        client.initiate(None).unwrap();

        let add = ReplicaSet::new(
            client.clone(),
            ReplicaSetTarget::MemberPresent(MemberSpec::new("db2")),
        );
        add.apply(&mut ctx()).unwrap();

        let remove = ReplicaSet::new(
            client.clone(),
            ReplicaSetTarget::MemberAbsent {
                host: "db2:27017".into(),
            },
        );
        assert_eq!(remove.apply(&mut ctx()).unwrap(), ApplyOutcome::Removed);
        assert!(client.get_config().unwrap().unwrap().member("db2:27017").is_none());
        assert_eq!(remove.apply(&mut ctx()).unwrap(), ApplyOutcome::Unchanged);
    }

    #[test]
    fn test_reconfig_retries_through_contention() {
        let client = Arc::new(FakeNode::default());
        client.initiate(None).unwrap();
        client.state.lock().unwrap().contended_rounds = 2;

        let mut rs = ReplicaSet::new(
            client.clone(),
            ReplicaSetTarget::MemberPresent(MemberSpec::new("db2")),
        );
        rs.backoff = Duration::ZERO;
        assert_eq!(rs.apply(&mut ctx()).unwrap(), ApplyOutcome::Created);
        assert!(client.get_config().unwrap().unwrap().member("db2:27017").is_some());
    }

    #[test]
    fn test_settings_document_shape() {
        let settings = ReplicaSettings::default();
        assert_eq!(
            settings.document(),
            serde_json::json!({
                "chainingAllowed": true,
                "heartbeatTimeoutSecs": 10,
                "getLastErrorDefaults": { "w": 1, "j": false, "wtimeout": 0 },
            })
        );
    }

    #[test]
    fn test_initiate_with_member_requires_set_name() {
        let client = Arc::new(FakeNode::default());
        let rs = ReplicaSet::new(
            client,
            ReplicaSetTarget::Initiated {
                set_name: None,
                member: Some(MemberSpec::new("db1")),
            },
        );
        assert!(rs.apply(&mut ctx()).is_err());
    }
}
