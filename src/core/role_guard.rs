//! RoleGuard: path-prefix authorization rules with hot reload.
//!
//! Rules live in a YAML or JSON document:
//!
//! ```yaml
//! rules:
//!   /admin: admin                      # one role
//!   /ops: [ops, admin]                 # any of these roles
//!   /reports:
//!     scopes: [reports.read, reports.write]
//!     scopes_mode: all
//!     methods: [GET]
//!   /internal:
//!     deny: true
//! ```
//!
//! The active set sits behind an [`ArcSwap`]; a reload parses the whole
//! document first and swaps it in at once, so evaluation never sees a mix of
//! old and new rules.
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use arc_swap::ArcSwap;
use http::Method;
use serde::{Deserialize, Serialize};
use tokio::{sync::Mutex, task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    core::path_match::matches_prefix,
    metrics::{GatewayMetrics, ROLEGUARD_ACTIVE_RULES, ROLEGUARD_RELOADS_TOTAL},
    ports::token_validator::AdminClaims,
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Access requirement attached to a path prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRequirement {
    pub roles: BTreeSet<String>,
    pub scopes: BTreeSet<String>,
    pub require_all_scopes: bool,
    /// Upper-case method names; empty applies the rule to every method.
    pub methods: BTreeSet<String>,
    pub deny: bool,
}

impl RoleRequirement {
    pub fn applies_to(&self, method: &Method) -> bool {
        self.methods.is_empty() || self.methods.contains(method.as_str())
    }

    /// Roles and scopes are alternatives; a rule naming neither only needs
    /// an authenticated caller.
    pub fn is_satisfied_by(&self, claims: &AdminClaims) -> bool {
        if self.roles.is_empty() && self.scopes.is_empty() {
            return true;
        }
        let role_ok = claims
            .role
            .as_ref()
            .is_some_and(|role| self.roles.contains(role));
        let scopes_ok = if self.scopes.is_empty() {
            false
        } else if self.require_all_scopes {
            self.scopes.is_subset(&claims.scopes)
        } else {
            !self.scopes.is_disjoint(&claims.scopes)
        };
        role_ok || scopes_ok
    }
}

pub type RuleSet = BTreeMap<String, RoleRequirement>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    Unauthorized,
    Forbidden,
}

#[derive(Deserialize, Default)]
struct RuleDocument {
    #[serde(default)]
    rules: BTreeMap<String, RawRule>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRule {
    Role(String),
    Roles(Vec<String>),
    Detailed(DetailedRule),
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct DetailedRule {
    roles: Option<OneOrMany>,
    scopes: Option<OneOrMany>,
    scopes_mode: Option<String>,
    require_all_scopes: Option<bool>,
    methods: Vec<String>,
    deny: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_set(self) -> BTreeSet<String> {
        match self {
            OneOrMany::One(value) => BTreeSet::from([value]),
            OneOrMany::Many(values) => values.into_iter().collect(),
        }
    }
}

impl TryFrom<RawRule> for RoleRequirement {
    type Error = String;

    fn try_from(raw: RawRule) -> Result<Self, Self::Error> {
        let detailed = match raw {
            RawRule::Role(role) => {
                return Ok(Self {
                    roles: BTreeSet::from([role]),
                    ..Self::default()
                });
            }
            RawRule::Roles(roles) => {
                return Ok(Self {
                    roles: roles.into_iter().collect(),
                    ..Self::default()
                });
            }
            RawRule::Detailed(detailed) => detailed,
        };

        let mode_all = match detailed.scopes_mode.as_deref().map(str::to_ascii_lowercase) {
            None => false,
            Some(mode) if mode == "all" => true,
            Some(mode) if mode == "any" => false,
            Some(other) => return Err(format!("unknown scopes_mode '{other}'")),
        };

        Ok(Self {
            roles: detailed.roles.map(OneOrMany::into_set).unwrap_or_default(),
            scopes: detailed.scopes.map(OneOrMany::into_set).unwrap_or_default(),
            require_all_scopes: detailed.require_all_scopes.unwrap_or(mode_all),
            methods: detailed
                .methods
                .iter()
                .map(|m| m.trim().to_ascii_uppercase())
                .filter(|m| !m.is_empty())
                .collect(),
            deny: detailed.deny,
        })
    }
}

/// Parse a rule document. Blank content is an empty rule set.
pub fn parse_rules(content: &str) -> Result<RuleSet, String> {
    if content.trim().is_empty() {
        return Ok(RuleSet::new());
    }
    let document: RuleDocument = serde_yaml::from_str(content).map_err(|e| e.to_string())?;
    document
        .rules
        .into_iter()
        .map(|(prefix, raw)| {
            if !prefix.starts_with('/') {
                return Err(format!("rule prefix '{prefix}' must start with '/'"));
            }
            let requirement =
                RoleRequirement::try_from(raw).map_err(|e| format!("rule '{prefix}': {e}"))?;
            Ok((prefix, requirement))
        })
        .collect()
}

pub struct RoleGuardStore {
    rules: ArcSwap<RuleSet>,
    source: Option<PathBuf>,
    // Last content seen on disk, parsed or not, so a broken file is reported once.
    last_raw: Mutex<Option<String>>,
}

impl RoleGuardStore {
    /// A fixed rule set with no backing file; `reload` always reports unchanged.
    pub fn from_rules(rules: RuleSet) -> Self {
        Self {
            rules: ArcSwap::from_pointee(rules),
            source: None,
            last_raw: Mutex::new(None),
        }
    }

    /// Load rules from `path`. A missing or broken file starts with no rules
    /// and is picked up by later reloads.
    pub async fn from_path(path: impl AsRef<Path>) -> Self {
        let store = Self {
            rules: ArcSwap::from_pointee(RuleSet::new()),
            source: Some(path.as_ref().to_path_buf()),
            last_raw: Mutex::new(None),
        };
        store.reload().await;
        store
    }

    pub fn rules(&self) -> Arc<RuleSet> {
        self.rules.load_full()
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Re-read the source. Returns `true` only when a new, valid rule set
    /// was swapped in.
    pub async fn reload(&self) -> bool {
        let Some(path) = &self.source else {
            return false;
        };
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("RoleGuard config {} not present", path.display());
                return false;
            }
            Err(e) => {
                tracing::warn!("Failed to read RoleGuard config {}: {}", path.display(), e);
                return false;
            }
        };

        let mut last_raw = self.last_raw.lock().await;
        if last_raw.as_deref() == Some(raw.as_str()) {
            return false;
        }
        let parsed = parse_rules(&raw);
        *last_raw = Some(raw);
        drop(last_raw);

        match parsed {
            Ok(rules) => {
                tracing::info!(
                    "Loaded {} RoleGuard rules from {}",
                    rules.len(),
                    path.display()
                );
                self.rules.store(Arc::new(rules));
                true
            }
            Err(e) => {
                tracing::warn!(
                    "Ignoring invalid RoleGuard config {}, keeping previous rules: {}",
                    path.display(),
                    e
                );
                false
            }
        }
    }

    /// The longest prefix rule that matches `path` and applies to `method`.
    pub fn requirement_for(&self, method: &Method, path: &str) -> Option<(String, RoleRequirement)> {
        let rules = self.rules.load();
        rules
            .iter()
            .filter(|(prefix, rule)| rule.applies_to(method) && matches_prefix(path, prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(prefix, rule)| (prefix.clone(), rule.clone()))
    }

    pub fn evaluate(
        &self,
        claims: Option<&AdminClaims>,
        method: &Method,
        path: &str,
    ) -> GuardDecision {
        let Some((_, rule)) = self.requirement_for(method, path) else {
            return GuardDecision::Allow;
        };
        if rule.deny {
            return GuardDecision::Forbidden;
        }
        match claims {
            None => GuardDecision::Unauthorized,
            Some(claims) if rule.is_satisfied_by(claims) => GuardDecision::Allow,
            Some(_) => GuardDecision::Forbidden,
        }
    }
}

/// Poll the store's source every `interval` until `cancel` fires.
pub fn spawn_reloader(
    store: Arc<RoleGuardStore>,
    interval: Duration,
    cancel: CancellationToken,
    metrics: Arc<GatewayMetrics>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the initial load already ran.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if store.reload().await {
                        metrics.increment(ROLEGUARD_RELOADS_TOTAL).await;
                        metrics
                            .set(ROLEGUARD_ACTIVE_RULES, store.rules().len() as u64)
                            .await;
                    }
                }
            }
        }
        tracing::debug!("RoleGuard reloader stopped");
    })
}
