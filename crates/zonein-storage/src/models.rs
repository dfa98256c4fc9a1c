use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Verdict assigned to a URL
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Productive,
    #[default]
    Neutral,
    Distracting,
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Productive => write!(f, "productive"),
            Self::Neutral => write!(f, "neutral"),
            Self::Distracting => write!(f, "distracting"),
        }
    }
}

impl std::str::FromStr for Classification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "productive" => Ok(Self::Productive),
            "neutral" => Ok(Self::Neutral),
            "distracting" => Ok(Self::Distracting),
            _ => Err(format!("Unknown classification: {s}")),
        }
    }
}

/// Rule type - determines how a rule is matched against a parsed URL
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum RuleType {
    /// Exact host match (e.g., "twitter.com")
    Domain,
    /// Exact host match plus a path substring (e.g., "youtube.com" + "/shorts")
    PathContains,
}

impl std::fmt::Display for RuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Domain => write!(f, "domain"),
            Self::PathContains => write!(f, "path-contains"),
        }
    }
}

impl std::str::FromStr for RuleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "domain" => Ok(Self::Domain),
            "path-contains" | "path_contains" => Ok(Self::PathContains),
            _ => Err(format!("Unknown rule type: {s}")),
        }
    }
}

/// Reasons a rule is rejected by the editing surface
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleValidationError {
    #[error("rule domain must not be empty")]
    EmptyDomain,
    #[error("path-contains rule for '{0}' requires a non-empty path pattern")]
    MissingPathPattern(String),
}

/// User-editable classification rule
///
/// An empty `id` means "not assigned yet"; the rules engine fills it in when
/// the rule is added.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_pattern: Option<String>,
    pub classification: Classification,
}

impl Rule {
    /// Create a domain-wide rule without an id
    #[must_use]
    pub fn domain(domain: impl Into<String>, classification: Classification) -> Self {
        Self {
            id: String::new(),
            rule_type: RuleType::Domain,
            domain: domain.into(),
            path_pattern: None,
            classification,
        }
    }

    /// Create a path-scoped rule without an id
    #[must_use]
    pub fn path_contains(
        domain: impl Into<String>,
        path_pattern: impl Into<String>,
        classification: Classification,
    ) -> Self {
        Self {
            id: String::new(),
            rule_type: RuleType::PathContains,
            domain: domain.into(),
            path_pattern: Some(path_pattern.into()),
            classification,
        }
    }

    /// Set an explicit id
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Check the rule before it is inserted into a rule set
    ///
    /// # Errors
    ///
    /// Returns an error if the domain is empty, or if a path-contains rule
    /// has no path pattern.
    pub fn validate(&self) -> Result<(), RuleValidationError> {
        if self.domain.trim().is_empty() {
            return Err(RuleValidationError::EmptyDomain);
        }
        if self.rule_type == RuleType::PathContains
            && self.path_pattern.as_deref().map_or(true, str::is_empty)
        {
            return Err(RuleValidationError::MissingPathPattern(self.domain.clone()));
        }
        Ok(())
    }

    /// Merge a partial update into this rule
    pub fn apply(&mut self, update: RuleUpdate) {
        if let Some(rule_type) = update.rule_type {
            self.rule_type = rule_type;
        }
        if let Some(domain) = update.domain {
            self.domain = domain;
        }
        if let Some(path_pattern) = update.path_pattern {
            self.path_pattern = Some(path_pattern);
        }
        if let Some(classification) = update.classification {
            self.classification = classification;
        }
        if self.rule_type == RuleType::Domain {
            self.path_pattern = None;
        }
    }
}

/// Partial set of rule fields used by `update_rule`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RuleUpdate {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub rule_type: Option<RuleType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
}

impl RuleUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rule_type.is_none()
            && self.domain.is_none()
            && self.path_pattern.is_none()
            && self.classification.is_none()
    }
}

/// Tab id used when an event is not tied to a browser tab
pub const NO_TAB_ID: i64 = -1;

/// Immutable record of one classification decision
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Milliseconds since the Unix epoch
    #[serde(rename = "ts")]
    pub timestamp: i64,
    pub url: String,
    pub host: Option<String>,
    pub path: Option<String>,
    pub classification: Classification,
    pub rule_id: Option<String>,
    pub tab_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Delivery mechanism used to forward events off the browser
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Persistent length-prefixed channel to a native messaging host
    Native,
    /// POST to the loopback HTTP receiver
    #[default]
    Http,
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::Http => write!(f, "http"),
        }
    }
}

impl std::str::FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "native" => Ok(Self::Native),
            "http" => Ok(Self::Http),
            _ => Err(format!("Unknown transport mode: {s}")),
        }
    }
}
