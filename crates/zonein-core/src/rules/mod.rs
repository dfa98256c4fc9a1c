
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use zonein_storage::{Classification, Rule, RuleType, RuleUpdate, RuleValidationError};

use crate::parser::parse_url;

/// Default rule file compiled into the binary
pub const BUNDLED_RULES: &str = include_str!("../../assets/rules.json");

/// Classification verdict plus the rule that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationResult {
    pub classification: Classification,
    /// `None` when the default classification applied
    pub rule_id: Option<String>,
}

/// Errors from importing a serialized rule set
#[derive(Debug, Error)]
pub enum RulesError {
    #[error("malformed rules JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("rules document must be a JSON object")]
    NotAnObject,
    #[error("invalid rule at position {index}: {source}")]
    InvalidRule {
        index: usize,
        #[source]
        source: RuleValidationError,
    },
}

/// Serialized form used by export/import and the bundled rule file
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RuleSetRef<'a> {
    rules: &'a [Rule],
    default_classification: Classification,
}

/// Lenient counterpart of `RuleSetRef`: missing or null fields fall back to defaults
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuleSetDocument {
    #[serde(default)]
    rules: Option<Vec<Rule>>,
    #[serde(default)]
    default_classification: Option<Classification>,
}

/// Generate a rule id: millisecond timestamp plus a random suffix
#[must_use]
pub fn generate_rule_id() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("rule-{}-{}", Utc::now().timestamp_millis(), &random[..9])
}

/// Ordered rule set evaluated in two passes
///
/// Path-contains rules are checked first, then domain rules. Within each pass
/// the first rule in list order wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RulesEngine {
    rules: Vec<Rule>,
    default_classification: Classification,
}

impl RulesEngine {
    #[must_use]
    pub fn new(rules: Vec<Rule>, default_classification: Classification) -> Self {
        Self {
            rules,
            default_classification,
        }
    }

    /// Engine built from the bundled default rule file
    ///
    /// # Errors
    ///
    /// Returns an error if the bundled file does not parse
    pub fn bundled() -> Result<Self, RulesError> {
        let mut engine = Self::default();
        engine.try_import_rules(BUNDLED_RULES)?;
        log::info!("Loaded {} bundled rules", engine.rules.len());
        Ok(engine)
    }

    #[must_use]
    pub fn default_classification(&self) -> Classification {
        self.default_classification
    }

    pub fn set_default_classification(&mut self, classification: Classification) {
        self.default_classification = classification;
    }

    /// Classify a URL; unparseable input gets the default classification
    #[must_use]
    pub fn classify(&self, url: &str) -> ClassificationResult {
        let parsed = match parse_url(url) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::debug!("{e}, using default classification");
                return self.default_result();
            }
        };

        let path_match = self.rules.iter().find(|rule| {
            rule.rule_type == RuleType::PathContains
                && rule.domain == parsed.host
                && rule
                    .path_pattern
                    .as_deref()
                    .is_some_and(|pattern| parsed.path.contains(pattern))
        });

        let matched = path_match.or_else(|| {
            self.rules
                .iter()
                .find(|rule| rule.rule_type == RuleType::Domain && rule.domain == parsed.host)
        });

        match matched {
            Some(rule) => {
                log::debug!(
                    "'{}' matched rule '{}' -> {}",
                    parsed.full,
                    rule.id,
                    rule.classification
                );
                ClassificationResult {
                    classification: rule.classification,
                    rule_id: Some(rule.id.clone()),
                }
            }
            None => self.default_result(),
        }
    }

    fn default_result(&self) -> ClassificationResult {
        ClassificationResult {
            classification: self.default_classification,
            rule_id: None,
        }
    }

    /// Append a rule (lowest precedence in its tier), assigning an id if it has none
    pub fn add_rule(&mut self, mut rule: Rule) -> String {
        if rule.id.is_empty() {
            rule.id = generate_rule_id();
        }
        let id = rule.id.clone();
        log::info!(
            "Added rule '{id}': {} {} -> {}",
            rule.rule_type,
            rule.domain,
            rule.classification
        );
        self.rules.push(rule);
        id
    }

    /// Merge fields into an existing rule, keeping its position
    pub fn update_rule(&mut self, rule_id: &str, update: RuleUpdate) -> bool {
        match self.rules.iter_mut().find(|rule| rule.id == rule_id) {
            Some(rule) => {
                rule.apply(update);
                true
            }
            None => false,
        }
    }

    /// Remove a rule by id
    pub fn delete_rule(&mut self, rule_id: &str) -> bool {
        match self.rules.iter().position(|rule| rule.id == rule_id) {
            Some(index) => {
                self.rules.remove(index);
                true
            }
            None => false,
        }
    }

    /// Copy of the rules in evaluation order
    #[must_use]
    pub fn list_rules(&self) -> Vec<Rule> {
        self.rules.clone()
    }

    #[must_use]
    pub fn get_rule(&self, rule_id: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.id == rule_id)
    }

    /// Serialize rules and default classification as pretty JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails
    pub fn export_rules(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&RuleSetRef {
            rules: &self.rules,
            default_classification: self.default_classification,
        })
    }

    /// Replace rules and default from an exported document
    ///
    /// Nothing changes unless the whole document is valid.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed, is not an object, or any rule
    /// fails validation
    pub fn try_import_rules(&mut self, json: &str) -> Result<(), RulesError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        if !value.is_object() {
            return Err(RulesError::NotAnObject);
        }
        let document: RuleSetDocument = serde_json::from_value(value)?;
        let mut rules = document.rules.unwrap_or_default();

        for (index, rule) in rules.iter_mut().enumerate() {
            rule.validate()
                .map_err(|source| RulesError::InvalidRule { index, source })?;
            if rule.id.is_empty() {
                rule.id = generate_rule_id();
            }
        }

        self.rules = rules;
        self.default_classification = document.default_classification.unwrap_or_default();
        Ok(())
    }

    /// `try_import_rules` reporting only success
    pub fn import_rules(&mut self, json: &str) -> bool {
        match self.try_import_rules(json) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to import rules: {e}");
                false
            }
        }
    }
}
