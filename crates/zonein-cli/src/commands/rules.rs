/// Rule management command handlers
use anyhow::{bail, Context, Result};
use clap::Subcommand;
use std::fs;
use std::path::PathBuf;
use tabled::{Table, Tabled};
use zonein_core::{load_engine, save_engine, RulesEngine};
use zonein_storage::{Classification, Database, Rule, RuleType, RuleUpdate};

use super::helpers::or_dash;

#[derive(Subcommand, Debug)]
pub enum RulesAction {
    /// List all rules in evaluation order
    List,
    /// Add a rule
    Add {
        /// Exact host to match (e.g. www.youtube.com)
        domain: String,
        /// productive, neutral or distracting
        classification: Classification,
        /// Rule type: domain or path-contains
        #[arg(short = 't', long = "type", default_value = "domain")]
        rule_type: RuleType,
        /// Path substring, required for path-contains rules
        #[arg(short, long)]
        path: Option<String>,
        /// Explicit rule id (generated when omitted)
        #[arg(long)]
        id: Option<String>,
    },
    /// Change fields of an existing rule
    Update {
        id: String,
        #[arg(short = 't', long = "type")]
        rule_type: Option<RuleType>,
        #[arg(short, long)]
        domain: Option<String>,
        #[arg(short, long)]
        path: Option<String>,
        #[arg(short, long)]
        classification: Option<Classification>,
    },
    /// Delete a rule by id
    Delete { id: String },
    /// Print the rule set as JSON, or write it to a file
    Export {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replace all rules from a JSON file
    Import { file: PathBuf },
    /// Restore the bundled default rules
    Reset,
    /// Show or set the classification used when no rule matches
    #[command(name = "default")]
    Fallback { classification: Option<Classification> },
}

#[derive(Tabled)]
struct RuleRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Type")]
    rule_type: String,
    #[tabled(rename = "Domain")]
    domain: String,
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Classification")]
    classification: String,
}

impl From<&Rule> for RuleRow {
    fn from(rule: &Rule) -> Self {
        Self {
            id: rule.id.clone(),
            rule_type: rule.rule_type.to_string(),
            domain: rule.domain.clone(),
            path: or_dash(rule.path_pattern.as_deref()),
            classification: rule.classification.to_string(),
        }
    }
}

pub fn handle_rules_command(db: &Database, action: RulesAction) -> Result<()> {
    let mut engine = load_engine(db)?;

    match action {
        RulesAction::List => list_rules(&engine),
        RulesAction::Add {
            domain,
            classification,
            rule_type,
            path,
            id,
        } => {
            let rule = Rule {
                id: id.unwrap_or_default(),
                rule_type,
                domain,
                path_pattern: path,
                classification,
            };
            rule.validate()?;
            if !rule.id.is_empty() && engine.get_rule(&rule.id).is_some() {
                bail!("A rule with id '{}' already exists", rule.id);
            }

            let id = engine.add_rule(rule);
            save_engine(db, &engine)?;
            println!("Added rule {id}");
        }
        RulesAction::Update {
            id,
            rule_type,
            domain,
            path,
            classification,
        } => {
            let update = RuleUpdate {
                rule_type,
                domain,
                path_pattern: path,
                classification,
            };
            if update.is_empty() {
                println!("Nothing to update");
                return Ok(());
            }

            let Some(existing) = engine.get_rule(&id) else {
                bail!("No rule with id '{id}'");
            };
            let mut updated = existing.clone();
            updated.apply(update.clone());
            updated.validate()?;

            engine.update_rule(&id, update);
            save_engine(db, &engine)?;
            println!("Updated rule {id}");
        }
        RulesAction::Delete { id } => {
            if !engine.delete_rule(&id) {
                bail!("No rule with id '{id}'");
            }
            save_engine(db, &engine)?;
            println!("Deleted rule {id}");
        }
        RulesAction::Export { output } => {
            let json = engine.export_rules()?;
            match output {
                Some(path) => {
                    fs::write(&path, json)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Exported {} rules to {}", engine.list_rules().len(), path.display());
                }
                None => println!("{json}"),
            }
        }
        RulesAction::Import { file } => {
            let json = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            engine
                .try_import_rules(&json)
                .context("Import failed, existing rules kept")?;
            save_engine(db, &engine)?;
            println!("Imported {} rules", engine.list_rules().len());
        }
        RulesAction::Reset => {
            let engine = RulesEngine::bundled()?;
            save_engine(db, &engine)?;
            println!("Restored {} default rules", engine.list_rules().len());
        }
        RulesAction::Fallback { classification } => match classification {
            Some(classification) => {
                engine.set_default_classification(classification);
                save_engine(db, &engine)?;
                println!("Default classification set to {classification}");
            }
            None => println!("Default classification: {}", engine.default_classification()),
        },
    }

    Ok(())
}

fn list_rules(engine: &RulesEngine) {
    let rules = engine.list_rules();
    if rules.is_empty() {
        println!("No rules configured");
    } else {
        let rows: Vec<RuleRow> = rules.iter().map(RuleRow::from).collect();
        println!("{}", Table::new(rows));
    }
    println!(
        "\nUnmatched URLs are classified as {}",
        engine.default_classification()
    );
}
