pub mod db;
pub mod migrations;
pub mod models;

pub use db::{keys, Database};
pub use models::{
    Classification, Event, Rule, RuleType, RuleUpdate, RuleValidationError, TransportMode,
    NO_TAB_ID,
};
