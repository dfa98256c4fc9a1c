//! Classification engine and event delivery for ZoneIn.
//!
//! [`AppContext`] ties the pieces together: it classifies tab signals with the
//! [`RulesEngine`], keeps a short history, and hands events to the
//! [`Transport`] for best-effort delivery to a local receiver.

pub mod app;
pub mod framing;
pub mod parser;
pub mod rules;
pub mod transport;

pub use app::{
    classify_tab, load_engine, save_engine, AppContext, Emission, SettingChange, TabClassification,
    TabSignal, DEFAULT_HISTORY_QUERY, HISTORY_LIMIT,
};
pub use parser::{parse_url, ParseError, ParsedUrl};
pub use rules::{generate_rule_id, ClassificationResult, RulesEngine, RulesError, BUNDLED_RULES};
pub use transport::{SendOutcome, Transport, TransportError, TransportOptions, TransportState};
