/// Event history command handler
use anyhow::Result;
use tabled::{Table, Tabled};
use zonein_storage::{Database, Event, NO_TAB_ID};

use super::helpers::{format_timestamp, or_dash, truncate_str};

const URL_WIDTH: usize = 50;

#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Classification")]
    classification: String,
    #[tabled(rename = "Host")]
    host: String,
    #[tabled(rename = "URL")]
    url: String,
    #[tabled(rename = "Rule")]
    rule: String,
    #[tabled(rename = "Tab")]
    tab: String,
}

impl From<&Event> for HistoryRow {
    fn from(event: &Event) -> Self {
        Self {
            time: format_timestamp(event.timestamp),
            classification: event.classification.to_string(),
            host: or_dash(event.host.as_deref()),
            url: truncate_str(&event.url, URL_WIDTH),
            rule: or_dash(event.rule_id.as_deref()),
            tab: if event.tab_id == NO_TAB_ID {
                "-".to_string()
            } else {
                event.tab_id.to_string()
            },
        }
    }
}

pub fn handle_history_command(db: &Database, limit: usize, clear: bool) -> Result<()> {
    if clear {
        let removed = db.clear_history()?;
        println!("Cleared {removed} events");
        return Ok(());
    }

    let events = db.recent_history(limit)?;
    if events.is_empty() {
        println!("No events recorded yet");
        return Ok(());
    }

    let rows: Vec<HistoryRow> = events.iter().map(HistoryRow::from).collect();
    println!("{}", Table::new(rows));
    Ok(())
}
