/// Classification and event emission command handlers
use anyhow::Result;
use std::sync::Arc;
use zonein_core::{classify_tab, load_engine, AppContext, TabSignal, TransportOptions};
use zonein_storage::{Database, NO_TAB_ID};

use super::helpers::or_dash;

pub fn handle_classify_command(db: &Database, url: &str, json: bool) -> Result<()> {
    let engine = load_engine(db)?;
    let tab = classify_tab(&engine, url);

    if json {
        println!("{}", serde_json::to_string_pretty(&tab)?);
        return Ok(());
    }

    println!("URL:            {}", tab.url);
    println!("Host:           {}", or_dash(tab.host.as_deref()));
    println!("Path:           {}", or_dash(tab.path.as_deref()));
    println!("Classification: {}", tab.classification);
    println!(
        "Rule:           {}",
        tab.rule_id.as_deref().unwrap_or("(default)")
    );
    Ok(())
}

/// Classify a URL as a tab signal, record it, and deliver it with the configured transport
pub async fn handle_emit_command(
    db: Arc<Database>,
    options: TransportOptions,
    signal: TabSignal,
) -> Result<()> {
    let ctx = AppContext::open(db, options)?;

    let Some(emission) = ctx.observe(signal).await else {
        println!("Monitoring is paused; nothing was recorded");
        return Ok(());
    };

    println!("{}", serde_json::to_string_pretty(&emission.event)?);
    let outcome = emission.delivery.await?;
    match outcome.error {
        None => println!("Delivered"),
        Some(error) => println!("Recorded locally, delivery failed: {error}"),
    }

    ctx.shutdown().await;
    Ok(())
}

/// Build a tab signal from CLI arguments
pub fn tab_signal(url: String, tab_id: Option<i64>, title: Option<String>) -> TabSignal {
    TabSignal {
        url,
        tab_id: tab_id.unwrap_or(NO_TAB_ID),
        title,
    }
}
