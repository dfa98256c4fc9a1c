/// Monitoring toggle command handlers
use anyhow::Result;
use clap::Subcommand;
use zonein_storage::Database;

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum MonitorAction {
    /// Resume classifying tab activity
    On,
    /// Pause classification; nothing is recorded or sent
    Off,
    /// Show whether monitoring is enabled
    Status,
}

pub fn handle_monitor_command(db: &Database, action: MonitorAction) -> Result<()> {
    match action {
        MonitorAction::On => {
            db.set_monitoring_enabled(true)?;
            println!("Monitoring enabled");
        }
        MonitorAction::Off => {
            db.set_monitoring_enabled(false)?;
            println!("Monitoring paused");
        }
        MonitorAction::Status => {
            let status = if db.get_monitoring_enabled()? {
                "ACTIVE"
            } else {
                "PAUSED"
            };
            println!("Monitoring: {status}");
        }
    }
    Ok(())
}
