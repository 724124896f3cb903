use super::ui;
use crate::core::config::ScheduleConfig;
use crate::scheduler;
use crate::sync::{RateSync, SyncReport};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

pub fn format_report(report: &SyncReport) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Updated"),
        ui::header_cell("Unchanged"),
        ui::header_cell("Inactive"),
        ui::header_cell("Failed"),
    ]);
    table.add_row(vec![
        ui::number_cell(report.updated.to_string()),
        ui::number_cell(report.unchanged.to_string()),
        ui::number_cell(report.skipped.to_string()),
        ui::number_cell(report.failed.to_string()),
    ]);
    table.to_string()
}

/// Runs the scheduled job once and prints what it did.
pub async fn run(service: &RateSync) -> Result<()> {
    let report = service.run_scheduled().await?;
    println!("{}", format_report(&report));
    if report.failed > 0 {
        println!(
            "{}",
            ui::style_text(
                &format!("{} source(s) failed, see log for details", report.failed),
                ui::StyleType::Error
            )
        );
    }
    Ok(())
}

/// Manual connection test; a failure is reported to the user and returned.
pub async fn test(service: &RateSync, name: &str) -> Result<()> {
    match service.test_connection_by_name(name).await {
        Ok(report) if report.skipped > 0 => {
            println!(
                "{}",
                ui::style_text(
                    &format!("Source '{name}' is inactive, nothing was called"),
                    ui::StyleType::Subtle
                )
            );
            Ok(())
        }
        Ok(report) => {
            let message = if report.updated > 0 {
                format!("Connection to '{name}' succeeded, rate updated")
            } else {
                format!("Connection to '{name}' succeeded, response had no sell_price")
            };
            println!("{}", ui::style_text(&message, ui::StyleType::Success));
            Ok(())
        }
        Err(e) => {
            println!("{}", ui::style_text(&e.to_string(), ui::StyleType::Error));
            Err(e.into())
        }
    }
}

/// Starts the daily scheduler and blocks until Ctrl-C.
pub async fn serve(service: Arc<RateSync>, schedule: &ScheduleConfig) -> Result<()> {
    let mut scheduler = scheduler::build_scheduler(service, schedule).await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down scheduler");
    scheduler
        .shutdown()
        .await
        .context("Failed to shut down scheduler")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_report_lists_counts() {
        let report = SyncReport {
            updated: 2,
            unchanged: 1,
            skipped: 3,
            failed: 4,
        };
        let output = format_report(&report);
        for expected in ["Updated", "Failed", "2", "1", "3", "4"] {
            assert!(output.contains(expected), "missing {expected}");
        }
    }
}
