use super::ui;
use crate::aggregation::{AggregationJob, AggregationReport};
use crate::core::config::HistoryConfig;
use crate::core::store::PriceStore;
use anyhow::{Result, bail};
use chrono::Utc;
use comfy_table::Cell;
use std::sync::Arc;

impl AggregationReport {
    pub fn display_as_table(&self) -> String {
        let mut table = ui::new_styled_table();
        table.set_header(vec![
            ui::header_cell("Tier"),
            ui::header_cell("Buckets"),
            ui::header_cell("Written"),
            ui::header_cell("Purged"),
        ]);
        table.add_row(vec![
            Cell::new("raw"),
            Cell::new("-"),
            Cell::new("-"),
            Cell::new(self.raw_purged),
        ]);
        table.add_row(vec![
            Cell::new("hourly"),
            Cell::new(self.hourly_examined),
            Cell::new(self.hourly_written),
            Cell::new(self.hourly_purged),
        ]);
        table.add_row(vec![
            Cell::new("daily"),
            Cell::new(self.daily_examined),
            Cell::new(self.daily_written),
            Cell::new("-"),
        ]);
        table.to_string()
    }
}

/// One aggregation pass over the configured store.
pub async fn run(
    store: Option<Arc<dyn PriceStore>>,
    config: &HistoryConfig,
    backfill: bool,
) -> Result<()> {
    let Some(store) = store else {
        bail!("Price history is disabled in the configuration");
    };
    let job = AggregationJob::new(store, config);
    match job.trigger(Utc::now(), backfill).await {
        Some(report) => {
            let report = report?;
            println!(
                "{}\n\n{}",
                ui::style_text("Aggregation", ui::StyleType::Title),
                report.display_as_table()
            );
        }
        None => println!(
            "{}",
            ui::style_text("Aggregation already running", ui::StyleType::Subtle)
        ),
    }
    Ok(())
}
