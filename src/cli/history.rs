use super::ui;
use crate::core::asset::{AssetClass, USD};
use crate::core::history::Resolution;
use crate::exchange::Exchange;
use crate::query::{HistoryQueryService, HistorySeries};
use anyhow::Result;
use chrono::Utc;
use comfy_table::Cell;

impl HistorySeries {
    pub fn display_as_table(&self) -> String {
        let mut output = format!(
            "{} {} ({}, {})\n\n",
            ui::style_text(&self.symbol, ui::StyleType::Title),
            self.asset_class,
            self.resolution,
            ui::style_text(&self.currency, ui::StyleType::Label),
        );
        if self.points.is_empty() {
            output.push_str(&ui::style_text("No history recorded yet", ui::StyleType::Subtle));
            return output;
        }

        let mut table = ui::new_styled_table();
        if self.resolution == Resolution::Raw {
            table.set_header(vec![ui::header_cell("Time"), ui::header_cell("Price")]);
            for point in &self.points {
                table.add_row(vec![
                    Cell::new(point.timestamp.format("%Y-%m-%d %H:%M:%S")),
                    ui::number_cell(point.price),
                ]);
            }
        } else {
            table.set_header(vec![
                ui::header_cell("Start"),
                ui::header_cell("Open"),
                ui::header_cell("Min"),
                ui::header_cell("Max"),
                ui::header_cell("Close"),
                ui::header_cell("Avg"),
                ui::header_cell("Samples"),
                ui::header_cell(""),
            ]);
            let format = match self.resolution {
                Resolution::Daily => "%Y-%m-%d",
                _ => "%Y-%m-%d %H:%M",
            };
            for point in &self.points {
                table.add_row(vec![
                    Cell::new(point.timestamp.format(format)),
                    ui::number_cell(point.open),
                    ui::number_cell(point.min),
                    ui::number_cell(point.max),
                    ui::number_cell(point.close),
                    ui::number_cell(point.price),
                    ui::number_cell(point.sample_count as f64),
                    Cell::new(if point.partial { "open" } else { "" }),
                ]);
            }
        }
        output.push_str(&table.to_string());
        output
    }
}

pub async fn run(
    exchange: &Exchange,
    service: &HistoryQueryService,
    symbol: &str,
    asset_class: AssetClass,
    resolution: Resolution,
    currency: &str,
) -> Result<()> {
    // history is stored in USD; any other target needs current rates
    if !currency.eq_ignore_ascii_case(USD) {
        super::rates::refresh_with_progress(exchange).await;
    }
    let series = service
        .get_history(symbol, asset_class, resolution, currency, Utc::now())
        .await?;
    println!("{}", series.display_as_table());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::HistoryPoint;
    use chrono::TimeZone;

    fn series(resolution: Resolution, points: Vec<HistoryPoint>) -> HistorySeries {
        HistorySeries {
            symbol: "BTC".to_string(),
            asset_class: AssetClass::Crypto,
            resolution,
            currency: "EUR".to_string(),
            points,
        }
    }

    #[test]
    fn test_empty_series_display() {
        let output = series(Resolution::Hourly, vec![]).display_as_table();
        assert!(output.contains("BTC"));
        assert!(output.contains("No history recorded yet"));
    }

    #[test]
    fn test_bucket_series_display() {
        let point = HistoryPoint {
            timestamp: Utc.with_ymd_and_hms(2025, 3, 14, 12, 0, 0).unwrap(),
            price: 101.5,
            min: 100.25,
            max: 103.0,
            open: 100.5,
            close: 102.75,
            sample_count: 42,
            partial: true,
        };
        let output = series(Resolution::Hourly, vec![point]).display_as_table();
        assert!(output.contains("2025-03-14 12:00"));
        assert!(output.contains("100.25"));
        assert!(output.contains("42"));
        assert!(output.contains("open"));
    }
}
