use super::ui;
use crate::core::asset::AssetClass;
use crate::exchange::{Exchange, RefreshReport};
use anyhow::{Result, bail};
use comfy_table::Cell;
use futures::future::join_all;

/// Refreshes every configured class once, showing progress.
pub async fn refresh_with_progress(exchange: &Exchange) -> Vec<RefreshReport> {
    let classes = exchange.classes();
    let pb = ui::new_progress_bar(classes.len() as u64, true);
    pb.set_message("Fetching prices...");

    let refreshes = classes.into_iter().map(|class| {
        let pb_clone = pb.clone();
        async move {
            let report = exchange.refresh(class).await;
            pb_clone.inc(1);
            report
        }
    });
    let reports = join_all(refreshes).await;
    pb.finish_and_clear();
    reports
}

/// Rates from one unit of `base` to every known asset, optionally limited
/// to one class.
pub fn display_rates(exchange: &Exchange, base: &str, class: Option<AssetClass>) -> Result<String> {
    let base = base.to_uppercase();
    let snapshot = exchange.snapshot();
    let rates = snapshot.rates();
    if rates.class_of(&base).is_none() {
        bail!("Unknown asset: {}", base);
    }

    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Asset"),
        ui::header_cell("Type"),
        ui::header_cell(&format!("Per 1 {base}")),
        ui::header_cell("Sources"),
        ui::header_cell(""),
    ]);

    let mut rows = 0;
    for (asset, rate) in rates.rates_from(&base) {
        let Some(asset_class) = rates.class_of(&asset) else {
            continue;
        };
        if asset == base || class.is_some_and(|c| c != asset_class) {
            continue;
        }
        let consensus = snapshot.consensus(&asset);
        let sources = consensus
            .map(|c| c.sources.join(", "))
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(&asset),
            Cell::new(asset_class),
            ui::number_cell(rate),
            Cell::new(sources),
            ui::stale_cell(consensus.is_some_and(|c| c.stale)),
        ]);
        rows += 1;
    }

    let mut output = format!("Rates for {}\n\n", ui::style_text(&base, ui::StyleType::Title));
    if rows == 0 {
        output.push_str(&ui::style_text("No rates available", ui::StyleType::Subtle));
    } else {
        output.push_str(&table.to_string());
    }
    Ok(output)
}

fn display_failures(reports: &[RefreshReport]) -> Option<String> {
    let failed: Vec<String> = reports
        .iter()
        .filter(|r| r.sources_failed > 0)
        .map(|r| format!("{}: {} source(s) failed", r.class, r.sources_failed))
        .collect();
    if failed.is_empty() {
        return None;
    }
    Some(ui::style_text(&failed.join("\n"), ui::StyleType::Error))
}

pub async fn run(exchange: &Exchange, base: &str, class: Option<AssetClass>) -> Result<()> {
    let reports = refresh_with_progress(exchange).await;
    println!("{}", display_rates(exchange, base, class)?);
    if let Some(failures) = display_failures(&reports) {
        println!("\n{failures}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::tests::{StaticSource, exchange};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_display_rates() {
        let ex = exchange(vec![
            Arc::new(StaticSource::new("a", AssetClass::Crypto, &[("BTC", 100.0)])),
            Arc::new(StaticSource::new("fx", AssetClass::Currency, &[("EUR", 2.0)])),
        ]);
        refresh_with_progress(&ex).await;

        let output = display_rates(&ex, "eur", None).unwrap();
        assert!(output.contains("Per 1 EUR"));
        assert!(output.contains("BTC"));
        assert!(output.contains("0.02"));
        assert!(output.contains("USD"));

        let crypto_only = display_rates(&ex, "USD", Some(AssetClass::Crypto)).unwrap();
        assert!(crypto_only.contains("BTC"));
        assert!(!crypto_only.contains("EUR"));
    }

    #[tokio::test]
    async fn test_unknown_base_is_an_error() {
        let ex = exchange(vec![]);
        let err = display_rates(&ex, "XYZ", None).unwrap_err();
        assert_eq!(err.to_string(), "Unknown asset: XYZ");
    }

    #[test]
    fn test_display_failures() {
        let report = |failed| RefreshReport {
            class: AssetClass::Metal,
            sources_ok: 1,
            sources_failed: failed,
            fresh: 1,
            stale: 0,
        };
        assert!(display_failures(&[report(0)]).is_none());
        assert!(display_failures(&[report(2)]).unwrap().contains("metal: 2 source(s) failed"));
    }
}
