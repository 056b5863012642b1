use super::ui;
use crate::aggregate::Aggregator;
use crate::core::{AggregateResult, CurrencyCode};
use anyhow::Result;
use comfy_table::Cell;

impl AggregateResult {
    pub fn display_as_table(&self) -> String {
        let mut table = ui::new_styled_table();

        let mut header = vec![ui::header_cell("Source")];
        header.extend(
            CurrencyCode::ALL
                .iter()
                .map(|code| ui::header_cell(&format!("{code} (buy / sell)"))),
        );
        header.push(ui::header_cell("Status"));
        table.set_header(header);

        for result in &self.results {
            let mut row = vec![Cell::new(&result.source_name)];
            row.extend(CurrencyCode::ALL.iter().map(|code| {
                ui::format_optional_cell(result.quotes.get(code), |q| {
                    format!("{} / {}", q.buy, q.sell)
                })
            }));
            row.push(ui::status_cell(result.is_success()));
            table.add_row(row);
        }

        let mut output = format!(
            "{}\n\n",
            ui::style_text("Exchange Rates", ui::StyleType::Title)
        );
        output.push_str(&table.to_string());

        let failures: Vec<String> = self
            .results
            .iter()
            .filter_map(|r| {
                r.error_detail
                    .as_ref()
                    .map(|detail| format!("  {}: {}", r.source_name, detail))
            })
            .collect();
        if !failures.is_empty() {
            output.push_str("\n\n");
            output.push_str(&ui::style_text(&failures.join("\n"), ui::StyleType::Error));
        }

        output.push_str(&format!(
            "\n\n{} of {} sources succeeded {}",
            self.success_count(),
            self.results.len(),
            ui::style_text(
                &format!("(at {})", self.observed_at.format("%Y-%m-%d %H:%M:%S UTC")),
                ui::StyleType::Subtle
            )
        ));
        output
    }
}

/// One-shot aggregation printed as a table.
pub async fn run(aggregator: &dyn Aggregator) -> Result<()> {
    let pb = ui::new_spinner("Fetching rates...");
    let result = aggregator.aggregate().await;
    pb.finish_and_clear();

    println!("{}", result?.display_as_table());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Quote, QuoteMap, SourceResult};
    use rust_decimal_macros::dec;

    #[test]
    fn test_table_lists_every_source() {
        console::set_colors_enabled(false);
        let quote = Quote::new(CurrencyCode::EUR, dec!(48.8450), dec!(49.1100)).unwrap();
        let aggregate = AggregateResult::new(vec![
            SourceResult::success(
                "Harem Altın",
                "https://www.haremaltin.com/?lang=en",
                QuoteMap::from([(CurrencyCode::EUR, quote)]),
            ),
            SourceResult::failed("Çarşı Döviz", "https://carsidoviz.com", "NoQuotesExtracted"),
        ]);

        let output = aggregate.display_as_table();
        assert!(output.contains("Harem Altın"));
        assert!(output.contains("48.8450 / 49.1100"));
        assert!(output.contains("Çarşı Döviz: NoQuotesExtracted"));
        assert!(output.contains("1 of 2 sources succeeded"));
    }
}
