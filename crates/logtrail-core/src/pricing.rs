//! Model pricing consumed when a transcript logs no explicit cost.

use chrono::{DateTime, NaiveDate, Utc};
use logtrail_sessions::TokenUsage;
use serde::Serialize;

const PER_MILLION: f64 = 1_000_000.0;

/// Per-model rates in USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPrice {
    pub input_rate: f64,
    pub output_rate: f64,
    pub cache_write_rate: f64,
    pub cache_read_rate: f64,
}

impl ModelPrice {
    pub const fn new(input_rate: f64, output_rate: f64, cache_write_rate: f64, cache_read_rate: f64) -> Self {
        Self {
            input_rate,
            output_rate,
            cache_write_rate,
            cache_read_rate,
        }
    }

    /// Cost in USD of `tokens` at these rates.
    pub fn cost(&self, tokens: &TokenUsage) -> f64 {
        (tokens.input_tokens as f64 * self.input_rate
            + tokens.output_tokens as f64 * self.output_rate
            + tokens.cache_write_tokens as f64 * self.cache_write_rate
            + tokens.cache_read_tokens as f64 * self.cache_read_rate)
            / PER_MILLION
    }
}

/// Price lookup keyed by model and point in time, so old sessions are
/// costed at the rates that applied when they ran.
pub trait PricingLookup: Send + Sync {
    fn get_price(&self, model: &str, as_of: DateTime<Utc>) -> Option<ModelPrice>;
}

/// One row of a pricing table.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceEntry {
    /// Matches any model id starting with this prefix.
    pub model_prefix: String,
    pub effective_from: NaiveDate,
    pub price: ModelPrice,
}

impl PriceEntry {
    pub fn new(model_prefix: &str, effective_from: NaiveDate, price: ModelPrice) -> Self {
        Self {
            model_prefix: model_prefix.to_string(),
            effective_from,
            price,
        }
    }
}

/// In-memory pricing table.
///
/// The longest matching prefix wins; among its rows the latest one effective
/// at the requested time is used, falling back to the earliest row for
/// timestamps that predate the table.
#[derive(Debug, Clone, Default)]
pub struct StaticPricing {
    entries: Vec<PriceEntry>,
}

impl StaticPricing {
    pub fn new(entries: Vec<PriceEntry>) -> Self {
        Self { entries }
    }

    /// Published Anthropic rates.
    pub fn builtin() -> Self {
        let date = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN);
        let opus_legacy = ModelPrice::new(15.0, 75.0, 18.75, 1.5);
        let opus = ModelPrice::new(5.0, 25.0, 6.25, 0.5);
        let sonnet = ModelPrice::new(3.0, 15.0, 3.75, 0.3);
        let haiku = ModelPrice::new(1.0, 5.0, 1.25, 0.1);

        Self::new(vec![
            PriceEntry::new("claude-3-opus", date(2024, 3, 4), opus_legacy),
            PriceEntry::new("claude-3-haiku", date(2024, 3, 7), ModelPrice::new(0.25, 1.25, 0.3, 0.03)),
            PriceEntry::new("claude-3-5-haiku", date(2024, 10, 22), ModelPrice::new(0.8, 4.0, 1.0, 0.08)),
            PriceEntry::new("claude-3-5-sonnet", date(2024, 6, 20), sonnet),
            PriceEntry::new("claude-3-7-sonnet", date(2025, 2, 24), sonnet),
            PriceEntry::new("claude-opus-4", date(2025, 5, 22), opus_legacy),
            PriceEntry::new("claude-opus-4-5", date(2025, 11, 24), opus),
            PriceEntry::new("claude-opus-4-6", date(2026, 2, 5), opus),
            PriceEntry::new("claude-sonnet-4", date(2025, 5, 22), sonnet),
            PriceEntry::new("claude-haiku-4-5", date(2025, 10, 15), haiku),
        ])
    }
}

impl PricingLookup for StaticPricing {
    fn get_price(&self, model: &str, as_of: DateTime<Utc>) -> Option<ModelPrice> {
        let prefix_len = self
            .entries
            .iter()
            .filter(|e| model.starts_with(e.model_prefix.as_str()))
            .map(|e| e.model_prefix.len())
            .max()?;

        let mut rows: Vec<&PriceEntry> = self
            .entries
            .iter()
            .filter(|e| e.model_prefix.len() == prefix_len && model.starts_with(e.model_prefix.as_str()))
            .collect();
        rows.sort_by_key(|e| e.effective_from);

        let day = as_of.date_naive();
        rows.iter()
            .rev()
            .find(|e| e.effective_from <= day)
            .or_else(|| rows.first())
            .map(|e| e.price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_cost_per_million() {
        let price = ModelPrice::new(3.0, 15.0, 3.75, 0.3);
        let tokens = TokenUsage {
            input_tokens: 1_000_000,
            output_tokens: 100_000,
            cache_write_tokens: 0,
            cache_read_tokens: 1_000_000,
        };
        assert!((price.cost(&tokens) - 4.8).abs() < 1e-9);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let pricing = StaticPricing::builtin();
        let opus_45 = pricing.get_price("claude-opus-4-5-20251101", at(2026, 1, 1)).unwrap();
        let opus_41 = pricing.get_price("claude-opus-4-1-20250805", at(2026, 1, 1)).unwrap();

        assert_eq!(opus_45.input_rate, 5.0);
        assert_eq!(opus_41.input_rate, 15.0);
    }

    #[test]
    fn test_historical_rate_is_used() {
        let early = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let cut = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let pricing = StaticPricing::new(vec![
            PriceEntry::new("model-x", cut, ModelPrice::new(1.0, 1.0, 1.0, 1.0)),
            PriceEntry::new("model-x", early, ModelPrice::new(2.0, 2.0, 2.0, 2.0)),
        ]);

        assert_eq!(pricing.get_price("model-x", at(2025, 3, 1)).unwrap().input_rate, 2.0);
        assert_eq!(pricing.get_price("model-x", at(2025, 7, 1)).unwrap().input_rate, 1.0);
        // Before the table starts, the earliest row applies.
        assert_eq!(pricing.get_price("model-x", at(2024, 1, 1)).unwrap().input_rate, 2.0);
    }

    #[test]
    fn test_unknown_model() {
        assert!(StaticPricing::builtin().get_price("gpt-4o", at(2026, 1, 1)).is_none());
    }
}
