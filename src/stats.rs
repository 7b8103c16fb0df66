use crate::models::DailyEntry;
use chrono::Datelike;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyGain {
    /// Calendar month label, `YYYY-MM`.
    pub month: String,
    /// Compounded gain for the month, in percent.
    pub gain: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastPoint {
    pub month: u32,
    pub balance: f64,
}

/// Roll daily equity-growth percentages up into calendar months by
/// compounding: a month with daily growths g1..gn yields
/// (prod(1 + gi/100) - 1) * 100. Months come back in chronological order.
pub fn monthly_gains(entries: &[DailyEntry]) -> Vec<MonthlyGain> {
    let mut factors: BTreeMap<String, f64> = BTreeMap::new();
    for entry in entries {
        let month = format!(
            "{:04}-{:02}",
            entry.entry_date.year(),
            entry.entry_date.month()
        );
        let factor = factors.entry(month).or_insert(1.0);
        *factor *= 1.0 + entry.growth_equity / 100.0;
    }

    factors
        .into_iter()
        .map(|(month, factor)| MonthlyGain {
            month,
            gain: (factor - 1.0) * 100.0,
        })
        .collect()
}

pub fn average_monthly_gain(monthly: &[MonthlyGain]) -> f64 {
    if monthly.is_empty() {
        return 0.0;
    }
    monthly.iter().map(|m| m.gain).sum::<f64>() / monthly.len() as f64
}

/// Project a balance forward by compounding a monthly rate. Point 1 is one
/// month out.
pub fn compound_forecast(
    starting_balance: f64,
    monthly_rate_pct: f64,
    months: u32,
) -> Vec<ForecastPoint> {
    let mut balance = starting_balance;
    (1..=months)
        .map(|month| {
            balance *= 1.0 + monthly_rate_pct / 100.0;
            ForecastPoint { month, balance }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AccountId;
    use chrono::NaiveDate;

    fn entry(date: &str, growth: f64) -> DailyEntry {
        DailyEntry {
            account_id: AccountId::from(1),
            entry_date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            balance: 0.0,
            profit: 0.0,
            pips: 0.0,
            growth_equity: growth,
            floating_pl: 0.0,
        }
    }

    #[test]
    fn monthly_gains_compound_within_each_month() {
        let entries = vec![
            entry("2025-08-01", 10.0),
            entry("2025-08-02", 10.0),
            entry("2025-09-01", -5.0),
        ];
        let monthly = monthly_gains(&entries);
        assert_eq!(monthly.len(), 2);
        assert_eq!(monthly[0].month, "2025-08");
        assert!((monthly[0].gain - 21.0).abs() < 1e-9);
        assert_eq!(monthly[1].month, "2025-09");
        assert!((monthly[1].gain + 5.0).abs() < 1e-9);
    }

    #[test]
    fn monthly_gains_of_empty_series_is_empty() {
        assert!(monthly_gains(&[]).is_empty());
        assert_eq!(average_monthly_gain(&[]), 0.0);
    }

    #[test]
    fn forecast_compounds_month_over_month() {
        let forecast = compound_forecast(1000.0, 10.0, 3);
        assert_eq!(forecast.len(), 3);
        assert!((forecast[0].balance - 1100.0).abs() < 1e-9);
        assert!((forecast[1].balance - 1210.0).abs() < 1e-9);
        assert!((forecast[2].balance - 1331.0).abs() < 1e-9);
    }

    #[test]
    fn forecast_with_zero_months_is_empty() {
        assert!(compound_forecast(1000.0, 10.0, 0).is_empty());
    }
}
