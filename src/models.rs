use chrono::{DateTime, NaiveDate, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical account identifier. The upstream API is inconsistent about
/// whether ids arrive as JSON numbers or strings; both forms collapse to the
/// same canonical text here, so downstream code never compares mixed types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AccountId(String);

impl AccountId {
    pub fn new<S: AsRef<str>>(raw: S) -> Self {
        let trimmed = raw.as_ref().trim();
        // Numeric ids are canonicalized through u64 so "007" and 7 match.
        match trimmed.parse::<u64>() {
            Ok(numeric) => Self(numeric.to_string()),
            Err(_) => Self(trimmed.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when `other` names the same logical account, comparing both the
    /// canonical text form and the numeric form.
    pub fn matches(&self, other: &AccountId) -> bool {
        if self.0 == other.0 {
            return true;
        }
        match (self.0.parse::<u64>(), other.0.parse::<u64>()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl From<u64> for AccountId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct AccountIdVisitor;

        impl<'de> Visitor<'de> for AccountIdVisitor {
            type Value = AccountId;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("an account id as a number or string")
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(AccountId::from(value))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(AccountId::new(value.to_string()))
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let id = AccountId::new(value);
                if id.is_empty() {
                    return Err(de::Error::custom("account id must not be empty"));
                }
                Ok(id)
            }
        }

        deserializer.deserialize_any(AccountIdVisitor)
    }
}

/// One logical snapshot per account, overwritten on every sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    pub account_id: AccountId,
    pub name: Option<String>,
    pub balance: f64,
    pub profit: f64,
    pub gain: f64,
    pub currency: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// One calendar day's performance for an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyEntry {
    pub account_id: AccountId,
    pub entry_date: NaiveDate,
    pub balance: f64,
    pub profit: f64,
    pub pips: f64,
    pub growth_equity: f64,
    pub floating_pl: f64,
}

/// Aggregate gain percentage over a window, keyed by the window bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GainRecord {
    pub account_id: AccountId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub value: f64,
}

/// What the dashboard endpoint serves. Either half may be missing; callers
/// render whatever is present.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardData {
    pub account: Option<AccountSnapshot>,
    pub daily_data: Vec<DailyEntry>,
}

impl DashboardData {
    pub fn is_empty(&self) -> bool {
        self.account.is_none() && self.daily_data.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub account_rows: i64,
    pub daily_rows: i64,
}

/// Outcome of one sync pass. Failures accumulate instead of aborting;
/// `success` means at least one of the two sync steps saved something.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub success: bool,
    pub account_saved: bool,
    pub daily_data_saved: bool,
    pub errors: Vec<String>,
    pub messages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_stats: Option<StoreStats>,
}

impl SyncReport {
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn record_message(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_id_collapses_string_and_number_forms() {
        let from_number: AccountId = serde_json::from_value(serde_json::json!(11808068)).unwrap();
        let from_string: AccountId =
            serde_json::from_value(serde_json::json!("11808068")).unwrap();
        assert_eq!(from_number, from_string);
        assert_eq!(from_number.as_str(), "11808068");
    }

    #[test]
    fn account_id_normalizes_leading_zeros_and_whitespace() {
        assert_eq!(AccountId::new(" 007 "), AccountId::from(7));
        assert!(AccountId::new("007").matches(&AccountId::new("7")));
    }

    #[test]
    fn account_id_keeps_non_numeric_ids_verbatim() {
        let id = AccountId::new("demo-account");
        assert_eq!(id.as_str(), "demo-account");
        assert!(!id.matches(&AccountId::new("other")));
    }

    #[test]
    fn empty_account_id_is_rejected() {
        let result: Result<AccountId, _> = serde_json::from_value(serde_json::json!("  "));
        assert!(result.is_err());
    }

    #[test]
    fn sync_report_serializes_camel_case() {
        let mut report = SyncReport::default();
        report.account_saved = true;
        report.success = true;
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["accountSaved"], serde_json::json!(true));
        assert_eq!(value["dailyDataSaved"], serde_json::json!(false));
        assert!(value.get("storeStats").is_none());
    }
}
