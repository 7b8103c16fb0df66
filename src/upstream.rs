use crate::config::{AppConfig, UpstreamCredentials};
use crate::models::{AccountId, AccountSnapshot, DailyEntry, GainRecord};
use anyhow::Context;
use chrono::{NaiveDate, Utc};
use log::warn;
use reqwest::Client;
use serde::de::{self, DeserializeOwned, Deserializer, Visitor};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DATE_FORMAT: &str = "%Y-%m-%d";

// Session invalidity is only signaled through a human-readable message.
const INVALID_SESSION_MARKERS: [&str; 2] = ["Invalid session", "Session parameter is required"];

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream login failed: {0}")]
    Auth(String),
    #[error("upstream session expired and re-login did not recover it")]
    SessionExpired,
    #[error("upstream request failed: {0}")]
    Unavailable(#[from] reqwest::Error),
    #[error("upstream reported an error: {0}")]
    Api(String),
}

pub type UpstreamResult<T> = Result<T, UpstreamError>;

pub fn build_http_client(timeout: Duration) -> anyhow::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .context("failed to build HTTP client")
}

/// Result of one daily-series fetch. `fetched` counts what the upstream
/// returned after flattening; entries without a resolvable date are dropped
/// and counted in `skipped`.
#[derive(Debug, Default)]
pub struct DailyFetch {
    pub entries: Vec<DailyEntry>,
    pub fetched: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct DailyGainPoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// Client for the broker-statistics API. Holds the opaque session token and
/// recovers from expiry reactively: when a call comes back with a
/// session-invalid message, it re-authenticates exactly once and retries.
/// A second miss surfaces as a terminal error so bad credentials cannot
/// cause a retry loop.
pub struct StatsApiClient {
    http: Client,
    base_url: String,
    credentials: UpstreamCredentials,
    session: Mutex<Option<String>>,
}

enum Fetched<T> {
    Ok(T),
    SessionInvalid(String),
}

impl StatsApiClient {
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        Ok(Self {
            http: build_http_client(config.http_timeout)?,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            credentials: config.credentials.clone(),
            session: Mutex::new(None),
        })
    }

    /// Obtain a session up front. The pipeline calls this as its first step
    /// so a login failure aborts the pass before anything else runs.
    pub async fn ensure_session(&self) -> UpstreamResult<()> {
        self.session().await.map(|_| ())
    }

    pub async fn login(&self) -> UpstreamResult<String> {
        let envelope: ApiEnvelope<LoginPayload> = self
            .get_json(
                "login",
                &[
                    ("email", self.credentials.email.as_str()),
                    ("password", self.credentials.password.as_str()),
                ],
            )
            .await?;

        if envelope.error {
            return Err(UpstreamError::Auth(message_or(
                envelope.message,
                "login rejected",
            )));
        }

        envelope
            .payload
            .session
            .map(|session| session.trim().to_string())
            .filter(|session| !session.is_empty())
            .ok_or_else(|| {
                UpstreamError::Auth("login response did not include a session token".to_string())
            })
    }

    pub async fn get_accounts(&self) -> UpstreamResult<Vec<AccountSnapshot>> {
        let payload: AccountsPayload = self.get_with_session("get-my-accounts", Vec::new()).await?;

        let mut accounts = Vec::with_capacity(payload.accounts.len());
        for raw in payload.accounts {
            let Some(account_id) = raw.id else {
                warn!("Skipping upstream account without an id");
                continue;
            };
            accounts.push(AccountSnapshot {
                account_id,
                name: raw.name,
                balance: raw.balance.unwrap_or(0.0),
                profit: raw.profit.unwrap_or(0.0),
                gain: raw.gain.unwrap_or(0.0),
                currency: raw.currency,
                updated_at: Utc::now(),
            });
        }
        Ok(accounts)
    }

    /// Fetch the account list and keep only the configured target account,
    /// matching ids across string and numeric forms.
    pub async fn find_account(
        &self,
        target: &AccountId,
    ) -> UpstreamResult<Option<AccountSnapshot>> {
        let accounts = self.get_accounts().await?;
        Ok(accounts
            .into_iter()
            .find(|account| account.account_id.matches(target)))
    }

    pub async fn get_daily_data(
        &self,
        account_id: &AccountId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> UpstreamResult<DailyFetch> {
        let payload: DailyDataPayload = self
            .get_with_session(
                "get-data-daily",
                vec![
                    ("id", account_id.to_string()),
                    ("start", start.format(DATE_FORMAT).to_string()),
                    ("end", end.format(DATE_FORMAT).to_string()),
                ],
            )
            .await?;
        Ok(normalize_daily(account_id, payload.data_daily))
    }

    pub async fn get_daily_gain(
        &self,
        account_id: &AccountId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> UpstreamResult<Vec<DailyGainPoint>> {
        let payload: DailyGainPayload = self
            .get_with_session(
                "get-daily-gain",
                vec![
                    ("id", account_id.to_string()),
                    ("start", start.format(DATE_FORMAT).to_string()),
                    ("end", end.format(DATE_FORMAT).to_string()),
                ],
            )
            .await?;

        let mut points = Vec::new();
        for value in flatten_one_level(payload.daily_gain) {
            let raw: RawDailyGain = match serde_json::from_value(value) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!("Skipping malformed daily gain point: {}", err);
                    continue;
                }
            };
            let Some(date) = raw.date.as_deref().and_then(parse_entry_date) else {
                continue;
            };
            points.push(DailyGainPoint {
                date,
                value: raw.value.unwrap_or(0.0),
            });
        }
        Ok(points)
    }

    pub async fn get_gain(
        &self,
        account_id: &AccountId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> UpstreamResult<GainRecord> {
        let payload: GainPayload = self
            .get_with_session(
                "get-gain",
                vec![
                    ("id", account_id.to_string()),
                    ("start", start.format(DATE_FORMAT).to_string()),
                    ("end", end.format(DATE_FORMAT).to_string()),
                ],
            )
            .await?;
        Ok(GainRecord {
            account_id: account_id.clone(),
            start_date: start,
            end_date: end,
            value: payload.value.unwrap_or(0.0),
        })
    }

    async fn session(&self) -> UpstreamResult<String> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.clone() {
            return Ok(session);
        }
        let session = self.login().await?;
        *guard = Some(session.clone());
        Ok(session)
    }

    async fn refresh_session(&self) -> UpstreamResult<String> {
        let mut guard = self.session.lock().await;
        let session = self.login().await?;
        *guard = Some(session.clone());
        Ok(session)
    }

    async fn get_with_session<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: Vec<(&'static str, String)>,
    ) -> UpstreamResult<T> {
        let session = self.session().await?;
        match self.get_envelope(endpoint, &session, &params).await? {
            Fetched::Ok(payload) => Ok(payload),
            Fetched::SessionInvalid(message) => {
                warn!(
                    "Upstream rejected session on {} ({}); re-authenticating once",
                    endpoint, message
                );
                let session = self.refresh_session().await?;
                match self.get_envelope(endpoint, &session, &params).await? {
                    Fetched::Ok(payload) => Ok(payload),
                    Fetched::SessionInvalid(_) => Err(UpstreamError::SessionExpired),
                }
            }
        }
    }

    async fn get_envelope<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        session: &str,
        params: &[(&'static str, String)],
    ) -> UpstreamResult<Fetched<T>> {
        let mut query: Vec<(&str, &str)> = vec![("session", session)];
        for (key, value) in params {
            query.push((key, value.as_str()));
        }

        let envelope: ApiEnvelope<T> = self.get_json(endpoint, &query).await?;
        if envelope.error {
            let message = envelope.message.unwrap_or_default();
            if is_session_invalid(&message) {
                return Ok(Fetched::SessionInvalid(message));
            }
            return Err(UpstreamError::Api(message_or(
                Some(message),
                "unspecified upstream error",
            )));
        }
        Ok(Fetched::Ok(envelope.payload))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> UpstreamResult<ApiEnvelope<T>> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self.http.get(&url).query(query).send().await?;
        let envelope = response.error_for_status()?.json::<ApiEnvelope<T>>().await?;
        Ok(envelope)
    }
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(flatten)]
    payload: T,
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    #[serde(default)]
    session: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountsPayload {
    #[serde(default)]
    accounts: Vec<RawAccount>,
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    #[serde(default)]
    id: Option<AccountId>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_f64_opt")]
    balance: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_f64_opt")]
    profit: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_f64_opt")]
    gain: Option<f64>,
    #[serde(default)]
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DailyDataPayload {
    #[serde(default, rename = "dataDaily")]
    data_daily: Value,
}

#[derive(Debug, Deserialize)]
struct DailyGainPayload {
    #[serde(default, rename = "dailyGain")]
    daily_gain: Value,
}

#[derive(Debug, Deserialize)]
struct GainPayload {
    #[serde(default, deserialize_with = "deserialize_f64_opt")]
    value: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawDailyEntry {
    #[serde(default)]
    date: Option<String>,
    #[serde(default, deserialize_with = "deserialize_f64_opt")]
    balance: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_f64_opt")]
    profit: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_f64_opt")]
    pips: Option<f64>,
    #[serde(default, rename = "growthEquity", deserialize_with = "deserialize_f64_opt")]
    growth_equity: Option<f64>,
    #[serde(default, rename = "floatingPL", deserialize_with = "deserialize_f64_opt")]
    floating_pl: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawDailyGain {
    #[serde(default)]
    date: Option<String>,
    #[serde(default, deserialize_with = "deserialize_f64_opt")]
    value: Option<f64>,
}

fn is_session_invalid(message: &str) -> bool {
    INVALID_SESSION_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

fn message_or(message: Option<String>, fallback: &str) -> String {
    message
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

/// The daily endpoints return a jagged array of arrays; flatten exactly one
/// level, preserving order. Already-flat elements pass through unchanged.
fn flatten_one_level(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .flat_map(|item| match item {
                Value::Array(inner) => inner,
                other => vec![other],
            })
            .collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

/// Daily payloads date their rows `MM/DD/YYYY` while request parameters use
/// `YYYY-MM-DD`; accept both.
fn parse_entry_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, "%m/%d/%Y")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, DATE_FORMAT))
        .ok()
}

fn normalize_daily(account_id: &AccountId, payload: Value) -> DailyFetch {
    let values = flatten_one_level(payload);
    let fetched = values.len();
    let mut entries = Vec::with_capacity(fetched);
    let mut skipped = 0usize;

    for value in values {
        let raw: RawDailyEntry = match serde_json::from_value(value) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("Skipping malformed daily entry: {}", err);
                skipped += 1;
                continue;
            }
        };
        let Some(entry_date) = raw.date.as_deref().and_then(parse_entry_date) else {
            skipped += 1;
            continue;
        };
        entries.push(DailyEntry {
            account_id: account_id.clone(),
            entry_date,
            balance: raw.balance.unwrap_or(0.0),
            profit: raw.profit.unwrap_or(0.0),
            pips: raw.pips.unwrap_or(0.0),
            growth_equity: raw.growth_equity.unwrap_or(0.0),
            floating_pl: raw.floating_pl.unwrap_or(0.0),
        });
    }

    DailyFetch {
        entries,
        fetched,
        skipped,
    }
}

fn deserialize_f64_opt<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    struct F64OptVisitor;

    impl<'de> Visitor<'de> for F64OptVisitor {
        type Value = Option<f64>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a number or string")
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(value as f64))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(value as f64))
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value.trim().parse::<f64>().ok())
        }
    }

    deserializer.deserialize_any(F64OptVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_invalidity_is_detected_by_message_substring() {
        assert!(is_session_invalid("Invalid session, please log in again"));
        assert!(is_session_invalid("Session parameter is required"));
        assert!(!is_session_invalid("Unknown account"));
        assert!(!is_session_invalid(""));
    }

    #[test]
    fn flatten_one_level_preserves_order() {
        let payload = json!([
            [{"date": "08/01/2025", "balance": 100.0}],
            [{"date": "08/02/2025", "balance": 110.0}]
        ]);
        let flattened = flatten_one_level(payload);
        assert_eq!(flattened.len(), 2);
        assert_eq!(flattened[0]["date"], "08/01/2025");
        assert_eq!(flattened[1]["date"], "08/02/2025");
    }

    #[test]
    fn flatten_one_level_passes_flat_arrays_through() {
        let payload = json!([{"date": "08/01/2025"}, {"date": "08/02/2025"}]);
        assert_eq!(flatten_one_level(payload).len(), 2);
        assert!(flatten_one_level(Value::Null).is_empty());
    }

    #[test]
    fn entry_dates_parse_in_both_wire_formats() {
        let expected = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
        assert_eq!(parse_entry_date("08/01/2025"), Some(expected));
        assert_eq!(parse_entry_date("2025-08-01"), Some(expected));
        assert_eq!(parse_entry_date(" 08/01/2025 "), Some(expected));
        assert_eq!(parse_entry_date("yesterday"), None);
        assert_eq!(parse_entry_date(""), None);
    }

    #[test]
    fn normalize_daily_skips_entries_without_dates() {
        let account_id = AccountId::from(11808068);
        let payload = json!([
            [{"date": "08/01/2025", "balance": 100.0, "profit": 1.5}],
            [{"balance": 200.0}],
            [{"date": "not a date", "balance": 300.0}]
        ]);
        let fetch = normalize_daily(&account_id, payload);
        assert_eq!(fetch.fetched, 3);
        assert_eq!(fetch.skipped, 2);
        assert_eq!(fetch.entries.len(), 1);
        assert_eq!(
            fetch.entries[0].entry_date,
            NaiveDate::from_ymd_opt(2025, 8, 1).unwrap()
        );
        assert_eq!(fetch.entries[0].balance, 100.0);
    }

    #[test]
    fn account_payload_tolerates_numeric_and_string_fields() {
        let envelope: ApiEnvelope<AccountsPayload> = serde_json::from_value(json!({
            "error": false,
            "accounts": [
                {"id": 11808068, "name": "Main", "balance": "1050.25", "profit": 50.25, "gain": 5.0, "currency": "USD"},
                {"id": "999", "balance": 10}
            ]
        }))
        .unwrap();
        assert!(!envelope.error);
        let accounts = envelope.payload.accounts;
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].id.as_ref().unwrap().as_str(), "11808068");
        assert_eq!(accounts[0].balance, Some(1050.25));
        assert_eq!(accounts[1].id.as_ref().unwrap().as_str(), "999");
    }

    #[test]
    fn error_envelope_parses_without_payload_fields() {
        let envelope: ApiEnvelope<DailyDataPayload> = serde_json::from_value(json!({
            "error": true,
            "message": "Invalid session"
        }))
        .unwrap();
        assert!(envelope.error);
        assert!(is_session_invalid(envelope.message.as_deref().unwrap()));
        assert!(envelope.payload.data_daily.is_null());
    }
}
