use crate::models::{
    AccountId, AccountSnapshot, DailyEntry, DashboardData, GainRecord, StoreStats,
};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use futures::future::join_all;
use log::{error, warn};
use std::time::Duration;
use tokio_postgres::{Client, NoTls, Row};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct Database {
    client: Client,
}

/// Per-batch upsert accounting. Failed entries are logged individually and
/// counted here rather than swallowed.
#[derive(Debug, Default, Clone, Copy)]
pub struct DailyUpsertOutcome {
    pub saved: usize,
    pub failed: usize,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LegacyMigrationStats {
    pub accounts: u64,
    pub daily_entries: u64,
}

impl Database {
    pub async fn new<S: AsRef<str>>(database_url: S) -> Result<Self> {
        let database_url = database_url.as_ref().to_string();
        let mut pg_config: tokio_postgres::Config = database_url
            .parse()
            .with_context(|| format!("invalid PostgreSQL connection string {}", database_url))?;
        pg_config.connect_timeout(CONNECT_TIMEOUT);
        let (client, connection) = pg_config
            .connect(NoTls)
            .await
            .with_context(|| format!("failed to connect to PostgreSQL at {}", database_url))?;

        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!("PostgreSQL connection error: {}", err);
            }
        });

        Ok(Self { client })
    }

    pub async fn apply_schema(&self, schema_sql: &str) -> Result<()> {
        self.client
            .batch_execute(schema_sql)
            .await
            .context("failed to apply schema")?;
        Ok(())
    }

    /// Upsert the one snapshot row for an account. Returns true when the row
    /// was freshly inserted rather than updated.
    pub async fn upsert_account(&self, snapshot: &AccountSnapshot) -> Result<bool> {
        let row = self
            .client
            .query_one(
                "INSERT INTO account_snapshots (account_id, name, balance, profit, gain, currency, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (account_id) DO UPDATE SET
                    name = EXCLUDED.name,
                    balance = EXCLUDED.balance,
                    profit = EXCLUDED.profit,
                    gain = EXCLUDED.gain,
                    currency = EXCLUDED.currency,
                    updated_at = EXCLUDED.updated_at
                 RETURNING (xmax = 0) AS inserted",
                &[
                    &snapshot.account_id.as_str(),
                    &snapshot.name,
                    &snapshot.balance,
                    &snapshot.profit,
                    &snapshot.gain,
                    &snapshot.currency,
                    &snapshot.updated_at,
                ],
            )
            .await?;
        // xmax = 0 marks a row no transaction has updated, i.e. a fresh insert
        Ok(row.get::<_, bool>(0))
    }

    /// Upsert one row per entry keyed by (account_id, entry_date). Entries
    /// are independent keys, so the statements run concurrently; individual
    /// failures reduce `saved` and raise `failed`.
    pub async fn upsert_daily_entries(&self, entries: &[DailyEntry]) -> Result<DailyUpsertOutcome> {
        if entries.is_empty() {
            return Ok(DailyUpsertOutcome::default());
        }

        let stmt = self
            .client
            .prepare(
                "INSERT INTO daily_entries (account_id, entry_date, balance, profit, pips, growth_equity, floating_pl, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (account_id, entry_date) DO UPDATE SET
                    balance = EXCLUDED.balance,
                    profit = EXCLUDED.profit,
                    pips = EXCLUDED.pips,
                    growth_equity = EXCLUDED.growth_equity,
                    floating_pl = EXCLUDED.floating_pl,
                    updated_at = EXCLUDED.updated_at",
            )
            .await?;

        let now = Utc::now();
        let results = join_all(entries.iter().map(|entry| {
            let stmt = &stmt;
            async move {
                self.client
                    .execute(
                        stmt,
                        &[
                            &entry.account_id.as_str(),
                            &entry.entry_date,
                            &entry.balance,
                            &entry.profit,
                            &entry.pips,
                            &entry.growth_equity,
                            &entry.floating_pl,
                            &now,
                        ],
                    )
                    .await
            }
        }))
        .await;

        let mut outcome = DailyUpsertOutcome::default();
        for (entry, result) in entries.iter().zip(results) {
            match result {
                Ok(_) => outcome.saved += 1,
                Err(err) => {
                    warn!(
                        "Failed to upsert daily entry {}/{}: {}",
                        entry.account_id, entry.entry_date, err
                    );
                    outcome.failed += 1;
                }
            }
        }
        Ok(outcome)
    }

    pub async fn upsert_gain(&self, record: &GainRecord) -> Result<()> {
        self.client
            .execute(
                "INSERT INTO gain_records (account_id, start_date, end_date, value, updated_at)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (account_id, start_date, end_date) DO UPDATE SET
                    value = EXCLUDED.value,
                    updated_at = EXCLUDED.updated_at",
                &[
                    &record.account_id.as_str(),
                    &record.start_date,
                    &record.end_date,
                    &record.value,
                    &Utc::now(),
                ],
            )
            .await?;
        Ok(())
    }

    /// Look up the snapshot for `account_id`. When nothing matches but the
    /// table is non-empty, fall back to the most recently updated snapshot
    /// of any account. That keeps a single-tenant dashboard alive through id
    /// drift, and is not a multi-tenant-safe pattern.
    pub async fn get_account(&self, account_id: &AccountId) -> Result<Option<AccountSnapshot>> {
        let row = self
            .client
            .query_opt(
                "SELECT account_id, name, balance, profit, gain, currency, updated_at
                 FROM account_snapshots
                 WHERE account_id = $1",
                &[&account_id.as_str()],
            )
            .await?;
        if let Some(row) = row {
            return Ok(Some(map_account_row(&row)));
        }

        let fallback = self
            .client
            .query_opt(
                "SELECT account_id, name, balance, profit, gain, currency, updated_at
                 FROM account_snapshots
                 ORDER BY updated_at DESC
                 LIMIT 1",
                &[],
            )
            .await?;
        Ok(fallback.map(|row| {
            let snapshot = map_account_row(&row);
            warn!(
                "No snapshot for account {}; serving most recently updated snapshot {} instead",
                account_id, snapshot.account_id
            );
            snapshot
        }))
    }

    /// Daily entries for an account, newest first. Range bounds are
    /// inclusive on both ends when provided.
    pub async fn get_daily_entries(
        &self,
        account_id: &AccountId,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<DailyEntry>> {
        let rows = self
            .client
            .query(
                "SELECT account_id, entry_date, balance, profit, pips, growth_equity, floating_pl
                 FROM daily_entries
                 WHERE account_id = $1
                   AND ($2::date IS NULL OR entry_date >= $2)
                   AND ($3::date IS NULL OR entry_date <= $3)
                 ORDER BY entry_date DESC",
                &[&account_id.as_str(), &start, &end],
            )
            .await?;

        Ok(rows.iter().map(map_daily_row).collect())
    }

    /// Account and daily series fetched in parallel. Either half may be
    /// missing; read errors degrade to no-data with a warning because the
    /// dashboard must render something even when the store is unreachable.
    pub async fn get_dashboard_data(&self, account_id: &AccountId) -> DashboardData {
        let (account, daily_data) = tokio::join!(
            self.get_account(account_id),
            self.get_daily_entries(account_id, None, None)
        );

        let account = account.unwrap_or_else(|err| {
            warn!("Account read failed for {}: {}", account_id, err);
            None
        });
        let daily_data = daily_data.unwrap_or_else(|err| {
            warn!("Daily entries read failed for {}: {}", account_id, err);
            Vec::new()
        });

        DashboardData {
            account,
            daily_data,
        }
    }

    /// Row counts backing the sync report's verification step.
    pub async fn store_stats(&self, account_id: &AccountId) -> Result<StoreStats> {
        let accounts = self
            .client
            .query_one(
                "SELECT COUNT(*) FROM account_snapshots WHERE account_id = $1",
                &[&account_id.as_str()],
            )
            .await?;
        let daily = self
            .client
            .query_one(
                "SELECT COUNT(*) FROM daily_entries WHERE account_id = $1",
                &[&account_id.as_str()],
            )
            .await?;
        Ok(StoreStats {
            account_rows: accounts.get(0),
            daily_rows: daily.get(0),
        })
    }

    /// Retention cleanup: drop daily entries strictly older than `horizon`.
    pub async fn delete_daily_entries_before(&self, horizon: NaiveDate) -> Result<u64> {
        let deleted = self
            .client
            .execute("DELETE FROM daily_entries WHERE entry_date < $1", &[&horizon])
            .await?;
        Ok(deleted)
    }

    /// One-time migration from the legacy tables, run before serving
    /// traffic. Ids are trimmed on the way over; rows already present in the
    /// current tables win.
    pub async fn migrate_legacy_tables(&self) -> Result<LegacyMigrationStats> {
        let mut stats = LegacyMigrationStats::default();

        if self.table_exists("accounts_legacy").await? {
            stats.accounts = self
                .client
                .execute(
                    "INSERT INTO account_snapshots (account_id, name, balance, profit, gain, currency, updated_at)
                     SELECT btrim(account_id), name, balance, profit, gain, currency, updated_at
                     FROM accounts_legacy
                     WHERE btrim(account_id) <> ''
                     ON CONFLICT (account_id) DO NOTHING",
                    &[],
                )
                .await?;
        }

        if self.table_exists("daily_data_legacy").await? {
            stats.daily_entries = self
                .client
                .execute(
                    "INSERT INTO daily_entries (account_id, entry_date, balance, profit, pips, growth_equity, floating_pl, updated_at)
                     SELECT btrim(account_id), entry_date, balance, profit, pips, growth_equity, floating_pl, updated_at
                     FROM daily_data_legacy
                     WHERE btrim(account_id) <> ''
                     ON CONFLICT (account_id, entry_date) DO NOTHING",
                    &[],
                )
                .await?;
        }

        Ok(stats)
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let row = self
            .client
            .query_one("SELECT to_regclass($1)::text", &[&table])
            .await?;
        Ok(row.get::<_, Option<String>>(0).is_some())
    }
}

fn map_account_row(row: &Row) -> AccountSnapshot {
    let account_id: String = row.get(0);
    let updated_at: DateTime<Utc> = row.get(6);
    AccountSnapshot {
        account_id: AccountId::new(account_id),
        name: row.get(1),
        balance: row.get(2),
        profit: row.get(3),
        gain: row.get(4),
        currency: row.get(5),
        updated_at,
    }
}

fn map_daily_row(row: &Row) -> DailyEntry {
    let account_id: String = row.get(0);
    DailyEntry {
        account_id: AccountId::new(account_id),
        entry_date: row.get(1),
        balance: row.get(2),
        profit: row.get(3),
        pips: row.get(4),
        growth_equity: row.get(5),
        floating_pl: row.get(6),
    }
}
