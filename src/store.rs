//! Postgres job store.
//!
//! The single `jobs` table is the authoritative job state. Every mutation is
//! one autocommit UPDATE/INSERT keyed by `auid`, so the database enforces
//! isolation between the scheduler and the HTTP surface. Mutations carry a
//! `failed IS NULL AND success IS NULL` guard, which makes transitions after
//! a terminal timestamp no-ops and keeps retries idempotent.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::NoTls;
use uuid::Uuid;

use crate::config::Config;
use crate::job::{InFlightJob, JobDetail, Lang, PendingJob, RecentJob, Tier};

#[derive(Clone)]
pub struct JobStore {
    pool: Pool,
    sql: Statements,
}

/// SQL text per operation, with the configured table name interpolated once.
/// The table name is validated as a plain identifier at config load.
#[derive(Debug, Clone)]
struct Statements {
    ensure_table: String,
    create: String,
    mark_processing: String,
    mark_success: String,
    mark_failed: String,
    pending: String,
    in_flight: String,
    get: String,
    recent: String,
}

impl Statements {
    fn new(table: &str) -> Statements {
        Statements {
            ensure_table: format!(
                "CREATE TABLE IF NOT EXISTS {table} (\
                 auid uuid NOT NULL PRIMARY KEY, \
                 lang char(2) NOT NULL, \
                 model char(4) NOT NULL, \
                 attempt smallint NOT NULL DEFAULT 0, \
                 loaded timestamp NOT NULL DEFAULT now(), \
                 processing timestamp, failed timestamp, success timestamp, \
                 log text, result jsonb, target jsonb)"
            ),
            // RETURNING the server-assigned `loaded` keeps the day directory
            // and the row on the same date even across midnight.
            create: format!(
                "INSERT INTO {table} (auid, lang, model) VALUES ($1, $2, $3) RETURNING loaded"
            ),
            // A null timestamp clears `processing` (reaper resume) without
            // consuming an attempt; a non-null one marks a fresh start.
            mark_processing: format!(
                "UPDATE {table} SET processing = $2, \
                 attempt = attempt + (CASE WHEN $2::timestamp IS NULL THEN 0 ELSE 1 END) \
                 WHERE auid = $1 AND failed IS NULL AND success IS NULL"
            ),
            mark_success: format!(
                "UPDATE {table} SET success = now(), log = 'success', result = $2 \
                 WHERE auid = $1 AND failed IS NULL AND success IS NULL"
            ),
            mark_failed: format!(
                "UPDATE {table} SET failed = now(), log = $2 \
                 WHERE auid = $1 AND failed IS NULL AND success IS NULL"
            ),
            pending: format!(
                "SELECT auid, lang, model, loaded FROM {table} \
                 WHERE processing IS NULL ORDER BY loaded"
            ),
            in_flight: format!(
                "SELECT auid, lang, model, loaded, processing, attempt FROM {table} \
                 WHERE processing IS NOT NULL AND failed IS NULL AND success IS NULL"
            ),
            get: format!(
                "SELECT loaded, processing, failed, log, result FROM {table} WHERE auid = $1"
            ),
            recent: format!(
                "SELECT auid, loaded, processing, failed, success FROM {table} \
                 ORDER BY loaded DESC LIMIT $1"
            ),
        }
    }
}

impl JobStore {
    /// Build the connection pool. No I/O happens until the first query.
    pub fn connect(config: &Config) -> Result<JobStore> {
        let mut pg = tokio_postgres::Config::new();
        pg.host(&config.host)
            .port(config.port)
            .user(&config.user)
            .password(&config.password)
            .dbname(&config.database);
        let mgr = Manager::from_config(
            pg,
            NoTls,
            ManagerConfig { recycling_method: RecyclingMethod::Fast },
        );
        let pool = Pool::builder(mgr).max_size(4).build().context("build db pool")?;
        Ok(JobStore { pool, sql: Statements::new(&config.table) })
    }

    async fn client(&self) -> Result<deadpool_postgres::Object> {
        self.pool.get().await.context("db connection unavailable")
    }

    /// Ensure the job table exists (scheduler startup, `create_table` key).
    pub async fn ensure_table(&self) -> Result<()> {
        self.client().await?.execute(self.sql.ensure_table.as_str(), &[]).await.context("create table")?;
        Ok(())
    }

    /// Insert a fresh LOADED row and return its `loaded` timestamp.
    /// Fails on primary-key collision.
    pub async fn create(&self, auid: Uuid, lang: Lang, tier: Tier) -> Result<NaiveDateTime> {
        let row = self
            .client()
            .await?
            .query_one(self.sql.create.as_str(), &[&auid, &lang.as_str(), &tier.as_str()])
            .await
            .with_context(|| format!("insert job {auid}"))?;
        Ok(row.get(0))
    }

    /// Set or clear `processing`. A non-null timestamp marks a fresh start
    /// and consumes an attempt; null returns the job to LOADED after a
    /// reaper-ordered resume, leaving the attempt count alone.
    pub async fn mark_processing(&self, auid: Uuid, ts: Option<NaiveDateTime>) -> Result<()> {
        self.client()
            .await?
            .execute(self.sql.mark_processing.as_str(), &[&auid, &ts])
            .await
            .with_context(|| format!("mark processing {auid}"))?;
        Ok(())
    }

    /// Terminal success: stores the transcript under `result`.
    pub async fn mark_success(&self, auid: Uuid, transcript: &serde_json::Value) -> Result<()> {
        self.client()
            .await?
            .execute(self.sql.mark_success.as_str(), &[&auid, transcript])
            .await
            .with_context(|| format!("mark success {auid}"))?;
        Ok(())
    }

    /// Terminal failure with a reason recorded in `log`.
    pub async fn mark_failed(&self, auid: Uuid, reason: &str) -> Result<()> {
        self.client()
            .await?
            .execute(self.sql.mark_failed.as_str(), &[&auid, &reason])
            .await
            .with_context(|| format!("mark failed {auid}"))?;
        Ok(())
    }

    /// Jobs awaiting dispatch, FIFO by `loaded`.
    pub async fn pending(&self) -> Result<Vec<PendingJob>> {
        let rows = self.client().await?.query(self.sql.pending.as_str(), &[]).await.context("pending")?;
        rows.iter()
            .map(|row| {
                Ok(PendingJob {
                    auid: row.get(0),
                    lang: parse_lang(row.get(1))?,
                    tier: parse_tier(row.get(2))?,
                    loaded: row.get(3),
                })
            })
            .collect()
    }

    /// Jobs with `processing` set and no terminal timestamp.
    pub async fn in_flight(&self) -> Result<Vec<InFlightJob>> {
        let rows =
            self.client().await?.query(self.sql.in_flight.as_str(), &[]).await.context("in_flight")?;
        rows.iter()
            .map(|row| {
                Ok(InFlightJob {
                    auid: row.get(0),
                    lang: parse_lang(row.get(1))?,
                    tier: parse_tier(row.get(2))?,
                    loaded: row.get(3),
                    processing: row.get(4),
                    attempt: row.get(5),
                })
            })
            .collect()
    }

    /// Single-row projection for the status endpoint.
    pub async fn get(&self, auid: Uuid) -> Result<Option<JobDetail>> {
        let row = self
            .client()
            .await?
            .query_opt(self.sql.get.as_str(), &[&auid])
            .await
            .with_context(|| format!("get {auid}"))?;
        Ok(row.map(|row| JobDetail {
            loaded: row.get(0),
            processing: row.get(1),
            failed: row.get(2),
            log: row.get(3),
            result: row.get(4),
        }))
    }

    /// Last `limit` rows by `loaded` descending.
    pub async fn recent(&self, limit: i64) -> Result<Vec<RecentJob>> {
        let rows =
            self.client().await?.query(self.sql.recent.as_str(), &[&limit]).await.context("recent")?;
        Ok(rows
            .iter()
            .map(|row| RecentJob {
                auid: row.get(0),
                loaded: row.get(1),
                processing: row.get(2),
                failed: row.get(3),
                success: row.get(4),
            })
            .collect())
    }
}

fn parse_lang(raw: String) -> Result<Lang> {
    Lang::parse(raw.trim()).with_context(|| format!("unknown lang in row: {raw:?}"))
}

fn parse_tier(raw: String) -> Result<Tier> {
    Tier::parse(raw.trim()).with_context(|| format!("unknown model in row: {raw:?}"))
}
