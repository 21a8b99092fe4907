//! Last-known-good store: every live metric and every aggregation cycle.

use crate::models::{MarketMetric, Provenance};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use duckdb::{Connection, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS metric_history (
    metric_key      VARCHAR   NOT NULL,
    name            VARCHAR   NOT NULL,
    value           VARCHAR   NOT NULL,
    change          VARCHAR   NOT NULL,
    change_percent  VARCHAR   NOT NULL,
    is_positive     BOOLEAN   NOT NULL,
    captured_at     TIMESTAMP NOT NULL,
    position        INTEGER   NOT NULL DEFAULT 0,
    PRIMARY KEY (metric_key, captured_at)
);

CREATE SEQUENCE IF NOT EXISTS scrape_run_ids START 1;

CREATE TABLE IF NOT EXISTS scrape_runs (
    id               INTEGER PRIMARY KEY DEFAULT nextval('scrape_run_ids'),
    kind             VARCHAR   NOT NULL,
    started_at       TIMESTAMP NOT NULL,
    finished_at      TIMESTAMP NOT NULL,
    status           VARCHAR   NOT NULL,
    live_fields      INTEGER   NOT NULL DEFAULT 0,
    fallback_fields  INTEGER   NOT NULL DEFAULT 0,
    error_msg        VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_history_key  ON metric_history (metric_key);
CREATE INDEX IF NOT EXISTS idx_runs_started ON scrape_runs (started_at);
"#;

/// Prefix for sector-index rows in `metric_history`.
pub const SECTOR_PREFIX: &str = "sector:";

/// One aggregation cycle, as logged.
#[derive(Debug, Clone)]
pub struct ScrapeRun {
    pub kind: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub live_fields: usize,
    pub fallback_fields: usize,
    pub error: Option<String>,
}

impl ScrapeRun {
    pub fn status(&self) -> &'static str {
        match (self.live_fields, self.fallback_fields) {
            (0, _) => "failed",
            (_, 0) => "success",
            _ => "degraded",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub kind: String,
    pub started_at: NaiveDateTime,
    pub status: String,
    pub live_fields: i64,
    pub fallback_fields: i64,
}

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Mutex<Connection>,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Mutex::new(Connection::open_in_memory()?) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        let conn = self.conn();
        conn.execute_batch(DDL).context("DDL failed")?;
        conn.execute_batch(INDEXES).context("Index creation failed")?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Metric history ────────────────────────────────────────────────────────

    /// Store live metrics under their keys. Non-live metrics are skipped so
    /// fallback values never masquerade as last-known-good. Each row keeps
    /// its position in `metrics` so lists come back in page order.
    pub fn record_metrics<'a, I>(&self, metrics: I) -> Result<usize>
    where
        I: IntoIterator<Item = (String, &'a MarketMetric)>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut n = 0usize;

        for (position, (key, m)) in metrics.into_iter().enumerate() {
            if !m.is_live() {
                continue;
            }
            tx.execute(
                r#"INSERT OR REPLACE INTO metric_history
                   (metric_key, name, value, change, change_percent, is_positive,
                    captured_at, position)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
                params![
                    key,
                    m.name,
                    m.value,
                    m.change,
                    m.change_percent,
                    m.is_positive,
                    m.last_update.naive_utc(),
                    position as i64,
                ],
            )
            .with_context(|| format!("insert metric {}", key))?;
            n += 1;
        }

        tx.commit()?;
        Ok(n)
    }

    /// Latest live capture of a key, tagged as fallback.
    pub fn latest_metric(&self, key: &str) -> Result<Option<MarketMetric>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"SELECT name, value, change, change_percent, is_positive, captured_at
               FROM metric_history WHERE metric_key = ?
               ORDER BY captured_at DESC LIMIT 1"#,
        )?;
        let mut rows = stmt.query_map(params![key], row_to_metric)?;
        let latest = rows.next().transpose()?;
        Ok(latest)
    }

    /// Sector list from the most recent cycle that captured any sector,
    /// in the order the page listed them.
    pub fn latest_sectors(&self) -> Result<Vec<MarketMetric>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"SELECT name, value, change, change_percent, is_positive, captured_at
               FROM metric_history
               WHERE metric_key LIKE 'sector:%'
                 AND captured_at = (SELECT MAX(captured_at) FROM metric_history
                                    WHERE metric_key LIKE 'sector:%')
               ORDER BY position, name"#,
        )?;
        let sectors = stmt
            .query_map([], row_to_metric)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(sectors)
    }

    pub fn metric_count(&self) -> Result<i64> {
        let conn = self.conn();
        let mut s = conn.prepare("SELECT COUNT(*) FROM metric_history")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn last_live_capture(&self) -> Result<Option<NaiveDateTime>> {
        let conn = self.conn();
        let mut s = conn.prepare("SELECT MAX(captured_at) FROM metric_history")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    // ── Scrape run log ────────────────────────────────────────────────────────

    pub fn record_run(&self, run: &ScrapeRun) -> Result<()> {
        self.conn().execute(
            r#"INSERT INTO scrape_runs
               (kind, started_at, finished_at, status, live_fields, fallback_fields, error_msg)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
            params![
                run.kind,
                run.started_at.naive_utc(),
                run.finished_at.naive_utc(),
                run.status(),
                run.live_fields as i64,
                run.fallback_fields as i64,
                run.error,
            ],
        )?;
        Ok(())
    }

    pub fn run_count(&self) -> Result<i64> {
        let conn = self.conn();
        let mut s = conn.prepare("SELECT COUNT(*) FROM scrape_runs")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"SELECT kind, started_at, status, live_fields, fallback_fields
               FROM scrape_runs ORDER BY started_at DESC, id DESC LIMIT ?"#,
        )?;
        let runs = stmt
            .query_map(params![limit as i64], |r| {
                Ok(RunSummary {
                    kind: r.get(0)?,
                    started_at: r.get(1)?,
                    status: r.get(2)?,
                    live_fields: r.get(3)?,
                    fallback_fields: r.get(4)?,
                })
            })?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(runs)
    }
}

fn row_to_metric(r: &duckdb::Row<'_>) -> duckdb::Result<MarketMetric> {
    let captured: NaiveDateTime = r.get(5)?;
    Ok(MarketMetric {
        name: r.get(0)?,
        value: r.get(1)?,
        change: r.get(2)?,
        change_percent: r.get(3)?,
        is_positive: r.get(4)?,
        last_update: captured.and_utc(),
        source: Provenance::Fallback,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn repo() -> Repository {
        let repo = Repository::open_in_memory().unwrap();
        repo.run_migrations().unwrap();
        repo
    }

    fn metric(name: &str, value: &str, at: DateTime<Utc>, source: Provenance) -> MarketMetric {
        MarketMetric {
            name: name.into(),
            value: value.into(),
            change: "+1.00".into(),
            change_percent: "+0.50%".into(),
            is_positive: true,
            last_update: at,
            source,
        }
    }

    #[test]
    fn test_latest_metric_returns_newest_live_value_as_fallback() {
        let repo = repo();
        let t0 = Utc.with_ymd_and_hms(2026, 10, 17, 16, 0, 0).unwrap();
        let t1 = t0 + Duration::minutes(5);

        let old = metric("BRVM Composite", "290.10", t0, Provenance::Live);
        let new = metric("BRVM Composite", "291.40", t1, Provenance::Live);
        repo.record_metrics([("composite".to_string(), &old)]).unwrap();
        repo.record_metrics([("composite".to_string(), &new)]).unwrap();

        let got = repo.latest_metric("composite").unwrap().unwrap();
        assert_eq!(got.value, "291.40");
        assert_eq!(got.last_update, t1);
        assert_eq!(got.source, Provenance::Fallback);
        assert!(repo.latest_metric("inflation").unwrap().is_none());
    }

    #[test]
    fn test_fallback_metrics_are_not_persisted() {
        let repo = repo();
        let at = Utc.with_ymd_and_hms(2026, 10, 17, 16, 0, 0).unwrap();
        let fb = metric("Taux BCEAO", "3.25", at, Provenance::Fallback);
        let n = repo.record_metrics([("taux_bceao".to_string(), &fb)]).unwrap();
        assert_eq!(n, 0);
        assert_eq!(repo.metric_count().unwrap(), 0);
    }

    #[test]
    fn test_latest_sectors_only_last_cycle() {
        let repo = repo();
        let t0 = Utc.with_ymd_and_hms(2026, 10, 17, 16, 0, 0).unwrap();
        let t1 = t0 + Duration::minutes(5);

        let a0 = metric("BRVM - Industrie", "120.10", t0, Provenance::Live);
        let b0 = metric("BRVM - Finances", "98.70", t0, Provenance::Live);
        let a1 = metric("BRVM - Industrie", "121.00", t1, Provenance::Live);
        repo.record_metrics([
            (format!("{}{}", SECTOR_PREFIX, a0.name), &a0),
            (format!("{}{}", SECTOR_PREFIX, b0.name), &b0),
        ])
        .unwrap();
        repo.record_metrics([(format!("{}{}", SECTOR_PREFIX, a1.name), &a1)]).unwrap();

        let sectors = repo.latest_sectors().unwrap();
        assert_eq!(sectors.len(), 1);
        assert_eq!(sectors[0].value, "121.00");
    }

    #[test]
    fn test_latest_sectors_keep_page_order() {
        let repo = repo();
        let at = Utc.with_ymd_and_hms(2026, 10, 17, 16, 0, 0).unwrap();

        let names = ["BRVM - Finances", "BRVM - Distribution", "BRVM - Agriculture"];
        let sectors: Vec<MarketMetric> = names
            .iter()
            .map(|n| metric(n, "100.00", at, Provenance::Live))
            .collect();
        repo.record_metrics(
            sectors
                .iter()
                .map(|m| (format!("{}{}", SECTOR_PREFIX, m.name), m)),
        )
        .unwrap();

        let got: Vec<String> = repo.latest_sectors().unwrap().into_iter().map(|m| m.name).collect();
        assert_eq!(got, names);
    }

    #[test]
    fn test_run_log() {
        let repo = repo();
        let at = Utc.with_ymd_and_hms(2026, 10, 17, 16, 0, 0).unwrap();
        let run = ScrapeRun {
            kind: "indices".into(),
            started_at: at,
            finished_at: at + Duration::seconds(4),
            live_fields: 3,
            fallback_fields: 1,
            error: None,
        };
        repo.record_run(&run).unwrap();

        assert_eq!(repo.run_count().unwrap(), 1);
        let runs = repo.recent_runs(5).unwrap();
        assert_eq!(runs[0].status, "degraded");
        assert_eq!(runs[0].live_fields, 3);
    }
}
