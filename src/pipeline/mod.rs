//! Aggregator: fans out to every upstream page, merges whatever came back
//! with fallback data, and serves the result from a freshness-window cache.
//!
//! ## Cycles
//!
//! `get_snapshot()`: market indices (composite, FCFA/EUR, inflation, policy
//!   rate, sector indices, top stocks). Four pages are fetched concurrently;
//!   a failing page only costs the fields that live on it.
//!
//! `get_commodities()`: commodity prices from a single page, on its own
//!   (longer) window.
//!
//! Neither call fails: missing fields are filled per key from
//! [`FallbackProvider`]. A cycle that produced no live field at all is
//! returned to its callers but not cached, so the next request retries.

pub mod cache;
pub mod health;

use crate::config::{AppConfig, ScrapeMode, SourcesConfig};
use crate::fallback::{FallbackProvider, Simulator, sector_key};
use crate::models::{
    CommodityKey, CommoditySnapshot, MarketMetric, MetricKey, Provenance, Snapshot,
    SnapshotSource, StockQuote,
};
use crate::scraper::error::ScrapeError;
use crate::scraper::navigator::{NavigationOptions, PageNavigator, RenderedPage, WaitCondition};
use crate::scraper::parsers::{
    commodity_spec, extract_metric, extract_sector_indices, extract_stock_rows, spec_for,
};
use crate::storage::{Repository, ScrapeRun};
use crate::utils::Timer;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use self::cache::{Refresh, SnapshotCache};
use self::health::{HealthReport, HealthTracker};

pub struct Aggregator {
    navigator: Arc<dyn PageNavigator>,
    fallback: Arc<FallbackProvider>,
    history: Option<Arc<Repository>>,
    sources: SourcesConfig,
    /// Exchange pages: wait for the data table.
    table_options: NavigationOptions,
    /// Everything else: wait for the full body.
    page_options: NavigationOptions,
    mode: ScrapeMode,
    top_stocks: usize,
    indices: SnapshotCache<Snapshot>,
    commodities: SnapshotCache<CommoditySnapshot>,
    health: Mutex<HealthTracker>,
}

impl Aggregator {
    pub fn new(
        config: &AppConfig,
        navigator: Arc<dyn PageNavigator>,
        fallback: Arc<FallbackProvider>,
    ) -> Self {
        let table_options =
            NavigationOptions::from_config(&config.scraper, &config.sources.wait_selector);
        let page_options = NavigationOptions {
            wait_for: WaitCondition::NetworkIdle,
            ..table_options.clone()
        };
        Self {
            navigator,
            fallback,
            history: None,
            sources: config.sources.clone(),
            table_options,
            page_options,
            mode: config.scraper.mode,
            top_stocks: config.cache.top_stocks,
            indices: SnapshotCache::new(Duration::from_secs(config.cache.index_ttl_secs)),
            commodities: SnapshotCache::new(Duration::from_secs(config.cache.commodity_ttl_secs)),
            health: Mutex::new(HealthTracker::new(config.cache.failure_alert_threshold)),
        }
    }

    /// Persist live values and cycle outcomes.
    pub fn with_history(mut self, repo: Arc<Repository>) -> Self {
        self.history = Some(repo);
        self
    }

    pub fn index_ttl(&self) -> Duration {
        self.indices.ttl()
    }

    pub fn commodity_ttl(&self) -> Duration {
        self.commodities.ttl()
    }

    pub async fn get_snapshot(&self) -> Arc<Snapshot> {
        self.indices.get_or_refresh(|| self.refresh_indices()).await
    }

    /// Drop the cached snapshot and run a cycle now.
    pub async fn refresh_snapshot(&self) -> Arc<Snapshot> {
        self.indices.invalidate();
        self.get_snapshot().await
    }

    pub async fn get_commodities(&self) -> Arc<CommoditySnapshot> {
        self.commodities.get_or_refresh(|| self.refresh_commodities()).await
    }

    pub fn health(&self) -> HealthReport {
        self.health
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .report(self.indices.state(), self.commodities.state())
    }

    pub async fn shutdown(&self) {
        self.navigator.close_all().await;
    }

    // ── Index cycle ───────────────────────────────────────────────────────────

    async fn refresh_indices(&self) -> Refresh<Snapshot> {
        if self.mode == ScrapeMode::Simulation {
            debug!("Simulation mode: generating index snapshot");
            return Refresh::Publish(Simulator::new(&self.fallback).snapshot());
        }

        let _timer = Timer::start("index aggregation cycle");
        let started = Utc::now();

        let (indices, stocks, bceao, fx) = tokio::join!(
            self.navigator.open(&self.sources.indices_url, &self.table_options),
            self.navigator.open(&self.sources.stocks_url, &self.table_options),
            self.navigator.open(&self.sources.bceao_url, &self.page_options),
            self.navigator.open(&self.sources.fx_url, &self.page_options),
        );

        let mut errors = Vec::new();
        let indices = page_html(indices, &mut errors);
        let stocks = page_html(stocks, &mut errors);
        let bceao = page_html(bceao, &mut errors);
        let fx = page_html(fx, &mut errors);

        let snapshot = self.merge_indices(
            indices.as_deref(),
            stocks.as_deref(),
            bceao.as_deref(),
            fx.as_deref(),
            started,
            &mut errors,
        );

        for key in MetricKey::ALL {
            let m = snapshot.metric(key);
            debug!("{}: {} [{}]", key, m.value, m.source.as_str());
        }

        let sectors_live = snapshot.sectoriels.iter().any(MarketMetric::is_live);
        let fields = MetricKey::ALL
            .iter()
            .map(|k| (k.as_str(), snapshot.metric(*k).is_live()))
            .chain([("sectoriels", sectors_live)]);
        self.observe(fields, started);

        let live = snapshot.live_count();
        let total = MetricKey::ALL.len() + snapshot.sectoriels.len();
        self.persist(
            "indices",
            snapshot_history(&snapshot),
            ScrapeRun {
                kind: "indices".into(),
                started_at: started,
                finished_at: Utc::now(),
                live_fields: live,
                fallback_fields: total - live,
                error: (!errors.is_empty()).then(|| errors.join("; ")),
            },
        );

        info!(
            "Index cycle: {}/{} fields live, {} sectors, {} top stocks",
            live,
            total,
            snapshot.sectoriels.len(),
            snapshot.top_stocks.as_ref().map_or(0, Vec::len),
        );

        if live > 0 {
            Refresh::Publish(snapshot)
        } else {
            warn!("Index cycle produced no live data; serving fallback without caching");
            Refresh::Transient(snapshot)
        }
    }

    fn merge_indices(
        &self,
        indices: Option<&str>,
        stocks: Option<&str>,
        bceao: Option<&str>,
        fx: Option<&str>,
        at: DateTime<Utc>,
        errors: &mut Vec<String>,
    ) -> Snapshot {
        let composite = self.metric_or_fallback(indices, MetricKey::Composite, at, errors);
        let fcfa_eur = self.metric_or_fallback(fx, MetricKey::FcfaEur, at, errors);
        let inflation = self.metric_or_fallback(bceao, MetricKey::Inflation, at, errors);
        let taux_bceao = self.metric_or_fallback(bceao, MetricKey::TauxBceao, at, errors);

        let sectoriels = match indices.map(|html| extract_sector_indices(html, at)) {
            Some(sectors) if !sectors.is_empty() => sectors,
            Some(_) => {
                warn!("No sector index located on the indices page");
                self.fallback.sector_fallback()
            }
            None => self.fallback.sector_fallback(),
        };

        let top_stocks = stocks
            .map(|html| rank_top_stocks(extract_stock_rows(html), self.top_stocks))
            .filter(|quotes| !quotes.is_empty());
        if stocks.is_some() && top_stocks.is_none() {
            warn!("No stock quote located on the stocks page");
        }

        let mut snapshot = Snapshot {
            composite,
            fcfa_eur,
            inflation,
            taux_bceao,
            sectoriels,
            top_stocks,
            timestamp: at,
            source: SnapshotSource::Fallback,
        };
        if snapshot.live_count() > 0 {
            snapshot.source = SnapshotSource::Brvm;
        }
        snapshot
    }

    fn metric_or_fallback(
        &self,
        html: Option<&str>,
        key: MetricKey,
        at: DateTime<Utc>,
        errors: &mut Vec<String>,
    ) -> MarketMetric {
        let Some(html) = html else {
            return self.fallback.fallback_for(key);
        };
        match extract_metric(html, spec_for(key), at) {
            Ok(metric) => metric,
            Err(e) => {
                warn!("{}; serving fallback", e);
                errors.push(e.to_string());
                self.fallback.fallback_for(key)
            }
        }
    }

    // ── Commodity cycle ───────────────────────────────────────────────────────

    async fn refresh_commodities(&self) -> Refresh<CommoditySnapshot> {
        if self.mode == ScrapeMode::Simulation {
            debug!("Simulation mode: generating commodity snapshot");
            return Refresh::Publish(Simulator::new(&self.fallback).commodity_snapshot());
        }

        let _timer = Timer::start("commodity aggregation cycle");
        let started = Utc::now();

        let mut errors = Vec::new();
        let page = self
            .navigator
            .open(&self.sources.commodities_url, &self.page_options)
            .await;
        let html = page_html(page, &mut errors);

        let mut field = |key: CommodityKey| {
            let Some(html) = html.as_deref() else {
                return self.fallback.commodity_fallback_for(key);
            };
            match extract_metric(html, commodity_spec(key), started) {
                Ok(metric) => metric,
                Err(e) => {
                    warn!("{}; serving fallback", e);
                    errors.push(e.to_string());
                    self.fallback.commodity_fallback_for(key)
                }
            }
        };

        let mut snapshot = CommoditySnapshot {
            cacao: field(CommodityKey::Cacao),
            cafe: field(CommodityKey::Cafe),
            coton: field(CommodityKey::Coton),
            petrole: field(CommodityKey::Petrole),
            or: field(CommodityKey::Or),
            timestamp: started,
            source: Provenance::Fallback,
        };

        let live = snapshot.live_count();
        if live > 0 {
            snapshot.source = Provenance::Live;
        }

        let keys: Vec<(String, bool)> = CommodityKey::ALL
            .iter()
            .map(|k| (commodity_key(*k), snapshot.metric(*k).is_live()))
            .collect();
        self.observe(keys.iter().map(|(k, live)| (k.as_str(), *live)), started);

        self.persist(
            "commodities",
            CommodityKey::ALL
                .iter()
                .map(|k| (commodity_key(*k), snapshot.metric(*k).clone()))
                .collect(),
            ScrapeRun {
                kind: "commodities".into(),
                started_at: started,
                finished_at: Utc::now(),
                live_fields: live,
                fallback_fields: CommodityKey::ALL.len() - live,
                error: (!errors.is_empty()).then(|| errors.join("; ")),
            },
        );

        info!("Commodity cycle: {}/{} fields live", live, CommodityKey::ALL.len());

        if live > 0 {
            Refresh::Publish(snapshot)
        } else {
            warn!("Commodity cycle produced no live data; serving fallback without caching");
            Refresh::Transient(snapshot)
        }
    }

    // ── Bookkeeping ───────────────────────────────────────────────────────────

    fn observe<'a>(&self, fields: impl IntoIterator<Item = (&'a str, bool)>, at: DateTime<Utc>) {
        self.health
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .observe(fields, at);
    }

    fn persist(&self, kind: &str, metrics: Vec<(String, MarketMetric)>, run: ScrapeRun) {
        let Some(repo) = &self.history else { return };

        match repo.record_metrics(metrics.iter().map(|(k, m)| (k.clone(), m))) {
            Ok(n) => debug!("{}: persisted {} live values", kind, n),
            Err(e) => warn!("{}: could not persist live values: {:#}", kind, e),
        }
        if let Err(e) = repo.record_run(&run) {
            warn!("{}: could not record run: {:#}", kind, e);
        }
    }
}

fn page_html(result: Result<RenderedPage, ScrapeError>, errors: &mut Vec<String>) -> Option<String> {
    match result {
        Ok(page) => {
            debug!("{} rendered in {:.2?}", page.url, page.elapsed);
            Some(page.html)
        }
        Err(e) => {
            warn!("Page unavailable, its fields fall back: {}", e);
            errors.push(e.to_string());
            None
        }
    }
}

/// Highest change first, at most `n`.
fn rank_top_stocks(mut quotes: Vec<StockQuote>, n: usize) -> Vec<StockQuote> {
    quotes.sort_by(|a, b| b.change_ratio().total_cmp(&a.change_ratio()));
    quotes.truncate(n);
    quotes
}

fn commodity_key(key: CommodityKey) -> String {
    format!("commodity:{}", key)
}

fn snapshot_history(snapshot: &Snapshot) -> Vec<(String, MarketMetric)> {
    MetricKey::ALL
        .iter()
        .map(|k| (k.as_str().to_string(), snapshot.metric(*k).clone()))
        .chain(
            snapshot
                .sectoriels
                .iter()
                .map(|m| (sector_key(&m.name), m.clone())),
        )
        .collect()
}
