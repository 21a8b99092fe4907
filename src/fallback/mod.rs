//! Fallback data: last-known-good values when storage has them, static
//! reference values otherwise. Also the simulation generator.

use crate::config::{FallbackConfig, ReferenceValue};
use crate::models::{
    CommodityKey, CommoditySnapshot, MarketMetric, MetricKey, Provenance, Snapshot, SnapshotSource,
};
use crate::scraper::cleaner::{derive_change, format_signed};
use crate::storage::{Repository, SECTOR_PREFIX};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, warn};

/// Sector indices published by the exchange, with reference levels used by
/// simulation mode.
const SIMULATED_SECTORS: &[(&str, f64)] = &[
    ("BRVM - Télécommunications", 172.40),
    ("BRVM - Consommation discrétionnaire", 98.60),
    ("BRVM - Services financiers", 104.30),
    ("BRVM - Consommation de base", 212.80),
    ("BRVM - Industriels", 131.50),
    ("BRVM - Énergie", 118.20),
    ("BRVM - Services publics", 610.30),
];

pub struct FallbackProvider {
    reference: FallbackConfig,
    history: Option<Arc<Repository>>,
}

impl FallbackProvider {
    pub fn new(reference: FallbackConfig) -> Self {
        Self { reference, history: None }
    }

    /// Prefer persisted last-known-good values over static references.
    pub fn with_history(mut self, repo: Arc<Repository>) -> Self {
        self.history = Some(repo);
        self
    }

    pub fn fallback_for(&self, key: MetricKey) -> MarketMetric {
        self.last_known(key.as_str()).unwrap_or_else(|| {
            reference_metric(key.display_name(), self.reference_value(key), Utc::now())
        })
    }

    pub fn commodity_fallback_for(&self, key: CommodityKey) -> MarketMetric {
        self.last_known(&format!("commodity:{}", key))
            .unwrap_or_else(|| {
                reference_metric(key.display_name(), self.commodity_reference(key), Utc::now())
            })
    }

    /// Last persisted sector list, or nothing.
    pub fn sector_fallback(&self) -> Vec<MarketMetric> {
        let Some(repo) = &self.history else { return vec![] };
        match repo.latest_sectors() {
            Ok(sectors) => sectors,
            Err(e) => {
                warn!("Could not read persisted sectors: {:#}", e);
                vec![]
            }
        }
    }

    /// A complete snapshot made only of fallback data.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            composite: self.fallback_for(MetricKey::Composite),
            fcfa_eur: self.fallback_for(MetricKey::FcfaEur),
            inflation: self.fallback_for(MetricKey::Inflation),
            taux_bceao: self.fallback_for(MetricKey::TauxBceao),
            sectoriels: self.sector_fallback(),
            top_stocks: None,
            timestamp: Utc::now(),
            source: SnapshotSource::Fallback,
        }
    }

    pub fn commodity_snapshot(&self) -> CommoditySnapshot {
        CommoditySnapshot {
            cacao: self.commodity_fallback_for(CommodityKey::Cacao),
            cafe: self.commodity_fallback_for(CommodityKey::Cafe),
            coton: self.commodity_fallback_for(CommodityKey::Coton),
            petrole: self.commodity_fallback_for(CommodityKey::Petrole),
            or: self.commodity_fallback_for(CommodityKey::Or),
            timestamp: Utc::now(),
            source: Provenance::Fallback,
        }
    }

    pub fn reference_value(&self, key: MetricKey) -> &ReferenceValue {
        match key {
            MetricKey::Composite => &self.reference.composite,
            MetricKey::FcfaEur => &self.reference.fcfa_eur,
            MetricKey::Inflation => &self.reference.inflation,
            MetricKey::TauxBceao => &self.reference.taux_bceao,
        }
    }

    pub fn commodity_reference(&self, key: CommodityKey) -> &ReferenceValue {
        match key {
            CommodityKey::Cacao => &self.reference.cacao,
            CommodityKey::Cafe => &self.reference.cafe,
            CommodityKey::Coton => &self.reference.coton,
            CommodityKey::Petrole => &self.reference.petrole,
            CommodityKey::Or => &self.reference.or,
        }
    }

    fn last_known(&self, key: &str) -> Option<MarketMetric> {
        let repo = self.history.as_ref()?;
        match repo.latest_metric(key) {
            Ok(found) => {
                if found.is_some() {
                    debug!("{}: serving last-known-good value", key);
                }
                found
            }
            Err(e) => {
                warn!("{}: history lookup failed: {:#}", key, e);
                None
            }
        }
    }
}

/// Storage key for a sector index.
pub fn sector_key(name: &str) -> String {
    format!("{}{}", SECTOR_PREFIX, name)
}

fn reference_metric(name: &str, r: &ReferenceValue, at: DateTime<Utc>) -> MarketMetric {
    let change_percent = format!("{}%", format_signed(r.change_percent, 2));
    MarketMetric {
        name: name.to_string(),
        value: format!("{}", r.value),
        change: derive_change(r.value, &change_percent),
        is_positive: r.change_percent >= 0.0,
        change_percent,
        last_update: at,
        source: Provenance::Fallback,
    }
}

// ── Simulation ────────────────────────────────────────────────────────────────

/// Reference values with a small random drift, tagged `simulation`.
pub struct Simulator<'a> {
    reference: &'a FallbackProvider,
    max_drift_pct: f64,
}

impl<'a> Simulator<'a> {
    pub fn new(reference: &'a FallbackProvider) -> Self {
        Self { reference, max_drift_pct: 1.5 }
    }

    pub fn snapshot(&self) -> Snapshot {
        let now = Utc::now();
        let fallback = self.reference;
        Snapshot {
            composite: self.drift(
                MetricKey::Composite.display_name(),
                fallback.reference_value(MetricKey::Composite).value,
                now,
            ),
            // Pegged and administered rates do not move intraday.
            fcfa_eur: self.fixed(MetricKey::FcfaEur, now),
            inflation: self.fixed(MetricKey::Inflation, now),
            taux_bceao: self.fixed(MetricKey::TauxBceao, now),
            sectoriels: SIMULATED_SECTORS
                .iter()
                .map(|(name, base)| self.drift(name, *base, now))
                .collect(),
            top_stocks: None,
            timestamp: now,
            source: SnapshotSource::Simulation,
        }
    }

    pub fn commodity_snapshot(&self) -> CommoditySnapshot {
        let now = Utc::now();
        let m = |key: CommodityKey| {
            self.drift(
                key.display_name(),
                self.reference.commodity_reference(key).value,
                now,
            )
        };
        CommoditySnapshot {
            cacao: m(CommodityKey::Cacao),
            cafe: m(CommodityKey::Cafe),
            coton: m(CommodityKey::Coton),
            petrole: m(CommodityKey::Petrole),
            or: m(CommodityKey::Or),
            timestamp: now,
            source: Provenance::Simulation,
        }
    }

    fn fixed(&self, key: MetricKey, at: DateTime<Utc>) -> MarketMetric {
        MarketMetric {
            source: Provenance::Simulation,
            ..reference_metric(key.display_name(), self.reference.reference_value(key), at)
        }
    }

    fn drift(&self, name: &str, base: f64, at: DateTime<Utc>) -> MarketMetric {
        let pct = rand::thread_rng().gen_range(-self.max_drift_pct..=self.max_drift_pct);
        let value = base * (1.0 + pct / 100.0);
        let change_percent = format!("{}%", format_signed(pct, 2));
        MarketMetric {
            name: name.to_string(),
            value: format!("{:.2}", value),
            change: derive_change(value, &change_percent),
            is_positive: !change_percent.starts_with('-'),
            change_percent,
            last_update: at,
            source: Provenance::Simulation,
        }
    }
}
