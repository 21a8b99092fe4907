use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ── Provenance ────────────────────────────────────────────────────────────────

/// Where a single metric value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Live,
    Fallback,
    Simulation,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Fallback => "fallback",
            Self::Simulation => "simulation",
        }
    }
}

/// Snapshot-level origin tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotSource {
    #[serde(rename = "brvm.org")]
    Brvm,
    #[serde(rename = "fallback")]
    Fallback,
    #[serde(rename = "simulation")]
    Simulation,
}

// ── Metric keys ───────────────────────────────────────────────────────────────

/// The fixed key set every market snapshot carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricKey {
    Composite,
    FcfaEur,
    Inflation,
    TauxBceao,
}

impl MetricKey {
    pub const ALL: [MetricKey; 4] = [
        MetricKey::Composite,
        MetricKey::FcfaEur,
        MetricKey::Inflation,
        MetricKey::TauxBceao,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Composite => "composite",
            Self::FcfaEur => "fcfa_eur",
            Self::Inflation => "inflation",
            Self::TauxBceao => "taux_bceao",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Composite => "BRVM Composite",
            Self::FcfaEur => "FCFA/EUR",
            Self::Inflation => "Inflation UEMOA",
            Self::TauxBceao => "Taux BCEAO",
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commodity keys served by the commodity snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommodityKey {
    Cacao,
    Cafe,
    Coton,
    Petrole,
    Or,
}

impl CommodityKey {
    pub const ALL: [CommodityKey; 5] = [
        CommodityKey::Cacao,
        CommodityKey::Cafe,
        CommodityKey::Coton,
        CommodityKey::Petrole,
        CommodityKey::Or,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cacao => "cacao",
            Self::Cafe => "cafe",
            Self::Coton => "coton",
            Self::Petrole => "petrole",
            Self::Or => "or",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Cacao => "Cacao",
            Self::Cafe => "Café",
            Self::Coton => "Coton",
            Self::Petrole => "Pétrole Brent",
            Self::Or => "Or",
        }
    }
}

impl fmt::Display for CommodityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Metric / quote ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MarketMetric {
    pub name: String,
    pub value: String,          // "185.42": no separators, no currency
    pub change: String,         // "+4.17"
    pub change_percent: String, // "+2.3%"
    pub is_positive: bool,
    pub last_update: DateTime<Utc>,
    pub source: Provenance,
}

impl MarketMetric {
    pub fn is_live(&self) -> bool {
        self.source == Provenance::Live
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StockQuote {
    pub symbol: String,
    pub name: String,
    pub price: String,
    pub change_percent: String,
    pub is_positive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
}

impl StockQuote {
    /// Numeric percentage change, used to rank quotes.
    pub fn change_ratio(&self) -> f64 {
        self.change_percent
            .trim_end_matches('%')
            .parse()
            .unwrap_or(0.0)
    }
}

// ── Snapshots ─────────────────────────────────────────────────────────────────

/// One aggregation cycle's worth of market data. Never mutated after build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(rename = "composite")]
    pub composite: MarketMetric,
    #[serde(rename = "fcfa_eur")]
    pub fcfa_eur: MarketMetric,
    #[serde(rename = "inflation")]
    pub inflation: MarketMetric,
    #[serde(rename = "taux_bceao")]
    pub taux_bceao: MarketMetric,
    pub sectoriels: Vec<MarketMetric>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_stocks: Option<Vec<StockQuote>>,
    pub timestamp: DateTime<Utc>,
    pub source: SnapshotSource,
}

impl Snapshot {
    pub fn metric(&self, key: MetricKey) -> &MarketMetric {
        match key {
            MetricKey::Composite => &self.composite,
            MetricKey::FcfaEur => &self.fcfa_eur,
            MetricKey::Inflation => &self.inflation,
            MetricKey::TauxBceao => &self.taux_bceao,
        }
    }

    pub fn live_count(&self) -> usize {
        MetricKey::ALL
            .iter()
            .filter(|k| self.metric(**k).is_live())
            .count()
            + self.sectoriels.iter().filter(|m| m.is_live()).count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommoditySnapshot {
    pub cacao: MarketMetric,
    pub cafe: MarketMetric,
    pub coton: MarketMetric,
    pub petrole: MarketMetric,
    pub or: MarketMetric,
    pub timestamp: DateTime<Utc>,
    pub source: Provenance,
}

impl CommoditySnapshot {
    pub fn metric(&self, key: CommodityKey) -> &MarketMetric {
        match key {
            CommodityKey::Cacao => &self.cacao,
            CommodityKey::Cafe => &self.cafe,
            CommodityKey::Coton => &self.coton,
            CommodityKey::Petrole => &self.petrole,
            CommodityKey::Or => &self.or,
        }
    }

    pub fn live_count(&self) -> usize {
        CommodityKey::ALL
            .iter()
            .filter(|k| self.metric(**k).is_live())
            .count()
    }
}

// ── Raw scraped rows ──────────────────────────────────────────────────────────

/// Cell texts of a located data row, before cleaning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawMetricRow {
    pub label: String,
    pub value: Option<String>,
    pub change: Option<String>,
    pub change_pct: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawStockRow {
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub price: Option<String>,
    pub change_pct: Option<String>,
    pub volume: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn metric(name: &str) -> MarketMetric {
        MarketMetric {
            name: name.to_string(),
            value: "185.42".to_string(),
            change: "+4.17".to_string(),
            change_percent: "+2.3%".to_string(),
            is_positive: true,
            last_update: Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap(),
            source: Provenance::Live,
        }
    }

    #[test]
    fn test_snapshot_json_shape() {
        let snap = Snapshot {
            composite: metric("BRVM Composite"),
            fcfa_eur: metric("FCFA/EUR"),
            inflation: metric("Inflation UEMOA"),
            taux_bceao: metric("Taux BCEAO"),
            sectoriels: vec![],
            top_stocks: None,
            timestamp: Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap(),
            source: SnapshotSource::Brvm,
        };
        let json = serde_json::to_value(&snap).unwrap();

        for key in ["composite", "fcfa_eur", "inflation", "taux_bceao", "sectoriels", "timestamp"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert!(json.get("topStocks").is_none());
        assert_eq!(json["source"], "brvm.org");
        assert_eq!(json["composite"]["changePercent"], "+2.3%");
        assert_eq!(json["composite"]["isPositive"], true);
        assert_eq!(json["composite"]["source"], "live");
        assert!(json["composite"].get("lastUpdate").is_some());
    }

    #[test]
    fn test_change_ratio() {
        let q = StockQuote {
            symbol: "SNTS".into(),
            name: "Sonatel".into(),
            price: "25000".into(),
            change_percent: "-1.25%".into(),
            is_positive: false,
            volume: None,
        };
        assert_eq!(q.change_ratio(), -1.25);
    }
}
