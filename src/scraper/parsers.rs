//! Field extractors: locate data rows in arbitrary tabular HTML.
//!
//! Each field carries an ordered list of structural strategies. They are
//! tried strictly in order and the first row that yields a valid value wins;
//! when none does, a regex over the page text gets the last word.

use crate::models::{CommodityKey, MarketMetric, MetricKey, Provenance, RawMetricRow, RawStockRow, StockQuote};
use crate::scraper::cleaner::{
    Validity, clean_number, derive_change, extract_percentage, format_signed,
    is_positive_change, normalise_change, normalise_label, normalise_percent, parse_value,
};
use crate::scraper::error::ScrapeError;
use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;

/// Labels that mark a header row, never data.
const HEADER_TERMS: &[&str] = &["indice", "indices", "libellé", "libelle", "nom", "name"];

const NUMBER: &str = r"[-−]?(?:\d{1,3}(?:[\s\u{a0}]\d{3})+(?:[.,]\d+)?|\d+(?:[.,]\d{3})*(?:[.,]\d+)?)";
const PERCENT: &str = r"[+\-−]?\d+(?:[.,]\d+)?\s?%";

static SECTOR_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*brvm\s*[-–]\s*\S").expect("static sector regex"));

static SECTOR_TEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)(BRVM\s*[-–]\s*[\p{{L}}' ]+?)\s+({})(?:\s*\(?\s*({}))?",
        NUMBER, PERCENT
    ))
    .expect("static sector text regex")
});

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(NUMBER).expect("static number regex"));

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PERCENT).expect("static percent regex"));

/// What directly follows a day or a time rather than a quantity.
static DATE_TAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:/|:\d|[.,]\d|[-–]\d)").expect("static date tail regex"));

static SYMBOL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{2,6}(?:\.[A-Z]{2})?$").expect("static symbol regex"));

// ── Strategies ────────────────────────────────────────────────────────────────

/// One way of locating a field's row in a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Table row whose first cell matches one of the field's labels.
    LabelledRow,
    /// Element tagged with a semantic attribute or class (CSS selector).
    TaggedElement(&'static str),
    /// `<dt>`/`<dd>` pair whose term matches a label.
    DefinitionPair,
    /// First data row of the primary table (CSS selector for the table).
    LeadingRow(&'static str),
}

/// How to find and validate one scalar field.
#[derive(Debug)]
pub struct FieldSpec {
    pub field: &'static str,
    pub name: &'static str,
    /// Normalised labels (see `normalise_label`).
    pub labels: &'static [&'static str],
    pub strategies: &'static [Strategy],
    pub validity: Validity,
}

pub const COMPOSITE: FieldSpec = FieldSpec {
    field: "composite",
    name: "BRVM Composite",
    labels: &["brvm composite", "brvm c", "brvmc"],
    strategies: &[
        Strategy::LabelledRow,
        Strategy::TaggedElement(
            "tr[data-index='BRVMC'], tr[data-index='composite'], tr.brvm-composite, [data-metric='composite']",
        ),
        Strategy::LeadingRow("table"),
    ],
    validity: Validity::Positive,
};

pub const FCFA_EUR: FieldSpec = FieldSpec {
    field: "fcfa_eur",
    name: "FCFA/EUR",
    labels: &["eur xof", "eur fcfa", "fcfa eur", "xof eur", "euro franc cfa"],
    strategies: &[
        Strategy::LabelledRow,
        Strategy::TaggedElement("[data-ist-last], .c-instrument--last, [data-metric='fcfa_eur']"),
        Strategy::DefinitionPair,
    ],
    validity: Validity::Positive,
};

pub const INFLATION: FieldSpec = FieldSpec {
    field: "inflation",
    name: "Inflation UEMOA",
    labels: &["taux d inflation", "inflation"],
    strategies: &[
        Strategy::LabelledRow,
        Strategy::DefinitionPair,
        Strategy::TaggedElement("[data-metric='inflation']"),
    ],
    validity: Validity::NonNegative,
};

pub const TAUX_BCEAO: FieldSpec = FieldSpec {
    field: "taux_bceao",
    name: "Taux BCEAO",
    labels: &[
        "taux directeur",
        "principal taux directeur",
        "taux d intérêt minimum de soumission",
        "taux minimum de soumission",
    ],
    strategies: &[
        Strategy::LabelledRow,
        Strategy::DefinitionPair,
        Strategy::TaggedElement("[data-metric='taux_bceao']"),
    ],
    validity: Validity::NonNegative,
};

const COMMODITY_STRATEGIES: &[Strategy] = &[
    Strategy::LabelledRow,
    Strategy::DefinitionPair,
];

pub const CACAO: FieldSpec = FieldSpec {
    field: "cacao",
    name: "Cacao",
    labels: &["cacao", "cocoa"],
    strategies: COMMODITY_STRATEGIES,
    validity: Validity::Positive,
};

pub const CAFE: FieldSpec = FieldSpec {
    field: "cafe",
    name: "Café",
    labels: &["café", "cafe", "café robusta", "coffee", "robusta"],
    strategies: COMMODITY_STRATEGIES,
    validity: Validity::Positive,
};

pub const COTON: FieldSpec = FieldSpec {
    field: "coton",
    name: "Coton",
    labels: &["coton", "cotton"],
    strategies: COMMODITY_STRATEGIES,
    validity: Validity::Positive,
};

pub const PETROLE: FieldSpec = FieldSpec {
    field: "petrole",
    name: "Pétrole Brent",
    labels: &["pétrole brent", "petrole brent", "brent", "pétrole"],
    strategies: COMMODITY_STRATEGIES,
    validity: Validity::Positive,
};

pub const OR: FieldSpec = FieldSpec {
    field: "or",
    name: "Or",
    labels: &["or", "gold", "once d or"],
    strategies: COMMODITY_STRATEGIES,
    validity: Validity::Positive,
};

pub fn spec_for(key: MetricKey) -> &'static FieldSpec {
    match key {
        MetricKey::Composite => &COMPOSITE,
        MetricKey::FcfaEur => &FCFA_EUR,
        MetricKey::Inflation => &INFLATION,
        MetricKey::TauxBceao => &TAUX_BCEAO,
    }
}

pub fn commodity_spec(key: CommodityKey) -> &'static FieldSpec {
    match key {
        CommodityKey::Cacao => &CACAO,
        CommodityKey::Cafe => &CAFE,
        CommodityKey::Coton => &COTON,
        CommodityKey::Petrole => &PETROLE,
        CommodityKey::Or => &OR,
    }
}

// ── Public extractors ─────────────────────────────────────────────────────────

pub fn extract_composite(html: &str, at: DateTime<Utc>) -> Option<MarketMetric> {
    extract_metric(html, &COMPOSITE, at).ok()
}

/// Run a field's strategy list, then the text regex.
pub fn extract_metric(
    html: &str,
    spec: &FieldSpec,
    at: DateTime<Utc>,
) -> Result<MarketMetric, ScrapeError> {
    let doc = Html::parse_document(html);
    let mut rejected: Option<String> = None;

    for strategy in spec.strategies {
        let Some(row) = locate(&doc, spec, *strategy) else { continue };
        match build_metric(&row, spec.name, spec.validity, at) {
            Some(metric) => {
                debug!("{}: matched via {:?}", spec.field, strategy);
                return Ok(metric);
            }
            None => {
                rejected.get_or_insert_with(|| row.value.clone().unwrap_or_default());
            }
        }
    }

    if let Some(row) = text_fallback(&doc, spec) {
        if let Some(metric) = build_metric(&row, spec.name, spec.validity, at) {
            debug!("{}: matched via text fallback", spec.field);
            return Ok(metric);
        }
        rejected.get_or_insert_with(|| row.value.clone().unwrap_or_default());
    }

    Err(match rejected {
        Some(raw) => ScrapeError::MalformedUpstreamData { field: spec.field.to_string(), raw },
        None => ScrapeError::ExtractionMiss { field: spec.field.to_string() },
    })
}

/// Sector indices; header rows and the composite itself are skipped.
pub fn extract_sector_indices(html: &str, at: DateTime<Utc>) -> Vec<MarketMetric> {
    let doc = Html::parse_document(html);

    let tagged = sector_rows(
        &doc,
        "[data-section='sectoriels'] tr, table.sectoriels tr, #indices-sectoriels tr",
        |_| true,
    );
    let rows = if !tagged.is_empty() {
        tagged
    } else {
        let by_label = sector_rows(&doc, "tr", |label| SECTOR_LABEL_RE.is_match(label));
        if !by_label.is_empty() { by_label } else { sector_text_fallback(&doc) }
    };

    let mut seen = HashSet::new();
    rows.iter()
        .filter(|row| is_sector_label(&row.label))
        .filter_map(|row| build_metric(row, &row.label, Validity::Positive, at))
        .filter(|m| seen.insert(m.name.clone()))
        .collect()
}

/// Stock quote rows: header-mapped tables first, then symbol-shaped rows.
pub fn extract_stock_rows(html: &str) -> Vec<StockQuote> {
    let doc = Html::parse_document(html);

    let raw = header_mapped_stock_rows(&doc)
        .filter(|rows| !rows.is_empty())
        .or_else(|| symbol_shaped_stock_rows(&doc))
        .unwrap_or_default();

    let mut seen = HashSet::new();
    raw.iter()
        .filter_map(build_quote)
        .filter(|q| seen.insert(q.symbol.clone()))
        .collect()
}

// ── Row location ──────────────────────────────────────────────────────────────

fn sel(s: &str) -> Option<Selector> {
    Selector::parse(s).ok()
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn cells_of(row: ElementRef<'_>) -> Vec<String> {
    let Some(cell_sel) = sel("th, td") else { return vec![] };
    row.select(&cell_sel).map(text_of).collect()
}

fn label_matches(text: &str, labels: &[&str]) -> bool {
    let norm = normalise_label(text);
    labels
        .iter()
        .any(|l| norm == *l || norm.starts_with(&format!("{} ", l)))
}

fn is_header_term(label: &str) -> bool {
    let norm = normalise_label(label);
    HEADER_TERMS.contains(&norm.as_str())
}

fn locate(doc: &Html, spec: &FieldSpec, strategy: Strategy) -> Option<RawMetricRow> {
    match strategy {
        Strategy::LabelledRow => {
            let tr = sel("tr")?;
            doc.select(&tr)
                .map(cells_of)
                .find(|cells| cells.len() >= 2 && label_matches(&cells[0], spec.labels))
                .map(|cells| row_from_cells(&cells))
        }
        Strategy::TaggedElement(css) => {
            let tagged = sel(css)?;
            let el = doc.select(&tagged).next()?;
            let cells = cells_of(el);
            if cells.len() >= 2 {
                Some(row_from_cells(&cells))
            } else {
                let (value, change_pct) = split_inline(&text_of(el));
                Some(RawMetricRow {
                    label: spec.name.to_string(),
                    value: Some(value),
                    change: None,
                    change_pct,
                })
            }
        }
        Strategy::DefinitionPair => {
            let dt = sel("dt")?;
            let dd = sel("dd")?;
            let terms: Vec<String> = doc.select(&dt).map(text_of).collect();
            let defs: Vec<String> = doc.select(&dd).map(text_of).collect();
            terms
                .iter()
                .zip(defs.iter())
                .find(|(t, _)| label_matches(t, spec.labels))
                .map(|(t, d)| row_from_cells(&[t.clone(), d.clone()]))
        }
        Strategy::LeadingRow(css) => {
            let table_sel = sel(css)?;
            let tr = sel("tr")?;
            let td = sel("td")?;
            let table = doc.select(&table_sel).next()?;
            table
                .select(&tr)
                .filter(|row| row.select(&td).count() >= 2)
                .map(cells_of)
                .find(|cells| !is_header_term(&cells[0]))
                .map(|cells| row_from_cells(&cells))
        }
    }
}

fn compact(s: &str) -> String {
    s.split_whitespace().collect()
}

/// Split one element's text into its value and its percentage move.
/// "655,957 +0,01%" → ("655,957", "+0,01%"). A text holding only a
/// percentage keeps it as the value, like a percent-only cell.
fn split_inline(text: &str) -> (String, Option<String>) {
    let is_pct = |m: &regex::Match<'_>| text[m.end()..].trim_start().starts_with('%');
    match NUMBER_RE.find_iter(text).find(|m| !is_pct(m)) {
        Some(m) => {
            let rest = format!("{} {}", &text[..m.start()], &text[m.end()..]);
            let pct = PERCENT_RE.find(&rest).map(|p| p.as_str().to_string());
            (m.as_str().to_string(), pct)
        }
        None => (text.to_string(), None),
    }
}

fn is_date_tail(text: &str, end: usize) -> bool {
    DATE_TAIL_RE.is_match(&text[end..])
}

fn is_numeric_cell(s: &str) -> bool {
    clean_number(s).is_some_and(|c| c.parse::<f64>().is_ok())
}

/// Map cell texts onto label / value / change / change%.
/// The value is the first plain numeric cell after the label; a cell holding
/// a percentage only serves as the value when no plain number exists.
fn row_from_cells(cells: &[String]) -> RawMetricRow {
    let label = cells.first().cloned().unwrap_or_default();
    let rest = cells.get(1..).unwrap_or(&[]);

    let has_pct = |s: &String| extract_percentage(&compact(s)).is_some();

    let value_idx = rest
        .iter()
        .position(|c| !has_pct(c) && is_numeric_cell(c))
        .or_else(|| rest.iter().position(|c| is_numeric_cell(c)));

    let pct_idx = rest
        .iter()
        .enumerate()
        .position(|(i, c)| Some(i) != value_idx && has_pct(c));

    let change_idx = value_idx.and_then(|v| {
        rest.iter()
            .enumerate()
            .skip(v + 1)
            .find(|(_, c)| !has_pct(c) && is_numeric_cell(c))
            .map(|(i, _)| i)
    });

    RawMetricRow {
        label,
        value: value_idx.map(|i| rest[i].clone()),
        change: change_idx.map(|i| rest[i].clone()),
        change_pct: pct_idx.map(|i| rest[i].clone()),
    }
}

fn label_pattern(labels: &[&str]) -> String {
    labels
        .iter()
        .map(|l| {
            l.split_whitespace()
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(r"[\s\-–_.:/']*")
        })
        .collect::<Vec<_>>()
        .join("|")
}

/// `<label>[:space:]+<number>` over the whole page text.
fn text_fallback(doc: &Html, spec: &FieldSpec) -> Option<RawMetricRow> {
    let pattern = format!(
        r"(?i)\b(?:{})\s*[:=\-–]?\s*({})(?:\s*\(?\s*({}))?",
        label_pattern(spec.labels),
        NUMBER,
        PERCENT
    );
    let re = Regex::new(&pattern).ok()?;
    let text = text_of(doc.root_element());
    let caps = re
        .captures_iter(&text)
        .find(|caps| caps.get(1).is_some_and(|m| !is_date_tail(&text, m.end())))?;

    Some(RawMetricRow {
        label: spec.name.to_string(),
        value: caps.get(1).map(|m| m.as_str().to_string()),
        change: None,
        change_pct: caps.get(2).map(|m| m.as_str().to_string()),
    })
}

fn is_sector_label(label: &str) -> bool {
    !label.trim().is_empty()
        && !is_header_term(label)
        && !label_matches(label, COMPOSITE.labels)
        && !label_matches(label, &["brvm 30", "brvm prestige", "brvm principal"])
}

fn sector_rows(doc: &Html, css: &str, keep: impl Fn(&str) -> bool) -> Vec<RawMetricRow> {
    let Some(row_sel) = sel(css) else { return vec![] };
    doc.select(&row_sel)
        .map(cells_of)
        .filter(|cells| cells.len() >= 2 && keep(&cells[0]))
        .map(|cells| row_from_cells(&cells))
        .collect()
}

fn sector_text_fallback(doc: &Html) -> Vec<RawMetricRow> {
    let text = text_of(doc.root_element());
    SECTOR_TEXT_RE
        .captures_iter(&text)
        .filter(|caps| caps.get(2).is_some_and(|m| !is_date_tail(&text, m.end())))
        .map(|caps| RawMetricRow {
            label: caps.get(1).map(|m| m.as_str().trim().to_string()).unwrap_or_default(),
            value: caps.get(2).map(|m| m.as_str().to_string()),
            change: None,
            change_pct: caps.get(3).map(|m| m.as_str().to_string()),
        })
        .collect()
}

// ── Metric assembly ───────────────────────────────────────────────────────────

fn build_metric(
    row: &RawMetricRow,
    name: &str,
    validity: Validity,
    at: DateTime<Utc>,
) -> Option<MarketMetric> {
    let (value_str, value) = parse_value(row.value.as_deref()?, validity)?;

    let pct = row.change_pct.as_deref().and_then(normalise_percent);
    let change = row.change.as_deref().and_then(normalise_change);

    let (change, change_percent) = match (change, pct) {
        (Some(c), Some(p)) => (c, p),
        (None, Some(p)) => (derive_change(value, &p), p),
        (Some(c), None) => {
            let delta: f64 = c.parse().unwrap_or(0.0);
            let prev = value - delta;
            let p = if prev.abs() > f64::EPSILON { delta / prev * 100.0 } else { 0.0 };
            (c, format!("{}%", format_signed(p, 2)))
        }
        (None, None) => ("+0.00".to_string(), "+0.00%".to_string()),
    };

    let is_positive = [row.change.as_deref(), row.change_pct.as_deref()]
        .into_iter()
        .flatten()
        .all(is_positive_change);

    Some(MarketMetric {
        name: name.trim().to_string(),
        value: value_str,
        change,
        change_percent,
        is_positive,
        last_update: at,
        source: Provenance::Live,
    })
}

// ── Stock rows ────────────────────────────────────────────────────────────────

/// Column positions resolved from a table's header cells.
#[derive(Debug, Default)]
struct StockColumns {
    symbol: Option<usize>,
    name: Option<usize>,
    price: Option<usize>,
    change_pct: Option<usize>,
    volume: Option<usize>,
}

impl StockColumns {
    fn from_headers(headers: &[String]) -> Self {
        let h: Vec<String> = headers.iter().map(|s| normalise_label(s)).collect();
        let find = |pred: &dyn Fn(&str) -> bool| h.iter().position(|x| pred(x));

        let price = find(&|x: &str| {
            x.contains("clôture") || x.contains("cloture") || x.contains("close")
                || x.contains("dernier") || x.contains("last")
        })
        .or_else(|| h.iter().rposition(|x| x.contains("cours") || x.contains("price")));

        Self {
            symbol: find(&|x: &str| x.contains("symbole") || x.contains("symbol") || x.contains("ticker") || x == "code"),
            name: find(&|x: &str| x.starts_with("nom") || x.contains("name") || x.contains("société") || x.contains("libellé")),
            price,
            change_pct: find(&|x: &str| x.contains("variation") || x.starts_with("var") || x.contains("change")),
            volume: find(&|x: &str| x.contains("volume")),
        }
    }
}

fn header_mapped_stock_rows(doc: &Html) -> Option<Vec<RawStockRow>> {
    let table_sel = sel("table")?;
    let th_sel = sel("th")?;
    let tr_sel = sel("tr")?;
    let td_sel = sel("td")?;

    for table in doc.select(&table_sel) {
        let headers: Vec<String> = table.select(&th_sel).map(text_of).collect();
        let cols = StockColumns::from_headers(&headers);
        let (Some(sym_idx), Some(price_idx)) = (cols.symbol, cols.price) else { continue };

        let mut rows = Vec::new();
        for tr in table.select(&tr_sel) {
            let cells: Vec<String> = tr.select(&td_sel).map(text_of).collect();
            if cells.is_empty() || cells.iter().all(|c| c.is_empty()) {
                continue;
            }
            rows.push(RawStockRow {
                symbol: cells.get(sym_idx).cloned(),
                name: cols.name.and_then(|i| cells.get(i)).cloned(),
                price: cells.get(price_idx).cloned(),
                change_pct: cols.change_pct.and_then(|i| cells.get(i)).cloned(),
                volume: cols.volume.and_then(|i| cells.get(i)).cloned(),
            });
        }

        if !rows.is_empty() {
            return Some(rows);
        }
    }

    None
}

/// No usable headers: take rows whose first cell looks like a ticker symbol.
fn symbol_shaped_stock_rows(doc: &Html) -> Option<Vec<RawStockRow>> {
    let tr_sel = sel("tr")?;
    let td_sel = sel("td")?;
    let mut rows = Vec::new();

    for tr in doc.select(&tr_sel) {
        let cells: Vec<String> = tr.select(&td_sel).map(text_of).collect();
        if cells.len() < 3 || !SYMBOL_RE.is_match(cells[0].trim()) {
            continue;
        }

        let pct_idx = cells
            .iter()
            .position(|c| extract_percentage(&compact(c)).is_some());
        let price_end = pct_idx.unwrap_or(cells.len());
        let price_idx = (1..price_end).rev().find(|&i| is_numeric_cell(&cells[i]));

        rows.push(RawStockRow {
            symbol: Some(cells[0].clone()),
            name: cells.get(1).filter(|c| !is_numeric_cell(c)).cloned(),
            price: price_idx.map(|i| cells[i].clone()),
            change_pct: pct_idx.map(|i| cells[i].clone()),
            volume: None,
        });
    }

    if rows.is_empty() { None } else { Some(rows) }
}

fn build_quote(row: &RawStockRow) -> Option<StockQuote> {
    let symbol = row.symbol.as_deref()?.trim().to_uppercase();
    if symbol.is_empty() || is_header_term(&symbol) {
        return None;
    }
    let (price, _) = parse_value(row.price.as_deref()?, Validity::Positive)?;
    let raw_pct = row.change_pct.as_deref().unwrap_or("");

    Some(StockQuote {
        name: row.name.clone().map(|n| n.trim().to_string()).unwrap_or_else(|| symbol.clone()),
        symbol,
        price,
        change_percent: normalise_percent(raw_pct).unwrap_or_else(|| "+0.00%".to_string()),
        is_positive: is_positive_change(raw_pct),
        volume: row.volume.as_deref().and_then(clean_number),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 0).unwrap()
    }

    fn table(rows: &str) -> String {
        format!("<html><body><table><tbody>{}</tbody></table></body></html>", rows)
    }

    #[test]
    fn test_composite_from_labelled_row() {
        let html = table("<tr><td>BRVM Composite</td><td>185.42</td><td>+2.3%</td></tr>");
        let m = extract_composite(&html, at()).unwrap();
        assert_eq!(m.name, "BRVM Composite");
        assert_eq!(m.value, "185.42");
        assert_eq!(m.change_percent, "+2.3%");
        assert!(m.is_positive);
        assert_eq!(m.change, "+4.17");
        assert_eq!(m.source, Provenance::Live);
    }

    #[test]
    fn test_composite_bare_row_uses_text_fallback() {
        let html = "<tr><td>BRVM Composite</td><td>185.42</td><td>+2.3%</td></tr>";
        let m = extract_composite(html, at()).unwrap();
        assert_eq!(m.value, "185.42");
        assert_eq!(m.change_percent, "+2.3%");
    }

    #[test]
    fn test_composite_french_formatting_and_negative_change() {
        let html = table(
            "<tr><th>Indice</th><th>Valeur</th><th>Var.</th><th>Var. %</th></tr>\
             <tr><td>BRVM - COMPOSITE</td><td>1 298,75</td><td>−3,10</td><td>-0,24 %</td></tr>",
        );
        let m = extract_composite(&html, at()).unwrap();
        assert_eq!(m.value, "1298.75");
        assert_eq!(m.change, "-3.10");
        assert_eq!(m.change_percent, "-0.24%");
        assert!(!m.is_positive);
    }

    #[test]
    fn test_strategies_short_circuit_in_order() {
        // The labelled row wins even though a tagged row is also present.
        let html = table(
            "<tr data-index=\"BRVMC\"><td>Composite</td><td>999.00</td><td>+9%</td></tr>\
             <tr><td>BRVM Composite</td><td>185.42</td><td>+2.3%</td></tr>",
        );
        assert_eq!(extract_composite(&html, at()).unwrap().value, "185.42");
    }

    #[test]
    fn test_invalid_labelled_row_falls_through_to_tagged_row() {
        let html = table(
            "<tr><td>BRVM Composite</td><td>0</td><td>0%</td></tr>\
             <tr data-index=\"BRVMC\"><td>Composite</td><td>201.10</td><td>+0.5%</td></tr>",
        );
        let m = extract_composite(&html, at()).unwrap();
        assert_eq!(m.value, "201.10");
        assert_eq!(m.name, "BRVM Composite");
    }

    #[test]
    fn test_leading_row_skips_header_term() {
        let html = table(
            "<tr><td>Indice</td><td>0</td><td>0%</td></tr>\
             <tr><td>Marché</td><td>210.5</td><td>1.1%</td></tr>",
        );
        let m = extract_composite(&html, at()).unwrap();
        assert_eq!(m.value, "210.5");
        assert_eq!(m.change_percent, "+1.1%");
    }

    #[test]
    fn test_no_match_is_a_miss_not_zero() {
        let html = "<html><body><p>Maintenance en cours</p></body></html>";
        assert!(extract_composite(html, at()).is_none());
        assert!(matches!(
            extract_metric(html, &COMPOSITE, at()),
            Err(ScrapeError::ExtractionMiss { .. })
        ));
    }

    #[test]
    fn test_zero_value_is_malformed() {
        let html = "<html><body><p>BRVM Composite : 0</p></body></html>";
        assert!(matches!(
            extract_metric(html, &COMPOSITE, at()),
            Err(ScrapeError::MalformedUpstreamData { .. })
        ));
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let html = table(
            "<tr><td>BRVM Composite</td><td>185.42</td><td>+2.3%</td></tr>\
             <tr><td>BRVM - Industrie</td><td>120,10</td><td>-0,5%</td></tr>",
        );
        assert_eq!(extract_composite(&html, at()), extract_composite(&html, at()));
        assert_eq!(
            extract_sector_indices(&html, at()),
            extract_sector_indices(&html, at())
        );
    }

    #[test]
    fn test_sector_indices_exclude_header_row() {
        let html = "<html><body><table class=\"sectoriels\">\
            <tr><td>Indice</td><td>0</td><td>0%</td></tr>\
            <tr><td>Industrie</td><td>120,10</td><td>-0,5%</td></tr>\
            <tr><td>Services Publics</td><td>610.32</td><td>+1.2%</td></tr>\
            </table></body></html>";
        let sectors = extract_sector_indices(html, at());
        let names: Vec<&str> = sectors.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Industrie", "Services Publics"]);
        assert_eq!(sectors[0].value, "120.10");
        assert!(!sectors[0].is_positive);
    }

    #[test]
    fn test_sector_indices_by_label_skip_composite() {
        let html = table(
            "<tr><td>Indice</td><td>0</td><td>0%</td></tr>\
             <tr><td>BRVM Composite</td><td>185.42</td><td>+2.3%</td></tr>\
             <tr><td>BRVM - Finances</td><td>98.7</td><td>+0.4%</td></tr>\
             <tr><td>BRVM - Distribution</td><td>301.2</td><td>-1.0%</td></tr>",
        );
        let sectors = extract_sector_indices(&html, at());
        assert_eq!(sectors.len(), 2);
        assert_eq!(sectors[0].name, "BRVM - Finances");
        assert_eq!(sectors[1].change_percent, "-1.0%");
    }

    #[test]
    fn test_sector_text_fallback() {
        let html = "<div>BRVM - Agriculture 412,50 (+0,80 %) BRVM - Transport 250.1 -1.2%</div>";
        let sectors = extract_sector_indices(html, at());
        assert_eq!(sectors.len(), 2);
        assert_eq!(sectors[0].name, "BRVM - Agriculture");
        assert_eq!(sectors[0].value, "412.50");
        assert_eq!(sectors[0].change_percent, "+0.80%");
    }

    #[test]
    fn test_bceao_rates_with_percent_values() {
        let html = "<html><body><dl>\
            <dt>Taux directeur</dt><dd>3,25 %</dd>\
            <dt>Taux d'inflation (août 2026)</dt><dd>2,9 %</dd>\
            </dl></body></html>";
        let rate = extract_metric(html, &TAUX_BCEAO, at()).unwrap();
        let infl = extract_metric(html, &INFLATION, at()).unwrap();
        assert_eq!(rate.value, "3.25");
        assert_eq!(rate.change_percent, "+0.00%");
        assert_eq!(infl.value, "2.9");
        assert_eq!(infl.name, "Inflation UEMOA");
    }

    #[test]
    fn test_fx_from_tagged_element() {
        let html = "<html><body><span class=\"c-instrument c-instrument--last\" data-ist-last>655,957</span></body></html>";
        let m = extract_metric(html, &FCFA_EUR, at()).unwrap();
        assert_eq!(m.value, "655.957");
        assert_eq!(m.name, "FCFA/EUR");
    }

    #[test]
    fn test_fx_tagged_element_with_inline_change() {
        let html = "<html><body><span data-ist-last>655,957 +0,01%</span></body></html>";
        let m = extract_metric(html, &FCFA_EUR, at()).unwrap();
        assert_eq!(m.value, "655.957");
        assert_eq!(m.change_percent, "+0.01%");
        assert_eq!(m.change, "+0.07");
        assert!(m.is_positive);

        let html = "<html><body><span data-ist-last>−0,12 % 655,100</span></body></html>";
        let m = extract_metric(html, &FCFA_EUR, at()).unwrap();
        assert_eq!(m.value, "655.100");
        assert_eq!(m.change_percent, "-0.12%");
        assert!(!m.is_positive);
    }

    #[test]
    fn test_date_after_label_is_not_a_value() {
        let html = "<html><body><h2>BRVM Composite 17/10/2026</h2></body></html>";
        assert!(extract_composite(html, at()).is_none());
        assert!(matches!(
            extract_metric(html, &COMPOSITE, at()),
            Err(ScrapeError::ExtractionMiss { .. })
        ));

        let html = "<html><body><h2>BRVM Composite 17.10.2026</h2></body></html>";
        assert!(extract_composite(html, at()).is_none());

        let html = "<html><body><h2>BRVM Composite 17/10/2026</h2>\
            <p>BRVM Composite : 185,42 (+0,5 %)</p></body></html>";
        let m = extract_composite(html, at()).unwrap();
        assert_eq!(m.value, "185.42");
        assert_eq!(m.change_percent, "+0.5%");
    }

    #[test]
    fn test_total_loss_percentage_keeps_change_finite() {
        let html = table("<tr><td>BRVM Composite</td><td>185.42</td><td>-100%</td></tr>");
        let m = extract_composite(&html, at()).unwrap();
        assert_eq!(m.change, "+0.00");
        assert_eq!(m.change_percent, "-100.00%");
    }

    #[test]
    fn test_stock_rows_header_mapped() {
        let html = "<html><body><table>\
            <thead><tr><th>Symbole</th><th>Nom</th><th>Volume</th><th>Cours veille (FCFA)</th>\
            <th>Cours Ouverture (FCFA)</th><th>Cours Clôture (FCFA)</th><th>Variation (%)</th></tr></thead>\
            <tbody>\
            <tr><td>SNTS</td><td>SONATEL SN</td><td>1 520</td><td>25 000</td><td>25 100</td><td>25 500</td><td>2,00 %</td></tr>\
            <tr><td>ORAC</td><td>ORANGE COTE D'IVOIRE</td><td>310</td><td>14 000</td><td>14 000</td><td>13 900</td><td>-0,71 %</td></tr>\
            </tbody></table></body></html>";
        let quotes = extract_stock_rows(html);
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].symbol, "SNTS");
        assert_eq!(quotes[0].price, "25500");
        assert_eq!(quotes[0].change_percent, "+2.00%");
        assert_eq!(quotes[0].volume.as_deref(), Some("1520"));
        assert!(!quotes[1].is_positive);
        assert_eq!(quotes[1].name, "ORANGE COTE D'IVOIRE");
    }

    #[test]
    fn test_stock_rows_symbol_shaped_fallback() {
        let html = table(
            "<tr><td>Symbole</td><td>x</td><td>y</td></tr>\
             <tr><td>BOAB</td><td>BANK OF AFRICA BENIN</td><td>6 100</td><td>+1.5%</td></tr>\
             <tr><td>SGBC</td><td>SOCIETE GENERALE CI</td><td>0</td><td>0%</td></tr>",
        );
        let quotes = extract_stock_rows(&html);
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].symbol, "BOAB");
        assert_eq!(quotes[0].price, "6100");
    }

    #[test]
    fn test_commodity_rows() {
        let html = table(
            "<tr><td>Cacao (Londres)</td><td>7 850,00</td><td>+1,20 %</td></tr>\
             <tr><td>Pétrole Brent</td><td>82,30</td><td>-0,45 %</td></tr>",
        );
        let cacao = extract_metric(&html, &CACAO, at()).unwrap();
        let brent = extract_metric(&html, &PETROLE, at()).unwrap();
        assert_eq!(cacao.value, "7850.00");
        assert_eq!(brent.change_percent, "-0.45%");
        assert!(extract_metric(&html, &OR, at()).is_err());
    }
}
