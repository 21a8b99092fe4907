use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeMode {
    #[default]
    Live,
    Simulation,
}

/// Page navigator configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default)]
    pub mode: ScrapeMode,

    #[serde(default = "default_navigation_timeout_secs")]
    pub navigation_timeout_secs: u64,

    #[serde(default = "default_content_timeout_secs")]
    pub content_timeout_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,

    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,

    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,

    #[serde(default = "default_accept_language")]
    pub accept_language: String,
}

/// Upstream pages scraped on every aggregation cycle
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourcesConfig {
    #[serde(default = "default_indices_url")]
    pub indices_url: String,

    #[serde(default = "default_stocks_url")]
    pub stocks_url: String,

    #[serde(default = "default_bceao_url")]
    pub bceao_url: String,

    #[serde(default = "default_fx_url")]
    pub fx_url: String,

    #[serde(default = "default_commodities_url")]
    pub commodities_url: String,

    /// CSS selector that marks a page as rendered.
    #[serde(default = "default_wait_selector")]
    pub wait_selector: String,
}

/// Freshness windows and aggregation knobs
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_index_ttl_secs")]
    pub index_ttl_secs: u64,

    #[serde(default = "default_commodity_ttl_secs")]
    pub commodity_ttl_secs: u64,

    #[serde(default = "default_top_stocks")]
    pub top_stocks: usize,

    #[serde(default = "default_failure_alert_threshold")]
    pub failure_alert_threshold: u32,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// A reference value served when nothing live or persisted is available.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ReferenceValue {
    pub value: f64,
    #[serde(default)]
    pub change_percent: f64,
}

impl ReferenceValue {
    pub const fn new(value: f64, change_percent: f64) -> Self {
        Self { value, change_percent }
    }
}

/// Reference values for every mandatory metric
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FallbackConfig {
    #[serde(default = "default_composite")]
    pub composite: ReferenceValue,
    #[serde(default = "default_fcfa_eur")]
    pub fcfa_eur: ReferenceValue,
    #[serde(default = "default_inflation")]
    pub inflation: ReferenceValue,
    #[serde(default = "default_taux_bceao")]
    pub taux_bceao: ReferenceValue,
    #[serde(default = "default_cacao")]
    pub cacao: ReferenceValue,
    #[serde(default = "default_cafe")]
    pub cafe: ReferenceValue,
    #[serde(default = "default_coton")]
    pub coton: ReferenceValue,
    #[serde(default = "default_petrole")]
    pub petrole: ReferenceValue,
    #[serde(default = "default_or")]
    pub or: ReferenceValue,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_navigation_timeout_secs() -> u64 {
    30
}
fn default_content_timeout_secs() -> u64 {
    15
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_max_retries() -> usize {
    2
}
fn default_retry_base_ms() -> u64 {
    500
}
fn default_user_agents() -> Vec<String> {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string(),
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36".to_string(),
        "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0".to_string(),
    ]
}
fn default_viewport_width() -> u32 {
    1366
}
fn default_viewport_height() -> u32 {
    768
}
fn default_accept_language() -> String {
    "fr-FR,fr;q=0.9,en;q=0.8".to_string()
}
fn default_indices_url() -> String {
    "https://www.brvm.org/fr/indices".to_string()
}
fn default_stocks_url() -> String {
    "https://www.brvm.org/fr/cours-actions/0".to_string()
}
fn default_bceao_url() -> String {
    "https://www.bceao.int/fr".to_string()
}
fn default_fx_url() -> String {
    "https://www.boursorama.com/bourse/devises/taux-de-change-euro-francCFA-EUR-XOF/".to_string()
}
fn default_commodities_url() -> String {
    "https://www.boursorama.com/bourse/matieres-premieres/".to_string()
}
fn default_wait_selector() -> String {
    "table".to_string()
}
fn default_index_ttl_secs() -> u64 {
    300
}
fn default_commodity_ttl_secs() -> u64 {
    600
}
fn default_top_stocks() -> usize {
    5
}
fn default_failure_alert_threshold() -> u32 {
    3
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/brvm.duckdb")
}
fn default_true() -> bool {
    true
}
fn default_composite() -> ReferenceValue {
    ReferenceValue::new(298.75, 0.0)
}
// XOF is pegged to the euro.
fn default_fcfa_eur() -> ReferenceValue {
    ReferenceValue::new(655.957, 0.0)
}
fn default_inflation() -> ReferenceValue {
    ReferenceValue::new(3.5, 0.0)
}
fn default_taux_bceao() -> ReferenceValue {
    ReferenceValue::new(3.25, 0.0)
}
fn default_cacao() -> ReferenceValue {
    ReferenceValue::new(7850.0, 0.0)
}
fn default_cafe() -> ReferenceValue {
    ReferenceValue::new(4620.0, 0.0)
}
fn default_coton() -> ReferenceValue {
    ReferenceValue::new(68.4, 0.0)
}
fn default_petrole() -> ReferenceValue {
    ReferenceValue::new(82.3, 0.0)
}
fn default_or() -> ReferenceValue {
    ReferenceValue::new(2350.0, 0.0)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_addr: default_bind_addr() }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            mode: ScrapeMode::Live,
            navigation_timeout_secs: default_navigation_timeout_secs(),
            content_timeout_secs: default_content_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            user_agents: default_user_agents(),
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            accept_language: default_accept_language(),
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            indices_url: default_indices_url(),
            stocks_url: default_stocks_url(),
            bceao_url: default_bceao_url(),
            fx_url: default_fx_url(),
            commodities_url: default_commodities_url(),
            wait_selector: default_wait_selector(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            index_ttl_secs: default_index_ttl_secs(),
            commodity_ttl_secs: default_commodity_ttl_secs(),
            top_stocks: default_top_stocks(),
            failure_alert_threshold: default_failure_alert_threshold(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: default_db_path(),
            run_migrations: true,
        }
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            composite: default_composite(),
            fcfa_eur: default_fcfa_eur(),
            inflation: default_inflation(),
            taux_bceao: default_taux_bceao(),
            cacao: default_cacao(),
            cafe: default_cafe(),
            coton: default_coton(),
            petrole: default_petrole(),
            or: default_or(),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("BRVM").separator("__"))
            .build()
            .context("Failed to assemble configuration sources")?;

        cfg.try_deserialize().context("Invalid configuration")
    }
}
