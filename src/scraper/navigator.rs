//! Page navigator: owns browsing contexts and hands back rendered HTML.
//!
//! Every navigation gets its own context (cookie jar, user agent, viewport
//! hints) so no state leaks between requests. Contexts are released by
//! `Drop`, which covers success, error and timeout paths alike. Overall
//! deadlines are enforced with `tokio::time::timeout`, not by the client.
//! `close_all` broadcasts on a watch channel; in-flight navigations abort
//! with `NavigatorClosed` and drop their contexts.

use crate::config::ScraperConfig;
use crate::scraper::error::ScrapeError;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderName, HeaderValue, UPGRADE_INSECURE_REQUESTS,
};
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, sleep, timeout};
use tokio_retry::RetryIf;
use tokio_retry::strategy::{FibonacciBackoff, jitter};
use tracing::{debug, warn};
use url::Url;

// ── Options / page ────────────────────────────────────────────────────────────

/// What "rendered" means for a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitCondition {
    /// Done once the document contains a match for this CSS selector.
    Selector(String),
    /// Done once the response body has been fully received.
    NetworkIdle,
}

#[derive(Debug, Clone)]
pub struct NavigationOptions {
    pub wait_for: WaitCondition,
    pub navigation_timeout: Duration,
    pub content_timeout: Duration,
}

impl Default for NavigationOptions {
    fn default() -> Self {
        Self {
            wait_for: WaitCondition::NetworkIdle,
            navigation_timeout: Duration::from_secs(30),
            content_timeout: Duration::from_secs(15),
        }
    }
}

impl NavigationOptions {
    pub fn from_config(config: &ScraperConfig, wait_selector: &str) -> Self {
        let wait_for = if wait_selector.trim().is_empty() {
            WaitCondition::NetworkIdle
        } else {
            WaitCondition::Selector(wait_selector.to_string())
        };
        Self {
            wait_for,
            navigation_timeout: Duration::from_secs(config.navigation_timeout_secs),
            content_timeout: Duration::from_secs(config.content_timeout_secs),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub url: String,
    pub html: String,
    pub elapsed: Duration,
}

// ── Navigator trait ───────────────────────────────────────────────────────────

/// Swappable page loader. Extractors only ever see the returned HTML.
#[async_trait]
pub trait PageNavigator: Send + Sync {
    async fn open(&self, url: &str, options: &NavigationOptions)
        -> Result<RenderedPage, ScrapeError>;

    /// Tear down every context; later `open` calls fail.
    async fn close_all(&self);
}

/// Reject anything but absolute http(s) URLs.
pub fn validate_url(url: &str) -> Result<Url, ScrapeError> {
    let parsed = Url::parse(url).map_err(|_| ScrapeError::InvalidUrl(url.to_string()))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host().is_some() => Ok(parsed),
        _ => Err(ScrapeError::InvalidUrl(url.to_string())),
    }
}

pub fn selector_present(html: &str, selector: &str) -> Result<bool, ScrapeError> {
    let sel = Selector::parse(selector)
        .map_err(|_| ScrapeError::InvalidSelector(selector.to_string()))?;
    Ok(Html::parse_document(html).select(&sel).next().is_some())
}

// ── Context bookkeeping ───────────────────────────────────────────────────────

/// How long `close_all` waits for aborted navigations to drop their contexts.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

struct ContextRegistry {
    open: Mutex<HashSet<u64>>,
    next_id: AtomicU64,
    closed: watch::Sender<bool>,
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self {
            open: Mutex::new(HashSet::new()),
            next_id: AtomicU64::new(0),
            closed: watch::channel(false).0,
        }
    }
}

impl ContextRegistry {
    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn register(&self) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.open
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id);
        id
    }

    fn release(&self, id: u64) {
        self.open
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    fn count(&self) -> usize {
        self.open.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// An isolated browsing context. Released when dropped.
struct BrowsingContext {
    id: u64,
    client: reqwest::Client,
    registry: Arc<ContextRegistry>,
}

impl BrowsingContext {
    async fn fetch(&self, url: &str) -> Result<String, ScrapeError> {
        debug!("GET {} (context {})", url, self.id);

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| ScrapeError::Http { url: url.to_string(), source })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ScrapeError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        resp.text()
            .await
            .map_err(|source| ScrapeError::Http { url: url.to_string(), source })
    }
}

impl Drop for BrowsingContext {
    fn drop(&mut self) {
        self.registry.release(self.id);
        debug!("context {} closed", self.id);
    }
}

// ── HTTP-backed navigator ─────────────────────────────────────────────────────

pub struct HttpNavigator {
    config: ScraperConfig,
    registry: Arc<ContextRegistry>,
}

impl HttpNavigator {
    pub fn new(config: &ScraperConfig) -> Self {
        Self {
            config: config.clone(),
            registry: Arc::new(ContextRegistry::default()),
        }
    }

    /// Number of contexts currently open.
    pub fn active_contexts(&self) -> usize {
        self.registry.count()
    }

    fn pick_user_agent(&self) -> String {
        self.config
            .user_agents
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| "Mozilla/5.0".to_string())
    }

    fn new_context(&self, navigation_timeout: Duration) -> Result<BrowsingContext, ScrapeError> {
        if self.registry.is_closed() {
            return Err(ScrapeError::NavigatorClosed);
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&self.config.accept_language)
                .map_err(|e| ScrapeError::Launch(format!("accept-language: {}", e)))?,
        );
        headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
        headers.insert(
            HeaderName::from_static("viewport-width"),
            HeaderValue::from(self.config.viewport_width),
        );
        headers.insert(
            HeaderName::from_static("sec-ch-viewport-width"),
            HeaderValue::from(self.config.viewport_width),
        );
        headers.insert(
            HeaderName::from_static("sec-ch-viewport-height"),
            HeaderValue::from(self.config.viewport_height),
        );

        let client = reqwest::Client::builder()
            .user_agent(self.pick_user_agent())
            .default_headers(headers)
            .connect_timeout(navigation_timeout)
            .gzip(true)
            .cookie_store(true)
            .build()
            .map_err(|e| ScrapeError::Launch(e.to_string()))?;

        Ok(BrowsingContext {
            id: self.registry.register(),
            client,
            registry: Arc::clone(&self.registry),
        })
    }

    async fn load(&self, ctx: &BrowsingContext, url: &str) -> Result<String, ScrapeError> {
        let strategy = FibonacciBackoff::from_millis(self.config.retry_base_ms.max(1))
            .max_delay(Duration::from_secs(5))
            .map(jitter)
            .take(self.config.max_retries);

        RetryIf::spawn(strategy, || ctx.fetch(url), |e: &ScrapeError| {
            let retry = e.is_transient();
            if retry {
                warn!("retrying {}: {}", url, e);
            }
            retry
        })
        .await
    }

    /// Load, then wait for the content marker, each under its own deadline.
    async fn render(
        &self,
        ctx: &BrowsingContext,
        url: &str,
        options: &NavigationOptions,
        started: Instant,
    ) -> Result<String, ScrapeError> {
        let timed_out = || ScrapeError::NavigationTimeout {
            url: url.to_string(),
            elapsed: started.elapsed(),
        };

        let html = timeout(options.navigation_timeout, self.load(ctx, url))
            .await
            .map_err(|_| timed_out())??;

        match &options.wait_for {
            WaitCondition::NetworkIdle => Ok(html),
            WaitCondition::Selector(sel) => timeout(
                options.content_timeout,
                self.wait_for_selector(ctx, url, html, sel),
            )
            .await
            .map_err(|_| timed_out())?,
        }
    }

    async fn wait_for_selector(
        &self,
        ctx: &BrowsingContext,
        url: &str,
        mut html: String,
        selector: &str,
    ) -> Result<String, ScrapeError> {
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));
        loop {
            if selector_present(&html, selector)? {
                return Ok(html);
            }
            debug!("{}: {:?} not present yet", url, selector);
            sleep(poll).await;
            html = ctx.fetch(url).await?;
        }
    }
}

#[async_trait]
impl PageNavigator for HttpNavigator {
    async fn open(
        &self,
        url: &str,
        options: &NavigationOptions,
    ) -> Result<RenderedPage, ScrapeError> {
        validate_url(url)?;
        if let WaitCondition::Selector(sel) = &options.wait_for {
            Selector::parse(sel).map_err(|_| ScrapeError::InvalidSelector(sel.clone()))?;
        }

        let mut closed = self.registry.closed.subscribe();
        let ctx = self.new_context(options.navigation_timeout)?;
        let started = Instant::now();

        let html = tokio::select! {
            html = self.render(&ctx, url, options, started) => html?,
            Ok(_) = closed.wait_for(|closed| *closed) => {
                debug!("{}: navigation aborted by close (context {})", url, ctx.id);
                return Err(ScrapeError::NavigatorClosed);
            }
        };

        let elapsed = started.elapsed();
        debug!("{}: rendered {} bytes in {:.2?}", url, html.len(), elapsed);

        Ok(RenderedPage {
            url: url.to_string(),
            html,
            elapsed,
        })
    }

    async fn close_all(&self) {
        let open = self.active_contexts();
        self.registry.closed.send_replace(true);

        let drained = timeout(CLOSE_GRACE, async {
            while self.active_contexts() > 0 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await;

        match drained {
            Ok(()) => debug!("navigator closed ({} contexts torn down)", open),
            Err(_) => warn!(
                "navigator closed with {} contexts still unwinding",
                self.active_contexts()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn quick_config() -> ScraperConfig {
        ScraperConfig {
            max_retries: 0,
            poll_interval_ms: 20,
            ..ScraperConfig::default()
        }
    }

    fn options(wait_for: WaitCondition, nav_ms: u64, content_ms: u64) -> NavigationOptions {
        NavigationOptions {
            wait_for,
            navigation_timeout: Duration::from_millis(nav_ms),
            content_timeout: Duration::from_millis(content_ms),
        }
    }

    /// Serve `body` with a 200 to every connection.
    async fn serve(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = sock.read(&mut buf).await;
                    let resp = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = sock.write_all(resp.as_bytes()).await;
                });
            }
        });
        format!("http://{}/", addr)
    }

    /// Accept connections and never answer.
    async fn silent() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((sock, _)) = listener.accept().await {
                held.push(sock);
            }
        });
        format!("http://{}/", addr)
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("https://www.brvm.org/fr/indices").is_ok());
        assert!(validate_url("http://127.0.0.1:8080/").is_ok());
        assert!(matches!(validate_url("/fr/indices"), Err(ScrapeError::InvalidUrl(_))));
        assert!(matches!(validate_url("ftp://brvm.org"), Err(ScrapeError::InvalidUrl(_))));
    }

    #[test]
    fn test_selector_present() {
        let html = "<html><body><table><tr><td>x</td></tr></table></body></html>";
        assert!(selector_present(html, "table").unwrap());
        assert!(!selector_present(html, "div.indices").unwrap());
        assert!(selector_present(html, "[[").is_err());
    }

    #[tokio::test]
    async fn test_open_returns_html_once_selector_matches() {
        let url = serve("<html><body><table id=\"t\"><tr><td>1</td></tr></table></body></html>").await;
        let nav = HttpNavigator::new(&quick_config());

        let page = nav
            .open(&url, &options(WaitCondition::Selector("table#t".into()), 2000, 2000))
            .await
            .unwrap();

        assert!(page.html.contains("table"));
        assert_eq!(nav.active_contexts(), 0);
    }

    #[tokio::test]
    async fn test_navigation_timeout_releases_context() {
        let url = silent().await;
        let nav = HttpNavigator::new(&quick_config());

        let err = nav
            .open(&url, &options(WaitCondition::NetworkIdle, 150, 150))
            .await
            .unwrap_err();

        match err {
            ScrapeError::NavigationTimeout { url: u, .. } => assert_eq!(u, url),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(nav.active_contexts(), 0);
    }

    #[tokio::test]
    async fn test_content_wait_times_out_when_marker_missing() {
        let url = serve("<html><body><p>loading…</p></body></html>").await;
        let nav = HttpNavigator::new(&quick_config());

        let err = nav
            .open(&url, &options(WaitCondition::Selector("table".into()), 2000, 200))
            .await
            .unwrap_err();

        assert!(matches!(err, ScrapeError::NavigationTimeout { .. }));
        assert_eq!(nav.active_contexts(), 0);
    }

    #[tokio::test]
    async fn test_closed_navigator_refuses_open() {
        let nav = HttpNavigator::new(&quick_config());
        nav.close_all().await;
        let err = nav
            .open("https://www.brvm.org/", &NavigationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::NavigatorClosed));
    }

    #[tokio::test]
    async fn test_close_all_aborts_inflight_navigation() {
        let url = silent().await;
        let nav = Arc::new(HttpNavigator::new(&quick_config()));
        let started = std::time::Instant::now();

        let opener = Arc::clone(&nav);
        let pending = tokio::spawn(async move {
            opener
                .open(&url, &options(WaitCondition::NetworkIdle, 5000, 5000))
                .await
        });

        sleep(Duration::from_millis(200)).await;
        assert_eq!(nav.active_contexts(), 1);

        nav.close_all().await;
        assert_eq!(nav.active_contexts(), 0);

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, ScrapeError::NavigatorClosed), "got {err:?}");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_invalid_inputs_fail_before_context() {
        let nav = HttpNavigator::new(&quick_config());
        let bad_sel = options(WaitCondition::Selector("[[".into()), 100, 100);

        assert!(matches!(
            nav.open("not a url", &NavigationOptions::default()).await,
            Err(ScrapeError::InvalidUrl(_))
        ));
        assert!(matches!(
            nav.open("https://www.brvm.org/", &bad_sel).await,
            Err(ScrapeError::InvalidSelector(_))
        ));
        assert_eq!(nav.active_contexts(), 0);
    }
}
