use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::fetch::{
    DisableParams, EnableParams, EventRequestPaused, FulfillRequestParams, RequestPattern,
};
use chromiumoxide::cdp::browser_protocol::network::Headers;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::browser_protocol::target::TargetId;
use chromiumoxide::{Element, Page};
use futures::StreamExt as _;
use regex::Regex;
use tokio::sync::{Mutex, mpsc};
use tokio::time::{Instant, sleep};

use crate::browser::{BrowserSession, InterceptedRequest, Tab};
use crate::config::Config;

/// Default cap on DOM and URL waits. The download signal wait is the one
/// deliberate exception and has no bound.
const DEFAULT_WAIT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(250);
/// How often the new-tab subscription polls the target list.
const TAB_POLL_INTERVAL: Duration = Duration::from_millis(400);

struct Inner {
    browser: Mutex<Browser>,
    handler: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    subscriptions: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

/// Chromium-backed [`BrowserSession`] over the Chrome DevTools Protocol.
pub struct ChromeSession {
    inner: Arc<Inner>,
}

pub async fn launch(config: &Config) -> anyhow::Result<ChromeSession> {
    let mut builder = BrowserConfig::builder();
    if !config.browser.headless {
        builder = builder.with_head();
    }
    let browser_config = builder
        .build()
        .map_err(|err| anyhow::anyhow!("build browser config: {err}"))?;

    let (browser, mut handler) = Browser::launch(browser_config)
        .await
        .context("launch chromium")?;
    let handler_task = tokio::spawn(async move {
        while let Some(message) = handler.next().await {
            if let Err(err) = message {
                tracing::debug!(err = format!("{err:#}"), "cdp handler message");
            }
        }
    });

    Ok(ChromeSession {
        inner: Arc::new(Inner {
            browser: Mutex::new(browser),
            handler: std::sync::Mutex::new(Some(handler_task)),
            subscriptions: std::sync::Mutex::new(Vec::new()),
        }),
    })
}

impl Inner {
    async fn target_ids(&self) -> anyhow::Result<HashSet<TargetId>> {
        let browser = self.browser.lock().await;
        let pages = browser.pages().await.context("list browser pages")?;
        Ok(pages
            .iter()
            .map(|page| page.target_id().clone())
            .collect())
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn entry_tab(&self) -> anyhow::Result<Arc<dyn Tab>> {
        let page = self
            .inner
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .context("open entry tab")?;
        Ok(Arc::new(ChromeTab::new(page)))
    }

    async fn subscribe_new_tabs(&self) -> anyhow::Result<mpsc::Receiver<Arc<dyn Tab>>> {
        // snapshot what exists now; everything beyond it is a new tab
        let mut known = self.inner.target_ids().await?;
        let (tx, rx) = mpsc::channel(8);
        let inner = Arc::clone(&self.inner);
        let poller = tokio::spawn(async move {
            loop {
                sleep(TAB_POLL_INTERVAL).await;
                let pages = {
                    let browser = inner.browser.lock().await;
                    match browser.pages().await {
                        Ok(pages) => pages,
                        Err(err) => {
                            tracing::debug!(err = format!("{err:#}"), "poll browser pages");
                            continue;
                        }
                    }
                };
                for page in pages {
                    let target_id = page.target_id().clone();
                    if !known.insert(target_id) {
                        continue;
                    }
                    let tab: Arc<dyn Tab> = Arc::new(ChromeTab::new(page));
                    if tx.send(tab).await.is_err() {
                        return;
                    }
                }
            }
        });
        self.inner
            .subscriptions
            .lock()
            .expect("subscription list lock poisoned")
            .push(poller);
        Ok(rx)
    }

    async fn close(&self) -> anyhow::Result<()> {
        for task in self
            .inner
            .subscriptions
            .lock()
            .expect("subscription list lock poisoned")
            .drain(..)
        {
            task.abort();
        }

        {
            let mut browser = self.inner.browser.lock().await;
            browser.close().await.context("close browser")?;
            browser.wait().await.context("wait for browser exit")?;
        }

        if let Some(handler) = self
            .inner
            .handler
            .lock()
            .expect("handler lock poisoned")
            .take()
        {
            handler.abort();
        }
        Ok(())
    }
}

struct RouteState {
    forward: tokio::task::JoinHandle<()>,
}

/// One CDP page wrapped as a [`Tab`]. The interception rule slot enforces
/// the one-rule-per-tab ownership the walker relies on.
pub struct ChromeTab {
    page: Page,
    route: Mutex<Option<RouteState>>,
}

impl ChromeTab {
    fn new(page: Page) -> Self {
        Self {
            page,
            route: Mutex::new(None),
        }
    }

    /// Polls until the selector has a match at `index`, then returns it.
    async fn element(&self, selector: &str, index: usize) -> anyhow::Result<Element> {
        let deadline = Instant::now() + DEFAULT_WAIT;
        loop {
            let elements = self
                .page
                .find_elements(selector)
                .await
                .unwrap_or_default();
            if let Some(element) = elements.into_iter().nth(index) {
                return Ok(element);
            }
            anyhow::ensure!(
                Instant::now() < deadline,
                "timed out waiting for element {selector}[{index}]"
            );
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn visible(&self, selector: &str, index: usize) -> anyhow::Result<bool> {
        let expression = format!(
            "(() => {{ const el = document.querySelectorAll({selector})[{index}]; \
             if (!el) return false; const rect = el.getBoundingClientRect(); \
             return rect.width > 0 && rect.height > 0; }})()",
            selector = js_string(selector),
        );
        let visible: bool = self
            .page
            .evaluate(expression)
            .await
            .with_context(|| format!("evaluate visibility of {selector}[{index}]"))?
            .into_value()
            .context("decode visibility result")?;
        Ok(visible)
    }
}

#[async_trait]
impl Tab for ChromeTab {
    async fn goto(&self, url: &str) -> anyhow::Result<()> {
        self.page
            .goto(url)
            .await
            .with_context(|| format!("navigate to {url}"))?;
        Ok(())
    }

    async fn wait_for_url(&self, pattern: &str) -> anyhow::Result<()> {
        let deadline = Instant::now() + DEFAULT_WAIT;
        loop {
            let current = self
                .page
                .url()
                .await
                .context("read page url")?
                .unwrap_or_default();
            if url_matches(pattern, &current) {
                return Ok(());
            }
            anyhow::ensure!(
                Instant::now() < deadline,
                "timed out waiting for url matching {pattern}; still at {current}"
            );
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn click(&self, selector: &str) -> anyhow::Result<()> {
        self.click_nth(selector, 0).await
    }

    async fn click_nth(&self, selector: &str, index: usize) -> anyhow::Result<()> {
        let element = self.element(selector, index).await?;
        element
            .click()
            .await
            .with_context(|| format!("click {selector}[{index}]"))?;
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> anyhow::Result<()> {
        let element = self.element(selector, 0).await?;
        element
            .click()
            .await
            .with_context(|| format!("focus {selector}"))?;
        element
            .type_str(text)
            .await
            .with_context(|| format!("type into {selector}"))?;
        Ok(())
    }

    async fn count(&self, selector: &str) -> anyhow::Result<usize> {
        let expression = format!(
            "document.querySelectorAll({selector}).length",
            selector = js_string(selector),
        );
        let count: usize = self
            .page
            .evaluate(expression)
            .await
            .with_context(|| format!("count matches of {selector}"))?
            .into_value()
            .context("decode match count")?;
        Ok(count)
    }

    async fn wait_visible(&self, selector: &str, index: usize) -> anyhow::Result<()> {
        let deadline = Instant::now() + DEFAULT_WAIT;
        loop {
            if self.visible(selector, index).await? {
                return Ok(());
            }
            anyhow::ensure!(
                Instant::now() < deadline,
                "timed out waiting for {selector}[{index}] to become visible"
            );
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn is_visible(&self, selector: &str, index: usize) -> anyhow::Result<bool> {
        self.visible(selector, index).await
    }

    async fn text(&self, selector: &str, index: usize) -> anyhow::Result<String> {
        let element = self.element(selector, index).await?;
        let text = element
            .inner_text()
            .await
            .with_context(|| format!("read text of {selector}[{index}]"))?
            .unwrap_or_default();
        Ok(text.trim().to_owned())
    }

    async fn screenshot(&self, selector: &str, path: &Path) -> anyhow::Result<()> {
        let element = self.element(selector, 0).await?;
        let bytes = element
            .screenshot(CaptureScreenshotFormat::Png)
            .await
            .with_context(|| format!("screenshot {selector}"))?;
        tokio::fs::write(path, bytes)
            .await
            .with_context(|| format!("write screenshot: {}", path.display()))?;
        Ok(())
    }

    async fn route_register(
        &self,
        url_pattern: &str,
    ) -> anyhow::Result<mpsc::Receiver<InterceptedRequest>> {
        let mut slot = self.route.lock().await;
        anyhow::ensure!(
            slot.is_none(),
            "interception rule already registered on this tab"
        );

        let pattern = RequestPattern {
            url_pattern: Some(url_pattern.to_owned()),
            resource_type: None,
            request_stage: None,
        };
        self.page
            .execute(EnableParams {
                patterns: Some(vec![pattern]),
                handle_auth_requests: None,
            })
            .await
            .context("enable fetch interception")?;

        let mut events = self
            .page
            .event_listener::<EventRequestPaused>()
            .await
            .context("listen for paused requests")?;
        let (tx, rx) = mpsc::channel(8);
        let page = self.page.clone();
        let forward = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let (request, fulfilled) = InterceptedRequest::new(
                    event.request.url.clone(),
                    header_map(&event.request.headers),
                );
                if tx.send(request).await.is_err() {
                    break;
                }

                let request_id = event.request_id.clone();
                let page = page.clone();
                tokio::spawn(async move {
                    // the route is resolved only once the bridge is done
                    // with the download attempt
                    if fulfilled.await.is_err() {
                        return;
                    }
                    let params = match FulfillRequestParams::builder()
                        .request_id(request_id)
                        .response_code(204)
                        .build()
                    {
                        Ok(params) => params,
                        Err(err) => {
                            tracing::debug!(%err, "build fulfill params");
                            return;
                        }
                    };
                    if let Err(err) = page.execute(params).await {
                        tracing::debug!(err = format!("{err:#}"), "fulfill intercepted route");
                    }
                });
            }
        });

        *slot = Some(RouteState { forward });
        Ok(rx)
    }

    async fn route_clear(&self) -> anyhow::Result<()> {
        let mut slot = self.route.lock().await;
        if let Some(state) = slot.take() {
            state.forward.abort();
            // disabling releases any requests still paused on this tab
            self.page
                .execute(DisableParams::default())
                .await
                .context("disable fetch interception")?;
        }
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.page.clone().close().await.context("close tab")?;
        Ok(())
    }
}

fn header_map(headers: &Headers) -> HashMap<String, String> {
    let mut out = HashMap::new();
    if let Ok(serde_json::Value::Object(map)) = serde_json::to_value(headers) {
        for (name, value) in map {
            if let serde_json::Value::String(value) = value {
                out.insert(name, value);
            }
        }
    }
    out
}

fn js_string(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| format!("\"{text}\""))
}

/// Glob match in the style browser tooling uses for URL patterns: `*`
/// matches within a path segment, `**` across segments, `?` one character.
fn url_matches(pattern: &str, url: &str) -> bool {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    regex.push_str(".*");
                } else {
                    regex.push_str("[^/]*");
                }
            }
            '?' => regex.push_str("[^/]"),
            '\\' | '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '^' | '$' => {
                regex.push('\\');
                regex.push(ch);
            }
            ch => regex.push(ch),
        }
    }
    regex.push('$');

    match Regex::new(&regex) {
        Ok(re) => re.is_match(url),
        Err(err) => {
            tracing::debug!(%err, pattern, "url pattern did not compile");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_glob_single_star_stays_in_segment() {
        assert!(url_matches(
            "https://sso.example/login*",
            "https://sso.example/login?next=portal"
        ));
        assert!(!url_matches(
            "https://sso.example/login*",
            "https://sso.example/login/two-factor"
        ));
    }

    #[test]
    fn url_glob_double_star_crosses_segments() {
        assert!(url_matches(
            "https://portal.example/courses**",
            "https://portal.example/courses/list/all"
        ));
        assert!(url_matches("**master.m3u8**", "https://cdn.example/v/1/master.m3u8?tok=x"));
    }

    #[test]
    fn url_glob_escapes_regex_metacharacters() {
        assert!(url_matches(
            "https://portal.example/a+b?c",
            "https://portal.example/a+bXc"
        ));
        assert!(!url_matches(
            "https://portal.example/a+b",
            "https://portal.example/aab"
        ));
    }
}
