use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

/// A network request captured by a tab's manifest interception rule.
///
/// The route stays paused until [`fulfill`](Self::fulfill) is called (or the
/// request is dropped), which is what lets the bridge finish the download
/// before the page's network stack is released.
pub struct InterceptedRequest {
    pub url: String,
    pub headers: HashMap<String, String>,
    fulfill: oneshot::Sender<()>,
}

impl InterceptedRequest {
    pub fn new(
        url: String,
        headers: HashMap<String, String>,
    ) -> (Self, oneshot::Receiver<()>) {
        let (fulfill, fulfilled) = oneshot::channel();
        (
            Self {
                url,
                headers,
                fulfill,
            },
            fulfilled,
        )
    }

    /// Resolves the paused route so the page does not hang waiting on it.
    pub fn fulfill(self) {
        let _ = self.fulfill.send(());
    }
}

impl fmt::Debug for InterceptedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptedRequest")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

/// One browser tab. Element-addressing operations take a CSS selector plus a
/// zero-based index among its matches, which is how the walker iterates
/// sibling modules, lessons and parts in order.
#[async_trait]
pub trait Tab: Send + Sync {
    async fn goto(&self, url: &str) -> anyhow::Result<()>;

    /// Waits until the tab's URL matches a glob pattern (`*` within a path
    /// segment, `**` across segments).
    async fn wait_for_url(&self, pattern: &str) -> anyhow::Result<()>;

    async fn click(&self, selector: &str) -> anyhow::Result<()>;

    async fn click_nth(&self, selector: &str, index: usize) -> anyhow::Result<()>;

    async fn type_text(&self, selector: &str, text: &str) -> anyhow::Result<()>;

    async fn count(&self, selector: &str) -> anyhow::Result<usize>;

    async fn wait_visible(&self, selector: &str, index: usize) -> anyhow::Result<()>;

    async fn is_visible(&self, selector: &str, index: usize) -> anyhow::Result<bool>;

    async fn text(&self, selector: &str, index: usize) -> anyhow::Result<String>;

    /// Snapshot of one element's rendered region, written to `path`.
    async fn screenshot(&self, selector: &str, path: &Path) -> anyhow::Result<()>;

    /// Registers the tab's single interception rule. The pattern is handed
    /// to the browser's interception engine, whose `*` matches across path
    /// segments (unlike [`wait_for_url`](Self::wait_for_url)). Captured
    /// requests arrive on the returned channel; the channel closes when the
    /// rule is cleared.
    async fn route_register(
        &self,
        url_pattern: &str,
    ) -> anyhow::Result<mpsc::Receiver<InterceptedRequest>>;

    /// Unregisters the interception rule, if any. Idempotent.
    async fn route_clear(&self) -> anyhow::Result<()>;

    async fn close(&self) -> anyhow::Result<()>;
}

/// One launched browser with its shared context. Tabs the site opens on its
/// own (one per clicked course) surface through the new-tab subscription.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// The initial tab, used for login and the course listing.
    async fn entry_tab(&self) -> anyhow::Result<Arc<dyn Tab>>;

    /// Subscribes to tabs opened by the site after this call. Must be
    /// registered before the clicks that cause tabs to open.
    async fn subscribe_new_tabs(&self) -> anyhow::Result<mpsc::Receiver<Arc<dyn Tab>>>;

    /// Stops the browser. Called on every exit path of a run.
    async fn close(&self) -> anyhow::Result<()>;
}
