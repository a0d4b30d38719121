use std::collections::HashMap;
use std::sync::Arc;

use crate::browser::{InterceptedRequest, Tab};
use crate::config::{Config, Portal};
use crate::media::{MediaEngine, MediaRequest};
use crate::paths::{self, LeafRef};
use crate::report::{Artifact, LeafRecord, RunReport};
use crate::signal::DownloadSignal;

use anyhow::Context as _;

/// Turns a captured manifest request into a finished download and releases
/// the walker that is suspended on the tab's [`DownloadSignal`].
///
/// Owned by its tab session; all state it touches is private to that tab.
pub struct Bridge {
    pub tab: Arc<dyn Tab>,
    pub config: Arc<Config>,
    pub media: Arc<dyn MediaEngine>,
    pub report: Arc<RunReport>,
    pub signal: Arc<DownloadSignal>,
}

impl Bridge {
    /// Runs to completion for one captured manifest request: download
    /// attempt, portal progress click, route fulfilment, then the signal.
    /// The route is fulfilled and the signal set on failure too — a failed
    /// download must never leave the page's network stack or the walker
    /// suspended.
    pub async fn handle(&self, leaf: &LeafRef, request: InterceptedRequest) {
        let outcome = self.download(leaf, &request).await;
        if let Err(err) = &outcome {
            tracing::warn!(
                lesson = %leaf.lesson_title,
                url = %request.url,
                err = format!("{err:#}"),
                "manifest download failed"
            );
        }
        self.mark_complete().await;
        request.fulfill();
        self.signal.set(outcome);
    }

    async fn download(&self, leaf: &LeafRef, request: &InterceptedRequest) -> anyhow::Result<()> {
        // same resolution the walker performs for snapshots, so media and
        // still-frame artifacts for one lesson differ only by suffix
        let resolved = paths::resolve(&self.config.output.downloads_root, leaf)
            .context("resolve leaf path")?;

        let selectors = &self.config.selectors;
        let part = match self.tab.is_visible(&selectors.active_part_label, 0).await {
            Ok(true) => {
                let label = self
                    .tab
                    .text(&selectors.active_part_label, 0)
                    .await
                    .context("read active part label")?;
                Some(paths::part_suffix(&label))
            }
            Ok(false) => None,
            Err(err) => {
                tracing::debug!(err = format!("{err:#}"), "active part probe failed");
                None
            }
        };

        let stem = match &part {
            Some(suffix) => format!("{} {suffix}", resolved.stem.display()),
            None => resolved.stem.display().to_string(),
        };

        let media_request = MediaRequest {
            manifest_url: request.url.clone(),
            headers: override_headers(&request.headers, &self.config.portal),
            output_template: format!("{stem}.%(ext)s"),
            format: self.config.output.media_format.clone(),
            fragment_concurrency: fragment_concurrency(),
        };
        self.media
            .download(&media_request)
            .await
            .context("media engine download")?;

        self.report
            .record(&LeafRecord {
                course: leaf.course_title.clone(),
                module_index: leaf.module_index,
                module: leaf.module_title.clone(),
                lesson_index: leaf.lesson_index,
                lesson: leaf.lesson_title.clone(),
                part,
                artifact: Artifact::Media,
                path: stem,
                recorded_at: chrono::Utc::now().to_rfc3339(),
            })
            .context("record media download")
    }

    /// Advances the portal's own progress state. Best-effort: a missing or
    /// unclickable control never fails the leaf.
    async fn mark_complete(&self) {
        let selector = &self.config.selectors.mark_complete;
        match self.tab.is_visible(selector, 0).await {
            Ok(true) => {
                if let Err(err) = self.tab.click(selector).await {
                    tracing::debug!(err = format!("{err:#}"), "mark-complete click failed");
                }
            }
            Ok(false) => {}
            Err(err) => tracing::debug!(err = format!("{err:#}"), "mark-complete probe failed"),
        }
    }
}

/// The manifest host rejects requests that do not carry the portal's own
/// origin and referer, so both are overridden regardless of what the page
/// sent. Remaining headers are replayed in sorted order.
fn override_headers(captured: &HashMap<String, String>, portal: &Portal) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = captured
        .iter()
        .filter(|(name, _)| {
            let name = name.to_ascii_lowercase();
            name != "origin" && name != "referer"
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    headers.sort();
    headers.push(("Origin".to_owned(), portal.origin.clone()));
    headers.push(("Referer".to_owned(), portal.referer.clone()));
    headers
}

fn fragment_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn portal() -> Portal {
        Portal {
            entry_url: "https://portal.example/start".to_owned(),
            login_url_pattern: "https://sso.example/*".to_owned(),
            courses_url_pattern: "https://portal.example/courses*".to_owned(),
            manifest_url_pattern: "*master.m3u8*".to_owned(),
            origin: "https://portal.example".to_owned(),
            referer: "https://portal.example/".to_owned(),
        }
    }

    #[test]
    fn override_headers_replaces_origin_and_referer() {
        let captured = HashMap::from([
            ("User-Agent".to_owned(), "firefox".to_owned()),
            ("origin".to_owned(), "https://player.example".to_owned()),
            ("Referer".to_owned(), "https://player.example/embed".to_owned()),
        ]);

        let headers = override_headers(&captured, &portal());
        assert_eq!(
            headers,
            vec![
                ("User-Agent".to_owned(), "firefox".to_owned()),
                ("Origin".to_owned(), "https://portal.example".to_owned()),
                ("Referer".to_owned(), "https://portal.example/".to_owned()),
            ]
        );
    }

    #[test]
    fn fragment_concurrency_is_positive() {
        assert!(fragment_concurrency() >= 1);
    }
}
