use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use tokio::sync::oneshot;

use crate::bridge::Bridge;
use crate::browser::Tab;
use crate::config::Config;
use crate::media::MediaEngine;
use crate::paths::{self, LeafRef};
use crate::report::{Artifact, LeafRecord, RunReport};
use crate::signal::DownloadSignal;

/// How a leaf is activated: clicking the lesson entry itself, or one of the
/// lesson's media parts.
#[derive(Debug, Clone, Copy)]
enum Activate {
    Lesson(usize),
    Part(usize),
}

/// One opened course tab and everything owned by it: the walker state, the
/// tab's single interception rule and its download signal. Nothing in here
/// is ever touched by another tab's walker.
pub struct TabSession {
    config: Arc<Config>,
    tab: Arc<dyn Tab>,
    report: Arc<RunReport>,
    signal: Arc<DownloadSignal>,
    bridge: Arc<Bridge>,
}

impl TabSession {
    pub fn new(
        config: Arc<Config>,
        media: Arc<dyn MediaEngine>,
        report: Arc<RunReport>,
        tab: Arc<dyn Tab>,
    ) -> Self {
        let signal = Arc::new(DownloadSignal::new());
        let bridge = Arc::new(Bridge {
            tab: Arc::clone(&tab),
            config: Arc::clone(&config),
            media,
            report: Arc::clone(&report),
            signal: Arc::clone(&signal),
        });
        Self {
            config,
            tab,
            report,
            signal,
            bridge,
        }
    }

    pub fn tab(&self) -> &Arc<dyn Tab> {
        &self.tab
    }

    /// Serially visits every module, lesson and media part of the course
    /// open in this tab, in ascending index order. An error in any single
    /// leaf terminates the whole walk; the coordinator keeps sibling tabs
    /// running regardless.
    pub async fn walk(&self) -> anyhow::Result<()> {
        let selectors = &self.config.selectors;

        let course_title = self
            .tab
            .text(&selectors.course_title, 0)
            .await
            .context("read course title")?;
        tracing::info!(course = %course_title, "walking course");

        let module_count = self
            .listed(&selectors.module_item)
            .await
            .context("list modules")?;
        for module_index in 0..module_count {
            self.tab
                .click_nth(&selectors.module_item, module_index)
                .await
                .with_context(|| format!("expand module {module_index}"))?;
            let module_label = self
                .tab
                .text(&selectors.module_label, module_index)
                .await
                .with_context(|| format!("read label of module {module_index}"))?;
            let module_title = self
                .tab
                .text(&selectors.module_title, module_index)
                .await
                .with_context(|| format!("read title of module {module_index}"))?;

            let lesson_count = self
                .listed(&selectors.lesson_item)
                .await
                .with_context(|| format!("list lessons of module {module_index}"))?;
            for lesson_index in 0..lesson_count {
                let lesson_title = self
                    .tab
                    .text(&selectors.lesson_title, lesson_index)
                    .await
                    .with_context(|| format!("read title of lesson {lesson_index}"))?;
                let leaf = LeafRef {
                    course_title: course_title.clone(),
                    module_index,
                    module_label: module_label.clone(),
                    module_title: module_title.clone(),
                    lesson_index,
                    lesson_title,
                };

                self.visit_leaf(&leaf, Activate::Lesson(lesson_index)).await?;

                let part_count = self
                    .tab
                    .count(&selectors.part_item)
                    .await
                    .context("count media parts")?;
                let has_parts = part_count > 0
                    && self
                        .tab
                        .is_visible(&selectors.part_item, part_count - 1)
                        .await
                        .context("probe media part list")?;
                if !has_parts {
                    continue;
                }
                // the first entry duplicates the lesson's default view, which
                // was just visited
                for part_index in 1..part_count {
                    self.visit_leaf(&leaf, Activate::Part(part_index)).await?;
                }
            }
        }

        tracing::info!(course = %course_title, modules = module_count, "course walk complete");
        Ok(())
    }

    /// Enumerates a lazy-loaded sibling list. Waits for the first entry
    /// before counting at all, then keeps re-counting after each
    /// last-entry render wait until the count stops growing; only a stable
    /// count may serve as the iteration bound, otherwise entries that
    /// render during the wait would be skipped without a trace.
    async fn listed(&self, selector: &str) -> anyhow::Result<usize> {
        self.tab.wait_visible(selector, 0).await?;
        let mut count = self.tab.count(selector).await?;
        loop {
            anyhow::ensure!(count > 0, "no elements matched {selector}");
            self.tab.wait_visible(selector, count - 1).await?;
            let recount = self.tab.count(selector).await?;
            if recount == count {
                return Ok(count);
            }
            count = recount;
        }
    }

    /// Leaf visit protocol: arm the signal and register the interception
    /// rule before activating (a manifest request may fire immediately),
    /// then either suspend on the bridged download or capture a snapshot.
    /// Rule and signal are cleared on every path before returning.
    async fn visit_leaf(&self, leaf: &LeafRef, activate: Activate) -> anyhow::Result<()> {
        let wait = self.signal.arm();
        let mut manifests = self
            .tab
            .route_register(&self.config.portal.manifest_url_pattern)
            .await
            .context("register manifest rule")?;

        let bridge = Arc::clone(&self.bridge);
        let bridge_leaf = leaf.clone();
        let bridge_task = tokio::spawn(async move {
            // at most one manifest request is consumed per leaf; the channel
            // closes when the rule is cleared
            if let Some(request) = manifests.recv().await {
                bridge.handle(&bridge_leaf, request).await;
            }
        });

        let visited = self.activate_and_capture(leaf, activate, wait).await;

        if let Err(err) = self.tab.route_clear().await {
            tracing::debug!(err = format!("{err:#}"), "clear manifest rule");
        }
        self.signal.clear();
        let _ = bridge_task.await;

        visited
    }

    async fn activate_and_capture(
        &self,
        leaf: &LeafRef,
        activate: Activate,
        wait: oneshot::Receiver<anyhow::Result<()>>,
    ) -> anyhow::Result<()> {
        let selectors = &self.config.selectors;
        match activate {
            Activate::Lesson(index) => self
                .tab
                .click_nth(&selectors.lesson_item, index)
                .await
                .with_context(|| format!("activate lesson {index}"))?,
            Activate::Part(index) => self
                .tab
                .click_nth(&selectors.part_item, index)
                .await
                .with_context(|| format!("activate media part {index}"))?,
        }
        self.tab
            .wait_visible(&selectors.content_region, 0)
            .await
            .context("wait for content region")?;

        if self
            .tab
            .is_visible(&selectors.video_container, 0)
            .await
            .context("probe video container")?
        {
            // suspend until the bridge reports the triggered download done;
            // no timeout here — a hang is preferred over a silent skip
            let outcome = wait
                .await
                .map_err(|_| anyhow::anyhow!("download signal dropped before completion"))?;
            outcome.context("bridged download")
        } else {
            let resolved = paths::resolve(&self.config.output.downloads_root, leaf)
                .context("resolve snapshot path")?;
            let path = PathBuf::from(format!(
                "{}.{}",
                resolved.stem.display(),
                self.config.output.screenshot_extension
            ));
            self.tab
                .screenshot(&selectors.content_region, &path)
                .await
                .context("capture snapshot")?;
            self.report
                .record(&LeafRecord {
                    course: leaf.course_title.clone(),
                    module_index: leaf.module_index,
                    module: leaf.module_title.clone(),
                    lesson_index: leaf.lesson_index,
                    lesson: leaf.lesson_title.clone(),
                    part: None,
                    artifact: Artifact::Screenshot,
                    path: path.display().to_string(),
                    recorded_at: chrono::Utc::now().to_rfc3339(),
                })
                .context("record snapshot")
        }
    }
}
