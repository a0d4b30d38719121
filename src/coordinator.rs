use std::sync::Arc;

use anyhow::Context as _;
use tokio::sync::Semaphore;

use crate::browser::{BrowserSession, Tab};
use crate::config::Config;
use crate::media::MediaEngine;
use crate::report::RunReport;
use crate::walker::TabSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub courses: usize,
    pub failed_walkers: usize,
}

/// Releases one barrier permit when dropped, so a walker that errors or
/// panics still cycles its permit back and the join can complete.
struct BarrierRelease(Arc<Semaphore>);

impl Drop for BarrierRelease {
    fn drop(&mut self) {
        self.0.add_permits(1);
    }
}

/// Fans the course listing out into one tab per course and blocks until
/// every spawned walker has terminated.
///
/// The barrier starts empty and doubles as start-gate and join: each issued
/// course click releases one permit, the handler for the matching opened tab
/// consumes it before its walker does any work, and the walker returns it on
/// termination. The final `acquire_many(n)` therefore only succeeds once all
/// n permits have cycled back through finished walkers.
pub async fn run(
    config: Arc<Config>,
    browser: Arc<dyn BrowserSession>,
    media: Arc<dyn MediaEngine>,
    report: Arc<RunReport>,
    listing: Arc<dyn Tab>,
) -> anyhow::Result<RunSummary> {
    let selectors = &config.selectors;

    // subscribe before any click so no tab-open event is missed
    let mut new_tabs = browser
        .subscribe_new_tabs()
        .await
        .context("subscribe to new tabs")?;

    listing
        .wait_visible(&selectors.course_card, 0)
        .await
        .context("wait for course listing")?;
    let course_count = listing
        .count(&selectors.course_card)
        .await
        .context("count courses")?;
    anyhow::ensure!(course_count > 0, "course listing rendered no entries");
    tracing::info!(courses = course_count, "discovered courses");

    let barrier = Arc::new(Semaphore::new(0));

    // clicks are issued concurrently: the tab-open event for course i can
    // interleave with the click for course i+1
    let mut clicks = tokio::task::JoinSet::new();
    for index in 0..course_count {
        let listing = Arc::clone(&listing);
        let selector = selectors.course_card.clone();
        let barrier = Arc::clone(&barrier);
        clicks.spawn(async move {
            let result = listing.click_nth(&selector, index).await;
            // the click is what permits the matching walker to start
            barrier.add_permits(1);
            result.with_context(|| format!("click course {index}"))
        });
    }
    while let Some(joined) = clicks.join_next().await {
        joined.context("join course click")??;
    }

    let mut walkers = Vec::with_capacity(course_count);
    for opened in 0..course_count {
        let tab = new_tabs.recv().await.ok_or_else(|| {
            anyhow::anyhow!("tab stream closed after {opened} of {course_count} tabs")
        })?;
        barrier
            .acquire()
            .await
            .context("acquire walker start permit")?
            .forget();

        let session = TabSession::new(
            Arc::clone(&config),
            Arc::clone(&media),
            Arc::clone(&report),
            Arc::clone(&tab),
        );
        let barrier = Arc::clone(&barrier);
        walkers.push(tokio::spawn(async move {
            let _release = BarrierRelease(barrier);
            let result = session.walk().await;
            if let Err(err) = session.tab().close().await {
                tracing::debug!(err = format!("{err:#}"), "close course tab");
            }
            result
        }));
    }

    barrier
        .acquire_many(course_count as u32)
        .await
        .context("join walkers")?
        .forget();

    let mut failed_walkers = 0;
    for (index, walker) in walkers.into_iter().enumerate() {
        match walker.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                failed_walkers += 1;
                tracing::warn!(course = index, err = format!("{err:#}"), "course walker failed");
            }
            Err(join_err) => {
                failed_walkers += 1;
                tracing::warn!(course = index, ?join_err, "course walker panicked");
            }
        }
    }

    Ok(RunSummary {
        courses: course_count,
        failed_walkers,
    })
}
