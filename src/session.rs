use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;

use crate::browser::BrowserSession;
use crate::chrome;
use crate::cli::RunArgs;
use crate::config::{self, Config};
use crate::coordinator;
use crate::media::{MediaEngine, YtDlpEngine};
use crate::report::RunReport;

/// Entry point for `coursedump run`: loads settings, launches the browser
/// and hands off to [`execute`].
pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let mut config = config::load(Path::new(&args.config))?;
    if let Some(root) = args.downloads_root {
        config.output.downloads_root = PathBuf::from(root);
    }
    let config = Arc::new(config);

    let media: Arc<dyn MediaEngine> = Arc::new(YtDlpEngine::new(config.output.media_bin.clone()));
    let browser: Arc<dyn BrowserSession> = Arc::new(
        chrome::launch(&config)
            .await
            .context("launch browser")?,
    );
    execute(config, browser, media).await
}

/// Runs one full session against an already-launched browser. The browser
/// is stopped on every exit path, success or error.
pub async fn execute(
    config: Arc<Config>,
    browser: Arc<dyn BrowserSession>,
    media: Arc<dyn MediaEngine>,
) -> anyhow::Result<()> {
    let result = drive(Arc::clone(&config), Arc::clone(&browser), media).await;
    if let Err(err) = browser.close().await {
        tracing::warn!(err = format!("{err:#}"), "stop browser");
    }
    result
}

/// Login handshake, then course fan-out. Any failure in here is fatal to
/// the run; there is no retry.
async fn drive(
    config: Arc<Config>,
    browser: Arc<dyn BrowserSession>,
    media: Arc<dyn MediaEngine>,
) -> anyhow::Result<()> {
    let report = Arc::new(
        RunReport::create(&config.output.downloads_root).context("open run report")?,
    );
    let tab = browser.entry_tab().await.context("open entry tab")?;

    let portal = &config.portal;
    let selectors = &config.selectors;
    tab.goto(&portal.entry_url)
        .await
        .context("open consumer portal")?;
    tab.wait_for_url(&portal.login_url_pattern)
        .await
        .context("await login redirect")?;
    tab.click(&selectors.accept_cookies)
        .await
        .context("accept cookies")?;
    tab.type_text(&selectors.username_input, &config.credentials.username)
        .await
        .context("fill username")?;
    tab.type_text(&selectors.password_input, &config.credentials.password)
        .await
        .context("fill password")?;
    tab.click(&selectors.login_submit)
        .await
        .context("submit login")?;
    tab.wait_for_url(&portal.courses_url_pattern)
        .await
        .context("await course listing")?;
    tracing::info!("logged in; course listing reached");

    let summary = coordinator::run(Arc::clone(&config), browser, media, report, tab)
        .await
        .context("fan out courses")?;

    tracing::info!(
        courses = summary.courses,
        failed = summary.failed_walkers,
        "run finished"
    );
    if summary.failed_walkers > 0 {
        anyhow::bail!(
            "{} of {} course walkers failed",
            summary.failed_walkers,
            summary.courses
        );
    }
    Ok(())
}
