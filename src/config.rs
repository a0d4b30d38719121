use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Deserialize;

/// Settings document supplied by the operator. Every portal URL, URL
/// pattern and DOM selector lives here so a portal layout change never
/// requires a rebuild. A missing file or missing key is startup-fatal.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub portal: Portal,
    pub credentials: Credentials,
    pub selectors: Selectors,
    pub output: Output,
    #[serde(default)]
    pub browser: BrowserOptions,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Portal {
    /// Entry URL of the consumer portal; the portal redirects to login.
    pub entry_url: String,
    /// Glob pattern the URL must match once redirected to the login page.
    /// `*` stays within a path segment, `**` crosses segments.
    pub login_url_pattern: String,
    /// Glob pattern the URL must match once logged in (course listing).
    /// Same dialect as `login_url_pattern`.
    pub courses_url_pattern: String,
    /// Glob pattern identifying a media manifest (playlist/master) request.
    /// Matched by the browser's own interception engine, where `*` crosses
    /// segments; use `**` anyway to keep the pattern portable between the
    /// two dialects.
    pub manifest_url_pattern: String,
    /// Origin the manifest host expects on download requests.
    pub origin: String,
    /// Referer the manifest host expects on download requests.
    pub referer: String,
}

#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Selectors {
    pub accept_cookies: String,
    pub username_input: String,
    pub password_input: String,
    pub login_submit: String,
    /// One element per purchased course on the listing page.
    pub course_card: String,
    /// Course display title inside an opened course tab.
    pub course_title: String,
    pub module_item: String,
    /// The module's own index label as rendered by the portal ("Module 2").
    pub module_label: String,
    pub module_title: String,
    pub lesson_item: String,
    pub lesson_title: String,
    /// One element per media part in a lesson's sub-part list.
    pub part_item: String,
    /// Label of the currently active media part, when the player shows one.
    pub active_part_label: String,
    pub content_region: String,
    pub video_container: String,
    pub mark_complete: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Output {
    pub downloads_root: PathBuf,
    /// Format selector handed to the media engine.
    pub media_format: String,
    /// Extension for static leaf snapshots.
    pub screenshot_extension: String,
    #[serde(default = "default_media_bin")]
    pub media_bin: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserOptions {
    #[serde(default = "default_headless")]
    pub headless: bool,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self { headless: true }
    }
}

fn default_media_bin() -> String {
    "yt-dlp".to_owned()
}

fn default_headless() -> bool {
    true
}

pub fn load(path: &Path) -> anyhow::Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read settings file: {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&raw)
        .with_context(|| format!("parse settings file: {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"
portal:
  entry_url: "https://portal.example/start"
  login_url_pattern: "https://sso.example/login*"
  courses_url_pattern: "https://portal.example/courses*"
  manifest_url_pattern: "*master.m3u8*"
  origin: "https://portal.example"
  referer: "https://portal.example/"
credentials:
  username: "student@example.com"
  password: "hunter2"
selectors:
  accept_cookies: "#accept-cookies"
  username_input: "input[name=email]"
  password_input: "input[name=password]"
  login_submit: "button[type=submit]"
  course_card: ".course-card"
  course_title: ".course-title"
  module_item: ".module"
  module_label: ".module .label"
  module_title: ".module .title"
  lesson_item: ".lesson"
  lesson_title: ".lesson .title"
  part_item: ".media-part"
  active_part_label: ".media-part.active .label"
  content_region: ".content"
  video_container: ".video-player"
  mark_complete: ".mark-complete"
output:
  downloads_root: "/tmp/courses"
  media_format: "bestvideo+bestaudio/best"
  screenshot_extension: "png"
"##;

    #[test]
    fn parses_full_settings_document() -> anyhow::Result<()> {
        let config: Config = serde_yaml::from_str(SAMPLE)?;
        assert_eq!(config.portal.manifest_url_pattern, "*master.m3u8*");
        assert_eq!(config.credentials.username, "student@example.com");
        assert_eq!(config.output.media_bin, "yt-dlp");
        assert!(config.browser.headless);
        Ok(())
    }

    #[test]
    fn missing_key_is_an_error() {
        let truncated = SAMPLE.replace("  password: \"hunter2\"\n", "");
        let parsed = serde_yaml::from_str::<Config>(&truncated);
        assert!(parsed.is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load(Path::new("/definitely/not/a/settings.yaml")).unwrap_err();
        assert!(format!("{err:#}").contains("read settings file"));
    }

    #[test]
    fn debug_output_redacts_password() -> anyhow::Result<()> {
        let config: Config = serde_yaml::from_str(SAMPLE)?;
        let debug = format!("{:?}", config.credentials);
        assert!(!debug.contains("hunter2"));
        Ok(())
    }
}
