use std::process::Stdio;

use anyhow::Context as _;
use async_trait::async_trait;

/// One media download, described at the boundary of the external engine:
/// the captured manifest URL, the headers to replay (origin/referer already
/// overridden), an output path template and a fragment concurrency hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRequest {
    pub manifest_url: String,
    pub headers: Vec<(String, String)>,
    pub output_template: String,
    pub format: String,
    pub fragment_concurrency: usize,
}

#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn download(&self, request: &MediaRequest) -> anyhow::Result<()>;
}

/// Production engine: shells out to yt-dlp, which handles manifest parsing,
/// fragment fetching and muxing on its own worker pool.
#[derive(Debug, Clone)]
pub struct YtDlpEngine {
    bin: String,
}

impl YtDlpEngine {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }
}

#[async_trait]
impl MediaEngine for YtDlpEngine {
    async fn download(&self, request: &MediaRequest) -> anyhow::Result<()> {
        tracing::info!(
            url = %request.manifest_url,
            template = %request.output_template,
            "media download"
        );

        let mut cmd = tokio::process::Command::new(&self.bin);
        cmd.arg("--no-progress");
        cmd.args([
            "--concurrent-fragments",
            &request.fragment_concurrency.to_string(),
        ]);
        cmd.args(["--format", &request.format]);
        for (name, value) in &request.headers {
            cmd.args(["--add-headers", &format!("{name}:{value}")]);
        }
        cmd.args(["--output", &request.output_template]);
        cmd.arg(&request.manifest_url);
        cmd.stdin(Stdio::null());

        let output = cmd
            .output()
            .await
            .with_context(|| format!("spawn media engine: {}", self.bin))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "media engine failed ({}): {}",
                output.status,
                stderr.trim().lines().last().unwrap_or("no stderr"),
            );
        }
        Ok(())
    }
}
