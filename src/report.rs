use std::fs::OpenOptions;
use std::io::{BufWriter, Write as _};
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Artifact {
    Screenshot,
    Media,
}

/// One line of `run.jsonl`: a leaf that was visited and the artifact it
/// produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeafRecord {
    pub course: String,
    pub module_index: usize,
    pub module: String,
    pub lesson_index: usize,
    pub lesson: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub part: Option<String>,
    pub artifact: Artifact,
    pub path: String,
    pub recorded_at: String,
}

/// Append-only JSONL report under the downloads root, shared by all
/// concurrently walking tabs.
#[derive(Debug)]
pub struct RunReport {
    writer: Mutex<BufWriter<std::fs::File>>,
}

impl RunReport {
    pub fn create(downloads_root: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(downloads_root)
            .with_context(|| format!("create downloads root: {}", downloads_root.display()))?;

        let path = downloads_root.join("run.jsonl");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open run report: {}", path.display()))?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn record(&self, record: &LeafRecord) -> anyhow::Result<()> {
        let mut writer = self.writer.lock().expect("run report lock poisoned");
        serde_json::to_writer(&mut *writer, record).context("write leaf record")?;
        writer.write_all(b"\n").context("write leaf record newline")?;
        writer.flush().context("flush run report")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(lesson: &str, part: Option<&str>) -> LeafRecord {
        LeafRecord {
            course: "course".to_owned(),
            module_index: 0,
            module: "module".to_owned(),
            lesson_index: 0,
            lesson: lesson.to_owned(),
            part: part.map(str::to_owned),
            artifact: Artifact::Media,
            path: "/tmp/out".to_owned(),
            recorded_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn records_append_as_jsonl() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let report = RunReport::create(tmp.path())?;
        report.record(&record("first", None))?;
        report.record(&record("second", Some("(part-one)")))?;

        let contents = std::fs::read_to_string(tmp.path().join("run.jsonl"))?;
        let lines = contents.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);

        let second: LeafRecord = serde_json::from_str(lines[1])?;
        assert_eq!(second.lesson, "second");
        assert_eq!(second.part.as_deref(), Some("(part-one)"));
        // absent part is omitted from the serialized record entirely
        assert!(!lines[0].contains("part"));
        Ok(())
    }
}
