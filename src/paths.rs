use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Context as _;
use regex::Regex;

/// Identity of a leaf under traversal: the chain of titles and sibling
/// indices from the course down to the lesson. A media part reuses its
/// lesson's identity; the part suffix is derived separately from the
/// player's active-part label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafRef {
    pub course_title: String,
    pub module_index: usize,
    pub module_label: String,
    pub module_title: String,
    pub lesson_index: usize,
    pub lesson_title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLeaf {
    /// Module directory, created (with parents) as part of resolution.
    pub dir: PathBuf,
    /// Lesson file stem under `dir`; artifacts add their own extension.
    pub stem: PathBuf,
}

/// Derives the on-disk location for a leaf:
///
/// `root/<course>/[NN] [<module label>] <module>/[NN] <lesson>`
///
/// Pure in its inputs and safe to call repeatedly and concurrently for
/// sibling leaves of the same module — the walker resolves it for
/// snapshots and the bridge resolves it again inside the intercepted
/// request handler, and both must land on the same string.
pub fn resolve(downloads_root: &Path, leaf: &LeafRef) -> anyhow::Result<ResolvedLeaf> {
    let dir = downloads_root.join(slug(&leaf.course_title)).join(format!(
        "[{:02}] [{}] {}",
        leaf.module_index,
        slug(&leaf.module_label),
        slug(&leaf.module_title),
    ));
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("create module dir: {}", dir.display()))?;

    let stem = dir.join(format!("[{:02}] {}", leaf.lesson_index, slug(&leaf.lesson_title)));
    Ok(ResolvedLeaf { dir, stem })
}

static TRAILING_DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(?\d{1,2}:\d{2}(?::\d{2})?\)?\s*$").expect("trailing duration regex")
});

/// Bracketed disambiguator for a sibling media part, derived from the
/// player's active-part label with any trailing duration ("12:34" or
/// "(1:02:03)") stripped first: "Part One (12:34)" becomes "(part-one)".
pub fn part_suffix(label: &str) -> String {
    let stripped = TRAILING_DURATION.replace(label, "");
    format!("({})", slug(stripped.trim()))
}

/// Filesystem-safe slug: lowercase ASCII alphanumerics with single `-`
/// separators; everything else is treated as a separator and dropped at
/// the edges.
pub fn slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_separator = false;
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_separator && !out.is_empty() {
                out.push('-');
            }
            pending_separator = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf() -> LeafRef {
        LeafRef {
            course_title: "Rust for Scrapers".to_owned(),
            module_index: 1,
            module_label: "Module 2".to_owned(),
            module_title: "Advanced Topics!".to_owned(),
            lesson_index: 3,
            lesson_title: "Ownership & Borrowing".to_owned(),
        }
    }

    #[test]
    fn slug_normalizes_separators_and_case() {
        assert_eq!(slug("Rust for Scrapers"), "rust-for-scrapers");
        assert_eq!(slug("  Hello,   World!  "), "hello-world");
        assert_eq!(slug("Ownership & Borrowing"), "ownership-borrowing");
        assert_eq!(slug("already-a-slug"), "already-a-slug");
        assert_eq!(slug("!!!"), "");
    }

    #[test]
    fn resolve_builds_indexed_layout() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let resolved = resolve(tmp.path(), &leaf())?;

        let expected_dir = tmp
            .path()
            .join("rust-for-scrapers")
            .join("[01] [module-2] advanced-topics");
        assert_eq!(resolved.dir, expected_dir);
        assert_eq!(resolved.stem, expected_dir.join("[03] ownership-borrowing"));
        assert!(resolved.dir.is_dir());
        Ok(())
    }

    #[test]
    fn resolve_is_idempotent() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let first = resolve(tmp.path(), &leaf())?;
        let second = resolve(tmp.path(), &leaf())?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn part_suffix_strips_trailing_duration() {
        assert_eq!(part_suffix("Part One (12:34)"), "(part-one)");
        assert_eq!(part_suffix("Part Two 10:00"), "(part-two)");
        assert_eq!(part_suffix("Bonus Interview (1:02:03)"), "(bonus-interview)");
        assert_eq!(part_suffix("No Duration Here"), "(no-duration-here)");
    }
}
