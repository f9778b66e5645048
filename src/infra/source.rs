//! Course document ingestion: read source files and concatenate them into
//! the single text blob the prompts consume.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;

/// Extracts plain text from one source document. A seam so formats beyond
/// plain text can plug in without touching the orchestrators.
#[async_trait]
pub trait SourceReader: Send + Sync {
    async fn read(&self, path: &Path) -> anyhow::Result<String>;
}

/// Reads files as UTF-8 text (txt, md, exported syllabi).
pub struct PlainTextReader;

#[async_trait]
impl SourceReader for PlainTextReader {
    async fn read(&self, path: &Path) -> anyhow::Result<String> {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))
    }
}

#[derive(Debug, Default)]
pub struct SourceBundle {
    pub text: String,
    /// One entry per file that could not be read; those files are skipped
    /// rather than failing the whole batch.
    pub warnings: Vec<String>,
}

/// Read every source document and join them with per-file headers so the
/// model can attribute content to a file.
pub async fn read_sources(reader: &dyn SourceReader, paths: &[PathBuf]) -> SourceBundle {
    let mut bundle = SourceBundle::default();
    for path in paths {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unnamed");
        match reader.read(path).await {
            Ok(content) => {
                bundle.text.push_str(&format!("=== File: {name} ===\n{content}\n\n"));
            }
            Err(err) => {
                log::warn!("skipping source {name}: {err:#}");
                bundle.warnings.push(format!("Could not read {name}: {err:#}"));
            }
        }
    }
    bundle
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn joins_files_with_headers_and_skips_failures() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("syllabus.txt");
        std::fs::write(&a, "week one content").unwrap();
        let missing = dir.path().join("gone.txt");

        let bundle = read_sources(&PlainTextReader, &[a, missing]).await;
        assert!(bundle.text.starts_with("=== File: syllabus.txt ===\nweek one content\n"));
        assert_eq!(bundle.warnings.len(), 1);
        assert!(bundle.warnings[0].contains("gone.txt"));
    }
}
