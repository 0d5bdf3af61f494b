use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use tempfile::NamedTempFile;

use crate::normalize::RawScoreRow;

/// Source of raw score rows for one analysis batch.
pub trait RecordRepository {
    fn load(&self) -> anyhow::Result<Vec<RawScoreRow>>;
}

/// Reads a headed CSV file. Every cell is kept as text for the normaliser.
#[derive(Debug, Clone)]
pub struct CsvRecordRepository {
    path: PathBuf,
}

impl CsvRecordRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl RecordRepository for CsvRecordRepository {
    fn load(&self) -> anyhow::Result<Vec<RawScoreRow>> {
        let file = std::fs::File::open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        let rows = read_csv(file)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        tracing::debug!(path = %self.path.display(), rows = rows.len(), "loaded score rows");
        Ok(rows)
    }
}

/// Rows are numbered from 1, counting data rows only. Short rows are kept;
/// their missing columns surface later as missing fields.
pub fn read_csv<R: Read>(reader: R) -> anyhow::Result<Vec<RawScoreRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = reader.headers().context("missing header row")?.clone();

    let mut rows = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("malformed row {}", idx + 1))?;
        rows.push(RawScoreRow::new(
            idx + 1,
            headers.iter().zip(record.iter()),
        ));
    }
    Ok(rows)
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    rows: Vec<RawScoreRow>,
}

impl InMemoryRepository {
    pub fn new(rows: Vec<RawScoreRow>) -> Self {
        Self { rows }
    }
}

impl RecordRepository for InMemoryRepository {
    fn load(&self) -> anyhow::Result<Vec<RawScoreRow>> {
        Ok(self.rows.clone())
    }
}

/// Write `contents` to `path` so readers see either the old file or the
/// complete new one.
pub fn publish(path: &Path, contents: &str) -> anyhow::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    tmp.write_all(contents.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
