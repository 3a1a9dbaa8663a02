//! Fixed-schema tabular export (CSV + Parquet) and the run manifest.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{ArrayRef, Int64Array, RecordBatch, StringArray, UInt32Array};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use chrono::{DateTime, Utc};
use fof_core::{ExportRow, EXPORT_COLUMNS};
use fof_storage::{OutputStore, StoredOutput};
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};

pub const FULL_CSV: &str = "top_grants_full.csv";
pub const RELEVANT_CSV: &str = "top_grants_relevant.csv";
pub const ADAPTIVE_CSV: &str = "top_grants_relevant_adaptive.csv";
pub const TOPK_CSV: &str = "top_grants_relevant_topk.csv";
pub const FIT_CSV: &str = "top_grants_relevant_fit.csv";
pub const FULL_PARQUET: &str = "top_grants_full.parquet";
pub const MANIFEST_JSON: &str = "manifest.json";

/// CSV bytes with the header always present, even for zero rows.
pub fn encode_csv(rows: &[ExportRow]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer
        .write_record(EXPORT_COLUMNS)
        .context("writing CSV header")?;
    for row in rows {
        writer.serialize(row).context("writing CSV row")?;
    }
    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flushing CSV writer: {}", e.error()))
}

pub fn decode_csv(reader: impl Read) -> Result<Vec<ExportRow>> {
    csv::Reader::from_reader(reader)
        .deserialize()
        .enumerate()
        .map(|(i, row)| row.with_context(|| format!("decoding CSV row {}", i + 1)))
        .collect()
}

/// Writes `rows` to `path` as CSV.
pub fn export(rows: &[ExportRow], path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let bytes = encode_csv(rows)?;
    std::fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
}

pub fn read_rows(path: impl AsRef<Path>) -> Result<Vec<ExportRow>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    decode_csv(file).with_context(|| format!("reading {}", path.display()))
}

fn export_schema() -> Arc<Schema> {
    let fields = EXPORT_COLUMNS
        .iter()
        .map(|name| {
            let (data_type, nullable) = match *name {
                "DaysLeft" => (DataType::Int64, true),
                "Score" | "MissionHits" | "ProgramHits" | "TechHits" | "MissionPts" | "ProgramPts"
                | "TechPts" => (DataType::UInt32, false),
                _ => (DataType::Utf8, false),
            };
            ArrowField::new(*name, data_type, nullable)
        })
        .collect::<Vec<_>>();
    Arc::new(Schema::new(fields))
}

pub fn encode_parquet(rows: &[ExportRow]) -> Result<Vec<u8>> {
    let u32_col = |f: fn(&ExportRow) -> u32| -> ArrayRef {
        Arc::new(UInt32Array::from(rows.iter().map(f).collect::<Vec<_>>()))
    };
    let str_col = |f: fn(&ExportRow) -> &str| -> ArrayRef {
        Arc::new(StringArray::from(rows.iter().map(f).collect::<Vec<_>>()))
    };

    let columns: Vec<ArrayRef> = vec![
        u32_col(|r| r.score),
        str_col(|r| r.title.as_str()),
        str_col(|r| r.agency.as_str()),
        str_col(|r| r.close_date.as_str()),
        Arc::new(Int64Array::from(rows.iter().map(|r| r.days_left).collect::<Vec<_>>())),
        str_col(|r| r.opp_number.as_str()),
        str_col(|r| r.category.as_str()),
        str_col(|r| r.eligibility.as_str()),
        str_col(|r| r.url.as_str()),
        u32_col(|r| r.mission_hits),
        u32_col(|r| r.program_hits),
        u32_col(|r| r.tech_hits),
        u32_col(|r| r.mission_pts),
        u32_col(|r| r.program_pts),
        u32_col(|r| r.tech_pts),
        str_col(|r| r.score_breakdown.as_str()),
    ];

    let schema = export_schema();
    let batch = RecordBatch::try_new(schema.clone(), columns)
        .context("building export record batch")?;

    let mut buf = Vec::new();
    let mut writer =
        ArrowWriter::try_new(&mut buf, schema, None).context("opening parquet writer")?;
    writer.write(&batch).context("writing parquet record batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(buf)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: u32,
    pub generated_at: DateTime<Utc>,
    pub columns: Vec<String>,
    pub files: Vec<ManifestFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub name: String,
    pub path: String,
    pub rows: usize,
    pub sha256: String,
    pub bytes: u64,
}

impl ManifestFile {
    fn from_stored(stored: &StoredOutput, rows: usize) -> Self {
        Self {
            name: stored.file_name.clone(),
            path: stored.absolute_path.display().to_string(),
            rows,
            sha256: stored.sha256.clone(),
            bytes: stored.byte_size as u64,
        }
    }
}

/// Writes export tables into an [`OutputStore`] and records each in the manifest.
#[derive(Debug, Clone)]
pub struct Exporter {
    store: OutputStore,
}

impl Exporter {
    pub fn new(store: OutputStore) -> Self {
        Self { store }
    }

    pub async fn write_csv(&self, file_name: &str, rows: &[ExportRow]) -> Result<ManifestFile> {
        let bytes = encode_csv(rows)?;
        let stored = self.store.write_atomic(file_name, &bytes).await?;
        Ok(ManifestFile::from_stored(&stored, rows.len()))
    }

    pub async fn write_parquet(&self, file_name: &str, rows: &[ExportRow]) -> Result<ManifestFile> {
        let bytes = encode_parquet(rows)?;
        let stored = self.store.write_atomic(file_name, &bytes).await?;
        Ok(ManifestFile::from_stored(&stored, rows.len()))
    }

    pub async fn write_manifest(&self, files: Vec<ManifestFile>) -> Result<StoredOutput> {
        let manifest = Manifest {
            schema_version: 1,
            generated_at: Utc::now(),
            columns: EXPORT_COLUMNS.iter().map(|c| c.to_string()).collect(),
            files,
        };
        let bytes = serde_json::to_vec_pretty(&manifest).context("serializing export manifest")?;
        self.store.write_atomic(MANIFEST_JSON, &bytes).await
    }
}
