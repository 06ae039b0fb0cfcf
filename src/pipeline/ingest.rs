use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use super::RunContext;

/// 取り込み直後のカタログ1行。欠損チェック前なので全フィールドがOptional。
///
/// 入力CSVに余分な列があっても無視される。数値列に数値として解釈できない
/// 文字列が入っている場合は、表形式ソース側の型契約違反として取り込み全体が
/// エラーになる（空欄は欠損として `None` になる）。
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawTrackRow {
    #[serde(default)]
    pub track_id: Option<String>,
    #[serde(default)]
    pub track_name: Option<String>,
    #[serde(default)]
    pub track_artist: Option<String>,
    #[serde(default)]
    pub playlist_genre: Option<String>,
    #[serde(default, rename = "track_album_release_date")]
    pub release_date: Option<String>,
    #[serde(default)]
    pub danceability: Option<f64>,
    #[serde(default)]
    pub energy: Option<f64>,
    #[serde(default)]
    pub loudness: Option<f64>,
    #[serde(default)]
    pub speechiness: Option<f64>,
    #[serde(default)]
    pub acousticness: Option<f64>,
    #[serde(default)]
    pub instrumentalness: Option<f64>,
    #[serde(default)]
    pub liveness: Option<f64>,
    #[serde(default)]
    pub valence: Option<f64>,
    #[serde(default)]
    pub tempo: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawCatalog {
    pub run_id: Uuid,
    pub rows: Vec<RawTrackRow>,
}

#[async_trait]
pub trait IngestStage: Send + Sync {
    async fn ingest(&self, run: &RunContext) -> Result<RawCatalog>;
}

/// カタログCSVを一括で読み込むIngestStage。
pub struct CsvIngestStage {
    input_path: PathBuf,
}

impl CsvIngestStage {
    #[must_use]
    pub fn new(input_path: PathBuf) -> Self {
        Self { input_path }
    }
}

#[async_trait]
impl IngestStage for CsvIngestStage {
    async fn ingest(&self, run: &RunContext) -> Result<RawCatalog> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.input_path)
            .with_context(|| {
                format!("failed to open catalog at {}", self.input_path.display())
            })?;

        let mut rows = Vec::new();
        for (index, record) in reader.deserialize::<RawTrackRow>().enumerate() {
            let row = record.with_context(|| {
                format!(
                    "failed to parse catalog row {} in {}",
                    index + 1,
                    self.input_path.display()
                )
            })?;
            rows.push(row);
        }

        info!(
            run_id = %run.run_id,
            rows = rows.len(),
            path = %self.input_path.display(),
            "catalog loaded"
        );

        Ok(RawCatalog {
            run_id: run.run_id,
            rows,
        })
    }
}
