use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use super::RunContext;
use super::label::LabeledCatalog;
use super::sanitize::AudioDescriptors;

/// 書き出し結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmitResult {
    pub run_id: Uuid,
    pub rows_written: usize,
    pub output_path: PathBuf,
}

#[async_trait]
pub trait EmitStage: Send + Sync {
    async fn emit(&self, run: &RunContext, catalog: LabeledCatalog) -> Result<EmitResult>;
}

/// 固定列順のCSVとして出力するEmitStage。
///
/// 一時ファイルへ書き切ってからリネームする。失敗した実行が
/// 部分的な成果物を残さないようにするため。
pub struct CsvEmitStage {
    output_path: PathBuf,
}

impl CsvEmitStage {
    #[must_use]
    pub fn new(output_path: PathBuf) -> Self {
        Self { output_path }
    }
}

#[async_trait]
impl EmitStage for CsvEmitStage {
    async fn emit(&self, run: &RunContext, catalog: LabeledCatalog) -> Result<EmitResult> {
        if let Some(parent) = self.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create output directory {}", parent.display())
                })?;
            }
        }

        let staging_path = PathBuf::from(format!("{}.tmp", self.output_path.display()));
        let projection_dim = catalog.records.first().map_or(0, |r| r.coords.len());

        let mut writer = csv::Writer::from_path(&staging_path).with_context(|| {
            format!("failed to open staging file {}", staging_path.display())
        })?;

        let mut header: Vec<String> = vec![
            "track_id".to_string(),
            "track_name".to_string(),
            "track_artist".to_string(),
            "playlist_genre".to_string(),
            "year".to_string(),
        ];
        for dim in 1..=projection_dim {
            header.push(format!("pca{dim}"));
        }
        header.push("cluster_label".to_string());
        header.extend(AudioDescriptors::COLUMN_NAMES.iter().map(ToString::to_string));
        writer
            .write_record(&header)
            .context("failed to write output header")?;

        let mut rows_written = 0usize;
        for record in &catalog.records {
            let mut row: Vec<String> = vec![
                record.track.track_id.clone().unwrap_or_default(),
                record.track.track_name.clone(),
                record.track.track_artist.clone().unwrap_or_default(),
                record.track.playlist_genre.clone(),
                record.track.year.to_string(),
            ];
            for coord in &record.coords {
                row.push(coord.to_string());
            }
            row.push(record.label.clone());
            for value in record.track.descriptors.as_array() {
                row.push(value.to_string());
            }
            writer
                .write_record(&row)
                .context("failed to write output row")?;
            rows_written += 1;
        }

        writer.flush().context("failed to flush output")?;
        drop(writer);

        std::fs::rename(&staging_path, &self.output_path).with_context(|| {
            format!(
                "failed to move staging file into place at {}",
                self.output_path.display()
            )
        })?;

        info!(
            run_id = %run.run_id,
            rows_written,
            groups = catalog.groups.len(),
            path = %self.output_path.display(),
            "enriched catalog written"
        );

        Ok(EmitResult {
            run_id: catalog.run_id,
            rows_written,
            output_path: self.output_path.clone(),
        })
    }
}
