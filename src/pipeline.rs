use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::util::time;

pub mod emit;
pub mod ingest;
pub mod label;
pub mod normalize;
pub mod partition;
pub mod project;
pub mod sanitize;

use emit::{CsvEmitStage, EmitResult, EmitStage};
use ingest::{CsvIngestStage, IngestStage};
use label::{HeuristicLabelStage, LabelStage};
use normalize::{NormalizeStage, ZScoreNormalizeStage};
use partition::{KMeansPartitionStage, PartitionStage};
use project::{PcaProjectStage, ProjectStage};
use sanitize::{RequiredFieldSanitizeStage, SanitizeStage};

/// 1回のバッチ実行を識別するコンテキスト。
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: time::now(),
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// 母集団単位の失敗。行単位の除外と違い、実行全体を止める。
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(
        "no records survived sanitization ({missing_required} rows dropped for missing required fields, {unparseable_date} for unparseable dates, {total_rows} raw rows)"
    )]
    EmptyPopulation {
        total_rows: usize,
        missing_required: usize,
        unparseable_date: usize,
    },
}

pub struct PipelineOrchestrator {
    stages: PipelineStages,
}

struct PipelineStages {
    ingest: Arc<dyn IngestStage>,
    sanitize: Arc<dyn SanitizeStage>,
    normalize: Arc<dyn NormalizeStage>,
    project: Arc<dyn ProjectStage>,
    partition: Arc<dyn PartitionStage>,
    label: Arc<dyn LabelStage>,
    emit: Arc<dyn EmitStage>,
}

pub struct PipelineBuilder {
    ingest: Option<Arc<dyn IngestStage>>,
    sanitize: Option<Arc<dyn SanitizeStage>>,
    normalize: Option<Arc<dyn NormalizeStage>>,
    project: Option<Arc<dyn ProjectStage>>,
    partition: Option<Arc<dyn PartitionStage>>,
    label: Option<Arc<dyn LabelStage>>,
    emit: Option<Arc<dyn EmitStage>>,
}

impl PipelineOrchestrator {
    /// 設定からデフォルトのステージ構成を組み立てる。
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        PipelineBuilder::new()
            .with_ingest_stage(Arc::new(CsvIngestStage::new(config.input_path().clone())))
            .with_sanitize_stage(Arc::new(RequiredFieldSanitizeStage::new()))
            .with_normalize_stage(Arc::new(ZScoreNormalizeStage::new()))
            .with_project_stage(Arc::new(PcaProjectStage::new(config.projection_dim().get())))
            .with_partition_stage(Arc::new(KMeansPartitionStage::new(
                config.group_count().get(),
                config.seed(),
                config.kmeans_max_iterations().get(),
            )))
            .with_label_stage(Arc::new(HeuristicLabelStage::new()))
            .with_emit_stage(Arc::new(CsvEmitStage::new(config.output_path().clone())))
            .build()
    }

    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// パイプラインを先頭から末尾まで順に実行する。
    ///
    /// 射影と分割はどちらも正規化行列にのみ依存するが、ここでは射影を先に
    /// 実行する。サニタイズ後に母集団が空の場合はその場で失敗させる。
    ///
    /// # Errors
    /// 母集団が空になった場合、および各ステージのIO・数値処理が失敗した
    /// 場合はエラーを返す。
    pub async fn execute(&self, run: &RunContext) -> Result<EmitResult> {
        tracing::debug!(run_id = %run.run_id, "trackmap pipeline started");

        let raw = self.stages.ingest.ingest(run).await?;
        let sanitized = self.stages.sanitize.sanitize(run, raw).await?;
        if sanitized.records.is_empty() {
            // 後段は非空の母集団を前提とするため、ここで明示的に止める
            let report = sanitized.report;
            return Err(PipelineError::EmptyPopulation {
                total_rows: report.total_rows,
                missing_required: report.missing_required,
                unparseable_date: report.unparseable_date,
            }
            .into());
        }
        let normalized = self.stages.normalize.normalize(run, sanitized).await?;
        let projected = self.stages.project.project(run, normalized).await?;
        let partitioned = self.stages.partition.partition(run, projected).await?;
        let labeled = self.stages.label.label(run, partitioned).await?;
        let emitted = self.stages.emit.emit(run, labeled).await?;

        let elapsed = time::now().signed_duration_since(run.started_at);
        info!(
            run_id = %run.run_id,
            rows_written = emitted.rows_written,
            elapsed_ms = elapsed.num_milliseconds(),
            "trackmap pipeline completed"
        );
        Ok(emitted)
    }
}

impl PipelineBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ingest: None,
            sanitize: None,
            normalize: None,
            project: None,
            partition: None,
            label: None,
            emit: None,
        }
    }

    #[must_use]
    pub fn with_ingest_stage(mut self, stage: Arc<dyn IngestStage>) -> Self {
        self.ingest = Some(stage);
        self
    }

    #[must_use]
    pub fn with_sanitize_stage(mut self, stage: Arc<dyn SanitizeStage>) -> Self {
        self.sanitize = Some(stage);
        self
    }

    #[must_use]
    pub fn with_normalize_stage(mut self, stage: Arc<dyn NormalizeStage>) -> Self {
        self.normalize = Some(stage);
        self
    }

    #[must_use]
    pub fn with_project_stage(mut self, stage: Arc<dyn ProjectStage>) -> Self {
        self.project = Some(stage);
        self
    }

    #[must_use]
    pub fn with_partition_stage(mut self, stage: Arc<dyn PartitionStage>) -> Self {
        self.partition = Some(stage);
        self
    }

    #[must_use]
    pub fn with_label_stage(mut self, stage: Arc<dyn LabelStage>) -> Self {
        self.label = Some(stage);
        self
    }

    #[must_use]
    pub fn with_emit_stage(mut self, stage: Arc<dyn EmitStage>) -> Self {
        self.emit = Some(stage);
        self
    }

    #[must_use]
    pub fn build(self) -> PipelineOrchestrator {
        let stages = PipelineStages {
            ingest: self
                .ingest
                .unwrap_or_else(|| panic!("ingest stage must be configured before build")),
            sanitize: self
                .sanitize
                .unwrap_or_else(|| panic!("sanitize stage must be configured before build")),
            normalize: self
                .normalize
                .unwrap_or_else(|| panic!("normalize stage must be configured before build")),
            project: self
                .project
                .unwrap_or_else(|| panic!("project stage must be configured before build")),
            partition: self
                .partition
                .unwrap_or_else(|| panic!("partition stage must be configured before build")),
            label: self
                .label
                .unwrap_or_else(|| panic!("label stage must be configured before build")),
            emit: self
                .emit
                .unwrap_or_else(|| panic!("emit stage must be configured before build")),
        };

        PipelineOrchestrator { stages }
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
