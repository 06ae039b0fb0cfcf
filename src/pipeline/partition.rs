use anyhow::Result;
use async_trait::async_trait;
use ndarray::Array2;
use tracing::info;
use uuid::Uuid;

use super::RunContext;
use super::project::ProjectedCatalog;
use super::sanitize::SanitizedTrack;

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionedCatalog {
    pub run_id: Uuid,
    pub records: Vec<SanitizedTrack>,
    pub coords: Array2<f64>,
    /// レコードごとのグループ識別子。識別子は順位ではなくただのラベル。
    pub assignments: Vec<usize>,
    pub group_count: usize,
}

#[async_trait]
pub trait PartitionStage: Send + Sync {
    async fn partition(
        &self,
        run: &RunContext,
        catalog: ProjectedCatalog,
    ) -> Result<PartitionedCatalog>;
}

/// シード付きK-Meansで正規化済み行列を分割するPartitionStage。
///
/// 正規化行列はこのステージで役目を終え、以降のバンドルには載らない。
pub struct KMeansPartitionStage {
    group_count: usize,
    seed: u64,
    max_iterations: usize,
}

impl KMeansPartitionStage {
    #[must_use]
    pub fn new(group_count: usize, seed: u64, max_iterations: usize) -> Self {
        Self {
            group_count,
            seed,
            max_iterations,
        }
    }
}

#[async_trait]
impl PartitionStage for KMeansPartitionStage {
    async fn partition(
        &self,
        run: &RunContext,
        catalog: ProjectedCatalog,
    ) -> Result<PartitionedCatalog> {
        let rows: Vec<Vec<f64>> = catalog.matrix.outer_iter().map(|row| row.to_vec()).collect();
        let result = crate::util::kmeans::KMeans::fit(
            &rows,
            self.group_count,
            self.max_iterations,
            self.seed,
        );

        info!(
            run_id = %run.run_id,
            group_count = result.centroids.len(),
            iterations = result.iterations,
            "partitioning converged"
        );

        Ok(PartitionedCatalog {
            run_id: catalog.run_id,
            records: catalog.records,
            coords: catalog.coords,
            assignments: result.assignments,
            group_count: result.centroids.len(),
        })
    }
}
