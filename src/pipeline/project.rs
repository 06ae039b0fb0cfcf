use anyhow::Result;
use async_trait::async_trait;
use ndarray::Array2;
use tracing::debug;
use uuid::Uuid;

use super::RunContext;
use super::normalize::NormalizedCatalog;
use super::sanitize::SanitizedTrack;

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedCatalog {
    pub run_id: Uuid,
    pub records: Vec<SanitizedTrack>,
    pub matrix: Array2<f64>,
    /// 1レコードにつき `projection_dim` 個の可視化用座標。
    pub coords: Array2<f64>,
}

#[async_trait]
pub trait ProjectStage: Send + Sync {
    async fn project(&self, run: &RunContext, catalog: NormalizedCatalog)
    -> Result<ProjectedCatalog>;
}

/// 正規化済み行列を分散最大の方向へ線形射影するProjectStage。
///
/// 射影はダッシュボードの散布図専用で、後段の分割には影響しない。
pub struct PcaProjectStage {
    projection_dim: usize,
}

impl PcaProjectStage {
    #[must_use]
    pub fn new(projection_dim: usize) -> Self {
        Self { projection_dim }
    }
}

#[async_trait]
impl ProjectStage for PcaProjectStage {
    async fn project(
        &self,
        run: &RunContext,
        catalog: NormalizedCatalog,
    ) -> Result<ProjectedCatalog> {
        let components = crate::util::pca::principal_components(&catalog.matrix, self.projection_dim);
        let coords = catalog.matrix.dot(&components);

        debug!(
            run_id = %run.run_id,
            rows = coords.nrows(),
            dims = coords.ncols(),
            "projection computed"
        );

        Ok(ProjectedCatalog {
            run_id: catalog.run_id,
            records: catalog.records,
            matrix: catalog.matrix,
            coords,
        })
    }
}
