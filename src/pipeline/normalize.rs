use anyhow::{Context, Result};
use async_trait::async_trait;
use ndarray::Array2;
use tracing::{debug, warn};
use uuid::Uuid;

use super::RunContext;
use super::sanitize::{AudioDescriptors, SanitizedCatalog, SanitizedTrack};

/// この閾値以下の母標準偏差は分散ゼロとみなす。
const VARIANCE_EPSILON: f64 = 1e-12;

/// 記述子ごとの母平均・母標準偏差（Z-score正規化用）。
///
/// 同一実行内の全レコードに同じ統計が適用される。部分集合からの
/// 再計算はしない。
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorStats {
    pub mean: [f64; AudioDescriptors::COUNT],
    pub std_dev: [f64; AudioDescriptors::COUNT],
}

impl DescriptorStats {
    /// 記述子行列から母集団統計を計算する。
    #[must_use]
    pub fn from_matrix(matrix: &Array2<f64>) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let n = matrix.nrows().max(1) as f64;

        // 平均を計算
        let mut mean = [0.0; AudioDescriptors::COUNT];
        for row in matrix.outer_iter() {
            for (j, value) in row.iter().enumerate() {
                mean[j] += value;
            }
        }
        for m in &mut mean {
            *m /= n;
        }

        // 母標準偏差を計算
        let mut std_dev = [0.0; AudioDescriptors::COUNT];
        for row in matrix.outer_iter() {
            for (j, value) in row.iter().enumerate() {
                let diff = value - mean[j];
                std_dev[j] += diff * diff;
            }
        }
        for s in &mut std_dev {
            *s = (*s / n).sqrt();
        }

        Self { mean, std_dev }
    }

    /// 分散ゼロの列はすでに中心化済みとみなし、全値を0.0にする。
    pub fn normalize_in_place(&self, matrix: &mut Array2<f64>) {
        for mut row in matrix.outer_iter_mut() {
            for (j, value) in row.iter_mut().enumerate() {
                if self.std_dev[j] <= VARIANCE_EPSILON {
                    *value = 0.0;
                } else {
                    *value = (*value - self.mean[j]) / self.std_dev[j];
                }
            }
        }
    }

    fn degenerate_columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.std_dev
            .iter()
            .enumerate()
            .filter(|(_, s)| **s <= VARIANCE_EPSILON)
            .map(|(j, _)| AudioDescriptors::COLUMN_NAMES[j])
    }
}

/// サニタイズ済みレコード列から記述子行列を組み立てる。
pub(crate) fn descriptor_matrix(records: &[SanitizedTrack]) -> Result<Array2<f64>> {
    let mut buffer = Vec::with_capacity(records.len() * AudioDescriptors::COUNT);
    for record in records {
        buffer.extend_from_slice(&record.descriptors.as_array());
    }
    Array2::from_shape_vec((records.len(), AudioDescriptors::COUNT), buffer)
        .context("descriptor buffer does not match matrix shape")
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedCatalog {
    pub run_id: Uuid,
    pub records: Vec<SanitizedTrack>,
    pub matrix: Array2<f64>,
}

#[async_trait]
pub trait NormalizeStage: Send + Sync {
    async fn normalize(
        &self,
        run: &RunContext,
        catalog: SanitizedCatalog,
    ) -> Result<NormalizedCatalog>;
}

/// 記述子を母集団全体でゼロ平均・単位分散に揃えるNormalizeStage。
#[derive(Debug, Clone)]
pub struct ZScoreNormalizeStage;

impl ZScoreNormalizeStage {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for ZScoreNormalizeStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NormalizeStage for ZScoreNormalizeStage {
    async fn normalize(
        &self,
        run: &RunContext,
        catalog: SanitizedCatalog,
    ) -> Result<NormalizedCatalog> {
        let mut matrix = descriptor_matrix(&catalog.records)?;
        let stats = DescriptorStats::from_matrix(&matrix);

        for column in stats.degenerate_columns() {
            warn!(
                run_id = %run.run_id,
                column,
                "descriptor has zero variance; leaving it centered at zero"
            );
        }

        stats.normalize_in_place(&mut matrix);

        debug!(
            run_id = %run.run_id,
            rows = matrix.nrows(),
            "descriptors normalized"
        );

        Ok(NormalizedCatalog {
            run_id: catalog.run_id,
            records: catalog.records,
            matrix,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Axis;

    fn track(name: &str, descriptors: [f64; AudioDescriptors::COUNT]) -> SanitizedTrack {
        SanitizedTrack {
            track_id: Some(format!("id-{name}")),
            track_name: name.to_string(),
            track_artist: Some("Artist".to_string()),
            playlist_genre: "pop".to_string(),
            release_date: "2019-01-01".to_string(),
            year: 2019,
            descriptors: AudioDescriptors {
                danceability: descriptors[0],
                energy: descriptors[1],
                loudness: descriptors[2],
                speechiness: descriptors[3],
                acousticness: descriptors[4],
                instrumentalness: descriptors[5],
                liveness: descriptors[6],
                valence: descriptors[7],
                tempo: descriptors[8],
            },
        }
    }

    fn catalog(records: Vec<SanitizedTrack>) -> SanitizedCatalog {
        SanitizedCatalog {
            run_id: uuid::Uuid::new_v4(),
            records,
            report: super::super::sanitize::SanitizeReport::default(),
        }
    }

    #[tokio::test]
    async fn normalized_columns_have_zero_mean_and_unit_variance() {
        let records = vec![
            track("a", [0.1, 0.2, -10.0, 0.0, 0.9, 0.0, 0.1, 0.3, 90.0]),
            track("b", [0.5, 0.6, -6.0, 0.1, 0.5, 0.2, 0.2, 0.5, 120.0]),
            track("c", [0.9, 0.8, -2.0, 0.3, 0.1, 0.8, 0.4, 0.9, 180.0]),
        ];

        let stage = ZScoreNormalizeStage::new();
        let run = RunContext::new();
        let result = stage
            .normalize(&run, catalog(records))
            .await
            .expect("normalize succeeds");

        #[allow(clippy::cast_precision_loss)]
        let n = result.matrix.nrows() as f64;
        for column in result.matrix.axis_iter(Axis(1)) {
            let mean = column.sum() / n;
            let variance = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            assert!(mean.abs() < 1e-9, "column mean should be ~0, got {mean}");
            assert!(
                (variance - 1.0).abs() < 1e-9,
                "column variance should be ~1, got {variance}"
            );
        }
    }

    #[tokio::test]
    async fn zero_variance_column_is_left_centered_at_zero() {
        let records = vec![
            track("a", [0.5, 0.2, -10.0, 0.0, 0.9, 0.0, 0.1, 0.3, 90.0]),
            track("b", [0.5, 0.6, -6.0, 0.1, 0.5, 0.2, 0.2, 0.5, 120.0]),
        ];

        let stage = ZScoreNormalizeStage::new();
        let run = RunContext::new();
        let result = stage
            .normalize(&run, catalog(records))
            .await
            .expect("normalize succeeds");

        // danceability is constant across the population
        for row in result.matrix.outer_iter() {
            assert!(row[0].abs() < f64::EPSILON);
        }
    }

    #[test]
    fn stats_use_population_standard_deviation() {
        let records = vec![
            track("a", [0.0; AudioDescriptors::COUNT]),
            track("b", [1.0; AudioDescriptors::COUNT]),
        ];
        let matrix = descriptor_matrix(&records).expect("matrix builds");

        let stats = DescriptorStats::from_matrix(&matrix);

        // Population stddev of {0, 1} is 0.5, not the sample value ~0.707
        assert!((stats.std_dev[0] - 0.5).abs() < 1e-12);
        assert!((stats.mean[0] - 0.5).abs() < 1e-12);
    }
}
