use anyhow::Result;
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use super::RunContext;
use super::ingest::{RawCatalog, RawTrackRow};

/// 1トラック分の9個のオーディオ記述子。
///
/// 行列化する際の列順は `COLUMN_NAMES` の並びに固定される。
#[derive(Debug, Clone, PartialEq)]
pub struct AudioDescriptors {
    pub danceability: f64,
    pub energy: f64,
    pub loudness: f64,
    pub speechiness: f64,
    pub acousticness: f64,
    pub instrumentalness: f64,
    pub liveness: f64,
    pub valence: f64,
    pub tempo: f64,
}

impl AudioDescriptors {
    pub const COUNT: usize = 9;

    pub const COLUMN_NAMES: [&'static str; Self::COUNT] = [
        "danceability",
        "energy",
        "loudness",
        "speechiness",
        "acousticness",
        "instrumentalness",
        "liveness",
        "valence",
        "tempo",
    ];

    #[must_use]
    pub fn as_array(&self) -> [f64; Self::COUNT] {
        [
            self.danceability,
            self.energy,
            self.loudness,
            self.speechiness,
            self.acousticness,
            self.instrumentalness,
            self.liveness,
            self.valence,
            self.tempo,
        ]
    }
}

/// 必須フィールドが揃い、`year` の導出に成功したトラック。
///
/// `track_id` と `track_artist` は必須ではなく、欠損のまま通過する。
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedTrack {
    pub track_id: Option<String>,
    pub track_name: String,
    pub track_artist: Option<String>,
    pub playlist_genre: String,
    pub release_date: String,
    pub year: i32,
    pub descriptors: AudioDescriptors,
}

/// 行単位の除外件数。ハードエラーにはしないが観測可能にしておく。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SanitizeReport {
    pub total_rows: usize,
    pub missing_required: usize,
    pub unparseable_date: usize,
}

impl SanitizeReport {
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.missing_required + self.unparseable_date
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedCatalog {
    pub run_id: Uuid,
    pub records: Vec<SanitizedTrack>,
    pub report: SanitizeReport,
}

#[async_trait]
pub trait SanitizeStage: Send + Sync {
    async fn sanitize(&self, run: &RunContext, catalog: RawCatalog) -> Result<SanitizedCatalog>;
}

/// 必須フィールドの欠損行とリリース年が導出できない行を落とすSanitizeStage。
#[derive(Debug, Clone)]
pub struct RequiredFieldSanitizeStage;

impl RequiredFieldSanitizeStage {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for RequiredFieldSanitizeStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SanitizeStage for RequiredFieldSanitizeStage {
    async fn sanitize(&self, run: &RunContext, catalog: RawCatalog) -> Result<SanitizedCatalog> {
        let total_rows = catalog.rows.len();
        let mut missing_required = 0usize;

        // 第1パス: 必須フィールドの欠損行を落とす
        let mut candidates = Vec::with_capacity(total_rows);
        for row in catalog.rows {
            match complete_fields(row) {
                Some(candidate) => candidates.push(candidate),
                None => missing_required += 1,
            }
        }

        // 第2パス: リリース年が導出できない行を落とす
        let mut unparseable_date = 0usize;
        let mut records = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match extract_year(&candidate.release_date) {
                Some(year) => records.push(SanitizedTrack {
                    track_id: candidate.track_id,
                    track_name: candidate.track_name,
                    track_artist: candidate.track_artist,
                    playlist_genre: candidate.playlist_genre,
                    release_date: candidate.release_date,
                    year,
                    descriptors: candidate.descriptors,
                }),
                None => unparseable_date += 1,
            }
        }

        let report = SanitizeReport {
            total_rows,
            missing_required,
            unparseable_date,
        };

        info!(
            run_id = %run.run_id,
            total_rows = report.total_rows,
            kept = records.len(),
            missing_required = report.missing_required,
            unparseable_date = report.unparseable_date,
            "catalog sanitized"
        );

        Ok(SanitizedCatalog {
            run_id: run.run_id,
            records,
            report,
        })
    }
}

struct CandidateTrack {
    track_id: Option<String>,
    track_name: String,
    track_artist: Option<String>,
    playlist_genre: String,
    release_date: String,
    descriptors: AudioDescriptors,
}

/// 必須フィールドが揃っていれば `year` 以外を確定させた候補を返す。
fn complete_fields(row: RawTrackRow) -> Option<CandidateTrack> {
    let descriptors = AudioDescriptors {
        danceability: finite(row.danceability)?,
        energy: finite(row.energy)?,
        loudness: finite(row.loudness)?,
        speechiness: finite(row.speechiness)?,
        acousticness: finite(row.acousticness)?,
        instrumentalness: finite(row.instrumentalness)?,
        liveness: finite(row.liveness)?,
        valence: finite(row.valence)?,
        tempo: finite(row.tempo)?,
    };

    Some(CandidateTrack {
        track_id: row.track_id,
        track_name: row.track_name?,
        track_artist: row.track_artist,
        playlist_genre: row.playlist_genre?,
        release_date: row.release_date?,
        descriptors,
    })
}

/// NaN / 無限大は欠損として扱う。
fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// リリース日文字列の先頭トークン（最初の `-` より前）を整数としてパースする。
pub(crate) fn extract_year(date: &str) -> Option<i32> {
    date.split('-')
        .next()
        .and_then(|token| token.trim().parse::<i32>().ok())
}
