use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use super::RunContext;
use super::partition::PartitionedCatalog;
use super::sanitize::SanitizedTrack;

/// グループを特徴づける5記述子の平均。生の記述子値から計算する。
#[derive(Debug, Clone, PartialEq)]
pub struct GroupProfile {
    pub energy: f64,
    pub acousticness: f64,
    pub danceability: f64,
    pub speechiness: f64,
    pub instrumentalness: f64,
}

struct LabelRule {
    label: &'static str,
    matches: fn(&GroupProfile) -> bool,
}

/// ラベル規則は優先順位順で、最初に一致したものが採用される。
/// 規則同士は排他的ではないため、並び順そのものが意味を持つ。
const LABEL_RULES: [LabelRule; 7] = [
    LabelRule {
        label: "Instrumental / Ambient",
        matches: |profile| profile.instrumentalness > 0.5,
    },
    LabelRule {
        label: "Speech / Rap",
        matches: |profile| profile.speechiness > 0.2,
    },
    LabelRule {
        label: "Acoustic / Calm",
        matches: |profile| profile.acousticness > 0.6,
    },
    LabelRule {
        label: "High Energy / Dance",
        matches: |profile| profile.energy > 0.7 && profile.danceability > 0.6,
    },
    LabelRule {
        label: "Intense / Rock",
        matches: |profile| profile.energy > 0.7,
    },
    LabelRule {
        label: "Groovy / Pop",
        matches: |profile| profile.danceability > 0.7,
    },
    LabelRule {
        label: "Mixed / Mid-Tempo",
        matches: |_| true,
    },
];

/// プロファイルに最初に一致した規則のラベルを返す。
///
/// どの規則にも一致しない場合は `Cluster N` に落ちる。現在の規則表では
/// 末尾が全件一致なので到達しないが、規則構成が変わっても識別子付きの
/// ラベルが出るようにしてある。
#[must_use]
pub fn semantic_label(group: usize, profile: &GroupProfile) -> String {
    LABEL_RULES
        .iter()
        .find(|rule| (rule.matches)(profile))
        .map_or_else(|| format!("Cluster {group}"), |rule| rule.label.to_string())
}

/// 1グループ分の確定済みサマリ。分割完了後に一度だけ構築され、以後不変。
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSummary {
    pub profile: GroupProfile,
    pub label: String,
    pub track_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedTrack {
    pub track: SanitizedTrack,
    pub coords: Vec<f64>,
    pub group: usize,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LabeledCatalog {
    pub run_id: Uuid,
    pub records: Vec<EnrichedTrack>,
    pub groups: BTreeMap<usize, GroupSummary>,
}

#[async_trait]
pub trait LabelStage: Send + Sync {
    async fn label(&self, run: &RunContext, catalog: PartitionedCatalog) -> Result<LabeledCatalog>;
}

/// グループ平均のヒューリスティック規則で意味ラベルを付けるLabelStage。
#[derive(Debug, Clone)]
pub struct HeuristicLabelStage;

impl HeuristicLabelStage {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for HeuristicLabelStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LabelStage for HeuristicLabelStage {
    async fn label(&self, run: &RunContext, catalog: PartitionedCatalog) -> Result<LabeledCatalog> {
        let groups = build_group_summaries(&catalog.records, &catalog.assignments);

        for (group, summary) in &groups {
            info!(
                run_id = %run.run_id,
                group,
                label = %summary.label,
                track_count = summary.track_count,
                energy = summary.profile.energy,
                acousticness = summary.profile.acousticness,
                danceability = summary.profile.danceability,
                speechiness = summary.profile.speechiness,
                instrumentalness = summary.profile.instrumentalness,
                "group labeled"
            );
        }

        let records = catalog
            .records
            .into_iter()
            .zip(catalog.assignments)
            .enumerate()
            .map(|(index, (track, group))| EnrichedTrack {
                track,
                coords: catalog.coords.row(index).to_vec(),
                label: groups[&group].label.clone(),
                group,
            })
            .collect();

        Ok(LabeledCatalog {
            run_id: catalog.run_id,
            records,
            groups,
        })
    }
}

/// グループ識別子 → プロファイル → ラベルの対応表を一度に構築する。
fn build_group_summaries(
    records: &[SanitizedTrack],
    assignments: &[usize],
) -> BTreeMap<usize, GroupSummary> {
    struct Accumulator {
        energy: f64,
        acousticness: f64,
        danceability: f64,
        speechiness: f64,
        instrumentalness: f64,
        count: usize,
    }

    let mut sums: BTreeMap<usize, Accumulator> = BTreeMap::new();
    for (record, &group) in records.iter().zip(assignments) {
        let entry = sums.entry(group).or_insert(Accumulator {
            energy: 0.0,
            acousticness: 0.0,
            danceability: 0.0,
            speechiness: 0.0,
            instrumentalness: 0.0,
            count: 0,
        });
        entry.energy += record.descriptors.energy;
        entry.acousticness += record.descriptors.acousticness;
        entry.danceability += record.descriptors.danceability;
        entry.speechiness += record.descriptors.speechiness;
        entry.instrumentalness += record.descriptors.instrumentalness;
        entry.count += 1;
    }

    sums.into_iter()
        .map(|(group, acc)| {
            #[allow(clippy::cast_precision_loss)]
            let count = acc.count.max(1) as f64;
            let profile = GroupProfile {
                energy: acc.energy / count,
                acousticness: acc.acousticness / count,
                danceability: acc.danceability / count,
                speechiness: acc.speechiness / count,
                instrumentalness: acc.instrumentalness / count,
            };
            let label = semantic_label(group, &profile);
            let summary = GroupSummary {
                profile,
                label,
                track_count: acc.count,
            };
            (group, summary)
        })
        .collect()
}
