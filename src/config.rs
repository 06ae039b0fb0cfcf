use std::{env, num::NonZeroUsize, path::PathBuf};

use thiserror::Error;

use crate::pipeline::sanitize::AudioDescriptors;

#[cfg(test)]
use once_cell::sync::Lazy;
#[cfg(test)]
pub(crate) static ENV_MUTEX: Lazy<std::sync::Mutex<()>> = Lazy::new(|| std::sync::Mutex::new(()));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    input_path: PathBuf,
    output_path: PathBuf,
    group_count: NonZeroUsize,
    seed: u64,
    projection_dim: NonZeroUsize,
    kmeans_max_iterations: NonZeroUsize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl Config {
    /// 環境変数から Trackmap Worker の設定値を読み込み、検証する。
    ///
    /// 入力カタログのパスのみ必須。グループ数・射影次元・シードなどは
    /// ダッシュボードが前提とする固定値をデフォルトとして持つ。
    ///
    /// # Errors
    /// `TRACKMAP_INPUT_PATH` が未設定、もしくは各種値のパースに失敗した場合は
    /// [`ConfigError`] を返す。
    pub fn from_env() -> Result<Self, ConfigError> {
        let input_path = PathBuf::from(env_var("TRACKMAP_INPUT_PATH")?);
        let output_path = PathBuf::from(
            env::var("TRACKMAP_OUTPUT_PATH")
                .unwrap_or_else(|_| "data/processed_tracks.csv".to_string()),
        );
        let group_count = parse_non_zero_usize("TRACKMAP_GROUP_COUNT", 6)?;
        let seed = parse_u64("TRACKMAP_SEED", 42)?;
        let projection_dim = parse_non_zero_usize("TRACKMAP_PROJECTION_DIM", 2)?;
        if projection_dim.get() > AudioDescriptors::COUNT {
            return Err(ConfigError::Invalid {
                name: "TRACKMAP_PROJECTION_DIM",
                source: anyhow::anyhow!(
                    "must not exceed the descriptor count ({})",
                    AudioDescriptors::COUNT
                ),
            });
        }
        let kmeans_max_iterations = parse_non_zero_usize("TRACKMAP_KMEANS_MAX_ITERATIONS", 300)?;

        Ok(Self {
            input_path,
            output_path,
            group_count,
            seed,
            projection_dim,
            kmeans_max_iterations,
        })
    }

    #[must_use]
    pub fn input_path(&self) -> &PathBuf {
        &self.input_path
    }

    #[must_use]
    pub fn output_path(&self) -> &PathBuf {
        &self.output_path
    }

    #[must_use]
    pub fn group_count(&self) -> NonZeroUsize {
        self.group_count
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    #[must_use]
    pub fn projection_dim(&self) -> NonZeroUsize {
        self.projection_dim
    }

    #[must_use]
    pub fn kmeans_max_iterations(&self) -> NonZeroUsize {
        self.kmeans_max_iterations
    }
}

fn env_var(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parse_non_zero_usize(name: &'static str, default: usize) -> Result<NonZeroUsize, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let parsed = raw.parse::<usize>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })?;
    NonZeroUsize::new(parsed).ok_or_else(|| ConfigError::Invalid {
        name,
        source: anyhow::anyhow!("must be greater than zero"),
    })
}

fn parse_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}
