//! パイプライン全体の結合テスト。
//!
//! 一時ディレクトリ上のCSVを入出力として、実ステージ構成で末端まで流す。

use std::path::Path;
use std::sync::Mutex;

use once_cell::sync::Lazy;

use trackmap_worker::config::Config;
use trackmap_worker::pipeline::emit::EmitResult;
use trackmap_worker::pipeline::{PipelineError, PipelineOrchestrator, RunContext};

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

const INPUT_HEADER: &str = "track_id,track_name,track_artist,playlist_genre,track_album_release_date,danceability,energy,loudness,speechiness,acousticness,instrumentalness,liveness,valence,tempo";

const OUTPUT_HEADER: &str = "track_id,track_name,track_artist,playlist_genre,year,pca1,pca2,cluster_label,danceability,energy,loudness,speechiness,acousticness,instrumentalness,liveness,valence,tempo";

// Output column offsets for the default projection dimension of two
const COL_TRACK_ID: usize = 0;
const COL_YEAR: usize = 4;
const COL_LABEL: usize = 7;
const COL_FIRST_DESCRIPTOR: usize = 8;

fn set_env(name: &str, value: &str) {
    // SAFETY: tests run sequentially behind ENV_MUTEX and assign valid UTF-8 values.
    unsafe {
        std::env::set_var(name, value);
    }
}

fn remove_env(name: &str) {
    // SAFETY: tests run sequentially behind ENV_MUTEX and clean up deterministic keys.
    unsafe {
        std::env::remove_var(name);
    }
}

fn configure(input: &Path, output: &Path) {
    for name in [
        "TRACKMAP_INPUT_PATH",
        "TRACKMAP_OUTPUT_PATH",
        "TRACKMAP_GROUP_COUNT",
        "TRACKMAP_SEED",
        "TRACKMAP_PROJECTION_DIM",
        "TRACKMAP_KMEANS_MAX_ITERATIONS",
    ] {
        remove_env(name);
    }
    set_env("TRACKMAP_INPUT_PATH", input.to_str().expect("utf-8 path"));
    set_env("TRACKMAP_OUTPUT_PATH", output.to_str().expect("utf-8 path"));
}

fn write_catalog(path: &Path, rows: &[String]) {
    let mut contents = String::from(INPUT_HEADER);
    contents.push('\n');
    for row in rows {
        contents.push_str(row);
        contents.push('\n');
    }
    std::fs::write(path, contents).expect("write catalog fixture");
}

fn row(id: &str, name: &str, artist: &str, genre: &str, date: &str, descriptors: [f64; 9]) -> String {
    let values: Vec<String> = descriptors.iter().map(ToString::to_string).collect();
    format!("{id},{name},{artist},{genre},{date},{}", values.join(","))
}

async fn run_pipeline() -> anyhow::Result<EmitResult> {
    let config = Config::from_env().expect("config loads");
    let orchestrator = PipelineOrchestrator::from_config(&config);
    orchestrator.execute(&RunContext::new()).await
}

fn output_rows(path: &Path) -> Vec<Vec<String>> {
    let contents = std::fs::read_to_string(path).expect("output exists");
    contents
        .lines()
        .skip(1)
        .map(|line| line.split(',').map(str::to_string).collect())
        .collect()
}

#[tokio::test]
async fn year_is_derived_and_bad_dates_are_excluded() {
    let _lock = ENV_MUTEX.lock().expect("env mutex");
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("catalog.csv");
    let output = dir.path().join("enriched.csv");
    write_catalog(
        &input,
        &[
            row("t1", "First", "A", "pop", "2017-05-23", [0.5, 0.6, -7.0, 0.05, 0.2, 0.0, 0.1, 0.7, 120.0]),
            row("t2", "Second", "B", "rock", "1999", [0.3, 0.8, -5.0, 0.04, 0.1, 0.0, 0.2, 0.4, 140.0]),
            row("t3", "Undated", "C", "rap", "unknown", [0.7, 0.5, -6.0, 0.3, 0.1, 0.0, 0.1, 0.6, 95.0]),
        ],
    );
    configure(&input, &output);

    run_pipeline().await.expect("pipeline succeeds");

    let rows = output_rows(&output);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][COL_TRACK_ID], "t1");
    assert_eq!(rows[0][COL_YEAR], "2017");
    assert_eq!(rows[1][COL_TRACK_ID], "t2");
    assert_eq!(rows[1][COL_YEAR], "1999");
    assert!(rows.iter().all(|r| r[COL_TRACK_ID] != "t3"));
}

#[tokio::test]
async fn output_header_matches_the_fixed_column_order() {
    let _lock = ENV_MUTEX.lock().expect("env mutex");
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("catalog.csv");
    let output = dir.path().join("enriched.csv");
    write_catalog(
        &input,
        &[
            row("t1", "First", "A", "pop", "2017-05-23", [0.5, 0.6, -7.0, 0.05, 0.2, 0.0, 0.1, 0.7, 120.0]),
            row("t2", "Second", "B", "rock", "2001-01-01", [0.3, 0.8, -5.0, 0.04, 0.1, 0.0, 0.2, 0.4, 140.0]),
        ],
    );
    configure(&input, &output);

    run_pipeline().await.expect("pipeline succeeds");

    let contents = std::fs::read_to_string(&output).expect("output exists");
    assert_eq!(contents.lines().next(), Some(OUTPUT_HEADER));
}

#[tokio::test]
async fn input_fields_pass_through_unchanged() {
    let _lock = ENV_MUTEX.lock().expect("env mutex");
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("catalog.csv");
    let output = dir.path().join("enriched.csv");
    let descriptors = [0.5, 0.6, -7.25, 0.05, 0.2, 0.0, 0.1, 0.7, 120.5];
    write_catalog(
        &input,
        &[
            row("t1", "First", "A", "pop", "2017-05-23", descriptors),
            row("t2", "Second", "B", "rock", "2001-01-01", [0.3, 0.8, -5.0, 0.04, 0.1, 0.0, 0.2, 0.4, 140.0]),
        ],
    );
    configure(&input, &output);

    run_pipeline().await.expect("pipeline succeeds");

    let rows = output_rows(&output);
    let first = &rows[0];
    assert_eq!(&first[0..4], ["t1", "First", "A", "pop"]);
    for (offset, expected) in descriptors.iter().enumerate() {
        let actual: f64 = first[COL_FIRST_DESCRIPTOR + offset]
            .parse()
            .expect("descriptor parses");
        assert!((actual - expected).abs() < f64::EPSILON);
    }
}

#[tokio::test]
async fn identical_tracks_partition_together_and_the_outlier_apart() {
    let _lock = ENV_MUTEX.lock().expect("env mutex");
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("catalog.csv");
    let output = dir.path().join("enriched.csv");
    // Two identical instrumental tracks and one speech-heavy outlier. If the
    // twins share a group and the outlier gets its own, the labeling rules
    // give them distinct labels; any mixed grouping averages the profiles
    // and produces different labels.
    let twin = [0.1, 0.1, -20.0, 0.1, 0.1, 0.9, 0.1, 0.1, 60.0];
    let outlier = [0.9, 0.9, -2.0, 0.9, 0.8, 0.0, 0.9, 0.9, 190.0];
    write_catalog(
        &input,
        &[
            row("twin-a", "TwinA", "A", "ambient", "2010-01-01", twin),
            row("twin-b", "TwinB", "A", "ambient", "2011-01-01", twin),
            row("out", "Outlier", "B", "rap", "2012-01-01", outlier),
        ],
    );
    configure(&input, &output);
    set_env("TRACKMAP_GROUP_COUNT", "2");

    run_pipeline().await.expect("pipeline succeeds");

    let rows = output_rows(&output);
    assert_eq!(rows[0][COL_LABEL], "Instrumental / Ambient");
    assert_eq!(rows[1][COL_LABEL], "Instrumental / Ambient");
    assert_eq!(rows[2][COL_LABEL], "Speech / Rap");
}

#[tokio::test]
async fn instrumental_population_is_labeled_instrumental() {
    let _lock = ENV_MUTEX.lock().expect("env mutex");
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("catalog.csv");
    let output = dir.path().join("enriched.csv");
    // Every record identical: all descriptor columns are degenerate, and the
    // first labeling rule must still fire before any other can match.
    let instrumental = [0.1, 0.1, 0.1, 0.1, 0.1, 0.9, 0.1, 0.1, 0.1];
    write_catalog(
        &input,
        &[
            row("t1", "Drone1", "A", "ambient", "2015-01-01", instrumental),
            row("t2", "Drone2", "A", "ambient", "2016-01-01", instrumental),
            row("t3", "Drone3", "A", "ambient", "2017-01-01", instrumental),
            row("t4", "Drone4", "A", "ambient", "2018-01-01", instrumental),
        ],
    );
    configure(&input, &output);

    run_pipeline().await.expect("pipeline succeeds");

    let rows = output_rows(&output);
    assert_eq!(rows.len(), 4);
    for record in &rows {
        assert_eq!(record[COL_LABEL], "Instrumental / Ambient");
    }
}

#[tokio::test]
async fn reruns_are_byte_identical() {
    let _lock = ENV_MUTEX.lock().expect("env mutex");
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("catalog.csv");
    let output = dir.path().join("enriched.csv");
    write_catalog(
        &input,
        &[
            row("t1", "First", "A", "pop", "2017-05-23", [0.5, 0.6, -7.0, 0.05, 0.2, 0.0, 0.1, 0.7, 120.0]),
            row("t2", "Second", "B", "rock", "2001-01-01", [0.3, 0.8, -5.0, 0.04, 0.1, 0.0, 0.2, 0.4, 140.0]),
            row("t3", "Third", "C", "rap", "2012-06-01", [0.7, 0.5, -6.0, 0.3, 0.1, 0.0, 0.1, 0.6, 95.0]),
            row("t4", "Fourth", "D", "edm", "2020-03-01", [0.9, 0.95, -3.0, 0.06, 0.05, 0.1, 0.3, 0.8, 128.0]),
            row("t5", "Fifth", "E", "folk", "1975-01-01", [0.4, 0.3, -12.0, 0.04, 0.8, 0.2, 0.1, 0.5, 80.0]),
        ],
    );
    configure(&input, &output);

    run_pipeline().await.expect("first run succeeds");
    let first = std::fs::read(&output).expect("first output");

    run_pipeline().await.expect("second run succeeds");
    let second = std::fs::read(&output).expect("second output");

    assert_eq!(first, second);
}

#[tokio::test]
async fn empty_population_fails_without_an_artifact() {
    let _lock = ENV_MUTEX.lock().expect("env mutex");
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("catalog.csv");
    let output = dir.path().join("enriched.csv");
    write_catalog(
        &input,
        &[
            // Missing track_name
            ",,A,pop,2017-05-23,0.5,0.6,-7.0,0.05,0.2,0.0,0.1,0.7,120.0".to_string(),
            row("t2", "Undated", "B", "rock", "unknown", [0.3, 0.8, -5.0, 0.04, 0.1, 0.0, 0.2, 0.4, 140.0]),
        ],
    );
    configure(&input, &output);

    let error = run_pipeline().await.expect_err("empty population should fail");

    assert!(matches!(
        error.downcast_ref::<PipelineError>(),
        Some(PipelineError::EmptyPopulation {
            total_rows: 2,
            missing_required: 1,
            unparseable_date: 1,
        })
    ));
    assert!(!output.exists());
}
