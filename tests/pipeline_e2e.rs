// tests/pipeline_e2e.rs
//! End-to-end runs against a scratch storage directory: a centroid topic model artifact, a
//! labeled validation table and a small post table.

use std::fs;
use std::path::{Path, PathBuf};

use event_filtration::config::FiltrationConfig;
use event_filtration::embed::HashingEmbedder;
use event_filtration::pipeline::{self, RunOptions};
use event_filtration::topics::{CentroidTopicModel, ValidationSet};
use event_filtration::worker::{run_shard, ShardModels};
use event_filtration::{PipelineError, PostTable, StorageConfig};

const ADS: &str = "discount sale shop now";
const MUSIC: &str = "jazz concert live music";

const POSTS: &str = "id,caption,timestamp,lat,lon\n\
    1,discount sale shop now,1600000000,40.7,-73.9\n\
    2,jazz concert live music tonight,1600000100,40.7,-73.9\n\
    3,,1600000200,40.7,-73.9\n\
    4,buy now discount shop sale,1600000300,40.8,-73.9\n\
    5,live music jazz in the park,1600000400,40.8,-73.9\n\
    6,shop sale discount today,1600000500,40.8,-73.9\n\
    7,concert of live jazz music,1600000600,40.8,-73.9\n";

const VALIDATION: &str = "caption,label\n\
    discount sale shop now,adv_other\n\
    big discount sale,adv_other#other\n\
    jazz concert live music,music\n\
    live music jazz night,music\n\
    nothing to see,trash\n";

/// Write the topic model and validation table under `root` and return a config pointing at
/// them (relative to `root`).
fn storage(root: &Path) -> FiltrationConfig {
    let embedder = HashingEmbedder::new(256).unwrap();
    let artifact = serde_json::json!({
        "outlier_threshold": 0.0,
        "topics": [
            { "id": 0, "centroid": embedder.embed_text(ADS) },
            { "id": 1, "centroid": embedder.embed_text(MUSIC) },
        ]
    });
    fs::create_dir_all(root.join("models")).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();
    fs::write(root.join("models/topics.json"), artifact.to_string()).unwrap();
    fs::write(root.join("data/validation.csv"), VALIDATION).unwrap();

    FiltrationConfig::from_toml_str(
        r#"
        [storage]
        validation_table = "data/validation.csv"
        topic_model = "models/topics.json"

        [embedder]
        kind = "hashing"
        dimensions = 256
        "#,
    )
    .unwrap()
}

fn column(table: &PostTable, name: &str) -> Vec<String> {
    let c = table.column(name).unwrap();
    (0..table.len())
        .map(|r| table.field(r, c).unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn in_process_workers_then_aggregate() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = storage(dir.path());
    let storage = StorageConfig {
        root: dir.path().to_path_buf(),
    };
    let input = dir.path().join("posts.csv");
    fs::write(&input, POSTS).unwrap();
    let out_dir = dir.path().join("out");

    let prepared = pipeline::prepare(&input, &out_dir, 4).unwrap();
    assert_eq!(prepared.dropped, 1);
    assert_eq!(prepared.shards.len(), 3);

    let models = ShardModels::load(&cfg, &storage).await.unwrap();
    for shard in &prepared.shards {
        run_shard(&models, *shard, &prepared.prefix, &out_dir)
            .await
            .unwrap();
    }
    let output = pipeline::finish(&prepared, &input, &out_dir).unwrap();
    assert_eq!(output, out_dir.join("posts_filtered.csv"));

    let result = PostTable::read(&output).unwrap();
    assert_eq!(result.len(), 6);
    assert_eq!(column(&result, "id"), vec!["1", "2", "4", "5", "6", "7"]);
    assert_eq!(
        column(&result, "adv_bertopic"),
        vec!["1", "0", "1", "0", "1", "0"]
    );
    assert!(column(&result, "adv_zero")
        .iter()
        .all(|v| v == "0" || v == "1"));
}

#[test]
fn validation_table_drops_trash_rows() {
    let dir = tempfile::tempdir().unwrap();
    storage(dir.path());
    let v = ValidationSet::load(&dir.path().join("data/validation.csv"), "trash").unwrap();
    assert_eq!(v.len(), 4);
    assert_eq!(v.counts.get("adv_other"), Some(&2));
    assert!(!v.counts.contains_key("other"));
}

#[test]
fn artifact_written_by_the_test_loads() {
    let dir = tempfile::tempdir().unwrap();
    storage(dir.path());
    let m = CentroidTopicModel::load(&dir.path().join("models/topics.json")).unwrap();
    assert_eq!(m.len(), 2);
}

#[tokio::test]
#[serial_test::serial]
async fn worker_processes_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = storage(dir.path());
    let worker = PathBuf::from(env!("CARGO_BIN_EXE_filter_worker"));
    cfg.pipeline.worker_bin = Some(worker.clone());

    let cfg_path = dir.path().join("filtration.toml");
    fs::write(
        &cfg_path,
        format!(
            "[storage]\nvalidation_table = \"data/validation.csv\"\ntopic_model = \"models/topics.json\"\n\
             [embedder]\nkind = \"hashing\"\ndimensions = 256\n\
             [pipeline]\nworker_bin = {:?}\n",
            worker.display().to_string()
        ),
    )
    .unwrap();

    let input = dir.path().join("posts.csv");
    fs::write(&input, POSTS).unwrap();
    let opts = RunOptions {
        input,
        out_dir: dir.path().join("out"),
        proc_num: 2,
        config_path: Some(cfg_path),
    };
    let storage = StorageConfig {
        root: dir.path().to_path_buf(),
    };

    let summary = pipeline::run(&opts, &cfg, &storage).await.unwrap();
    assert_eq!(summary.rows, 6);
    assert_eq!(summary.dropped, 1);
    assert_eq!(summary.shards, 2);

    let result = PostTable::read(&summary.output).unwrap();
    assert_eq!(
        column(&result, "adv_bertopic"),
        vec!["1", "0", "1", "0", "1", "0"]
    );
    // intermediates removed by default
    assert!(!opts.out_dir.join("tempdf_0_3.csv").exists());
    assert!(!opts.out_dir.join("zero_0_3.npy").exists());
}

#[cfg(unix)]
#[tokio::test]
#[serial_test::serial]
async fn failing_worker_aborts_before_aggregation() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = storage(dir.path());
    let script = dir.path().join("bad_worker.sh");
    fs::write(&script, "#!/bin/sh\nexit 3\n").unwrap();
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    }
    cfg.pipeline.worker_bin = Some(script);

    let input = dir.path().join("posts.csv");
    fs::write(&input, POSTS).unwrap();
    let opts = RunOptions {
        input,
        out_dir: dir.path().join("out"),
        proc_num: 3,
        config_path: None,
    };
    let storage = StorageConfig {
        root: dir.path().to_path_buf(),
    };

    let err = pipeline::run(&opts, &cfg, &storage).await.unwrap_err();
    match err.downcast_ref::<PipelineError>() {
        Some(PipelineError::WorkersFailed(failures)) => {
            assert_eq!(failures.len(), 3);
            assert!(failures.iter().all(|f| f.status == "exit code 3"));
        }
        other => panic!("unexpected: {other:?}"),
    }
    assert!(!opts.out_dir.join("posts_filtered.csv").exists());
}
