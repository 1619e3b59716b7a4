// tests/similarity.rs
use std::process::Command;
use std::sync::Arc;

use event_filtration::embed::HashingEmbedder;
use event_filtration::similarity::{SimilarityConfig, SimilarityScorer, TopicPost};
use event_filtration::taxonomy::PUBLIC_EVENT;
use event_filtration::table::CAPTION_COLUMN;
use event_filtration::{Post, PostTable};

const TABLE: &str = "caption,timestamp,lat,lon\n\
    Great #jazz night #live music concert,1600000000,40.7128,-74.0060\n\
    #jazz festival tonight #live,1600086400,40.7130,-74.0062\n\
    Quiet stroll walking by the river,1600500000,40.7800,-73.9600\n";

async fn scorer() -> SimilarityScorer {
    let embedder = Arc::new(HashingEmbedder::new(256).unwrap());
    SimilarityScorer::new(embedder, &SimilarityConfig::default())
        .await
        .unwrap()
}

fn table() -> PostTable {
    PostTable::from_reader(TABLE.as_bytes()).unwrap()
}

#[tokio::test]
async fn identical_posts_hit_the_ceiling() {
    let s = scorer().await;
    let p = table().post(0).unwrap();
    let a = s.annotate(p.clone()).await.unwrap();
    let b = TopicPost {
        post: p,
        topic: a.topic.clone(),
    };
    let v = s.score(&a, &b).await.unwrap();
    assert_eq!(v.time, Some(1.0));
    assert_eq!(v.space, Some(1.0));
    assert!((v.semantic.unwrap() - 1.0).abs() < 1e-6);
    let ceiling = (1.1 + 1.1 + 1.5 + 2f64.tanh()) / 4.0;
    assert!((v.score - ceiling).abs() < 1e-6, "{}", v.score);
}

#[tokio::test]
async fn shared_hashtags_and_proximity_rank_above_unrelated_post() {
    let s = scorer().await;
    let t = table();
    let posts: Vec<TopicPost> = {
        let mut out = Vec::new();
        for i in 0..t.len() {
            out.push(s.annotate(t.post(i).unwrap()).await.unwrap());
        }
        out
    };
    let close = s.score(&posts[0], &posts[1]).await.unwrap();
    let far = s.score(&posts[0], &posts[2]).await.unwrap();
    assert!((close.hashtag - 2f64.tanh()).abs() < 1e-12);
    assert_eq!(close.shared_hashtags, vec!["jazz", "live"]);
    assert_eq!(far.hashtag, 0.0);
    assert!(close.score > far.score);
}

#[tokio::test]
async fn captions_without_words_fall_back_to_public_event() {
    let s = scorer().await;
    assert_eq!(s.infer_topic("!!! ???").await.unwrap(), PUBLIC_EVENT);
}

#[tokio::test]
async fn scorer_rejects_incomplete_tolerances() {
    let mut cfg = SimilarityConfig::default();
    cfg.tolerances.remove("public event");
    let embedder = Arc::new(HashingEmbedder::new(32).unwrap());
    assert!(SimilarityScorer::new(embedder, &cfg).await.is_err());
}

#[test]
fn malformed_rows_are_reported() {
    let t = PostTable::from_reader("caption,timestamp,lat,lon\nx,abc,0,0\n".as_bytes()).unwrap();
    assert!(t.post(0).is_err());
    assert!(t.post(5).is_err());
    let ok: Post = table().post(2).unwrap();
    assert_eq!(ok.index, 2);
}

#[test]
fn cli_argument_errors_exit_1() {
    let bin = env!("CARGO_BIN_EXE_similarity");
    let status = Command::new(bin).status().unwrap();
    assert_eq!(status.code(), Some(1));
    let status = Command::new(bin)
        .args(["t.csv", "zero", "1"])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));
    let status = Command::new(bin).arg("--help").output().unwrap().status;
    assert_eq!(status.code(), Some(0));
}

const HASHING_CONFIG: &str = "[embedder]\nkind = \"hashing\"\ndimensions = 256\n";

/// Run the similarity binary on `table` with the hashing backend.
fn run_similarity(table: &str, i: &str, j: &str) -> std::process::Output {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("posts.csv");
    let config = dir.path().join("filtration.toml");
    std::fs::write(&path, table).unwrap();
    std::fs::write(&config, HASHING_CONFIG).unwrap();
    Command::new(env!("CARGO_BIN_EXE_similarity"))
        .arg(&path)
        .args([i, j])
        .arg("--config")
        .arg(&config)
        .current_dir(dir.path())
        .output()
        .unwrap()
}

#[test]
fn cli_prints_signals_for_two_rows() {
    let out = run_similarity(TABLE, "0", "1");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("hashtags: 0.9640"), "{stdout}");
    assert!(stdout.contains("score:"));
}

#[test]
fn cli_indices_skip_rows_without_caption() {
    let table = "caption,timestamp,lat,lon\n\
        ,1599990000,0,0\n\
        Great #jazz night #live music concert,1600000000,40.7128,-74.0060\n\
        nan,1599990000,0,0\n\
        #jazz festival tonight #live,1600086400,40.7130,-74.0062\n";
    let out = run_similarity(table, "0", "1");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("post 0:"), "{stdout}");
    assert!(stdout.contains("hashtags: 0.9640"), "{stdout}");

    // only two captioned rows
    let out = run_similarity(table, "0", "2");
    assert_eq!(out.status.code(), Some(1));
}

#[test]
fn captioned_rows_are_renumbered() {
    let mut t = PostTable::from_reader(
        "caption,timestamp,lat,lon\n,0,0,0\nfirst real post,1,0,0\n".as_bytes(),
    )
    .unwrap();
    assert!(t.post(0).is_err());
    assert_eq!(t.drop_missing(CAPTION_COLUMN).unwrap(), 1);
    let p = t.post(0).unwrap();
    assert_eq!(p.caption, "first real post");
    assert_eq!(p.index, 0);
}

#[test]
fn orchestrator_and_worker_argument_errors_exit_1() {
    let status = Command::new(env!("CARGO_BIN_EXE_event-filtration"))
        .args(["in.csv", "out"])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));
    let status = Command::new(env!("CARGO_BIN_EXE_filter_worker"))
        .args(["0", "x", "p", "o"])
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));
}
