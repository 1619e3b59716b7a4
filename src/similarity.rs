// src/similarity.rs
//! Pairwise event similarity from four signals: time, space, caption semantics and shared
//! hashtags.
//!
//! Time and space are judged against tolerances chosen by the posts' topics:
//! - same topic: that topic's tolerance
//! - both private: the `private event` tolerance
//! - both public: the `public event` tolerance
//! - one of each: the signal is undefined and left out
//!
//! The score is the mean of the weighted defined signals. It ranks candidate pairs; it is
//! not a probability.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use anyhow::Result;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::embed::{cosine_similarity, DynEmbedder};
use crate::table::Post;
use crate::taxonomy::{
    CandidateLabelSet, DEFAULT_TOLERANCES, EVENT_LABELS, PRIVATE_EVENT, PRIVATE_EVENT_LABELS,
    PUBLIC_EVENT,
};
use crate::zero_shot::CandidateLabelClassifier;

pub const EARTH_RADIUS_M: f64 = 6_371_000.0;
const SECONDS_PER_DAY: f64 = 60.0 * 60.0 * 24.0;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Tolerance {
    /// Allowed time difference in days.
    pub days: f64,
    /// Allowed distance in meters.
    pub meters: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct SignalWeights {
    pub time: f64,
    pub space: f64,
    pub semantic: f64,
    pub hashtag: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            time: 1.1,
            space: 1.1,
            semantic: 1.5,
            hashtag: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    /// Event taxonomy used to infer each post's topic.
    pub labels: Vec<String>,
    pub private_labels: Vec<String>,
    pub weights: SignalWeights,
    pub tolerances: BTreeMap<String, Tolerance>,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            labels: EVENT_LABELS.iter().map(|s| s.to_string()).collect(),
            private_labels: PRIVATE_EVENT_LABELS.iter().map(|s| s.to_string()).collect(),
            weights: SignalWeights::default(),
            tolerances: DEFAULT_TOLERANCES
                .iter()
                .map(|(l, days, meters)| {
                    (
                        l.to_string(),
                        Tolerance {
                            days: *days,
                            meters: *meters,
                        },
                    )
                })
                .collect(),
        }
    }
}

/// Topic-dependent tolerances plus the private/public split.
#[derive(Debug, Clone)]
pub struct ToleranceTable {
    by_topic: HashMap<String, Tolerance>,
    private: HashSet<String>,
}

impl ToleranceTable {
    /// Every taxonomy label, `public event` and `private event` must have a tolerance.
    pub fn from_config(cfg: &SimilarityConfig) -> Result<Self> {
        let by_topic: HashMap<String, Tolerance> = cfg
            .tolerances
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        for label in cfg
            .labels
            .iter()
            .map(String::as_str)
            .chain([PUBLIC_EVENT, PRIVATE_EVENT])
        {
            anyhow::ensure!(by_topic.contains_key(label), "no tolerance for topic `{label}`");
        }
        for (label, t) in &by_topic {
            anyhow::ensure!(
                t.days > 0.0 && t.meters > 0.0,
                "tolerance for `{label}` must be positive"
            );
        }
        Ok(Self {
            by_topic,
            private: cfg.private_labels.iter().cloned().collect(),
        })
    }

    pub fn is_private(&self, topic: &str) -> bool {
        self.private.contains(topic)
    }

    /// Tolerance for a topic pair; `None` when one is private and the other public.
    pub fn for_pair(&self, topic1: &str, topic2: &str) -> Result<Option<Tolerance>> {
        for t in [topic1, topic2] {
            anyhow::ensure!(self.by_topic.contains_key(t), "unknown topic `{t}`");
        }
        let key = if topic1 == topic2 {
            topic1
        } else {
            match (self.is_private(topic1), self.is_private(topic2)) {
                (true, true) => PRIVATE_EVENT,
                (false, false) => PUBLIC_EVENT,
                _ => return Ok(None),
            }
        };
        Ok(self.by_topic.get(key).copied())
    }
}

/// 1 within tolerance, 0.5 within twice the tolerance, else 0.
pub fn banded(diff: f64, allowed: f64) -> f64 {
    if allowed > diff {
        1.0
    } else if allowed * 2.0 > diff {
        0.5
    } else {
        0.0
    }
}

/// Absolute difference of two epoch timestamps, in days.
pub fn days_between(t1: f64, t2: f64) -> f64 {
    ((t1 - t2) / SECONDS_PER_DAY).abs()
}

/// Great-circle distance in meters.
pub fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
}

/// Distinct `#tag` words of a caption (case-sensitive, without `#`).
pub fn hashtags(text: &str) -> HashSet<String> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| Regex::new(r"#(\w+)").expect("hashtag regex"));
    re.captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// `tanh(|shared hashtags|)`: saturates toward 1 so tag-heavy captions cannot dominate.
pub fn hashtag_signal(text1: &str, text2: &str) -> f64 {
    let a = hashtags(text1);
    let b = hashtags(text2);
    (a.intersection(&b).count() as f64).tanh()
}

/// Mean of weighted defined signals, `None` only if nothing is defined.
pub fn combine(signals: [Option<f64>; 4], weights: &SignalWeights) -> Option<f64> {
    let w = [weights.time, weights.space, weights.semantic, weights.hashtag];
    let weighted: Vec<f64> = signals
        .iter()
        .zip(w)
        .filter_map(|(s, w)| s.map(|v| v * w))
        .collect();
    if weighted.is_empty() {
        return None;
    }
    Some(weighted.iter().sum::<f64>() / weighted.len() as f64)
}

/// A post plus the event topic it was classified as.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicPost {
    pub post: Post,
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityVerdict {
    pub days_apart: f64,
    pub meters_apart: f64,
    pub time: Option<f64>,
    pub space: Option<f64>,
    pub semantic: Option<f64>,
    pub hashtag: f64,
    pub shared_hashtags: Vec<String>,
    pub score: f64,
}

impl fmt::Display for SimilarityVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn opt(v: Option<f64>) -> String {
            v.map(|x| format!("{x:.4}"))
                .unwrap_or_else(|| "undefined".to_string())
        }
        writeln!(f, "time:     {} ({:.3} days apart)", opt(self.time), self.days_apart)?;
        writeln!(f, "space:    {} ({:.1} m apart)", opt(self.space), self.meters_apart)?;
        writeln!(f, "semantic: {}", opt(self.semantic))?;
        writeln!(
            f,
            "hashtags: {:.4} (shared: {:?})",
            self.hashtag, self.shared_hashtags
        )?;
        write!(f, "score:    {:.4}", self.score)
    }
}

/// Score two already-embedded posts.
pub fn score_pair(
    a: &TopicPost,
    b: &TopicPost,
    emb_a: &[f32],
    emb_b: &[f32],
    tolerances: &ToleranceTable,
    weights: &SignalWeights,
) -> Result<SimilarityVerdict> {
    let tol = tolerances.for_pair(&a.topic, &b.topic)?;

    let days_apart = days_between(a.post.timestamp, b.post.timestamp);
    let meters_apart = haversine_meters(a.post.lat, a.post.lon, b.post.lat, b.post.lon);

    let time = tol.map(|t| banded(days_apart, t.days));
    let space = tol.map(|t| banded(meters_apart, t.meters));
    let semantic = cosine_similarity(emb_a, emb_b);

    let mut shared: Vec<String> = hashtags(&a.post.caption)
        .intersection(&hashtags(&b.post.caption))
        .cloned()
        .collect();
    shared.sort();
    let hashtag = (shared.len() as f64).tanh();

    let score = combine([time, space, semantic, Some(hashtag)], weights)
        .ok_or_else(|| anyhow::anyhow!("no similarity signal defined"))?;

    debug!(
        i = a.post.index,
        j = b.post.index,
        topic_i = %a.topic,
        topic_j = %b.topic,
        ?time,
        ?space,
        ?semantic,
        hashtag,
        score,
        "similarity"
    );

    Ok(SimilarityVerdict {
        days_apart,
        meters_apart,
        time,
        space,
        semantic,
        hashtag,
        shared_hashtags: shared,
        score,
    })
}

pub struct SimilarityScorer {
    embedder: DynEmbedder,
    topics: CandidateLabelClassifier,
    tolerances: ToleranceTable,
    weights: SignalWeights,
}

impl SimilarityScorer {
    pub async fn new(embedder: DynEmbedder, cfg: &SimilarityConfig) -> Result<Self> {
        let tolerances = ToleranceTable::from_config(cfg)?;
        let labels = CandidateLabelSet::new(cfg.labels.iter().cloned())?;
        let topics = CandidateLabelClassifier::new(embedder.clone(), labels).await?;
        Ok(Self {
            embedder,
            topics,
            tolerances,
            weights: cfg.weights,
        })
    }

    /// Top event label for a caption; `public event` when the ranking is degenerate.
    pub async fn infer_topic(&self, caption: &str) -> Result<String> {
        match self.topics.classify(caption).await {
            Ok(r) => Ok(r.top_label().to_string()),
            Err(crate::zero_shot::ClassifyError::Embedding(e)) => Err(e),
            Err(e) => {
                warn!(error = %e, "topic inference degenerate; treating as public event");
                Ok(PUBLIC_EVENT.to_string())
            }
        }
    }

    pub async fn annotate(&self, post: Post) -> Result<TopicPost> {
        let topic = self.infer_topic(&post.caption).await?;
        Ok(TopicPost { post, topic })
    }

    pub async fn score(&self, a: &TopicPost, b: &TopicPost) -> Result<SimilarityVerdict> {
        let embs = self
            .embedder
            .embed(&[a.post.caption.clone(), b.post.caption.clone()])
            .await?;
        anyhow::ensure!(embs.len() == 2, "expected two caption embeddings");
        score_pair(a, b, &embs[0], &embs[1], &self.tolerances, &self.weights)
    }
}
