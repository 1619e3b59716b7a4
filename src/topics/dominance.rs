// src/topics/dominance.rs
//! Topic → dominant ground-truth label mapping built from a labeled validation set.
//!
//! Influence of label `l` in topic `t` = (rows of `t` carrying `l`) / (rows carrying `l`
//! overall). Dominant labels of `t` are those with influence >= total / i for the smallest
//! `i = 1, 2, ...` that selects anything.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};

use super::{TopicId, OUTLIER_TOPIC};
use crate::table::{normalize_caption, PostTable, CAPTION_COLUMN};

pub const LABEL_COLUMN: &str = "label";

/// Remove the catch-all `other` tag from a multi-label string while keeping `*_other` labels
/// (e.g. `adv_other`) intact.
pub fn clean_label(raw: &str) -> String {
    raw.replace("#other", "")
        .replace("_other", "TEMP")
        .replace("other#", "")
        .replace("TEMP", "_other")
}

fn split_labels(label: &str) -> Vec<String> {
    label
        .split('#')
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

/// Labeled validation rows plus global per-label occurrence counts.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationSet {
    pub captions: Vec<String>,
    /// Gold labels per row (already `#`-split).
    pub labels: Vec<Vec<String>>,
    pub counts: BTreeMap<String, usize>,
}

impl ValidationSet {
    /// Build from `(caption, raw_label)` pairs: drops `trash_label` rows, rows without caption
    /// or labels, cleans labels and counts them.
    pub fn from_rows<I>(rows: I, trash_label: &str) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut captions = Vec::new();
        let mut labels = Vec::new();
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for (caption, raw) in rows {
            if raw.trim() == trash_label {
                continue;
            }
            let caption = normalize_caption(&caption);
            let gold = split_labels(&clean_label(raw.trim()));
            if caption.is_empty() || gold.is_empty() {
                continue;
            }
            for g in &gold {
                *counts.entry(g.clone()).or_insert(0) += 1;
            }
            captions.push(caption);
            labels.push(gold);
        }
        Self {
            captions,
            labels,
            counts,
        }
    }

    pub fn from_table(table: &PostTable, trash_label: &str) -> Result<Self> {
        let c = table.column(CAPTION_COLUMN)?;
        let l = table.column(LABEL_COLUMN)?;
        let rows = (0..table.len()).map(|row| {
            (
                table.field(row, c).unwrap_or_default().to_string(),
                table.field(row, l).unwrap_or_default().to_string(),
            )
        });
        Ok(Self::from_rows(rows, trash_label))
    }

    pub fn load(path: &Path, trash_label: &str) -> Result<Self> {
        let table = PostTable::read(path)?;
        Self::from_table(&table, trash_label)
            .with_context(|| format!("preparing validation set {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.captions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.captions.is_empty()
    }
}

/// Labels whose influence reaches `total / i`, in first-seen order.
pub fn dominant_candidates(influences: &[(String, f64)], total: f64, i: usize) -> Vec<(String, f64)> {
    let threshold = total / i as f64;
    influences
        .iter()
        .filter(|(_, v)| *v >= threshold)
        .cloned()
        .collect()
}

/// Minimal-divisor dominant selection. Never empty for a non-empty input.
pub fn select_dominant(influences: &[(String, f64)]) -> Vec<(String, f64)> {
    let total: f64 = influences.iter().map(|(_, v)| v).sum();
    for i in 1..=influences.len() {
        let found = dominant_candidates(influences, total, i);
        if !found.is_empty() {
            return found;
        }
    }
    // total / len can round above the maximum when all influences are equal
    argmax(influences)
        .map(|k| vec![influences[k].clone()])
        .unwrap_or_default()
}

/// First position of the largest score.
fn argmax(pairs: &[(String, f64)]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, (_, v)) in pairs.iter().enumerate() {
        match best {
            Some(b) if *v <= pairs[b].1 => {}
            _ => best = Some(i),
        }
    }
    best
}

/// Topic id → dominant `(label, influence)` pairs. Read-only once built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopicInfluenceTable {
    topics: BTreeMap<TopicId, Vec<(String, f64)>>,
}

impl TopicInfluenceTable {
    /// `topics[r]` is the topic of validation row `r`, `labels[r]` its gold labels.
    pub fn build(
        topics: &[TopicId],
        labels: &[Vec<String>],
        counts: &BTreeMap<String, usize>,
    ) -> Result<Self> {
        anyhow::ensure!(
            topics.len() == labels.len(),
            "{} topics for {} validation rows",
            topics.len(),
            labels.len()
        );

        let mut occurrences: BTreeMap<TopicId, Vec<(String, usize)>> = BTreeMap::new();
        for (topic, gold) in topics.iter().zip(labels) {
            let per_topic = occurrences.entry(*topic).or_default();
            for g in gold {
                match per_topic.iter_mut().find(|(l, _)| l == g) {
                    Some((_, n)) => *n += 1,
                    None => per_topic.push((g.clone(), 1)),
                }
            }
        }

        let mut table = BTreeMap::new();
        for (topic, per_topic) in occurrences {
            let mut influences = Vec::with_capacity(per_topic.len());
            for (label, n) in per_topic {
                let global = counts.get(&label).copied().unwrap_or(0);
                anyhow::ensure!(global > 0, "label `{label}` has no global count");
                influences.push((label, n as f64 / global as f64));
            }
            let dominant = select_dominant(&influences);
            if !dominant.is_empty() {
                table.insert(topic, dominant);
            }
        }
        Ok(Self { topics: table })
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn dominant(&self, topic: TopicId) -> Option<&[(String, f64)]> {
        self.topics.get(&topic).map(Vec::as_slice)
    }

    /// Highest-influence dominant label; the first one wins ties.
    pub fn dominant_label(&self, topic: TopicId) -> Option<&str> {
        let pairs = self.topics.get(&topic)?;
        argmax(pairs).map(|i| pairs[i].0.as_str())
    }

    /// 1 if the topic's dominant label is an advertising label, else 0. Outlier and unknown
    /// topics are never filtered.
    pub fn is_advertising(&self, topic: TopicId, advertising_labels: &[String]) -> u8 {
        if topic == OUTLIER_TOPIC {
            return 0;
        }
        match self.dominant_label(topic) {
            Some(label) if advertising_labels.iter().any(|a| a == label) => 1,
            _ => 0,
        }
    }
}
