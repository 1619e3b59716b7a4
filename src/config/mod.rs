// src/config/mod.rs
//! Run configuration, loaded once per process and passed down explicitly.
//!
//! Resolution order:
//! 1) `--config <path>` on the command line
//! 2) `$FILTRATION_CONFIG_PATH`
//! 3) `config/filtration.toml` if present
//! 4) built-in defaults

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::embed::{EmbedderConfig, EmbedderKind};
use crate::similarity::{SimilarityConfig, ToleranceTable};
use crate::topics::TopicConfig;
use crate::zero_shot::ZeroShotConfig;

pub const ENV_FILTRATION_CONFIG_PATH: &str = "FILTRATION_CONFIG_PATH";
pub const DEFAULT_FILTRATION_CONFIG_PATH: &str = "config/filtration.toml";
pub const ENV_STORAGE: &str = "STORAGE";
pub const ENV_WORKER_BIN: &str = "FILTRATION_WORKER_BIN";

/// Root directory for model artifacts and the validation table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub root: PathBuf,
}

impl StorageConfig {
    /// `$STORAGE`, or the current directory when unset.
    pub fn from_env() -> Self {
        let root = std::env::var(ENV_STORAGE)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Self { root }
    }

    /// Relative paths are joined onto the root; absolute ones are kept.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// Storage-relative artifact locations.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoragePaths {
    pub validation_table: PathBuf,
    pub topic_model: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self {
            validation_table: PathBuf::from("data/validation_labeled.csv"),
            topic_model: PathBuf::from("models/topic_model.json"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Worker executable; falls back to `$FILTRATION_WORKER_BIN`, then `filter_worker` next
    /// to the running binary.
    pub worker_bin: Option<PathBuf>,
    /// Leave `tempdf_*.csv` and `*.npy` files in the output directory after a run.
    pub keep_intermediate: bool,
}

impl PipelineConfig {
    pub fn resolve_worker_bin(&self) -> Result<PathBuf> {
        if let Some(p) = &self.worker_bin {
            return Ok(p.clone());
        }
        if let Ok(p) = std::env::var(ENV_WORKER_BIN) {
            if !p.trim().is_empty() {
                return Ok(PathBuf::from(p));
            }
        }
        let exe = std::env::current_exe().context("locating current executable")?;
        crate::pool::sibling_binary(&exe, "filter_worker")
            .ok_or_else(|| anyhow!("current executable has no parent directory"))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FiltrationConfig {
    pub storage: StoragePaths,
    pub zero_shot: ZeroShotConfig,
    pub topics: TopicConfig,
    pub embedder: EmbedderConfig,
    pub similarity: SimilarityConfig,
    pub pipeline: PipelineConfig,
}

impl FiltrationConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: FiltrationConfig = toml::from_str(s).context("parsing filtration config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading filtration config {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("loading filtration config {}", path.display()))
    }

    /// Resolve and load; see the module docs for the order.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(p) = explicit {
            return Self::load_from(p);
        }
        if let Ok(p) = std::env::var(ENV_FILTRATION_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!(
                    "{ENV_FILTRATION_CONFIG_PATH} points to non-existent path {}",
                    pb.display()
                ));
            }
            return Self::load_from(&pb);
        }
        let default = PathBuf::from(DEFAULT_FILTRATION_CONFIG_PATH);
        if default.exists() {
            return Self::load_from(&default);
        }
        Ok(Self::default())
    }

    /// Reject settings that would only fail later inside a worker.
    pub fn validate(&self) -> Result<()> {
        self.zero_shot
            .label_set()
            .context("invalid [zero_shot] labels")?;
        anyhow::ensure!(
            (0.0..1.0).contains(&self.zero_shot.threshold),
            "[zero_shot] threshold must be in [0, 1)"
        );
        ToleranceTable::from_config(&self.similarity).context("invalid [similarity] section")?;
        anyhow::ensure!(
            self.embedder.batch_size > 0,
            "[embedder] batch_size must be >= 1"
        );
        match self.embedder.kind {
            EmbedderKind::Hashing => anyhow::ensure!(
                self.embedder.dimensions > 0,
                "[embedder] dimensions must be >= 1"
            ),
            EmbedderKind::Onnx => anyhow::ensure!(
                self.embedder.max_tokens > 0,
                "[embedder] max_tokens must be >= 1"
            ),
            EmbedderKind::Http => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn empty_toml_gives_defaults() {
        let cfg = FiltrationConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.zero_shot.labels.len(), 17);
        assert_eq!(cfg.similarity.weights.semantic, 1.5);
        assert_eq!(cfg.embedder.kind, EmbedderKind::Onnx);
        assert_eq!(cfg.embedder.max_tokens, 128);
        assert!(!cfg.pipeline.keep_intermediate);
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = FiltrationConfig::from_toml_str(
            r#"
            [zero_shot]
            threshold = 0.2
            low_confidence = "keep"

            [similarity.weights]
            hashtag = 2.0

            [pipeline]
            worker_bin = "/opt/bin/filter_worker"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.zero_shot.threshold, 0.2);
        assert_eq!(
            cfg.zero_shot.low_confidence,
            crate::zero_shot::LowConfidencePolicy::Keep
        );
        assert_eq!(cfg.similarity.weights.hashtag, 2.0);
        assert_eq!(cfg.similarity.weights.time, 1.1);
        assert_eq!(
            cfg.pipeline.resolve_worker_bin().unwrap(),
            PathBuf::from("/opt/bin/filter_worker")
        );
    }

    #[test]
    fn invalid_sections_are_rejected() {
        assert!(FiltrationConfig::from_toml_str("[zero_shot]\nnoise_indices = [99]").is_err());
        assert!(FiltrationConfig::from_toml_str("[zero_shot]\nthreshold = 1.5").is_err());
        assert!(FiltrationConfig::from_toml_str("[embedder]\nbatch_size = 0").is_err());
        assert!(FiltrationConfig::from_toml_str("[embedder]\nmax_tokens = 0").is_err());
        assert!(
            FiltrationConfig::from_toml_str("[similarity]\nlabels = [\"brunch\"]").is_err()
        );
    }

    #[test]
    fn shipped_config_uses_the_sentence_model() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_FILTRATION_CONFIG_PATH);
        let cfg = FiltrationConfig::load_from(&path).unwrap();
        assert_eq!(cfg.embedder.kind, EmbedderKind::Onnx);
        assert_eq!(
            cfg.embedder.model_dir,
            PathBuf::from(crate::embed::DEFAULT_MODEL_DIR)
        );
        assert_eq!(cfg.zero_shot.labels.len(), 17);
    }

    #[test]
    fn storage_resolution() {
        let s = StorageConfig {
            root: PathBuf::from("/data"),
        };
        assert_eq!(
            s.resolve(Path::new("models/t.json")),
            PathBuf::from("/data/models/t.json")
        );
        assert_eq!(s.resolve(Path::new("/abs/t.json")), PathBuf::from("/abs/t.json"));
    }

    #[serial_test::serial]
    #[test]
    fn load_uses_env_then_default_file() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_FILTRATION_CONFIG_PATH);

        // nothing on disk: defaults
        let cfg = FiltrationConfig::load(None).unwrap();
        assert_eq!(cfg.zero_shot.threshold, 0.0);

        fs::create_dir_all("config").unwrap();
        fs::write(DEFAULT_FILTRATION_CONFIG_PATH, "[zero_shot]\nthreshold = 0.1\n").unwrap();
        assert_eq!(FiltrationConfig::load(None).unwrap().zero_shot.threshold, 0.1);

        let custom = tmp.path().join("custom.toml");
        fs::write(&custom, "[zero_shot]\nthreshold = 0.3\n").unwrap();
        env::set_var(ENV_FILTRATION_CONFIG_PATH, &custom);
        assert_eq!(FiltrationConfig::load(None).unwrap().zero_shot.threshold, 0.3);

        env::set_var(ENV_FILTRATION_CONFIG_PATH, tmp.path().join("missing.toml"));
        assert!(FiltrationConfig::load(None).is_err());

        // explicit path beats env
        let explicit = tmp.path().join("explicit.toml");
        fs::write(&explicit, "[zero_shot]\nthreshold = 0.4\n").unwrap();
        assert_eq!(
            FiltrationConfig::load(Some(&explicit)).unwrap().zero_shot.threshold,
            0.4
        );

        env::remove_var(ENV_FILTRATION_CONFIG_PATH);
        env::set_current_dir(old).unwrap();
    }

    #[serial_test::serial]
    #[test]
    fn storage_from_env() {
        env::set_var(ENV_STORAGE, "/srv/storage");
        assert_eq!(StorageConfig::from_env().root, PathBuf::from("/srv/storage"));
        env::remove_var(ENV_STORAGE);
        assert_eq!(StorageConfig::from_env().root, PathBuf::from("."));
    }
}
