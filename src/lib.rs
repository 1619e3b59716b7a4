// src/lib.rs
// Library surface shared by the three binaries and the integration tests.

pub mod config;
pub mod error;
pub mod taxonomy;
pub mod telemetry;

// Tables, shards and result arrays
pub mod aggregate;
pub mod npy;
pub mod shard;
pub mod table;

// Models
pub mod embed;
pub mod similarity;
pub mod topics;
pub mod zero_shot;

// Processes
pub mod cli;
pub mod pipeline;
pub mod pool;
pub mod worker;

// ---- Re-exports for stable public API ----
pub use crate::config::{FiltrationConfig, StorageConfig};
pub use crate::error::PipelineError;
pub use crate::shard::{partition, Shard, Strategy};
pub use crate::similarity::{SimilarityScorer, SimilarityVerdict};
pub use crate::table::{Post, PostTable};
