//! mien-core — face matching and the recognition session.
//!
//! Face detection (UltraFace) and embedding extraction (MobileFaceNet)
//! run via ONNX Runtime behind the [`EmbeddingProvider`] seam; matching
//! and the tick-driven confirmation state machine are pure logic.

use std::path::PathBuf;

pub mod detector;
pub mod embedder;
pub mod matcher;
pub mod provider;
pub mod session;
pub mod types;

pub use matcher::{EuclideanMatcher, MatchOutcome, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use provider::{EmbeddingProvider, OnnxFacePipeline, ProviderError};
pub use session::{Observation, Phase, Session, SessionConfig, Transition};
pub use types::{BoundingBox, DetectedFace, Embedding, Profile};

/// Default directory for the ONNX model files:
/// `$XDG_DATA_HOME/mien/models`, falling back to `~/.local/share/mien/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("mien/models")
}
