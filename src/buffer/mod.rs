//! Adaptive buffer strategy
//!
//! Chooses the transport read-buffer size handed to the dispatch engine. Three
//! strategies share one trait: a fixed size, the reactive [`DynamicBuffer`],
//! and the archive-backed [`MapElitesBuffer`]. Which one a client uses is
//! decided once at construction from [`BufferConfig`]; the archive path is
//! always injected, never discovered.

pub mod dynamic;
pub mod evolution;
pub mod map_elites;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;

pub use dynamic::DynamicBuffer;
pub use evolution::{ConfigEvaluator, evolve, initial_population};
pub use map_elites::{MapElitesArchive, MapElitesBuffer, Metrics, Niche, SystemConfig};

/// Where a buffer size came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferSource {
    Fixed,
    Reactive,
    Archive,
}

/// A recommended buffer size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferDecision {
    pub size: usize,
    pub source: BufferSource,
}

impl BufferDecision {
    pub const fn new(size: usize, source: BufferSource) -> Self {
        Self { size, source }
    }
}

/// Supplies buffer sizes and learns from observed responses.
pub trait BufferStrategy: Send + Sync + std::fmt::Debug {
    /// Current recommendation.
    fn decision(&self) -> BufferDecision;

    /// Record one response (its size in bytes, or a failure) and return the
    /// updated recommendation.
    fn observe(&mut self, chunk_size: usize, failed: bool) -> BufferDecision;
}

/// Constant size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBuffer(pub usize);

impl BufferStrategy for FixedBuffer {
    fn decision(&self) -> BufferDecision {
        BufferDecision::new(self.0, BufferSource::Fixed)
    }

    fn observe(&mut self, _chunk_size: usize, _failed: bool) -> BufferDecision {
        self.decision()
    }
}

/// Buffer strategy selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum BufferConfig {
    Fixed {
        size: usize,
    },
    Reactive {
        initial: usize,
        min: usize,
        max: usize,
    },
    /// Archive at `path`; failing to load it is an error.
    Archive {
        path: PathBuf,
    },
    /// Archive at `path` when given and loadable, reactive defaults otherwise.
    Auto {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
    },
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self::Auto { path: None }
    }
}

impl BufferConfig {
    /// Instantiate the strategy. `concurrent_requests` seeds the archive
    /// lookup's load coordinate.
    pub fn build(&self, concurrent_requests: usize) -> Result<Box<dyn BufferStrategy>, LlmError> {
        match self {
            Self::Fixed { size } => Ok(Box::new(FixedBuffer((*size).max(1)))),
            Self::Reactive { initial, min, max } => {
                Ok(Box::new(DynamicBuffer::new(*initial, *min, *max)))
            }
            Self::Archive { path } => Ok(Box::new(MapElitesBuffer::from_path(
                path,
                concurrent_requests,
            )?)),
            Self::Auto { path: Some(path) } => {
                match MapElitesBuffer::from_path(path, concurrent_requests) {
                    Ok(buffer) => Ok(Box::new(buffer)),
                    Err(error) => {
                        tracing::warn!(
                            path = %path.display(),
                            %error,
                            "archive unavailable, using reactive buffer"
                        );
                        Ok(Box::new(DynamicBuffer::default()))
                    }
                }
            }
            Self::Auto { path: None } => Ok(Box::new(DynamicBuffer::default())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_without_archive_is_reactive() {
        let strategy = BufferConfig::default().build(10).unwrap();
        assert_eq!(strategy.decision().source, BufferSource::Reactive);
        assert_eq!(strategy.decision().size, dynamic::DEFAULT_INITIAL_SIZE);
    }

    #[test]
    fn auto_with_missing_archive_falls_back() {
        let config = BufferConfig::Auto {
            path: Some(PathBuf::from("/nonexistent/archive.json")),
        };
        assert_eq!(
            config.build(10).unwrap().decision().source,
            BufferSource::Reactive
        );
    }

    #[test]
    fn explicit_archive_must_load() {
        let config = BufferConfig::Archive {
            path: PathBuf::from("/nonexistent/archive.json"),
        };
        assert!(matches!(config.build(10), Err(LlmError::IoError(_))));
    }

    #[test]
    fn fixed_never_changes() {
        let mut strategy = BufferConfig::Fixed { size: 4096 }.build(1).unwrap();
        let decision = strategy.observe(1_000_000, false);
        assert_eq!(decision, BufferDecision::new(4096, BufferSource::Fixed));
    }

    #[test]
    fn config_serde_shape() {
        let config: BufferConfig =
            serde_json::from_str(r#"{"strategy":"reactive","initial":4096,"min":1024,"max":8192}"#)
                .unwrap();
        assert_eq!(
            config,
            BufferConfig::Reactive {
                initial: 4096,
                min: 1024,
                max: 8192
            }
        );
    }
}
