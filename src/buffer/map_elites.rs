//! MAP-Elites archive of system configurations
//!
//! The archive keeps, for every behavioral niche, the best configuration ever
//! observed there. A niche is the triple of discretized load, response size and
//! error rate. Offline search fills the archive (see
//! [`super::evolution`]); at runtime it is loaded read-only and queried for the
//! configuration that best matches the observed workload.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use super::{BufferDecision, BufferSource, BufferStrategy};
use crate::error::LlmError;
use crate::retry::RetryPolicy;

pub const DEFAULT_RESOLUTION: usize = 5;

/// Concurrent requests per load bin.
const LOAD_BIN_WIDTH: f64 = 5.0;
/// Response bytes per size bin.
const SIZE_BIN_WIDTH: f64 = 1000.0;

/// Buffer, concurrency, retry and network settings evaluated as one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    pub buffer_size: usize,
    pub min_buffer: usize,
    pub max_buffer: usize,
    pub adjustment_factor: f64,
    pub max_concurrent: usize,
    pub batch_size: usize,
    pub max_retries: u32,
    /// Seconds.
    pub retry_delay: f64,
    /// Seconds.
    pub timeout: f64,
    /// Seconds.
    pub keepalive_timeout: f64,
}

impl SystemConfig {
    /// Engine retry policy for this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_retries(self.max_retries)
            .with_initial_delay(Duration::from_secs_f64(self.retry_delay.max(0.0)))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout.max(0.0))
    }
}

/// Observed workload and outcome of one evaluation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Metrics {
    /// Output characters (or bytes) per second.
    pub throughput: f64,
    /// Fraction of failed requests in `[0, 1]`.
    pub error_rate: f64,
    pub concurrent_requests: f64,
    pub avg_response_size: f64,
    /// Any further measurements carried through to the history.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Metrics {
    pub fn new(
        throughput: f64,
        error_rate: f64,
        concurrent_requests: f64,
        avg_response_size: f64,
    ) -> Self {
        Self {
            throughput,
            error_rate,
            concurrent_requests,
            avg_response_size,
            extra: Map::new(),
        }
    }

    /// `throughput × (1 − error_rate)`
    pub fn performance(&self) -> f64 {
        self.throughput * (1.0 - self.error_rate)
    }
}

/// Discretized behavior coordinates `(load, size, error)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Niche {
    pub load: usize,
    pub size: usize,
    pub error: usize,
}

impl Niche {
    pub const fn new(load: usize, size: usize, error: usize) -> Self {
        Self { load, size, error }
    }

    /// Bin each metric and clamp to `resolution - 1`.
    pub fn from_metrics(metrics: &Metrics, resolution: usize) -> Self {
        let top = resolution.saturating_sub(1);
        let bin = |value: f64| -> usize {
            if value.is_finite() && value > 0.0 {
                (value.floor() as usize).min(top)
            } else {
                0
            }
        };
        Self {
            load: bin(metrics.concurrent_requests / LOAD_BIN_WIDTH),
            size: bin(metrics.avg_response_size / SIZE_BIN_WIDTH),
            error: bin(metrics.error_rate * resolution as f64),
        }
    }

    /// Manhattan distance on the (load, size) plane.
    pub fn distance(&self, other: &Niche) -> usize {
        self.load.abs_diff(other.load) + self.size.abs_diff(other.size)
    }
}

/// Rendered as `"(a, b, c)"`, the archive file's key format.
impl fmt::Display for Niche {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.load, self.size, self.error)
    }
}

impl FromStr for Niche {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s
            .trim()
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(|| LlmError::ParseError(format!("invalid niche key '{s}'")))?;
        let bins = inner
            .split(',')
            .map(|part| part.trim().parse::<usize>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| LlmError::ParseError(format!("invalid niche key '{s}': {e}")))?;
        match bins.as_slice() {
            [load, size, error] => Ok(Self::new(*load, *size, *error)),
            _ => Err(LlmError::ParseError(format!(
                "niche key '{s}' must have three coordinates"
            ))),
        }
    }
}

/// History entries store the niche as a `[load, size, error]` list.
impl Serialize for Niche {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        [self.load, self.size, self.error].serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Niche {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let [load, size, error] = <[usize; 3]>::deserialize(deserializer)?;
        Ok(Self::new(load, size, error))
    }
}

/// Stored best configuration for one niche.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Elite {
    pub config: SystemConfig,
    pub performance: f64,
}

/// One evaluation, whether or not it improved its niche.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub behavior: Niche,
    pub performance: f64,
    pub metrics: Metrics,
    pub improved: bool,
}

#[derive(Serialize, Deserialize)]
struct ArchiveFile {
    resolution: usize,
    archive: BTreeMap<String, Elite>,
    #[serde(default)]
    history: Vec<HistoryEntry>,
}

/// Niche → best configuration, plus the evaluation history.
#[derive(Debug, Clone, PartialEq)]
pub struct MapElitesArchive {
    resolution: usize,
    elites: BTreeMap<Niche, Elite>,
    history: Vec<HistoryEntry>,
}

impl Default for MapElitesArchive {
    fn default() -> Self {
        Self::new(DEFAULT_RESOLUTION)
    }
}

impl MapElitesArchive {
    pub fn new(resolution: usize) -> Self {
        Self {
            resolution: resolution.max(1),
            elites: BTreeMap::new(),
            history: Vec::new(),
        }
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    pub fn len(&self) -> usize {
        self.elites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elites.is_empty()
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn elites(&self) -> impl Iterator<Item = (&Niche, &Elite)> {
        self.elites.iter()
    }

    pub fn elite(&self, niche: &Niche) -> Option<&Elite> {
        self.elites.get(niche)
    }

    pub fn niche_for(&self, metrics: &Metrics) -> Niche {
        Niche::from_metrics(metrics, self.resolution)
    }

    /// Record an evaluation. The niche's elite is replaced only when the new
    /// performance is strictly higher. Returns whether it was replaced.
    pub fn add(&mut self, config: SystemConfig, metrics: Metrics) -> bool {
        let behavior = self.niche_for(&metrics);
        let performance = metrics.performance();

        let improved = self
            .elites
            .get(&behavior)
            .is_none_or(|elite| performance > elite.performance);
        if improved {
            self.elites.insert(
                behavior,
                Elite {
                    config,
                    performance,
                },
            );
        }

        tracing::debug!(niche = %behavior, performance, improved, "archive evaluation");
        self.history.push(HistoryEntry {
            behavior,
            performance,
            metrics,
            improved,
        });
        improved
    }

    /// Highest-performing elite across all niches.
    pub fn best(&self) -> Option<&Elite> {
        self.elites
            .values()
            .max_by(|a, b| a.performance.total_cmp(&b.performance))
    }

    /// Configuration for an observed workload.
    ///
    /// Exact niche first; otherwise the nearest niche by Manhattan distance on
    /// (load, size), preferring the better performer on ties; otherwise the
    /// best overall.
    pub fn get_elite(&self, metrics: &Metrics) -> Option<&SystemConfig> {
        let target = self.niche_for(metrics);
        if let Some(elite) = self.elites.get(&target) {
            return Some(&elite.config);
        }

        self.elites
            .iter()
            .min_by(|(na, ea), (nb, eb)| {
                target
                    .distance(na)
                    .cmp(&target.distance(nb))
                    .then_with(|| eb.performance.total_cmp(&ea.performance))
            })
            .map(|(_, elite)| &elite.config)
            .or_else(|| self.best().map(|elite| &elite.config))
    }

    pub fn to_json(&self) -> Result<String, LlmError> {
        let file = ArchiveFile {
            resolution: self.resolution,
            archive: self
                .elites
                .iter()
                .map(|(niche, elite)| (niche.to_string(), elite.clone()))
                .collect(),
            history: self.history.clone(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    pub fn from_json(text: &str) -> Result<Self, LlmError> {
        let file: ArchiveFile = serde_json::from_str(text)?;
        let elites = file
            .archive
            .into_iter()
            .map(|(key, elite)| Ok((key.parse::<Niche>()?, elite)))
            .collect::<Result<BTreeMap<_, _>, LlmError>>()?;
        Ok(Self {
            resolution: file.resolution.max(1),
            elites,
            history: file.history,
        })
    }

    /// Persist to `path`, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), LlmError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        tracing::info!(path = %path.display(), niches = self.len(), "saved archive");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, LlmError> {
        let path = path.as_ref();
        let archive = Self::from_json(&std::fs::read_to_string(path)?)?;
        tracing::info!(path = %path.display(), niches = archive.len(), "loaded archive");
        Ok(archive)
    }
}

/// Archive-backed buffer strategy.
///
/// Tracks a short window of response sizes and the error rate of this client,
/// and looks the workload up in the archive on every observation.
#[derive(Debug, Clone)]
pub struct MapElitesBuffer {
    archive: MapElitesArchive,
    concurrent_requests: usize,
    fallback_size: usize,
    current_size: usize,
    sizes: VecDeque<usize>,
    observations: u64,
    failures: u64,
}

impl MapElitesBuffer {
    const WINDOW: usize = 5;

    /// Fails when the archive holds no elites.
    pub fn new(archive: MapElitesArchive, concurrent_requests: usize) -> Result<Self, LlmError> {
        let best = archive.best().ok_or_else(|| {
            LlmError::ConfigurationError("MAP-Elites archive is empty".to_string())
        })?;
        let size = best.config.buffer_size.max(1);
        Ok(Self {
            archive,
            concurrent_requests,
            fallback_size: size,
            current_size: size,
            sizes: VecDeque::with_capacity(Self::WINDOW),
            observations: 0,
            failures: 0,
        })
    }

    pub fn from_path(path: impl AsRef<Path>, concurrent_requests: usize) -> Result<Self, LlmError> {
        Self::new(MapElitesArchive::load(path)?, concurrent_requests)
    }

    pub fn archive(&self) -> &MapElitesArchive {
        &self.archive
    }

    /// Buffer size recommended for `metrics`.
    pub fn recommend(&self, metrics: &Metrics) -> BufferDecision {
        let size = self
            .archive
            .get_elite(metrics)
            .map(|config| config.buffer_size.max(1))
            .unwrap_or(self.fallback_size);
        BufferDecision::new(size, BufferSource::Archive)
    }

    /// Full configuration for `metrics`.
    pub fn recommend_config(&self, metrics: &Metrics) -> Option<&SystemConfig> {
        self.archive.get_elite(metrics)
    }

    fn observed_metrics(&self) -> Metrics {
        let avg = if self.sizes.is_empty() {
            0.0
        } else {
            self.sizes.iter().sum::<usize>() as f64 / self.sizes.len() as f64
        };
        let error_rate = if self.observations == 0 {
            0.0
        } else {
            self.failures as f64 / self.observations as f64
        };
        Metrics::new(0.0, error_rate, self.concurrent_requests as f64, avg)
    }
}

impl BufferStrategy for MapElitesBuffer {
    fn decision(&self) -> BufferDecision {
        BufferDecision::new(self.current_size, BufferSource::Archive)
    }

    fn observe(&mut self, chunk_size: usize, failed: bool) -> BufferDecision {
        self.observations += 1;
        if failed {
            self.failures += 1;
        } else {
            if self.sizes.len() == Self::WINDOW {
                self.sizes.pop_front();
            }
            self.sizes.push_back(chunk_size);
        }
        let decision = self.recommend(&self.observed_metrics());
        self.current_size = decision.size;
        decision
    }
}
