//! Offline evolutionary search that populates a [`MapElitesArchive`].
//!
//! Each generation evaluates the population concurrently, offers every result
//! to the archive, then breeds the next population from the top elites by
//! multiplicative mutation.

use async_trait::async_trait;
use futures::future::join_all;
use rand::Rng;
use rand::seq::SliceRandom;

use super::map_elites::{MapElitesArchive, Metrics, SystemConfig};
use crate::error::LlmError;

/// Benchmarks one configuration.
#[async_trait]
pub trait ConfigEvaluator: Send + Sync {
    async fn evaluate(&self, config: &SystemConfig) -> Result<Metrics, LlmError>;
}

/// Parents kept per generation.
pub const PARENTS: usize = 3;
pub const FINE_MUTATION: f64 = 0.1;
pub const COARSE_MUTATION: f64 = 0.3;
pub const FILL_MUTATION: f64 = 0.2;

impl SystemConfig {
    /// Copy with every field scaled by an independent factor drawn from
    /// `[1 - rate, 1 + rate]`. Counts stay at least 1, the retry delay at
    /// least 0.1 s and timeouts at least 1 s.
    pub fn mutate(&self, rate: f64) -> Self {
        self.mutate_with(&mut rand::thread_rng(), rate)
    }

    pub fn mutate_with<R: Rng + ?Sized>(&self, rng: &mut R, rate: f64) -> Self {
        let rate = if rate.is_finite() { rate.clamp(0.0, 0.99) } else { 0.0 };
        let mut jitter = || rng.gen_range((1.0 - rate)..=(1.0 + rate));
        let scale = |value: usize, factor: f64| ((value as f64 * factor) as usize).max(1);

        Self {
            buffer_size: scale(self.buffer_size, jitter()),
            min_buffer: scale(self.min_buffer, jitter()),
            max_buffer: scale(self.max_buffer, jitter()),
            adjustment_factor: self.adjustment_factor * jitter(),
            max_concurrent: scale(self.max_concurrent, jitter()),
            batch_size: scale(self.batch_size, jitter()),
            max_retries: ((self.max_retries as f64 * jitter()) as u32).max(1),
            retry_delay: (self.retry_delay * jitter()).max(0.1),
            timeout: (self.timeout * jitter()).max(1.0),
            keepalive_timeout: (self.keepalive_timeout * jitter()).max(1.0),
        }
    }
}

#[allow(clippy::too_many_arguments)]
const fn seed(
    buffer_size: usize,
    min_buffer: usize,
    max_buffer: usize,
    adjustment_factor: f64,
    max_concurrent: usize,
    batch_size: usize,
    max_retries: u32,
    retry_delay: f64,
    timeout: f64,
    keepalive_timeout: f64,
) -> SystemConfig {
    SystemConfig {
        buffer_size,
        min_buffer,
        max_buffer,
        adjustment_factor,
        max_concurrent,
        batch_size,
        max_retries,
        retry_delay,
        timeout,
        keepalive_timeout,
    }
}

/// Five diverse starting points: small buffer with high concurrency, medium,
/// large buffer with low concurrency, aggressive small-chunk adjustment, and
/// a balanced middle.
pub fn initial_population() -> Vec<SystemConfig> {
    vec![
        seed(2048, 1024, 8192, 1.5, 5, 3, 2, 0.5, 30.0, 60.0),
        seed(16384, 4096, 32768, 1.3, 3, 2, 3, 1.0, 45.0, 90.0),
        seed(65536, 32768, 131072, 1.2, 1, 1, 4, 1.5, 60.0, 120.0),
        seed(4096, 1024, 16384, 2.0, 4, 2, 2, 0.5, 30.0, 60.0),
        seed(32768, 8192, 65536, 1.5, 2, 2, 3, 1.0, 45.0, 90.0),
    ]
}

/// Next population bred from the archive's best elites.
pub fn next_generation<R: Rng + ?Sized>(
    archive: &MapElitesArchive,
    population_size: usize,
    rng: &mut R,
) -> Vec<SystemConfig> {
    let mut ranked: Vec<_> = archive.elites().map(|(_, elite)| elite).collect();
    ranked.sort_by(|a, b| b.performance.total_cmp(&a.performance));
    let parents: Vec<&SystemConfig> = ranked.iter().take(PARENTS).map(|e| &e.config).collect();
    if parents.is_empty() {
        return Vec::new();
    }

    let mut next = Vec::with_capacity(population_size.max(parents.len() * 2));
    for parent in &parents {
        next.push(parent.mutate_with(rng, FINE_MUTATION));
        next.push(parent.mutate_with(rng, COARSE_MUTATION));
    }
    while next.len() < population_size {
        if let Some(parent) = parents.choose(rng) {
            next.push(parent.mutate_with(rng, FILL_MUTATION));
        }
    }
    next
}

/// Run `generations` rounds of evaluate-then-breed starting from `population`.
///
/// Failed evaluations are logged and skipped. The archive keeps its
/// accept-if-strictly-better rule throughout.
pub async fn evolve<E>(
    archive: &mut MapElitesArchive,
    population: Vec<SystemConfig>,
    generations: usize,
    evaluator: &E,
) -> Result<(), LlmError>
where
    E: ConfigEvaluator + ?Sized,
{
    if population.is_empty() {
        return Err(LlmError::InvalidParameter(
            "evolution needs a non-empty initial population".to_string(),
        ));
    }
    let population_size = population.len();
    let mut configs = population;

    for generation in 0..generations {
        let results = join_all(configs.iter().map(|config| evaluator.evaluate(config))).await;

        let mut improved = 0usize;
        for (config, result) in configs.into_iter().zip(results) {
            match result {
                Ok(metrics) => {
                    if archive.add(config, metrics) {
                        improved += 1;
                    }
                }
                Err(error) => tracing::warn!(generation, %error, "evaluation failed"),
            }
        }
        tracing::info!(
            generation = generation + 1,
            generations,
            improved,
            niches = archive.len(),
            "generation complete"
        );

        if generation + 1 == generations {
            break;
        }
        configs = next_generation(archive, population_size, &mut rand::thread_rng());
        if configs.is_empty() {
            tracing::warn!(generation, "archive empty, stopping evolution early");
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct BufferSizeScore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ConfigEvaluator for BufferSizeScore {
        async fn evaluate(&self, config: &SystemConfig) -> Result<Metrics, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Metrics::new(
                config.buffer_size as f64,
                0.0,
                config.max_concurrent as f64,
                config.buffer_size as f64 / 10.0,
            ))
        }
    }

    #[test]
    fn mutation_respects_floors() {
        let tiny = seed(1, 1, 1, 1.0, 1, 1, 1, 0.1, 1.0, 1.0);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let m = tiny.mutate_with(&mut rng, 0.9);
            assert!(m.max_concurrent >= 1);
            assert!(m.batch_size >= 1);
            assert!(m.max_retries >= 1);
            assert!(m.retry_delay >= 0.1);
            assert!(m.timeout >= 1.0);
            assert!(m.keepalive_timeout >= 1.0);
        }
    }

    #[test]
    fn mutation_stays_within_rate() {
        let base = initial_population()[1].clone();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            let m = base.mutate_with(&mut rng, 0.1);
            assert!(m.buffer_size >= 14745 && m.buffer_size <= 18022);
            assert!(m.adjustment_factor >= 1.17 - 1e-9 && m.adjustment_factor <= 1.43 + 1e-9);
        }
        assert_eq!(base.mutate_with(&mut rng, 0.0), base);
    }

    #[test]
    fn next_generation_uses_top_three_and_fills() {
        let mut archive = MapElitesArchive::default();
        for (i, config) in initial_population().into_iter().enumerate() {
            archive.add(config, Metrics::new(100.0 * (i + 1) as f64, 0.0, 0.0, 1000.0 * i as f64));
        }
        let mut rng = StdRng::seed_from_u64(1);
        let next = next_generation(&archive, 8, &mut rng);
        assert_eq!(next.len(), 8);
        assert!(next_generation(&MapElitesArchive::default(), 5, &mut rng).is_empty());
    }

    #[tokio::test]
    async fn evolve_populates_archive() {
        let evaluator = BufferSizeScore {
            calls: AtomicUsize::new(0),
        };
        let mut archive = MapElitesArchive::default();
        evolve(&mut archive, initial_population(), 3, &evaluator)
            .await
            .unwrap();

        assert!(!archive.is_empty());
        assert_eq!(
            archive.history().len(),
            evaluator.calls.load(Ordering::SeqCst)
        );
        // first generation evaluates the five seeds; later ones breed six
        assert_eq!(archive.history().len(), 5 + 6 + 6);
        let best = archive.best().unwrap();
        assert!(best.config.buffer_size >= 65536 / 2);
    }

    #[tokio::test]
    async fn empty_population_is_rejected() {
        let evaluator = BufferSizeScore {
            calls: AtomicUsize::new(0),
        };
        let result = evolve(&mut MapElitesArchive::default(), vec![], 2, &evaluator).await;
        assert!(matches!(result, Err(LlmError::InvalidParameter(_))));
    }
}
