//! Monte Carlo makespan simulation.
//!
//! Each trial samples every activity's duration and runs the critical path
//! method. Trial `i` draws from its own ChaCha8 stream seeded from
//! `(seed, i)`, and results are gathered in trial order, so the summary is
//! identical whether the trials ran on one thread or many.

use indexmap::IndexMap;
use rand::Rng;
use rand::SeedableRng;
use rand::distributions::{Uniform, WeightedIndex};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::ScheduleError;

use super::{Activity, Network, ScheduleResult, cpm};

/// A duration distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Distribution {
    Fixed { value: f64 },
    Uniform { min: f64, max: f64 },
    Triangular { min: f64, mode: f64, max: f64 },
    Discrete { outcomes: Vec<Outcome> },
}

/// One value of a discrete distribution and its weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub value: f64,
    #[serde(alias = "weight")]
    pub probability: f64,
}

/// A validated distribution ready to sample.
#[derive(Debug, Clone)]
pub enum Sampler {
    Fixed(f64),
    Uniform(Uniform<f64>),
    Triangular { min: f64, mode: f64, max: f64 },
    Discrete { values: Vec<f64>, index: WeightedIndex<f64> },
}

impl Distribution {
    /// Check parameters and build a sampler.
    pub fn sampler(&self, activity: &str) -> ScheduleResult<Sampler> {
        let invalid = |message: String| ScheduleError::InvalidDistribution {
            activity: activity.to_string(),
            message,
        };
        let check = |values: &[f64]| {
            if values.iter().all(|v| v.is_finite() && *v >= 0.0) {
                Ok(())
            } else {
                Err(invalid("parameters must be finite and non-negative".into()))
            }
        };
        match self {
            Self::Fixed { value } => {
                check(&[*value])?;
                Ok(Sampler::Fixed(*value))
            }
            Self::Uniform { min, max } => {
                check(&[*min, *max])?;
                if min > max {
                    return Err(invalid(format!("min {min} exceeds max {max}")));
                }
                if min == max {
                    return Ok(Sampler::Fixed(*min));
                }
                Ok(Sampler::Uniform(Uniform::new_inclusive(*min, *max)))
            }
            Self::Triangular { min, mode, max } => {
                check(&[*min, *mode, *max])?;
                if !(min <= mode && mode <= max) {
                    return Err(invalid(format!("need min <= mode <= max, got {min}, {mode}, {max}")));
                }
                if min == max {
                    return Ok(Sampler::Fixed(*min));
                }
                Ok(Sampler::Triangular {
                    min: *min,
                    mode: *mode,
                    max: *max,
                })
            }
            Self::Discrete { outcomes } => {
                let values: Vec<f64> = outcomes.iter().map(|o| o.value).collect();
                check(&values)?;
                let index = WeightedIndex::new(outcomes.iter().map(|o| o.probability))
                    .map_err(|e| invalid(e.to_string()))?;
                Ok(Sampler::Discrete { values, index })
            }
        }
    }

    pub fn mean(&self) -> f64 {
        match self {
            Self::Fixed { value } => *value,
            Self::Uniform { min, max } => (min + max) / 2.0,
            Self::Triangular { min, mode, max } => (min + mode + max) / 3.0,
            Self::Discrete { outcomes } => {
                let total: f64 = outcomes.iter().map(|o| o.probability).sum();
                outcomes.iter().map(|o| o.value * o.probability).sum::<f64>() / total
            }
        }
    }
}

impl Sampler {
    pub fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        match self {
            Self::Fixed(v) => *v,
            Self::Uniform(u) => rng.sample(u),
            Self::Triangular { min, mode, max } => {
                // Inverse CDF.
                let u: f64 = rng.r#gen();
                let split = (mode - min) / (max - min);
                if u < split {
                    min + (u * (max - min) * (mode - min)).sqrt()
                } else {
                    max - ((1.0 - u) * (max - min) * (max - mode)).sqrt()
                }
            }
            Self::Discrete { values, index } => values[rng.sample(index)],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationOptions {
    pub trials: usize,
    pub seed: u64,
    pub parallel: bool,
    /// Histogram bin count.
    pub bins: usize,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            trials: 1000,
            seed: 42,
            parallel: true,
            bins: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Percentiles {
    pub p50: f64,
    pub p80: f64,
    pub p90: f64,
    pub p95: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

/// Aggregate makespan distribution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationSummary {
    pub trials: usize,
    pub seed: u64,
    pub mean: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    pub percentiles: Percentiles,
    pub histogram: Vec<Bin>,
    /// Share of trials in which each activity had zero slack.
    pub criticality: IndexMap<String, f64>,
    /// Every trial's makespan, ascending.
    #[serde(skip)]
    pub makespans: Vec<f64>,
}

impl SimulationSummary {
    /// Empirical probability that the makespan is at most `deadline`.
    pub fn probability_within(&self, deadline: f64) -> f64 {
        if self.makespans.is_empty() {
            return 0.0;
        }
        let hits = self.makespans.partition_point(|&m| m <= deadline);
        hits as f64 / self.makespans.len() as f64
    }
}

/// SplitMix64 finalizer over the seed and trial index.
fn trial_seed(seed: u64, trial: u64) -> u64 {
    let mut z = seed.wrapping_add(trial.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Run `options.trials` independent CPM trials with sampled durations.
pub fn simulate(
    activities: &[Activity],
    network: &Network,
    options: &SimulationOptions,
) -> ScheduleResult<SimulationSummary> {
    if options.trials == 0 {
        return Err(ScheduleError::NoTrials);
    }
    let samplers = activities
        .iter()
        .map(|a| match &a.distribution {
            Some(d) => d.sampler(&a.name),
            None => Ok(Sampler::Fixed(a.duration)),
        })
        .collect::<ScheduleResult<Vec<_>>>()?;

    let trial = |i: usize| {
        let mut rng = ChaCha8Rng::seed_from_u64(trial_seed(options.seed, i as u64));
        let durations: Vec<f64> = samplers.iter().map(|s| s.sample(&mut rng)).collect();
        let cpm = cpm::analyze(network, &durations);
        let critical: Vec<bool> = cpm.timings.iter().map(|t| t.is_critical()).collect();
        (cpm.makespan, critical)
    };
    let results: Vec<(f64, Vec<bool>)> = if options.parallel {
        (0..options.trials).into_par_iter().map(trial).collect()
    } else {
        (0..options.trials).map(trial).collect()
    };

    let n = results.len() as f64;
    let mut makespans: Vec<f64> = results.iter().map(|(m, _)| *m).collect();
    let mean = makespans.iter().sum::<f64>() / n;
    let variance = makespans.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / n;
    makespans.sort_by(f64::total_cmp);
    let min = makespans[0];
    let max = makespans[makespans.len() - 1];
    let percentile = |p: f64| {
        let rank = ((p * n).ceil() as usize).clamp(1, makespans.len());
        makespans[rank - 1]
    };
    let percentiles = Percentiles {
        p50: percentile(0.50),
        p80: percentile(0.80),
        p90: percentile(0.90),
        p95: percentile(0.95),
    };

    let mut critical_counts = vec![0usize; activities.len()];
    for (_, flags) in &results {
        for (count, &flag) in critical_counts.iter_mut().zip(flags) {
            *count += usize::from(flag);
        }
    }

    let summary = SimulationSummary {
        trials: options.trials,
        seed: options.seed,
        mean,
        std_dev: variance.sqrt(),
        min,
        max,
        percentiles,
        histogram: histogram(&makespans, options.bins.max(1)),
        criticality: activities
            .iter()
            .zip(critical_counts)
            .map(|(a, c)| (a.name.clone(), c as f64 / n))
            .collect(),
        makespans,
    };
    tracing::info!(
        trials = summary.trials,
        seed = summary.seed,
        mean = summary.mean,
        p90 = summary.percentiles.p90,
        "simulation complete"
    );
    Ok(summary)
}

/// Equal-width bins over `[min, max]` of sorted values; one bin when all
/// values are equal.
fn histogram(sorted: &[f64], bins: usize) -> Vec<Bin> {
    let (Some(&lo), Some(&hi)) = (sorted.first(), sorted.last()) else {
        return Vec::new();
    };
    if hi - lo <= f64::EPSILON {
        return vec![Bin {
            lower: lo,
            upper: hi,
            count: sorted.len(),
        }];
    }
    let width = (hi - lo) / bins as f64;
    let mut out: Vec<Bin> = (0..bins)
        .map(|b| Bin {
            lower: lo + width * b as f64,
            upper: if b + 1 == bins { hi } else { lo + width * (b + 1) as f64 },
            count: 0,
        })
        .collect();
    for &v in sorted {
        let b = (((v - lo) / width) as usize).min(bins - 1);
        out[b].count += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network(activities: &[Activity]) -> Network {
        Network::build(activities, &[]).unwrap()
    }

    fn uncertain() -> Vec<Activity> {
        vec![
            Activity::new("design", 4.0).with_distribution(Distribution::Triangular {
                min: 3.0,
                mode: 4.0,
                max: 8.0,
            }),
            Activity::new("build", 8.0)
                .after(&["design"])
                .with_distribution(Distribution::Uniform { min: 6.0, max: 12.0 }),
            Activity::new("docs", 12.0).with_distribution(Distribution::Discrete {
                outcomes: vec![
                    Outcome {
                        value: 10.0,
                        probability: 0.5,
                    },
                    Outcome {
                        value: 14.0,
                        probability: 0.5,
                    },
                ],
            }),
        ]
    }

    #[test]
    fn same_seed_reproduces_summary() {
        let activities = uncertain();
        let net = network(&activities);
        let options = SimulationOptions {
            trials: 500,
            seed: 7,
            ..Default::default()
        };
        let a = simulate(&activities, &net, &options).unwrap();
        let b = simulate(&activities, &net, &options).unwrap();
        assert_eq!(a, b);

        let sequential = simulate(
            &activities,
            &net,
            &SimulationOptions {
                parallel: false,
                ..options.clone()
            },
        )
        .unwrap();
        assert_eq!(a, sequential);

        let other = simulate(&activities, &net, &SimulationOptions { seed: 8, ..options }).unwrap();
        assert_ne!(a.mean, other.mean);
    }

    #[test]
    fn summary_is_consistent() {
        let activities = uncertain();
        let net = network(&activities);
        let s = simulate(&activities, &net, &SimulationOptions::default()).unwrap();
        assert!(s.min >= 10.0 && s.max <= 20.0);
        assert!(s.min <= s.percentiles.p50 && s.percentiles.p50 <= s.percentiles.p95);
        assert!(s.percentiles.p95 <= s.max);
        assert_eq!(s.histogram.iter().map(|b| b.count).sum::<usize>(), s.trials);
        assert!((s.probability_within(s.max) - 1.0).abs() < 1e-12);
        for c in s.criticality.values() {
            assert!((0.0..=1.0).contains(c));
        }
    }

    #[test]
    fn probability_within_counts_samples_inside_a_bin() {
        let activities = vec![Activity::new("a", 1.0).with_distribution(Distribution::Discrete {
            outcomes: vec![
                Outcome {
                    value: 1.0,
                    probability: 0.5,
                },
                Outcome {
                    value: 3.0,
                    probability: 0.5,
                },
            ],
        })];
        let net = network(&activities);
        let s = simulate(
            &activities,
            &net,
            &SimulationOptions {
                trials: 200,
                bins: 1,
                ..Default::default()
            },
        )
        .unwrap();
        let low = s.makespans.iter().filter(|&&m| m == 1.0).count() as f64 / 200.0;
        assert!(low > 0.0 && low < 1.0);
        // The single bin spans [1, 3]; a deadline of 2 splits it.
        assert_eq!(s.probability_within(2.0), low);
        assert_eq!(s.probability_within(0.5), 0.0);
        assert_eq!(s.probability_within(3.0), 1.0);
    }

    #[test]
    fn fixed_durations_give_a_point_distribution() {
        let activities = vec![Activity::new("a", 3.0), Activity::new("b", 2.0).after(&["a"])];
        let net = network(&activities);
        let s = simulate(&activities, &net, &SimulationOptions { trials: 10, ..Default::default() }).unwrap();
        assert_eq!((s.min, s.max, s.mean, s.std_dev), (5.0, 5.0, 5.0, 0.0));
        assert_eq!(s.histogram.len(), 1);
        assert_eq!(s.criticality["a"], 1.0);
    }

    #[test]
    fn invalid_distributions_and_zero_trials() {
        let bad = Distribution::Triangular {
            min: 5.0,
            mode: 1.0,
            max: 9.0,
        };
        assert!(bad.sampler("x").is_err());
        let empty = Distribution::Discrete { outcomes: vec![] };
        assert!(empty.sampler("x").is_err());

        let activities = vec![Activity::new("a", 1.0)];
        let net = network(&activities);
        assert!(matches!(
            simulate(&activities, &net, &SimulationOptions { trials: 0, ..Default::default() }),
            Err(ScheduleError::NoTrials)
        ));
    }

    #[test]
    fn triangular_samples_stay_in_range() {
        let sampler = Distribution::Triangular {
            min: 1.0,
            mode: 2.0,
            max: 6.0,
        }
        .sampler("t")
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..1000 {
            let v = sampler.sample(&mut rng);
            assert!((1.0..=6.0).contains(&v));
        }
    }
}
