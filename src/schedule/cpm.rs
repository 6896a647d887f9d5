//! Critical path method.

use serde::Serialize;

use super::{EPSILON, Network};

/// Most critical chains reported; a dense tie can have exponentially many.
pub const MAX_CHAINS: usize = 64;

/// Earliest/latest window of one activity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Timing {
    pub earliest_start: f64,
    pub earliest_finish: f64,
    pub latest_start: f64,
    pub latest_finish: f64,
    pub slack: f64,
}

impl Timing {
    pub fn is_critical(&self) -> bool {
        self.slack.abs() <= EPSILON
    }
}

/// Forward and backward pass results, indexed like the network.
#[derive(Debug, Clone, PartialEq)]
pub struct CriticalPath {
    pub makespan: f64,
    pub timings: Vec<Timing>,
}

/// Run the forward and backward passes with the given durations.
pub fn analyze(network: &Network, durations: &[f64]) -> CriticalPath {
    let n = network.len();
    let order = network.topological_order();
    let mut es = vec![0.0_f64; n];
    let mut ef = vec![0.0_f64; n];
    for &i in order {
        es[i] = network
            .predecessors(i)
            .iter()
            .map(|&p| ef[p])
            .fold(0.0, f64::max);
        ef[i] = es[i] + durations[i];
    }
    let makespan = ef.iter().copied().fold(0.0, f64::max);

    let mut ls = vec![0.0_f64; n];
    let mut lf = vec![0.0_f64; n];
    for &i in order.iter().rev() {
        lf[i] = network
            .successors(i)
            .iter()
            .map(|&s| ls[s])
            .fold(makespan, f64::min);
        ls[i] = lf[i] - durations[i];
    }

    let timings = (0..n)
        .map(|i| {
            let slack = ls[i] - es[i];
            Timing {
                earliest_start: es[i],
                earliest_finish: ef[i],
                latest_start: ls[i],
                latest_finish: lf[i],
                slack: if slack.abs() <= EPSILON { 0.0 } else { slack },
            }
        })
        .collect();
    CriticalPath { makespan, timings }
}

impl CriticalPath {
    /// Zero-slack activities in declaration order.
    pub fn critical(&self) -> impl Iterator<Item = usize> + '_ {
        self.timings
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_critical())
            .map(|(i, _)| i)
    }

    /// Zero-slack chains from a start-at-zero activity to one with no tight
    /// critical successor, in declaration order, capped at [`MAX_CHAINS`].
    pub fn chains(&self, network: &Network) -> Vec<Vec<usize>> {
        let tight = |from: usize, to: usize| {
            self.timings[to].is_critical()
                && (self.timings[to].earliest_start - self.timings[from].earliest_finish).abs()
                    <= EPSILON
        };

        let mut chains = Vec::new();
        let starts = self
            .critical()
            .filter(|&i| self.timings[i].earliest_start.abs() <= EPSILON);
        for start in starts {
            let mut stack = vec![vec![start]];
            while let Some(path) = stack.pop() {
                if chains.len() >= MAX_CHAINS {
                    return chains;
                }
                let Some(&last) = path.last() else { continue };
                let next: Vec<usize> = network
                    .successors(last)
                    .iter()
                    .copied()
                    .filter(|&s| tight(last, s))
                    .collect();
                if next.is_empty() {
                    chains.push(path);
                    continue;
                }
                // Reverse so the first successor is explored first.
                for &s in next.iter().rev() {
                    let mut extended = path.clone();
                    extended.push(s);
                    stack.push(extended);
                }
            }
        }
        chains
    }
}
