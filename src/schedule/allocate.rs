//! Resource leveling.
//!
//! Serial schedule generation: activities are taken one at a time, always
//! the eligible one (all predecessors placed) with the smallest latest
//! start, ties in declaration order. Each is placed at the earliest
//! candidate time at or after its precedence-ready time where every
//! renewable resource stays within capacity over the whole interval and no
//! exclusive activity overlaps. Candidate times are the ready time and the
//! finish times of already-placed activities; the last candidate always
//! clears every renewable conflict, so only the horizon can reject a
//! placement after the up-front capacity checks.

use std::collections::BTreeMap;

use indexmap::IndexMap;

use crate::csp::Value;
use crate::error::ScheduleError;

use super::cpm::CriticalPath;
use super::{
    Activity, EPSILON, Network, Resource, ScheduleConflict, ScheduleOptions, ScheduleResult,
    ScheduledActivity,
};

/// Placements indexed like the activities.
#[derive(Debug, Clone, PartialEq)]
pub struct Leveled {
    pub placements: Vec<ScheduledActivity>,
    pub makespan: f64,
    pub consumption: IndexMap<String, f64>,
}

struct Placed<'a> {
    index: usize,
    start: f64,
    finish: f64,
    exclusive: bool,
    totals: IndexMap<&'a str, f64>,
}

impl Placed<'_> {
    fn active_at(&self, t: f64) -> bool {
        self.finish - self.start > EPSILON && self.start <= t + EPSILON && t < self.finish - EPSILON
    }

    fn overlaps(&self, start: f64, finish: f64) -> bool {
        self.finish - self.start > EPSILON
            && finish - start > EPSILON
            && self.start < finish - EPSILON
            && start < self.finish - EPSILON
    }
}

fn infeasible(conflict: ScheduleConflict) -> ScheduleError {
    tracing::warn!(%conflict, "infeasible schedule");
    ScheduleError::Infeasible { conflict }
}

/// Place every activity, respecting precedence, capacity, exclusivity and
/// the horizon.
pub fn level(
    activities: &[Activity],
    resources: &[Resource],
    network: &Network,
    cpm: &CriticalPath,
    options: &ScheduleOptions,
) -> ScheduleResult<Leveled> {
    let n = activities.len();
    let horizon = options
        .horizon
        .unwrap_or_else(|| activities.iter().map(|a| a.duration).sum());
    let resource = |name: &str| resources.iter().find(|r| r.name == name);

    let mut consumption: IndexMap<String, f64> = resources
        .iter()
        .filter(|r| !r.renewable)
        .map(|r| (r.name.clone(), 0.0))
        .collect();
    let mut waiting: Vec<usize> = (0..n).map(|i| network.predecessors(i).len()).collect();
    let mut eligible: Vec<usize> = (0..n).filter(|&i| waiting[i] == 0).collect();
    let mut placed: Vec<Placed<'_>> = Vec::with_capacity(n);
    let mut start_of: Vec<Option<(f64, f64)>> = vec![None; n];

    while !eligible.is_empty() {
        let Some(slot) = (0..eligible.len()).min_by(|&x, &y| {
            let (a, b) = (eligible[x], eligible[y]);
            cpm.timings[a]
                .latest_start
                .total_cmp(&cpm.timings[b].latest_start)
                .then(a.cmp(&b))
        }) else {
            break;
        };
        let i = eligible.swap_remove(slot);

        let activity = &activities[i];
        let duration = activity.duration;
        let totals = activity.totals();
        let ready = network
            .predecessors(i)
            .iter()
            .filter_map(|&p| start_of[p].map(|(_, f)| f))
            .fold(0.0, f64::max);

        for (&name, &requested) in &totals {
            let Some(r) = resource(name) else { continue };
            if r.renewable && requested > r.capacity + EPSILON {
                return Err(infeasible(ScheduleConflict::Capacity {
                    resource: name.to_string(),
                    activity: activity.name.clone(),
                    time: ready,
                    requested,
                    capacity: r.capacity,
                }));
            }
        }

        let mut candidates: Vec<f64> = std::iter::once(ready)
            .chain(placed.iter().map(|p| p.finish).filter(|&f| f > ready))
            .collect();
        candidates.sort_by(f64::total_cmp);
        candidates.dedup_by(|a, b| (*a - *b).abs() <= EPSILON);

        let mut first_block = None;
        let mut start = None;
        for &t in &candidates {
            if t + duration > horizon + EPSILON {
                return Err(infeasible(first_block.unwrap_or(ScheduleConflict::Horizon {
                    activity: activity.name.clone(),
                    time: t,
                    horizon,
                })));
            }
            match blocking(activity, &totals, t, &placed, activities, &resource) {
                None => {
                    start = Some(t);
                    break;
                }
                Some(conflict) => {
                    first_block.get_or_insert(conflict);
                }
            }
        }
        let Some(start) = start else {
            return Err(infeasible(first_block.unwrap_or(ScheduleConflict::Horizon {
                activity: activity.name.clone(),
                time: ready,
                horizon,
            })));
        };

        for (&name, &requested) in &totals {
            let Some(r) = resource(name) else { continue };
            if r.renewable {
                continue;
            }
            let used = consumption.entry(name.to_string()).or_default();
            if *used + requested > r.capacity + EPSILON {
                return Err(infeasible(ScheduleConflict::Exhausted {
                    resource: name.to_string(),
                    activity: activity.name.clone(),
                    consumed: *used,
                    requested,
                    capacity: r.capacity,
                }));
            }
            *used += requested;
        }

        if start > ready + EPSILON {
            tracing::debug!(activity = %activity.name, ready, start, "shifted for resources");
        }
        let finish = start + duration;
        start_of[i] = Some((start, finish));
        placed.push(Placed {
            index: i,
            start,
            finish,
            exclusive: !activity.can_parallel,
            totals,
        });
        for &s in network.successors(i) {
            waiting[s] -= 1;
            if waiting[s] == 0 {
                eligible.push(s);
            }
        }
    }

    let makespan = placed.iter().map(|p| p.finish).fold(0.0, f64::max);
    let placements = (0..n)
        .map(|i| {
            let (start, finish) = start_of[i].unwrap_or((0.0, activities[i].duration));
            let latest_finish = network
                .successors(i)
                .iter()
                .filter_map(|&s| start_of[s].map(|(st, _)| st))
                .fold(makespan, f64::min);
            let slack = latest_finish - finish;
            ScheduledActivity {
                start,
                finish,
                duration: activities[i].duration,
                slack: if slack <= EPSILON { 0.0 } else { slack },
            }
        })
        .collect();

    Ok(Leveled {
        placements,
        makespan,
        consumption,
    })
}

/// First conflict of placing `activity` over `[t, t + duration)`.
fn blocking<'r>(
    activity: &Activity,
    totals: &IndexMap<&str, f64>,
    t: f64,
    placed: &[Placed<'_>],
    activities: &[Activity],
    resource: &impl Fn(&str) -> Option<&'r Resource>,
) -> Option<ScheduleConflict> {
    let finish = t + activity.duration;
    if finish - t <= EPSILON {
        return None;
    }

    for p in placed.iter().filter(|p| p.overlaps(t, finish)) {
        if p.exclusive || !activity.can_parallel {
            return Some(ScheduleConflict::Exclusive {
                activity: activity.name.clone(),
                other: activities[p.index].name.clone(),
                time: p.start.max(t),
            });
        }
    }

    // Usage only rises at starts, so checking `t` and every start inside the
    // interval covers it.
    let mut points: Vec<f64> = std::iter::once(t)
        .chain(
            placed
                .iter()
                .map(|p| p.start)
                .filter(|&s| s > t && s < finish - EPSILON),
        )
        .collect();
    points.sort_by(f64::total_cmp);

    for (&name, &requested) in totals {
        let Some(r) = resource(name) else { continue };
        if !r.renewable {
            continue;
        }
        for &at in &points {
            let usage: f64 = placed
                .iter()
                .filter(|p| p.active_at(at))
                .filter_map(|p| p.totals.get(name))
                .sum();
            if usage + requested > r.capacity + EPSILON {
                return Some(ScheduleConflict::Capacity {
                    resource: name.to_string(),
                    activity: activity.name.clone(),
                    time: at,
                    requested: usage + requested,
                    capacity: r.capacity,
                });
            }
        }
    }
    None
}

/// Schedule metrics as constraint variables: `start.<a>`, `finish.<a>`,
/// `duration.<a>`, `slack.<a>` and `makespan`.
pub fn metrics(activities: &[Activity], leveled: &Leveled) -> BTreeMap<String, Value> {
    let mut env = BTreeMap::new();
    for (a, p) in activities.iter().zip(&leveled.placements) {
        env.insert(format!("start.{}", a.name), Value::Num(p.start));
        env.insert(format!("finish.{}", a.name), Value::Num(p.finish));
        env.insert(format!("duration.{}", a.name), Value::Num(p.duration));
        env.insert(format!("slack.{}", a.name), Value::Num(p.slack));
    }
    env.insert("makespan".to_string(), Value::Num(leveled.makespan));
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::cpm;

    fn run(
        activities: &[Activity],
        resources: &[Resource],
        horizon: Option<f64>,
    ) -> ScheduleResult<Leveled> {
        let net = Network::build(activities, &[])?;
        let durations: Vec<f64> = activities.iter().map(|a| a.duration).collect();
        let cpm = cpm::analyze(&net, &durations);
        level(activities, resources, &net, &cpm, &ScheduleOptions { horizon })
    }

    #[test]
    fn unconstrained_placement_matches_earliest_start() {
        let leveled = run(
            &[Activity::new("a", 2.0), Activity::new("b", 3.0).after(&["a"])],
            &[],
            None,
        )
        .unwrap();
        assert_eq!(leveled.placements[1].start, 2.0);
        assert_eq!(leveled.makespan, 5.0);
    }

    #[test]
    fn over_capacity_activities_are_serialized() {
        let resources = [Resource::renewable("dev", 1.0)];
        let leveled = run(
            &[
                Activity::new("a", 4.0).demand("dev", 1.0),
                Activity::new("b", 2.0).demand("dev", 1.0),
            ],
            &resources,
            None,
        )
        .unwrap();
        // b has more slack, so a goes first.
        assert_eq!(leveled.placements[0].start, 0.0);
        assert_eq!(leveled.placements[1].start, 4.0);
        assert_eq!(leveled.makespan, 6.0);
        assert_eq!(leveled.placements[1].slack, 0.0);
    }

    #[test]
    fn fitting_demands_run_concurrently() {
        let resources = [Resource::renewable("dev", 3.0)];
        let leveled = run(
            &[
                Activity::new("a", 4.0).demand("dev", 1.0),
                Activity::new("b", 4.0).demand("dev", 2.0),
            ],
            &resources,
            None,
        )
        .unwrap();
        assert_eq!(leveled.makespan, 4.0);
    }

    #[test]
    fn exclusive_activity_runs_alone() {
        let leveled = run(
            &[
                Activity::new("deploy", 2.0).exclusive(),
                Activity::new("docs", 3.0),
            ],
            &[],
            None,
        )
        .unwrap();
        let (d, w) = (leveled.placements[0], leveled.placements[1]);
        assert!(d.finish <= w.start || w.finish <= d.start);
        assert_eq!(leveled.makespan, 5.0);
    }

    #[test]
    fn demand_above_capacity_is_infeasible() {
        let resources = [Resource::renewable("dev", 1.0)];
        let err = run(&[Activity::new("a", 1.0).demand("dev", 2.0)], &resources, None).unwrap_err();
        match err {
            ScheduleError::Infeasible {
                conflict: ScheduleConflict::Capacity { resource, requested, capacity, .. },
            } => {
                assert_eq!(resource, "dev");
                assert_eq!((requested, capacity), (2.0, 1.0));
            }
            other => panic!("expected capacity conflict, got {other:?}"),
        }
    }

    #[test]
    fn horizon_reports_first_blocking_conflict() {
        let resources = [Resource::renewable("dev", 1.0)];
        let err = run(
            &[
                Activity::new("a", 3.0).demand("dev", 1.0),
                Activity::new("b", 3.0).demand("dev", 1.0),
            ],
            &resources,
            Some(4.0),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ScheduleError::Infeasible {
                conflict: ScheduleConflict::Capacity { ref activity, time, .. }
            } if activity == "b" && time == 0.0
        ));
    }

    #[test]
    fn non_renewable_budget_is_consumed() {
        let resources = [Resource::consumable("budget", 100.0)];
        let activities = [
            Activity::new("a", 1.0).demand("budget", 60.0),
            Activity::new("b", 1.0).demand("budget", 30.0).after(&["a"]),
        ];
        let leveled = run(&activities, &resources, None).unwrap();
        assert_eq!(leveled.consumption["budget"], 90.0);

        let over = [
            Activity::new("a", 1.0).demand("budget", 60.0),
            Activity::new("b", 5.0).demand("budget", 50.0).after(&["a"]),
        ];
        let err = run(&over, &resources, None).unwrap_err();
        assert!(matches!(
            err,
            ScheduleError::Infeasible {
                conflict: ScheduleConflict::Exhausted { ref activity, consumed, .. }
            } if activity == "b" && consumed == 60.0
        ));
    }

    #[test]
    fn metrics_expose_schedule_variables() {
        let activities = [Activity::new("a", 2.0)];
        let leveled = run(&activities, &[], None).unwrap();
        let env = metrics(&activities, &leveled);
        assert_eq!(env["finish.a"], Value::Num(2.0));
        assert_eq!(env["makespan"], Value::Num(2.0));
    }
}
