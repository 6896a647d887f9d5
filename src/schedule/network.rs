//! Activity precedence network.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::ScheduleError;

use super::{Activity, Precedence, ScheduleResult};

/// Finish-to-start DAG over activities, addressed by declaration index.
#[derive(Debug, Clone)]
pub struct Network {
    names: Vec<String>,
    preds: Vec<Vec<usize>>,
    succs: Vec<Vec<usize>>,
    /// Topological order.
    order: Vec<usize>,
}

impl Network {
    /// Build the DAG from `predecessors` lists and extra `precedence` links.
    ///
    /// Any cycle is fatal and reported with the activities along it.
    pub fn build(activities: &[Activity], precedence: &[Precedence]) -> ScheduleResult<Self> {
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(activities.len());
        for (i, a) in activities.iter().enumerate() {
            if index.insert(a.name.as_str(), i).is_some() {
                return Err(ScheduleError::DuplicateActivity {
                    name: a.name.clone(),
                });
            }
        }
        let lookup = |name: &str, from: &str| {
            index
                .get(name)
                .copied()
                .ok_or_else(|| ScheduleError::UnknownActivity {
                    reference: name.to_string(),
                    from: from.to_string(),
                })
        };

        let n = activities.len();
        let mut preds = vec![Vec::new(); n];
        let mut succs = vec![Vec::new(); n];
        let mut link = |before: usize, after: usize| {
            if !preds[after].contains(&before) {
                preds[after].push(before);
                succs[before].push(after);
            }
        };
        for (i, a) in activities.iter().enumerate() {
            for p in &a.predecessors {
                link(lookup(p, &a.name)?, i);
            }
        }
        for p in precedence {
            link(lookup(&p.before, "PRECEDENCE")?, lookup(&p.after, "PRECEDENCE")?);
        }

        if let Some(i) = (0..n).find(|&i| preds[i].contains(&i)) {
            let name = activities[i].name.clone();
            return Err(ScheduleError::CycleDetected {
                cycle: vec![name.clone(), name],
            });
        }

        let mut graph = DiGraph::<usize, ()>::with_capacity(n, 0);
        let nodes: Vec<NodeIndex> = (0..n).map(|i| graph.add_node(i)).collect();
        for (after, before_list) in preds.iter().enumerate() {
            for &before in before_list {
                graph.add_edge(nodes[before], nodes[after], ());
            }
        }

        let mut network = Self {
            names: activities.iter().map(|a| a.name.clone()).collect(),
            preds,
            succs,
            order: Vec::new(),
        };
        match toposort(&graph, None) {
            Ok(sorted) => {
                network.order = sorted.into_iter().map(|idx| graph[idx]).collect();
                Ok(network)
            }
            Err(cycle) => {
                let start = graph[cycle.node_id()];
                let members = tarjan_scc(&graph)
                    .into_iter()
                    .find(|scc| scc.iter().any(|&idx| graph[idx] == start))
                    .map(|scc| scc.into_iter().map(|idx| graph[idx]).collect())
                    .unwrap_or_else(|| HashSet::from([start]));
                let cycle = network.cycle_through(start, &members);
                tracing::warn!(cycle = ?cycle, "precedence cycle");
                Err(ScheduleError::CycleDetected { cycle })
            }
        }
    }

    /// Shortest cycle from `start` back to itself within one strongly
    /// connected component, as activity names with `start` repeated last.
    fn cycle_through(&self, start: usize, members: &HashSet<usize>) -> Vec<String> {
        let mut parent: HashMap<usize, usize> = HashMap::new();
        let mut queue = VecDeque::from([start]);
        while let Some(node) = queue.pop_front() {
            for &next in &self.succs[node] {
                if next == start {
                    let mut path = vec![node];
                    let mut cur = node;
                    while let Some(&p) = parent.get(&cur) {
                        path.push(p);
                        cur = p;
                    }
                    path.reverse();
                    path.push(start);
                    return path.into_iter().map(|i| self.names[i].clone()).collect();
                }
                if members.contains(&next) && !parent.contains_key(&next) {
                    parent.insert(next, node);
                    queue.push_back(next);
                }
            }
        }
        let mut names: Vec<usize> = members.iter().copied().collect();
        names.sort_unstable();
        names.into_iter().map(|i| self.names[i].clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, index: usize) -> &str {
        &self.names[index]
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn predecessors(&self, index: usize) -> &[usize] {
        &self.preds[index]
    }

    pub fn successors(&self, index: usize) -> &[usize] {
        &self.succs[index]
    }

    pub fn topological_order(&self) -> &[usize] {
        &self.order
    }
}
