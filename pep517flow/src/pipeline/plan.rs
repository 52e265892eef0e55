//! Deterministic execution planning.

use super::StageSpec;
use crate::errors::{CycleDetectedError, PlanError};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// A validated, topologically ordered stage graph.
///
/// Ties between ready stages are broken by declaration order, so the same
/// declarations always produce the same order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    names: Vec<String>,
    index: HashMap<String, usize>,
    order: Vec<usize>,
    position: Vec<usize>,
    predecessors: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
    ancestors: Vec<BTreeSet<usize>>,
}

/// Plans `specs`.
///
/// Fails fast on an empty pipeline, duplicate names, self or unknown
/// predecessors, cycles, and overlapping target paths between stages that
/// have no dependency path between them.
pub fn plan(specs: &[StageSpec]) -> Result<ExecutionPlan, PlanError> {
    if specs.is_empty() {
        return Err(PlanError::EmptyPipeline);
    }

    let mut index = HashMap::with_capacity(specs.len());
    for (i, spec) in specs.iter().enumerate() {
        if index.insert(spec.name.clone(), i).is_some() {
            return Err(PlanError::DuplicateStage(spec.name.clone()));
        }
    }

    let mut predecessors = Vec::with_capacity(specs.len());
    let mut dependents = vec![Vec::new(); specs.len()];
    for (i, spec) in specs.iter().enumerate() {
        let mut preds = Vec::with_capacity(spec.predecessors.len());
        for pred in &spec.predecessors {
            if *pred == spec.name {
                return Err(PlanError::SelfDependency(spec.name.clone()));
            }
            let Some(&p) = index.get(pred) else {
                return Err(PlanError::UnknownPredecessor {
                    stage: spec.name.clone(),
                    predecessor: pred.clone(),
                });
            };
            if !preds.contains(&p) {
                preds.push(p);
                dependents[p].push(i);
            }
        }
        predecessors.push(preds);
    }

    let order = topological_order(&predecessors, &dependents).map_err(|remaining| {
        let cycle = find_cycle(&predecessors, &remaining)
            .into_iter()
            .map(|i| specs[i].name.clone())
            .collect();
        PlanError::CyclicDependency(CycleDetectedError::new(cycle))
    })?;

    let mut position = vec![0; specs.len()];
    for (pos, &i) in order.iter().enumerate() {
        position[i] = pos;
    }

    let mut ancestors = vec![BTreeSet::new(); specs.len()];
    for &i in &order {
        let mut set = BTreeSet::new();
        for &p in &predecessors[i] {
            set.insert(p);
            set.extend(ancestors[p].iter().copied());
        }
        ancestors[i] = set;
    }

    let plan = ExecutionPlan {
        names: specs.iter().map(|s| s.name.clone()).collect(),
        index,
        order,
        position,
        predecessors,
        dependents,
        ancestors,
    };
    plan.check_target_paths(specs)?;
    Ok(plan)
}

/// Kahn's algorithm. On a cycle, returns the stages that never became ready.
fn topological_order(predecessors: &[Vec<usize>], dependents: &[Vec<usize>]) -> Result<Vec<usize>, BTreeSet<usize>> {
    let mut in_degree: Vec<usize> = predecessors.iter().map(Vec::len).collect();
    let mut ready: BTreeSet<usize> = (0..predecessors.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(predecessors.len());

    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &d in &dependents[i] {
            in_degree[d] -= 1;
            if in_degree[d] == 0 {
                ready.insert(d);
            }
        }
    }

    if order.len() == predecessors.len() {
        Ok(order)
    } else {
        Err((0..predecessors.len()).filter(|&i| in_degree[i] > 0).collect())
    }
}

/// Walks predecessor edges within `remaining` until a stage repeats. Every
/// remaining stage has a remaining predecessor, so the walk always closes.
/// The returned path follows execution direction and repeats its first
/// element at the end.
fn find_cycle(predecessors: &[Vec<usize>], remaining: &BTreeSet<usize>) -> Vec<usize> {
    let Some(&start) = remaining.first() else {
        return Vec::new();
    };
    let mut path = vec![start];
    let mut current = start;
    loop {
        let Some(&next) = predecessors[current].iter().find(|p| remaining.contains(p)) else {
            return path;
        };
        if let Some(at) = path.iter().position(|&i| i == next) {
            let mut cycle = path.split_off(at);
            cycle.push(next);
            cycle.reverse();
            return cycle;
        }
        path.push(next);
        current = next;
    }
}

fn overlapping<'a>(a: &'a Path, b: &'a Path) -> Option<&'a Path> {
    if b.starts_with(a) {
        Some(a)
    } else if a.starts_with(b) {
        Some(b)
    } else {
        None
    }
}

impl ExecutionPlan {
    fn check_target_paths(&self, specs: &[StageSpec]) -> Result<(), PlanError> {
        for (i, first) in specs.iter().enumerate() {
            for (j, second) in specs.iter().enumerate().skip(i + 1) {
                if !self.unrelated(i, j) {
                    continue;
                }
                for a in &first.target_paths {
                    for b in &second.target_paths {
                        if let Some(path) = overlapping(a, b) {
                            return Err(PlanError::ResourceConflict {
                                first: first.name.clone(),
                                second: second.name.clone(),
                                path: path.to_path_buf(),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn unrelated(&self, a: usize, b: usize) -> bool {
        !self.ancestors[a].contains(&b) && !self.ancestors[b].contains(&a)
    }

    /// Returns the stage names in execution order.
    #[must_use]
    pub fn order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.names[i].as_str()).collect()
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if the plan has no stages. Planning rejects empty
    /// pipelines, so this is always false for a planned value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Returns the position of `stage` in the execution order.
    #[must_use]
    pub fn position(&self, stage: &str) -> Option<usize> {
        self.index.get(stage).map(|&i| self.position[i])
    }

    /// Returns the direct predecessors of `stage`.
    #[must_use]
    pub fn predecessors(&self, stage: &str) -> Vec<&str> {
        self.names_of(stage, &self.predecessors)
    }

    /// Returns the direct dependents of `stage`.
    #[must_use]
    pub fn dependents(&self, stage: &str) -> Vec<&str> {
        self.names_of(stage, &self.dependents)
    }

    /// Returns true if `stage` transitively depends on `other`.
    #[must_use]
    pub fn depends_on(&self, stage: &str, other: &str) -> bool {
        match (self.index.get(stage), self.index.get(other)) {
            (Some(&s), Some(&o)) => self.ancestors[s].contains(&o),
            _ => false,
        }
    }

    /// Returns true if the two stages have no dependency path between them
    /// and so may run at the same time.
    #[must_use]
    pub fn can_run_concurrently(&self, a: &str, b: &str) -> bool {
        match (self.index.get(a), self.index.get(b)) {
            (Some(&a), Some(&b)) => a != b && self.unrelated(a, b),
            _ => false,
        }
    }

    fn names_of(&self, stage: &str, edges: &[Vec<usize>]) -> Vec<&str> {
        self.index
            .get(stage)
            .map(|&i| edges[i].iter().map(|&j| self.names[j].as_str()).collect())
            .unwrap_or_default()
    }

    pub(crate) fn order_indices(&self) -> &[usize] {
        &self.order
    }

    pub(crate) fn position_of(&self, index: usize) -> usize {
        self.position[index]
    }

    pub(crate) fn predecessor_indices(&self, index: usize) -> &[usize] {
        &self.predecessors[index]
    }

    pub(crate) fn dependent_indices(&self, index: usize) -> &[usize] {
        &self.dependents[index]
    }
}
