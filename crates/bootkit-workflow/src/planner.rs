//! Dependency planning (Kahn's algorithm).
//!
//! Ready steps are always emitted lowest declaration index first, so a fixed
//! declaration order yields a fixed plan.

use bootkit_core::{Step, StepSpec};
use bootkit_error::{ProvisionError, ProvisionResult};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fmt;

/// Steps in an order where every dependency precedes its dependents.
#[derive(Debug, Clone)]
pub struct Plan {
    steps: Vec<Step>,
}

impl Plan {
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(Step::name).collect()
    }

    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        lines.push("Execution plan:".to_string());
        for (idx, step) in self.steps.iter().enumerate() {
            let description = step
                .spec
                .description
                .clone()
                .unwrap_or_else(|| step.action.describe());
            let mut flags = Vec::new();
            if !step.spec.critical {
                flags.push("best-effort");
            }
            if step.spec.retryable {
                flags.push("retryable");
            }
            let flags = if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            };
            lines.push(format!(
                "{:02}. {} - {}{}",
                idx + 1,
                step.name(),
                description,
                flags
            ));
        }
        lines
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.summary_lines() {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

/// Orders `steps`; consumes them into a [`Plan`].
pub fn plan(steps: Vec<Step>) -> ProvisionResult<Plan> {
    let specs: Vec<&StepSpec> = steps.iter().map(|s| &s.spec).collect();
    let order = order_refs(&specs)?;

    let mut slots: Vec<Option<Step>> = steps.into_iter().map(Some).collect();
    let steps = order
        .into_iter()
        .filter_map(|idx| slots[idx].take())
        .collect();
    Ok(Plan { steps })
}

/// Indices of `specs` in execution order.
pub fn order(specs: &[StepSpec]) -> ProvisionResult<Vec<usize>> {
    let refs: Vec<&StepSpec> = specs.iter().collect();
    order_refs(&refs)
}

fn order_refs(specs: &[&StepSpec]) -> ProvisionResult<Vec<usize>> {
    let mut index: HashMap<&str, usize> = HashMap::with_capacity(specs.len());
    for (idx, spec) in specs.iter().enumerate() {
        if index.insert(spec.name.as_str(), idx).is_some() {
            return Err(ProvisionError::DuplicateStep(spec.name.clone()));
        }
    }

    let mut in_degree = vec![0usize; specs.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); specs.len()];
    for (idx, spec) in specs.iter().enumerate() {
        let mut seen = HashSet::new();
        for dep in &spec.depends_on {
            if !seen.insert(dep.as_str()) {
                continue;
            }
            if dep == &spec.name {
                return Err(ProvisionError::SelfDependency(spec.name.clone()));
            }
            let Some(&dep_idx) = index.get(dep.as_str()) else {
                return Err(ProvisionError::UnknownDependency {
                    step: spec.name.clone(),
                    dependency: dep.clone(),
                });
            };
            dependents[dep_idx].push(idx);
            in_degree[idx] += 1;
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|&(_, &degree)| degree == 0)
        .map(|(idx, _)| Reverse(idx))
        .collect();

    let mut result = Vec::with_capacity(specs.len());
    while let Some(Reverse(idx)) = ready.pop() {
        result.push(idx);
        for &next in &dependents[idx] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if result.len() != specs.len() {
        return Err(ProvisionError::Cycle {
            steps: cycle_members(specs, &in_degree, &dependents),
        });
    }

    Ok(result)
}

/// Steps that lie on a dependency cycle, in declaration order.
///
/// Kahn leaves every step downstream of a cycle unresolved too, including
/// steps wedged between two cycles; only those that can reach themselves
/// are reported.
fn cycle_members(
    specs: &[&StepSpec],
    in_degree: &[usize],
    dependents: &[Vec<usize>],
) -> Vec<String> {
    let unresolved: Vec<bool> = in_degree.iter().map(|&d| d > 0).collect();
    specs
        .iter()
        .enumerate()
        .filter(|&(idx, _)| unresolved[idx] && reaches_itself(idx, &unresolved, dependents))
        .map(|(_, spec)| spec.name.clone())
        .collect()
}

fn reaches_itself(start: usize, unresolved: &[bool], dependents: &[Vec<usize>]) -> bool {
    let mut seen = vec![false; dependents.len()];
    let mut stack: Vec<usize> = dependents[start].clone();
    while let Some(idx) = stack.pop() {
        if idx == start {
            return true;
        }
        if !unresolved[idx] || seen[idx] {
            continue;
        }
        seen[idx] = true;
        stack.extend(dependents[idx].iter().copied());
    }
    false
}
