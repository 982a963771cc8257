//! Stage dependency graph and topological ordering.
//!
//! Dependencies are inferred from slot names only: stage B depends on stage A
//! when one of B's inputs is one of A's outputs. A stage that consumes its
//! own output forms a cycle of one. Input slots nobody produces are root
//! inputs, supplied from outside the plan.

use std::collections::{HashMap, HashSet, VecDeque};

use synapse_types::{Result, Stage, SynapseError};

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    ids: Vec<String>,
    index: HashMap<String, usize>,
    /// `deps[i]`: stages `i` consumes from, in declaration order.
    deps: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
    producers: HashMap<String, Vec<usize>>,
    root_inputs: Vec<String>,
}

impl DependencyGraph {
    pub fn build(stages: &[Stage]) -> Self {
        let ids: Vec<String> = stages.iter().map(|s| s.id.clone()).collect();

        let mut index = HashMap::new();
        for (i, id) in ids.iter().enumerate() {
            index.entry(id.clone()).or_insert(i);
        }

        let mut producers: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, stage) in stages.iter().enumerate() {
            for slot in &stage.outputs {
                let entry = producers.entry(slot.clone()).or_default();
                if !entry.contains(&i) {
                    entry.push(i);
                }
            }
        }

        let mut deps = vec![Vec::new(); stages.len()];
        let mut dependents = vec![Vec::new(); stages.len()];
        let mut root_inputs = Vec::new();
        for (i, stage) in stages.iter().enumerate() {
            for slot in &stage.inputs {
                match producers.get(slot) {
                    Some(from) => {
                        for &p in from {
                            if !deps[i].contains(&p) {
                                deps[i].push(p);
                                dependents[p].push(i);
                            }
                        }
                    }
                    None => {
                        if !root_inputs.contains(slot) {
                            root_inputs.push(slot.clone());
                        }
                    }
                }
            }
        }
        for list in deps.iter_mut().chain(dependents.iter_mut()) {
            list.sort_unstable();
        }

        Self {
            ids,
            index,
            deps,
            dependents,
            producers,
            root_inputs,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Stages whose outputs `id` consumes.
    pub fn dependencies_of(&self, id: &str) -> Vec<&str> {
        self.index
            .get(id)
            .map(|&i| self.names(&self.deps[i]))
            .unwrap_or_default()
    }

    /// Stages that consume an output of `id` directly.
    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        self.index
            .get(id)
            .map(|&i| self.names(&self.dependents[i]))
            .unwrap_or_default()
    }

    /// Every stage downstream of `id`, in declaration order.
    pub fn transitive_dependents(&self, id: &str) -> Vec<&str> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut queue: VecDeque<usize> = self.dependents[start].iter().copied().collect();
        while let Some(i) = queue.pop_front() {
            if i != start && seen.insert(i) {
                queue.extend(self.dependents[i].iter().copied());
            }
        }
        let mut out: Vec<usize> = seen.into_iter().collect();
        out.sort_unstable();
        self.names(&out)
    }

    pub fn producers_of(&self, slot: &str) -> Vec<&str> {
        self.producers
            .get(slot)
            .map(|p| self.names(p))
            .unwrap_or_default()
    }

    /// Slots consumed somewhere in the plan but produced by no stage.
    pub fn root_inputs(&self) -> &[String] {
        &self.root_inputs
    }

    /// Topological order as stage indices, or the stages on the first cycle
    /// found. Declaration order breaks ties.
    pub fn topological_indices(&self) -> std::result::Result<Vec<usize>, Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            Visiting,
            Done,
        }

        fn visit(
            g: &DependencyGraph,
            i: usize,
            marks: &mut [Mark],
            path: &mut Vec<usize>,
            out: &mut Vec<usize>,
        ) -> std::result::Result<(), Vec<String>> {
            match marks[i] {
                Mark::Done => return Ok(()),
                Mark::Visiting => {
                    let from = path.iter().position(|&p| p == i).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[from..].iter().map(|&p| g.ids[p].clone()).collect();
                    cycle.push(g.ids[i].clone());
                    return Err(cycle);
                }
                Mark::Unvisited => {}
            }
            marks[i] = Mark::Visiting;
            path.push(i);
            for &d in &g.deps[i] {
                visit(g, d, marks, path, out)?;
            }
            path.pop();
            marks[i] = Mark::Done;
            out.push(i);
            Ok(())
        }

        let mut marks = vec![Mark::Unvisited; self.ids.len()];
        let mut path = Vec::new();
        let mut out = Vec::with_capacity(self.ids.len());
        for i in 0..self.ids.len() {
            visit(self, i, &mut marks, &mut path, &mut out)?;
        }
        Ok(out)
    }

    fn names(&self, indices: &[usize]) -> Vec<&str> {
        indices.iter().map(|&i| self.ids[i].as_str()).collect()
    }
}

/// Order `stages` so every stage follows all stages whose outputs it
/// consumes.
pub fn resolve_order(stages: &[Stage]) -> Result<Vec<&Stage>> {
    let graph = DependencyGraph::build(stages);
    graph
        .topological_indices()
        .map(|order| order.into_iter().map(|i| &stages[i]).collect())
        .map_err(|cycle| SynapseError::CyclicGraph { stages: cycle })
}

/// Same as [`resolve_order`], returning ids.
pub fn resolve_order_ids(stages: &[Stage]) -> Result<Vec<String>> {
    Ok(resolve_order(stages)?
        .into_iter()
        .map(|s| s.id.clone())
        .collect())
}

/// The stages on a dependency cycle, if there is one.
pub fn find_cycle(stages: &[Stage]) -> Option<Vec<String>> {
    DependencyGraph::build(stages).topological_indices().err()
}
