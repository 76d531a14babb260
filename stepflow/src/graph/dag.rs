//! The step graph: an immutable DAG of step specifications.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

use super::identifier::compute_identifier;
use super::StepId;
use crate::errors::{CycleError, GraphError, UnresolvedReferenceError};
use crate::spec::{StepRef, StepSpec};

/// DFS colors for cycle detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// A directed acyclic graph of steps connected by argument references.
///
/// Built once from a set of specifications; re-planning means building a new
/// graph. Identifiers are computed on demand and memoized per instance.
#[derive(Debug)]
pub struct StepGraph {
    /// Specifications in declaration order.
    specs: Vec<StepSpec>,
    /// Step name to declaration index.
    index: HashMap<String, usize>,
    /// Direct dependencies by declaration index.
    dependencies: Vec<Vec<usize>>,
    /// Direct dependents by declaration index.
    dependents: Vec<Vec<usize>>,
    /// Topological order as declaration indices.
    order: Vec<usize>,
    /// Memoized identifiers.
    identifiers: RwLock<HashMap<usize, StepId>>,
}

impl StepGraph {
    /// Builds a graph from step specifications.
    ///
    /// # Errors
    ///
    /// Returns an error if a specification is invalid, a step name is
    /// duplicated, a reference names an unknown step, or references form a
    /// cycle.
    pub fn build(specs: impl IntoIterator<Item = StepSpec>) -> Result<Self, GraphError> {
        let specs: Vec<StepSpec> = specs.into_iter().collect();

        let mut index = HashMap::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            spec.validate()?;
            if index.insert(spec.step_name.clone(), i).is_some() {
                return Err(GraphError::DuplicateStep(spec.step_name.clone()));
            }
        }

        let mut dependencies = Vec::with_capacity(specs.len());
        let mut dependents = vec![Vec::new(); specs.len()];
        for (i, spec) in specs.iter().enumerate() {
            let mut deps = Vec::new();
            for name in spec.referenced_steps() {
                let Some(&dep) = index.get(name) else {
                    return Err(UnresolvedReferenceError::new(&spec.step_name, name).into());
                };
                deps.push(dep);
                dependents[dep].push(i);
            }
            dependencies.push(deps);
        }

        detect_cycle(&specs, &dependencies)?;

        let order = topological_sort(&dependencies, &dependents);

        debug!(steps = specs.len(), "Built step graph");

        Ok(Self {
            specs,
            index,
            dependencies,
            dependents,
            order,
            identifiers: RwLock::new(HashMap::new()),
        })
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Returns true if the graph has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Returns true if the graph contains the step.
    #[must_use]
    pub fn contains(&self, step: &str) -> bool {
        self.index.contains_key(step)
    }

    /// Returns a step's specification.
    #[must_use]
    pub fn spec(&self, step: &str) -> Option<&StepSpec> {
        self.index.get(step).map(|&i| &self.specs[i])
    }

    /// Returns all specifications in declaration order.
    #[must_use]
    pub fn specs(&self) -> &[StepSpec] {
        &self.specs
    }

    /// Returns step names in topological order.
    ///
    /// Every dependency precedes its dependents; among steps that are ready
    /// at the same time, the one declared first comes first.
    #[must_use]
    pub fn topological_order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.name(i)).collect()
    }


    /// Returns the direct dependencies of a step.
    #[must_use]
    pub fn dependencies_of(&self, step: &str) -> Vec<&str> {
        self.index
            .get(step)
            .map(|&i| self.dependencies[i].iter().map(|&d| self.name(d)).collect())
            .unwrap_or_default()
    }

    /// Returns the direct dependents of a step.
    #[must_use]
    pub fn dependents_of(&self, step: &str) -> Vec<&str> {
        self.index
            .get(step)
            .map(|&i| self.dependents[i].iter().map(|&d| self.name(d)).collect())
            .unwrap_or_default()
    }

    /// Returns every step the given step depends on, directly or not.
    #[must_use]
    pub fn ancestors_of(&self, step: &str) -> HashSet<&str> {
        self.reachable(step, &self.dependencies)
    }

    /// Returns every step that depends on the given step, directly or not.
    #[must_use]
    pub fn descendants_of(&self, step: &str) -> HashSet<&str> {
        self.reachable(step, &self.dependents)
    }

    /// Returns the targets plus all their ancestors, in topological order.
    ///
    /// An empty target list selects the whole graph.
    ///
    /// # Errors
    ///
    /// Returns an error if a target is not part of the graph.
    pub fn closure<S: AsRef<str>>(&self, targets: &[S]) -> Result<Vec<&str>, GraphError> {
        if targets.is_empty() {
            return Ok(self.topological_order());
        }

        let mut selected = HashSet::new();
        let mut stack = Vec::new();
        for target in targets {
            let target = target.as_ref();
            let &i = self
                .index
                .get(target)
                .ok_or_else(|| GraphError::UnknownTarget(target.to_string()))?;
            stack.push(i);
        }
        while let Some(i) = stack.pop() {
            if selected.insert(i) {
                stack.extend(self.dependencies[i].iter().copied());
            }
        }

        Ok(self
            .order
            .iter()
            .filter(|i| selected.contains(*i))
            .map(|&i| self.name(i))
            .collect())
    }

    /// Returns the unique identifier of a step.
    ///
    /// Identifiers of referenced steps are computed first; results are
    /// memoized for the lifetime of the graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the step is not part of the graph.
    pub fn identifier_of(&self, step: &str) -> Result<StepId, GraphError> {
        let &i = self
            .index
            .get(step)
            .ok_or_else(|| GraphError::UnknownTarget(step.to_string()))?;
        Ok(self.identifier_at(i))
    }

    /// Returns the human-readable unique name `<type>-<version>-<digest>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the step is not part of the graph.
    pub fn unique_name(&self, step: &str) -> Result<String, GraphError> {
        let id = self.identifier_of(step)?;
        let spec = &self.specs[self.index[step]];
        Ok(format!("{}-{}-{}", spec.step_type, spec.version, id))
    }

    fn identifier_at(&self, i: usize) -> StepId {
        if let Some(id) = self.identifiers.read().get(&i) {
            return id.clone();
        }

        // Ancestors in topological order: every reference is memoized
        // before the step that uses it.
        let mut needed = self.reachable_indices(i, &self.dependencies);
        needed.insert(i);
        let mut memo = self.identifiers.write();
        for &j in self.order.iter().filter(|j| needed.contains(*j)) {
            if memo.contains_key(&j) {
                continue;
            }
            let result: Result<StepId, std::convert::Infallible> =
                compute_identifier(&self.specs[j], &mut |r: &StepRef| {
                    Ok(memo[&self.index[r.step.as_str()]].clone())
                });
            let id = match result {
                Ok(id) => id,
                Err(never) => match never {},
            };
            memo.insert(j, id);
        }
        memo[&i].clone()
    }

    fn name(&self, i: usize) -> &str {
        &self.specs[i].step_name
    }

    fn reachable(&self, step: &str, edges: &[Vec<usize>]) -> HashSet<&str> {
        let Some(&start) = self.index.get(step) else {
            return HashSet::new();
        };
        self.reachable_indices(start, edges)
            .into_iter()
            .map(|i| self.name(i))
            .collect()
    }

    fn reachable_indices(&self, start: usize, edges: &[Vec<usize>]) -> HashSet<usize> {
        let mut seen = HashSet::new();
        let mut stack: Vec<usize> = edges[start].clone();
        while let Some(i) = stack.pop() {
            if seen.insert(i) {
                stack.extend(edges[i].iter().copied());
            }
        }
        seen
    }
}

/// Detects cycles with white/gray/black depth-first coloring.
///
/// Steps are visited in declaration order; the first back edge found is
/// reported as a closed path. The walk keeps an explicit stack of
/// `(node, next edge)` frames so deep chains cannot exhaust the call stack.
fn detect_cycle(specs: &[StepSpec], dependencies: &[Vec<usize>]) -> Result<(), CycleError> {
    let mut colors = vec![Color::White; specs.len()];
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for root in 0..specs.len() {
        if colors[root] != Color::White {
            continue;
        }
        colors[root] = Color::Gray;
        stack.push((root, 0));

        while let Some(frame) = stack.last_mut() {
            let (node, edge) = *frame;
            let Some(&dep) = dependencies[node].get(edge) else {
                colors[node] = Color::Black;
                stack.pop();
                continue;
            };
            frame.1 += 1;

            match colors[dep] {
                Color::White => {
                    colors[dep] = Color::Gray;
                    stack.push((dep, 0));
                }
                Color::Gray => {
                    let start = stack.iter().position(|&(n, _)| n == dep).unwrap_or(0);
                    let members = stack[start..]
                        .iter()
                        .map(|&(n, _)| n)
                        .chain(std::iter::once(dep))
                        .map(|n| specs[n].step_name.clone())
                        .collect();
                    return Err(CycleError::new(members));
                }
                Color::Black => {}
            }
        }
    }
    Ok(())
}

/// Kahn's algorithm with declaration order as the tie breaker.
fn topological_sort(dependencies: &[Vec<usize>], dependents: &[Vec<usize>]) -> Vec<usize> {
    let mut in_degree: Vec<usize> = dependencies.iter().map(Vec::len).collect();
    let mut ready: BTreeSet<usize> = (0..dependencies.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(dependencies.len());

    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &child in &dependents[i] {
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                ready.insert(child);
            }
        }
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::ArgumentValue;
    use pretty_assertions::assert_eq;

    fn step(name: &str) -> StepSpec {
        StepSpec::new(name, "t", "1")
    }

    fn build_chain() -> StepGraph {
        StepGraph::build(vec![
            step("c").with_ref("x", "b"),
            step("a"),
            step("b").with_ref("x", "a"),
        ])
        .unwrap()
    }

    fn assert_valid_linearization(graph: &StepGraph) {
        let order = graph.topological_order();
        for name in &order {
            let pos = order.iter().position(|n| n == name).unwrap();
            for dep in graph.dependencies_of(name) {
                let dep_pos = order.iter().position(|n| *n == dep).unwrap();
                assert!(dep_pos < pos, "{dep} must precede {name}");
            }
        }
    }

    #[test]
    fn test_topological_order() {
        let graph = build_chain();
        assert_eq!(graph.topological_order(), vec!["a", "b", "c"]);
        assert_valid_linearization(&graph);
    }

    #[test]
    fn test_ties_broken_by_declaration_order() {
        let graph = StepGraph::build(vec![
            step("z"),
            step("y"),
            step("x").with_ref("a", "z"),
            step("w"),
        ])
        .unwrap();

        assert_eq!(graph.topological_order(), vec!["z", "y", "x", "w"]);
    }

    #[test]
    fn test_diamond_linearization() {
        let graph = StepGraph::build(vec![
            step("d").with_ref("l", "b").with_ref("r", "c"),
            step("b").with_ref("x", "a"),
            step("c").with_ref("x", "a"),
            step("a"),
        ])
        .unwrap();

        assert_valid_linearization(&graph);
        assert_eq!(graph.topological_order().first(), Some(&"a"));
        assert_eq!(graph.topological_order().last(), Some(&"d"));
    }

    #[test]
    fn test_dependencies_and_dependents() {
        let graph = build_chain();
        assert_eq!(graph.dependencies_of("b"), vec!["a"]);
        assert_eq!(graph.dependents_of("b"), vec!["c"]);
        assert!(graph.dependencies_of("a").is_empty());
        assert!(graph.dependencies_of("missing").is_empty());
    }

    #[test]
    fn test_ancestors_and_descendants() {
        let graph = build_chain();
        assert_eq!(graph.ancestors_of("c"), HashSet::from(["a", "b"]));
        assert_eq!(graph.descendants_of("a"), HashSet::from(["b", "c"]));
        assert!(graph.ancestors_of("a").is_empty());
    }

    #[test]
    fn test_closure() {
        let graph = StepGraph::build(vec![
            step("a"),
            step("b").with_ref("x", "a"),
            step("sibling"),
        ])
        .unwrap();

        assert_eq!(graph.closure(&["b"]).unwrap(), vec!["a", "b"]);
        assert_eq!(graph.closure::<&str>(&[]).unwrap().len(), 3);
        assert!(matches!(graph.closure(&["nope"]), Err(GraphError::UnknownTarget(_))));
    }

    #[test]
    fn test_cycle_detected() {
        let result = StepGraph::build(vec![
            step("a").with_ref("x", "c"),
            step("b").with_ref("x", "a"),
            step("c").with_ref("x", "b"),
        ]);

        let Err(GraphError::Cycle(err)) = result else {
            panic!("expected cycle error");
        };
        assert_eq!(err.cycle.first(), err.cycle.last());
        let members: HashSet<&str> = err.members().iter().map(String::as_str).collect();
        assert_eq!(members, HashSet::from(["a", "b", "c"]));
    }

    #[test]
    fn test_cycle_through_nested_argument() {
        let result = StepGraph::build(vec![
            step("a").with_arg("xs", vec![ArgumentValue::reference("b")]),
            step("b").with_ref("x", "a"),
            step("free"),
        ]);

        assert!(matches!(result, Err(GraphError::Cycle(_))));
    }

    #[test]
    fn test_self_reference_is_cycle() {
        let result = StepGraph::build(vec![step("a").with_ref("x", "a")]);

        let Err(GraphError::Cycle(err)) = result else {
            panic!("expected cycle error");
        };
        assert_eq!(err.members(), ["a".to_string()]);
        assert_eq!(err.cycle, vec!["a".to_string(), "a".to_string()]);
    }

    fn deep_chain(len: usize) -> Vec<StepSpec> {
        (0..len)
            .map(|i| {
                let spec = step(&format!("s{i}"));
                if i == 0 {
                    spec
                } else {
                    spec.with_ref("x", format!("s{}", i - 1))
                }
            })
            .collect()
    }

    /// Runs `f` on a thread with a deliberately small stack.
    fn on_small_stack<F: FnOnce() + Send + 'static>(f: F) {
        std::thread::Builder::new()
            .stack_size(256 * 1024)
            .spawn(f)
            .unwrap()
            .join()
            .unwrap();
    }

    #[test]
    fn test_deep_chain_builds_and_identifies() {
        on_small_stack(|| {
            let graph = StepGraph::build(deep_chain(10_000)).unwrap();
            assert_eq!(graph.topological_order().last(), Some(&"s9999"));

            let tail = graph.identifier_of("s9999").unwrap();
            assert_eq!(tail.as_str().len(), 32);
            assert_eq!(graph.identifier_of("s9999").unwrap(), tail);
        });
    }

    #[test]
    fn test_deep_cycle_detected() {
        on_small_stack(|| {
            let mut specs = deep_chain(10_000);
            specs[0] = step("s0").with_ref("x", "s9999");

            let Err(GraphError::Cycle(err)) = StepGraph::build(specs) else {
                panic!("expected cycle error");
            };
            assert_eq!(err.members().len(), 10_000);
            assert_eq!(err.cycle.first(), err.cycle.last());
        });
    }

    #[test]
    fn test_identifier_independent_of_lookup_order() {
        let upward = build_chain();
        let downward = build_chain();

        let a = upward.identifier_of("a").unwrap();
        let b = upward.identifier_of("b").unwrap();
        let c = upward.identifier_of("c").unwrap();

        assert_eq!(downward.identifier_of("c").unwrap(), c);
        assert_eq!(downward.identifier_of("b").unwrap(), b);
        assert_eq!(downward.identifier_of("a").unwrap(), a);
    }

    #[test]
    fn test_unresolved_reference() {
        let result = StepGraph::build(vec![step("a").with_ref("x", "missing")]);

        let Err(GraphError::UnresolvedReference(err)) = result else {
            panic!("expected unresolved reference");
        };
        assert_eq!(err.step, "a");
        assert_eq!(err.reference, "missing");
    }

    #[test]
    fn test_duplicate_step() {
        let result = StepGraph::build(vec![step("a"), step("a")]);
        assert!(matches!(result, Err(GraphError::DuplicateStep(name)) if name == "a"));
    }

    #[test]
    fn test_empty_graph() {
        let graph = StepGraph::build(Vec::new()).unwrap();
        assert!(graph.is_empty());
        assert!(graph.topological_order().is_empty());
    }

    #[test]
    fn test_identifier_determinism_across_graphs() {
        let g1 = build_chain();
        let g2 = build_chain();

        for name in ["a", "b", "c"] {
            assert_eq!(g1.identifier_of(name).unwrap(), g2.identifier_of(name).unwrap());
        }
        // memoized value is stable
        assert_eq!(g1.identifier_of("c").unwrap(), g1.identifier_of("c").unwrap());
    }

    #[test]
    fn test_identifier_propagates_from_upstream() {
        let g1 = build_chain();
        let g2 = StepGraph::build(vec![
            step("c").with_ref("x", "b"),
            step("a").with_arg("seed", 7),
            step("b").with_ref("x", "a"),
        ])
        .unwrap();

        for name in ["a", "b", "c"] {
            assert_ne!(g1.identifier_of(name).unwrap(), g2.identifier_of(name).unwrap());
        }
    }

    #[test]
    fn test_identifier_independent_of_upstream_name() {
        let g1 = StepGraph::build(vec![step("a"), step("b").with_ref("x", "a")]).unwrap();
        let g2 = StepGraph::build(vec![step("first"), step("b").with_ref("x", "first")]).unwrap();

        assert_eq!(g1.identifier_of("b").unwrap(), g2.identifier_of("b").unwrap());
    }

    #[test]
    fn test_unique_name() {
        let graph = build_chain();
        let name = graph.unique_name("a").unwrap();
        assert!(name.starts_with("t-1-"));
        assert_eq!(name.len(), "t-1-".len() + 32);
    }
}
