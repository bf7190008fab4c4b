//! Batched execution planning and dependency graph export.
//!
//! A plan is an ordered list of batches over the top-level step entries.
//! Each batch holds every entry whose dependencies were all resolved by
//! earlier batches; a parallel group may depend on its own members, which the
//! pool resolves at run time. Batch N+1 starts only after batch N settled.

use std::collections::{HashMap, HashSet};

use conductor_types::workflow::{ParallelStepGroup, StepEntry, WorkflowDefinition, WorkflowStep};
use petgraph::dot::{Config, Dot};
use petgraph::graph::DiGraph;
use thiserror::Error;

/// Contract violations raised by the planner.
///
/// A definition that passed dependency and cycle validation never fails to
/// plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("unable to resolve dependencies for steps: {}", .remaining.join(", "))]
    UnresolvedDependencies { remaining: Vec<String> },
}

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

/// A set of top-level entries that become runnable together.
#[derive(Debug, Clone)]
pub struct Batch<'a> {
    pub entries: Vec<&'a StepEntry>,
}

impl<'a> Batch<'a> {
    /// A lone plain step runs inline; anything else runs in a pool.
    pub fn is_sequential(&self) -> bool {
        matches!(self.entries.as_slice(), [StepEntry::Step(_)])
    }

    /// Every step of the batch, groups flattened, in declaration order.
    pub fn steps(&self) -> impl Iterator<Item = &'a WorkflowStep> + '_ {
        self.entries.iter().copied().flat_map(StepEntry::steps)
    }

    pub fn step_ids(&self) -> Vec<&'a str> {
        self.steps().map(|s| s.id.as_str()).collect()
    }

    /// Pool size: the smallest `max_concurrency` among the batch's groups,
    /// or `default` when the batch has none.
    pub fn concurrency_limit(&self, default: usize) -> usize {
        self.groups()
            .map(|g| g.max_concurrency)
            .min()
            .unwrap_or(default)
            .max(1)
    }

    /// True unless some group in the batch opted out of `wait_for_all`.
    pub fn wait_for_all(&self) -> bool {
        self.groups().all(|g| g.wait_for_all)
    }

    fn groups(&self) -> impl Iterator<Item = &'a ParallelStepGroup> + '_ {
        self.entries.iter().copied().filter_map(|entry| match entry {
            StepEntry::Parallel(group) => Some(group),
            StepEntry::Step(_) => None,
        })
    }
}

/// Build the batched execution plan for a definition.
pub fn build_plan(def: &WorkflowDefinition) -> Result<Vec<Batch<'_>>, PlanError> {
    let mut remaining: Vec<&StepEntry> = def.steps.iter().collect();
    let mut resolved: HashSet<&str> = HashSet::new();
    let mut batches = Vec::new();

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<&StepEntry>, Vec<&StepEntry>) = remaining
            .into_iter()
            .partition(|entry| is_ready(entry, &resolved));

        if ready.is_empty() {
            let remaining = blocked
                .iter()
                .flat_map(|entry| entry.steps())
                .map(|s| s.id.clone())
                .collect();
            return Err(PlanError::UnresolvedDependencies { remaining });
        }

        for entry in ready.iter().copied() {
            resolved.extend(entry.steps().map(|s| s.id.as_str()));
        }
        tracing::debug!(
            batch = batches.len(),
            entries = ready.len(),
            "planned batch"
        );
        batches.push(Batch { entries: ready });
        remaining = blocked;
    }

    Ok(batches)
}

fn is_ready(entry: &StepEntry, resolved: &HashSet<&str>) -> bool {
    let own: HashSet<&str> = entry.steps().map(|s| s.id.as_str()).collect();
    entry.steps().all(|step| {
        step.depends_on
            .iter()
            .all(|dep| own.contains(dep.as_str()) || resolved.contains(dep.as_str()))
    })
}

// ---------------------------------------------------------------------------
// Dependency graph
// ---------------------------------------------------------------------------

/// Step dependency graph: one node per step, edges point from a dependency
/// to its dependent. Edges to unknown steps are left out.
pub fn dependency_graph(def: &WorkflowDefinition) -> DiGraph<&str, &'static str> {
    let mut graph = DiGraph::new();
    let nodes: HashMap<&str, _> = def
        .all_steps()
        .map(|s| (s.id.as_str(), graph.add_node(s.id.as_str())))
        .collect();

    for step in def.all_steps() {
        for dep in &step.depends_on {
            if let (Some(&from), Some(&to)) = (nodes.get(dep.as_str()), nodes.get(step.id.as_str())) {
                graph.add_edge(from, to, "depends_on");
            }
        }
    }

    graph
}

/// Render the dependency graph in Graphviz DOT format.
pub fn to_dot(def: &WorkflowDefinition) -> String {
    let graph = dependency_graph(def);
    Dot::with_config(&graph, &[Config::EdgeNoLabel]).to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn workflow(steps: Vec<StepEntry>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: "test-wf".to_string(),
            name: "Test".to_string(),
            version: "1.0.0".to_string(),
            description: None,
            steps,
            variables: Map::new(),
            outputs: Default::default(),
            triggers: vec![],
            timeout_ms: None,
            retry: None,
            metadata: Map::new(),
        }
    }

    fn step(id: &str, deps: &[&str]) -> StepEntry {
        WorkflowStep::new(id).depends_on(deps.iter().copied()).into()
    }

    fn batch_ids<'a>(plan: &'a [Batch<'a>]) -> Vec<Vec<&'a str>> {
        plan.iter().map(Batch::step_ids).collect()
    }

    #[test]
    fn test_linear_chain_is_three_sequential_batches() {
        let def = workflow(vec![step("a", &[]), step("b", &["a"]), step("c", &["b"])]);
        let plan = build_plan(&def).unwrap();
        assert_eq!(batch_ids(&plan), vec![vec!["a"], vec!["b"], vec!["c"]]);
        assert!(plan.iter().all(Batch::is_sequential));
    }

    #[test]
    fn test_independent_steps_share_a_batch() {
        let def = workflow(vec![step("a", &[]), step("b", &[]), step("c", &["a", "b"])]);
        let plan = build_plan(&def).unwrap();
        assert_eq!(batch_ids(&plan), vec![vec!["a", "b"], vec!["c"]]);
        assert!(!plan[0].is_sequential());
        assert!(plan[1].is_sequential());
        assert_eq!(plan[0].concurrency_limit(4), 4);
    }

    #[test]
    fn test_declaration_order_does_not_matter() {
        let def = workflow(vec![step("c", &["b"]), step("b", &["a"]), step("a", &[])]);
        let plan = build_plan(&def).unwrap();
        assert_eq!(batch_ids(&plan), vec![vec!["a"], vec!["b"], vec!["c"]]);
    }

    #[test]
    fn test_group_may_depend_on_its_own_members() {
        let group = ParallelStepGroup::new(vec![
            WorkflowStep::new("x").depends_on(["root"]),
            WorkflowStep::new("y").depends_on(["x"]),
        ]);
        let def = workflow(vec![step("root", &[]), group.into()]);
        let plan = build_plan(&def).unwrap();
        assert_eq!(batch_ids(&plan), vec![vec!["root"], vec!["x", "y"]]);
        assert!(!plan[1].is_sequential());
    }

    #[test]
    fn test_single_group_batch_is_a_pool() {
        let def = workflow(vec![ParallelStepGroup::new(vec![WorkflowStep::new("only")]).into()]);
        let plan = build_plan(&def).unwrap();
        assert!(!plan[0].is_sequential());
    }

    #[test]
    fn test_concurrency_limit_takes_smallest_group() {
        let mut g1 = ParallelStepGroup::new(vec![WorkflowStep::new("a")]);
        g1.max_concurrency = 3;
        let mut g2 = ParallelStepGroup::new(vec![WorkflowStep::new("b")]);
        g2.max_concurrency = 2;
        g2.wait_for_all = false;
        let def = workflow(vec![g1.into(), g2.into(), step("c", &[])]);

        let plan = build_plan(&def).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].concurrency_limit(5), 2);
        assert!(!plan[0].wait_for_all());
    }

    #[test]
    fn test_cycle_fails_to_plan() {
        let def = workflow(vec![step("a", &["b"]), step("b", &["a"]), step("c", &[])]);
        let err = build_plan(&def).unwrap_err();
        assert!(err.to_string().contains("unable to resolve dependencies"));
        assert_eq!(
            err,
            PlanError::UnresolvedDependencies {
                remaining: vec!["a".to_string(), "b".to_string()]
            }
        );
    }

    #[test]
    fn test_dependency_graph_edges() {
        let def = workflow(vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["a", "b", "ghost"]),
        ]);
        let graph = dependency_graph(&def);
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 3);
    }

    #[test]
    fn test_to_dot_renders_nodes_and_edges() {
        let def = workflow(vec![step("gather", &[]), step("report", &["gather"])]);
        let dot = to_dot(&def);
        assert!(dot.starts_with("digraph {"), "got: {dot}");
        assert!(dot.contains("label = \"gather\""), "got: {dot}");
        assert!(dot.contains("0 -> 1"), "got: {dot}");
    }
}
