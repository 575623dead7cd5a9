//! Step graph construction.
//!
//! Edges point from producer to consumer: a node's children are the nodes
//! whose steps require something this node's step creates. A node with no
//! producer among the given steps is a root, so one step set may yield
//! several disconnected trees.
//!
//! Nodes live in an arena inside [`StepGraph`] and are addressed by
//! [`NodeId`]. The graph is never mutated after construction; execution
//! state is tracked by the executor.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use tracing::debug;

use crate::error::{GraphError, GraphResult};
use crate::link::{has_any_links, Link};
use crate::step::{step_label, Step};

/// Index of a node within its [`StepGraph`].
pub type NodeId = usize;

/// One step and its edges.
pub struct StepNode {
    step: Arc<dyn Step>,
    children: Vec<NodeId>,
    parents: Vec<NodeId>,
}

impl StepNode {
    pub fn step(&self) -> &Arc<dyn Step> {
        &self.step
    }

    /// Consumers of this node's links, in discovery order, without duplicates.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Producers this node waits on.
    pub fn parents(&self) -> &[NodeId] {
        &self.parents
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }
}

impl std::fmt::Debug for StepNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepNode")
            .field("step", &step_label(self.step.as_ref()))
            .field("children", &self.children)
            .field("parents", &self.parents)
            .finish()
    }
}

/// A forest of step nodes.
#[derive(Debug)]
pub struct StepGraph {
    nodes: Vec<StepNode>,
    roots: Vec<NodeId>,
}

impl StepGraph {
    pub fn nodes(&self) -> &[StepNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> &StepNode {
        &self.nodes[id]
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Label of a node's step, see [`step_label`].
    pub fn label(&self, id: NodeId) -> String {
        step_label(self.nodes[id].step.as_ref())
    }

    /// First node whose step carries `name`.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        if name.is_empty() {
            return None;
        }
        self.nodes.iter().position(|n| n.step.name() == name)
    }

    /// All transitive children of `id` (BFS over child edges).
    pub fn descendants(&self, id: NodeId) -> BTreeSet<NodeId> {
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            for &child in &self.nodes[current].children {
                if visited.insert(child) {
                    queue.push_back(child);
                }
            }
        }
        visited
    }

    /// Whether `ancestor` is a direct or transitive producer for `id`.
    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        self.descendants(ancestor).contains(&id)
    }

    /// Indented rendering of the forest, one line per node visit.
    ///
    /// A node with several parents is printed under each of them.
    pub fn render_tree(&self) -> String {
        let mut out = String::new();
        let mut path = Vec::new();
        for &root in &self.roots {
            self.render_node(root, 0, &mut path, &mut out);
        }
        out
    }

    fn render_node(&self, id: NodeId, depth: usize, path: &mut Vec<NodeId>, out: &mut String) {
        let indent = "  ".repeat(depth);
        if path.contains(&id) {
            out.push_str(&format!("{indent}{} (cycle)\n", self.label(id)));
            return;
        }
        out.push_str(&format!("{indent}{}\n", self.label(id)));
        path.push(id);
        for &child in &self.nodes[id].children {
            self.render_node(child, depth + 1, path, out);
        }
        path.pop();
    }
}

/// Link every step to the steps that create what it requires.
pub fn build_graph(steps: &[Arc<dyn Step>]) -> StepGraph {
    let requires: Vec<Vec<Link>> = steps.iter().map(|s| s.requires()).collect();
    let creates: Vec<Vec<Link>> = steps.iter().map(|s| s.creates()).collect();

    let mut nodes: Vec<StepNode> = steps
        .iter()
        .map(|step| StepNode {
            step: Arc::clone(step),
            children: Vec::new(),
            parents: Vec::new(),
        })
        .collect();

    let mut roots = Vec::new();
    for node in 0..nodes.len() {
        let mut is_root = true;
        for other in 0..nodes.len() {
            if other == node {
                continue;
            }
            for required in &requires[node] {
                for created in &creates[other] {
                    if required.matches(created) {
                        is_root = false;
                        add_edge(&mut nodes, other, node);
                    }
                }
            }
        }
        if is_root {
            roots.push(node);
        }
    }

    debug!(steps = nodes.len(), roots = roots.len(), "built step graph");
    StepGraph { nodes, roots }
}

fn add_edge(nodes: &mut [StepNode], parent: NodeId, child: NodeId) {
    if nodes[parent].children.contains(&child) {
        return;
    }
    nodes[parent].children.push(child);
    nodes[child].parents.push(parent);
}

/// Build a graph containing only the named steps and everything they
/// transitively need.
///
/// An empty `names` list builds the full graph. A name shared by several
/// steps is an error, as is any name left over once each step has consumed
/// at most one matching request; a repeated name is therefore reported as
/// unresolved.
pub fn build_partial_graph(steps: &[Arc<dyn Step>], names: &[String]) -> GraphResult<StepGraph> {
    if names.is_empty() {
        return Ok(build_graph(steps));
    }

    let mut ambiguous: Vec<String> = Vec::new();
    for name in names {
        if name.is_empty() || ambiguous.contains(name) {
            continue;
        }
        if steps.iter().filter(|s| s.name() == name).count() > 1 {
            ambiguous.push(name.clone());
        }
    }
    if !ambiguous.is_empty() {
        return Err(GraphError::AmbiguousTargets { targets: ambiguous });
    }

    let mut pending: Vec<&String> = names.iter().collect();
    let mut selected = vec![false; steps.len()];
    let mut required: Vec<Link> = Vec::new();

    for (i, step) in steps.iter().enumerate() {
        if step.name().is_empty() {
            continue;
        }
        if let Some(pos) = pending.iter().position(|n| n.as_str() == step.name()) {
            selected[i] = true;
            required.extend(step.requires());
            pending.remove(pos);
        }
    }
    if !pending.is_empty() {
        return Err(GraphError::UnresolvedTargets {
            targets: pending.into_iter().cloned().collect(),
        });
    }

    loop {
        let mut added = 0;
        for (i, step) in steps.iter().enumerate() {
            if selected[i] {
                continue;
            }
            if has_any_links(&required, &step.creates()) {
                added += 1;
                selected[i] = true;
                required.extend(step.requires());
            }
        }
        if added == 0 {
            break;
        }
    }

    let targeted: Vec<Arc<dyn Step>> = steps
        .iter()
        .zip(&selected)
        .filter(|(_, keep)| **keep)
        .map(|(step, _)| Arc::clone(step))
        .collect();
    debug!(
        targets = names.len(),
        selected = targeted.len(),
        "selected partial step graph"
    );
    Ok(build_graph(&targeted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeStep;
    use crate::link::{ImageStreamTagReference, PipelineImageStreamTagReference};

    fn tag(t: &str) -> Link {
        Link::internal_image(PipelineImageStreamTagReference::new(t))
    }

    fn step(name: &str, requires: &[&str], creates: &[&str]) -> Arc<dyn Step> {
        let mut s = FakeStep::new(name);
        for r in requires {
            s = s.requires(tag(r));
        }
        for c in creates {
            s = s.creates(tag(c));
        }
        Arc::new(s)
    }

    fn names(graph: &StepGraph, ids: &[NodeId]) -> Vec<String> {
        ids.iter().map(|&id| graph.label(id)).collect()
    }

    fn xyz() -> Vec<Arc<dyn Step>> {
        vec![
            step("X", &[], &["l1"]),
            step("Y", &["l1"], &["l2"]),
            step("Z", &["l1"], &["l3"]),
        ]
    }

    #[test]
    fn test_build_graph_links_producer_to_consumers() {
        let graph = build_graph(&xyz());
        assert_eq!(names(&graph, graph.roots()), vec!["X"]);
        let x = graph.roots()[0];
        assert_eq!(names(&graph, graph.node(x).children()), vec!["Y", "Z"]);
        for &child in graph.node(x).children() {
            assert!(graph.node(child).children().is_empty());
            assert_eq!(graph.node(child).parents(), &[x]);
        }
    }

    #[test]
    fn test_build_graph_without_cross_requirements_is_a_forest_of_singletons() {
        let steps = vec![
            step("a", &["external"], &["a"]),
            step("b", &[], &["b"]),
            step("c", &["missing"], &[]),
        ];
        let graph = build_graph(&steps);
        assert_eq!(graph.roots(), &[0, 1, 2]);
        assert!(graph.nodes().iter().all(|n| n.children().is_empty()));
    }

    #[test]
    fn test_build_graph_unmatched_requirement_is_still_a_root() {
        let steps = vec![Arc::new(
            FakeStep::new("tag").requires(Link::external_image(ImageStreamTagReference::new(
                "openshift", "release", "golang-1.10",
            ))),
        ) as Arc<dyn Step>];
        let graph = build_graph(&steps);
        assert_eq!(graph.roots(), &[0]);
    }

    #[test]
    fn test_build_graph_fan_in_makes_every_producer_a_parent() {
        let steps = vec![
            step("p1", &[], &["shared"]),
            step("p2", &[], &["shared"]),
            step("consumer", &["shared"], &[]),
        ];
        let graph = build_graph(&steps);
        assert_eq!(graph.roots(), &[0, 1]);
        assert_eq!(graph.node(2).parents(), &[0, 1]);
        assert_eq!(graph.node(0).children(), &[2]);
        assert_eq!(graph.node(1).children(), &[2]);
    }

    #[test]
    fn test_build_graph_suppresses_duplicate_edges() {
        let steps = vec![
            step("producer", &[], &["a", "b"]),
            step("consumer", &["a", "b", "a"], &[]),
        ];
        let graph = build_graph(&steps);
        assert_eq!(graph.node(0).children(), &[1]);
        assert_eq!(graph.node(1).parents(), &[0]);
    }

    #[test]
    fn test_build_graph_ignores_self_links() {
        let steps = vec![step("loop", &["a"], &["a"])];
        let graph = build_graph(&steps);
        assert_eq!(graph.roots(), &[0]);
        assert!(graph.node(0).children().is_empty());
    }

    #[test]
    fn test_build_graph_singleton_links_match_across_steps() {
        let steps: Vec<Arc<dyn Step>> = vec![
            Arc::new(FakeStep::new("release").creates(Link::ReleaseImages)),
            Arc::new(FakeStep::new("e2e").requires(Link::ReleaseImages)),
        ];
        let graph = build_graph(&steps);
        assert_eq!(graph.roots(), &[0]);
        assert!(graph.is_ancestor(0, 1));
    }

    #[test]
    fn test_transitive_ancestry() {
        let steps = vec![
            step("a", &[], &["a"]),
            step("b", &["a"], &["b"]),
            step("c", &["b"], &["c"]),
        ];
        let graph = build_graph(&steps);
        assert!(graph.is_ancestor(0, 2));
        assert!(!graph.is_ancestor(2, 0));
        assert_eq!(graph.descendants(0), BTreeSet::from([1, 2]));
    }

    #[test]
    fn test_partial_graph_with_no_names_equals_full_graph() {
        let steps = xyz();
        let full = build_graph(&steps);
        let partial = build_partial_graph(&steps, &[]).unwrap();
        assert_eq!(full.render_tree(), partial.render_tree());
        assert_eq!(full.roots(), partial.roots());
    }

    #[test]
    fn test_partial_graph_selects_only_prerequisites() {
        let graph = build_partial_graph(&xyz(), &["Z".to_string()]).unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(names(&graph, graph.roots()), vec!["X"]);
        let x = graph.roots()[0];
        assert_eq!(names(&graph, graph.node(x).children()), vec!["Z"]);
    }

    #[test]
    fn test_partial_graph_follows_transitive_chain() {
        let steps = vec![
            step("base", &[], &["base"]),
            step("unrelated", &[], &["other"]),
            step("build", &["base"], &["bin"]),
            step("test", &["bin"], &[]),
        ];
        let graph = build_partial_graph(&steps, &["test".to_string()]).unwrap();
        let mut selected: Vec<String> = (0..graph.len()).map(|id| graph.label(id)).collect();
        selected.sort();
        assert_eq!(selected, vec!["base", "build", "test"]);
    }

    #[test]
    fn test_partial_graph_unknown_name() {
        let err = build_partial_graph(&xyz(), &["W".to_string()]).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnresolvedTargets {
                targets: vec!["W".to_string()]
            }
        );
    }

    #[test]
    fn test_partial_graph_reports_all_unknown_names() {
        let err = build_partial_graph(&xyz(), &["W".to_string(), "Z".to_string(), "V".to_string()])
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "the following names were not found in the config or were duplicates: W, V"
        );
    }

    #[test]
    fn test_partial_graph_repeated_name_is_unresolved() {
        let err = build_partial_graph(&xyz(), &["Z".to_string(), "Z".to_string()]).unwrap_err();
        assert_eq!(
            err,
            GraphError::UnresolvedTargets {
                targets: vec!["Z".to_string()]
            }
        );
    }

    #[test]
    fn test_partial_graph_ambiguous_name() {
        let steps = vec![step("dup", &[], &["a"]), step("dup", &[], &["b"])];
        let err = build_partial_graph(&steps, &["dup".to_string()]).unwrap_err();
        assert_eq!(
            err,
            GraphError::AmbiguousTargets {
                targets: vec!["dup".to_string()]
            }
        );
    }

    #[test]
    fn test_partial_graph_cannot_target_unnamed_steps() {
        let steps = vec![step("", &[], &["a"])];
        let err = build_partial_graph(&steps, &[String::new()]).unwrap_err();
        assert!(matches!(err, GraphError::UnresolvedTargets { .. }));
    }

    #[test]
    fn test_render_tree_indents_children() {
        let graph = build_graph(&xyz());
        assert_eq!(graph.render_tree(), "X\n  Y\n  Z\n");
    }

    #[test]
    fn test_render_tree_marks_cycles() {
        let steps = vec![
            step("root", &[], &["seed"]),
            step("b", &["seed", "c"], &["b"]),
            step("c", &["b"], &["c"]),
        ];
        let graph = build_graph(&steps);
        assert_eq!(graph.render_tree(), "root\n  b\n    c\n      b (cycle)\n");
    }

    #[test]
    fn test_find_by_name() {
        let graph = build_graph(&xyz());
        assert_eq!(graph.find("Y"), Some(1));
        assert_eq!(graph.find("W"), None);
        assert_eq!(graph.find(""), None);
    }
}
