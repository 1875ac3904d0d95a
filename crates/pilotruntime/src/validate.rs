use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use pilotcore::{NodeKind, ValidationReport, Violation, Workflow};
use std::collections::{HashMap, HashSet};

/// Check that a workflow is executable
///
/// Rules are applied in order: a single start node, no dangling edges or
/// duplicate ids, no cycles, every node reachable from start. All
/// violations are collected rather than stopping at the first one.
pub fn validate(workflow: &Workflow) -> ValidationReport {
    let mut report = ValidationReport::default();

    let starts: Vec<&str> = workflow
        .nodes
        .iter()
        .filter(|n| n.kind == NodeKind::Start)
        .map(|n| n.id.as_str())
        .collect();
    match starts.len() {
        0 => report.push(Violation::MissingStart),
        1 => {}
        _ => report.push(Violation::MultipleStarts {
            node_ids: starts.iter().map(|s| s.to_string()).collect(),
        }),
    }
    for start in &starts {
        if workflow.edges.iter().any(|e| e.target == *start) {
            report.push(Violation::StartHasIncoming {
                node_id: start.to_string(),
            });
        }
    }

    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut index: HashMap<&str, NodeIndex> = HashMap::new();
    for node in &workflow.nodes {
        if index.contains_key(node.id.as_str()) {
            report.push(Violation::DuplicateNode {
                node_id: node.id.clone(),
            });
            continue;
        }
        index.insert(&node.id, graph.add_node(&node.id));
    }

    for edge in &workflow.edges {
        let source = index.get(edge.source.as_str());
        let target = index.get(edge.target.as_str());
        for (endpoint, found) in [(&edge.source, source), (&edge.target, target)] {
            if found.is_none() {
                report.push(Violation::DanglingEdge {
                    source: edge.source.clone(),
                    target: edge.target.clone(),
                    missing: endpoint.clone(),
                });
            }
        }
        if let (Some(&s), Some(&t)) = (source, target) {
            graph.add_edge(s, t, ());
        }
    }

    for component in tarjan_scc(&graph) {
        let is_cycle = component.len() > 1
            || component
                .first()
                .is_some_and(|&idx| graph.find_edge(idx, idx).is_some());
        if is_cycle {
            let mut node_ids: Vec<String> =
                component.iter().map(|&idx| graph[idx].to_string()).collect();
            node_ids.sort();
            report.push(Violation::Cycle { node_ids });
        }
    }

    if let [start] = starts.as_slice() {
        if let Some(&root) = index.get(start) {
            let mut reachable = HashSet::new();
            let mut dfs = Dfs::new(&graph, root);
            while let Some(idx) = dfs.next(&graph) {
                reachable.insert(idx);
            }
            for node in &workflow.nodes {
                if let Some(idx) = index.get(node.id.as_str()) {
                    if !reachable.contains(idx) {
                        report.push(Violation::Unreachable {
                            node_id: node.id.clone(),
                        });
                    }
                }
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use pilotcore::{Edge, NodeSpec};

    fn linear() -> Workflow {
        let mut workflow = Workflow::new("linear");
        workflow.add_node(NodeSpec::new("start", NodeKind::Start));
        workflow.add_node(NodeSpec::new("llm", NodeKind::ModelCall));
        workflow.add_node(NodeSpec::new("out", NodeKind::Output));
        workflow.connect("start", "llm");
        workflow.connect("llm", "out");
        workflow
    }

    #[test]
    fn accepts_linear_graph() {
        assert!(validate(&linear()).is_valid());
    }

    #[test]
    fn requires_exactly_one_start() {
        let mut workflow = linear();
        workflow.nodes.retain(|n| n.kind != NodeKind::Start);
        workflow.edges.retain(|e| e.source != "start");
        let report = validate(&workflow);
        assert_eq!(report.violations[0], Violation::MissingStart);

        let workflow = linear().with_node(NodeSpec::new("start2", NodeKind::Start));
        let report = validate(&workflow);
        assert!(matches!(
            report.violations[0],
            Violation::MultipleStarts { ref node_ids } if node_ids.len() == 2
        ));
    }

    #[test]
    fn reports_dangling_edges() {
        let workflow = linear().with_edge(Edge::new("out", "ghost"));
        let report = validate(&workflow);
        assert!(report.violations.contains(&Violation::DanglingEdge {
            source: "out".into(),
            target: "ghost".into(),
            missing: "ghost".into(),
        }));
    }

    #[test]
    fn detects_cycles() {
        let workflow = linear().with_edge(Edge::new("out", "llm"));
        let report = validate(&workflow);
        assert!(report.has_cycle());
        assert!(report.violations.contains(&Violation::Cycle {
            node_ids: vec!["llm".into(), "out".into()],
        }));

        let workflow = linear().with_edge(Edge::new("out", "out"));
        assert!(validate(&workflow).has_cycle());
    }

    #[test]
    fn detects_unreachable_nodes() {
        let workflow = linear().with_node(NodeSpec::new("orphan", NodeKind::Code));
        let report = validate(&workflow);
        assert_eq!(
            report.violations,
            vec![Violation::Unreachable {
                node_id: "orphan".into()
            }]
        );
        assert!(report.to_string().contains("not reachable"));
    }
}
