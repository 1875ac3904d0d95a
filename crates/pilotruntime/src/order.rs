use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use pilotcore::{NodeSpec, Workflow, WorkflowError};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Compute the linear execution order of a workflow
///
/// Kahn's algorithm seeded with the zero in-degree nodes (after validation,
/// only the start node). Among nodes whose dependencies are satisfied at
/// the same time the smallest id goes first, so the order is reproducible.
pub fn resolve(workflow: &Workflow) -> Result<Vec<&NodeSpec>, WorkflowError> {
    let mut graph: DiGraph<&NodeSpec, ()> = DiGraph::with_capacity(
        workflow.nodes.len(),
        workflow.edges.len(),
    );
    let mut index: HashMap<&str, NodeIndex> = HashMap::new();
    for node in &workflow.nodes {
        index
            .entry(node.id.as_str())
            .or_insert_with(|| graph.add_node(node));
    }

    for edge in &workflow.edges {
        let source = index
            .get(edge.source.as_str())
            .ok_or_else(|| WorkflowError::NodeNotFound(edge.source.clone()))?;
        let target = index
            .get(edge.target.as_str())
            .ok_or_else(|| WorkflowError::NodeNotFound(edge.target.clone()))?;
        graph.add_edge(*source, *target, ());
    }

    let mut in_degree: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|idx| (idx, graph.neighbors_directed(idx, Direction::Incoming).count()))
        .collect();

    let mut ready: BinaryHeap<Reverse<(&str, NodeIndex)>> = in_degree
        .iter()
        .filter(|(_, &degree)| degree == 0)
        .map(|(&idx, _)| Reverse((graph[idx].id.as_str(), idx)))
        .collect();

    let mut order = Vec::with_capacity(graph.node_count());
    while let Some(Reverse((_, idx))) = ready.pop() {
        order.push(graph[idx]);
        for next in graph.neighbors_directed(idx, Direction::Outgoing) {
            if let Some(degree) = in_degree.get_mut(&next) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse((graph[next].id.as_str(), next)));
                }
            }
        }
    }

    if order.len() != graph.node_count() {
        return Err(WorkflowError::CyclicGraph);
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pilotcore::{Edge, NodeKind};

    fn ids(order: &[&NodeSpec]) -> Vec<String> {
        order.iter().map(|n| n.id.clone()).collect()
    }

    fn diamond() -> Workflow {
        let mut workflow = Workflow::new("diamond");
        // Declared out of order on purpose
        workflow.add_node(NodeSpec::new("join", NodeKind::Output));
        workflow.add_node(NodeSpec::new("b", NodeKind::Code));
        workflow.add_node(NodeSpec::new("a", NodeKind::Code));
        workflow.add_node(NodeSpec::new("start", NodeKind::Start));
        workflow.connect("start", "b");
        workflow.connect("start", "a");
        workflow.connect("a", "join");
        workflow.connect("b", "join");
        workflow
    }

    #[test]
    fn breaks_ties_by_ascending_id() {
        let workflow = diamond();
        let order = resolve(&workflow).unwrap();
        assert_eq!(ids(&order), vec!["start", "a", "b", "join"]);
    }

    #[test]
    fn respects_every_edge_and_is_deterministic() {
        let mut workflow = diamond();
        workflow.add_node(NodeSpec::new("c", NodeKind::Code));
        workflow.connect("b", "c");
        workflow.connect("c", "join");

        let first = ids(&resolve(&workflow).unwrap());
        let second = ids(&resolve(&workflow).unwrap());
        assert_eq!(first, second);

        let position = |id: &str| first.iter().position(|n| n == id).unwrap();
        for edge in &workflow.edges {
            assert!(position(&edge.source) < position(&edge.target), "{:?}", edge);
        }
    }

    #[test]
    fn rejects_cycles_independently_of_validation() {
        let workflow = diamond().with_edge(Edge::new("join", "a"));
        assert!(matches!(resolve(&workflow), Err(WorkflowError::CyclicGraph)));
    }

    #[test]
    fn rejects_unknown_endpoints() {
        let workflow = diamond().with_edge(Edge::new("join", "ghost"));
        assert!(matches!(
            resolve(&workflow),
            Err(WorkflowError::NodeNotFound(id)) if id == "ghost"
        ));
    }
}
