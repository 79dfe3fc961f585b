//! Generic graph primitives used by the pipeline builders.
//!
//! Everything here is payload-agnostic: topology copy, subgraph collapse,
//! node insertion on a subset of edges, parallel-edge deduplication,
//! transitive closure and visitor-driven breadth-first search.

use std::collections::{HashSet, VecDeque};

use indexmap::IndexSet;

use crate::error::CoreError;
use crate::graph::{EdgeView, Multigraph};
use crate::id::NodeId;

/// Copies the node/edge structure of `graph` with default payloads.
///
/// Node and edge ids are preserved so the copy can be cross-referenced with
/// the source graph.
pub fn copy_topology<N, E, N2: Default, E2: Default>(graph: &Multigraph<N, E>) -> Multigraph<N2, E2> {
    let mut copy = graph.map(|_, _| N2::default(), |_| E2::default());
    copy.metadata.clear();
    copy
}

/// Replaces the nodes in `subgraph` by a single node `new_node`.
///
/// Edges crossing the subgraph boundary are re-attached to the new node with
/// their ids and payloads intact; edges internal to the subgraph are dropped.
pub fn collapse_subgraph<N, E: Clone>(
    graph: &mut Multigraph<N, E>,
    subgraph: &[NodeId],
    new_node: NodeId,
    data: N,
) -> Result<(), CoreError> {
    if graph.contains_node(new_node) {
        return Err(CoreError::DuplicateNode { id: new_node });
    }
    for id in subgraph {
        if !graph.contains_node(*id) {
            return Err(CoreError::NodeNotFound { id: *id });
        }
    }
    let members: HashSet<NodeId> = subgraph.iter().copied().collect();

    let mut boundary = Vec::new();
    for node in subgraph {
        for edge in graph.in_edges(*node) {
            if !members.contains(&edge.source) {
                boundary.push((edge.id, edge.source, new_node, edge.data.clone()));
            }
        }
        for edge in graph.out_edges(*node) {
            if !members.contains(&edge.target) {
                boundary.push((edge.id, new_node, edge.target, edge.data.clone()));
            }
        }
    }

    graph.add_node_with_id(new_node, data)?;
    for node in subgraph {
        graph.remove_node(*node);
    }
    for (id, source, target, data) in boundary {
        graph.add_edge_with_id(id, source, target, data)?;
    }
    Ok(())
}

/// Inserts `new_node` between `node` and the predecessors whose incoming
/// edges satisfy `select`.
///
/// Selected edges keep their ids and payloads but now end at `new_node`; a
/// fresh edge carrying `link` runs from `new_node` to `node`.
pub fn insert_after_predecessors<N, E: Clone>(
    graph: &mut Multigraph<N, E>,
    node: NodeId,
    new_node: NodeId,
    data: N,
    link: E,
    select: impl Fn(&EdgeView<'_, E>) -> bool,
) -> Result<(), CoreError> {
    if !graph.contains_node(node) {
        return Err(CoreError::NodeNotFound { id: node });
    }
    let moved: Vec<_> = graph
        .in_edges(node)
        .into_iter()
        .filter(|e| select(e))
        .map(|e| (e.id, e.source, e.data.clone()))
        .collect();
    graph.add_node_with_id(new_node, data)?;
    for (id, source, payload) in moved {
        graph.remove_edge(id);
        graph.add_edge_with_id(id, source, new_node, payload)?;
    }
    graph.add_edge(new_node, node, link)?;
    Ok(())
}

/// Inserts `new_node` between `node` and the successors whose outgoing
/// edges satisfy `select`.
///
/// Selected edges keep their ids and payloads but now start at `new_node`;
/// a fresh edge carrying `link` runs from `node` to `new_node`.
pub fn insert_before_successors<N, E: Clone>(
    graph: &mut Multigraph<N, E>,
    node: NodeId,
    new_node: NodeId,
    data: N,
    link: E,
    select: impl Fn(&EdgeView<'_, E>) -> bool,
) -> Result<(), CoreError> {
    if !graph.contains_node(node) {
        return Err(CoreError::NodeNotFound { id: node });
    }
    let moved: Vec<_> = graph
        .out_edges(node)
        .into_iter()
        .filter(|e| select(e))
        .map(|e| (e.id, e.target, e.data.clone()))
        .collect();
    graph.add_node_with_id(new_node, data)?;
    for (id, target, payload) in moved {
        graph.remove_edge(id);
        graph.add_edge_with_id(id, new_node, target, payload)?;
    }
    graph.add_edge(node, new_node, link)?;
    Ok(())
}

/// Collapses parallel edges incident to `node`, keeping the first edge to or
/// from each neighbour. Returns the number of edges removed.
pub fn dedup_parallel_edges<N, E>(graph: &mut Multigraph<N, E>, node: NodeId) -> usize {
    let mut doomed = Vec::new();
    let mut seen_sources = HashSet::new();
    for edge in graph.in_edges(node) {
        if !seen_sources.insert(edge.source) {
            doomed.push(edge.id);
        }
    }
    let mut seen_targets = HashSet::new();
    for edge in graph.out_edges(node) {
        if !seen_targets.insert(edge.target) {
            doomed.push(edge.id);
        }
    }
    doomed.dedup();
    let removed = doomed.len();
    for id in doomed {
        graph.remove_edge(id);
    }
    removed
}

/// Transitive closure of an acyclic graph: an edge `u -> v` exists iff `v`
/// is reachable from `u` by a non-empty path. Node ids are preserved.
pub fn transitive_closure<N, E>(graph: &Multigraph<N, E>) -> Result<Multigraph<(), ()>, CoreError> {
    let order = graph.topological_order()?;
    let mut closure: Multigraph<(), ()> = copy_topology(graph);
    for id in closure.edges().map(|e| e.id).collect::<Vec<_>>() {
        closure.remove_edge(id);
    }

    let mut reach: std::collections::HashMap<NodeId, IndexSet<NodeId>> = Default::default();
    for node in order.iter().rev() {
        let mut descendants = IndexSet::new();
        for succ in graph.successors(*node) {
            descendants.insert(succ);
            if let Some(below) = reach.get(&succ) {
                descendants.extend(below.iter().copied());
            }
        }
        reach.insert(*node, descendants);
    }
    for node in &order {
        for target in &reach[node] {
            closure.add_edge(*node, *target, ())?;
        }
    }
    Ok(closure)
}

// ---------------------------------------------------------------------------
// Breadth-first search
// ---------------------------------------------------------------------------

/// Which edges a search follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Traversal {
    /// Follow edges from source to target.
    Forward,
    /// Follow edges from target to source.
    Reverse,
    /// Follow edges in both directions.
    Undirected,
}

/// Verdict of a node visitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visit<T> {
    /// Keep searching beyond this node.
    Expand,
    /// Do not search beyond this node.
    Prune,
    /// Stop the whole search with a result.
    Stop(T),
}

/// Outcome of a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Search<T> {
    Found(T),
    NotFound,
}

impl<T> Search<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Search::Found(value) => Some(value),
            Search::NotFound => None,
        }
    }
}

/// Breadth-first search from `start`.
///
/// `visit_node` is called once per reached node (including `start`) with the
/// node id and its depth; `follow_edge` decides whether an edge is traversed.
/// The search ends as soon as a node visitor returns [`Visit::Stop`].
pub fn bfs<N, E, T>(
    graph: &Multigraph<N, E>,
    start: NodeId,
    traversal: Traversal,
    mut visit_node: impl FnMut(NodeId, usize) -> Visit<T>,
    mut follow_edge: impl FnMut(&EdgeView<'_, E>) -> bool,
) -> Search<T> {
    if !graph.contains_node(start) {
        return Search::NotFound;
    }
    let mut seen = HashSet::from([start]);
    let mut queue = VecDeque::from([(start, 0usize)]);
    while let Some((node, depth)) = queue.pop_front() {
        match visit_node(node, depth) {
            Visit::Stop(value) => return Search::Found(value),
            Visit::Prune => continue,
            Visit::Expand => {}
        }
        let mut next = Vec::new();
        if matches!(traversal, Traversal::Forward | Traversal::Undirected) {
            for edge in graph.out_edges(node) {
                if follow_edge(&edge) {
                    next.push(edge.target);
                }
            }
        }
        if matches!(traversal, Traversal::Reverse | Traversal::Undirected) {
            for edge in graph.in_edges(node) {
                if follow_edge(&edge) {
                    next.push(edge.source);
                }
            }
        }
        for neighbour in next {
            if seen.insert(neighbour) {
                queue.push_back((neighbour, depth + 1));
            }
        }
    }
    Search::NotFound
}

#[cfg(test)]
mod tests {
    use super::*;

    /// a -> b -> c -> d with an extra a -> c shortcut.
    fn diamondish() -> (Multigraph<&'static str, &'static str>, Vec<NodeId>) {
        let mut g = Multigraph::new();
        let ids: Vec<NodeId> = ["a", "b", "c", "d"].iter().map(|n| g.add_node(*n)).collect();
        g.add_edge(ids[0], ids[1], "ab").unwrap();
        g.add_edge(ids[1], ids[2], "bc").unwrap();
        g.add_edge(ids[2], ids[3], "cd").unwrap();
        g.add_edge(ids[0], ids[2], "ac").unwrap();
        (g, ids)
    }

    #[test]
    fn copy_topology_keeps_ids_and_drops_payloads() {
        let (g, ids) = diamondish();
        let copy: Multigraph<u8, u8> = copy_topology(&g);
        assert_eq!(copy.node_count(), 4);
        assert_eq!(copy.edge_count(), 4);
        assert_eq!(copy.node(ids[0]), Some(&0));
        assert!(copy.has_edge(ids[0], ids[2]));
    }

    #[test]
    fn collapse_subgraph_rewires_boundary() {
        let (mut g, ids) = diamondish();
        let merged = NodeId::generate();
        collapse_subgraph(&mut g, &[ids[1], ids[2]], merged, "bc").unwrap();
        assert_eq!(g.node_count(), 3);
        let labels: Vec<&str> = g.in_edges(merged).iter().map(|e| *e.data).collect();
        assert_eq!(labels, vec!["ab", "ac"]);
        let out: Vec<&str> = g.out_edges(merged).iter().map(|e| *e.data).collect();
        assert_eq!(out, vec!["cd"]);
        assert!(!g.contains_node(ids[1]));
    }

    #[test]
    fn collapse_subgraph_rejects_existing_id() {
        let (mut g, ids) = diamondish();
        let err = collapse_subgraph(&mut g, &[ids[1]], ids[0], "x").unwrap_err();
        assert!(matches!(err, CoreError::DuplicateNode { .. }));
        assert_eq!(g.node_count(), 4);
    }

    #[test]
    fn insert_before_successors_moves_selected_edges() {
        let (mut g, ids) = diamondish();
        let mid = NodeId::generate();
        insert_before_successors(&mut g, ids[0], mid, "mid", "a-mid", |e| *e.data == "ac").unwrap();
        assert_eq!(g.successors(ids[0]), vec![ids[1], mid]);
        assert_eq!(g.successors(mid), vec![ids[2]]);
        assert_eq!(*g.edges_between(mid, ids[2])[0].data, "ac");
    }

    #[test]
    fn insert_after_predecessors_moves_selected_edges() {
        let (mut g, ids) = diamondish();
        let mid = NodeId::generate();
        insert_after_predecessors(&mut g, ids[2], mid, "mid", "mid-c", |e| e.source == ids[1]).unwrap();
        assert_eq!(g.predecessors(ids[2]), vec![ids[0], mid]);
        assert_eq!(g.predecessors(mid), vec![ids[1]]);
    }

    #[test]
    fn dedup_parallel_edges_keeps_first() {
        let mut g: Multigraph<(), u8> = Multigraph::new();
        let a = g.add_node(());
        let b = g.add_node(());
        let c = g.add_node(());
        g.add_edge(a, b, 1).unwrap();
        g.add_edge(a, b, 2).unwrap();
        g.add_edge(b, c, 3).unwrap();
        g.add_edge(b, c, 4).unwrap();
        assert_eq!(dedup_parallel_edges(&mut g, b), 2);
        assert_eq!(*g.edges_between(a, b)[0].data, 1);
        assert_eq!(*g.edges_between(b, c)[0].data, 3);
    }

    #[test]
    fn transitive_closure_adds_reachability() {
        let (g, ids) = diamondish();
        let closure = transitive_closure(&g).unwrap();
        assert!(closure.has_edge(ids[0], ids[3]));
        assert!(closure.has_edge(ids[1], ids[3]));
        assert!(!closure.has_edge(ids[3], ids[0]));
        assert_eq!(closure.out_degree(ids[0]), 3);
        assert_eq!(closure.edges_between(ids[0], ids[2]).len(), 1);
    }

    #[test]
    fn bfs_finds_nearest_match() {
        let (g, ids) = diamondish();
        let result = bfs(
            &g,
            ids[0],
            Traversal::Forward,
            |node, depth| {
                if node == ids[2] {
                    Visit::Stop(depth)
                } else {
                    Visit::Expand
                }
            },
            |_| true,
        );
        assert_eq!(result, Search::Found(1));
    }

    #[test]
    fn bfs_respects_pruning_and_edge_filter() {
        let (g, ids) = diamondish();
        let target = ids[3];
        let pruned = bfs(
            &g,
            ids[0],
            Traversal::Forward,
            |node, _| {
                if node == target {
                    Visit::Stop(())
                } else if node == ids[2] {
                    Visit::Prune
                } else {
                    Visit::Expand
                }
            },
            |_| true,
        );
        assert_eq!(pruned, Search::NotFound);

        let reverse = bfs(
            &g,
            ids[3],
            Traversal::Reverse,
            |node, _| if node == ids[1] { Visit::Stop(node) } else { Visit::Expand },
            |e| *e.data != "ac",
        );
        assert_eq!(reverse.found(), Some(ids[1]));
    }

    #[test]
    fn bfs_undirected_reaches_siblings() {
        let mut g: Multigraph<(), ()> = Multigraph::new();
        let parent = g.add_node(());
        let left = g.add_node(());
        let right = g.add_node(());
        g.add_edge(parent, left, ()).unwrap();
        g.add_edge(parent, right, ()).unwrap();
        let found = bfs(
            &g,
            left,
            Traversal::Undirected,
            |node, depth| if node == right { Visit::Stop(depth) } else { Visit::Expand },
            |_| true,
        );
        assert_eq!(found, Search::Found(2));
    }
}
