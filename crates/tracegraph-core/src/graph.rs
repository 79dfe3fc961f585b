//! Multigraph: the directed multi-edge container shared by every pipeline
//! stage.
//!
//! [`Multigraph`] wraps a petgraph `StableGraph` and adds what the pipeline
//! needs on top of it:
//! - **Stable identity**: nodes and edges are addressed by generated
//!   [`NodeId`]/[`EdgeId`] tokens that are never reused, even after removal.
//! - **Deterministic order**: node, edge and per-node adjacency iteration
//!   follow insertion order.
//! - **Graph metadata**: a free-form key/value table carried alongside the
//!   node and edge payloads.
//!
//! The stage-specific payloads (`FlowNode`, `AnnotatedNode`, ...) are plugged
//! in as the `N`/`E` type parameters.

use indexmap::IndexMap;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use petgraph::{Directed, Direction};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;
use crate::id::{EdgeId, NodeId};

#[derive(Debug, Clone)]
struct NodeSlot<N> {
    id: NodeId,
    data: N,
}

#[derive(Debug, Clone)]
struct EdgeSlot<E> {
    id: EdgeId,
    data: E,
}

/// Borrowed view of one edge: its id, endpoints and payload.
#[derive(Debug)]
pub struct EdgeView<'a, E> {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub data: &'a E,
}

impl<E> Clone for EdgeView<'_, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for EdgeView<'_, E> {}

/// Directed multigraph with stable ids and insertion-ordered iteration.
#[derive(Debug, Clone)]
pub struct Multigraph<N, E> {
    inner: StableGraph<NodeSlot<N>, EdgeSlot<E>, Directed, u32>,
    nodes: IndexMap<NodeId, NodeIndex<u32>>,
    edges: IndexMap<EdgeId, EdgeIndex<u32>>,
    /// Graph-level attributes.
    pub metadata: IndexMap<String, serde_json::Value>,
}

impl<N, E> Default for Multigraph<N, E> {
    fn default() -> Self {
        Multigraph {
            inner: StableGraph::default(),
            nodes: IndexMap::new(),
            edges: IndexMap::new(),
            metadata: IndexMap::new(),
        }
    }
}

impl<N, E> Multigraph<N, E> {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Nodes
    // -----------------------------------------------------------------------

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node(&self, id: NodeId) -> Option<&N> {
        let idx = *self.nodes.get(&id)?;
        self.inner.node_weight(idx).map(|slot| &slot.data)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut N> {
        let idx = *self.nodes.get(&id)?;
        self.inner.node_weight_mut(idx).map(|slot| &mut slot.data)
    }

    /// Node ids in insertion order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Nodes with their payloads in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &N)> + '_ {
        self.nodes
            .iter()
            .filter_map(move |(id, idx)| self.inner.node_weight(*idx).map(|s| (*id, &s.data)))
    }

    /// Adds a node under a freshly generated id.
    pub fn add_node(&mut self, data: N) -> NodeId {
        let id = NodeId::generate();
        self.insert_node(id, data);
        id
    }

    /// Adds a node under a caller-chosen id.
    pub fn add_node_with_id(&mut self, id: NodeId, data: N) -> Result<NodeId, CoreError> {
        if self.nodes.contains_key(&id) {
            return Err(CoreError::DuplicateNode { id });
        }
        self.insert_node(id, data);
        Ok(id)
    }

    fn insert_node(&mut self, id: NodeId, data: N) {
        let idx = self.inner.add_node(NodeSlot { id, data });
        self.nodes.insert(id, idx);
    }

    /// Removes a node together with every incident edge.
    pub fn remove_node(&mut self, id: NodeId) -> Option<N> {
        let idx = self.nodes.shift_remove(&id)?;
        let incident: Vec<EdgeId> = self
            .inner
            .edges_directed(idx, Direction::Outgoing)
            .chain(self.inner.edges_directed(idx, Direction::Incoming))
            .map(|e| e.weight().id)
            .collect();
        for edge in incident {
            self.edges.shift_remove(&edge);
        }
        self.inner.remove_node(idx).map(|slot| slot.data)
    }

    fn index_of(&self, id: NodeId) -> Result<NodeIndex<u32>, CoreError> {
        self.nodes
            .get(&id)
            .copied()
            .ok_or(CoreError::NodeNotFound { id })
    }

    /// Finds nodes whose payload satisfies `pred`, in insertion order.
    pub fn find_nodes(&self, mut pred: impl FnMut(&N) -> bool) -> Vec<NodeId> {
        self.nodes()
            .filter(|(_, data)| pred(data))
            .map(|(id, _)| id)
            .collect()
    }

    // -----------------------------------------------------------------------
    // Edges
    // -----------------------------------------------------------------------

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains_edge(&self, id: EdgeId) -> bool {
        self.edges.contains_key(&id)
    }

    /// Adds an edge under a freshly generated id.
    pub fn add_edge(&mut self, source: NodeId, target: NodeId, data: E) -> Result<EdgeId, CoreError> {
        self.add_edge_with_id(EdgeId::generate(), source, target, data)
    }

    /// Adds an edge under a caller-chosen id.
    pub fn add_edge_with_id(
        &mut self,
        id: EdgeId,
        source: NodeId,
        target: NodeId,
        data: E,
    ) -> Result<EdgeId, CoreError> {
        if self.edges.contains_key(&id) {
            return Err(CoreError::DuplicateEdge { id });
        }
        let s = self.index_of(source)?;
        let t = self.index_of(target)?;
        let idx = self.inner.add_edge(s, t, EdgeSlot { id, data });
        self.edges.insert(id, idx);
        Ok(id)
    }

    pub fn remove_edge(&mut self, id: EdgeId) -> Option<E> {
        let idx = self.edges.shift_remove(&id)?;
        self.inner.remove_edge(idx).map(|slot| slot.data)
    }

    pub fn edge(&self, id: EdgeId) -> Option<EdgeView<'_, E>> {
        let idx = *self.edges.get(&id)?;
        self.view(idx)
    }

    pub fn edge_mut(&mut self, id: EdgeId) -> Option<&mut E> {
        let idx = *self.edges.get(&id)?;
        self.inner.edge_weight_mut(idx).map(|slot| &mut slot.data)
    }

    fn view(&self, idx: EdgeIndex<u32>) -> Option<EdgeView<'_, E>> {
        let (s, t) = self.inner.edge_endpoints(idx)?;
        let slot = self.inner.edge_weight(idx)?;
        Some(EdgeView {
            id: slot.id,
            source: self.inner[s].id,
            target: self.inner[t].id,
            data: &slot.data,
        })
    }

    /// All edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = EdgeView<'_, E>> + '_ {
        self.edges.values().filter_map(move |idx| self.view(*idx))
    }

    /// Outgoing edges of `node` in insertion order.
    pub fn out_edges(&self, node: NodeId) -> Vec<EdgeView<'_, E>> {
        self.directed_edges(node, Direction::Outgoing)
    }

    /// Incoming edges of `node` in insertion order.
    pub fn in_edges(&self, node: NodeId) -> Vec<EdgeView<'_, E>> {
        self.directed_edges(node, Direction::Incoming)
    }

    fn directed_edges(&self, node: NodeId, dir: Direction) -> Vec<EdgeView<'_, E>> {
        let Some(idx) = self.nodes.get(&node) else {
            return Vec::new();
        };
        let mut found: Vec<EdgeView<'_, E>> = self
            .inner
            .edges_directed(*idx, dir)
            .map(|e| EdgeView {
                id: e.weight().id,
                source: self.inner[e.source()].id,
                target: self.inner[e.target()].id,
                data: &e.weight().data,
            })
            .collect();
        found.sort_by_key(|e| self.edges.get_index_of(&e.id));
        found
    }

    /// Edges running from `source` to `target`.
    pub fn edges_between(&self, source: NodeId, target: NodeId) -> Vec<EdgeView<'_, E>> {
        self.out_edges(source)
            .into_iter()
            .filter(|e| e.target == target)
            .collect()
    }

    pub fn has_edge(&self, source: NodeId, target: NodeId) -> bool {
        !self.edges_between(source, target).is_empty()
    }

    pub fn in_degree(&self, node: NodeId) -> usize {
        self.in_edges(node).len()
    }

    pub fn out_degree(&self, node: NodeId) -> usize {
        self.out_edges(node).len()
    }

    /// Distinct successors of `node`, ordered by first connecting edge.
    pub fn successors(&self, node: NodeId) -> Vec<NodeId> {
        dedup_ordered(self.out_edges(node).iter().map(|e| e.target))
    }

    /// Distinct predecessors of `node`, ordered by first connecting edge.
    pub fn predecessors(&self, node: NodeId) -> Vec<NodeId> {
        dedup_ordered(self.in_edges(node).iter().map(|e| e.source))
    }

    // -----------------------------------------------------------------------
    // Whole-graph queries and transforms
    // -----------------------------------------------------------------------

    /// Topological order of all nodes; fails on the first cycle found.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, CoreError> {
        petgraph::algo::toposort(&self.inner, None)
            .map(|order| order.into_iter().map(|idx| self.inner[idx].id).collect())
            .map_err(|cycle| CoreError::Cycle {
                node: self.inner[cycle.node_id()].id,
            })
    }

    pub fn is_acyclic(&self) -> bool {
        self.topological_order().is_ok()
    }

    /// Copies the topology, preserving every node and edge id, while
    /// transforming payloads.
    pub fn map<N2, E2>(
        &self,
        mut node_map: impl FnMut(NodeId, &N) -> N2,
        mut edge_map: impl FnMut(EdgeView<'_, E>) -> E2,
    ) -> Multigraph<N2, E2> {
        let mut out = Multigraph::new();
        out.metadata = self.metadata.clone();
        for (id, data) in self.nodes() {
            out.insert_node(id, node_map(id, data));
        }
        for edge in self.edges() {
            let s = out.nodes[&edge.source];
            let t = out.nodes[&edge.target];
            let idx = out.inner.add_edge(
                s,
                t,
                EdgeSlot {
                    id: edge.id,
                    data: edge_map(edge),
                },
            );
            out.edges.insert(edge.id, idx);
        }
        out
    }
}

fn dedup_ordered(ids: impl Iterator<Item = NodeId>) -> Vec<NodeId> {
    let mut seen = indexmap::IndexSet::new();
    for id in ids {
        seen.insert(id);
    }
    seen.into_iter().collect()
}

// ---------------------------------------------------------------------------
// Interchange document
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct NodeRecord<N> {
    id: NodeId,
    data: N,
}

#[derive(Serialize, Deserialize)]
struct EdgeRecord<E> {
    id: EdgeId,
    source: NodeId,
    target: NodeId,
    data: E,
}

#[derive(Serialize, Deserialize)]
struct GraphDocument<N, E> {
    #[serde(default)]
    metadata: IndexMap<String, serde_json::Value>,
    nodes: Vec<NodeRecord<N>>,
    edges: Vec<EdgeRecord<E>>,
}

impl<N: Serialize, E: Serialize> Serialize for Multigraph<N, E> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let doc = GraphDocument {
            metadata: self.metadata.clone(),
            nodes: self
                .nodes()
                .map(|(id, data)| NodeRecord { id, data })
                .collect(),
            edges: self
                .edges()
                .map(|e| EdgeRecord {
                    id: e.id,
                    source: e.source,
                    target: e.target,
                    data: e.data,
                })
                .collect(),
        };
        doc.serialize(serializer)
    }
}

impl<'de, N: Deserialize<'de>, E: Deserialize<'de>> Deserialize<'de> for Multigraph<N, E> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let doc = GraphDocument::<N, E>::deserialize(deserializer)?;
        let mut graph = Multigraph::new();
        graph.metadata = doc.metadata;
        for node in doc.nodes {
            graph
                .add_node_with_id(node.id, node.data)
                .map_err(D::Error::custom)?;
        }
        for edge in doc.edges {
            graph
                .add_edge_with_id(edge.id, edge.source, edge.target, edge.data)
                .map_err(D::Error::custom)?;
        }
        Ok(graph)
    }
}
