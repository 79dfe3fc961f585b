//! Concrete flow graphs and the arena holding nested call bodies.
//!
//! A [`FlowGraph`] is one scope of a trace: call nodes plus the two boundary
//! markers. Objects with no known producer in the scope flow out of the
//! `Input` marker; objects still live at the end of the scope flow into the
//! `Output` marker. A call whose body was traced points to its body through
//! a [`GraphHandle`] into the [`TraceGraph`] arena.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use tracegraph_core::{
    CoreError, EdgeId, FlowEdge, FlowNode, GraphHandle, Multigraph, NodeId, ObjectId,
};

use crate::error::FlowError;

/// A single-scope concrete flow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowGraph {
    pub graph: Multigraph<FlowNode, FlowEdge>,
    pub input: NodeId,
    pub output: NodeId,
}

impl Default for FlowGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer of an object at the end of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Producer {
    pub node: NodeId,
    /// The edge from the producer into the `Output` marker.
    pub edge: EdgeId,
}

impl FlowGraph {
    /// Creates an empty graph holding only the boundary markers.
    pub fn new() -> Self {
        let mut graph = Multigraph::new();
        let input = graph.add_node(FlowNode::Input);
        let output = graph.add_node(FlowNode::Output);
        FlowGraph {
            graph,
            input,
            output,
        }
    }

    pub fn is_marker(&self, node: NodeId) -> bool {
        node == self.input || node == self.output
    }

    /// Number of call nodes.
    pub fn call_count(&self) -> usize {
        self.graph.node_count().saturating_sub(2)
    }

    /// Call nodes in insertion order.
    pub fn calls(&self) -> impl Iterator<Item = (NodeId, &tracegraph_core::CallNode)> + '_ {
        self.graph
            .nodes()
            .filter_map(|(id, node)| node.as_call().map(|call| (id, call)))
    }

    /// Current producer of every object flowing into `Output`.
    pub fn output_table(&self) -> IndexMap<ObjectId, Producer> {
        self.graph
            .in_edges(self.output)
            .into_iter()
            .filter_map(|edge| {
                edge.data.id().map(|id| {
                    (
                        id.clone(),
                        Producer {
                            node: edge.source,
                            edge: edge.id,
                        },
                    )
                })
            })
            .collect()
    }

    /// Copies every call node and every edge between call nodes into `dest`,
    /// keeping their ids.
    pub fn copy_calls_into(&self, dest: &mut FlowGraph) -> Result<(), CoreError> {
        for (id, node) in self.graph.nodes() {
            if !self.is_marker(id) {
                dest.graph.add_node_with_id(id, node.clone())?;
            }
        }
        for edge in self.graph.edges() {
            if !self.is_marker(edge.source) && !self.is_marker(edge.target) {
                dest.graph
                    .add_edge_with_id(edge.id, edge.source, edge.target, edge.data.clone())?;
            }
        }
        Ok(())
    }
}

/// Arena of flow graphs: the root scope and every nested call body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceGraph {
    pub graphs: Vec<FlowGraph>,
    pub root: GraphHandle,
}

impl Default for TraceGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceGraph {
    /// Creates an arena holding one empty root graph.
    pub fn new() -> Self {
        Self::from_root(FlowGraph::new())
    }

    pub fn from_root(root: FlowGraph) -> Self {
        TraceGraph {
            graphs: vec![root],
            root: GraphHandle(0),
        }
    }

    pub fn root(&self) -> &FlowGraph {
        &self.graphs[self.root.index()]
    }

    pub fn root_mut(&mut self) -> &mut FlowGraph {
        let index = self.root.index();
        &mut self.graphs[index]
    }

    pub fn get(&self, handle: GraphHandle) -> Option<&FlowGraph> {
        self.graphs.get(handle.index())
    }

    pub fn get_mut(&mut self, handle: GraphHandle) -> Option<&mut FlowGraph> {
        self.graphs.get_mut(handle.index())
    }

    /// Adds a graph to the arena and returns its handle.
    pub fn push(&mut self, graph: FlowGraph) -> GraphHandle {
        let handle = GraphHandle(self.graphs.len() as u32);
        self.graphs.push(graph);
        handle
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    /// Whether any call of the root graph has a nested body.
    pub fn is_flat(&self) -> bool {
        self.root().calls().all(|(_, call)| call.graph.is_none())
    }

    /// Checks the arena's structural invariants.
    ///
    /// Nesting must form a tree rooted at `root`: every handle is in range,
    /// referenced at most once, never refers to the root and always points
    /// to a later slot than the graph referencing it. Every graph must be
    /// acyclic.
    pub fn validate(&self) -> Result<(), FlowError> {
        let invalid = |reason: String| FlowError::InvalidGraph { reason };
        if self.get(self.root).is_none() {
            return Err(invalid(format!("root {} out of range", self.root)));
        }
        let mut parent: HashMap<GraphHandle, GraphHandle> = HashMap::new();
        for (index, flow) in self.graphs.iter().enumerate() {
            let this = GraphHandle(index as u32);
            if !flow.graph.contains_node(flow.input) || !flow.graph.contains_node(flow.output) {
                return Err(invalid(format!("{} is missing a boundary marker", this)));
            }
            if !flow.graph.is_acyclic() {
                return Err(invalid(format!("{} contains a cycle", this)));
            }
            for (_, call) in flow.calls() {
                let Some(child) = call.graph else { continue };
                if self.get(child).is_none() {
                    return Err(invalid(format!("{} refers to missing {}", this, child)));
                }
                if child == self.root || child.index() <= index {
                    return Err(invalid(format!("{} refers back to {}", this, child)));
                }
                if let Some(other) = parent.insert(child, this) {
                    return Err(invalid(format!(
                        "{} is nested in both {} and {}",
                        child, other, this
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use tracegraph_core::{CallNode, ObjectData};

    fn call(name: &str, graph: Option<GraphHandle>) -> FlowNode {
        FlowNode::Call(CallNode {
            module: "m".into(),
            qualified_name: name.into(),
            ports: IndexMap::new(),
            slot: None,
            annotation: None,
            graph,
        })
    }

    fn carrying(id: &str) -> FlowEdge {
        FlowEdge {
            object: ObjectData {
                id: Some(ObjectId::new(id)),
                ..ObjectData::default()
            },
            source_port: Some("__return__".into()),
            target_port: None,
        }
    }

    #[test]
    fn new_graph_has_only_markers() {
        let flow = FlowGraph::new();
        assert_eq!(flow.graph.node_count(), 2);
        assert_eq!(flow.call_count(), 0);
        assert!(flow.is_marker(flow.input) && flow.is_marker(flow.output));
    }

    #[test]
    fn output_table_lists_live_objects() {
        let mut flow = FlowGraph::new();
        let a = flow.graph.add_node(call("a", None));
        let edge = flow.graph.add_edge(a, flow.output, carrying("1")).unwrap();
        let table = flow.output_table();
        assert_eq!(table[&ObjectId::new("1")], Producer { node: a, edge });
    }

    #[test]
    fn validate_rejects_shared_and_backward_handles() {
        let mut trace = TraceGraph::new();
        let child = trace.push(FlowGraph::new());
        trace.root_mut().graph.add_node(call("a", Some(child)));
        assert!(trace.validate().is_ok());
        assert!(!trace.is_flat());

        trace.root_mut().graph.add_node(call("b", Some(child)));
        assert!(matches!(trace.validate(), Err(FlowError::InvalidGraph { .. })));

        let mut looped = TraceGraph::new();
        looped.root_mut().graph.add_node(call("self", Some(GraphHandle(0))));
        assert!(looped.validate().is_err());
    }

    #[test]
    fn trace_graph_serde_round_trip() {
        let mut trace = TraceGraph::new();
        let child = trace.push(FlowGraph::new());
        trace.root_mut().graph.add_node(call("a", Some(child)));
        let json = serde_json::to_string(&trace).unwrap();
        let back: TraceGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back.root().call_count(), 1);
        assert!(back.validate().is_ok());
    }
}
