//! Annotated flow graphs.
//!
//! [`AnnotatedGraphBuilder`] turns a flat concrete flow graph into a
//! bipartite DAG of *actions* (function calls, or collapsed groups of
//! unannotated calls) and *entities* (the objects flowing between them).
//! An edge from an entity to an action makes the entity an input of the
//! action; an edge from an action to an entity makes it an output.
//!
//! The build runs as a fixed sequence of passes over a copy of the input:
//!
//! 1. the `Input`/`Output` markers become placeholder actions, keeping only
//!    the boundary edges that touch an annotated call;
//! 2. annotated calls materialize input/output tables from their annotated
//!    ports, one entry per object;
//! 3. every edge gets an object id;
//! 4. chains of unannotated calls are collapsed wherever that cannot
//!    connect two annotated calls that were not already connected;
//! 5. object tables and edges are reified as entity nodes;
//! 6. dangling unannotated actions and the entities they leave behind are
//!    removed;
//! 7. parallel edges around the remaining unannotated actions are merged.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::{debug, trace, warn};

use tracegraph_core::ops::{
    collapse_subgraph, dedup_parallel_edges, insert_before_successors, transitive_closure,
};
use tracegraph_core::{
    ActionNode, AnnotatedEdge, AnnotatedGraph, AnnotatedNode, CallNode, CoreError, EdgeId,
    EntityData, EntityNode, FlowNode, Multigraph, NodeId, ObjectId, PortKind,
};
use tracegraph_flow::FlowGraph;

use crate::error::AnnotateError;

/// Label of the placeholder action standing in for the `Input` marker.
pub const SOURCE_LABEL: &str = "__source__";
/// Label of the placeholder action standing in for the `Output` marker.
pub const SINK_LABEL: &str = "__sink__";

/// Builds annotated flow graphs from flat concrete flow graphs.
///
/// The builder holds no state between builds; building the same flow graph
/// twice yields isomorphic results.
#[derive(Debug, Clone, Default)]
pub struct AnnotatedGraphBuilder;

impl AnnotatedGraphBuilder {
    pub fn new() -> Self {
        AnnotatedGraphBuilder
    }

    /// Builds the annotated graph of `flow`.
    ///
    /// Fails with [`AnnotateError::NestedCall`] if a call still carries a
    /// nested body.
    pub fn build(&self, flow: &FlowGraph) -> Result<AnnotatedGraph, AnnotateError> {
        let mut work = Work::copy(flow)?;
        let collapsed = work.collapse_unannotated_actions()?;
        work.reify_entities()?;
        let dangling = work.remove_dangling_actions() + work.remove_dangling_entities();
        let duplicates = work.remove_duplicate_edges();

        let graph = work.graph;
        debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            collapsed,
            dangling,
            duplicates,
            "built annotated graph"
        );
        Ok(graph)
    }
}

// ---------------------------------------------------------------------------
// Object tables
// ---------------------------------------------------------------------------

/// An object awaiting reification as an entity.
#[derive(Debug, Clone)]
struct Pending {
    data: EntityData,
    /// Ports of the action the object passes through.
    ports: SmallVec<[String; 2]>,
    /// Entities already feeding the object into the action.
    predecessors: SmallVec<[NodeId; 2]>,
}

impl Pending {
    fn new(data: EntityData) -> Self {
        Pending {
            data,
            ports: SmallVec::new(),
            predecessors: SmallVec::new(),
        }
    }
}

type ObjectTable = IndexMap<ObjectId, Pending>;

#[derive(Debug, Default)]
struct Tables {
    inputs: ObjectTable,
    outputs: ObjectTable,
}

impl Tables {
    /// Tables of an annotated call, from the ports matched to its declared
    /// domain and codomain. Ports naming the same object share one entry.
    fn from_ports(call: &CallNode) -> Self {
        let mut tables = Tables::default();
        for (name, port) in &call.ports {
            if port.annotation_index.is_none() {
                continue;
            }
            let table = match port.portkind {
                PortKind::Input => &mut tables.inputs,
                PortKind::Output => &mut tables.outputs,
            };
            let mut data = port.entity_data();
            let id = data.id.get_or_insert_with(ObjectId::generate).clone();
            table
                .entry(id)
                .or_insert_with(|| Pending::new(data))
                .ports
                .push(port.argname.clone().unwrap_or_else(|| name.clone()));
        }
        tables
    }
}

// ---------------------------------------------------------------------------
// Build state
// ---------------------------------------------------------------------------

struct Work {
    graph: AnnotatedGraph,
    markers: [NodeId; 2],
    /// What the flow graph's edges record about each object.
    objects: HashMap<ObjectId, EntityData>,
    tables: HashMap<NodeId, Tables>,
}

impl Work {
    /// Copies calls, markers and the relevant edges of `flow`, keeping ids.
    fn copy(flow: &FlowGraph) -> Result<Self, AnnotateError> {
        let annotated = |id: NodeId| {
            flow.graph
                .node(id)
                .and_then(FlowNode::as_call)
                .is_some_and(|call| call.annotation.is_some())
        };

        let mut graph = AnnotatedGraph::new();
        let mut tables = HashMap::new();
        for (id, node) in flow.graph.nodes() {
            let action = match node {
                FlowNode::Input => placeholder(SOURCE_LABEL),
                FlowNode::Output => placeholder(SINK_LABEL),
                FlowNode::Call(call) => {
                    if call.graph.is_some() {
                        return Err(AnnotateError::NestedCall { node: id });
                    }
                    if call.annotation.is_some() {
                        tables.insert(id, Tables::from_ports(call));
                    }
                    ActionNode::new(call.annotation.clone())
                }
            };
            graph.add_node_with_id(id, AnnotatedNode::Action(action))?;
        }

        // An object leaving the source is kept when any of its consumers is
        // annotated; an object entering the sink when its producer is.
        let sourced: HashSet<&ObjectId> = flow
            .graph
            .out_edges(flow.input)
            .into_iter()
            .filter(|e| annotated(e.target))
            .filter_map(|e| e.data.id())
            .collect();

        let mut objects = HashMap::new();
        for edge in flow.graph.edges() {
            let keep = if edge.source == flow.input {
                match edge.data.id() {
                    Some(id) => sourced.contains(id),
                    None => annotated(edge.target),
                }
            } else if edge.target == flow.output {
                annotated(edge.source)
            } else {
                true
            };
            if !keep {
                continue;
            }
            let id = edge.data.id().cloned().unwrap_or_else(ObjectId::generate);
            objects.entry(id.clone()).or_insert_with(|| EntityData {
                id: Some(id.clone()),
                annotation: edge.data.object.annotation.clone(),
                value: edge.data.object.value.clone(),
                ..EntityData::default()
            });
            graph.add_edge_with_id(
                edge.id,
                edge.source,
                edge.target,
                AnnotatedEdge {
                    id: Some(id),
                    port: None,
                },
            )?;
        }

        Ok(Work {
            graph,
            markers: [flow.input, flow.output],
            objects,
            tables,
        })
    }

    fn object_data(&self, id: &ObjectId) -> EntityData {
        self.objects.get(id).cloned().unwrap_or_else(|| EntityData {
            id: Some(id.clone()),
            ..EntityData::default()
        })
    }

    fn is_collapsible(&self, node: NodeId) -> bool {
        !self.markers.contains(&node)
            && matches!(self.graph.node(node), Some(AnnotatedNode::Action(a)) if a.annotation.is_none())
    }

    // -----------------------------------------------------------------------
    // Collapsing
    // -----------------------------------------------------------------------

    /// Collapses unannotated actions into their unannotated successors.
    ///
    /// Actions are visited in reverse topological order. After a collapse
    /// the merged node is visited again, so whole chains fold into one node.
    fn collapse_unannotated_actions(&mut self) -> Result<usize, AnnotateError> {
        let mut closure = transitive_closure(&self.graph)?;
        let mut stack = self.graph.topological_order()?;
        let mut collapsed = 0;
        while let Some(parent) = stack.pop() {
            if !self.is_collapsible(parent) {
                continue;
            }
            let child = self
                .graph
                .successors(parent)
                .into_iter()
                .find(|c| self.is_collapsible(*c) && can_collapse(&self.graph, &closure, parent, *c));
            let Some(child) = child else { continue };

            let merged = NodeId::generate();
            let data = AnnotatedNode::Action(ActionNode::collapsed());
            collapse_subgraph(&mut self.graph, &[parent, child], merged, data)?;
            collapse_subgraph(&mut closure, &[parent, child], merged, ())?;
            close_over(&mut closure, merged)?;
            trace!(%parent, %child, %merged, "collapsed unannotated actions");
            stack.push(merged);
            collapsed += 1;
        }
        Ok(collapsed)
    }

    // -----------------------------------------------------------------------
    // Reification
    // -----------------------------------------------------------------------

    /// Reifies the inputs and outputs of every action as entities.
    ///
    /// Actions are visited in topological order, so the producer of an input
    /// has already turned it into an entity.
    fn reify_entities(&mut self) -> Result<(), AnnotateError> {
        for action in self.graph.topological_order()? {
            self.reify_inputs(action)?;
            self.reify_outputs(action)?;
        }
        Ok(())
    }

    fn reify_inputs(&mut self, action: NodeId) -> Result<(), AnnotateError> {
        let mut table = self
            .tables
            .get_mut(&action)
            .map(|t| std::mem::take(&mut t.inputs))
            .unwrap_or_default();
        for edge in self.graph.in_edges(action) {
            let id = edge.data.id.clone().unwrap_or_else(ObjectId::generate);
            let pending = table
                .entry(id.clone())
                .or_insert_with(|| Pending::new(self.object_data(&id)));
            if !pending.predecessors.contains(&edge.source) {
                pending.predecessors.push(edge.source);
            }
        }

        let collapsed = matches!(self.graph.node(action), Some(AnnotatedNode::Action(a)) if a.collapsed);
        for (id, pending) in table {
            let entity = match pending.predecessors.as_slice() {
                [single] => *single,
                [] => {
                    let entity = self.graph.add_node(AnnotatedNode::Entity(EntityNode::default()));
                    let link = AnnotatedEdge {
                        id: Some(id.clone()),
                        port: None,
                    };
                    self.graph.add_edge(entity, action, link)?;
                    entity
                }
                many => {
                    if !collapsed {
                        warn!(%action, object = %id, producers = many.len(), "ambiguous input left unresolved");
                    }
                    continue;
                }
            };
            if !pending.ports.is_empty() {
                self.attach_ports(entity, action, &id, &pending.ports)?;
            }
            // An entity produced by an unannotated action picks up the data
            // of the first annotated action consuming it.
            if let Some(AnnotatedNode::Entity(node)) = self.graph.node_mut(entity) {
                if node.annotation.is_none() {
                    absorb(node, pending.data);
                }
            }
        }
        Ok(())
    }

    fn reify_outputs(&mut self, action: NodeId) -> Result<(), AnnotateError> {
        let mut table = self
            .tables
            .get_mut(&action)
            .map(|t| std::mem::take(&mut t.outputs))
            .unwrap_or_default();
        for edge in self.graph.out_edges(action) {
            let id = edge.data.id.clone().unwrap_or_else(ObjectId::generate);
            table
                .entry(id.clone())
                .or_insert_with(|| Pending::new(self.object_data(&id)));
        }

        for (id, pending) in table {
            let entity = NodeId::generate();
            let link = AnnotatedEdge {
                id: Some(id.clone()),
                port: None,
            };
            insert_before_successors(
                &mut self.graph,
                action,
                entity,
                AnnotatedNode::Entity(EntityNode::from(pending.data)),
                link,
                |e| e.data.id.as_ref() == Some(&id),
            )?;
            if !pending.ports.is_empty() {
                self.attach_ports(action, entity, &id, &pending.ports)?;
            }
        }
        Ok(())
    }

    /// Replaces the edges carrying `id` from `source` to `target` by one edge
    /// per port.
    fn attach_ports(
        &mut self,
        source: NodeId,
        target: NodeId,
        id: &ObjectId,
        ports: &[String],
    ) -> Result<(), CoreError> {
        let stale: Vec<EdgeId> = self
            .graph
            .edges_between(source, target)
            .into_iter()
            .filter(|e| e.data.id.as_ref() == Some(id))
            .map(|e| e.id)
            .collect();
        for edge in stale {
            self.graph.remove_edge(edge);
        }
        for port in ports {
            let data = AnnotatedEdge {
                id: Some(id.clone()),
                port: Some(port.clone()),
            };
            self.graph.add_edge(source, target, data)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Cleanup
    // -----------------------------------------------------------------------

    /// Removes unannotated actions lacking predecessors or successors.
    /// The placeholder actions always qualify.
    fn remove_dangling_actions(&mut self) -> usize {
        let doomed: Vec<NodeId> = self
            .graph
            .nodes()
            .filter(|(id, node)| {
                node.is_action()
                    && !node.is_annotated()
                    && (self.graph.in_degree(*id) == 0 || self.graph.out_degree(*id) == 0)
            })
            .map(|(id, _)| id)
            .collect();
        for id in &doomed {
            self.graph.remove_node(*id);
        }
        doomed.len()
    }

    /// Removes entities with neither a predecessor nor an annotated
    /// successor, or with neither a successor nor an annotated predecessor.
    fn remove_dangling_entities(&mut self) -> usize {
        let any_annotated = |ids: Vec<NodeId>| {
            ids.into_iter()
                .any(|n| self.graph.node(n).is_some_and(AnnotatedNode::is_annotated))
        };
        let doomed: Vec<NodeId> = self
            .graph
            .nodes()
            .filter(|(id, node)| {
                node.is_entity()
                    && ((self.graph.in_degree(*id) == 0 && !any_annotated(self.graph.successors(*id)))
                        || (self.graph.out_degree(*id) == 0
                            && !any_annotated(self.graph.predecessors(*id))))
            })
            .map(|(id, _)| id)
            .collect();
        for id in &doomed {
            self.graph.remove_node(*id);
        }
        doomed.len()
    }

    /// Merges parallel edges around unannotated actions; collapsing can
    /// route several edges between the same pair of nodes.
    fn remove_duplicate_edges(&mut self) -> usize {
        let actions = self
            .graph
            .find_nodes(|node| node.is_action() && !node.is_annotated());
        actions
            .into_iter()
            .map(|action| dedup_parallel_edges(&mut self.graph, action))
            .sum()
    }
}

fn placeholder(label: &str) -> ActionNode {
    ActionNode {
        label: label.to_string(),
        ..ActionNode::default()
    }
}

/// Whether merging `child` into its predecessor `parent` keeps the
/// reachability relation among annotated nodes unchanged.
///
/// The merged node would let every annotated ancestor of `child` reach
/// every annotated descendant of `parent`; each of those pairs must already
/// be connected.
fn can_collapse(
    graph: &AnnotatedGraph,
    closure: &Multigraph<(), ()>,
    parent: NodeId,
    child: NodeId,
) -> bool {
    // A second route from parent to child would close a cycle through the
    // merged node.
    let detour = graph
        .successors(parent)
        .into_iter()
        .any(|s| s != child && closure.has_edge(s, child));
    if detour {
        return false;
    }
    let annotated = |n: &NodeId| graph.node(*n).is_some_and(AnnotatedNode::is_annotated);
    let descendants: Vec<NodeId> = closure
        .successors(parent)
        .into_iter()
        .filter(|n| annotated(n))
        .collect();
    closure
        .predecessors(child)
        .into_iter()
        .filter(|n| annotated(n))
        .all(|src| descendants.iter().all(|tgt| closure.has_edge(src, *tgt)))
}

/// Restores transitivity of `closure` around a freshly collapsed node.
fn close_over(closure: &mut Multigraph<(), ()>, node: NodeId) -> Result<(), CoreError> {
    let above = closure.predecessors(node);
    let below = closure.successors(node);
    for a in &above {
        for b in &below {
            if a != b && !closure.has_edge(*a, *b) {
                closure.add_edge(*a, *b, ())?;
            }
        }
    }
    Ok(())
}

/// Fills an unannotated entity from `data`, keeping what `data` lacks.
fn absorb(entity: &mut EntityNode, data: EntityData) {
    let previous = std::mem::take(entity);
    *entity = EntityNode::from(EntityData {
        id: data.id.or(previous.id),
        annotation: data.annotation.or(previous.annotation),
        value: data.value.or(previous.value),
        type_name: data.type_name.or(previous.type_name),
        slots: if data.slots.is_empty() {
            previous.slots
        } else {
            data.slots
        },
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracegraph_core::{AnnotationKey, FlowEdge, ObjectData, Port};

    fn key(id: &str) -> AnnotationKey {
        AnnotationKey::new("python", "test", id)
    }

    fn call(flow: &mut FlowGraph, name: &str, note: Option<&str>) -> NodeId {
        flow.graph.add_node(FlowNode::Call(CallNode {
            module: "m".into(),
            qualified_name: name.into(),
            ports: IndexMap::new(),
            slot: None,
            annotation: note.map(key),
            graph: None,
        }))
    }

    fn object(id: &str, note: &str) -> FlowEdge {
        FlowEdge {
            object: ObjectData {
                id: Some(ObjectId::new(id)),
                annotation: Some(key(note)),
                ..ObjectData::default()
            },
            source_port: None,
            target_port: None,
        }
    }

    fn link(flow: &mut FlowGraph, source: NodeId, target: NodeId, id: &str, note: &str) {
        flow.graph.add_edge(source, target, object(id, note)).unwrap();
    }

    fn port(kind: PortKind, argname: &str, id: &str, note: &str) -> Port {
        Port {
            argname: Some(argname.into()),
            annotation_index: Some(1),
            annotation: Some(key(note)),
            id: Some(ObjectId::new(id)),
            ..Port::new(kind)
        }
    }

    fn name(node: &AnnotatedNode) -> String {
        match node {
            AnnotatedNode::Action(a) if a.collapsed => "<collapsed>".into(),
            AnnotatedNode::Action(a) if a.label.is_empty() => "<action>".into(),
            AnnotatedNode::Entity(e) if e.label.is_empty() => "<entity>".into(),
            other => other.label().to_string(),
        }
    }

    type Shape = (usize, Vec<(String, String, Option<String>)>);

    /// Node count plus the sorted edge list, nodes named by label.
    fn shape(graph: &AnnotatedGraph) -> Shape {
        let mut edges: Vec<_> = graph
            .edges()
            .map(|e| {
                (
                    name(graph.node(e.source).unwrap()),
                    name(graph.node(e.target).unwrap()),
                    e.data.port.clone(),
                )
            })
            .collect();
        edges.sort();
        (graph.node_count(), edges)
    }

    fn path(nodes: &[&str]) -> Shape {
        let mut edges: Vec<_> = nodes
            .windows(2)
            .map(|w| (w[0].to_string(), w[1].to_string(), None))
            .collect();
        edges.sort();
        (nodes.len(), edges)
    }

    fn build(flow: &FlowGraph) -> AnnotatedGraph {
        AnnotatedGraphBuilder::new().build(flow).unwrap()
    }

    #[test]
    fn linear_annotated() {
        let mut flow = FlowGraph::new();
        let create = call(&mut flow, "create_foo", Some("create-foo"));
        let bar = call(&mut flow, "bar_from_foo", Some("bar-from-foo"));
        link(&mut flow, create, bar, "1", "foo");
        let output = flow.output;
        link(&mut flow, bar, output, "2", "bar");

        assert_eq!(
            shape(&build(&flow)),
            path(&["create-foo", "foo", "bar-from-foo", "bar"])
        );
    }

    #[test]
    fn linear_fully_annotated_ports() {
        let mut flow = FlowGraph::new();
        let create = call(&mut flow, "create_foo", Some("create-foo"));
        let bar = call(&mut flow, "bar_from_foo", Some("bar-from-foo"));
        for (node, ports) in [
            (create, vec![("__return__", port(PortKind::Output, "__return__", "1", "foo"))]),
            (
                bar,
                vec![
                    ("foo", port(PortKind::Input, "foo", "1", "foo")),
                    ("__return__", port(PortKind::Output, "__return__", "2", "bar")),
                ],
            ),
        ] {
            let call = flow.graph.node_mut(node).and_then(FlowNode::as_call_mut).unwrap();
            for (name, port) in ports {
                call.ports.insert(name.into(), port);
            }
        }
        link(&mut flow, create, bar, "1", "foo");

        let graph = build(&flow);
        let (count, edges) = shape(&graph);
        assert_eq!(count, 4);
        assert_eq!(
            edges,
            vec![
                ("bar-from-foo".into(), "bar".into(), Some("__return__".into())),
                ("create-foo".into(), "foo".into(), Some("__return__".into())),
                ("foo".into(), "bar-from-foo".into(), Some("foo".into())),
            ]
        );
    }

    #[test]
    fn dangling_unannotated_call_is_removed() {
        let mut flow = FlowGraph::new();
        let create = call(&mut flow, "create_foo", Some("create-foo"));
        let unknown = call(&mut flow, "unknown_foo", None);
        link(&mut flow, create, unknown, "1", "foo");

        assert_eq!(shape(&build(&flow)), path(&["create-foo", "foo"]));
    }

    #[test]
    fn unannotated_chain_collapses() {
        let mut flow = FlowGraph::new();
        let create = call(&mut flow, "create_foo", Some("create-foo"));
        let unknown_foo = call(&mut flow, "unknown_foo", None);
        let unknown_bar = call(&mut flow, "unknown_bar", None);
        let baz = call(&mut flow, "baz_from_bar", Some("baz-from-bar"));
        link(&mut flow, create, unknown_foo, "1", "foo");
        link(&mut flow, unknown_foo, unknown_bar, "2", "foo");
        link(&mut flow, unknown_bar, baz, "3", "bar");
        let output = flow.output;
        link(&mut flow, baz, output, "4", "baz");

        let graph = build(&flow);
        assert_eq!(
            shape(&graph),
            path(&["create-foo", "foo", "<collapsed>", "bar", "baz-from-bar", "baz"])
        );
        assert!(graph.is_acyclic());
    }

    #[test]
    fn multipath_does_not_collapse() {
        let mut flow = FlowGraph::new();
        let unknown_foo = call(&mut flow, "unknown_foo", None);
        let bar = call(&mut flow, "bar_from_foo", Some("bar-from-foo"));
        let unknown_foo_bar = call(&mut flow, "unknown_foo_bar", None);
        link(&mut flow, unknown_foo, bar, "1", "foo");
        link(&mut flow, unknown_foo, unknown_foo_bar, "1", "foo");
        link(&mut flow, bar, unknown_foo_bar, "2", "bar");

        assert_eq!(shape(&build(&flow)), path(&["foo", "bar-from-foo", "bar"]));
    }

    #[test]
    fn longer_multipath_does_not_collapse() {
        let mut flow = FlowGraph::new();
        let unknown_foo_1 = call(&mut flow, "unknown_foo_1", None);
        let unknown_foo_2 = call(&mut flow, "unknown_foo_2", None);
        let bar = call(&mut flow, "bar_from_foo", Some("bar-from-foo"));
        let unknown_bar = call(&mut flow, "unknown_bar", None);
        let unknown_foo_bar = call(&mut flow, "unknown_foo_bar", None);
        link(&mut flow, unknown_foo_1, unknown_foo_2, "1", "foo");
        link(&mut flow, unknown_foo_2, bar, "2", "foo");
        link(&mut flow, bar, unknown_bar, "3", "bar");
        link(&mut flow, unknown_foo_1, unknown_foo_bar, "1", "foo");
        link(&mut flow, unknown_bar, unknown_foo_bar, "4", "bar");

        assert_eq!(shape(&build(&flow)), path(&["foo", "bar-from-foo", "bar"]));
    }

    #[test]
    fn unannotated_mutation_yields_two_versions() {
        let mut flow = FlowGraph::new();
        let create = call(&mut flow, "create_foo", Some("create-foo"));
        let get_attr = call(&mut flow, "get_foo_attr", None);
        let mutate = call(&mut flow, "mutate_foo", None);
        let bar = call(&mut flow, "bar_from_foo", Some("bar-from-foo"));
        link(&mut flow, create, get_attr, "1", "foo");
        link(&mut flow, create, mutate, "1", "foo");
        link(&mut flow, mutate, bar, "1", "foo");
        let output = flow.output;
        link(&mut flow, mutate, output, "1", "foo");
        link(&mut flow, get_attr, output, "2", "foo-attr");
        link(&mut flow, bar, output, "3", "bar");

        assert_eq!(
            shape(&build(&flow)),
            path(&["create-foo", "foo", "<action>", "foo", "bar-from-foo", "bar"])
        );
    }

    #[test]
    fn annotated_mutation_leaves_collapsed_reader_unresolved() {
        let mut flow = FlowGraph::new();
        let create = call(&mut flow, "create_foo", Some("create-foo"));
        let get_attr = call(&mut flow, "get_foo_attr", None);
        let mutate = call(&mut flow, "mutate_foo", Some("mutate-foo"));
        let unknown = call(&mut flow, "unknown_foo", None);
        link(&mut flow, create, get_attr, "1", "foo");
        link(&mut flow, create, mutate, "1", "foo");
        link(&mut flow, mutate, unknown, "1", "foo");
        link(&mut flow, get_attr, unknown, "2", "foo-attr");
        let output = flow.output;
        link(&mut flow, mutate, output, "1", "foo");
        link(&mut flow, get_attr, output, "2", "foo-attr");

        assert_eq!(
            shape(&build(&flow)),
            path(&["create-foo", "foo", "mutate-foo", "foo"])
        );
    }

    #[test]
    fn unannotated_sources_are_dropped() {
        let mut flow = FlowGraph::new();
        let unknown = call(&mut flow, "unknown", None);
        let known = call(&mut flow, "known", Some("known"));
        let input = flow.input;
        link(&mut flow, input, unknown, "x", "foo");
        link(&mut flow, input, known, "y", "bar");

        let graph = build(&flow);
        assert_eq!(shape(&graph), path(&["bar", "known"]));
        assert!(graph
            .nodes()
            .all(|(_, n)| n.label() != SOURCE_LABEL && n.label() != SINK_LABEL));
    }

    #[test]
    fn rebuilding_is_idempotent() {
        let mut flow = FlowGraph::new();
        let create = call(&mut flow, "create_foo", Some("create-foo"));
        let a = call(&mut flow, "a", None);
        let b = call(&mut flow, "b", None);
        let bar = call(&mut flow, "bar_from_foo", Some("bar-from-foo"));
        link(&mut flow, create, a, "1", "foo");
        link(&mut flow, a, b, "1", "foo");
        link(&mut flow, b, bar, "1", "foo");
        link(&mut flow, create, bar, "1", "foo");

        let builder = AnnotatedGraphBuilder::new();
        let first = builder.build(&flow).unwrap();
        let second = builder.build(&flow).unwrap();
        assert_eq!(shape(&first), shape(&second));
    }

    #[test]
    fn nested_calls_are_rejected() {
        let mut flow = FlowGraph::new();
        let node = call(&mut flow, "outer", None);
        if let Some(FlowNode::Call(c)) = flow.graph.node_mut(node) {
            c.graph = Some(tracegraph_core::GraphHandle(1));
        }
        let err = AnnotatedGraphBuilder::new().build(&flow).unwrap_err();
        assert!(matches!(err, AnnotateError::NestedCall { node: n } if n == node));
    }

    #[test]
    fn absorb_keeps_existing_fields() {
        let mut entity = EntityNode::from(EntityData {
            id: Some(ObjectId::new("1")),
            value: Some(serde_json::json!(3)),
            ..EntityData::default()
        });
        absorb(
            &mut entity,
            EntityData {
                annotation: Some(key("foo")),
                ..EntityData::default()
            },
        );
        assert_eq!(entity.label, "foo");
        assert_eq!(entity.id, Some(ObjectId::new("1")));
        assert_eq!(entity.value, Some(serde_json::json!(3)));
    }
}
