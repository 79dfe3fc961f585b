//! Whole-graph operations on recorded traces: flattening nested call bodies
//! into one scope, and joining traces captured back to back.

use std::collections::HashMap;

use tracing::debug;

use tracegraph_core::{FlowEdge, FlowNode, GraphHandle, NodeId};

use crate::error::FlowError;
use crate::graph::{FlowGraph, TraceGraph};

/// Lifts every nested graph into the root scope.
///
/// Only atomic calls survive. Objects entering a call body are re-wired to
/// the call's producer of the same object, or to the root's `Input` marker;
/// objects leaving the body are re-wired to every consumer of the same
/// object downstream of the call. Body outputs with no such consumer are
/// dropped: they never escaped the call.
pub fn flatten(trace: &TraceGraph) -> Result<FlowGraph, FlowError> {
    trace.validate()?;
    // Children always live at later slots than their parent, so a reverse
    // sweep over the arena visits every body before the graph containing it.
    let mut flat: Vec<Option<FlowGraph>> = vec![None; trace.len()];
    for index in (0..trace.len()).rev() {
        let mut graph = trace.graphs[index].clone();
        let nested: Vec<(NodeId, GraphHandle)> = graph
            .calls()
            .filter_map(|(id, call)| call.graph.map(|handle| (id, handle)))
            .collect();
        for (node, handle) in nested {
            let body = flat
                .get_mut(handle.index())
                .and_then(Option::take)
                .ok_or_else(|| FlowError::InvalidGraph {
                    reason: format!("{} was already inlined", handle),
                })?;
            inline_body(&mut graph, node, &body)?;
        }
        flat[index] = Some(graph);
    }
    let root = flat
        .get_mut(trace.root.index())
        .and_then(Option::take)
        .ok_or_else(|| FlowError::InvalidGraph {
            reason: format!("root {} is nested in another graph", trace.root),
        })?;
    debug!(calls = root.call_count(), "flattened trace");
    Ok(root)
}

/// Replaces call `node` of `graph` by the (already flat) body of the call.
fn inline_body(graph: &mut FlowGraph, node: NodeId, body: &FlowGraph) -> Result<(), FlowError> {
    body.copy_calls_into(graph)?;

    let mut added = Vec::new();
    for edge in body.graph.out_edges(body.input) {
        // Every parent edge carrying the object comes from the same producer.
        let outer = graph
            .graph
            .in_edges(node)
            .into_iter()
            .find(|e| edge.data.id().is_some_and(|id| e.data.carries(id)));
        let (source, source_port) = match outer {
            Some(outer) => (outer.source, outer.data.source_port.clone()),
            None => (graph.input, None),
        };
        added.push((
            source,
            edge.target,
            FlowEdge {
                object: edge.data.object.clone(),
                source_port,
                target_port: edge.data.target_port.clone(),
            },
        ));
    }
    for edge in body.graph.in_edges(body.output) {
        for outer in graph.graph.out_edges(node) {
            if edge.data.id().is_some_and(|id| outer.data.carries(id)) {
                added.push((
                    edge.source,
                    outer.target,
                    FlowEdge {
                        object: edge.data.object.clone(),
                        source_port: edge.data.source_port.clone(),
                        target_port: outer.data.target_port.clone(),
                    },
                ));
            }
        }
    }

    for (source, target, data) in added {
        graph.graph.add_edge(source, target, data)?;
    }
    graph.graph.remove_node(node);
    Ok(())
}

/// Joins two traces captured sequentially, `second` right after `first`.
///
/// Inputs of `second` attach to the producer of the same object in `first`
/// (or to the `Input` marker); outputs of `second` replace the outputs of
/// `first` for the same object. Nested graphs of `second` are appended to
/// the arena under new handles.
pub fn join(first: &TraceGraph, second: &TraceGraph) -> Result<TraceGraph, FlowError> {
    first.validate()?;
    second.validate()?;
    let mut joined = first.clone();

    let mut handles: HashMap<GraphHandle, GraphHandle> = HashMap::new();
    for (index, graph) in second.graphs.iter().enumerate() {
        let handle = GraphHandle(index as u32);
        if handle != second.root {
            handles.insert(handle, joined.push(graph.clone()));
        }
    }
    for (index, graph) in second.graphs.iter().enumerate() {
        let handle = GraphHandle(index as u32);
        if let Some(graph_copy) = handles.get(&handle).and_then(|new| joined.get_mut(*new)) {
            let ids: Vec<NodeId> = graph.graph.node_ids().collect();
            remap_handles(graph_copy, &ids, &handles);
        }
    }

    let tail = second.root();
    let root = joined.root_mut();
    let outputs = root.output_table();
    tail.copy_calls_into(root)?;
    let copied: Vec<NodeId> = tail.calls().map(|(id, _)| id).collect();
    remap_handles(root, &copied, &handles);

    for edge in tail.graph.out_edges(tail.input) {
        let producer = edge.data.id().and_then(|id| outputs.get(id));
        let (source, source_port) = match producer {
            Some(producer) => (
                producer.node,
                root.graph
                    .edge(producer.edge)
                    .and_then(|e| e.data.source_port.clone()),
            ),
            None => (root.input, None),
        };
        root.graph.add_edge(
            source,
            edge.target,
            FlowEdge {
                object: edge.data.object.clone(),
                source_port,
                target_port: edge.data.target_port.clone(),
            },
        )?;
    }
    for edge in tail.graph.in_edges(tail.output) {
        if let Some(stale) = edge.data.id().and_then(|id| outputs.get(id)) {
            root.graph.remove_edge(stale.edge);
        }
        let output = root.output;
        root.graph.add_edge(edge.source, output, edge.data.clone())?;
    }
    let calls = root.call_count();
    debug!(calls, graphs = joined.len(), "joined traces");
    Ok(joined)
}

fn remap_handles(graph: &mut FlowGraph, nodes: &[NodeId], handles: &HashMap<GraphHandle, GraphHandle>) {
    for id in nodes {
        if let Some(FlowNode::Call(call)) = graph.graph.node_mut(*id) {
            call.graph = call.graph.and_then(|h| handles.get(&h).copied());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::FlowGraphBuilder;
    use crate::event::{CallEvent, ObjectRef, TraceEvent, TraceValue};
    use tracegraph_core::{FunctionRef, TypeRef};

    fn foo(id: &str) -> TraceValue {
        TraceValue::Object(ObjectRef::new(id, TypeRef::new("objects", "Foo")))
    }

    fn call(name: &str) -> CallEvent {
        CallEvent::new(FunctionRef::new("objects", name))
    }

    fn run(b: &mut FlowGraphBuilder, call: CallEvent, ret: TraceValue) {
        let ret = call.returning(ret);
        b.push_event(TraceEvent::Call(call)).unwrap();
        b.push_event(TraceEvent::Return(ret)).unwrap();
    }

    fn labelled_edges(flow: &FlowGraph) -> Vec<(String, String, String, Option<String>, Option<String>)> {
        let name = |id: NodeId| match flow.graph.node(id).unwrap() {
            FlowNode::Input => "IN".to_string(),
            FlowNode::Output => "OUT".to_string(),
            FlowNode::Call(c) => c.qualified_name.clone(),
        };
        let mut edges: Vec<_> = flow
            .graph
            .edges()
            .map(|e| {
                (
                    name(e.source),
                    name(e.target),
                    e.data.id().map(|id| id.to_string()).unwrap_or_default(),
                    e.data.source_port.clone(),
                    e.data.target_port.clone(),
                )
            })
            .collect();
        edges.sort();
        edges
    }

    /// `Foo.__init__(foo)`; `outer_bar_from_foo(foo)` whose body calls
    /// `inner_bar_from_foo(foo)`, whose body calls `bar_from_foo(foo)`.
    fn doubly_nested() -> TraceGraph {
        let mut b = FlowGraphBuilder::default();
        run(&mut b, call("Foo.__init__").arg("self", foo("1")), TraceValue::None);
        let outer = call("outer_bar_from_foo").traced().arg("foo", foo("1"));
        let inner = call("inner_bar_from_foo").traced().arg("foo", foo("1"));
        b.push_event(TraceEvent::Call(outer.clone())).unwrap();
        b.push_event(TraceEvent::Call(inner.clone())).unwrap();
        run(&mut b, call("bar_from_foo").arg("foo", foo("1")), foo("2"));
        b.push_event(TraceEvent::Return(inner.returning(foo("2")))).unwrap();
        b.push_event(TraceEvent::Return(outer.returning(foo("2")))).unwrap();
        b.into_graph()
    }

    #[test]
    fn flatten_doubly_nested() {
        let trace = doubly_nested();
        assert_eq!(trace.len(), 3);
        let flat = flatten(&trace).unwrap();
        assert_eq!(
            labelled_edges(&flat),
            vec![
                ("Foo.__init__".into(), "OUT".into(), "1".into(), Some("self!".into()), None),
                (
                    "Foo.__init__".into(),
                    "bar_from_foo".into(),
                    "1".into(),
                    Some("self!".into()),
                    Some("foo".into())
                ),
                ("bar_from_foo".into(), "OUT".into(), "2".into(), Some("__return__".into()), None),
            ]
        );
        assert!(flat.calls().all(|(_, c)| c.graph.is_none()));
    }

    #[test]
    fn flatten_drops_outputs_that_never_escape() {
        let mut b = FlowGraphBuilder::default();
        let outer = call("outer").traced();
        b.push_event(TraceEvent::Call(outer.clone())).unwrap();
        run(&mut b, call("make_temp"), foo("t"));
        run(&mut b, call("make_result"), foo("r"));
        b.push_event(TraceEvent::Return(outer.returning(foo("r")))).unwrap();

        let flat = flatten(&b.into_graph()).unwrap();
        assert_eq!(flat.call_count(), 2);
        assert_eq!(
            labelled_edges(&flat),
            vec![("make_result".into(), "OUT".into(), "r".into(), Some("__return__".into()), None)]
        );
    }

    #[test]
    fn flatten_unknown_body_inputs_come_from_root_input() {
        let mut b = FlowGraphBuilder::default();
        let outer = call("outer").traced();
        b.push_event(TraceEvent::Call(outer.clone())).unwrap();
        run(&mut b, call("use_global").arg("g", foo("g")), TraceValue::None);
        b.push_event(TraceEvent::Return(outer.returning(TraceValue::None))).unwrap();

        let flat = flatten(&b.into_graph()).unwrap();
        assert_eq!(
            labelled_edges(&flat),
            vec![("IN".into(), "use_global".into(), "g".into(), None, Some("g".into()))]
        );
    }

    #[test]
    fn join_links_second_inputs_to_first_outputs() {
        let mut a = FlowGraphBuilder::default();
        run(&mut a, call("Foo.__init__").arg("self", foo("1")), TraceValue::None);
        let mut b = FlowGraphBuilder::default();
        run(&mut b, call("bar_from_foo").arg("foo", foo("1")), foo("2"));
        run(&mut b, call("Foo.__setitem__").arg("self", foo("1")), TraceValue::None);

        let joined = join(&a.into_graph(), &b.into_graph()).unwrap();
        let root = joined.root();
        assert_eq!(
            labelled_edges(root),
            vec![
                (
                    "Foo.__init__".into(),
                    "Foo.__setitem__".into(),
                    "1".into(),
                    Some("self!".into()),
                    Some("self".into())
                ),
                (
                    "Foo.__init__".into(),
                    "bar_from_foo".into(),
                    "1".into(),
                    Some("self!".into()),
                    Some("foo".into())
                ),
                ("Foo.__setitem__".into(), "OUT".into(), "1".into(), Some("self!".into()), None),
                ("bar_from_foo".into(), "OUT".into(), "2".into(), Some("__return__".into()), None),
            ]
        );
    }

    #[test]
    fn join_remaps_nested_handles() {
        let first = doubly_nested();
        let second = doubly_nested();
        let joined = join(&first, &second).unwrap();
        assert_eq!(joined.len(), 5);
        assert!(joined.validate().is_ok());
        assert_eq!(flatten(&joined).unwrap().call_count(), 4);
    }

    #[test]
    fn join_rejects_root_out_of_range() {
        let mut good = FlowGraphBuilder::default();
        run(&mut good, call("Foo.__init__").arg("self", foo("1")), TraceValue::None);
        let good = good.into_graph();

        let mut doc = serde_json::to_value(TraceGraph::new()).unwrap();
        doc["root"] = serde_json::json!(7);
        let bad: TraceGraph = serde_json::from_value(doc).unwrap();

        assert!(matches!(join(&good, &bad), Err(FlowError::InvalidGraph { .. })));
        assert!(matches!(join(&bad, &good), Err(FlowError::InvalidGraph { .. })));
    }
}
