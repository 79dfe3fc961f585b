//! Property tests for the annotated graph builder over random flow graphs.

use indexmap::IndexMap;
use proptest::prelude::*;

use tracegraph_core::ops::{bfs, Traversal, Visit};
use tracegraph_core::{
    AnnotatedGraph, AnnotatedNode, AnnotationKey, CallNode, FlowEdge, FlowNode, NodeId,
    ObjectData, ObjectId, Port, PortKind,
};
use tracegraph_flow::FlowGraph;
use tracegraph_semantic::{AnnotatedGraphBuilder, SINK_LABEL, SOURCE_LABEL};

/// Call `i` returns object `o{i}`; `links` are `(producer, consumer)` pairs
/// with `producer < consumer`.
#[derive(Debug, Clone)]
struct Dag {
    annotated: Vec<bool>,
    links: Vec<(usize, usize)>,
}

fn dag_strategy() -> impl Strategy<Value = Dag> {
    (2usize..8)
        .prop_flat_map(|n| {
            (
                prop::collection::vec(any::<bool>(), n),
                prop::collection::vec((0..n, 0..n), 0..2 * n),
            )
        })
        .prop_map(|(annotated, pairs)| {
            let mut links: Vec<(usize, usize)> = pairs
                .into_iter()
                .filter(|(a, b)| a != b)
                .map(|(a, b)| (a.min(b), a.max(b)))
                .collect();
            links.sort();
            links.dedup();
            Dag { annotated, links }
        })
}

fn key(id: String) -> AnnotationKey {
    AnnotationKey::new("python", "random", id)
}

fn object(i: usize) -> ObjectId {
    ObjectId::new(format!("o{}", i))
}

fn port(kind: PortKind, argname: &str, id: ObjectId, annotated: bool) -> Port {
    Port {
        argname: Some(argname.to_string()),
        annotation_index: annotated.then_some(1),
        id: Some(id),
        ..Port::new(kind)
    }
}

fn edge(i: usize) -> FlowEdge {
    FlowEdge {
        object: ObjectData {
            id: Some(object(i)),
            ..ObjectData::default()
        },
        source_port: Some("__return__".into()),
        target_port: Some(format!("a{}", i)),
    }
}

fn flow_graph(dag: &Dag) -> (FlowGraph, Vec<NodeId>) {
    let mut flow = FlowGraph::new();
    let mut calls = Vec::new();
    for (i, annotated) in dag.annotated.iter().enumerate() {
        let mut ports = IndexMap::new();
        ports.insert(
            "__return__".to_string(),
            port(PortKind::Output, "__return__", object(i), *annotated),
        );
        for (producer, _) in dag.links.iter().filter(|(_, c)| *c == i) {
            let name = format!("a{}", producer);
            ports.insert(name.clone(), port(PortKind::Input, &name, object(*producer), *annotated));
        }
        calls.push(flow.graph.add_node(FlowNode::Call(CallNode {
            module: "m".into(),
            qualified_name: format!("f{}", i),
            ports,
            slot: None,
            annotation: annotated.then(|| key(format!("f{}", i))),
            graph: None,
        })));
    }
    for &(producer, consumer) in &dag.links {
        flow.graph.add_edge(calls[producer], calls[consumer], edge(producer)).unwrap();
    }
    for (i, call) in calls.iter().enumerate() {
        let mut sink = edge(i);
        sink.target_port = None;
        flow.graph.add_edge(*call, flow.output, sink).unwrap();
    }
    (flow, calls)
}

fn reaches(graph: &AnnotatedGraph, from: NodeId, to: NodeId) -> bool {
    bfs(
        graph,
        from,
        Traversal::Forward,
        |node, depth| {
            if depth > 0 && node == to {
                Visit::Stop(())
            } else if depth > 0 && graph.node(node).is_some_and(AnnotatedNode::is_action) {
                Visit::Prune
            } else {
                Visit::Expand
            }
        },
        |_| true,
    )
    .found()
    .is_some()
}

fn shape(graph: &AnnotatedGraph) -> (usize, Vec<(String, String, Option<String>)>) {
    let mut edges: Vec<_> = graph
        .edges()
        .map(|e| {
            let label = |id| graph.node(id).map(|n| n.label().to_string()).unwrap_or_default();
            (label(e.source), label(e.target), e.data.port.clone())
        })
        .collect();
    edges.sort();
    (graph.node_count(), edges)
}

proptest! {
    #[test]
    fn annotated_graphs_are_bipartite_dags(dag in dag_strategy()) {
        let (flow, _) = flow_graph(&dag);
        let graph = AnnotatedGraphBuilder::new().build(&flow).unwrap();

        prop_assert!(graph.is_acyclic());
        for e in graph.edges() {
            let source = graph.node(e.source).unwrap();
            let target = graph.node(e.target).unwrap();
            prop_assert!(source.is_action() != target.is_action());
        }
        for (_, node) in graph.nodes() {
            prop_assert!(node.label() != SOURCE_LABEL && node.label() != SINK_LABEL);
        }
    }

    #[test]
    fn direct_annotated_links_survive(dag in dag_strategy()) {
        let (flow, calls) = flow_graph(&dag);
        let graph = AnnotatedGraphBuilder::new().build(&flow).unwrap();

        for (i, annotated) in dag.annotated.iter().enumerate() {
            if *annotated {
                prop_assert!(graph.contains_node(calls[i]));
            }
        }
        for &(producer, consumer) in &dag.links {
            if dag.annotated[producer] && dag.annotated[consumer] {
                prop_assert!(reaches(&graph, calls[producer], calls[consumer]));
            }
        }
    }

    #[test]
    fn building_is_deterministic(dag in dag_strategy()) {
        let (flow, _) = flow_graph(&dag);
        let builder = AnnotatedGraphBuilder::new();
        let first = builder.build(&flow).unwrap();
        let second = builder.build(&flow).unwrap();
        prop_assert_eq!(shape(&first), shape(&second));
    }
}
