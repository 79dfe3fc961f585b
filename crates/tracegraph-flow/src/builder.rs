//! Builds concrete flow graphs from a stream of trace events.
//!
//! A flow graph is a directed acyclic multigraph: nodes are function calls,
//! edges are references to objects. The incoming edges of a call are its
//! arguments; the outgoing edges are its return values and the arguments it
//! mutated.
//!
//! The builder keeps a call stack with one [`CallFrame`] per open call. A
//! call whose body is traced (non-atomic) opens a new [`Scope`]: a nested
//! graph in the arena plus the scope's output table. The output table maps
//! every object to the call that last produced it, so that at any instant an
//! object is the output of at most one call.

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::{debug, trace};

use tracegraph_core::annotation::SlotSpec;
use tracegraph_core::{
    Annotation, Annotator, CallNode, EdgeId, EntityData, FlowEdge, FlowNode, FunctionRef,
    GraphHandle, NoAnnotations, NodeId, ObjectData, ObjectId, Payload, Port, PortKind, SlotRef,
    TypeRef,
};

use crate::error::FlowError;
use crate::event::{CallEvent, ObjectRef, ReturnEvent, TraceEvent, TraceValue};
use crate::graph::{FlowGraph, TraceGraph};
use crate::value::{get_slot, hidden_referents, is_primitive, json_clean};

/// Port name of a single return value.
pub const RETURN_PORT: &str = "__return__";

const MUTATING_METHODS: [&str; 3] = ["__init__", "__setattr__", "__setitem__"];
const ATTRIBUTE_GETTERS: [&str; 2] = ["__getattr__", "__getattribute__"];

/// Name of the output port for a mutated argument.
///
/// Port names are unique across inputs and outputs, so a mutated argument
/// gets a distinct name for its output side.
pub fn mutated_port_name(arg_name: &str) -> String {
    format!("{}!", arg_name)
}

/// Settings for [`FlowGraphBuilder`].
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Capture the annotated slots of objects when they are produced.
    pub store_slots: bool,
    /// Wire tracked objects held inside untracked container arguments.
    pub track_hidden_referents: bool,
}

impl Default for FlowConfig {
    fn default() -> Self {
        FlowConfig {
            store_slots: true,
            track_hidden_referents: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Builder state
// ---------------------------------------------------------------------------

/// Current producer of an object within a scope.
#[derive(Debug, Clone)]
struct OutputEntry {
    node: NodeId,
    port: String,
    /// The edge from `node` into the scope's `Output` marker.
    edge: EdgeId,
}

/// A graph being recorded into, with its output table.
#[derive(Debug, Clone)]
struct Scope {
    graph: GraphHandle,
    outputs: HashMap<ObjectId, OutputEntry>,
}

impl Scope {
    fn new(graph: GraphHandle) -> Self {
        Scope {
            graph,
            outputs: HashMap::new(),
        }
    }
}

/// One open call on the stack.
#[derive(Debug, Clone)]
struct CallFrame {
    event: CallEvent,
    /// Node recorded for the call in the enclosing scope's graph.
    node: NodeId,
    /// Scope of the call body, when the call is not atomic.
    scope: Option<Scope>,
}

/// Memo key for function annotations: module, qualified name and the full
/// name of the bound type, if any.
type FunctionKey = (String, String, Option<String>);

/// Builds a [`TraceGraph`] from call and return events.
///
/// Events must be pushed in the order they occurred; calls and returns must
/// nest like a stack.
#[derive(Debug)]
pub struct FlowGraphBuilder<A = NoAnnotations> {
    annotator: A,
    config: FlowConfig,
    arena: TraceGraph,
    root: Scope,
    stack: Vec<CallFrame>,
    function_notes: HashMap<FunctionKey, Option<Annotation>>,
    object_notes: HashMap<TypeRef, Option<Annotation>>,
}

impl Default for FlowGraphBuilder<NoAnnotations> {
    fn default() -> Self {
        Self::new(NoAnnotations)
    }
}

impl<A: Annotator> FlowGraphBuilder<A> {
    pub fn new(annotator: A) -> Self {
        Self::with_config(annotator, FlowConfig::default())
    }

    pub fn with_config(annotator: A, config: FlowConfig) -> Self {
        let arena = TraceGraph::new();
        let root = Scope::new(arena.root);
        FlowGraphBuilder {
            annotator,
            config,
            arena,
            root,
            stack: Vec::new(),
            function_notes: HashMap::new(),
            object_notes: HashMap::new(),
        }
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    pub fn annotator(&self) -> &A {
        &self.annotator
    }

    /// Number of calls currently open.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Snapshot of the graphs recorded so far.
    pub fn graph(&self) -> TraceGraph {
        self.arena.clone()
    }

    /// Consumes the builder, returning the recorded graphs.
    pub fn into_graph(self) -> TraceGraph {
        self.arena
    }

    /// Discards everything recorded so far. Annotation lookups stay cached.
    pub fn reset(&mut self) {
        self.arena = TraceGraph::new();
        self.root = Scope::new(self.arena.root);
        self.stack.clear();
    }

    /// Records one trace event.
    pub fn push_event(&mut self, event: TraceEvent) -> Result<(), FlowError> {
        match event {
            TraceEvent::Call(call) => self.push_call(call),
            TraceEvent::Return(ret) => self.push_return(ret),
        }
    }

    /// Records every event of a trace, in order.
    pub fn extend(&mut self, events: impl IntoIterator<Item = TraceEvent>) -> Result<(), FlowError> {
        for event in events {
            self.push_event(event)?;
        }
        Ok(())
    }

    /// Whether a call leaves the given argument unchanged.
    ///
    /// Calls are assumed pure unless the annotation's codomain lists the
    /// argument, or the argument is the receiver of `__init__`,
    /// `__setattr__` or `__setitem__`.
    pub fn is_pure(&self, call: &CallEvent, annotation: Option<&Annotation>, arg_name: &str) -> bool {
        if arg_name == "self" && MUTATING_METHODS.contains(&call.name()) {
            return false;
        }
        let codomain = annotation.map(|note| note.codomain.as_slice()).unwrap_or_default();
        !codomain
            .iter()
            .any(|spec| slot_name(call, &spec.slot).as_deref() == Some(arg_name))
    }

    /// Whether a value is captured as a literal payload.
    pub fn is_primitive(&self, value: &TraceValue) -> bool {
        is_primitive(value)
    }

    // -----------------------------------------------------------------------
    // Scopes
    // -----------------------------------------------------------------------

    fn scope(&self) -> &Scope {
        self.stack
            .iter()
            .rev()
            .find_map(|frame| frame.scope.as_ref())
            .unwrap_or(&self.root)
    }

    fn scope_mut(&mut self) -> &mut Scope {
        self.stack
            .iter_mut()
            .rev()
            .find_map(|frame| frame.scope.as_mut())
            .unwrap_or(&mut self.root)
    }

    fn flow_mut(&mut self) -> Result<&mut FlowGraph, FlowError> {
        let handle = self.scope().graph;
        self.arena.get_mut(handle).ok_or_else(|| FlowError::InvalidGraph {
            reason: format!("scope refers to missing {}", handle),
        })
    }

    fn call_node_mut(&mut self, node: NodeId) -> Result<&mut CallNode, FlowError> {
        self.flow_mut()?
            .graph
            .node_mut(node)
            .and_then(FlowNode::as_call_mut)
            .ok_or_else(|| FlowError::InvalidGraph {
                reason: format!("call node {} is missing", node),
            })
    }

    // -----------------------------------------------------------------------
    // Annotation lookups
    // -----------------------------------------------------------------------

    fn function_note(&mut self, function: &FunctionRef) -> Option<Annotation> {
        let key = (
            function.module.clone(),
            function.qualified_name.clone(),
            function.bound_type.as_ref().map(TypeRef::full_name),
        );
        if let Some(note) = self.function_notes.get(&key) {
            return note.clone();
        }
        let note = self.annotator.notate_function(function);
        self.function_notes.insert(key, note.clone());
        note
    }

    fn object_note(&mut self, class: &TypeRef) -> Option<Annotation> {
        if let Some(note) = self.object_notes.get(class) {
            return note.clone();
        }
        let note = self.annotator.notate_object(class);
        self.object_notes.insert(class.clone(), note.clone());
        note
    }

    fn object_data(&mut self, value: &TraceValue) -> ObjectData {
        let annotation = match value {
            TraceValue::Object(obj) => self.object_note(&obj.class).map(|n| n.key()),
            _ => None,
        };
        ObjectData {
            id: value.object_id().cloned(),
            value: payload(value),
            class: value.non_builtin_class().cloned(),
            annotation,
        }
    }

    fn port(&mut self, kind: PortKind, argname: &str, value: Option<&TraceValue>) -> Port {
        let mut port = Port::new(kind);
        port.argname = Some(argname.to_string());
        match value {
            Some(TraceValue::Object(obj)) => {
                port.id = Some(obj.id.clone());
                port.annotation = self.object_note(&obj.class).map(|n| n.key());
            }
            Some(other) => port.value = payload(other),
            None => {}
        }
        port
    }

    // -----------------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------------

    fn push_call(&mut self, call: CallEvent) -> Result<(), FlowError> {
        let note = self.function_note(&call.function);
        let domain = annotation_table(&call, note.as_ref().map(|n| n.domain.as_slice()));

        let mut ports = IndexMap::new();
        for (name, value) in &call.arguments {
            let mut port = self.port(PortKind::Input, name, Some(value));
            port.annotation_index = domain.get(name.as_str()).copied();
            ports.insert(name.clone(), port);
        }

        let nested = if call.atomic {
            None
        } else {
            Some(self.arena.push(FlowGraph::new()))
        };
        let node = self.flow_mut()?.graph.add_node(FlowNode::Call(CallNode {
            module: call.function.module.clone(),
            qualified_name: call.function.qualified_name.clone(),
            ports,
            slot: None,
            annotation: note.as_ref().map(Annotation::key),
            graph: nested,
        }));
        trace!(function = %call.full_name(), %node, "recorded call");

        for (name, value) in &call.arguments {
            if let TraceValue::Object(obj) = value {
                self.add_in_edge(&call, node, name, obj)?;
            }
            if self.config.track_hidden_referents {
                for obj in hidden_referents(value) {
                    self.add_in_edge(&call, node, name, obj)?;
                }
            }
        }

        if let Some(handle) = nested {
            debug!(function = %call.full_name(), graph = %handle, "entering traced call body");
        }
        self.stack.push(CallFrame {
            event: call,
            node,
            scope: nested.map(Scope::new),
        });
        Ok(())
    }

    fn add_in_edge(
        &mut self,
        call: &CallEvent,
        node: NodeId,
        arg_name: &str,
        obj: &ObjectRef,
    ) -> Result<(), FlowError> {
        let data = self.object_data(&TraceValue::Object(obj.clone()));
        let producer = self.scope().outputs.get(&obj.id).cloned();
        let flow = self.flow_mut()?;
        match producer {
            Some(entry) => {
                flow.graph.add_edge(
                    entry.node,
                    node,
                    FlowEdge {
                        object: data,
                        source_port: Some(entry.port),
                        target_port: Some(arg_name.to_string()),
                    },
                )?;
            }
            // The receiver of an initializer is produced by the call, not
            // consumed by it.
            None if arg_name == "self" && call.name() == "__init__" => {}
            None => {
                let input = flow.input;
                flow.graph.add_edge(
                    input,
                    node,
                    FlowEdge {
                        object: data,
                        source_port: None,
                        target_port: Some(arg_name.to_string()),
                    },
                )?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Returns
    // -----------------------------------------------------------------------

    fn push_return(&mut self, ret: ReturnEvent) -> Result<(), FlowError> {
        let found = ret.full_name();
        let frame = self.stack.pop().ok_or_else(|| FlowError::MismatchedEvents {
            expected: None,
            found: found.clone(),
        })?;
        let expected = frame.event.full_name();
        if expected != found {
            return Err(FlowError::MismatchedEvents {
                expected: Some(expected),
                found,
            });
        }
        let node = frame.node;
        let call = &ret.call;

        if ATTRIBUTE_GETTERS.contains(&call.name()) {
            if matches!(ret.return_value, TraceValue::Method(_)) {
                // The method is traced on its own call.
                self.flow_mut()?.graph.remove_node(node);
                trace!(function = %found, "dropped bound-method getter");
                return Ok(());
            }
            if let Some((_, TraceValue::Str(attr))) = call.arguments.get_index(1) {
                self.call_node_mut(node)?.slot = Some(attr.clone());
            }
        }

        let note = self.function_note(&call.function);
        self.add_output_ports(&ret, node, note.as_ref())?;

        match &ret.return_value {
            TraceValue::Tuple(items) => {
                for (i, item) in items.iter().enumerate() {
                    if let TraceValue::Object(obj) = item {
                        self.set_output(obj, node, &format!("{}.{}", RETURN_PORT, i))?;
                    }
                }
            }
            TraceValue::Object(obj) => self.set_output(obj, node, RETURN_PORT)?,
            _ => {}
        }
        for (name, value) in &call.arguments {
            if let TraceValue::Object(obj) = value {
                if !self.is_pure(call, note.as_ref(), name) {
                    self.set_output(obj, node, &mutated_port_name(name))?;
                }
            }
        }
        trace!(function = %found, "recorded return");
        Ok(())
    }

    fn add_output_ports(
        &mut self,
        ret: &ReturnEvent,
        node: NodeId,
        note: Option<&Annotation>,
    ) -> Result<(), FlowError> {
        let call = &ret.call;
        // (argument or return slot, port name)
        let mut names: Vec<(String, String)> = Vec::new();
        match &ret.return_value {
            TraceValue::Tuple(items) => {
                for i in 0..items.len() {
                    let name = format!("{}.{}", RETURN_PORT, i);
                    names.push((name.clone(), name));
                }
            }
            TraceValue::None => {}
            _ => names.push((RETURN_PORT.to_string(), RETURN_PORT.to_string())),
        }
        for name in call.arguments.keys() {
            if !self.is_pure(call, note, name) {
                names.push((name.clone(), mutated_port_name(name)));
            }
        }

        let codomain = annotation_table(call, note.map(|n| n.codomain.as_slice()));
        let mut ports = Vec::with_capacity(names.len());
        for (name, port_name) in names {
            let value = io_slot(call, &ret.return_value, &name);
            let mut port = self.port(PortKind::Output, &name, value);
            port.annotation_index = codomain.get(name.as_str()).copied();
            ports.push((port_name, port));
        }
        self.call_node_mut(node)?.ports.extend(ports);
        Ok(())
    }

    /// Makes `node` the producer of `obj`, replacing any previous producer.
    fn set_output(&mut self, obj: &ObjectRef, node: NodeId, port: &str) -> Result<(), FlowError> {
        let data = self.object_data(&TraceValue::Object(obj.clone()));
        let stale = self.scope_mut().outputs.remove(&obj.id);
        let flow = self.flow_mut()?;
        if let Some(old) = stale {
            flow.graph.remove_edge(old.edge);
        }
        let output = flow.output;
        let edge = flow.graph.add_edge(
            node,
            output,
            FlowEdge {
                object: data,
                source_port: Some(port.to_string()),
                target_port: None,
            },
        )?;
        self.scope_mut().outputs.insert(
            obj.id.clone(),
            OutputEntry {
                node,
                port: port.to_string(),
                edge,
            },
        );

        if self.config.store_slots {
            self.capture_slots(obj, node, port)?;
        }
        Ok(())
    }

    /// Records the annotated slots of a freshly produced object on the
    /// producing port. Slots that cannot be retrieved are skipped.
    fn capture_slots(&mut self, obj: &ObjectRef, node: NodeId, port: &str) -> Result<(), FlowError> {
        let Some(note) = self.object_note(&obj.class) else {
            return Ok(());
        };
        if note.slots.is_empty() {
            return Ok(());
        }
        let mut slots = IndexMap::new();
        for (name, slot) in &note.slots {
            let Some(value) = object_slot(obj, slot) else {
                trace!(slot = %slot, object = %obj.id, "slot not retrievable");
                continue;
            };
            let annotation = match value {
                TraceValue::Object(inner) => self.object_note(&inner.class).map(|n| n.key()),
                _ => None,
            };
            slots.insert(
                name.clone(),
                EntityData {
                    id: value.object_id().cloned(),
                    annotation,
                    value: payload(value),
                    type_name: None,
                    slots: IndexMap::new(),
                },
            );
        }
        if let Some(port) = self.call_node_mut(node)?.ports.get_mut(port) {
            port.slots = slots;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Literal payload of an untracked, non-`None` primitive value.
fn payload(value: &TraceValue) -> Option<Payload> {
    match value {
        TraceValue::None | TraceValue::Object(_) => None,
        other => json_clean(other).ok(),
    }
}

/// Maps a slot reference to the argument (or return slot) name it denotes.
fn slot_name(call: &CallEvent, slot: &SlotRef) -> Option<String> {
    match slot {
        SlotRef::Index(i) => call.argument_name(*i).map(str::to_string),
        SlotRef::Name(name) => Some(name.clone()),
    }
}

/// Maps each slot name of a domain or codomain to its 1-based position.
fn annotation_table(call: &CallEvent, specs: Option<&[SlotSpec]>) -> HashMap<String, usize> {
    specs
        .unwrap_or_default()
        .iter()
        .enumerate()
        .filter_map(|(i, spec)| slot_name(call, &spec.slot).map(|name| (name, i + 1)))
        .collect()
}

/// Looks up an argument or return slot by dotted name.
fn io_slot<'a>(call: &'a CallEvent, return_value: &'a TraceValue, name: &str) -> Option<&'a TraceValue> {
    let (head, rest) = match name.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (name, None),
    };
    let base = if head == RETURN_PORT {
        return_value
    } else {
        call.arguments.get(head)?
    };
    match rest {
        Some(path) => get_slot(base, &SlotRef::Name(path.to_string())),
        None => Some(base),
    }
}

/// Looks up a slot on an object's attribute snapshot.
fn object_slot<'a>(obj: &'a ObjectRef, slot: &SlotRef) -> Option<&'a TraceValue> {
    let SlotRef::Name(path) = slot else {
        return None;
    };
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path.as_str(), None),
    };
    let attr = obj.attributes.get(head)?;
    match rest {
        Some(rest) => get_slot(attr, &SlotRef::Name(rest.to_string())),
        None if matches!(attr, TraceValue::Method(_)) => None,
        None => Some(attr),
    }
}
