//! Semantic flow graphs.
//!
//! [`SemanticGraphBuilder`] turns a language- and library-specific annotated
//! graph into a universal one: every node is typed by the ontology and
//! every edge out of an action names the aspect of the action it fills.
//!
//! Passes, in order:
//!
//! 1. type assignment (explicit pseudo-object type, then the type of the
//!    annotation record, then the ontology type of the node's primitive
//!    value, then the root kind);
//! 2. provisional aspects copied from the edges' ports;
//! 3. direction normalization: every action edge points away from the
//!    action and is marked `input` or `output`;
//! 4. aspects unknown to the action's type are dropped;
//! 5. entity slots declared as aspects of the entity's type become child
//!    entities;
//! 6. an input and an output filling the same aspect of an action are
//!    merged when the action is the input's only predecessor;
//! 7. an entity attached to an action without an aspect is merged into
//!    the first entity with the same object id reachable through aspects.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, trace, warn};

use tracegraph_core::ops::{bfs, Traversal, Visit};
use tracegraph_core::{
    AnnotatedGraph, AnnotatedNode, AnnotationKey, Aspect, EdgeId, EdgeRole, EntityData, NodeId,
    Ontology, RootKind, SemanticEdge, SemanticGraph, SemanticNode, ValueKind,
};
use tracegraph_storage::{AnnotationStore, Query};

use crate::error::SemanticError;

/// Builds semantic flow graphs from annotated flow graphs.
///
/// Annotation records are fetched from the store on demand; a package is
/// loaded the first time one of its records is needed.
pub struct SemanticGraphBuilder<'o, S> {
    store: S,
    ontology: &'o dyn Ontology,
    loaded: HashSet<(String, String)>,
    types: HashMap<AnnotationKey, Option<String>>,
}

impl<'o, S: AnnotationStore> SemanticGraphBuilder<'o, S> {
    pub fn new(store: S, ontology: &'o dyn Ontology) -> Self {
        SemanticGraphBuilder {
            store,
            ontology,
            loaded: HashSet::new(),
            types: HashMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn ontology(&self) -> &'o dyn Ontology {
        self.ontology
    }

    /// Builds the semantic graph of `annotated`.
    pub fn build(&mut self, annotated: &AnnotatedGraph) -> Result<SemanticGraph, SemanticError> {
        let mut graph = self.add_types(annotated)?;
        fix_action_edge_directions(&mut graph)?;
        self.validate_action_aspects(&mut graph);
        self.reify_entity_slots(&mut graph)?;
        let duplicates = self.merge_duplicate_aspects(&mut graph)?;
        let unknown = self.merge_unknown_aspects(&mut graph)?;
        debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            duplicates,
            unknown,
            "built semantic graph"
        );
        Ok(graph)
    }

    // -----------------------------------------------------------------------
    // Typing
    // -----------------------------------------------------------------------

    /// Copies the topology, typing every node and turning ports into
    /// provisional aspects.
    fn add_types(&mut self, annotated: &AnnotatedGraph) -> Result<SemanticGraph, SemanticError> {
        let mut typed = HashMap::with_capacity(annotated.node_count());
        for (id, node) in annotated.nodes() {
            let type_name = match node {
                AnnotatedNode::Action(action) => self.type_of(None, action.annotation.as_ref())?,
                AnnotatedNode::Entity(entity) => match self
                    .type_of(entity.type_name.as_deref(), entity.annotation.as_ref())?
                {
                    Some(name) => Some(name),
                    None => self.value_type(entity.value.as_ref()),
                },
            };
            typed.insert(id, type_name.unwrap_or_else(|| node.root_kind().to_string()));
        }

        Ok(annotated.map(
            |id, node| {
                let type_name = typed.remove(&id).unwrap_or_default();
                match node {
                    AnnotatedNode::Action(_) => SemanticNode {
                        type_name,
                        root: RootKind::Action,
                        ..SemanticNode::default()
                    },
                    AnnotatedNode::Entity(entity) => SemanticNode {
                        type_name,
                        root: RootKind::Entity,
                        id: entity.id.clone(),
                        value: entity.value.clone(),
                        slots: (!entity.slots.is_empty()).then(|| entity.slots.clone()),
                    },
                }
            },
            |edge| SemanticEdge {
                aspect: edge.data.port.clone(),
                role: None,
            },
        ))
    }

    /// Ontology type named by an explicit type or by an annotation record.
    fn type_of(
        &mut self,
        explicit: Option<&str>,
        annotation: Option<&AnnotationKey>,
    ) -> Result<Option<String>, SemanticError> {
        if let Some(name) = explicit {
            return Ok(Some(name.to_string()));
        }
        match annotation {
            Some(key) => self.annotation_type(key),
            None => Ok(None),
        }
    }

    /// The `type` of the annotation record behind `key`, memoized.
    fn annotation_type(&mut self, key: &AnnotationKey) -> Result<Option<String>, SemanticError> {
        if let Some(found) = self.types.get(key) {
            return Ok(found.clone());
        }
        if self.loaded.insert((key.language.clone(), key.package.clone())) {
            self.store.load_package(&key.language, &key.package)?;
        }
        let query = Query::new()
            .equals("language", key.language.as_str())
            .equals("package", key.package.as_str())
            .equals("id", key.id.as_str());
        let type_name = self
            .store
            .get(&query)?
            .and_then(|doc| doc.get("type"))
            .and_then(Value::as_str)
            .map(str::to_string);
        if type_name.is_none() {
            trace!(annotation = %key, "annotation has no ontology type");
        }
        self.types.insert(key.clone(), type_name.clone());
        Ok(type_name)
    }

    fn value_type(&self, value: Option<&Value>) -> Option<String> {
        value
            .and_then(|v| self.ontology.value_type(ValueKind::of(v)))
            .map(str::to_string)
    }

    /// Aspects of a type, including inherited ones. Types unknown to the
    /// ontology have none.
    fn aspects_of(&self, type_name: &str) -> IndexMap<String, Aspect> {
        match self.ontology.inherited(type_name) {
            Ok(inherited) => inherited.aspects,
            Err(err) => {
                trace!(type_name, error = %err, "no aspects for type");
                IndexMap::new()
            }
        }
    }

    /// The more specific of two types.
    ///
    /// Incomparable types fall back to their nearest common supertype, then
    /// to `fallback`.
    fn merge_types(&self, left: &str, right: &str, fallback: &str) -> String {
        match self.ontology.most_specific(left, right) {
            Ok(name) => name,
            Err(err) => {
                let merged = self
                    .ontology
                    .common_supertype(left, right)
                    .unwrap_or_else(|| fallback.to_string());
                warn!(left, right, merged = %merged, error = %err, "merging incomparable types");
                merged
            }
        }
    }

    // -----------------------------------------------------------------------
    // Aspects
    // -----------------------------------------------------------------------

    /// Drops aspects an action's type does not declare or inherit.
    fn validate_action_aspects(&self, graph: &mut SemanticGraph) {
        for action in graph.find_nodes(SemanticNode::is_action) {
            let Some(type_name) = graph.node(action).map(|n| n.type_name.clone()) else {
                continue;
            };
            let valid = self.aspects_of(&type_name);
            let invalid: Vec<EdgeId> = graph
                .out_edges(action)
                .into_iter()
                .filter(|e| e.data.aspect.as_ref().is_some_and(|a| !valid.contains_key(a)))
                .map(|e| e.id)
                .collect();
            for edge in invalid {
                if let Some(data) = graph.edge_mut(edge) {
                    trace!(%action, aspect = ?data.aspect, type_name = %type_name, "dropping undeclared aspect");
                    data.aspect = None;
                }
            }
        }
    }

    /// Turns the slots of every entity into child entities, one per slot
    /// declared as an aspect of the entity's type. Slots are reified one
    /// level deep.
    fn reify_entity_slots(&mut self, graph: &mut SemanticGraph) -> Result<(), SemanticError> {
        for entity in graph.find_nodes(SemanticNode::is_entity) {
            let Some(node) = graph.node_mut(entity) else { continue };
            let Some(slots) = node.slots.take() else { continue };
            let type_name = node.type_name.clone();
            let aspects = self.aspects_of(&type_name);

            for (name, slot) in slots {
                let Some(aspect) = aspects.get(&name) else {
                    continue;
                };
                let child = self.slot_node(slot, aspect)?;
                let child = graph.add_node(child);
                graph.add_edge(entity, child, SemanticEdge::aspect(name))?;
            }
        }
        Ok(())
    }

    fn slot_node(&mut self, slot: EntityData, aspect: &Aspect) -> Result<SemanticNode, SemanticError> {
        let type_name = match self.type_of(slot.type_name.as_deref(), slot.annotation.as_ref())? {
            Some(declared) => self.merge_types(&declared, &aspect.codomain, &aspect.codomain),
            None => aspect.codomain.clone(),
        };
        Ok(SemanticNode {
            type_name,
            root: RootKind::Entity,
            id: slot.id,
            value: slot.value,
            slots: (!slot.slots.is_empty()).then_some(slot.slots),
        })
    }

    // -----------------------------------------------------------------------
    // Merging
    // -----------------------------------------------------------------------

    /// Merges the input and output of an action filling the same aspect,
    /// the usual shape of a method mutating its receiver.
    fn merge_duplicate_aspects(&self, graph: &mut SemanticGraph) -> Result<usize, SemanticError> {
        let mut merged = 0;
        for action in graph.find_nodes(SemanticNode::is_action) {
            let mut inputs: IndexMap<String, (EdgeId, NodeId)> = IndexMap::new();
            let mut outputs: IndexMap<String, NodeId> = IndexMap::new();
            for edge in graph.out_edges(action) {
                let Some(aspect) = edge.data.aspect.clone() else {
                    continue;
                };
                if edge.data.is_input() {
                    inputs.insert(aspect, (edge.id, edge.target));
                } else if edge.data.is_output() {
                    outputs.insert(aspect, edge.target);
                }
            }

            for (aspect, (edge, input)) in inputs {
                let Some(&output) = outputs.get(&aspect) else {
                    continue;
                };
                if input == output || !graph.contains_node(input) || !graph.contains_node(output) {
                    continue;
                }
                // The input must not be visible to any other action.
                if graph.predecessors(input).len() != 1 {
                    continue;
                }
                graph.remove_edge(edge);
                trace!(%action, aspect = %aspect, "merging duplicate aspect");
                self.merge_nodes(graph, input, output)?;
                merged += 1;
            }
        }
        Ok(merged)
    }

    /// Merges entities attached to actions without an aspect into the first
    /// entity with the same object id reachable from the action.
    fn merge_unknown_aspects(&self, graph: &mut SemanticGraph) -> Result<usize, SemanticError> {
        let mut merged = 0;
        for action in graph.find_nodes(SemanticNode::is_action) {
            let unknown: Vec<(EdgeId, NodeId, EdgeRole)> = graph
                .out_edges(action)
                .into_iter()
                .filter(|e| e.data.aspect.is_none())
                .filter_map(|e| e.data.role.map(|role| (e.id, e.target, role)))
                .collect();
            for (edge, entity, role) in unknown {
                if !graph.contains_edge(edge) || !graph.contains_node(entity) {
                    continue;
                }
                let Some(found) = find_same_object(graph, action, entity, role) else {
                    continue;
                };
                graph.remove_edge(edge);
                trace!(%action, %entity, into = %found, "merging unknown aspect");
                self.merge_nodes(graph, entity, found)?;
                merged += 1;
            }
        }
        Ok(merged)
    }

    /// Merges `src` into `dest`.
    ///
    /// `dest` takes the more specific of the two types and every in-edge of
    /// `src`. Out-edges of `src` move to `dest`, except those filling an
    /// aspect `dest` already has: their targets are merged recursively.
    fn merge_nodes(&self, graph: &mut SemanticGraph, src: NodeId, dest: NodeId) -> Result<(), SemanticError> {
        self.merge_forwarding(graph, src, dest, &mut HashMap::new())
    }

    /// Recursive step of [`merge_nodes`](Self::merge_nodes). `forwarded`
    /// maps every node removed so far to the node it was merged into.
    fn merge_forwarding(
        &self,
        graph: &mut SemanticGraph,
        src: NodeId,
        dest: NodeId,
        forwarded: &mut HashMap<NodeId, NodeId>,
    ) -> Result<(), SemanticError> {
        let (src, dest) = (resolve(forwarded, src), resolve(forwarded, dest));
        if src == dest {
            return Ok(());
        }
        let (Some(src_node), Some(dest_node)) = (graph.node(src), graph.node(dest)) else {
            return Ok(());
        };
        let merged = self.merge_types(
            &src_node.type_name,
            &dest_node.type_name,
            dest_node.root.as_str(),
        );
        if let Some(node) = graph.node_mut(dest) {
            node.type_name = merged;
        }

        let incoming: Vec<_> = graph
            .in_edges(src)
            .into_iter()
            .filter(|e| e.source != dest)
            .map(|e| (e.source, e.data.clone()))
            .collect();
        for (source, data) in incoming {
            graph.add_edge(source, dest, data)?;
        }

        let dest_aspects: HashMap<String, NodeId> = graph
            .out_edges(dest)
            .into_iter()
            .filter_map(|e| e.data.aspect.clone().map(|a| (a, e.target)))
            .collect();
        let outgoing: Vec<_> = graph
            .out_edges(src)
            .into_iter()
            .filter(|e| e.target != dest)
            .map(|e| (e.target, e.data.clone()))
            .collect();
        for (target, data) in outgoing {
            // An earlier recursive merge may have removed this target.
            let target = resolve(forwarded, target);
            if target == dest || !graph.contains_node(target) {
                continue;
            }
            match data.aspect.as_ref().and_then(|a| dest_aspects.get(a)) {
                Some(&existing) => self.merge_forwarding(graph, target, existing, forwarded)?,
                None => {
                    graph.add_edge(dest, target, data)?;
                }
            }
        }

        graph.remove_node(src);
        forwarded.insert(src, dest);
        Ok(())
    }
}

/// Follows `forwarded` to the node that currently stands for `node`.
fn resolve(forwarded: &HashMap<NodeId, NodeId>, mut node: NodeId) -> NodeId {
    while let Some(&next) = forwarded.get(&node) {
        node = next;
    }
    node
}

/// Reverses every edge into an action so that all action edges point away
/// from the action, marking each as input or output.
fn fix_action_edge_directions(graph: &mut SemanticGraph) -> Result<(), SemanticError> {
    for action in graph.find_nodes(SemanticNode::is_action) {
        let outgoing: Vec<EdgeId> = graph.out_edges(action).into_iter().map(|e| e.id).collect();
        for edge in outgoing {
            if let Some(data) = graph.edge_mut(edge) {
                data.role = Some(EdgeRole::Output);
            }
        }
        let incoming: Vec<_> = graph
            .in_edges(action)
            .into_iter()
            .map(|e| (e.id, e.source, e.data.clone()))
            .collect();
        for (id, source, mut data) in incoming {
            graph.remove_edge(id);
            data.role = Some(EdgeRole::Input);
            graph.add_edge_with_id(id, action, source, data)?;
        }
    }
    Ok(())
}

/// First node reachable from `action` through aspect edges that carries the
/// same object id as `entity`. Only edges of the given role are followed out
/// of the action itself.
fn find_same_object(
    graph: &SemanticGraph,
    action: NodeId,
    entity: NodeId,
    role: EdgeRole,
) -> Option<NodeId> {
    let id = graph.node(entity)?.id.clone()?;
    bfs(
        graph,
        action,
        Traversal::Forward,
        |node, _| match graph.node(node) {
            Some(n) if node != entity && n.id.as_ref() == Some(&id) => Visit::Stop(node),
            _ => Visit::Expand,
        },
        |edge| {
            if edge.source == action && edge.data.role != Some(role) {
                return false;
            }
            edge.data.aspect.is_some()
        },
    )
    .found()
}
