//! End-to-end pipeline: trace, flat flow graph, annotated graph, semantic
//! graph.

use tracing::info;

use tracegraph_core::{AnnotatedGraph, Ontology, SemanticGraph};
use tracegraph_flow::{flatten, FlowGraph, TraceGraph};
use tracegraph_storage::AnnotationStore;

use crate::annotated::AnnotatedGraphBuilder;
use crate::error::PipelineError;
use crate::semantic::SemanticGraphBuilder;

/// Every intermediate graph of one pipeline run.
#[derive(Debug, Clone)]
pub struct Stages {
    pub flow: FlowGraph,
    pub annotated: AnnotatedGraph,
    pub semantic: SemanticGraph,
}

/// Runs recorded traces through both builders.
///
/// The semantic builder's annotation cache lives as long as the pipeline,
/// so running several traces through one pipeline loads each package once.
pub struct Pipeline<'o, S> {
    annotated: AnnotatedGraphBuilder,
    semantic: SemanticGraphBuilder<'o, S>,
}

impl<'o, S: AnnotationStore> Pipeline<'o, S> {
    pub fn new(store: S, ontology: &'o dyn Ontology) -> Self {
        Pipeline {
            annotated: AnnotatedGraphBuilder::new(),
            semantic: SemanticGraphBuilder::new(store, ontology),
        }
    }

    pub fn run(&mut self, trace: &TraceGraph) -> Result<Stages, PipelineError> {
        let flow = flatten(trace)?;
        let annotated = self.annotated.build(&flow)?;
        let semantic = self.semantic.build(&annotated)?;
        info!(
            calls = flow.call_count(),
            annotated = annotated.node_count(),
            semantic = semantic.node_count(),
            "pipeline finished"
        );
        Ok(Stages {
            flow,
            annotated,
            semantic,
        })
    }

    /// Runs the pipeline, keeping only the semantic graph.
    pub fn semantic_graph(&mut self, trace: &TraceGraph) -> Result<SemanticGraph, PipelineError> {
        Ok(self.run(trace)?.semantic)
    }
}
