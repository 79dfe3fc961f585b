//! Tracegraph command-line driver.
//!
//! Provides the `tracegraph` binary with one subcommand per pipeline stage.
//! Every subcommand reads JSON documents and prints its result as JSON to
//! stdout; diagnostics go to stderr.
//!
//! Reads fallbacks from environment variables:
//! - `TRACEGRAPH_ANNOTATIONS`: annotation search path, `:`-separated
//! - `TRACEGRAPH_ONTOLOGY`: ontology JSON file
//!
//! Exit codes: 0 = success, 1 = pipeline error, 3 = I/O or decoding error.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn, Level};

use tracegraph_core::TypeRegistry;
use tracegraph_flow::{
    flatten, join, FlowConfig, FlowError, FlowGraphBuilder, TraceEvent, TraceGraph,
};
use tracegraph_semantic::{AnnotatedGraphBuilder, Pipeline};
use tracegraph_storage::{AnnotatorConfig, DbAnnotator, InMemoryAnnotationDb};

/// Builds flow graphs from execution traces.
#[derive(Parser)]
#[command(name = "tracegraph", about = "Flow graphs from execution traces")]
struct Cli {
    /// Log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Build a trace graph from a file of trace events, one JSON event per line.
    Flow {
        /// Path to the event file.
        events: PathBuf,

        #[command(flatten)]
        annotations: AnnotationArgs,

        /// Do not capture annotated object slots.
        #[arg(long)]
        no_slots: bool,

        /// Do not wire objects hidden inside container arguments.
        #[arg(long)]
        no_hidden_referents: bool,
    },
    /// Flatten a trace graph into a single flow graph.
    Flatten {
        /// Path to the trace graph document.
        trace: PathBuf,
    },
    /// Join two trace graphs captured one after the other.
    Join {
        first: PathBuf,
        second: PathBuf,
    },
    /// Build the annotated flow graph of a trace graph.
    Annotate {
        /// Path to the trace graph document.
        trace: PathBuf,
    },
    /// Build the semantic flow graph of a trace graph.
    Semantic {
        /// Path to the trace graph document.
        trace: PathBuf,

        #[command(flatten)]
        annotations: AnnotationArgs,

        /// Ontology JSON file (default: $TRACEGRAPH_ONTOLOGY).
        #[arg(long)]
        ontology: Option<PathBuf>,
    },
}

/// Where annotation records come from.
#[derive(Args)]
struct AnnotationArgs {
    /// Annotation directory; repeatable (default: $TRACEGRAPH_ANNOTATIONS).
    #[arg(short, long = "annotations")]
    dirs: Vec<PathBuf>,

    /// Annotation language key.
    #[arg(long, default_value = "python")]
    language: String,
}

impl AnnotationArgs {
    fn search_path(&self) -> Vec<PathBuf> {
        if !self.dirs.is_empty() {
            return self.dirs.clone();
        }
        std::env::var("TRACEGRAPH_ANNOTATIONS")
            .map(|paths| {
                paths
                    .split(':')
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn store(&self) -> InMemoryAnnotationDb {
        let paths = self.search_path();
        if paths.is_empty() {
            warn!("no annotation search path; every call will be unannotated");
        }
        InMemoryAnnotationDb::with_search_path(paths)
    }
}

fn main() {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let exit_code = match cli.command {
        Commands::Flow {
            events,
            annotations,
            no_slots,
            no_hidden_referents,
        } => {
            let config = FlowConfig {
                store_slots: !no_slots,
                track_hidden_referents: !no_hidden_referents,
            };
            run_flow(&events, &annotations, config)
        }
        Commands::Flatten { trace } => run_flatten(&trace),
        Commands::Join { first, second } => run_join(&first, &second),
        Commands::Annotate { trace } => run_annotate(&trace),
        Commands::Semantic {
            trace,
            annotations,
            ontology,
        } => run_semantic(&trace, &annotations, ontology),
    };
    process::exit(exit_code);
}

/// Execute the flow subcommand.
fn run_flow(events: &Path, annotations: &AnnotationArgs, config: FlowConfig) -> i32 {
    let text = match fs::read_to_string(events) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("Error: failed to read '{}': {}", events.display(), e);
            return 3;
        }
    };

    let annotator = DbAnnotator::with_config(
        annotations.store(),
        AnnotatorConfig {
            language: annotations.language.clone(),
        },
    );
    let mut builder = FlowGraphBuilder::with_config(annotator, config);
    for (number, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let event = match serde_json::from_str::<serde_json::Value>(line)
            .map_err(FlowError::from)
            .and_then(|doc| TraceEvent::from_json(&doc))
        {
            Ok(event) => event,
            Err(e) => {
                eprintln!("Error: {}:{}: {}", events.display(), number + 1, e);
                return 3;
            }
        };
        if let Err(e) = builder.push_event(event) {
            eprintln!("Error: {}:{}: {}", events.display(), number + 1, e);
            return 1;
        }
    }
    if builder.depth() > 0 {
        warn!(open = builder.depth(), "trace ended inside unfinished calls");
    }
    print_json(&builder.into_graph())
}

/// Execute the flatten subcommand.
fn run_flatten(trace: &Path) -> i32 {
    let trace: TraceGraph = match read_json(trace) {
        Ok(trace) => trace,
        Err(code) => return code,
    };
    match flatten(&trace) {
        Ok(flow) => print_json(&flow),
        Err(e) => {
            eprintln!("Flatten error: {}", e);
            1
        }
    }
}

/// Execute the join subcommand.
fn run_join(first: &Path, second: &Path) -> i32 {
    let (first, second): (TraceGraph, TraceGraph) = match (read_json(first), read_json(second)) {
        (Ok(first), Ok(second)) => (first, second),
        (Err(code), _) | (_, Err(code)) => return code,
    };
    match join(&first, &second) {
        Ok(joined) => print_json(&joined),
        Err(e) => {
            eprintln!("Join error: {}", e);
            1
        }
    }
}

/// Execute the annotate subcommand.
fn run_annotate(trace: &Path) -> i32 {
    let trace: TraceGraph = match read_json(trace) {
        Ok(trace) => trace,
        Err(code) => return code,
    };
    let annotated = flatten(&trace)
        .map_err(|e| e.to_string())
        .and_then(|flow| AnnotatedGraphBuilder::new().build(&flow).map_err(|e| e.to_string()));
    match annotated {
        Ok(graph) => print_json(&graph),
        Err(e) => {
            eprintln!("Annotation error: {}", e);
            1
        }
    }
}

/// Execute the semantic subcommand.
fn run_semantic(trace: &Path, annotations: &AnnotationArgs, ontology: Option<PathBuf>) -> i32 {
    let trace: TraceGraph = match read_json(trace) {
        Ok(trace) => trace,
        Err(code) => return code,
    };

    let ontology_path = ontology.or_else(|| std::env::var("TRACEGRAPH_ONTOLOGY").ok().map(PathBuf::from));
    let ontology = match ontology_path {
        Some(path) => {
            let text = match fs::read_to_string(&path) {
                Ok(text) => text,
                Err(e) => {
                    eprintln!("Error: failed to read ontology '{}': {}", path.display(), e);
                    return 3;
                }
            };
            match TypeRegistry::from_json(&text) {
                Ok(registry) => registry,
                Err(e) => {
                    eprintln!("Error: invalid ontology '{}': {}", path.display(), e);
                    return 3;
                }
            }
        }
        None => {
            warn!("no ontology given; nodes will be typed by root kind only");
            TypeRegistry::new()
        }
    };
    info!(types = ontology.len(), "loaded ontology");

    let mut pipeline = Pipeline::new(annotations.store(), &ontology);
    match pipeline.semantic_graph(&trace) {
        Ok(graph) => print_json(&graph),
        Err(e) => {
            eprintln!("Semantic error: {}", e);
            1
        }
    }
}

/// Reads and decodes a JSON document, reporting failures on stderr.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, i32> {
    let text = fs::read_to_string(path).map_err(|e| {
        eprintln!("Error: failed to read '{}': {}", path.display(), e);
        3
    })?;
    serde_json::from_str(&text).map_err(|e| {
        eprintln!("Error: malformed document '{}': {}", path.display(), e);
        3
    })
}

/// Prints a result as JSON to stdout for machine-readable output.
fn print_json<T: Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            0
        }
        Err(e) => {
            eprintln!("Error: failed to serialize result: {}", e);
            3
        }
    }
}
