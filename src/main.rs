//! Co-occurrence Analyzer - command line
//!
//! Lists candidate columns of a table, or builds the co-occurrence graph of
//! selected columns and writes its metrics.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cooccurrence_analyzer::export::export_all;
use cooccurrence_analyzer::graph::{AnalysisRequest, AnalyticsEngine, CooccurrenceEngine};
use cooccurrence_analyzer::table::{load_table, ColumnFilter};
use cooccurrence_analyzer::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "cograph")]
#[command(about = "Co-occurrence graph builder and metrics engine")]
struct Cli {
    /// Path to config.yaml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List columns usable as node sources and as row filters
    Columns {
        /// CSV or JSON file
        #[arg(short, long)]
        input: PathBuf,

        /// Numeric columns with at least this many distinct values are skipped
        #[arg(long)]
        max_unique: Option<usize>,
    },

    /// Build the co-occurrence graph and compute node metrics
    Analyze {
        /// CSV or JSON file
        #[arg(short, long)]
        input: PathBuf,

        /// Columns whose values become nodes
        #[arg(short, long, value_delimiter = ',', required = true)]
        fields: Vec<String>,

        /// Row filter COLUMN=v1,v2 (repeatable)
        #[arg(long = "filter")]
        filters: Vec<ColumnFilter>,

        /// Drop edges seen in fewer records
        #[arg(long)]
        min_weight: Option<u64>,

        /// Number of sampled betweenness sources
        #[arg(long)]
        sample_size: Option<usize>,

        /// Always compute exact betweenness
        #[arg(long)]
        no_approx: bool,

        /// Largest graph computed exactly when sampling is allowed
        #[arg(long)]
        exact_threshold: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,

        /// Number of top nodes to log
        #[arg(long)]
        top: Option<usize>,

        /// Node cap for graph_view.json (0 = no cap)
        #[arg(long)]
        max_view_nodes: Option<usize>,

        #[arg(long)]
        timeout_secs: Option<u64>,

        #[arg(short, long)]
        out_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,cooccurrence_analyzer=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config =
        Config::from_yaml_and_env(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Columns { input, max_unique } => {
            if let Some(n) = max_unique {
                config.max_unique = n;
            }
            run_columns(&config, &input)
        }
        Commands::Analyze {
            input,
            fields,
            filters,
            min_weight,
            sample_size,
            no_approx,
            exact_threshold,
            seed,
            top,
            max_view_nodes,
            timeout_secs,
            out_dir,
        } => {
            if let Some(v) = min_weight {
                config.min_weight = v;
            }
            if sample_size.is_some() {
                config.sample_size = sample_size;
            }
            if no_approx {
                config.approx_betweenness = false;
            }
            if let Some(v) = exact_threshold {
                config.exact_threshold = v;
            }
            if let Some(v) = seed {
                config.seed = v;
            }
            if let Some(v) = top {
                config.top = v;
            }
            if let Some(v) = max_view_nodes {
                config.max_view_nodes = v;
            }
            if timeout_secs.is_some() {
                config.timeout_secs = timeout_secs;
            }
            if let Some(dir) = out_dir {
                config.out_dir = dir;
            }
            run_analyze(&config, &input, fields, filters).await
        }
    }
}

fn run_columns(config: &Config, input: &std::path::Path) -> Result<()> {
    let table =
        load_table(input).with_context(|| format!("Failed to load {}", input.display()))?;
    let columns = table.candidate_columns(config.max_unique);
    let filters = table.filter_candidates();
    tracing::info!(
        "{} of {} columns are node candidates (max_unique={}), {} are filter candidates",
        columns.len(),
        table.columns().len(),
        config.max_unique,
        filters.len()
    );
    println!("Node columns:");
    for column in columns {
        println!("  {}", column);
    }
    println!("Filter columns:");
    for column in filters {
        println!("  {}", column);
    }
    Ok(())
}

async fn run_analyze(
    config: &Config,
    input: &std::path::Path,
    fields: Vec<String>,
    filters: Vec<ColumnFilter>,
) -> Result<()> {
    let table =
        load_table(input).with_context(|| format!("Failed to load {}", input.display()))?;

    let request = AnalysisRequest {
        fields,
        filters,
        min_weight: config.min_weight,
        options: config.metrics_options(),
        timeout_secs: config.timeout_secs,
    };

    let engine = CooccurrenceEngine::new();
    let outcome = engine
        .analyze(Arc::new(table), request)
        .await
        .context("Analysis failed")?;

    let files = export_all(
        &config.out_dir,
        &outcome.graph,
        &outcome.report,
        config.max_view_nodes,
    )
    .context("Failed to write results")?;

    let summary = &outcome.report.summary;
    tracing::info!(
        "Graph: {} nodes, {} edges, {} components, {} communities",
        summary.node_count,
        summary.edge_count,
        summary.component_count,
        summary.community_count
    );
    for (rank, node) in outcome.report.nodes.iter().take(config.top).enumerate() {
        tracing::info!(
            "#{:<3} {:<40} degree(w)={:<8} betweenness={:.4} eigenvector={:.4} community={}",
            rank + 1,
            node.node_id,
            node.degree_weighted,
            node.betweenness,
            node.eigenvector,
            node.community
        );
    }
    tracing::info!(
        "Wrote {}, {}, {}, {}",
        files.nodes.display(),
        files.edges.display(),
        files.report.display(),
        files.view.display()
    );

    Ok(())
}
