//! Writing analysis results to disk.
//!
//! - `nodes_metrics.csv` / `edges_metrics.csv` — one row per node / edge
//! - `report.json` — the full [`MetricsReport`] including its summary
//! - `graph_view.json` — the node-link [`GraphView`]

pub mod view;

pub use view::GraphView;

use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::graph::models::{CooccurrenceGraph, EdgeMetricsRow, MetricsReport, NodeMetricsRow};

pub const NODES_FILE: &str = "nodes_metrics.csv";
pub const EDGES_FILE: &str = "edges_metrics.csv";
pub const REPORT_FILE: &str = "report.json";
pub const VIEW_FILE: &str = "graph_view.json";

fn write_csv_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}

pub fn write_nodes_csv(path: &Path, rows: &[NodeMetricsRow]) -> Result<()> {
    write_csv_rows(path, rows)
}

pub fn write_edges_csv(path: &Path, rows: &[EdgeMetricsRow]) -> Result<()> {
    write_csv_rows(path, rows)
}

pub fn write_report_json(path: &Path, report: &MetricsReport) -> Result<()> {
    write_json(path, report)
}

pub fn write_view_json(path: &Path, view: &GraphView) -> Result<()> {
    write_json(path, view)
}

/// Paths of the files written by [`export_all`].
#[derive(Debug, Clone)]
pub struct ExportedFiles {
    pub nodes: PathBuf,
    pub edges: PathBuf,
    pub report: PathBuf,
    pub view: PathBuf,
}

/// Write every export into `out_dir`, creating it if needed.
pub fn export_all(
    out_dir: &Path,
    graph: &CooccurrenceGraph,
    report: &MetricsReport,
    max_view_nodes: usize,
) -> Result<ExportedFiles> {
    std::fs::create_dir_all(out_dir)?;
    let files = ExportedFiles {
        nodes: out_dir.join(NODES_FILE),
        edges: out_dir.join(EDGES_FILE),
        report: out_dir.join(REPORT_FILE),
        view: out_dir.join(VIEW_FILE),
    };

    write_nodes_csv(&files.nodes, &report.nodes)?;
    write_edges_csv(&files.edges, &report.edges)?;
    write_report_json(&files.report, report)?;

    let view = GraphView::from_report(graph, report, max_view_nodes);
    if view.is_truncated() {
        tracing::info!(
            "Graph view limited to {} of {} nodes",
            view.nodes.len(),
            view.total_nodes
        );
    }
    write_view_json(&files.view, &view)?;

    tracing::info!("Exported results to {}", out_dir.display());
    Ok(files)
}
