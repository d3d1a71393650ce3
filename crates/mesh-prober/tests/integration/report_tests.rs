//! Integration tests for the report document
//!
//! A run's reports are written to disk and re-rendered without any
//! cluster access.

use mesh_prober::probes::mock::{MockOutcome, MockProbeExecutor};
use mesh_prober::provisioner::mock::MockProvisioner;
use mesh_prober::report::RunDocument;
use mesh_prober::runner::{Collaborators, Runner};
use mp_test_utils::*;
use std::sync::Arc;

const PASS: &str = "\x1b[42m Y \x1b[0m";
const FAIL: &str = "\x1b[41m N \x1b[0m";
const NO_ROUTE: &str = "\x1b[2m - \x1b[0m";

async fn run_document(executor: MockProbeExecutor) -> Result<RunDocument, anyhow::Error> {
    let mesh = two_cluster_mesh();
    let collaborators = Collaborators {
        inventory: Arc::new(mesh.inventory()),
        provisioner: Arc::new(MockProvisioner::new()),
        executor: Arc::new(executor),
    };
    let outcomes = Runner::new(mesh.config(), collaborators)
        .run()
        .await?
        .into_result()?;
    Ok(RunDocument::new(
        outcomes.into_iter().map(|o| o.report).collect(),
    ))
}

/// A saved report renders exactly like the live one
#[tokio::test]
async fn test_saved_report_renders_like_live_run() -> Result<(), anyhow::Error> {
    // Arrange
    let document = run_document(MockProbeExecutor::reachable()).await?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("report.json");

    // Act
    document.write(&path)?;
    let loaded = RunDocument::read(&path)?;

    // Assert
    assert_eq!(loaded, document);
    assert_eq!(loaded.render(), document.render());

    Ok(())
}

/// Rendered matrix shows every source row and outcome marker
#[tokio::test]
async fn test_rendered_matrix_marks_each_outcome() -> Result<(), anyhow::Error> {
    let executor = MockProbeExecutor::reachable().with_target(EXTERNAL_ADDRESS, MockOutcome::Unreachable);

    let document = run_document(executor).await?;
    let rendered = document.render();

    assert!(rendered.starts_with("Suite: baseline\n"));
    assert!(rendered.contains("source pod"));
    let lines: Vec<&str> = rendered.lines().collect();
    // title, header, rule, one row per source pod
    assert_eq!(lines.len(), 5, "unexpected layout:\n{rendered}");
    assert!(lines[2].chars().all(|c| c == '-' || c == ' '));

    let p1_row = lines[3];
    let p2_row = lines[4];
    assert!(p1_row.contains(POD_A1) && p1_row.contains(PASS) && p1_row.contains(FAIL));
    assert!(p2_row.contains(POD_B1) && p2_row.contains(NO_ROUTE));
    assert!(!p1_row.contains(NO_ROUTE));

    Ok(())
}

/// Unreachable pairs survive the JSON round trip
#[tokio::test]
async fn test_unreachable_pairs_are_persisted() -> Result<(), anyhow::Error> {
    let document = run_document(MockProbeExecutor::reachable()).await?;

    let raw = document.to_json()?;
    let loaded = RunDocument::from_json(&raw)?;

    assert_eq!(loaded.suites[0].unreachable.len(), 1);
    assert_eq!(loaded.suites[0].unreachable[0].source.name, POD_B1);
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    assert!(value["generated_at"].is_string());
    assert!(value["suites"][0]["results_map"].is_object());

    Ok(())
}

/// A truncated document is rejected
#[test]
fn test_truncated_document_is_rejected() {
    let result = RunDocument::from_json("{\"generated_at\": \"2024-01-01T00:00:00Z\", \"suites\": [");
    assert!(result.is_err());
}
