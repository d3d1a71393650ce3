//! Matrix rendering and the serialized report document.
//!
//! Rows are sources, columns are destinations. Each cell holds one
//! fixed-width indicator per probe kind, in the declared probe order, so
//! columns line up whether or not a probe applies to a destination.

use crate::matrix::{Test, TestResult, UnreachablePair};
use crate::results::{NestedResults, ResultsMap};
use chrono::{DateTime, Utc};
use common::types::{ClusterDescriptor, ProbeKind, TestEntity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

const RESET: &str = "\x1b[0m";
const PASS: &str = "\x1b[42m Y \x1b[0m";
const FAIL: &str = "\x1b[41m N \x1b[0m";
const NO_ROUTE: &str = "\x1b[2m - \x1b[0m";
const BLANK: &str = "   ";

/// Gap between table columns.
const COLUMN_GAP: &str = "  ";

const SOURCE_HEADER: &str = "source pod";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to access report '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid report document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Entity name padded by one space, wrapped in its cluster's color.
fn header(entity: &TestEntity, clusters: &BTreeMap<String, ClusterDescriptor>) -> String {
    let color = entity
        .id
        .cluster()
        .and_then(|cluster| clusters.get(cluster))
        .map(|c| c.color.as_str())
        .filter(|color| !color.is_empty());
    match color {
        Some(color) => format!("\x1b[{color}m {} {RESET}", entity.id.name),
        None => format!(" {} ", entity.id.name),
    }
}

fn indicator(result: Option<bool>) -> &'static str {
    match result {
        Some(true) => PASS,
        Some(false) => FAIL,
        None => BLANK,
    }
}

fn cell(
    results: &ResultsMap,
    source: &TestEntity,
    destination: &TestEntity,
    order: &[ProbeKind],
) -> String {
    if results.is_unreachable(&source.id, &destination.id) {
        return order
            .iter()
            .map(|kind| {
                if destination.supports(*kind) {
                    NO_ROUTE
                } else {
                    BLANK
                }
            })
            .collect();
    }
    order
        .iter()
        .map(|kind| indicator(results.lookup(&source.id, &destination.id, *kind)))
        .collect()
}

/// Printable width, ignoring SGR escape sequences.
fn visible_width(text: &str) -> usize {
    let mut width = 0;
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            for c in chars.by_ref() {
                if c == 'm' {
                    break;
                }
            }
        } else {
            width += 1;
        }
    }
    width
}

fn pad(text: &str, width: usize) -> String {
    let fill = width.saturating_sub(visible_width(text));
    format!("{text}{}", " ".repeat(fill))
}

/// Left-aligned table: header row, dashed rule, data rows.
fn tabulate(headers: &[String], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| visible_width(h)).collect();
    for row in rows {
        for (width, value) in widths.iter_mut().zip(row) {
            *width = (*width).max(visible_width(value));
        }
    }

    let render_row = |cells: &[String]| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(value, width)| pad(value, *width))
            .collect::<Vec<_>>()
            .join(COLUMN_GAP)
    };

    let mut out = render_row(headers);
    out.push('\n');
    out.push_str(
        &widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join(COLUMN_GAP),
    );
    for row in rows {
        out.push('\n');
        out.push_str(&render_row(row));
    }
    out
}

/// Render the reachability matrix.
pub fn format_table(
    results: &ResultsMap,
    sources: &[TestEntity],
    destinations: &[TestEntity],
    clusters: &BTreeMap<String, ClusterDescriptor>,
    order: &[ProbeKind],
) -> String {
    let headers: Vec<String> = std::iter::once(SOURCE_HEADER.to_string())
        .chain(destinations.iter().map(|d| header(d, clusters)))
        .collect();

    let rows: Vec<Vec<String>> = sources
        .iter()
        .map(|source| {
            std::iter::once(header(source, clusters))
                .chain(
                    destinations
                        .iter()
                        .map(|destination| cell(results, source, destination, order)),
                )
                .collect()
        })
        .collect();

    tabulate(&headers, &rows)
}

/// One line per test: `src (ip) -> dst (ip) | kind: RESULT`.
pub fn format_test_summary(tests: &[Test]) -> String {
    let mut out = String::new();
    for test in tests {
        let result = match test.result() {
            TestResult::Success => "\x1b[32mSUCCESS\x1b[0m",
            TestResult::Failure => "\x1b[31mFAILURE\x1b[0m",
            TestResult::NotRun => "\x1b[33mNOT RUN\x1b[0m",
        };
        let _ = writeln!(
            out,
            "{} ({}) -> {} ({}) | {}: {result}",
            test.source().id.name,
            test.source().address,
            test.destination().id.name,
            test.destination().address,
            test.kind(),
        );
    }
    out
}

/// Everything needed to re-render one suite's matrix offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub name: String,

    pub results_map: NestedResults,

    /// Pairs excluded because the source cluster has no route to the
    /// destination cluster.
    #[serde(default)]
    pub unreachable: Vec<UnreachablePair>,

    pub sources: Vec<TestEntity>,

    pub destinations: Vec<TestEntity>,

    pub clusters: BTreeMap<String, ClusterDescriptor>,

    pub probe_order: Vec<ProbeKind>,
}

impl SuiteReport {
    pub fn new(
        name: impl Into<String>,
        results: &ResultsMap,
        sources: Vec<TestEntity>,
        destinations: Vec<TestEntity>,
        clusters: BTreeMap<String, ClusterDescriptor>,
        probe_order: Vec<ProbeKind>,
    ) -> Self {
        Self {
            name: name.into(),
            results_map: results.to_nested(),
            unreachable: results.unreachable().cloned().collect(),
            sources,
            destinations,
            clusters,
            probe_order,
        }
    }

    pub fn results(&self) -> ResultsMap {
        ResultsMap::from_nested(&self.results_map, &self.unreachable)
    }

    pub fn render(&self) -> String {
        format_table(
            &self.results(),
            &self.sources,
            &self.destinations,
            &self.clusters,
            &self.probe_order,
        )
    }
}

/// Serialized output of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunDocument {
    pub generated_at: DateTime<Utc>,
    pub suites: Vec<SuiteReport>,
}

impl RunDocument {
    pub fn new(suites: Vec<SuiteReport>) -> Self {
        Self {
            generated_at: Utc::now(),
            suites,
        }
    }

    pub fn to_json(&self) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, ReportError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn write(&self, path: &Path) -> Result<(), ReportError> {
        let raw = self.to_json()?;
        std::fs::write(path, raw).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!(target: "mp.report", path = %path.display(), suites = self.suites.len(), "Report written");
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, ReportError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let document = Self::from_json(&raw)?;
        debug!(target: "mp.report", path = %path.display(), suites = document.suites.len(), "Report loaded");
        Ok(document)
    }

    /// Every suite's matrix, each under a title line.
    pub fn render(&self) -> String {
        self.suites
            .iter()
            .map(|suite| format!("Suite: {}\n{}\n", suite.name, suite.render()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
