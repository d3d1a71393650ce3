//! Concurrent execution engine.
//!
//! Every test runs as its own task; a semaphore bounds how many probes are
//! in flight. A unit that raises, panics or overruns the optional deadline
//! is recorded as a failure and never disturbs its siblings.

use crate::matrix::{Test, TestResult};
use crate::probes::{ProbeError, ProbeExecutor, ProbeRequest};
use common::config::{RunConfig, DEFAULT_WORKERS};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum number of probes in flight.
    pub workers: usize,

    /// Upper bound on a single probe. `None` leaves probes bounded only by
    /// their own command guard, so a hung probe holds its slot.
    pub deadline: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            deadline: None,
        }
    }
}

impl EngineConfig {
    pub fn from_run(run: &RunConfig) -> Self {
        Self {
            workers: run.workers,
            deadline: run.probe_deadline(),
        }
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// How a single unit ended.
#[derive(Debug)]
enum UnitOutcome {
    Completed(bool),
    Raised(ProbeError),
    Panicked(String),
    TimedOut(Duration),
}

impl UnitOutcome {
    fn result(&self) -> TestResult {
        match self {
            UnitOutcome::Completed(ok) => TestResult::from_bool(*ok),
            _ => TestResult::Failure,
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    passed: usize,
    failed: usize,
    raised: usize,
    panicked: usize,
    timed_out: usize,
}

/// Run every test once and return them, in input order, with results set.
///
/// The returned list always has the same length as the input.
#[instrument(skip_all, name = "mp.engine.run", fields(tests = tests.len(), workers = config.workers))]
pub async fn run_tests(
    mut tests: Vec<Test>,
    executor: Arc<dyn ProbeExecutor>,
    config: &EngineConfig,
) -> Vec<Test> {
    let semaphore = Arc::new(Semaphore::new(config.workers.max(1)));
    let mut units = JoinSet::new();

    for (index, test) in tests.iter().enumerate() {
        let test = test.clone();
        let executor = Arc::clone(&executor);
        let semaphore = Arc::clone(&semaphore);
        let deadline = config.deadline;
        units.spawn(async move {
            // Never closed; a missing permit only lifts the bound.
            let _permit = semaphore.acquire_owned().await.ok();
            let outcome = run_unit(&test, executor.as_ref(), deadline).await;
            log_outcome(&test, &outcome);
            (index, outcome)
        });
    }

    let mut tally = Tally::default();
    while let Some(joined) = units.join_next().await {
        let (index, outcome) = match joined {
            Ok(done) => done,
            Err(e) => {
                error!(target: "mp.engine", error = %e, "Probe task did not complete");
                continue;
            }
        };
        match &outcome {
            UnitOutcome::Completed(true) => tally.passed += 1,
            UnitOutcome::Completed(false) => tally.failed += 1,
            UnitOutcome::Raised(_) => tally.raised += 1,
            UnitOutcome::Panicked(_) => tally.panicked += 1,
            UnitOutcome::TimedOut(_) => tally.timed_out += 1,
        }
        if let Some(test) = tests.get_mut(index) {
            if let Err(e) = test.record(outcome.result()) {
                error!(target: "mp.engine", error = %e, "Result recorded twice");
            }
        }
    }

    tally.failed += fail_unrecorded(&mut tests);

    info!(
        target: "mp.engine",
        total = tests.len(),
        passed = tally.passed,
        failed = tally.failed,
        raised = tally.raised,
        panicked = tally.panicked,
        timed_out = tally.timed_out,
        "Probe batch complete"
    );
    tests
}

/// Units lost to a failed join still count as attempted. Returns how many
/// tests were failed here.
fn fail_unrecorded(tests: &mut [Test]) -> usize {
    let mut failed = 0;
    for test in tests.iter_mut().filter(|t| t.result() == TestResult::NotRun) {
        failed += 1;
        if let Err(e) = test.record(TestResult::Failure) {
            error!(target: "mp.engine", error = %e, "Result recorded twice");
        }
    }
    failed
}

async fn run_unit(
    test: &Test,
    executor: &dyn ProbeExecutor,
    deadline: Option<Duration>,
) -> UnitOutcome {
    let source = test.source();
    let destination = test.destination();
    let request = ProbeRequest {
        handle: test.access(),
        namespace: &source.id.namespace,
        pod: &source.id.name,
        target_address: &destination.address,
        target_hostname: destination.hostname.as_deref(),
    };

    let probe = AssertUnwindSafe(executor.probe(test.kind(), &request)).catch_unwind();
    let caught = match deadline {
        Some(limit) => match tokio::time::timeout(limit, probe).await {
            Ok(caught) => caught,
            Err(_) => return UnitOutcome::TimedOut(limit),
        },
        None => probe.await,
    };

    match caught {
        Ok(Ok(ok)) => UnitOutcome::Completed(ok),
        Ok(Err(e)) => UnitOutcome::Raised(e),
        Err(payload) => UnitOutcome::Panicked(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn log_outcome(test: &Test, outcome: &UnitOutcome) {
    match outcome {
        UnitOutcome::Completed(_) => {}
        UnitOutcome::Raised(e) => warn!(
            target: "mp.engine",
            test = %test,
            error = %e,
            "Probe raised, recording failure"
        ),
        UnitOutcome::Panicked(message) => error!(
            target: "mp.engine",
            test = %test,
            panic = %message,
            "Probe panicked, recording failure"
        ),
        UnitOutcome::TimedOut(limit) => warn!(
            target: "mp.engine",
            test = %test,
            deadline_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            "Probe exceeded deadline, recording failure"
        ),
    }
}
