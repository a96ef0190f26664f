//! Fan-out/fan-in execution of independent fixture operations.
//!
//! [`run_batch`] runs N units of work on a pool of at most P tokio tasks.
//! Workers pull `(index, unit)` pairs from a shared queue and send
//! `(index, result)` back over a channel; a single collector writes each
//! result into slot `index` of the output.  Results therefore come back in
//! input order however the work was scheduled, and every slot is filled:
//! a unit that panics or is lost surfaces as an error in its own slot.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::errors::{BatchFailure, Error, IndexedError};

/// Outcome of one unit of work.
#[derive(Debug)]
pub struct FixtureResult<T> {
    /// Position of the unit in the batch input.
    pub index: usize,
    pub outcome: Result<T, Error>,
}

/// All outcomes of a batch, ordered by input index.
#[derive(Debug)]
pub struct Batch<T> {
    results: Vec<FixtureResult<T>>,
}

impl<T> Batch<T> {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Results in input order.
    pub fn results(&self) -> &[FixtureResult<T>] {
        &self.results
    }

    /// The error with the lowest index, if any unit failed.
    pub fn first_error(&self) -> Option<(usize, &Error)> {
        self.results
            .iter()
            .find_map(|r| r.outcome.as_ref().err().map(|e| (r.index, e)))
    }

    /// Split into successes and failures, both still in index order.
    pub fn split(self) -> (Vec<(usize, T)>, Vec<IndexedError>) {
        let mut ok = Vec::new();
        let mut failed = Vec::new();
        for r in self.results {
            match r.outcome {
                Ok(value) => ok.push((r.index, value)),
                Err(error) => failed.push(IndexedError {
                    index: r.index,
                    error: Box::new(error),
                }),
            }
        }
        (ok, failed)
    }

    /// Every value in index order, or the failures and whatever succeeded.
    pub fn into_values(self) -> Result<Vec<T>, (Vec<T>, BatchFailure)> {
        let total = self.len();
        let (ok, failures) = self.split();
        let values = ok.into_iter().map(|(_, v)| v).collect();
        if failures.is_empty() {
            Ok(values)
        } else {
            Err((values, BatchFailure { total, failures }))
        }
    }
}

type Queue<F> = Arc<Mutex<VecDeque<(usize, F)>>>;

/// Run every unit with at most `parallelism` in flight.
///
/// A failing unit does not cancel the others; the call returns once all
/// of them have finished.  `parallelism` is clamped to `1..=units.len()`.
pub async fn run_batch<T, F, Fut>(parallelism: usize, units: Vec<F>) -> Batch<T>
where
    T: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, Error>> + Send + 'static,
{
    let total = units.len();
    if total == 0 {
        return Batch {
            results: Vec::new(),
        };
    }
    let workers = parallelism.clamp(1, total);
    debug!("running {total} unit(s) on {workers} worker(s)");

    let queue: Queue<F> = Arc::new(Mutex::new(units.into_iter().enumerate().collect()));
    let (tx, mut rx) = mpsc::unbounded_channel::<(usize, Result<T, Error>)>();

    for worker in 0..workers {
        let queue = Arc::clone(&queue);
        let tx = tx.clone();
        tokio::spawn(async move {
            loop {
                let next = queue.lock().expect("queue mutex poisoned").pop_front();
                let Some((index, unit)) = next else {
                    break;
                };
                trace!(worker, index, "unit started");
                // Each unit runs in its own task so a panic is caught as a JoinError.
                let outcome = match tokio::spawn(unit()).await {
                    Ok(outcome) => outcome,
                    Err(join) => Err(Error::Internal(anyhow::anyhow!(
                        "unit {index} did not complete: {join}"
                    ))),
                };
                if tx.send((index, outcome)).is_err() {
                    break;
                }
            }
        });
    }
    drop(tx);

    let mut slots: Vec<Option<Result<T, Error>>> = (0..total).map(|_| None).collect();
    let mut received = 0;
    while received < total {
        let Some((index, outcome)) = rx.recv().await else {
            break;
        };
        slots[index] = Some(outcome);
        received += 1;
    }

    let results = slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| FixtureResult {
            index,
            outcome: slot.unwrap_or_else(|| {
                Err(Error::Internal(anyhow::anyhow!(
                    "unit {index} produced no result"
                )))
            }),
        })
        .collect();
    Batch { results }
}
