//! Cross-thread timeout supervision for algorithm workers.
//!
//! Every compress or decompress attempt runs on a dedicated worker thread
//! while the calling thread polls a bounded result channel. The caller can
//! therefore enforce a deadline even against an algorithm that never checks
//! its cancellation token: the worker is abandoned (its child token
//! cancelled, the thread left to notice on its own) and the caller moves on.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError};

use crate::io::InputPayload;
use crate::plugin::RegisteredAlgorithm;
use crate::{CancellationToken, CrimpError, Result};

/// Deadline applied when the caller does not pick one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the supervising thread re-checks the caller's token while
/// waiting for the worker.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Which codec direction the worker runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Compress,
    Decompress,
}

impl Direction {
    pub fn label(self) -> &'static str {
        match self {
            Self::Compress => "compress",
            Self::Decompress => "decompress",
        }
    }

    fn panic_error(self, details: String) -> CrimpError {
        let message = format!("worker thread panicked: {details}");
        match self {
            Self::Compress => CrimpError::CompressionError(message),
            Self::Decompress => CrimpError::DecompressionError(message),
        }
    }
}

/// Result of a supervised run, naming the algorithm that actually produced
/// the bytes.
pub struct SupervisedOutcome {
    pub bytes: Vec<u8>,
    pub metadata: crate::plugin::AlgorithmMetadata,
    pub fell_back: bool,
}

enum AttemptOutcome {
    Finished(Result<Vec<u8>>),
    TimedOut,
    Panicked(String),
}

/// Runs `primary` under `deadline`, retrying once with `fallback` if the
/// primary times out or panics.
///
/// An explicit cancellation of the caller's token always surfaces as
/// [`CrimpError::Cancelled`] without a retry. A clean error from the
/// algorithm itself also propagates directly; the fallback exists to contain
/// misbehaving workers, not to mask typed failures. The fallback attempt
/// gets a fresh deadline, so the whole call returns within roughly twice the
/// configured deadline.
pub fn run_supervised(
    primary: RegisteredAlgorithm,
    fallback: Option<RegisteredAlgorithm>,
    payload: InputPayload,
    direction: Direction,
    cancel: &CancellationToken,
    deadline: Duration,
) -> Result<SupervisedOutcome> {
    match run_attempt(&primary, &payload, direction, cancel, deadline)? {
        AttemptOutcome::Finished(Ok(bytes)) => Ok(SupervisedOutcome {
            bytes,
            metadata: primary.metadata,
            fell_back: false,
        }),
        AttemptOutcome::Finished(Err(error)) => Err(error),
        AttemptOutcome::TimedOut => {
            tracing::warn!(
                algorithm = %primary.metadata.name,
                operation = direction.label(),
                ?deadline,
                "worker missed its deadline, abandoning"
            );
            run_fallback(
                fallback,
                &payload,
                direction,
                cancel,
                deadline,
                CrimpError::Timeout {
                    operation: direction.label(),
                    deadline,
                },
            )
        }
        AttemptOutcome::Panicked(details) => {
            tracing::warn!(
                algorithm = %primary.metadata.name,
                operation = direction.label(),
                %details,
                "worker crashed"
            );
            run_fallback(
                fallback,
                &payload,
                direction,
                cancel,
                deadline,
                direction.panic_error(details),
            )
        }
    }
}

fn run_fallback(
    fallback: Option<RegisteredAlgorithm>,
    payload: &InputPayload,
    direction: Direction,
    cancel: &CancellationToken,
    deadline: Duration,
    escalation: CrimpError,
) -> Result<SupervisedOutcome> {
    let Some(entry) = fallback else {
        return Err(escalation);
    };
    if cancel.is_cancelled() {
        return Err(CrimpError::Cancelled);
    }
    tracing::warn!(
        fallback = %entry.metadata.name,
        operation = direction.label(),
        "retrying with fallback algorithm"
    );
    match run_attempt(&entry, payload, direction, cancel, deadline)? {
        AttemptOutcome::Finished(Ok(bytes)) => Ok(SupervisedOutcome {
            bytes,
            metadata: entry.metadata,
            fell_back: true,
        }),
        AttemptOutcome::Finished(Err(error)) => Err(error),
        AttemptOutcome::TimedOut => Err(CrimpError::Timeout {
            operation: direction.label(),
            deadline,
        }),
        AttemptOutcome::Panicked(details) => Err(direction.panic_error(details)),
    }
}

/// One worker attempt. The worker gets a child token so it can be stopped
/// without cancelling the caller; the outer `Err` only reports a failure to
/// spawn the thread.
fn run_attempt(
    entry: &RegisteredAlgorithm,
    payload: &InputPayload,
    direction: Direction,
    caller: &CancellationToken,
    deadline: Duration,
) -> Result<AttemptOutcome> {
    let child = caller.child();
    let mut guard = AbandonGuard::new(child.clone());

    let (sender, receiver) = bounded::<thread::Result<Result<Vec<u8>>>>(1);
    let algorithm = entry.algorithm.clone();
    let worker_payload = payload.clone();
    let worker_token = child;
    thread::Builder::new()
        .name(format!("crimp-{}", direction.label()))
        .spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(|| match direction {
                Direction::Compress => {
                    algorithm.compress(worker_payload.as_slice(), &worker_token)
                }
                Direction::Decompress => {
                    algorithm.decompress(worker_payload.as_slice(), &worker_token)
                }
            }));
            // The supervisor may already have walked away.
            let _ = sender.send(result);
        })?;

    let started = Instant::now();
    loop {
        if caller.is_cancelled() {
            return Ok(AttemptOutcome::Finished(Err(CrimpError::Cancelled)));
        }
        let remaining = deadline.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Ok(AttemptOutcome::TimedOut);
        }
        match receiver.recv_timeout(remaining.min(POLL_INTERVAL)) {
            Ok(Ok(result)) => {
                guard.disarm();
                return Ok(AttemptOutcome::Finished(result));
            }
            Ok(Err(panic_payload)) => {
                return Ok(AttemptOutcome::Panicked(panic_details(panic_payload.as_ref())));
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                return Ok(AttemptOutcome::Panicked(
                    "worker exited without reporting a result".to_string(),
                ));
            }
        }
    }
}

/// Cancels the worker's child token unless disarmed, covering every early
/// return out of the supervision loop. The abandoned thread stops at its
/// next cancellation check; a worker that never checks keeps its detached
/// thread until it finishes on its own.
struct AbandonGuard {
    child: CancellationToken,
    armed: bool,
}

impl AbandonGuard {
    fn new(child: CancellationToken) -> Self {
        Self { child, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if self.armed {
            self.child.cancel();
            tracing::debug!("abandoned worker signalled to stop");
        }
    }
}

fn panic_details(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
