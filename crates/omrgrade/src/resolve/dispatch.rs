//! Batched, deadline-bounded calls to the secondary decision source.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError};

use super::{AmbiguityResolver, AmbiguousQuestion, FusionConfig, ResolverError, SecondaryDecision};
use crate::api::CancellationToken;
use crate::error::{EngineError, EngineResult, Stage};

/// A batch the source could not decide.
#[derive(Debug)]
pub(super) struct BatchFailure {
    pub(super) questions: Vec<u32>,
    pub(super) error: ResolverError,
}

#[derive(Debug, Default)]
pub(super) struct DispatchOutcome {
    pub(super) decisions: Vec<SecondaryDecision>,
    pub(super) failures: Vec<BatchFailure>,
    pub(super) requests: usize,
}

/// Run one request on a worker thread and wait at most `timeout`.
///
/// A request still running at the deadline is abandoned; its result is
/// dropped when it eventually arrives.
fn call_with_timeout(
    resolver: &Arc<dyn AmbiguityResolver>,
    batch: Vec<AmbiguousQuestion>,
    timeout: Duration,
) -> Result<Vec<SecondaryDecision>, ResolverError> {
    let (tx, rx) = bounded(1);
    let worker = Arc::clone(resolver);
    thread::Builder::new()
        .name("omrgrade-resolver".to_string())
        .spawn(move || {
            let _ = tx.send(worker.resolve_ambiguous(&batch));
        })
        .map_err(|e| ResolverError::Unavailable(format!("cannot spawn resolver worker: {e}")))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(ResolverError::Timeout(timeout)),
        Err(RecvTimeoutError::Disconnected) => Err(ResolverError::Failed(
            "resolver worker exited without a response".to_string(),
        )),
    }
}

/// Submit `candidates` in chunks of `max_batch_size`.
///
/// All requests share one deadline of `timeout_ms`. A failed request is
/// retried up to `max_retries` times while time remains; a timed-out one is
/// not. Cancellation is checked between requests.
pub(super) fn dispatch(
    resolver: &Arc<dyn AmbiguityResolver>,
    candidates: &[AmbiguousQuestion],
    cfg: &FusionConfig,
    cancel: Option<&CancellationToken>,
) -> EngineResult<DispatchOutcome> {
    let deadline = Instant::now() + cfg.timeout();
    let mut out = DispatchOutcome::default();

    for chunk in candidates.chunks(cfg.max_batch_size.max(1)) {
        let questions: Vec<u32> = chunk.iter().map(|q| q.question).collect();
        let mut attempt = 0u32;
        loop {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(EngineError::Cancelled {
                    stage: Stage::Resolve,
                });
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                out.failures.push(BatchFailure {
                    questions,
                    error: ResolverError::Timeout(cfg.timeout()),
                });
                break;
            }

            out.requests += 1;
            match call_with_timeout(resolver, chunk.to_vec(), remaining) {
                Ok(decisions) => {
                    tracing::debug!(
                        resolver = resolver.name(),
                        batch = chunk.len(),
                        decisions = decisions.len(),
                        attempt,
                        "secondary decisions received"
                    );
                    out.decisions.extend(decisions);
                    break;
                }
                Err(error @ ResolverError::Timeout(_)) => {
                    out.failures.push(BatchFailure { questions, error });
                    break;
                }
                Err(error) if attempt < cfg.max_retries => {
                    tracing::warn!(
                        resolver = resolver.name(),
                        attempt,
                        "secondary decision request failed, retrying: {error}"
                    );
                    attempt += 1;
                }
                Err(error) => {
                    out.failures.push(BatchFailure { questions, error });
                    break;
                }
            }
        }
    }
    Ok(out)
}
