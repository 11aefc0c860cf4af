//! Execution of one admitted job.
//!
//! A worker owns nothing but its request and context. It never touches the
//! job table: the scheduler learns the outcome from the task's return value.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use dc_core::{ConversionContext, ConversionRequest, Converter, FailureReason, JobId};
use futures::FutureExt;

/// How a worker finished.
#[derive(Debug)]
pub(crate) enum Outcome {
    Done(PathBuf),
    Failed(FailureReason),
    Cancelled,
}

/// Run the conversion for one job and classify the result.
///
/// A panicking converter is contained here and reported as an internal
/// failure, so the job cannot be left in `Running`. An error returned after
/// cancellation was requested counts as cancellation.
pub(crate) async fn run(
    converter: Arc<dyn Converter>,
    request: ConversionRequest,
    ctx: ConversionContext,
) -> (JobId, Outcome) {
    let job_id = request.job_id;
    tracing::debug!(job_id = %job_id, source = %request.source_path.display(), "worker started");

    let result = AssertUnwindSafe(converter.convert(&request, &ctx))
        .catch_unwind()
        .await;

    let outcome = match result {
        Ok(Ok(output)) => Outcome::Done(output),
        Ok(Err(e)) if e.is_cancelled() || ctx.is_cancelled() => {
            tracing::debug!(job_id = %job_id, error = %e, "worker stopped after cancellation");
            Outcome::Cancelled
        }
        Ok(Err(e)) => Outcome::Failed(FailureReason::from(&e)),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(job_id = %job_id, panic = %message, "converter panicked");
            Outcome::Failed(FailureReason::internal(format!(
                "worker crashed: {message}"
            )))
        }
    };

    (job_id, outcome)
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
