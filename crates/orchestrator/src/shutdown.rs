//! Interrupt-aware operation runner

use std::future::Future;
use std::sync::Arc;

use crate::error::OrchestratorResult;
use crate::lifecycle::{EngineLifecycle, StopOutcome};

#[derive(Debug)]
pub enum RunOutcome<T> {
    Completed(T),
    Interrupted,
}

/// Race `operation` against `interrupt`, then stop the engine once
///
/// Whichever side wins, the engine is stopped before returning. An
/// interrupted operation is dropped mid-flight. The operation's own error is
/// returned after the stop; a stop failure only surfaces when the operation
/// itself succeeded.
pub async fn run_until_interrupted<T, Op, Int>(
    lifecycle: Arc<EngineLifecycle>,
    operation: Op,
    interrupt: Int,
) -> OrchestratorResult<RunOutcome<T>>
where
    Op: Future<Output = OrchestratorResult<T>>,
    Int: Future<Output = ()>,
{
    let result = tokio::select! {
        res = operation => res.map(RunOutcome::Completed),
        _ = interrupt => {
            tracing::warn!("Interrupt received, shutting down engine...");
            Ok(RunOutcome::Interrupted)
        }
    };

    let stopped = lifecycle.stop().await;
    match &stopped {
        Ok(StopOutcome::Stopped { drained: false }) => {
            tracing::warn!("Engine stopped before in-flight work finished");
        }
        Ok(_) => {}
        Err(e) => tracing::error!("Engine shutdown failed: {}", e),
    }

    let outcome = result?;
    stopped?;
    Ok(outcome)
}
