//! Step Runner (C9): per-attempt execution — resolve args → run → on
//! error, compensate — plus the per-step undo walk with bounded retry.
//!
//! Grounded directly on
//! `mofa_foundation::workflow::fault_tolerance::execute_with_policy`'s
//! internal retry loop (clone-state-per-attempt, transient-vs-permanent
//! distinction, backoff sleep between attempts) and
//! `mofa_foundation::workflow::node::{RetryPolicy, execute_with_retry}`'s
//! exponential-backoff math.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::ReactorError;
use crate::middleware::{self, Event};
use crate::reactor::{Reactor, Snapshot, UndoEntry};
use crate::resolver::{build_argument_map, effective_context};
use crate::step::{CompensateResult, RunResult, Step, StepDef, UndoResult};

/// Cap on undo-attempt retries per entry (§4.7 undo path).
const MAX_UNDO_ATTEMPTS: u32 = 5;

/// Terminal outcome of driving a step through however many attempts its
/// retry policy allows.
pub enum StepOutcome {
    Success {
        value: Value,
        arguments: HashMap<String, Value>,
    },
    SuccessWithSteps {
        value: Value,
        arguments: HashMap<String, Value>,
        injected: Vec<StepDef>,
    },
    Halted(Value),
    Failed(ReactorError),
}

/// Drive `step` through resolve → run → (compensate) → retry/backoff
/// until it reaches a terminal outcome. Takes a `Snapshot` by value (or
/// reference, cloned internally where needed) so it can run detached
/// inside a spawned task (§5).
pub async fn execute_step(step: &StepDef, snapshot: &Snapshot) -> StepOutcome {
    let mut attempt: u32 = 0;
    let middleware = &snapshot.middleware;
    let reactor_id = snapshot.reactor_id;

    loop {
        let context = effective_context(step, snapshot, attempt);
        let arguments = match build_argument_map(step, snapshot) {
            Ok(map) => map,
            Err(err) => return StepOutcome::Failed(err),
        };

        debug!(step = %step.name, %reactor_id, attempt, "running step");
        middleware::notify(middleware, Event::StepRunStart { step_name: &step.name });
        let result = step.implementation.run(&arguments, &context).await;

        match result {
            RunResult::Ok(value) => {
                info!(step = %step.name, %reactor_id, "step run complete");
                middleware::notify(middleware, Event::StepRunComplete { step_name: &step.name });
                return StepOutcome::Success { value, arguments };
            }
            RunResult::OkWithSteps(value, injected) => {
                info!(step = %step.name, %reactor_id, injected = injected.len(), "step run complete");
                middleware::notify(middleware, Event::StepRunComplete { step_name: &step.name });
                return StepOutcome::SuccessWithSteps {
                    value,
                    arguments,
                    injected,
                };
            }
            RunResult::Halt(value) => {
                info!(step = %step.name, %reactor_id, "step run halted");
                middleware::notify(middleware, Event::StepRunHalt { step_name: &step.name });
                return StepOutcome::Halted(value);
            }
            RunResult::Retry(reason) => {
                attempt += 1;
                warn!(step = %step.name, %reactor_id, attempt, reason = ?reason, "step run retry");
                middleware::notify(middleware, Event::StepRunRetry { step_name: &step.name, attempt });
                if step.max_retries.exceeded(attempt) {
                    return StepOutcome::Failed(ReactorError::RetriesExceeded {
                        step_name: step.name.clone(),
                        retry_count: attempt,
                        reason: reason.unwrap_or_else(|| "retry exhausted".to_string()),
                    });
                }
                sleep_backoff(step, attempt, &Value::Null, &arguments, &context).await;
            }
            RunResult::Err(reason) => {
                error!(step = %step.name, %reactor_id, reason = %reason, "step run error");
                middleware::notify(middleware, Event::StepRunError { step_name: &step.name, error: &reason });
                if !step.capabilities().compensate {
                    return StepOutcome::Failed(ReactorError::RunStep {
                        step_name: step.name.clone(),
                        reason,
                    });
                }
                debug!(step = %step.name, %reactor_id, "step compensate start");
                middleware::notify(middleware, Event::StepCompensateStart { step_name: &step.name });
                let compensation = step.implementation.compensate(&reason, &arguments, &context).await;
                debug!(step = %step.name, %reactor_id, "step compensate stop");
                middleware::notify(middleware, Event::StepCompensateStop { step_name: &step.name });
                match compensation {
                    CompensateResult::Continue(value) => return StepOutcome::Success { value, arguments },
                    CompensateResult::Retry(new_reason) => {
                        attempt += 1;
                        if step.max_retries.exceeded(attempt) {
                            return StepOutcome::Failed(ReactorError::RetriesExceeded {
                                step_name: step.name.clone(),
                                retry_count: attempt,
                                reason: new_reason.unwrap_or(reason),
                            });
                        }
                        sleep_backoff(step, attempt, &Value::Null, &arguments, &context).await;
                    }
                    CompensateResult::Ok => {
                        return StepOutcome::Failed(ReactorError::RunStep {
                            step_name: step.name.clone(),
                            reason,
                        })
                    }
                    CompensateResult::Err(new_reason) => {
                        return StepOutcome::Failed(ReactorError::CompensateStep {
                            step_name: step.name.clone(),
                            reason: new_reason,
                        })
                    }
                }
            }
        }
    }
}

async fn sleep_backoff(
    step: &StepDef,
    attempt: u32,
    error_or_value: &Value,
    arguments: &HashMap<String, Value>,
    context: &crate::reactor::Context,
) {
    if !step.capabilities().backoff {
        return;
    }
    if let Some(duration) = step
        .implementation
        .backoff(attempt, error_or_value, arguments, context)
        .await
    {
        tokio::time::sleep(duration).await;
    }
}

/// Push a completed undoable step's produced value onto the undo stack.
pub fn push_undo(
    reactor: &mut Reactor,
    step_ref: crate::reactor::StepRef,
    step_name: String,
    value: Value,
    implementation: Arc<dyn Step>,
    arguments: HashMap<String, Value>,
) {
    reactor.undo.push(UndoEntry {
        step_ref,
        step_name,
        value,
        implementation,
        arguments,
    });
}

/// Walk the undo stack LIFO, invoking `undo` on each entry with bounded
/// retry. All failures are accumulated; no error aborts the walk (§4.7).
pub async fn walk_undo(reactor: &mut Reactor) -> crate::error::ReactorErrors {
    let mut errors = crate::error::ReactorErrors::new();

    while let Some(entry) = reactor.undo.pop() {
        let mut attempts = 0u32;
        debug!(step = %entry.step_name, reactor_id = %reactor.id, "step undo start");
        middleware::notify(&reactor.middleware, Event::StepUndoStart { step_name: &entry.step_name });
        loop {
            let context = reactor.context.clone();
            let outcome = entry
                .implementation
                .undo(&entry.value, &entry.arguments, &context)
                .await;
            match outcome {
                UndoResult::Ok => break,
                UndoResult::Retry(reason) => {
                    attempts += 1;
                    if attempts >= MAX_UNDO_ATTEMPTS {
                        error!(step = %entry.step_name, reactor_id = %reactor.id, "undo retries exceeded");
                        errors.push(ReactorError::UndoRetriesExceeded {
                            step_name: entry.step_name.clone(),
                            attempts,
                        });
                        break;
                    }
                    warn!(step = %entry.step_name, reactor_id = %reactor.id, attempt = attempts, reason = ?reason, "retrying undo");
                }
                UndoResult::Err(reason) => {
                    error!(step = %entry.step_name, reactor_id = %reactor.id, reason = %reason, "undo failed");
                    errors.push(ReactorError::UndoStep {
                        step_name: entry.step_name.clone(),
                        reason,
                    });
                    break;
                }
            }
        }
        debug!(step = %entry.step_name, reactor_id = %reactor.id, "step undo stop");
        middleware::notify(&reactor.middleware, Event::StepUndoStop { step_name: &entry.step_name });
    }

    errors
}
