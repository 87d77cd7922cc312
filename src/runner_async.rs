//! Async Runner (C7): starts ready async steps as tasks, collects
//! completions, drains on shutdown.
//!
//! Grounded on `mofa_foundation::workflow::fault_tolerance::execute_with_policy`'s
//! task-dispatch/completion shape and
//! `mofa_kernel::workflow::graph::CompiledGraph::stream`'s
//! detached-task-plus-channel pattern. Each spawned task takes a
//! `Snapshot` by value (§5's "passed by value/snapshot"), never a
//! reference into the live `Reactor`.

use std::sync::Arc;
use std::time::Duration;

use petgraph::Direction;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::ReactorError;
use crate::middleware::{self, Event};
use crate::pool::{self, PoolKey};
use crate::reactor::{PlanVertex, Reactor, StepRef};
use crate::step::{Step, StepCapabilities};
use crate::step_runner::{self, StepOutcome};
use crate::template::Template;

/// Signal returned from a runner phase to the executor loop (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Made progress; re-enter the loop immediately.
    Recurse,
    /// No progress this phase; proceed to the next phase.
    Continue,
    /// A step halted; drain and transition to `Halted`.
    Halt,
    /// A step failed unrecoverably; drain and begin the undo walk.
    Undo,
}

/// A completed task's raw payload, carried out of the spawned future so
/// the executor-owned `Reactor` can be folded back in sequentially.
struct TaskResult {
    step_ref: StepRef,
    step_name: String,
    implementation: Arc<dyn Step>,
    capabilities: StepCapabilities,
    outcome: StepOutcome,
}

/// Start as many of `ready` as the pool grants slots for, launching each
/// on a detached task. Returns `Recurse` if any task was started.
pub fn start_steps(
    reactor: &mut Reactor,
    tasks: &mut JoinSet<TaskResult>,
    pool_key: PoolKey,
    ready: &[StepRef],
) -> Control {
    if ready.is_empty() {
        return Control::Continue;
    }
    let granted = pool::acquire(pool_key, ready.len() as u32);
    if granted == 0 {
        return Control::Continue;
    }

    for &step_ref in ready.iter().take(granted as usize) {
        let def = reactor.plan[step_ref].as_step().expect("ready vertex is a step").clone();
        let snapshot = reactor.snapshot();
        let implementation = def.implementation.clone();
        let capabilities = def.capabilities();
        let step_name = def.name.clone();

        debug!(step = %step_name, reactor_id = %reactor.id, "step process start");
        middleware::notify(&reactor.middleware, Event::ProcessStart { step_name: &step_name });

        tasks.spawn(async move {
            let outcome = step_runner::execute_step(&def, &snapshot).await;
            TaskResult {
                step_ref,
                step_name,
                implementation,
                capabilities,
                outcome,
            }
        });

        // Swap the vertex to a pseudo `Executing` label: it still
        // occupies the vertex and keeps its edges, so downstream steps
        // stay blocked, but `ready_steps` will no longer pick it again.
        if let Some(weight) = reactor.plan.node_weight_mut(step_ref) {
            *weight = PlanVertex::Executing {
                step_name: step_name.clone(),
            };
        }
    }

    Control::Recurse
}

/// Poll current tasks with a short timeout, fold each completion back
/// into `reactor`, and classify the batch's terminal signal.
pub async fn collect_completed(
    reactor: &mut Reactor,
    tasks: &mut JoinSet<TaskResult>,
    pool_key: PoolKey,
    poll_timeout: Duration,
    errors: &mut crate::error::ReactorErrors,
) -> Control {
    if tasks.is_empty() {
        return Control::Continue;
    }

    let mut halted = false;
    let mut failed = false;
    let mut progressed = false;

    while let Ok(Some(joined)) = tokio::time::timeout(poll_timeout, tasks.join_next()).await {
        progressed = true;
        match joined {
            Ok(task_result) => {
                pool::release(pool_key, 1);
                match apply_task_result(reactor, task_result) {
                    Completion::Succeeded => {}
                    Completion::Halted => halted = true,
                    Completion::Failed(error) => {
                        errors.push(error);
                        failed = true;
                    }
                }
            }
            Err(join_error) => {
                pool::release(pool_key, 1);
                warn!(error = %join_error, "step task crashed");
                errors.push(ReactorError::Invariant(format!("step task crashed: {join_error}")));
                failed = true;
            }
        }
        if tasks.is_empty() {
            break;
        }
    }

    if halted {
        Control::Halt
    } else if failed {
        Control::Undo
    } else if progressed {
        Control::Recurse
    } else {
        Control::Continue
    }
}

/// Await up to `halt_timeout`, then abandon any still-running tasks with
/// a warning naming them — they cannot be undone because their
/// completion status is unknown (§4.5, Open Question #1).
pub async fn drain_on_shutdown(reactor: &mut Reactor, tasks: &mut JoinSet<TaskResult>, pool_key: PoolKey, halt_timeout: Duration) {
    let deadline = tokio::time::Instant::now() + halt_timeout;
    while !tasks.is_empty() {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, tasks.join_next()).await {
            Ok(Some(Ok(task_result))) => {
                pool::release(pool_key, 1);
                apply_task_result(reactor, task_result);
            }
            Ok(Some(Err(join_error))) => {
                pool::release(pool_key, 1);
                warn!(error = %join_error, "step task crashed during drain");
            }
            _ => break,
        }
    }
    if !tasks.is_empty() {
        warn!(
            pending = tasks.len(),
            "abandoning in-flight step tasks on shutdown; their completion status is unknown and they cannot be undone"
        );
        tasks.abort_all();
    }
}

pub(crate) enum Completion {
    Succeeded,
    Halted,
    Failed(ReactorError),
}

/// Fold one task's outcome back into the reactor: push to the undo stack
/// if undoable, retain the intermediate result if anything still needs
/// it, remove the completed vertex, and enqueue any injected steps.
fn apply_task_result(reactor: &mut Reactor, result: TaskResult) -> Completion {
    apply_outcome(
        reactor,
        result.step_ref,
        result.step_name,
        result.implementation,
        result.capabilities,
        result.outcome,
    )
}

/// Shared by the async and sync runners: both merge a step's outcome
/// identically into the reactor (§4.6).
pub(crate) fn apply_outcome(
    reactor: &mut Reactor,
    step_ref: StepRef,
    step_name: String,
    implementation: Arc<dyn Step>,
    capabilities: StepCapabilities,
    outcome: StepOutcome,
) -> Completion {
    let out_degree = reactor
        .plan
        .neighbors_directed(step_ref, Direction::Outgoing)
        .count();
    let is_return = reactor.return_step.as_deref() == Some(step_name.as_str());
    let logged_name = step_name.clone();

    let completion = match outcome {
        StepOutcome::Success { value, arguments } => {
            if capabilities.undo {
                step_runner::push_undo(
                    reactor,
                    step_ref,
                    step_name.clone(),
                    value.clone(),
                    implementation,
                    arguments,
                );
            }
            if out_degree > 0 || is_return {
                reactor.intermediate_results.insert(step_name, value);
            }
            reactor.plan.remove_node(step_ref);
            Completion::Succeeded
        }
        StepOutcome::SuccessWithSteps {
            value,
            arguments,
            injected,
        } => {
            let referenced_by_injected = injected.iter().any(|s| {
                s.arguments
                    .iter()
                    .any(|a| matches!(&a.source, Template::ResultRef { name, .. } if name == &step_name))
            });
            if capabilities.undo {
                step_runner::push_undo(
                    reactor,
                    step_ref,
                    step_name.clone(),
                    value.clone(),
                    implementation,
                    arguments,
                );
            }
            if out_degree > 0 || is_return || referenced_by_injected {
                reactor.intermediate_results.insert(step_name, value);
            }
            reactor.plan.remove_node(step_ref);
            for step in injected {
                reactor.steps.push_back(step);
            }
            Completion::Succeeded
        }
        StepOutcome::Halted(value) => {
            reactor.intermediate_results.insert(step_name, value);
            reactor.plan.remove_node(step_ref);
            Completion::Halted
        }
        StepOutcome::Failed(error) => {
            reactor.plan.remove_node(step_ref);
            Completion::Failed(error)
        }
    };

    debug!(step = %logged_name, reactor_id = %reactor.id, "step process terminate");
    middleware::notify(&reactor.middleware, Event::ProcessTerminate { step_name: &logged_name });

    completion
}

pub(crate) use TaskResult as AsyncTaskResult;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::ReactorState;
    use crate::step::StepDef;
    use crate::testing::Greet;

    #[tokio::test]
    async fn start_and_collect_round_trips_a_single_step() {
        let mut reactor = Reactor::new();
        reactor.state = ReactorState::Executing;
        reactor.return_step = Some("greet".to_string());
        let step = StepDef::new("greet", Arc::new(Greet))
            .with_async(true)
            .with_argument(crate::template::Argument::new(
                "whom",
                Template::value(serde_json::json!("Dear Reader")),
            ));
        reactor.steps.push_back(step);
        crate::planner::plan(&mut reactor).unwrap();

        let guard = pool::allocate_pool(2);
        let pool_key = guard.key();
        let ready = crate::planner::ready_steps(&reactor);
        let mut tasks = JoinSet::new();
        assert_eq!(start_steps(&mut reactor, &mut tasks, pool_key, &ready), Control::Recurse);

        let mut errors = crate::error::ReactorErrors::new();
        let control = collect_completed(&mut reactor, &mut tasks, pool_key, Duration::from_secs(1), &mut errors).await;
        assert_eq!(control, Control::Recurse);
        assert!(errors.is_empty());
        assert_eq!(
            reactor.intermediate_results.get("greet"),
            Some(&serde_json::json!("DEAR READER"))
        );
        assert_eq!(reactor.plan.node_count(), 0);
    }
}
