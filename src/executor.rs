//! Executor Loop (C10): the bounded main iteration — plan, collect
//! completions, dispatch ready steps, terminate/halt/undo.
//!
//! Grounded on `mofa_kernel::workflow::graph::CompiledGraph::invoke`/`step`'s
//! bounded single-owner iteration shape.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug_span, info, warn};

use crate::error::{ReactorError, ReactorErrors};
use crate::middleware::{self, Event};
use crate::planner;
use crate::pool::{self, PoolKey};
use crate::reactor::{Reactor, ReactorState};
use crate::runner_async::{self, AsyncTaskResult, Control};
use crate::runner_sync::{self, StepResult};
use crate::step_runner;

/// Caller-tunable run options (§6 Run API options bag).
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub max_concurrency: u32,
    pub timeout: Option<Duration>,
    pub max_iterations: Option<u64>,
    pub halt_timeout: Duration,
    pub async_allowed: bool,
    pub concurrency_key: Option<PoolKey>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_concurrency: available_parallelism(),
            timeout: None,
            max_iterations: None,
            halt_timeout: Duration::from_millis(5000),
            async_allowed: true,
            concurrency_key: None,
        }
    }
}

fn available_parallelism() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}

/// Terminal result of a run.
pub enum Outcome {
    Ok(Value),
    Err(ReactorErrors),
    Halted(Box<Reactor>),
}

enum LoopSignal {
    Success(Value),
    Halted,
    Failed(ReactorErrors),
}

/// Drive `reactor` to completion, halt, or failure. Passing a reactor
/// already in `Halted` state resumes it (§6's "passing a Halted reactor
/// back as the first argument resumes it").
pub async fn run(mut reactor: Reactor, inputs: HashMap<String, Value>, options: RunOptions) -> Outcome {
    if !matches!(reactor.state, ReactorState::Pending | ReactorState::Halted) {
        return Outcome::Err(
            ReactorError::invariant("run called on a reactor not in Pending/Halted state").into(),
        );
    }

    if let Err(err) = reactor.bind_inputs(inputs) {
        return Outcome::Err(err.into());
    }

    reactor.context = middleware::fold_init(&reactor.middleware, reactor.context.clone());
    middleware::notify(&reactor.middleware, Event::Init);
    reactor.state = ReactorState::Executing;

    let owned_guard = match reactor.concurrency_key {
        Some(_) => None,
        None => {
            let guard = pool::allocate_pool(options.max_concurrency);
            reactor.concurrency_key = Some(guard.key());
            Some(guard)
        }
    };
    let pool_key = reactor.concurrency_key.expect("concurrency_key set above");

    let mut tasks: JoinSet<AsyncTaskResult> = JoinSet::new();
    let started_at = Instant::now();
    let mut iteration: u64 = 0;
    let mut errors = ReactorErrors::new();

    let signal = loop {
        iteration += 1;
        let _span = debug_span!("reactor.iteration", reactor_id = %reactor.id, iteration).entered();

        if let Some(max_iterations) = options.max_iterations {
            if iteration > max_iterations {
                warn!(reactor_id = %reactor.id, "max_iterations exhausted; halting");
                runner_async::drain_on_shutdown(&mut reactor, &mut tasks, pool_key, options.halt_timeout).await;
                break LoopSignal::Halted;
            }
        }
        if let Some(timeout) = options.timeout {
            if started_at.elapsed() >= timeout {
                warn!(reactor_id = %reactor.id, "timeout elapsed; halting");
                runner_async::drain_on_shutdown(&mut reactor, &mut tasks, pool_key, options.halt_timeout).await;
                break LoopSignal::Halted;
            }
        }

        if !reactor.steps.is_empty() {
            if let Err(err) = planner::plan(&mut reactor) {
                errors.push(err);
                runner_async::drain_on_shutdown(&mut reactor, &mut tasks, pool_key, options.halt_timeout).await;
                break LoopSignal::Failed(errors);
            }
        }

        if options.async_allowed {
            let control =
                runner_async::collect_completed(&mut reactor, &mut tasks, pool_key, Duration::from_millis(50), &mut errors)
                    .await;
            match control {
                Control::Halt => {
                    runner_async::drain_on_shutdown(&mut reactor, &mut tasks, pool_key, options.halt_timeout).await;
                    break LoopSignal::Halted;
                }
                Control::Undo => {
                    runner_async::drain_on_shutdown(&mut reactor, &mut tasks, pool_key, options.halt_timeout).await;
                    break LoopSignal::Failed(errors);
                }
                Control::Recurse => continue,
                Control::Continue => {}
            }
        }

        let ready = planner::ready_steps(&reactor);
        let (ready_async, ready_sync): (Vec<_>, Vec<_>) = ready.into_iter().partition(|r| {
            options.async_allowed
                && reactor
                    .plan
                    .node_weight(*r)
                    .and_then(|v| v.as_step())
                    .map(|s| s.is_async())
                    .unwrap_or(false)
        });

        if !ready_async.is_empty() {
            if let Control::Recurse = runner_async::start_steps(&mut reactor, &mut tasks, pool_key, &ready_async) {
                continue;
            }
        }

        if let Some(&step_ref) = ready_sync.first() {
            match runner_sync::run_one(&mut reactor, step_ref).await {
                StepResult::Succeeded => continue,
                StepResult::Halted => {
                    runner_async::drain_on_shutdown(&mut reactor, &mut tasks, pool_key, options.halt_timeout).await;
                    break LoopSignal::Halted;
                }
                StepResult::Failed(err) => {
                    errors.push(err);
                    runner_async::drain_on_shutdown(&mut reactor, &mut tasks, pool_key, options.halt_timeout).await;
                    break LoopSignal::Failed(errors);
                }
            }
        }

        if reactor.plan.node_count() == 0 {
            match reactor
                .return_step
                .as_deref()
                .and_then(|name| reactor.intermediate_results.get(name).cloned())
            {
                Some(value) => break LoopSignal::Success(value),
                None => {
                    errors.push(ReactorError::MissingReturn(reactor.return_step.clone().unwrap_or_default()));
                    break LoopSignal::Failed(errors);
                }
            }
        }

        // No ready step and nothing started this iteration: if tasks are
        // still in flight, the next iteration's collect phase will make
        // progress; a non-empty plan with no ready steps and no in-flight
        // tasks is unreachable for an acyclic, correctly-planned graph.
        if tasks.is_empty() {
            errors.push(ReactorError::invariant(
                "no ready steps and no in-flight tasks with a non-empty plan",
            ));
            break LoopSignal::Failed(errors);
        }
    };

    let owned_pool = owned_guard.is_some();
    drop(owned_guard);

    match signal {
        LoopSignal::Success(value) => {
            reactor.state = ReactorState::Successful;
            let value = middleware::fold_complete(&reactor.middleware, value);
            middleware::notify(&reactor.middleware, Event::Complete { value: &value });
            info!(reactor_id = %reactor.id, "reactor completed successfully");
            Outcome::Ok(value)
        }
        LoopSignal::Halted => {
            reactor.state = ReactorState::Halted;
            reactor.context = middleware::fold_halt(&reactor.middleware, reactor.context.clone());
            middleware::notify(&reactor.middleware, Event::Halt);
            if owned_pool {
                // The pool we allocated is released (guard dropped above);
                // a resuming `run()` call will allocate a fresh one rather
                // than acquire against a now-unregistered key.
                reactor.concurrency_key = None;
            }
            warn!(reactor_id = %reactor.id, "reactor halted");
            Outcome::Halted(Box::new(reactor))
        }
        LoopSignal::Failed(mut errors) => {
            reactor.state = ReactorState::Failed;
            for undo_error in step_runner::walk_undo(&mut reactor).await.into_vec() {
                errors.push(undo_error);
            }
            let errors: ReactorErrors = errors
                .into_vec()
                .into_iter()
                .map(|error| {
                    let error = middleware::fold_error(&reactor.middleware, error);
                    middleware::notify(&reactor.middleware, Event::Error { error: &error });
                    error
                })
                .collect();
            warn!(reactor_id = %reactor.id, errors = errors.len(), "reactor failed; rollback complete");
            Outcome::Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::StepDef;
    use crate::template::{Argument, Template};
    use crate::testing::{AlwaysFail, Greet, UndoableAdd};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn linear_scenario_returns_uppercased_value() {
        let reactor = Reactor::new()
            .add_input("whom")
            .add_step(
                StepDef::new("greet", Arc::new(Greet))
                    .with_argument(Argument::new("whom", Template::input("whom"))),
            )
            .set_return("greet");
        let inputs = HashMap::from([("whom".to_string(), json!("Dear Reader"))]);
        match run(reactor, inputs, RunOptions::default()).await {
            Outcome::Ok(value) => assert_eq!(value, json!("DEAR READER")),
            _ => panic!("expected Ok"),
        }
    }

    #[tokio::test]
    async fn rollback_scenario_undoes_every_successful_step() {
        let set = Arc::new(Mutex::new(std::collections::HashSet::new()));
        let reactor = Reactor::new()
            .add_step(StepDef::new("add1", Arc::new(UndoableAdd::new(set.clone(), 1))))
            .add_step(
                StepDef::new("add2", Arc::new(UndoableAdd::new(set.clone(), 2)))
                    .with_argument(Argument::wait_for(Template::result("add1"))),
            )
            .add_step(
                StepDef::new("boom", Arc::new(AlwaysFail::new("I fail")))
                    .with_argument(Argument::wait_for(Template::result("add2"))),
            )
            .set_return("boom");
        match run(reactor, HashMap::new(), RunOptions::default()).await {
            Outcome::Err(errors) => {
                assert!(errors.iter().any(|e| e.to_string().contains("I fail")));
            }
            _ => panic!("expected Err"),
        }
        assert!(set.lock().unwrap().is_empty());
    }
}
